//! Remote-control module: the RPC service exposing watch streams and
//! message injection over the control socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use murk_proto::Message;
use tracing::{debug, warn};

use super::proto::{method, Direction, IrcEvent, SendToRequest, SendToResponse, WatchRequest};
use super::Host;
use crate::client::Connection;
use crate::config::RpcConfig;
use crate::error::{NetError, RpcError};
use crate::net::Listener;
use crate::rpc::{CallHandle, Dispatcher, Endpoint, Handler, RpcServer, Typed};
use crate::runtime::Shutdown;

/// Converts a wire event into an IRC message.
fn event_to_message(event: &IrcEvent) -> Message {
    Message {
        prefix: event.prefix.clone(),
        command: event.command.clone(),
        args: event.args.clone(),
    }
}

/// Converts an IRC message into a wire event.
fn message_to_event(net: &str, msg: &Message, direction: Direction) -> IrcEvent {
    IrcEvent {
        prefix: msg.prefix.clone(),
        command: msg.command.clone(),
        args: msg.args.clone(),
        direction: direction as i32,
        net: net.to_owned(),
    }
}

/// One active watch call: where to send events, and which networks.
struct WatchSink {
    call: CallHandle,
    /// Empty means all networks.
    nets: Vec<String>,
}

type WatchSet = Arc<DashMap<u64, WatchSink>>;

/// The remote-control module. Registers as a [`super::Module`] to observe
/// traffic and runs the RPC server on the configured control socket.
pub struct Remote {
    watchers: WatchSet,
    server: Option<RpcServer>,
}

impl Remote {
    /// Binds the control socket and starts serving.
    pub fn start(host: Arc<Host>, config: &RpcConfig, shutdown: Shutdown) -> Result<Remote, NetError> {
        let listener = Listener::bind_unix(&config.socket_path)?;
        let watchers: WatchSet = Arc::new(DashMap::new());
        let dispatcher = Arc::new(RemoteDispatcher {
            host,
            watchers: Arc::clone(&watchers),
        });
        let server = RpcServer::start(listener, dispatcher, config.max_calls, shutdown);
        Ok(Remote {
            watchers,
            server: Some(server),
        })
    }

    /// Waits for the RPC server to wind down.
    pub async fn join(&mut self) {
        if let Some(server) = self.server.take() {
            server.join().await;
        }
    }

    fn fan_out(&self, net: &str, msg: &Message, direction: Direction) {
        if self.watchers.is_empty() {
            return;
        }
        let event = message_to_event(net, msg, direction);
        for sink in self.watchers.iter() {
            if sink.nets.is_empty() || sink.nets.iter().any(|n| n == net) {
                sink.call.send(&event);
            }
        }
    }
}

#[async_trait]
impl super::Module for Remote {
    async fn message_received(&mut self, conn: &Connection, msg: &Message) {
        self.fan_out(conn.net(), msg, Direction::Received);
    }

    async fn message_sent(&mut self, conn: &Connection, msg: &Message) {
        self.fan_out(conn.net(), msg, Direction::Sent);
    }
}

struct RemoteDispatcher {
    host: Arc<Host>,
    watchers: WatchSet,
}

#[async_trait]
impl Dispatcher for RemoteDispatcher {
    async fn dispatch(&self, code: u32) -> Result<Box<dyn Endpoint>, RpcError> {
        static NEXT_WATCH_ID: AtomicU64 = AtomicU64::new(1);

        match code {
            method::WATCH => Ok(Typed::endpoint(WatchHandler {
                id: NEXT_WATCH_ID.fetch_add(1, Ordering::Relaxed),
                watchers: Arc::clone(&self.watchers),
            })),
            method::SEND_TO => Ok(Typed::endpoint(SendToHandler {
                host: Arc::clone(&self.host),
            })),
            other => Err(RpcError::UnknownMethod(other)),
        }
    }

    fn error(&self, error: RpcError) {
        warn!(error = %error, "remote");
    }
}

/// Server side of one watch call.
struct WatchHandler {
    id: u64,
    watchers: WatchSet,
}

#[async_trait]
impl Handler<WatchRequest> for WatchHandler {
    async fn open(&mut self, call: &CallHandle) {
        debug!(id = self.id, "watch opened");
        self.watchers.insert(
            self.id,
            WatchSink {
                call: call.clone(),
                nets: Vec::new(),
            },
        );
    }

    async fn message(&mut self, _call: &CallHandle, req: &WatchRequest) {
        if let Some(mut sink) = self.watchers.get_mut(&self.id) {
            sink.nets = req.nets.clone();
        }
    }

    async fn closed(&mut self, error: Option<&RpcError>) {
        if let Some(error) = error {
            warn!(id = self.id, error = %error, "watch closed");
        } else {
            debug!(id = self.id, "watch closed");
        }
        self.watchers.remove(&self.id);
    }
}

/// Server side of one send-to call.
struct SendToHandler {
    host: Arc<Host>,
}

#[async_trait]
impl Handler<SendToRequest> for SendToHandler {
    async fn message(&mut self, call: &CallHandle, req: &SendToRequest) {
        let ok = match (self.host.conn(&req.net), &req.event) {
            (Some(conn), Some(event)) => {
                conn.send(event_to_message(event));
                true
            }
            (None, _) => {
                warn!(net = %req.net, "send-to request for unknown network");
                false
            }
            (_, None) => false,
        };
        call.send(&SendToResponse { ok });
        call.close(None, true);
    }
}
