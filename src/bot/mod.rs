//! The bot shell: per-network connections, module dispatch, and the
//! remote-control service.

mod module;
pub mod proto;
pub mod remote;

pub use module::Module;
pub use remote::Remote;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::client::{Connection, Event};
use crate::config::Config;
use crate::runtime::Shutdown;

/// What the bot exposes to modules and services: connection lookup by
/// network name.
pub struct Host {
    connections: HashMap<String, Connection>,
}

impl Host {
    /// Looks up a connection by network name.
    pub fn conn(&self, net: &str) -> Option<&Connection> {
        self.connections.get(net)
    }

    /// Iterates every connection.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }
}

/// The assembled bot: connections plus modules.
pub struct Bot {
    host: Arc<Host>,
    modules: Vec<Box<dyn Module>>,
    events_rx: mpsc::UnboundedReceiver<(String, Event)>,
    shutdown: Shutdown,
}

impl Bot {
    /// Spawns a connection per configured network and wires their event
    /// streams into one queue.
    pub fn new(config: &Config, shutdown: Shutdown) -> Bot {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut connections = HashMap::new();

        for net_config in &config.networks {
            let conn = Connection::spawn(net_config.clone(), shutdown.clone());
            spawn_forwarder(net_config.name.clone(), conn.subscribe(), events_tx.clone());
            connections.insert(net_config.name.clone(), conn);
        }

        Bot {
            host: Arc::new(Host { connections }),
            modules: Vec::new(),
            events_rx,
            shutdown,
        }
    }

    /// The module-host surface.
    pub fn host(&self) -> Arc<Host> {
        Arc::clone(&self.host)
    }

    /// Registers a module. Modules see messages in registration order.
    pub fn add_module(&mut self, module: Box<dyn Module>) {
        self.modules.push(module);
    }

    /// Dispatches events to modules until shutdown.
    pub async fn run(mut self) {
        info!(networks = self.host.connections.len(), "bot running");
        loop {
            tokio::select! {
                event = self.events_rx.recv() => {
                    let Some((net, event)) = event else { break };
                    self.dispatch(&net, event).await;
                }
                _ = self.shutdown.wait() => break,
            }
        }
        info!("bot stopped");
    }

    async fn dispatch(&mut self, net: &str, event: Event) {
        let Some(conn) = self.host.connections.get(net) else {
            return;
        };
        match event {
            Event::MessageReceived(msg) => {
                for module in &mut self.modules {
                    module.message_received(conn, &msg).await;
                }
            }
            Event::MessageSent(msg) => {
                for module in &mut self.modules {
                    module.message_sent(conn, &msg).await;
                }
            }
            Event::Ready => info!(net, "connection ready"),
            Event::Lost => info!(net, "connection lost"),
            Event::NickChanged { old, new } => info!(net, %old, %new, "nick changed"),
            Event::ChannelJoined(chan) => debug!(net, %chan, "joined"),
            Event::ChannelLeft(chan) => debug!(net, %chan, "left"),
        }
    }
}

/// Forwards one connection's broadcast events into the bot's queue,
/// tagging them with the network name. A lagging bot loses old events
/// rather than stalling the connection.
fn spawn_forwarder(
    net: String,
    mut events: broadcast::Receiver<Event>,
    tx: mpsc::UnboundedSender<(String, Event)>,
) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if tx.send((net.clone(), event)).is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(net = %net, missed, "event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}
