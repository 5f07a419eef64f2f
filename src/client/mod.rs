//! IRC client connections.
//!
//! A [`Connection`] maintains at most one live session against one of its
//! configured servers, reconnecting with rotation on loss. The handle is
//! cheap to clone and exposes the surface modules need: send, subscribe,
//! membership queries, and the network name.

mod registration;
mod state;
mod task;

pub use state::{ChannelStatus, SessionState};

use std::sync::Arc;

use murk_proto::Message;
use tokio::sync::{broadcast, mpsc};

use crate::config::NetworkConfig;
use crate::runtime::Shutdown;

/// Subscriber capacity; a watcher this far behind starts losing events.
const EVENT_CAPACITY: usize = 256;

/// Lifecycle and traffic events published to subscribers.
#[derive(Clone, Debug)]
pub enum Event {
    /// A message arrived from the server.
    MessageReceived(Message),
    /// A message was queued for the server on behalf of a client.
    MessageSent(Message),
    /// Registration and autojoin completed; public sends flow.
    Ready,
    /// The connection dropped; a reconnect is scheduled.
    Lost,
    /// Our own nick changed.
    NickChanged {
        /// Nick before the change.
        old: String,
        /// Nick after the change.
        new: String,
    },
    /// Our JOIN to a channel was confirmed.
    ChannelJoined(String),
    /// We left (or were removed from) a channel.
    ChannelLeft(String),
}

pub(crate) enum Command {
    Send(Message),
}

/// Handle to one network's connection task.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<state::Shared>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<Event>,
}

impl Connection {
    /// Spawns the connection task for `config` and returns its handle.
    /// The task starts connecting immediately and keeps itself alive until
    /// `shutdown` trips or the last handle is dropped.
    pub fn spawn(config: NetworkConfig, shutdown: Shutdown) -> Connection {
        let shared = Arc::new(state::Shared::new(
            config.name.clone(),
            config.nick.clone(),
            &config.channels,
        ));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let task = task::ConnectionTask::new(
            config,
            Arc::clone(&shared),
            cmd_rx,
            events.clone(),
            shutdown,
        );
        tokio::spawn(task.run());

        Connection {
            shared,
            cmd_tx,
            events,
        }
    }

    /// Posts a message over the connection.
    ///
    /// Messages are silently dropped unless the connection is ready; flood
    /// control may delay the actual write.
    pub fn send(&self, msg: Message) {
        let _ = self.cmd_tx.send(Command::Send(msg));
    }

    /// Subscribes to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// The configured network name.
    pub fn net(&self) -> &str {
        self.shared.net()
    }

    /// The nick currently held (or being negotiated).
    pub fn nick(&self) -> String {
        self.shared.nick()
    }

    /// Tests whether `nick` is known to be on `chan`.
    pub fn on_channel(&self, nick: &str, chan: &str) -> bool {
        self.shared.on_channel(nick, chan)
    }
}
