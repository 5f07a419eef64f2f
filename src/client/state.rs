//! Connection and channel state tracking.

use std::collections::HashSet;
use std::sync::RwLock;

use dashmap::DashMap;

/// Lifecycle of one connection attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No socket.
    Disconnected,
    /// Socket open, registration in progress.
    Connecting,
    /// Welcome numeric seen, waiting for the autojoin window.
    Registered,
    /// Fully up; public sends flow.
    Ready,
}

/// Where we stand with one configured channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Configured but not joined.
    #[default]
    Known,
    /// JOIN sent, echo not yet seen.
    Joining,
    /// Our JOIN echo arrived.
    Joined,
}

/// Tracked state of one channel.
#[derive(Debug, Default)]
pub struct ChannelState {
    /// Join progress.
    pub status: ChannelStatus,
    /// Nicks seen on the channel, lowercased. Seeded from NAMES and kept
    /// current on JOIN/PART/KICK/QUIT/NICK; a netsplit can desynchronise
    /// it until the next join.
    pub members: HashSet<String>,
}

/// State shared between the connection task and its handle.
#[derive(Debug)]
pub struct Shared {
    net: String,
    nick: RwLock<String>,
    /// Keyed by lowercased channel name.
    pub(crate) channels: DashMap<String, ChannelState>,
}

/// ASCII lowercasing; good enough for the channel and nick lookups the
/// module surface needs.
pub fn normalize(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl Shared {
    /// Creates shared state for a network, seeding the configured channels
    /// as `Known`.
    pub fn new(net: String, nick: String, channels: &[String]) -> Shared {
        let map = DashMap::new();
        for chan in channels {
            map.insert(normalize(chan), ChannelState::default());
        }
        Shared {
            net,
            nick: RwLock::new(nick),
            channels: map,
        }
    }

    /// The configured network name.
    pub fn net(&self) -> &str {
        &self.net
    }

    /// The nick we currently hold (or are trying to hold).
    pub fn nick(&self) -> String {
        self.nick.read().expect("nick lock poisoned").clone()
    }

    /// Updates the current nick.
    pub fn set_nick(&self, nick: &str) {
        *self.nick.write().expect("nick lock poisoned") = nick.to_owned();
    }

    /// Tests whether `nick` is known to be on `chan`.
    pub fn on_channel(&self, nick: &str, chan: &str) -> bool {
        self.channels
            .get(&normalize(chan))
            .is_some_and(|c| c.members.contains(&normalize(nick)))
    }

    /// Resets every channel to `Known` with no members, returning the
    /// names (original casing lost) that were joined.
    pub fn reset_channels(&self) -> Vec<String> {
        let mut were_joined = Vec::new();
        for mut entry in self.channels.iter_mut() {
            if entry.status == ChannelStatus::Joined {
                were_joined.push(entry.key().clone());
            }
            entry.status = ChannelStatus::Known;
            entry.members.clear();
        }
        were_joined
    }
}
