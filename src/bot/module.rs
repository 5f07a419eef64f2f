//! The module interface: how pieces of bot behaviour observe traffic.

use async_trait::async_trait;
use murk_proto::Message;

use crate::client::Connection;

/// A piece of bot behaviour fed every message crossing every connection.
///
/// Modules run sequentially on the bot's event loop; a module that needs
/// to do slow work should hand it to its own task.
#[async_trait]
pub trait Module: Send {
    /// A message arrived on `conn`.
    async fn message_received(&mut self, _conn: &Connection, _msg: &Message) {}

    /// A message was queued for sending on `conn`.
    async fn message_sent(&mut self, _conn: &Connection, _msg: &Message) {}
}
