//! # murk-proto
//!
//! IRC wire protocol support for the murkbot framework.
//!
//! This crate is runtime-agnostic: it provides the message model, the line
//! and message framing codecs (as [`tokio_util::codec`] implementations),
//! the byte ring buffer used for write staging, the flood-control cost
//! accounting, and SASL payload construction. Networking lives in the
//! `murkbot` crate proper.
//!
//! ## Quick start
//!
//! ```
//! use murk_proto::Message;
//!
//! let msg = Message::parse(b":nick!user@host PRIVMSG #chan :hello there").unwrap();
//! assert_eq!(msg.command, "PRIVMSG");
//! assert_eq!(msg.prefix_nick(), Some("nick"));
//!
//! let out = Message::cmd("JOIN").arg("#chan");
//! assert_eq!(out.to_string(), "JOIN #chan");
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod flood;
pub mod frame;
pub mod irc;
pub mod line;
pub mod message;
pub mod ring;
pub mod sasl;

pub use error::ProtocolError;
pub use flood::{CreditBucket, SendQueue, MAX_CREDIT};
pub use frame::VarintFrameCodec;
pub use irc::IrcCodec;
pub use line::LineCodec;
pub use message::{Message, MAX_MESSAGE_LEN};
pub use ring::RingBuffer;
