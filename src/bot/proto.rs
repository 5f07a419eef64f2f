//! Protobuf messages for the remote-control service.
//!
//! Maintained by hand as prost derives; the wire format is plain proto3.

/// Method codes for the remote-control service.
pub mod method {
    /// Bidirectional watch stream: the client sends [`super::WatchRequest`]
    /// filters, the server streams [`super::IrcEvent`]s.
    pub const WATCH: u32 = 1;
    /// One-shot message injection: [`super::SendToRequest`] in,
    /// [`super::SendToResponse`] out.
    pub const SEND_TO: u32 = 2;
}

/// One IRC message crossing a connection, as seen by a watcher.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IrcEvent {
    /// Message prefix, may be empty.
    #[prost(string, tag = "1")]
    pub prefix: ::prost::alloc::string::String,
    /// IRC command or numeric.
    #[prost(string, tag = "2")]
    pub command: ::prost::alloc::string::String,
    /// Command arguments in order.
    #[prost(string, repeated, tag = "3")]
    pub args: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    /// Which way the message crossed the wire.
    #[prost(enumeration = "Direction", tag = "4")]
    pub direction: i32,
    /// Network the message belongs to (set on watch events).
    #[prost(string, tag = "5")]
    pub net: ::prost::alloc::string::String,
}

/// Direction of an [`IrcEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Direction {
    /// Received from the server.
    Received = 0,
    /// Sent to the server.
    Sent = 1,
}

/// Watch filter; may be sent again mid-call to replace the filter.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WatchRequest {
    /// Networks to watch. Empty means all.
    #[prost(string, repeated, tag = "1")]
    pub nets: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

/// Injects one message into a network.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SendToRequest {
    /// Target network name.
    #[prost(string, tag = "1")]
    pub net: ::prost::alloc::string::String,
    /// The message to send.
    #[prost(message, optional, tag = "2")]
    pub event: ::core::option::Option<IrcEvent>,
}

/// Outcome of a [`SendToRequest`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SendToResponse {
    /// Whether the network existed and the message was queued.
    #[prost(bool, tag = "1")]
    pub ok: bool,
}
