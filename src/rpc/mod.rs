//! Protobuf RPC over stream sockets.
//!
//! The wire format is minimal: a call opens with a 4-byte little-endian
//! method code, then carries varint length-delimited protobuf messages in
//! both directions until the socket closes. Calls are independent; a
//! server accepts any number of them (up to its admission limit) and a
//! client opens one per [`RpcClient::call`].
//!
//! The per-call surface is the [`Endpoint`] trait, or [`Handler`] plus the
//! [`Typed`] adapter when the incoming message type is fixed: the adapter
//! owns the scratch message, clears it, and merges each frame into it
//! before the handler sees it.

mod call;
mod client;
mod server;

pub use call::CallHandle;
pub use client::RpcClient;
pub use server::RpcServer;

use async_trait::async_trait;
use bytes::Bytes;
use prost::Message as ProstMessage;

use crate::error::RpcError;

/// Serialises a protobuf message into one frame payload.
pub fn encode<M: ProstMessage>(msg: &M) -> Bytes {
    Bytes::from(msg.encode_to_vec())
}

/// Per-call handler over raw frame payloads.
///
/// Most code wants [`Handler`] with [`Typed`] instead; this is the erased
/// form the transport drives.
#[async_trait]
pub trait Endpoint: Send {
    /// The call is ready: the socket is open and the method dispatched.
    async fn open(&mut self, call: &CallHandle);

    /// One complete frame arrived. An error return closes the call.
    async fn frame(&mut self, call: &CallHandle, payload: Bytes) -> Result<(), RpcError>;

    /// The call is finished. Runs exactly once, after the socket has been
    /// released; `error` is `None` on a clean close.
    async fn closed(&mut self, error: Option<&RpcError>);
}

/// Typed per-call handler.
#[async_trait]
pub trait Handler<M: ProstMessage + Default>: Send {
    /// The call is ready.
    async fn open(&mut self, _call: &CallHandle) {}

    /// One decoded message. The reference points at the call's scratch
    /// message and is only valid for this invocation.
    async fn message(&mut self, call: &CallHandle, msg: &M);

    /// The call is finished.
    async fn closed(&mut self, _error: Option<&RpcError>) {}
}

/// Adapts a [`Handler`] to the erased [`Endpoint`] by owning the scratch
/// message frames are decoded into.
pub struct Typed<M, H> {
    scratch: M,
    handler: H,
}

impl<M: ProstMessage + Default, H: Handler<M>> Typed<M, H> {
    /// Boxes a handler as an endpoint.
    pub fn endpoint(handler: H) -> Box<Typed<M, H>> {
        Box::new(Typed {
            scratch: M::default(),
            handler,
        })
    }
}

#[async_trait]
impl<M, H> Endpoint for Typed<M, H>
where
    M: ProstMessage + Default,
    H: Handler<M>,
{
    async fn open(&mut self, call: &CallHandle) {
        self.handler.open(call).await;
    }

    async fn frame(&mut self, call: &CallHandle, payload: Bytes) -> Result<(), RpcError> {
        self.scratch.clear();
        self.scratch.merge(payload)?;
        self.handler.message(call, &self.scratch).await;
        Ok(())
    }

    async fn closed(&mut self, error: Option<&RpcError>) {
        self.handler.closed(error).await;
    }
}

/// Server-side factory mapping method codes to endpoints.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Returns the endpoint for a freshly dispatched call, or an error to
    /// reject it.
    async fn dispatch(&self, method: u32) -> Result<Box<dyn Endpoint>, RpcError>;

    /// Reports an error that happened outside any endpoint: a failed
    /// accept, an unknown method, a rejected call.
    fn error(&self, error: RpcError);
}
