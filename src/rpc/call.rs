//! The shared call pump: one task per call, both sides of the wire.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use murk_proto::VarintFrameCodec;
use prost::Message as ProstMessage;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::debug;

use super::Endpoint;
use crate::error::RpcError;
use crate::net::Stream;

pub(super) enum CallCmd {
    Frame(Bytes),
    Close {
        error: Option<RpcError>,
        flush: bool,
    },
}

/// Handle for sending on (and closing) an active call.
///
/// Cheap to clone; an endpoint typically keeps one for streaming replies.
/// Sends are accepted while the call is connecting or ready and ignored
/// once it is closing.
#[derive(Clone)]
pub struct CallHandle {
    tx: mpsc::UnboundedSender<CallCmd>,
}

impl CallHandle {
    pub(super) fn channel() -> (CallHandle, mpsc::UnboundedReceiver<CallCmd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CallHandle { tx }, rx)
    }

    /// Queues one protobuf message for the peer.
    pub fn send<M: ProstMessage>(&self, msg: &M) {
        let _ = self.tx.send(CallCmd::Frame(super::encode(msg)));
    }

    /// Closes the call. With an error (or `flush` false) queued output is
    /// dropped; otherwise the write buffer drains first.
    pub fn close(&self, error: Option<RpcError>, flush: bool) {
        let _ = self.tx.send(CallCmd::Close { error, flush });
    }
}

/// Runs one call to completion and returns its terminal error, if any.
///
/// The endpoint's `open` runs first, `closed` runs exactly once at the
/// end, after the socket has been dropped. The caller (server call set or
/// client) reaps the call when this future finishes; nothing is destroyed
/// from inside a callback.
pub(super) async fn run(
    stream: Stream,
    mut endpoint: Box<dyn Endpoint>,
    handle: CallHandle,
    mut rx: mpsc::UnboundedReceiver<CallCmd>,
) -> Option<RpcError> {
    let mut framed = Framed::new(stream, VarintFrameCodec::new());
    endpoint.open(&handle).await;

    let mut close_error: Option<RpcError> = None;
    let mut flush_before_close = false;

    loop {
        tokio::select! {
            frame = framed.next() => {
                match frame {
                    Some(Ok(payload)) => {
                        if let Err(e) = endpoint.frame(&handle, payload).await {
                            close_error = Some(e);
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        close_error = Some(e.into());
                        break;
                    }
                    None => break, // peer closed cleanly
                }
            }

            cmd = rx.recv() => {
                match cmd {
                    Some(CallCmd::Frame(payload)) => {
                        if let Err(e) = framed.send(payload).await {
                            close_error = Some(e.into());
                            break;
                        }
                    }
                    Some(CallCmd::Close { error, flush }) => {
                        flush_before_close = error.is_none() && flush;
                        close_error = error;
                        break;
                    }
                    None => {
                        // every handle dropped; nothing more can be sent
                        break;
                    }
                }
            }
        }
    }

    if flush_before_close {
        // stop reading, let the remaining output drain
        while let Ok(CallCmd::Frame(payload)) = rx.try_recv() {
            if framed.send(payload).await.is_err() {
                break;
            }
        }
        let _ = framed.flush().await;
    }

    drop(framed);
    if let Some(err) = &close_error {
        debug!(error = %err, "call closed");
    }
    endpoint.closed(close_error.as_ref()).await;
    close_error
}
