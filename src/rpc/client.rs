//! RPC client: opens calls against a configured target.

use bytes::{Bytes, BytesMut};
use murk_proto::ring;
use tokio::io::AsyncWriteExt;

use super::{call, CallHandle, Endpoint};
use crate::error::RpcError;
use crate::net::Connector;

/// Opens independent calls against one target.
///
/// Each call owns its socket. The method code (and any message sent before
/// the socket opens) is queued and flushed as soon as the connection is
/// up.
#[derive(Clone)]
pub struct RpcClient {
    target: Connector,
}

impl RpcClient {
    /// Creates a client for the given connection target.
    pub fn new(target: Connector) -> RpcClient {
        RpcClient { target }
    }

    /// Starts a call: connects, sends the 4-byte method code and the
    /// optional first message, then hands the stream to `endpoint`.
    ///
    /// The returned handle accepts sends immediately; they are delivered
    /// once the connection opens. A connect failure surfaces through the
    /// endpoint's `closed`.
    pub fn call(
        &self,
        method: u32,
        mut endpoint: Box<dyn Endpoint>,
        first: Option<Bytes>,
    ) -> CallHandle {
        let (handle, rx) = CallHandle::channel();
        let pump_handle = handle.clone();
        let target = self.target.clone();

        tokio::spawn(async move {
            let mut stream = match target.connect().await {
                Ok(stream) => stream,
                Err(e) => {
                    endpoint.closed(Some(&RpcError::Net(e))).await;
                    return;
                }
            };

            let mut opening = BytesMut::with_capacity(4);
            let mut code = [0u8; 4];
            ring::write_u32(method, &mut code);
            opening.extend_from_slice(&code);
            if let Some(first) = first {
                murk_proto::VarintFrameCodec::put_varint(&mut opening, first.len() as u64);
                opening.extend_from_slice(&first);
            }
            if let Err(e) = stream.write_all(&opening).await {
                endpoint.closed(Some(&RpcError::Io(e))).await;
                return;
            }

            call::run(stream, endpoint, pump_handle, rx).await;
        });

        handle
    }
}
