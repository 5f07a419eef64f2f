//! RPC server: listener, dispatch, call set.

use std::sync::Arc;

use murk_proto::ring;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{call, CallHandle, Dispatcher};
use crate::error::RpcError;
use crate::metrics;
use crate::net::{Listener, Stream};
use crate::runtime::Shutdown;

/// Accepts calls on a listening socket and dispatches them by method code.
///
/// Concurrent calls are bounded by the admission limit; excess accepts are
/// closed immediately and reported to the dispatcher.
pub struct RpcServer {
    handle: tokio::task::JoinHandle<()>,
}

impl RpcServer {
    /// Starts serving on `listener`. Runs until `shutdown` trips.
    pub fn start(
        listener: Listener,
        dispatcher: Arc<dyn Dispatcher>,
        max_calls: usize,
        shutdown: Shutdown,
    ) -> RpcServer {
        let handle = tokio::spawn(accept_loop(listener, dispatcher, max_calls, shutdown));
        RpcServer { handle }
    }

    /// Waits for the accept loop to finish.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

async fn accept_loop(
    listener: Listener,
    dispatcher: Arc<dyn Dispatcher>,
    max_calls: usize,
    shutdown: Shutdown,
) {
    let limit = Arc::new(Semaphore::new(max_calls));
    info!(max_calls, "RPC server listening");

    loop {
        let stream = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(stream) => stream,
                Err(e) => {
                    dispatcher.error(e.into());
                    continue;
                }
            },
            _ = shutdown.wait() => {
                debug!("RPC server shutting down");
                return;
            }
        };

        let Ok(permit) = Arc::clone(&limit).try_acquire_owned() else {
            metrics::RPC_CALLS_REJECTED.inc();
            dispatcher.error(RpcError::CallLimit(max_calls));
            drop(stream);
            continue;
        };

        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            metrics::RPC_CALLS_OPEN.inc();
            serve_call(stream, dispatcher).await;
            metrics::RPC_CALLS_OPEN.dec();
            drop(permit);
        });
    }
}

/// Reads the method code, dispatches, and pumps the call.
async fn serve_call(mut stream: Stream, dispatcher: Arc<dyn Dispatcher>) {
    let mut header = [0u8; 4];
    if let Err(e) = stream.read_exact(&mut header).await {
        dispatcher.error(if e.kind() == std::io::ErrorKind::UnexpectedEof {
            RpcError::UnexpectedEof
        } else {
            RpcError::Io(e)
        });
        return;
    }
    let method = ring::read_u32(&header);

    let endpoint = match dispatcher.dispatch(method).await {
        Ok(endpoint) => endpoint,
        Err(e) => {
            warn!(method, error = %e, "rejecting call");
            dispatcher.error(e);
            return;
        }
    };

    let (handle, rx) = CallHandle::channel();
    if let Some(err) = call::run(stream, endpoint, handle, rx).await {
        dispatcher.error(err);
    }
}
