//! Listening sockets.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tokio::net::{TcpListener, UnixListener};
use tracing::debug;

use super::Stream;
use crate::error::NetError;

/// A listening socket handing out connected [`Stream`]s.
pub enum Listener {
    /// TCP listener.
    Tcp(TcpListener),
    /// Unix domain listener; the path is removed again on drop.
    Unix(UnixListener, PathBuf),
}

impl Listener {
    /// Binds a TCP listener.
    pub async fn bind_tcp(addr: SocketAddr) -> Result<Listener, NetError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| NetError::io("bind", e))?;
        Ok(Listener::Tcp(listener))
    }

    /// Binds a unix domain listener, replacing any stale socket file.
    pub fn bind_unix(path: impl AsRef<Path>) -> Result<Listener, NetError> {
        let path = path.as_ref();
        if path.as_os_str().len() + 1 > super::connector::UNIX_PATH_MAX {
            return Err(NetError::path(path, "unix socket name too long"));
        }

        // a socket left behind by a previous run would fail the bind
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(NetError::path(path, format!("can't remove stale socket: {e}"))),
        }

        let listener = UnixListener::bind(path).map_err(|e| NetError::io("bind", e))?;
        Ok(Listener::Unix(listener, path.to_owned()))
    }

    /// Accepts the next connection.
    ///
    /// Transient accept failures (the connection vanishing between the
    /// readiness report and the accept) are retried silently; other errors
    /// surface to the caller.
    pub async fn accept(&self) -> Result<Stream, NetError> {
        loop {
            let result = match self {
                Listener::Tcp(listener) => listener.accept().await.map(|(s, _)| Stream::Tcp(s)),
                Listener::Unix(listener, _) => {
                    listener.accept().await.map(|(s, _)| Stream::Unix(s))
                }
            };
            match result {
                Ok(stream) => return Ok(stream),
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::ConnectionAborted
                            | std::io::ErrorKind::ConnectionReset
                            | std::io::ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(NetError::io("accept", e)),
            }
        }
    }

    /// The bound TCP address, when applicable.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            Listener::Unix(..) => None,
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix(_, path) = self {
            let _ = std::fs::remove_file(path);
        }
    }
}
