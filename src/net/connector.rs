//! Outgoing connection establishment.
//!
//! A [`Connector`] accumulates a target plus options and drives the whole
//! resolve / connect / TLS sequence as one cancellable future. Resolution
//! and each address attempt run under their own timeouts; addresses are
//! tried strictly in resolver order, and the first success wins.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use lazy_static::lazy_static;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::rustls::pki_types::ServerName;
use tracing::{debug, warn};

use super::{tls, Stream};
use crate::error::NetError;

/// Linux `sockaddr_un.sun_path` capacity, NUL included.
pub(crate) const UNIX_PATH_MAX: usize = 108;

const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

lazy_static! {
    static ref RESOLVER: TokioResolver = TokioResolver::builder_tokio()
        .map(|b| b.build())
        .unwrap_or_else(|_| {
            TokioResolver::builder_with_config(
                ResolverConfig::default(),
                TokioConnectionProvider::default(),
            )
            .build()
        });
}

/// Builder for outgoing sockets.
#[derive(Clone, Debug, Default)]
pub struct Connector {
    host: Option<String>,
    port: u16,
    unix_path: Option<PathBuf>,
    tls: bool,
    client_cert: Option<PathBuf>,
    client_key: Option<PathBuf>,
    resolve_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
}

impl Connector {
    /// Starts an empty builder.
    pub fn new() -> Connector {
        Connector::default()
    }

    /// Targets an internet host and port.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>, port: u16) -> Connector {
        self.host = Some(host.into());
        self.port = port;
        self
    }

    /// Targets a unix domain socket path.
    #[must_use]
    pub fn unix(mut self, path: impl Into<PathBuf>) -> Connector {
        self.unix_path = Some(path.into());
        self
    }

    /// Enables TLS (internet targets only).
    #[must_use]
    pub fn tls(mut self, tls: bool) -> Connector {
        self.tls = tls;
        self
    }

    /// Sets a PEM client certificate chain for TLS.
    #[must_use]
    pub fn client_cert(mut self, path: impl Into<PathBuf>) -> Connector {
        self.client_cert = Some(path.into());
        self
    }

    /// Sets the PEM private key for the client certificate. Defaults to the
    /// certificate file.
    #[must_use]
    pub fn client_key(mut self, path: impl Into<PathBuf>) -> Connector {
        self.client_key = Some(path.into());
        self
    }

    /// Overrides the name resolution timeout.
    #[must_use]
    pub fn resolve_timeout(mut self, timeout: Duration) -> Connector {
        self.resolve_timeout = Some(timeout);
        self
    }

    /// Overrides the per-address connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Connector {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Establishes the connection.
    ///
    /// Exactly one outcome is produced per call. Dropping the returned
    /// future abandons any in-flight resolution or connection attempt
    /// without side effects.
    pub async fn connect(&self) -> Result<Stream, NetError> {
        match (&self.host, &self.unix_path) {
            (Some(_), Some(_)) | (None, None) => Err(NetError::Config(
                "either host/port or a unix path must be set, not both".into(),
            )),
            (None, Some(path)) => {
                if self.tls {
                    return Err(NetError::Config("TLS is not supported on unix sockets".into()));
                }
                self.connect_unix(path).await
            }
            (Some(host), None) => self.connect_inet(host).await,
        }
    }

    async fn connect_unix(&self, path: &Path) -> Result<Stream, NetError> {
        if path.as_os_str().len() + 1 > UNIX_PATH_MAX {
            return Err(NetError::path(path, "unix socket name too long"));
        }
        let timeout = self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
            .await
            .map_err(|_| NetError::ConnectTimeout(path.display().to_string()))?
            .map_err(|e| NetError::io("connect", e))?;
        Ok(Stream::Unix(stream))
    }

    async fn connect_inet(&self, host: &str) -> Result<Stream, NetError> {
        let addrs = self.resolve(host).await?;
        let tcp = self.connect_sequence(host, &addrs).await?;

        if let Err(e) = enable_keepalive(&tcp) {
            warn!(error = %e, "failed to enable TCP keepalive");
        }

        if !self.tls {
            return Ok(Stream::Tcp(tcp));
        }

        let connector = tls::connector(self.client_cert.as_deref(), self.client_key.as_deref())?;
        let server_name = ServerName::try_from(host.to_owned())?;
        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| NetError::io("TLS handshake", e))?;
        Ok(Stream::Tls(Box::new(stream)))
    }

    async fn resolve(&self, host: &str) -> Result<Vec<SocketAddr>, NetError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, self.port)]);
        }

        debug!(host, port = self.port, "resolving host");
        let timeout = self.resolve_timeout.unwrap_or(DEFAULT_RESOLVE_TIMEOUT);
        let lookup = tokio::time::timeout(timeout, RESOLVER.lookup_ip(host))
            .await
            .map_err(|_| NetError::ResolveTimeout(host.to_owned()))?
            .map_err(|e| NetError::Resolve {
                host: host.to_owned(),
                source: e,
            })?;

        let addrs: Vec<SocketAddr> = lookup
            .iter()
            .map(|ip| SocketAddr::new(ip, self.port))
            .collect();
        if addrs.is_empty() {
            return Err(NetError::NoAddresses(host.to_owned()));
        }
        Ok(addrs)
    }

    /// Tries each address in order; the first success wins and later
    /// addresses are left untouched. Exhaustion yields the last error.
    async fn connect_sequence(
        &self,
        host: &str,
        addrs: &[SocketAddr],
    ) -> Result<TcpStream, NetError> {
        let timeout = self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let mut last_err = NetError::NoAddresses(host.to_owned());

        for (i, addr) in addrs.iter().enumerate() {
            debug!(%addr, "connecting");
            match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) => last_err = NetError::io("connect", e),
                Err(_) => last_err = NetError::ConnectTimeout(addr.to_string()),
            }
            if i + 1 < addrs.len() {
                warn!(%addr, error = %last_err, "connect failed - trying next address");
            }
        }
        Err(last_err)
    }
}

fn enable_keepalive(stream: &TcpStream) -> std::io::Result<()> {
    let sock = SockRef::from(stream);
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(120))
        .with_interval(Duration::from_secs(30));
    sock.set_tcp_keepalive(&keepalive)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn requires_exactly_one_target() {
        let err = Connector::new().connect().await.unwrap_err();
        assert!(matches!(err, NetError::Config(_)));

        let err = Connector::new()
            .host("localhost", 1)
            .unix("/tmp/x.sock")
            .connect()
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::Config(_)));

        let err = Connector::new()
            .unix("/tmp/x.sock")
            .tls(true)
            .connect()
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::Config(_)));
    }

    #[tokio::test]
    async fn rejects_overlong_unix_path() {
        let long = format!("/tmp/{}.sock", "x".repeat(UNIX_PATH_MAX));
        let err = Connector::new().unix(&long).connect().await.unwrap_err();
        assert!(matches!(err, NetError::Path { .. }));
    }

    #[tokio::test]
    async fn tries_addresses_in_order() {
        // a bound-then-dropped listener gives a port that refuses connections
        let dead = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let live_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live = live_listener.local_addr().unwrap();

        let connector = Connector::new().host("127.0.0.1", live.port());
        let stream = connector
            .connect_sequence("test", &[dead, live])
            .await
            .unwrap();
        assert_eq!(stream.peer_addr().unwrap(), live);

        // accepting proves the live listener got exactly one connection
        let (_, peer) = live_listener.accept().await.unwrap();
        assert_eq!(peer, stream.local_addr().unwrap());
    }

    #[tokio::test]
    async fn exhaustion_reports_last_error() {
        let dead = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let connector = Connector::new().host("127.0.0.1", dead.port());
        let err = connector
            .connect_sequence("test", &[dead, dead])
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::Io { .. }));
    }

    #[tokio::test]
    async fn literal_ip_skips_resolution() {
        let connector = Connector::new().host("127.0.0.1", 6667);
        let addrs = connector.resolve("127.0.0.1").await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:6667".parse().unwrap()]);
    }

    #[tokio::test]
    async fn dropped_connect_future_delivers_nothing() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connector = Connector::new().host("127.0.0.1", addr.port());
        let attempt = tokio::spawn(async move { connector.connect().await });
        attempt.abort();
        // abandoning the attempt must not hang, panic, or deliver a late
        // result anywhere; the only observables are the join outcome itself
        match attempt.await {
            Err(e) => assert!(e.is_cancelled()),
            Ok(result) => drop(result),
        }
    }
}
