//! Unified error handling for murkbot.
//!
//! Errors are grouped per layer, with automatic conversions where a layer
//! wraps another and static labels for metric dimensions.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the socket layer: resolution, connection, TLS setup.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("{label}: {source}")]
    Io {
        /// Short fixed label naming the failed operation.
        label: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {message}")]
    Path {
        /// Filesystem path the failure is about.
        path: PathBuf,
        /// What went wrong with it.
        message: String,
    },

    #[error("name lookup for {host} failed: {source}")]
    Resolve {
        /// Host whose lookup failed.
        host: String,
        #[source]
        source: hickory_resolver::ResolveError,
    },

    #[error("name lookup for {0} returned no addresses")]
    NoAddresses(String),

    #[error("name lookup for {0} timed out")]
    ResolveTimeout(String),

    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("TLS: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),

    #[error("invalid DNS name: {0}")]
    DnsName(#[from] tokio_rustls::rustls::pki_types::InvalidDnsNameError),

    #[error("{0}")]
    Config(String),
}

impl NetError {
    /// Wraps an I/O error with a short operation label.
    pub fn io(label: &'static str, source: std::io::Error) -> NetError {
        NetError::Io { label, source }
    }

    /// Wraps an I/O-style failure about a specific path.
    pub fn path(path: impl Into<PathBuf>, message: impl Into<String>) -> NetError {
        NetError::Path {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Static label for metric dimensions.
    pub fn error_code(&self) -> &'static str {
        match self {
            NetError::Io { .. } => "io",
            NetError::Path { .. } => "path",
            NetError::Resolve { .. } => "resolve",
            NetError::NoAddresses(_) => "no_addresses",
            NetError::ResolveTimeout(_) => "resolve_timeout",
            NetError::ConnectTimeout(_) => "connect_timeout",
            NetError::Tls(_) => "tls",
            NetError::DnsName(_) => "dns_name",
            NetError::Config(_) => "config",
        }
    }
}

/// Errors terminating an RPC call.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Net(#[from] NetError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame header is not a valid varint")]
    BadFrameHeader,

    #[error("frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge {
        /// Announced frame size.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },

    #[error("protobuf decode failed: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("unknown method code {0:#x}")]
    UnknownMethod(u32),

    #[error("call limit reached ({0} concurrent calls)")]
    CallLimit(usize),

    #[error("unexpected end of stream")]
    UnexpectedEof,
}

impl From<murk_proto::ProtocolError> for RpcError {
    fn from(err: murk_proto::ProtocolError) -> RpcError {
        match err {
            murk_proto::ProtocolError::Io(io) => RpcError::Io(io),
            murk_proto::ProtocolError::BadFrameHeader => RpcError::BadFrameHeader,
            murk_proto::ProtocolError::FrameTooLarge { size, limit } => {
                RpcError::FrameTooLarge { size, limit }
            }
        }
    }
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn net_error_codes_are_stable() {
        let err = NetError::io("connect", std::io::Error::other("nope"));
        assert_eq!(err.error_code(), "io");
        assert_eq!(err.to_string(), "connect: nope");

        let err = NetError::path("/tmp/x.sock", "unix socket name too long");
        assert_eq!(err.error_code(), "path");
    }
}
