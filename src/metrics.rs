//! Prometheus metrics for murkbot.
//!
//! Connection-level throughput and queue gauges per network, plus RPC call
//! accounting. Exposed as a plain-text dump over a trivial TCP endpoint
//! (see [`serve`]).

use lazy_static::lazy_static;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use tracing::{error, info, warn};

lazy_static! {
    /// Global registry for all murkbot metrics.
    pub static ref REGISTRY: Registry = Registry::new();

    /// Is the bot currently connected to an IRC server?
    pub static ref CONNECTION_UP: IntGaugeVec = IntGaugeVec::new(
        Opts::new("irc_connection_up", "Is the bot currently connected to an IRC server?"),
        &["network"]
    ).expect("CONNECTION_UP metric creation failed");

    /// Bytes sent to IRC servers.
    pub static ref SENT_BYTES: IntCounterVec = IntCounterVec::new(
        Opts::new("irc_sent_bytes", "How many bytes have been sent to the IRC server?"),
        &["network"]
    ).expect("SENT_BYTES metric creation failed");

    /// Lines (commands) sent to IRC servers.
    pub static ref SENT_LINES: IntCounterVec = IntCounterVec::new(
        Opts::new("irc_sent_lines", "How many lines (commands) have been sent to the IRC server?"),
        &["network"]
    ).expect("SENT_LINES metric creation failed");

    /// Bytes received from IRC servers.
    pub static ref RECEIVED_BYTES: IntCounterVec = IntCounterVec::new(
        Opts::new("irc_received_bytes", "How many bytes have been received from the IRC server?"),
        &["network"]
    ).expect("RECEIVED_BYTES metric creation failed");

    /// Lines (commands) received from IRC servers.
    pub static ref RECEIVED_LINES: IntCounterVec = IntCounterVec::new(
        Opts::new("irc_received_lines", "How many lines (commands) have been received from the IRC server?"),
        &["network"]
    ).expect("RECEIVED_LINES metric creation failed");

    /// Bytes pending in the flood-controlled write queue.
    pub static ref WRITE_QUEUE_BYTES: IntGaugeVec = IntGaugeVec::new(
        Opts::new("irc_write_queue_bytes", "How many bytes are pending in the write queue?"),
        &["network"]
    ).expect("WRITE_QUEUE_BYTES metric creation failed");

    /// Currently open RPC calls.
    pub static ref RPC_CALLS_OPEN: IntGauge = IntGauge::new(
        "rpc_calls_open",
        "Currently open RPC calls"
    ).expect("RPC_CALLS_OPEN metric creation failed");

    /// RPC calls rejected by the admission limit.
    pub static ref RPC_CALLS_REJECTED: IntCounter = IntCounter::new(
        "rpc_calls_rejected_total",
        "RPC calls rejected by the admission limit"
    ).expect("RPC_CALLS_REJECTED metric creation failed");
}

/// Registers every metric with the global registry. Call once at startup.
pub fn init() {
    macro_rules! register {
        ($metric:expr, $name:literal) => {
            if let Err(e) = REGISTRY.register(Box::new($metric.clone())) {
                warn!(error = %e, metric = $name, "Failed to register metric");
            }
        };
    }

    register!(CONNECTION_UP, "irc_connection_up");
    register!(SENT_BYTES, "irc_sent_bytes");
    register!(SENT_LINES, "irc_sent_lines");
    register!(RECEIVED_BYTES, "irc_received_bytes");
    register!(RECEIVED_LINES, "irc_received_lines");
    register!(WRITE_QUEUE_BYTES, "irc_write_queue_bytes");
    register!(RPC_CALLS_OPEN, "rpc_calls_open");
    register!(RPC_CALLS_REJECTED, "rpc_calls_rejected_total");
}

/// Gathers all metrics in the Prometheus text format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Serves the metrics dump over plain TCP. Each connection gets a minimal
/// HTTP response and is closed; enough for a Prometheus scrape target
/// without pulling in an HTTP stack.
pub async fn serve(listen: std::net::SocketAddr) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(%listen, "Metrics endpoint listening");

    loop {
        let (mut stream, _) = listener.accept().await?;
        tokio::spawn(async move {
            let body = gather();
            let response = format!(
                "HTTP/1.0 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            if let Err(e) = stream.write_all(response.as_bytes()).await {
                warn!(error = %e, "Failed to write metrics response");
            }
        });
    }
}
