//! Configuration loading and management.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// IRC networks to stay connected to.
    #[serde(default, rename = "network")]
    pub networks: Vec<NetworkConfig>,
    /// Remote-control RPC socket.
    pub rpc: Option<RpcConfig>,
    /// Prometheus metrics endpoint.
    pub metrics: Option<MetricsConfig>,
}

impl Config {
    /// Loads and validates a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.networks.is_empty() {
            return Err(ConfigError::Invalid("no [[network]] blocks".into()));
        }
        for net in &self.networks {
            if net.name.is_empty() {
                return Err(ConfigError::Invalid("network with empty name".into()));
            }
            if net.servers.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "network {} has no servers",
                    net.name
                )));
            }
            if let Some(sasl) = &net.sasl {
                if murk_proto::sasl::Mechanism::from_name(&sasl.mechanism).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "network {}: unsupported SASL mechanism {}",
                        net.name, sasl.mechanism
                    )));
                }
            }
        }
        Ok(())
    }
}

/// One IRC network: identity, servers, channels, timeouts.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Network name used for lookups, metrics, and the RPC surface.
    pub name: String,
    /// Servers tried in order, rotating on connection loss.
    #[serde(rename = "server")]
    pub servers: Vec<ServerConfig>,
    /// Preferred nickname.
    #[serde(default = "default_nick")]
    pub nick: String,
    /// Username for registration.
    #[serde(default = "default_nick")]
    pub user: String,
    /// Real name for registration.
    #[serde(default = "default_nick")]
    pub realname: String,
    /// Connection password, unless a server overrides it.
    #[serde(default)]
    pub password: Option<String>,
    /// SASL authentication, negotiated over CAP.
    #[serde(default)]
    pub sasl: Option<SaslConfig>,
    /// Channels joined automatically after registration.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Name resolution timeout.
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
    /// Per-address connect timeout.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Delay before trying the next server after a loss.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl NetworkConfig {
    /// Name resolution timeout as a [`Duration`].
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reconnect delay as a [`Duration`].
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// One server endpoint of a network.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host name or address.
    pub host: String,
    /// Port number.
    pub port: u16,
    /// TLS settings; plain TCP when absent.
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    /// Per-server password override.
    #[serde(default)]
    pub password: Option<String>,
}

/// TLS settings for a server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    /// PEM client certificate chain, for EXTERNAL auth or CertFP.
    pub client_cert: Option<PathBuf>,
    /// PEM private key; defaults to the certificate file.
    pub client_key: Option<PathBuf>,
}

/// SASL settings for a network.
#[derive(Debug, Clone, Deserialize)]
pub struct SaslConfig {
    /// Mechanism name: PLAIN or EXTERNAL.
    pub mechanism: String,
    /// Authorization identity; normally left empty.
    #[serde(default)]
    pub authzid: String,
    /// Account name.
    #[serde(default)]
    pub account: String,
    /// Account password (PLAIN).
    #[serde(default)]
    pub password: String,
}

impl SaslConfig {
    /// Parsed mechanism. Validated at load time.
    pub fn mechanism(&self) -> murk_proto::sasl::Mechanism {
        murk_proto::sasl::Mechanism::from_name(&self.mechanism)
            .expect("mechanism validated at config load")
    }

    /// Credentials for the exchange.
    pub fn credentials(&self) -> murk_proto::sasl::Credentials {
        murk_proto::sasl::Credentials {
            authzid: self.authzid.clone(),
            authcid: self.account.clone(),
            password: self.password.clone(),
        }
    }
}

/// Remote-control RPC configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// Unix socket path the RPC server listens on.
    pub socket_path: PathBuf,
    /// Admission limit for concurrent calls.
    #[serde(default = "default_max_calls")]
    pub max_calls: usize,
}

/// Metrics endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Address the plain-text metrics endpoint listens on.
    pub listen: SocketAddr,
}

fn default_nick() -> String {
    "murkbot".to_owned()
}

fn default_resolve_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    60_000
}

fn default_reconnect_delay_ms() -> u64 {
    30_000
}

fn default_max_calls() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"
        [[network]]
        name = "example"
        nick = "mybot"
        channels = ["#one", "#two"]

        [[network.server]]
        host = "irc.example.net"
        port = 6697
        tls = {}

        [[network.server]]
        host = "irc2.example.net"
        port = 6667

        [network.sasl]
        mechanism = "PLAIN"
        account = "mybot"
        password = "secret"

        [rpc]
        socket_path = "/run/murkbot/control.sock"

        [metrics]
        listen = "127.0.0.1:9090"
    "##;

    #[test]
    fn parses_full_sample() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        let net = &config.networks[0];
        assert_eq!(net.name, "example");
        assert_eq!(net.nick, "mybot");
        assert_eq!(net.servers.len(), 2);
        assert!(net.servers[0].tls.is_some());
        assert!(net.servers[1].tls.is_none());
        assert_eq!(net.resolve_timeout(), Duration::from_secs(30));
        assert_eq!(net.connect_timeout(), Duration::from_secs(60));
        assert_eq!(net.reconnect_delay(), Duration::from_secs(30));
        assert_eq!(
            net.sasl.as_ref().unwrap().mechanism(),
            murk_proto::sasl::Mechanism::Plain
        );
        assert_eq!(config.rpc.unwrap().max_calls, 64);
    }

    #[test]
    fn rejects_empty_and_invalid() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.validate().is_err());

        let bad = r#"
            [[network]]
            name = "x"
            [[network.server]]
            host = "h"
            port = 6667
            [network.sasl]
            mechanism = "SCRAM-SHA-256"
        "#;
        let config: Config = toml::from_str(bad).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
