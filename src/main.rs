//! murkbot - IRC bot framework daemon.

use murkbot::bot::{Bot, Remote};
use murkbot::config::Config;
use murkbot::metrics;
use murkbot::runtime::Shutdown;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "murkbot.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    metrics::init();

    let shutdown = Shutdown::new();
    shutdown.install_signals()?;

    if let Some(metrics_config) = &config.metrics {
        let listen = metrics_config.listen;
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(listen).await {
                warn!(error = %e, "metrics endpoint failed");
            }
        });
    }

    info!(networks = config.networks.len(), "Starting murkbot");
    let mut bot = Bot::new(&config, shutdown.clone());

    if let Some(rpc_config) = &config.rpc {
        let remote = Remote::start(bot.host(), rpc_config, shutdown.clone())?;
        info!(socket = %rpc_config.socket_path.display(), "Remote control enabled");
        bot.add_module(Box::new(remote));
    }

    bot.run().await;
    Ok(())
}
