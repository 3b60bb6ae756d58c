mod config;
mod error;
mod platform;
mod relay;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::platform::matrix::MatrixSink;
use crate::platform::max::{MaxClient, MaxStreamConnector};
use crate::platform::telegram::TelegramSink;
use crate::platform::Sink;
use crate::relay::poll::{PollSchedule, Poller};
use crate::relay::retry::policy_from_config;
use crate::relay::{Dispatcher, RelayObserver, SeenIds, Supervisor, TracingObserver};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,maxbridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    for name in config.placeholder_credentials() {
        warn!("{} is not set, using a placeholder value", name);
    }
    if config.max.needs_auth() {
        warn!("No Max credentials found. Run the `setup` binary to capture them.");
    }

    info!("Configuration loaded successfully");
    info!("  Matrix room: {}", config.matrix.room_id);
    info!("  Telegram chat: {}", config.telegram.chat_id);
    info!(
        "  Poll: {} (every {}s)",
        config.relay.poll_enabled, config.relay.poll_interval_secs
    );
    info!("  Stream: {}", config.relay.stream_enabled);

    let timeout = config.relay.request_timeout();

    // Sinks
    let matrix = MatrixSink::new(&config.matrix, timeout)?;
    let telegram = TelegramSink::new(&config.telegram, timeout)?;
    let sinks: Vec<Arc<dyn Sink>> = vec![Arc::new(matrix), Arc::new(telegram)];

    let observer: Arc<dyn RelayObserver> = Arc::new(TracingObserver);
    let mut dispatcher = Dispatcher::new(sinks, observer);
    if config.relay.cross_path_dedup {
        info!(
            "Cross-path dedup enabled (last {} ids)",
            config.relay.dedup_capacity
        );
        dispatcher = dispatcher.with_dedup(Arc::new(SeenIds::new(config.relay.dedup_capacity)));
    }
    let dispatcher = Arc::new(dispatcher);

    let mut supervisor = Supervisor::new(dispatcher);
    if config.relay.poll_enabled {
        let client = MaxClient::new(&config.max, timeout)?;
        let poller = Poller::new(Arc::new(client), config.relay.poll_limit);
        let schedule = PollSchedule {
            interval: config.relay.poll_interval(),
            error_backoff: config.relay.error_backoff(),
        };
        supervisor = supervisor.with_poll(poller, schedule);
    }
    if config.relay.stream_enabled {
        let connector = MaxStreamConnector::new(&config.max, timeout);
        supervisor = supervisor.with_stream(Arc::new(connector), policy_from_config(&config.relay));
    }

    info!("Relay is starting...");
    supervisor.run().await;

    Ok(())
}
