use anyhow::{Context, Result};
use std::sync::Arc;
use tally_ranking::api::{start_api_server, AppState};
use tally_ranking::config::{Config, ServiceConfig};
use tally_ranking::store::load_or_empty;
use tally_ranking::{Authorizer, Bot, ChatPlatform, JsonFileStore, TelegramClient, Tracker};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service);

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting Tally ranking service"
    );

    config.validate().context("Invalid configuration")?;

    // Initialize metrics
    if config.service.metrics_port != 0 {
        init_metrics(config.service.metrics_port)?;
    }

    // Initialize components
    let store = Arc::new(JsonFileStore::new(&config.storage.participation_file));
    let history = load_or_empty(store.as_ref()).context("Failed to read participation record")?;
    info!(
        path = %store.path().display(),
        users = history.len(),
        submissions = history.total(),
        "Participation history loaded"
    );

    let tracker = Arc::new(Tracker::new(store));

    let platform: Arc<dyn ChatPlatform> = Arc::new(
        TelegramClient::new(&config.telegram).context("Failed to initialize Telegram client")?,
    );
    let authorizer = Arc::new(Authorizer::new(&config.auth, platform.clone()));
    info!(
        operator = %authorizer.operator(),
        policy = ?authorizer.policy(),
        "Command authorization configured"
    );

    let bot = Bot::new(platform, tracker.clone(), authorizer, &config.ranking)
        .with_username(config.telegram.bot_username.clone());

    let cancel = CancellationToken::new();

    // Spawn bot polling task
    let poll_timeout = config.poll_timeout();
    let retry_backoff = config.retry_backoff();
    let bot_cancel = cancel.clone();
    let bot_handle = tokio::spawn(async move {
        bot.run(poll_timeout, retry_backoff, bot_cancel).await;
    });

    // Spawn API server task
    let api_handle = if config.api.enabled {
        let api_state = AppState {
            tracker: tracker.clone(),
        };
        let api_config = config.api.clone();
        let api_cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = start_api_server(api_state, &api_config, api_cancel).await {
                error!(error = %e, "API server error");
            }
        }))
    } else {
        None
    };

    info!("Ranking service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down ranking service");

    cancel.cancel();
    if let Err(e) = bot_handle.await {
        error!(error = %e, "Bot task failed");
    }
    if let Some(handle) = api_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "API task failed");
        }
    }

    let pending = tracker.transient_snapshot();
    if !pending.is_empty() {
        info!(
            users = pending.len(),
            submissions = pending.total(),
            "Unmerged participation of the current round is discarded"
        );
    }

    info!("Ranking service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(config: &ServiceConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.log_format == "pretty" {
        registry.with(fmt::layer().pretty()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
