use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use mint_relay::config::Config;
use mint_relay::engine::{Engine, EngineContext};
use mint_relay::gateway::HttpGateway;
use mint_relay::persistence::{DocumentStorage, FileStorage};
use mint_relay::server::{AppState, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env().context("loading configuration")?;
    info!(state_dir = %config.state_dir.display(), listen = %config.listen, "Starting mint relay");

    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("creating state directory {}", config.state_dir.display()))?;
    let storage: Arc<dyn DocumentStorage> =
        Arc::new(FileStorage::new(&config.state_dir).with_lock_attempts(config.lock_attempts));
    let ctx = EngineContext::open(storage, config.processed_cap).context("opening state")?;

    let gateway = HttpGateway::new(
        &config.protocol_url,
        &config.services_url,
        config.gateway_token.clone(),
        config.retry,
    )
    .context("building gateway client")?;

    let engine = Arc::new(Engine::new(
        Arc::new(ctx),
        gateway.clone(),
        gateway,
        config.engine.clone(),
    ));

    let report = engine.recover().await;
    if !report.failed.is_empty() {
        warn!(failed = report.failed.len(), "Some jobs could not be resumed; they stay in the work log");
    }

    let app = build_router(AppState::new(
        engine,
        config.notification_secret.map(String::into_bytes),
    ));

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!(addr = %config.listen, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("serving HTTP")?;

    info!("Shut down");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mint_relay=debug,tower_http=info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Cancels `shutdown` on Ctrl+C or SIGTERM.
async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
    shutdown.cancel();
}
