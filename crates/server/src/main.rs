mod assistant;
mod bootstrap;
mod health;

use anyhow::Result;
use atlas_core::config::{AppConfig, LoadOptions};
use axum::Router;
use tokio_util::sync::CancellationToken;

fn init_logging(config: &AppConfig) {
    use atlas_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let shutdown = CancellationToken::new();
    let router = Router::new()
        .merge(assistant::router(assistant::AssistantState {
            orchestrator: app.orchestrator.clone(),
            shutdown: shutdown.clone(),
        }))
        .merge(health::router(app.pool.clone()));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        bind_address = %address,
        "atlas-server started"
    );

    let signal_token = shutdown.clone();
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        signal_token.cancel();
    });

    let grace =
        tokio::time::Duration::from_secs(app.config.server.graceful_shutdown_secs);
    tokio::select! {
        result = server => result?,
        () = async {
            shutdown.cancelled().await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!(
                event_name = "system.server.shutdown_timeout",
                grace_secs = app.config.server.graceful_shutdown_secs,
                "graceful shutdown window elapsed with work still in flight"
            );
        }
    }

    tracing::info!(event_name = "system.server.stopping", "atlas-server stopping");
    Ok(())
}
