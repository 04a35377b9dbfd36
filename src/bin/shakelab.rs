//! ShakeLab runner
//!
//! Listens for simulator telemetry, drives the bass shakers and serves the
//! HTTP control API.
//!
//! Usage: `shakelab [settings.json]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shakelab::{
    app::App,
    config::{AppConfig, LoadSelection},
    schema,
    ui::{AppState, WebServer},
};

/// Interval between status lines
const STATS_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ShakeLab");

    let config = AppConfig::load();
    let settings_path = std::env::args().nth(1).map(PathBuf::from);
    let mut app = App::new(config.clone()).context("failed to start pulse timer")?;

    if let Err(e) = app.start_audio() {
        tracing::error!("Audio output unavailable: {}", e);
    }

    if let Some(path) = &settings_path {
        match app.load_settings(path, LoadSelection::default()) {
            Ok(report) => tracing::info!(
                effects = report.effects_loaded,
                skipped = report.skipped.len(),
                warnings = report.warnings.len(),
                "Applied settings from {}",
                path.display()
            ),
            Err(e) => tracing::error!("Could not load {}: {}", path.display(), e),
        }
    }

    if app.source_name().is_none() {
        let default_source = schema::available_sources()
            .first()
            .context("no telemetry sources compiled in")?;
        app.select_source(default_source)
            .with_context(|| format!("failed to start telemetry source '{default_source}'"))?;
    }

    let state = AppState::new(app);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let web_handle = if config.ui.enabled {
        let addr = config.ui.socket_addr()?;
        let server = WebServer::new(addr, state.clone());
        let mut rx = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            let shutdown = async move {
                let _ = rx.wait_for(|stop| *stop).await;
            };
            if let Err(e) = server.run(shutdown).await {
                tracing::error!("HTTP API failed: {}", e);
            }
        }))
    } else {
        None
    };

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received");
        }
        let _ = shutdown_tx.send(true);
    });

    let mut stats = tokio::time::interval(STATS_INTERVAL);
    loop {
        tokio::select! {
            _ = stats.tick() => {
                let app_state = state.clone();
                let status = tokio::task::spawn_blocking(move || {
                    let app = app_state.app.lock();
                    app.check_audio();
                    app.status()
                })
                .await?;
                if let Some(telemetry) = &status.telemetry {
                    tracing::info!(
                        source = %telemetry.source,
                        datagrams = telemetry.datagrams,
                        decoded = telemetry.decoded,
                        malformed = telemetry.malformed,
                        effects = status.effects,
                        "Telemetry stats"
                    );
                }
            }
            _ = shutdown_rx.wait_for(|stop| *stop) => break,
        }
    }

    if let Some(handle) = web_handle {
        let _ = handle.await;
    }

    let state_for_shutdown = state.clone();
    tokio::task::spawn_blocking(move || state_for_shutdown.app.lock().shutdown()).await?;
    Ok(())
}
