//! The gantry daemon: loads configuration, starts the bridge and its
//! observability endpoint, and shuts both down cleanly on ctrl-c.

use anyhow::{Context, Result};
use tracing::{error, info};

use gantry_bridge::{metrics_http, Bridge};
use gantry_core::config::Config;
use gantry_telemetry::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            Config::load_from(&path).with_context(|| format!("loading config from {path}"))?
        }
        None => Config::load().context("loading config")?,
    };

    match config.general.log_format.as_str() {
        "json" => logging::init_logging_json("gantry-daemon", &config.general.log_level),
        _ => logging::init_logging("gantry-daemon", &config.general.log_level),
    }

    info!(systems = config.systems.len(), "starting bridge");
    let metrics_settings = config.metrics.clone();
    let bridge = Bridge::new(config).context("constructing bridge")?;

    let router = metrics_http::metrics_router(bridge.metrics());
    let addr = format!("{}:{}", metrics_settings.bind, metrics_settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding metrics endpoint on {addr}"))?;
    info!(%addr, "metrics endpoint listening");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!(error = %e, "metrics server error");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    bridge.close().await;
    Ok(())
}
