//! feed-relay binary entrypoint.
//! Loads the relay config, starts one orchestrator per task and stops them
//! cooperatively on Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use feed_relay::config::load_config_default;
use feed_relay::ingest::providers::youtube_feed::YouTubeFeedProvider;
use feed_relay::metrics::Metrics;
use feed_relay::notify::build_sink;
use feed_relay::orchestrator::spawn_all;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default; `RELAY_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("feed_relay=info,relay=info,warn"));

    let json = std::env::var("RELAY_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = load_config_default().context("loading relay config")?;
    tracing::info!(
        tasks = cfg.tasks.len(),
        state_dir = %cfg.state_dir.display(),
        "relay config loaded"
    );

    if let Ok(addr) = std::env::var("RELAY_METRICS_ADDR") {
        let metrics = Metrics::init()?;
        tokio::spawn(async move {
            if let Err(e) = metrics.serve(&addr).await {
                tracing::warn!(error = %e, "metrics endpoint stopped");
            }
        });
    }

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("feed-relay/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building http client")?;
    let source = Arc::new(YouTubeFeedProvider::http(http));

    let running = spawn_all(&cfg, source, |task| build_sink(&task.sink))?;

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutdown requested, letting in-flight cycles finish");
    for (_, handle, _) in &running {
        handle.stop();
    }
    for (name, _, join) in running {
        match join.await {
            Ok(cycles) => tracing::info!(task = %name, cycles, "task finished"),
            Err(e) => tracing::error!(task = %name, error = %e, "task panicked"),
        }
    }
    Ok(())
}
