//! Market Atlas history generator
//!
//! Walks a lookback window of daily news-embedding frames through the
//! walk-forward engine and writes the animated map's time series artifact.
//! Frames come from Clickhouse or from a JSON snapshot file.

mod artifact;
mod cache;
mod config;
mod db;
mod error;
mod retry;
mod runner;
mod source;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use atlas_core::lookback_dates;
use cache::FrameCache;
use config::{AppConfig, StoreKind};
use db::FeatureRepository;
use retry::RetryPolicy;
use runner::HistoryRunner;
use source::FrameSource;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("atlas_history=info,atlas_core=info")
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting Market Atlas history generation");

    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    let end_date = config.end_date();
    tracing::info!(
        store = ?config.store.kind,
        %end_date,
        lookback_days = config.window.lookback_days,
        target_radius = config.engine.target_radius,
        output = %config.output.path.display(),
        "Configuration loaded"
    );

    let source = match (config.store.kind, &config.store.snapshot_path) {
        (StoreKind::Snapshot, Some(path)) => FrameSource::load_snapshot(path).await?,
        _ => FrameSource::Clickhouse(FeatureRepository::connect(&config.database)),
    };

    if let Err(e) = source.health_check().await {
        tracing::error!(error = %e, source = source.name(), "Feature source unreachable");
        return Err(anyhow::anyhow!("Feature source unreachable: {}", e));
    }
    tracing::info!(source = source.name(), "Feature source ready");

    // Ctrl-C stops the run between days; completed days are still written
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, stopping after the current day");
                cancel.cancel();
            }
        });
    }

    let runner = HistoryRunner::new(
        source,
        FrameCache::new(&config.cache),
        RetryPolicy::new(&config.retry),
        config.engine.clone(),
    );

    let dates = lookback_dates(end_date, config.window.lookback_days);
    let report = runner.run(&dates, &cancel).await?;

    artifact::write_artifact(
        &config.output.path,
        &report.records,
        config.output.layout,
        config.output.decimals,
    )?;

    tracing::info!(
        days = dates.len(),
        emitted = report.emitted,
        skipped = report.skipped,
        cancelled = report.cancelled,
        "History generation finished"
    );
    Ok(())
}
