//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vfetch_api::{create_router, metrics, ApiConfig, AppState};
use vfetch_queue::ProgressHub;
use vfetch_storage::PublishClient;
use vfetch_worker::{JobRunner, PipelineConfig, PipelineContext};

/// How often finished jobs past their retention are swept.
const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// How long shutdown waits for running jobs.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vfetch=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vfetch-api");

    let config = ApiConfig::from_env();
    info!("API config: host={}, port={}", config.host, config.port);

    let pipeline = PipelineConfig::from_env();
    if let Err(e) = pipeline.tools.check_all() {
        warn!("External tool check failed, affected stages will fail: {}", e);
    }

    let publisher = PublishClient::from_env().context("Failed to configure publish client")?;
    let ctx = PipelineContext::new(pipeline, publisher)
        .await
        .context("Failed to create pipeline context")?;
    info!("Download directory: {}", ctx.download_dir().display());

    let runner = JobRunner::new(Arc::new(ctx), ProgressHub::new());
    let state = AppState::new(config.clone(), runner.clone());

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics())
    } else {
        None
    };

    // Drop finished jobs nobody observed
    let hub = runner.hub().clone();
    let retention = config.job_retention;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REAP_INTERVAL);
        loop {
            ticker.tick().await;
            let removed = hub.reap_finished(retention);
            if removed > 0 {
                metrics::record_jobs_reaped(removed);
            }
        }
    });

    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid bind address")?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if !runner.wait_idle(SHUTDOWN_GRACE).await {
        warn!(
            "{} job(s) still running after {:?}, exiting anyway",
            runner.hub().active_count(),
            SHUTDOWN_GRACE
        );
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install CTRL+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
