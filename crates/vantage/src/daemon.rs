//! Scheduler daemon: store, collaborators, timers and the API server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use miette::{IntoDiagnostic, Result};
use tokio::sync::watch;
use tracing::info;

use vantage_scheduler::{LogNotifier, Notifier, ReportScheduler};
use vantage_store::{JsonFileStore, MemoryStore, ScheduleStore};

use crate::generator::HttpReportGenerator;
use crate::notifier::WebhookNotifier;

/// Settings for `vantage serve`.
pub struct ServeOptions {
    pub port: u16,
    pub data_file: Option<PathBuf>,
    pub generator_url: String,
    pub generator_timeout_secs: u64,
    pub webhook_url: Option<String>,
}

/// Run until ctrl-c.
pub async fn run(options: ServeOptions) -> Result<()> {
    let store: Arc<dyn ScheduleStore> = match &options.data_file {
        Some(path) => {
            let store = JsonFileStore::open(path)
                .await
                .map_err(|e| miette::miette!("failed to open data file {}: {}", path.display(), e))?;
            info!(path = %path.display(), "using JSON file store");
            Arc::new(store)
        }
        None => {
            info!("no data file configured, schedules will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let generator = HttpReportGenerator::new(
        &options.generator_url,
        Duration::from_secs(options.generator_timeout_secs),
    )
    .map_err(|e| miette::miette!("failed to create report generator client: {}", e))?;

    let notifier: Arc<dyn Notifier> = match &options.webhook_url {
        Some(url) => Arc::new(
            WebhookNotifier::new(url)
                .map_err(|e| miette::miette!("failed to create webhook client: {}", e))?,
        ),
        None => Arc::new(LogNotifier),
    };

    let scheduler = ReportScheduler::builder(store, Arc::new(generator))
        .notifier(notifier)
        .build();

    let registered = scheduler
        .init()
        .await
        .map_err(|e| miette::miette!("failed to restore schedules: {}", e))?;
    info!(registered, "scheduler initialized");

    // Create shutdown channel
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let router = vantage_web::create_router(scheduler.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], options.port));
    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    info!(%addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            while !*shutdown_rx.borrow() {
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .into_diagnostic()?;

    let cancelled = scheduler.shutdown().await;
    info!(cancelled, "scheduler stopped");
    Ok(())
}
