//! sitewatch - HTTP availability monitor
//!
//! Probes every configured endpoint on its own interval, keeps rolling
//! statistics over several trailing windows, and alerts when availability
//! over the short window crosses 80% in either direction.

mod alert;
mod config;
mod monitor;
mod probe;
mod scheduler;
mod sink;
mod stats;
mod web;

use config::ServerConfig;
use monitor::MonitorSettings;
use probe::HttpProber;
use scheduler::{default_report_policies, Scheduler};
use sink::LogSink;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("sitewatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    let targets = config::load_targets(&cfg.targets_file)?;
    tracing::info!("Monitoring {} targets", targets.len());

    // Build every monitor before anything starts
    let scheduler = Arc::new(Scheduler::new(
        targets,
        &MonitorSettings::default(),
        default_report_policies(),
    )?);

    let prober = Arc::new(HttpProber::new(cfg.probe_timeout)?);
    let sink = Arc::new(LogSink::new(cfg.output));
    scheduler.start(prober, sink).await;

    if cfg.http_port == 0 {
        tokio::signal::ctrl_c().await?;
    } else {
        let server = Server::new(cfg.http_port, scheduler.clone());
        server
            .start(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
    }

    tracing::info!("Shutting down");
    scheduler.stop().await;

    Ok(())
}
