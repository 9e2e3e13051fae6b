mod analysis;
mod api;
mod config;
mod db;
mod error;
mod feedback;
mod ledger;
mod locks;
mod models;
mod profile;
mod review;
mod rules;
mod service;
mod srs;
mod stats;
mod weakness;

use api::{app_router, ApiState};
use config::Config;
use db::Db;
use service::TrackerService;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    let db = Db::connect(&config.database_url).await?;

    let (service, worker) = TrackerService::start(db, config.queue_capacity);
    let service = Arc::new(service);
    let app = app_router(ApiState {
        service: service.clone(),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    log::info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("draining analysis queue");
    service.flush().await;
    let stats = service.queue_stats();
    log::info!(
        "analysis jobs: {} processed, {} failed, {} dropped",
        stats.processed,
        stats.failed,
        stats.dropped
    );
    worker.abort();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("shutting down");
}
