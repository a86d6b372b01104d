use std::net::SocketAddr;
use std::sync::Arc;

use assessment_engine::{
    build_router,
    config::{get_config, init_config, LogFormat},
    database::{
        pg_store::PgStore,
        pool::{create_pool, run_migrations},
    },
    services::{attempt_service::AttemptService, sweeper_service::ExpirationSweeper},
    utils::time::SystemClock,
    AppState,
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = ?e, "failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_config()?;
    let config = get_config();
    init_tracing(config.log_format);

    let pool = create_pool().await?;
    run_migrations(&pool).await?;

    let store = Arc::new(PgStore::new(pool));
    let attempt_service = AttemptService::new(store.clone(), store, Arc::new(SystemClock));

    let mut scheduler = ExpirationSweeper::new(attempt_service.clone())
        .start(&config.sweeper_cron)
        .await?;

    let app = build_router(AppState::new(attempt_service, &config.jwt_secret));

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await?;
    info!("Expiration sweeper stopped");
    Ok(())
}
