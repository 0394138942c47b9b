//! EventBuddy
//!
//! Main application entry point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use EventBuddy::{
    build_router,
    config::Settings,
    database::{create_pool, run_migrations, DatabaseConfig},
    services::{ServiceFactory, SmtpMailer},
    utils::logging,
    AppState,
};

const LIMITER_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Load configuration
    let settings = Settings::new().context("failed to load configuration")?;
    settings.validate()?;

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = logging::init_logging(&settings.logging)?;

    info!("Starting {}...", EventBuddy::info());

    info!("Connecting to database...");
    let pool = create_pool(&DatabaseConfig::from(&settings.database)).await?;

    info!("Running database migrations...");
    run_migrations(&pool).await?;

    let mailer = Arc::new(SmtpMailer::new(&settings.smtp)?);
    let services = ServiceFactory::new(&settings, pool, mailer)?;

    let scheduler = if settings.scheduler.enabled {
        Some(services.daily_jobs(&settings).spawn())
    } else {
        info!("Scheduler disabled");
        None
    };

    let state = AppState::new(settings.clone(), services);

    let limiter = state.login_limiter.clone();
    let cleanup = tokio::spawn(async move {
        let mut interval = tokio::time::interval(LIMITER_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            limiter.cleanup();
        }
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&settings.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.server.bind_addr))?;
    info!(addr = %settings.server.bind_addr, "EventBuddy is listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cleanup.abort();
    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }

    info!("EventBuddy has been shut down.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}
