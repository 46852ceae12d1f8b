mod config;
mod db;
mod domain;
mod grading;
mod middleware;
mod services;
mod state;
mod web;

use crate::config::Config;
use crate::db::seed;
use crate::middleware::RateLimiter;
use crate::services::reminders::{self, LogNotifier};
use crate::state::SharedState;
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to run database migrations: {}", e);
            e
        })?;
    tracing::info!("Database migrations completed");

    if let Some(admin) = &config.seed_admin {
        seed::seed_admin(&pool, admin).await?;
    }

    let reminder_cron = config.reminder_cron.clone();
    let bind_addr = config.bind_addr.clone();
    let shared: SharedState = Arc::new(state::AppState {
        pool,
        config: Arc::new(config),
        notifier: Arc::new(LogNotifier),
        login_limiter: RateLimiter::new(5, Duration::from_secs(60)),
    });

    let scheduler = JobScheduler::new().await?;

    let shared_for_reminders = shared.clone();
    scheduler
        .add(Job::new_async(reminder_cron.as_str(), move |_uuid, _l| {
            let state = shared_for_reminders.clone();
            Box::pin(async move {
                if let Err(e) = reminders::dispatch_due_reminders(&state).await {
                    tracing::error!("Reminder dispatch failed: {:#}", e);
                }
            })
        })?)
        .await?;

    let shared_for_cleanup = shared.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let state = shared_for_cleanup.clone();
            Box::pin(async move {
                state.login_limiter.cleanup().await;
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!("Scheduler started:");
    tracing::info!("  - Calendar reminders: {}", reminder_cron);
    tracing::info!("  - Login limiter cleanup: hourly");

    let app = Router::new()
        .merge(web::routes(shared))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on {bind_addr}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
