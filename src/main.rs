use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use courtbook::config::AppConfig;
use courtbook::db::Store;
use courtbook::handlers;
use courtbook::services::sweeper::spawn_hold_sweeper;
use courtbook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let store = Store::open(&config.database_url)?;
    let state = Arc::new(AppState::new(config.clone(), store)?);

    spawn_hold_sweeper(
        Arc::clone(&state.bookings),
        Duration::from_secs(config.hold_sweep_interval_secs.max(1)),
        config.facility_utc_offset,
    );
    tracing::info!(
        ttl_minutes = config.hold_ttl_minutes,
        every_secs = config.hold_sweep_interval_secs,
        utc_offset = %config.facility_utc_offset,
        "hold sweeper started"
    );

    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
