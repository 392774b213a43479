use anyhow::Context;
use seatlock_api::{
    app,
    state::{AppState, AuthConfig, RequestRules},
};
use seatlock_core::{BookingStore, KeyValueStore, QueryService, ReservationEngine};
use seatlock_store::{app_config::Config, DbClient, PgBookingStore, RedisClient};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seatlock_api=debug,seatlock_core=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Seatlock API on port {}", config.server.port);

    // Postgres Connection
    let db = DbClient::new(&config.database)
        .await
        .context("Failed to connect to Postgres")?;
    if config.database.run_migrations {
        db.migrate().await.context("Failed to run migrations")?;
    }
    if config.booking.catalog.seed_on_startup {
        db.seed_catalog(&config.booking.catalog)
            .await
            .context("Failed to seed seat catalog")?;
    }

    // Redis Connection
    let redis_client = RedisClient::new(&config.redis.url)
        .await
        .context("Failed to create Redis client")?;
    redis_client.ping().await.context("Failed to reach Redis")?;

    let store: Arc<dyn BookingStore> = Arc::new(PgBookingStore::new(db.pool.clone()));
    let kv: Arc<dyn KeyValueStore> = Arc::new(redis_client);
    let engine_config = config.booking.engine_config();

    let app_state = AppState {
        engine: Arc::new(ReservationEngine::new(Arc::clone(&store), Arc::clone(&kv), engine_config.clone())),
        queries: Arc::new(QueryService::new(store, kv, &engine_config)),
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
        rules: RequestRules {
            max_advance_days: config.booking.max_advance_days,
            request_timeout: Duration::from_millis(config.server.request_timeout_ms),
        },
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down...");
    db.pool.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
