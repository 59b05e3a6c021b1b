use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cinebook::{
    cache::CacheService,
    config::Config,
    controllers,
    database::Database,
    redis_client::RedisClient,
    services::cleanup::CleanupService,
    services::payment::PaymentGatewayClient,
    AppState,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CineBook API");

    // Connect to the database
    let db = Database::new(&config.database.url, config.database.pool_size).await?;
    info!("Database connected");

    // Run migrations
    db.run_migrations().await?;

    // Connect to Redis
    let redis = RedisClient::new(&config.redis.url).await?;
    info!("Redis connected");

    // Initialize the cache
    let cache = CacheService::new(redis.clone(), db.clone());
    cache.warmup_cache().await;
    info!("Cache warmed up");

    // Payment gateway client with its circuit breaker
    let payments = Arc::new(PaymentGatewayClient::from_config(
        &config.payment,
        &config.circuit_breaker,
    ));

    // Create the shared application state
    let app_state = Arc::new(AppState {
        db: db.clone(),
        redis: redis.clone(),
        cache,
        config: config.clone(),
        payments,
    });

    // --- Start background tasks ---

    // Sweep expired seat holds on an interval
    let cleanup = CleanupService::new(app_state.clone());
    let sweep_interval = Duration::from_secs(config.booking.sweep_interval_seconds);
    task::spawn(async move {
        loop {
            cleanup.run_sweep().await;
            tokio::time::sleep(sweep_interval).await;
        }
    });

    // --- Start the web server ---

    // Create the main router
    let app = Router::new()
        .route("/", get(|| async { "CineBook API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        // Mount the routes from the controllers module
        .nest("/api", controllers::routes())
        // Pass the application state to the router
        .with_state(app_state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.app.port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
