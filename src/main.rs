use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use proofpulse::api::{self, AppState};
use proofpulse::config::{Config, DatabaseBackend};
use proofpulse::geo::GeoIpService;
use proofpulse::storage::{CachedStorage, PostgresStorage, SqliteStorage, Storage};
use proofpulse::tracking::{EngagementAggregator, MetricRecorder, SessionTracker};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Initialize storage
    let backend: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.database.url);
            Arc::new(
                SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
            )
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage: {}", config.database.url);
            Arc::new(
                PostgresStorage::new(&config.database.url, config.database.max_connections)
                    .await?,
            )
        }
    };

    info!("Initializing database...");
    backend.init().await?;
    info!("Database initialized successfully");

    let storage: Arc<dyn Storage> = Arc::new(CachedStorage::new(
        backend,
        config.cache.max_entries,
        config.cache.ttl_secs,
    ));

    let geoip = GeoIpService::new(config.geo.geoip_city_db_path.as_deref())?;
    if geoip.is_enabled() {
        info!("GeoIP lookup enabled");
    } else {
        info!("GeoIP lookup disabled, sessions are tracked without location");
    }

    // Tracking core
    let tracker = Arc::new(SessionTracker::with_timeouts(
        config.tracking.session_timeout(),
        config.tracking.sweep_interval(),
    ));
    let recorder = Arc::new(MetricRecorder::with_dedup_ttl(
        Arc::clone(&storage),
        config.tracking.impression_dedup_ttl(),
    ));
    let aggregator = Arc::new(EngagementAggregator::new(
        Arc::clone(&tracker),
        Arc::clone(&storage),
    ));

    let aggregation_task = config.tracking.stats_interval().map(|every| {
        info!("Scheduled aggregation every {:?}", every);
        aggregator.start(every)
    });

    let state = Arc::new(AppState::new(
        Arc::clone(&storage),
        Arc::clone(&tracker),
        Arc::clone(&recorder),
        Arc::clone(&aggregator),
        geoip,
        config.geo.clone(),
    ));
    let app = api::create_api_router(Arc::clone(&state));

    // Start API server
    let api_addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind {}", api_addr))?;
    info!("🚀 API server listening on http://{}", api_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await?;

    // Stop background tasks
    aggregator.shutdown();
    if let Some(task) = aggregation_task {
        let _ = task.await;
    }
    recorder.shutdown();
    state.pacer.shutdown();
    tracker.shutdown();
    info!("Shutdown complete");

    Ok(())
}
