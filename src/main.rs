//! Odds Engine Service
//!
//! Periodically ingests odds from The Odds API into the document store,
//! archives aged snapshots, and serves a health/status endpoint.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use odds_engine::config::Config;
use odds_engine::health::{self, AppState, HealthState};
use odds_engine::ingest::{IngestDefaults, OddsIngestionService, RefreshRequest};
use odds_engine::{MemoryStore, OddsApiClient, PgStore, Store};

const DB_CONNECT_RETRIES: u32 = 5;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("odds_engine=info".parse()?),
        )
        .init();

    info!("Odds Engine v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    let feed = OddsApiClient::new(
        config.odds_api_key.clone(),
        &config.odds_api_base_url,
        config.requests_per_minute,
    )
    .context("Failed to create odds feed client")?;
    if !feed.is_configured() {
        warn!("ODDS_API_KEY not set: running in degraded mode, no odds will be ingested");
    }

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => Arc::new(
            PgStore::connect(url, DB_CONNECT_RETRIES)
                .await
                .context("Failed to connect to database")?,
        ),
        None => {
            warn!("DATABASE_URL not set: using in-memory store (data is lost on restart)");
            Arc::new(MemoryStore::new())
        }
    };

    let service = Arc::new(OddsIngestionService::new(
        Arc::new(feed),
        store,
        IngestDefaults::from_config(&config),
    ));
    let health_state = HealthState::new();

    // Start health check server
    let app = health::router(AppState {
        health: health_state.clone(),
        service: service.clone(),
    });
    let health_addr = format!("0.0.0.0:{}", config.health_port);
    info!("Health endpoint listening on {}", health_addr);
    let listener = tokio::net::TcpListener::bind(&health_addr).await?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Health server stopped: {}", e);
        }
    });

    // Check if running in one-shot mode (manual trigger)
    if config.run_once {
        info!("Running in one-shot mode (RUN_ONCE=true)");
        refresh_once(&service, &health_state, &config).await?;
        archive_once(&service, &config).await?;
        return Ok(());
    }

    // Handle shutdown gracefully (continuous mode)
    tokio::select! {
        _ = run_schedules(&service, &health_state, &config) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    Ok(())
}

/// Refresh and archive loops. Failures are logged and retried on the next tick.
async fn run_schedules(service: &OddsIngestionService, health: &HealthState, config: &Config) {
    info!(
        "Starting schedules (refresh every {}s for {}, archive every {}s, retention {} days)",
        config.refresh_interval_seconds,
        config.default_sport,
        config.archive_interval_seconds,
        config.archive_retention_days
    );
    if !config.ingestion_enabled {
        warn!("INGESTION_ENABLED=false: scheduled refresh disabled");
    }

    let mut refresh = tokio::time::interval(Duration::from_secs(config.refresh_interval_seconds.max(1)));
    let mut archive = tokio::time::interval(Duration::from_secs(config.archive_interval_seconds.max(1)));
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
    archive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = refresh.tick(), if config.ingestion_enabled => {
                if refresh_once(service, health, config).await.is_err() {
                    warn!("Refresh will be retried in {}s", config.refresh_interval_seconds);
                }
            }
            _ = archive.tick() => {
                if archive_once(service, config).await.is_err() {
                    warn!("Archive sweep will be retried in {}s", config.archive_interval_seconds);
                }
            }
        }
    }
}

async fn refresh_once(service: &OddsIngestionService, health: &HealthState, config: &Config) -> Result<()> {
    let start = Instant::now();
    match service
        .refresh_odds(RefreshRequest::new(config.default_sport.clone()))
        .await
    {
        Ok(summary) => {
            health
                .record_success(summary.ingested_snapshots, summary.warning.clone())
                .await;
            info!(
                "Refresh completed: {} snapshots in {:?}",
                summary.ingested_snapshots,
                start.elapsed()
            );
            Ok(())
        }
        Err(e) => {
            health.record_error().await;
            error!("Refresh failed ({}): {:?}", e.code(), e);
            Err(e.into())
        }
    }
}

async fn archive_once(service: &OddsIngestionService, config: &Config) -> Result<()> {
    match service.archive_old_snapshots(config.archive_retention_days).await {
        Ok(summary) => {
            if summary.archived > 0 {
                info!(
                    "Archive sweep moved {} snapshots ({} copy failures)",
                    summary.archived, summary.archive_failures
                );
            }
            Ok(())
        }
        Err(e) => {
            error!("Archive sweep failed: {:?}", e);
            Err(e.into())
        }
    }
}
