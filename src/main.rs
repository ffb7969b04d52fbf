use std::{sync::Arc, time::Duration};

use anyhow::Result;
use sqlx::PgPool;
use tokio::{net::TcpListener, signal, time};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use env_monitor_service::{
    api::{self, AppState},
    config::{Config, StoreBackend},
    db,
    retention::RetentionService,
    store::{MemoryStore, PgStore, Store},
};

const MIGRATION_RETRY: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; vars may come from the environment
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let store = build_store(&config).await?;

    let state = AppState::new(
        store,
        config.simulated_execution,
        config.sensor_stale_after,
    );

    let retention = RetentionService::new(
        state.alerts.clone(),
        state.commands.clone(),
        config.retention_interval,
        config.alert_retention_days,
        config.command_retention_days,
    );
    tokio::spawn(retention.run());

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, backend = state.store.backend(), "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn build_store(config: &Config) -> Result<Arc<dyn Store>> {
    match config.store_backend {
        StoreBackend::Memory => {
            warn!("Using in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required for the postgres backend"))?;
            let pool = db::create_pool(url, config.db_max_connections, config.db_acquire_timeout)?;

            match db::run_migrations(&pool).await {
                Ok(()) => info!("Database ready"),
                Err(e) => {
                    warn!(error = %e, "Database unavailable, serving in degraded mode");
                    tokio::spawn(retry_migrations(pool.clone()));
                }
            }

            Ok(Arc::new(PgStore::new(pool, config.db_acquire_timeout)))
        }
    }
}

async fn retry_migrations(pool: PgPool) {
    let mut ticker = time::interval(MIGRATION_RETRY);
    // first tick fires immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match db::run_migrations(&pool).await {
            Ok(()) => {
                info!("Database ready");
                return;
            }
            Err(e) => warn!(error = %e, "Migrations still failing"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
