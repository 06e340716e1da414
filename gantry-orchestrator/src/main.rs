use anyhow::Context;
use gantry_orchestrator::config::{Config, StorageType};
use gantry_orchestrator::repository::{MemoryStore, PgStore, Store};
use gantry_orchestrator::service::{RunService, WorkflowService};
use gantry_orchestrator::{api, db};
use gantry_runner::{ContainerBackend, check_runtime_available};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "gantry_orchestrator=debug,gantry_runner=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Gantry Orchestrator...");

    let config = Config::from_env().context("Failed to load configuration")?;

    if let Err(e) = check_runtime_available(&config.container.runtime) {
        tracing::warn!("Jobs will fail until the container runtime is available: {:#}", e);
    }

    let store: Arc<dyn Store> = match config.storage {
        StorageType::Memory => {
            tracing::info!("Using in-memory storage");
            Arc::new(MemoryStore::new())
        }
        StorageType::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set for postgres storage")?;

            tracing::info!("Connecting to database...");
            let pool = db::create_pool(database_url)
                .await
                .context("Failed to create database pool")?;
            tracing::info!("Database connection pool created");

            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;

            Arc::new(PgStore::new(pool))
        }
    };

    let backend = Arc::new(ContainerBackend::new(config.container.clone()));
    let runs = Arc::new(RunService::new(
        Arc::clone(&store),
        backend,
        config.run_timeout,
    ));

    // Build router with all API endpoints
    let app = api::create_router(api::AppState {
        workflows: WorkflowService::new(Arc::clone(&store)),
        runs: Arc::clone(&runs),
    });

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped, waiting for in-flight runs");
    runs.shutdown().await;
    tracing::info!("Graceful shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl-C, starting graceful shutdown");
}
