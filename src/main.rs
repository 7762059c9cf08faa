//! Entry point: load configuration, wire the Store/Router/Circuit
//! breakers/Collector/Reservation reaper/Health checker together, and
//! serve the HTTP API. Initialization grounded on the teacher's
//! `main.rs` (`tracing_subscriber::registry()...init()`, `Config::load()`,
//! falling back to in-memory storage when the database is unreachable);
//! the dual-task shutdown shape generalizes the teacher's
//! `tokio::select!` HTTP/gRPC race into an HTTP-server-vs-background-task
//! shutdown race.

use std::sync::Arc;
use std::time::Instant;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quotaguard::api::{create_router, AppState};
use quotaguard::circuit::CircuitRegistry;
use quotaguard::clock::system_clock;
use quotaguard::collector::PassiveCollector;
use quotaguard::config::Config;
use quotaguard::fail_open::FailOpenClient;
use quotaguard::health::HealthChecker;
use quotaguard::reservation_manager::ReservationManager;
use quotaguard::router::Router as QuotaRouter;
use quotaguard::store::{InMemoryStore, SqlxStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load().map_err(|err| {
        eprintln!("failed to load configuration: {err}");
        err
    })?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("quotaguard={},tower_http=info", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting quotaguard v{}", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn Store> = match &config.database.url {
        Some(url) => match SqlxStore::connect(url).await {
            Ok(store) => {
                tracing::info!("database connection established");
                Arc::new(store)
            }
            Err(err) => {
                tracing::error!(error = %err, "database unreachable at startup");
                return Err(Box::new(err));
            }
        },
        None => {
            tracing::warn!("no DATABASE_URL configured, using in-memory storage (not persisted)");
            Arc::new(InMemoryStore::new())
        }
    };

    let clock = system_clock();
    let circuits = CircuitRegistry::new();

    let router = Arc::new(QuotaRouter::new(
        store.clone(),
        clock.clone(),
        config.thresholds(),
        circuits.clone(),
    ));
    let reservations = Arc::new(ReservationManager::new(store.clone(), clock.clone(), config.reservation_config()));
    let collector = Arc::new(PassiveCollector::new(store.clone(), config.collector_config()));
    let health = Arc::new(HealthChecker::new(clock.clone()));
    let fail_open = Arc::new(FailOpenClient::new(config.fail_open_config()));

    let collector_done = collector.start()?;

    let (reaper_stop_tx, reaper_stop_rx) = tokio::sync::oneshot::channel();
    let reaper_handle = tokio::spawn(reservations.clone().run_reaper(reaper_stop_rx));

    let config = Arc::new(config);
    let state = Arc::new(AppState {
        router,
        reservations,
        collector: collector.clone(),
        health,
        fail_open,
        store,
        circuits,
        config: config.clone(),
        start_time: Instant::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    });

    let app = create_router(state.clone());
    let addr = config.server_addr();
    tracing::info!(%addr, "http server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let shutdown_timeout = std::time::Duration::from_secs(config.server.shutdown_timeout_secs);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down, draining background tasks");
    let _ = reaper_stop_tx.send(());
    let _ = state.collector.stop().await;

    let drain = async {
        let _ = reaper_handle.await;
        let _ = collector_done.await;
    };
    if tokio::time::timeout(shutdown_timeout, drain).await.is_err() {
        tracing::warn!("background tasks did not drain within the shutdown budget");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
