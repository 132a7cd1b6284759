//! Courier server entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use courier_api::{AppState, router as api_router};
use courier_common::Config;
use courier_core::IngestHooks;
use courier_db::Stores;
use courier_queue::{
    Dispatcher, DispatcherConfig, HttpTransport, RedisPubSub, SchedulerConfig,
    ServiceJobExecutor, run_scheduler,
};
use tokio::signal;
use tokio::sync::watch;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Largest accepted request body. Payloads are base64 inside JSON.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "courier=debug,tower_http=debug".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    init_tracing(config.logging.json);

    info!(local_domain = %config.federation.local_domain, "Starting courier...");

    let stores = Stores::connect(&config).await?;

    // Ingestion notices for other processes
    let hooks = IngestHooks::new();
    let pubsub = match &config.redis {
        Some(redis) => {
            info!("Connecting to Redis...");
            let pubsub = RedisPubSub::new(&redis.url, &redis.prefix).await?;
            pubsub.start().await?;
            hooks.register(Arc::new(pubsub.clone())).await;
            Some(pubsub)
        }
        None => None,
    };

    let state = AppState::new(&stores, &config, hooks);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = Vec::new();

    if config.federation.enabled {
        let transport = HttpTransport::new(&config.federation, config.delivery.attempt_timeout())?;
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&stores.outbox),
            state.peer_health_service.clone(),
            Arc::new(transport),
            DispatcherConfig::from(&config.delivery),
        ));
        background.extend(dispatcher.spawn(&shutdown_rx));
        info!(workers = dispatcher.config().workers, "Outbox dispatcher started");

        let executor = Arc::new(ServiceJobExecutor::new(
            state.archive_service.clone(),
            state.outbox_service.clone(),
        ));
        background.extend(run_scheduler(
            &SchedulerConfig::from(&config.archive),
            executor,
            &shutdown_rx,
        ));
        info!("Scheduler started");
    } else {
        info!("Federation disabled, outbox events will not be delivered");
    }

    let app = Router::new()
        .merge(api_router())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let workers finish their current cycles
    if shutdown_tx.send(true).is_err() {
        warn!("No background tasks were listening for shutdown");
    }
    for result in futures::future::join_all(background).await {
        if let Err(e) = result {
            error!(error = %e, "Background task panicked");
        }
    }

    if let Some(pubsub) = pubsub
        && let Err(e) = pubsub.shutdown().await
    {
        warn!(error = %e, "Failed to close Redis connections");
    }

    info!("Server shutdown complete");
    Ok(())
}
