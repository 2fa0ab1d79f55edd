use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, StatusCode};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use foreman_api::config::ServerConfig;
use foreman_api::engine::{DispatcherConfig, JobDispatcher, JobService, WorkQueue, WorkerRegistry};
use foreman_api::notifications::EventForwarder;
use foreman_api::state::AppState;
use foreman_api::{routes, ws};
use foreman_events::EventBus;
use foreman_store::MemoryJobStore;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "foreman_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Core services ---
    let store = Arc::new(MemoryJobStore::new());
    let bus = Arc::new(EventBus::default());
    let queue = Arc::new(WorkQueue::new());
    let registry = Arc::new(WorkerRegistry::new(chrono::Duration::seconds(
        config.heartbeat_timeout_secs as i64,
    )));
    let hub = Arc::new(ws::ObserverHub::new(chrono::Duration::seconds(
        config.observer_idle_timeout_secs as i64,
    )));

    let service = Arc::new(JobService::new(
        store.clone(),
        Arc::clone(&queue),
        Arc::clone(&registry),
        Arc::clone(&bus),
        chrono::Duration::seconds(config.lease_duration_secs as i64),
        config.max_retries,
    ));

    // --- Dispatcher ---
    let dispatch_cancel = tokio_util::sync::CancellationToken::new();
    let dispatcher = JobDispatcher::new(
        Arc::clone(&service),
        DispatcherConfig {
            poll_interval: Duration::from_millis(config.dispatch_interval_ms),
        },
    );
    let dispatcher_cancel = dispatch_cancel.clone();
    let dispatcher_handle = tokio::spawn(async move {
        dispatcher.run(dispatcher_cancel).await;
    });

    // --- Event forwarder (bus -> observers) ---
    let forwarder = EventForwarder::new(Arc::clone(&hub));
    let forwarder_cancel = dispatch_cancel.clone();
    let forwarder_handle = tokio::spawn(forwarder.run(bus.subscribe(), forwarder_cancel));

    // --- Observer heartbeat ---
    let heartbeat_handle = ws::start_observer_heartbeat(Arc::clone(&hub));

    tracing::info!("Engine services started (dispatcher, forwarder, heartbeat)");

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        store,
        service,
        registry,
        hub: Arc::clone(&hub),
        bus,
    };

    // --- Request ID header name ---
    let request_id_header = HeaderName::from_static("x-request-id");

    // --- Router ---
    let app = Router::new()
        // Health check at root level (not under /api/v1).
        .merge(routes::health::router())
        // API v1 routes.
        .nest("/api/v1", routes::api_routes())
        // -- Middleware stack (applied bottom-up) --
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(build_cors_layer(&config))
        .with_state(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    dispatch_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), dispatcher_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), forwarder_handle).await;
    tracing::info!("Dispatcher and forwarder stopped");

    let observer_count = hub.connection_count().await;
    tracing::info!(observer_count, "Closing remaining observer connections");
    hub.shutdown_all().await;

    heartbeat_handle.abort();
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server shuts
/// down cleanly whether stopped interactively or by a process manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Build the CORS middleware layer from server configuration.
///
/// Panics at startup if any configured origin is invalid -- misconfiguration
/// fails fast.
fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .map(|o| {
            o.parse()
                .unwrap_or_else(|e| panic!("Invalid CORS origin '{o}': {e}"))
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}
