//! Application startup and lifecycle management.

use crate::config::PlantHealthConfig;
use crate::forwarder::Forwarder;
use crate::handlers;
use crate::services::{init_metrics, PlantIdClient};
use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics_middleware, request_id_middleware, security_headers_middleware, REQUEST_ID_HEADER,
};
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: PlantHealthConfig,
    pub forwarder: Forwarder,
}

impl AppState {
    /// Build state backed by the real Plant.id client.
    pub fn from_config(config: PlantHealthConfig) -> Result<Self, AppError> {
        let client = PlantIdClient::new(config.plant_id.timeout).map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("Failed to build HTTP client: {}", e))
        })?;

        let forwarder = Forwarder::new(
            config.forwarder_options(),
            config.plant_id.api_key.clone(),
            Arc::new(client),
        );

        if forwarder.is_configured() {
            tracing::info!(endpoint = %config.plant_id.endpoint, "Plant.id forwarder initialized");
        } else {
            tracing::warn!("PLANT_ID_API_KEY not configured - forward requests will fail with 500");
        }

        Ok(Self { config, forwarder })
    }
}

pub fn build_router(state: AppState) -> Router {
    let shape = state.config.forwarder.response_shape;
    let max_body_bytes = state.config.max_body_bytes;

    Router::new()
        .route("/", post(handlers::forward))
        .route("/v1/plants/assess", post(handlers::forward))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CatchPanicLayer::custom(
            move |err: Box<dyn Any + Send + 'static>| handlers::panic_response(shape, err),
        ))
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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

    tracing::info!("Shutdown signal received");
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: PlantHealthConfig) -> Result<Self, AppError> {
        if let Err(e) = init_metrics() {
            tracing::warn!("Prometheus recorder not installed: {}", e);
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        let state = AppState::from_config(config)?;
        let router = build_router(state);

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> Result<(), AppError> {
        tracing::info!("Listening on port {}", self.port);

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}
