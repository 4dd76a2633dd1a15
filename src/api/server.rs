//! HTTP server for the REST API

use crate::api::handlers;
use crate::config::ServerConfig;
use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Build the API router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))

        // Upload (queued)
        .route("/upload", post(handlers::upload_financial_data))
        .route(
            "/api/v1/financial/uploadFinancialData",
            post(handlers::upload_financial_data),
        )

        // Risk assessment
        .route("/risk-assessment", get(handlers::get_risk_assessment))
        .route(
            "/api/v1/financial/getRiskAssessment",
            get(handlers::get_risk_assessment),
        )

        // Direct insert, bypasses the queue
        .route("/api/v1/financial/testUpload", post(handlers::test_upload))

        .with_state(Arc::new(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// API server manager
pub struct ApiServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn new() -> Self {
        Self {
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Bind and serve in a background task; returns the bound address
    pub async fn start(&mut self, config: &ServerConfig, state: AppState) -> Result<SocketAddr> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid address: {}", e)))?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let bound = listener.local_addr()?;
        let app = router(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);

        info!("Starting finrisk API server on {}", bound);

        self.handle = Some(tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                info!("API server shutting down");
            });

            if let Err(e) = server.await {
                error!("API server error: {}", e);
            }
        }));

        Ok(bound)
    }

    /// Stop accepting connections and wait for in-flight requests
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("API server task ended abnormally: {}", e);
            }
        }
    }
}

impl Default for ApiServer {
    fn default() -> Self {
        Self::new()
    }
}
