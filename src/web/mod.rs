//! Web server module.

mod handlers;

use crate::config::ServerConfig;
use crate::connector::Connector;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub connector: Arc<Connector>,
}

/// HTTP front end of the connector.
pub struct Server {
    http_port: u16,
    state: AppState,
}

impl Server {
    pub fn new(config: &ServerConfig, connector: Arc<Connector>) -> Self {
        Self {
            http_port: config.http_port,
            state: AppState { connector },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

        Router::new()
            .route("/api/query", post(handlers::handle_query))
            .route("/api/resources/{*path}", get(handlers::handle_resource))
            .route("/api/health", get(handlers::handle_health))
            // Streams
            .route("/api/stream/subscribe", post(handlers::handle_stream_subscribe))
            .route("/api/stream/run", post(handlers::handle_stream_run))
            .route("/api/stream/publish", post(handlers::handle_stream_publish))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Serve until Ctrl-C, then stop all streams.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for shutdown signal: {}", e);
                }
            })
            .await?;

        tracing::info!("Shutting down");
        self.state.connector.dispose();
        Ok(())
    }
}
