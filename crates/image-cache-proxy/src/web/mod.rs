//! Web layer module
//!
//! `/health` reports service status and conversion backlog; every other path
//! is an image request handled by the [`FallbackHandler`].

use anyhow::Result;
use axum::{Router, routing::get};
use std::{net::SocketAddr, sync::Arc};
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;

use crate::{config::Config, fallback::FallbackHandler, scheduler::TranscoderRegistry};

pub mod handlers;
pub mod middleware;

use middleware::{ClientCachePolicy, client_cache_policy_middleware, request_logging_middleware};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<FallbackHandler>,
    pub registry: TranscoderRegistry,
}

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(config: &Config, state: AppState) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.web.host, config.web.port).parse()?;
        let app = Self::router(state, ClientCachePolicy::new(config.client_cache.max_age));
        Ok(Self { app, addr })
    }

    pub fn router(state: AppState, cache_policy: ClientCachePolicy) -> Router {
        let images = Router::new()
            .route("/{*path}", get(handlers::proxy_image))
            .route_layer(axum::middleware::from_fn_with_state(
                cache_policy,
                client_cache_policy_middleware,
            ));

        Router::new()
            .route("/health", get(handlers::health_check))
            .merge(images)
            .layer(CatchPanicLayer::new())
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .with_state(state)
    }

    /// Serve with cancellation support and ready notification
    pub async fn serve_with_cancellation(
        self,
        ready_signal: tokio::sync::oneshot::Sender<Result<()>>,
        cancellation_token: CancellationToken,
    ) -> Result<()> {
        match tokio::net::TcpListener::bind(&self.addr).await {
            Ok(listener) => {
                // Signal that we're now actually listening on the port
                let _ = ready_signal.send(Ok(()));

                let shutdown_signal = async move {
                    cancellation_token.cancelled().await;
                    tracing::info!("Web server received cancellation signal, shutting down gracefully");
                };

                axum::serve(listener, self.app)
                    .with_graceful_shutdown(shutdown_signal)
                    .await?;
                Ok(())
            }
            Err(bind_error) => {
                let bind_err_msg = format!("Failed to bind to {}: {}", self.addr, bind_error);
                let _ = ready_signal.send(Err(anyhow::anyhow!("{}", bind_err_msg)));
                Err(anyhow::anyhow!("{}", bind_err_msg))
            }
        }
    }

    /// Get the host address
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}
