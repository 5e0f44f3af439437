//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router serving every proxied path
//! - Wire up middleware (tracing)
//! - Bind the server to a plain or TLS listener
//! - Close live sessions and drain on shutdown

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::any, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::http::websocket::{websocket_handler, ProxyRoute};
use crate::lifecycle::{shutdown::signalled, ConnectionRegistry};
use crate::net::tls::load_tls_config;
use crate::routing::RouteTable;

/// How long shutdown waits for closed sessions to unregister.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable<Arc<ProxyRoute>>>,
    pub registry: Arc<ConnectionRegistry>,
    /// Whether this listener terminates TLS.
    pub tls: bool,
}

/// HTTP server for the WebSocket proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    state: AppState,
}

impl HttpServer {
    pub fn new(config: ProxyConfig) -> Self {
        let routes = RouteTable::new(
            config
                .proxies
                .iter()
                .map(|route| (route.path.clone(), Arc::new(ProxyRoute::new(route.clone())))),
        );
        for route in routes.iter() {
            tracing::info!(route = %route.name(), path = %route.path(), "Proxy route registered");
        }

        let state = AppState {
            routes: Arc::new(routes),
            registry: Arc::new(ConnectionRegistry::new()),
            tls: config.listener.tls.is_some(),
        };

        let router = Self::build_router(state.clone());
        Self { router, config, state }
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(websocket_handler))
            .route("/", any(websocket_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Sessions accepted by this server.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.state.registry.clone()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Run the server until `shutdown` fires, then close every session.
    pub async fn run(self, listener: TcpListener, shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let HttpServer { router, config, state } = self;
        let addr = listener.local_addr()?;
        let registry = state.registry;
        let app = router.into_make_service_with_connect_info::<SocketAddr>();

        let stop = {
            let registry = registry.clone();
            async move {
                signalled(shutdown).await;
                let closed = registry.close_all();
                tracing::info!(sessions = closed, "Closing proxied sessions");
            }
        };

        match &config.listener.tls {
            Some(tls) => {
                let rustls = load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path)).await?;
                let handle = axum_server::Handle::new();
                let trigger = handle.clone();
                tokio::spawn(async move {
                    stop.await;
                    trigger.graceful_shutdown(Some(DRAIN_TIMEOUT));
                });

                tracing::info!(address = %addr, "HTTPS server starting");
                axum_server::from_tcp_rustls(listener.into_std()?, rustls)
                    .handle(handle)
                    .serve(app)
                    .await?;
            }
            None => {
                tracing::info!(address = %addr, "HTTP server starting");
                axum::serve(listener, app).with_graceful_shutdown(stop).await?;
            }
        }

        drain(&registry).await;
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Wait for closed sessions to send their close frames and unregister.
async fn drain(registry: &ConnectionRegistry) {
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while !registry.is_empty() {
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(remaining = registry.len(), "Sessions still open after drain timeout");
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
