//! WebSocket route handler.
//!
//! # Data Flow
//! ```text
//! upgrade request
//!     → match route by path prefix
//!     → fresh WebsocketProxy for the session, registered by id
//!     → handshake (rejection response, or 101 + spawned relay)
//!     → remove_connection(id) once the session is over
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
};

use crate::config::RouteConfig;
use crate::http::server::AppState;
use crate::proxy::{
    BaseUrlResolver, ClientContext, ConnectionManager, Handshake, LoggingViewer, RelayOutcome,
    StaticHeaderDirector, WebsocketProxy,
};

/// A configured proxy path and the callbacks shared by its sessions.
pub struct ProxyRoute {
    config: RouteConfig,
    resolver: Arc<BaseUrlResolver>,
    director: Option<Arc<StaticHeaderDirector>>,
    viewer: Option<Arc<LoggingViewer>>,
}

impl ProxyRoute {
    pub fn new(config: RouteConfig) -> Self {
        let resolver = Arc::new(
            BaseUrlResolver::new(config.backend_url.clone()).preserve_base_path(config.preserve_base_path),
        );
        let director = Some(StaticHeaderDirector::from_pairs(&config.set_headers))
            .filter(|d| !d.is_empty())
            .map(Arc::new);
        let viewer = config
            .log_messages
            .then(|| Arc::new(LoggingViewer::new(config.name.clone())));

        Self {
            config,
            resolver,
            director,
            viewer,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn path(&self) -> &str {
        &self.config.path
    }

    /// Build the proxy instance serving one session.
    pub fn new_session(&self, manager: Arc<dyn ConnectionManager>) -> WebsocketProxy {
        let mut builder = WebsocketProxy::builder(self.config.options())
            .resolver(self.resolver.clone())
            .manager(manager);
        if let Some(director) = &self.director {
            builder = builder.director(director.clone());
        }
        if let Some(viewer) = &self.viewer {
            builder = builder.viewer(viewer.clone());
        }
        builder.build()
    }
}

/// Handler for every proxied path.
pub async fn websocket_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let path = request.uri().path().to_string();
    let Some(route) = state.routes.match_path(&path).cloned() else {
        tracing::warn!(path = %path, "No route matched");
        return (StatusCode::NOT_FOUND, "No matching route found").into_response();
    };

    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = ClientContext {
        remote_addr,
        tls: state.tls,
    };

    let proxy = Arc::new(route.new_session(state.registry.clone()));
    state.registry.register(&proxy, route.name(), remote_addr);
    let registration = Registration(proxy.clone());

    match proxy.handshake(request, client).await {
        Handshake::Rejected(response) => {
            tracing::debug!(
                proxy_id = %proxy.unique_id(),
                route = %route.name(),
                status = %response.status(),
                "Handshake rejected"
            );
            response
        }
        Handshake::Upgraded { response, session } => {
            let route_name = route.name().to_string();
            tokio::spawn(async move {
                match session.run().await {
                    Some(RelayOutcome::Cancelled) | None => {}
                    Some(outcome) => tracing::debug!(
                        proxy_id = %registration.0.unique_id(),
                        route = %route_name,
                        close_code = ?outcome.error().and_then(|e| e.close_code()),
                        "Session ended"
                    ),
                }
                drop(registration);
            });
            response
        }
    }
}

/// Reports the session to its manager when dropped, including when the
/// handler future is abandoned mid-handshake.
struct Registration(Arc<WebsocketProxy>);

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(manager) = self.0.manager() {
            manager.remove_connection(self.0.unique_id());
        }
    }
}
