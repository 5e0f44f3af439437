//! Admin API.
//!
//! Bearer-token protected endpoints, served on their own listener:
//! - `GET /admin/status`
//! - `GET /admin/connections`
//! - `DELETE /admin/connections/{id}`

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{delete, get},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::lifecycle::{shutdown::signalled, ConnectionRegistry};

#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<ConnectionRegistry>,
    pub api_key: Arc<str>,
    pub routes: Arc<Vec<String>>,
    pub started_at: Instant,
}

impl AdminState {
    pub fn new(registry: Arc<ConnectionRegistry>, api_key: &str, routes: Vec<String>) -> Self {
        Self {
            registry,
            api_key: Arc::from(api_key),
            routes: Arc::new(routes),
            started_at: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/connections", get(get_connections))
        .route("/admin/connections/{id}", delete(close_connection))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

/// Serve the admin API until `shutdown` fires.
pub async fn run_admin(
    listener: TcpListener,
    state: AdminState,
    shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    tracing::info!(address = %listener.local_addr()?, "Admin API starting");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(signalled(shutdown))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{ProxyOptions, WebsocketProxy};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn state() -> (AdminState, Arc<WebsocketProxy>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let proxy = Arc::new(
            WebsocketProxy::builder(ProxyOptions {
                unique_id: Some("session-1".into()),
                ..Default::default()
            })
            .build(),
        );
        registry.register(&proxy, "chat", None);
        (AdminState::new(registry, "secret", vec!["chat".into()]), proxy)
    }

    fn request(method: &str, uri: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn requests_without_key_are_unauthorized() {
        let (state, _proxy) = state();
        let app = setup_admin_router(state);

        let response = app.clone().oneshot(request("GET", "/admin/status", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.oneshot(request("GET", "/admin/status", Some("wrong"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn connections_are_listed() {
        let (state, _proxy) = state();
        let app = setup_admin_router(state);

        let response = app
            .oneshot(request("GET", "/admin/connections", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        let list: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(list[0]["id"], "session-1");
        assert_eq!(list[0]["route"], "chat");
        assert_eq!(list[0]["connected"], false);
    }

    #[tokio::test]
    async fn delete_closes_session() {
        let (state, proxy) = state();
        let app = setup_admin_router(state);

        let response = app
            .clone()
            .oneshot(request("DELETE", "/admin/connections/session-1", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(proxy.is_closed());

        let response = app
            .oneshot(request("DELETE", "/admin/connections/unknown", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
