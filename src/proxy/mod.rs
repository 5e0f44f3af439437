//! WebSocket reverse proxy core.
//!
//! # Handshake
//! ```text
//! upgrade request ─▶ validate ─▶ resolve ─▶ dial backend ─▶ 101 to client ─▶ relay
//!                       │           │            │
//!                       ▼           ▼            ▼
//!                   400/403/405    500     backend response / 503
//! ```
//!
//! A [`WebsocketProxy`] owns one configuration and one lifecycle. Closing the
//! lifecycle ends every session relayed through the instance with a going-away
//! close on both peers.

pub mod callbacks;
mod conn;
mod control;
pub mod dial;
pub mod error;
pub mod headers;
pub mod lifecycle;
pub mod options;
pub mod relay;
pub mod resolver;
pub mod upgrade;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request},
    response::{IntoResponse, Response},
};
use hyper::upgrade::OnUpgrade;
use url::Url;

use crate::observability::metrics;

pub use callbacks::{BoxError, ConnectionManager, Director, LoggingViewer, StaticHeaderDirector, Viewer};
pub use dial::{BackendStream, Dialer};
pub use error::{DialError, RelayError, ResolveError, UpgradeError};
pub use headers::ClientContext;
pub use lifecycle::Lifecycle;
pub use options::{DialerConfig, ProxyOptions, RelayMode, UpgraderConfig};
pub use relay::{RelayOutcome, CLOSING_MESSAGE};
pub use resolver::{BackendResolver, BaseUrlResolver};
pub use upgrade::Upgrader;

use control::CONTROL_DEADLINE;

/// One proxy instance: configuration, callbacks and lifecycle.
pub struct WebsocketProxy {
    options: ProxyOptions,
    resolver: Option<Arc<dyn BackendResolver>>,
    director: Option<Arc<dyn Director>>,
    viewer: Option<Arc<dyn Viewer>>,
    manager: Option<Arc<dyn ConnectionManager>>,
    upgrader: Upgrader,
    dialer: Dialer,
    lifecycle: Lifecycle,
}

impl WebsocketProxy {
    /// Proxy to `backend` with the default URL resolver.
    pub fn new(backend: Url, options: ProxyOptions) -> Self {
        let resolver = BaseUrlResolver::new(backend).preserve_base_path(options.preserve_base_path);
        Self::builder(options).resolver(Arc::new(resolver)).build()
    }

    pub fn builder(options: ProxyOptions) -> ProxyBuilder {
        ProxyBuilder {
            options,
            resolver: None,
            director: None,
            viewer: None,
            manager: None,
        }
    }

    pub fn unique_id(&self) -> &str {
        self.lifecycle.unique_id()
    }

    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    pub fn is_connected(&self) -> bool {
        self.lifecycle.is_connected()
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    /// Stop every session of this instance. Returns `false` if already closed.
    pub fn close(&self) -> bool {
        self.lifecycle.close()
    }

    /// Callback the application uses to forget this instance once a session ends.
    pub fn manager(&self) -> Option<&Arc<dyn ConnectionManager>> {
        self.manager.as_ref()
    }

    /// Run the handshake for `request` up to, but not including, the relay.
    ///
    /// On success the returned response must be sent to the client before
    /// [`PendingSession::run`] can complete the upgrade.
    pub async fn handshake(self: &Arc<Self>, request: Request<Body>, client: ClientContext) -> Handshake {
        let proxy_id = self.unique_id();
        let (mut parts, _body) = request.into_parts();

        if self.lifecycle.is_closed() {
            tracing::debug!(proxy_id = %proxy_id, "Rejecting upgrade on closed proxy");
            return Handshake::Rejected(error::service_unavailable());
        }

        let accepted = match self.upgrader.validate(&parts) {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(proxy_id = %proxy_id, error = %e, "Rejected client handshake");
                metrics::record_handshake_failure("upgrade");
                return Handshake::Rejected(e.into_response());
            }
        };
        let on_upgrade = match Upgrader::take_upgrade(&mut parts) {
            Ok(on_upgrade) => on_upgrade,
            Err(e) => {
                tracing::error!(proxy_id = %proxy_id, error = %e, "Connection cannot be upgraded");
                metrics::record_handshake_failure("upgrade");
                return Handshake::Rejected(e.into_response());
            }
        };

        let backend_url = match self.resolve(&parts) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(proxy_id = %proxy_id, error = %e, "Couldn't resolve backend URL");
                metrics::record_handshake_failure("resolve");
                return Handshake::Rejected(e.into_response());
            }
        };

        let natural_tunnel = self.options.natural_tunnel;
        let dial_headers = headers::dial_headers(&parts, &client, natural_tunnel, self.director.as_deref());

        let backend = match self.dialer.dial(&backend_url, &dial_headers).await {
            Ok(backend) => backend,
            Err(e) => {
                tracing::error!(
                    proxy_id = %proxy_id,
                    backend = %backend_url,
                    error = %e,
                    "Couldn't dial to remote backend"
                );
                metrics::record_handshake_failure("dial");
                return Handshake::Rejected(e.into_response());
            }
        };

        let upgrade_headers = headers::upgrade_headers(&parts, &backend.response_headers, natural_tunnel);
        let protocol = self
            .upgrader
            .select_protocol(&accepted, backend.response_headers.get(header::SEC_WEBSOCKET_PROTOCOL));
        let response = self.upgrader.switching_protocols(&accepted, protocol, &upgrade_headers);

        tracing::info!(
            proxy_id = %proxy_id,
            backend = %backend_url,
            natural_tunnel,
            remote_addr = ?client.remote_addr,
            "Backend connected, upgrading client"
        );

        Handshake::Upgraded {
            response,
            session: PendingSession {
                proxy: Arc::clone(self),
                on_upgrade,
                backend: backend.stream,
            },
        }
    }

    fn resolve(&self, parts: &axum::http::request::Parts) -> Result<Url, ResolveError> {
        let resolver = self.resolver.as_ref().ok_or(ResolveError::NoResolver)?;
        resolver.resolve(parts).ok_or(ResolveError::NoUrl)
    }
}

/// Result of [`WebsocketProxy::handshake`].
pub enum Handshake {
    /// The handshake failed; send this response and stop.
    Rejected(Response),
    /// The backend is connected; send `response`, then run `session`.
    Upgraded { response: Response, session: PendingSession },
}

/// A backend connection waiting for the client upgrade to complete.
pub struct PendingSession {
    proxy: Arc<WebsocketProxy>,
    on_upgrade: OnUpgrade,
    backend: BackendStream,
}

impl PendingSession {
    pub fn proxy(&self) -> &Arc<WebsocketProxy> {
        &self.proxy
    }

    /// Finish the client upgrade and relay until the session ends.
    ///
    /// Returns `None` when the client upgrade failed; the backend connection
    /// is closed in that case.
    pub async fn run(self) -> Option<RelayOutcome> {
        let PendingSession {
            proxy,
            on_upgrade,
            mut backend,
        } = self;

        let client = match proxy.upgrader.accept(on_upgrade).await {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(proxy_id = %proxy.unique_id(), error = %e, "Couldn't upgrade client connection");
                metrics::record_handshake_failure("upgrade");
                let _ = tokio::time::timeout(CONTROL_DEADLINE, backend.close(None)).await;
                return None;
            }
        };

        let outcome = relay::relay(
            client,
            backend,
            &proxy.lifecycle,
            proxy.options.relay_mode,
            proxy.viewer.clone(),
        )
        .await;
        Some(outcome)
    }
}

pub struct ProxyBuilder {
    options: ProxyOptions,
    resolver: Option<Arc<dyn BackendResolver>>,
    director: Option<Arc<dyn Director>>,
    viewer: Option<Arc<dyn Viewer>>,
    manager: Option<Arc<dyn ConnectionManager>>,
}

impl ProxyBuilder {
    pub fn resolver(mut self, resolver: Arc<dyn BackendResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn director(mut self, director: Arc<dyn Director>) -> Self {
        self.director = Some(director);
        self
    }

    pub fn viewer(mut self, viewer: Arc<dyn Viewer>) -> Self {
        self.viewer = Some(viewer);
        self
    }

    pub fn manager(mut self, manager: Arc<dyn ConnectionManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    pub fn build(self) -> WebsocketProxy {
        let unique_id = self
            .options
            .unique_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        WebsocketProxy {
            upgrader: Upgrader::new(self.options.upgrader.clone()),
            dialer: Dialer::new(self.options.dialer.clone()),
            lifecycle: Lifecycle::new(unique_id),
            options: self.options,
            resolver: self.resolver,
            director: self.director,
            viewer: self.viewer,
            manager: self.manager,
        }
    }
}
