//! Backend target resolution.

use axum::http::request::Parts;
use url::Url;

/// Maps an incoming request onto a backend URL.
///
/// Returning `None` is reported to the client as a server-side fault.
pub trait BackendResolver: Send + Sync {
    fn resolve(&self, incoming: &Parts) -> Option<Url>;
}

/// Rewrites the request path, query and fragment onto a fixed base URL.
#[derive(Debug, Clone)]
pub struct BaseUrlResolver {
    base: Url,
    preserve_base_path: bool,
}

impl BaseUrlResolver {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            preserve_base_path: false,
        }
    }

    /// Keep the base path as a prefix instead of replacing it.
    pub fn preserve_base_path(mut self, preserve: bool) -> Self {
        self.preserve_base_path = preserve;
        self
    }

    pub fn base(&self) -> &Url {
        &self.base
    }
}

impl BackendResolver for BaseUrlResolver {
    fn resolve(&self, incoming: &Parts) -> Option<Url> {
        let mut url = self.base.clone();
        if url.cannot_be_a_base() {
            return None;
        }

        let path = incoming.uri.path();
        if self.preserve_base_path {
            let prefix = self.base.path().trim_end_matches('/');
            url.set_path(&format!("{}{}", prefix, path));
        } else {
            url.set_path(path);
        }
        url.set_query(incoming.uri.query());
        // Fragments never reach the server, so this always clears the base fragment.
        url.set_fragment(None);
        Some(url)
    }
}
