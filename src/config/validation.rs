//! Configuration validation.
//!
//! Serde covers syntax; this module checks values. Every problem is
//! reported, not just the first.

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::{ProxyConfig, PLACEHOLDER_API_KEY};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: String, value: String },
    #[error("{field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("at least one [[proxies]] entry is required")]
    NoProxies,
    #[error("duplicate proxy {field} '{value}'")]
    Duplicate { field: &'static str, value: String },
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.into(),
        reason: reason.into(),
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.is_empty() {
            errors.push(invalid("listener.tls.cert_path", "must not be empty"));
        }
        if tls.key_path.is_empty() {
            errors.push(invalid("listener.tls.key_path", "must not be empty"));
        }
    }

    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }

    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() || config.admin.api_key == PLACEHOLDER_API_KEY {
            errors.push(invalid("admin.api_key", "must be set when the admin API is enabled"));
        }
    }

    if config.proxies.is_empty() {
        errors.push(ValidationError::NoProxies);
    }

    let mut names = HashSet::new();
    let mut paths = HashSet::new();
    for (i, route) in config.proxies.iter().enumerate() {
        let field = |name: &str| format!("proxies[{}].{}", i, name);

        if route.name.is_empty() {
            errors.push(invalid(field("name"), "must not be empty"));
        } else if !names.insert(route.name.as_str()) {
            errors.push(ValidationError::Duplicate {
                field: "name",
                value: route.name.clone(),
            });
        }

        if !route.path.starts_with('/') {
            errors.push(invalid(field("path"), "must start with '/'"));
        } else if !paths.insert(route.path.trim_end_matches('/')) {
            errors.push(ValidationError::Duplicate {
                field: "path",
                value: route.path.clone(),
            });
        }

        if !matches!(route.backend_url.scheme(), "ws" | "wss") {
            errors.push(invalid(field("backend_url"), "scheme must be ws or wss"));
        }

        if route.upgrader.read_buffer_size == 0 || route.upgrader.write_buffer_size == 0 {
            errors.push(invalid(field("upgrader"), "buffer sizes must be greater than zero"));
        }
        if route.dialer.handshake_timeout_secs == 0 {
            errors.push(invalid(field("dialer.handshake_timeout_secs"), "must be greater than zero"));
        }
        if route.dialer.max_message_size == Some(0) || route.dialer.max_frame_size == Some(0) {
            errors.push(invalid(field("dialer"), "size limits must be greater than zero"));
        }
        for name in route.set_headers.keys() {
            if axum::http::HeaderName::from_bytes(name.as_bytes()).is_err() {
                errors.push(invalid(field("set_headers"), format!("invalid header name '{}'", name)));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RouteConfig;

    fn route(name: &str, path: &str, url: &str) -> RouteConfig {
        toml::from_str(&format!(
            "name = \"{}\"\npath = \"{}\"\nbackend_url = \"{}\"\n",
            name, path, url
        ))
        .unwrap()
    }

    #[test]
    fn valid_config_passes() {
        let mut config = ProxyConfig::default();
        config.proxies.push(route("chat", "/chat", "ws://127.0.0.1:9000"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn all_errors_are_collected() {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "nowhere".into();
        config.admin.enabled = true;
        config.proxies.push(route("chat", "chat", "http://127.0.0.1:9000"));
        config.proxies.push(route("chat", "/other", "ws://127.0.0.1:9000"));

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::InvalidAddress {
            field: "listener.bind_address".into(),
            value: "nowhere".into(),
        }));
        assert!(errors.iter().any(|e| e.to_string().starts_with("admin.api_key")));
        assert!(errors.iter().any(|e| e.to_string().starts_with("proxies[0].path")));
        assert!(errors.iter().any(|e| e.to_string().starts_with("proxies[0].backend_url")));
        assert!(errors.contains(&ValidationError::Duplicate {
            field: "name",
            value: "chat".into(),
        }));
    }

    #[test]
    fn empty_proxy_list_is_rejected() {
        let errors = validate_config(&ProxyConfig::default()).unwrap_err();
        assert_eq!(errors, vec![ValidationError::NoProxies]);
    }

    #[test]
    fn trailing_slash_paths_collide() {
        let mut config = ProxyConfig::default();
        config.proxies.push(route("a", "/ws", "ws://127.0.0.1:9000"));
        config.proxies.push(route("b", "/ws/", "ws://127.0.0.1:9001"));
        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::Duplicate { field: "path", .. }));
    }
}
