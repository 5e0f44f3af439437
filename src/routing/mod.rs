//! Path-prefix route table.
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Longest prefix wins; prefixes match whole path segments only
//! - Path matching is case-sensitive
//! - Explicit no-match rather than a silent default

/// Routes keyed by path prefix.
#[derive(Debug, Clone)]
pub struct RouteTable<T> {
    /// Sorted by prefix length, longest first.
    entries: Vec<(String, T)>,
}

impl<T> RouteTable<T> {
    pub fn new(routes: impl IntoIterator<Item = (String, T)>) -> Self {
        let mut entries: Vec<(String, T)> = routes
            .into_iter()
            .map(|(prefix, route)| (normalize(&prefix), route))
            .collect();
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { entries }
    }

    /// Find the route serving `path`.
    pub fn match_path(&self, path: &str) -> Option<&T> {
        self.entries
            .iter()
            .find(|(prefix, _)| prefix_matches(prefix, path))
            .map(|(_, route)| route)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, route)| route)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize(prefix: &str) -> String {
    prefix.trim_end_matches('/').to_string()
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
