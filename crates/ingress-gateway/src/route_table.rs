//! Static path-prefix routing to backend services.
//!
//! The table is built once at startup, sorted by descending prefix length
//! (registration order breaks ties) and never mutated afterwards, so the first
//! structural match found while scanning is always the most specific one.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default backend deadline when a route does not configure one.
pub const DEFAULT_ROUTE_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteTableError {
    #[error("route '{name}' has an empty path prefix")]
    EmptyPrefix { name: String },

    #[error("route '{name}' prefix '{prefix}' must start with '/'")]
    InvalidPrefix { name: String, prefix: String },

    #[error("routes '{first}' and '{second}' share the path prefix '{prefix}'")]
    DuplicatePrefix {
        prefix: String,
        first: String,
        second: String,
    },

    #[error("route name '{0}' is used more than once")]
    DuplicateName(String),

    #[error("route '{name}' has an invalid target '{target}': {reason}")]
    InvalidTarget {
        name: String,
        target: String,
        reason: String,
    },
}

/// One backend mapping, immutable for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRoute {
    pub name: String,
    /// Backend URL. Only its origin is used unless `strip_prefix` is set,
    /// in which case a path on it becomes the base of every forwarded path.
    pub target: Url,
    pub prefix: String,
    pub timeout: Duration,
    /// Remove the matched prefix and append the rest to `target`, base path included.
    pub strip_prefix: bool,
    /// Skip the authentication gate for this route.
    pub public: bool,
}

impl ServiceRoute {
    /// Build a route. The target must be an absolute `http`/`https` URL.
    /// A trailing `/` on the prefix is dropped (except for the root prefix).
    pub fn new(
        name: impl Into<String>,
        target: &str,
        prefix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RouteTableError> {
        let name = name.into();
        let invalid = |reason: String| RouteTableError::InvalidTarget {
            name: name.clone(),
            target: target.to_string(),
            reason,
        };

        let parsed = Url::parse(target).map_err(|e| invalid(e.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(invalid("scheme must be http or https".to_string()));
        }
        if parsed.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        if parsed.query().is_some() || parsed.fragment().is_some() {
            return Err(invalid("query and fragment are not allowed".to_string()));
        }

        Ok(Self {
            name,
            target: parsed,
            prefix: normalize_prefix(prefix.into()),
            timeout,
            strip_prefix: false,
            public: false,
        })
    }

    pub fn with_strip_prefix(mut self, strip: bool) -> Self {
        self.strip_prefix = strip;
        self
    }

    pub fn with_public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    /// Segment-aligned prefix test: `/users` matches `/users` and
    /// `/users/42` but not `/usersx`.
    pub fn matches(&self, path: &str) -> bool {
        self.remainder(path).is_some()
    }

    /// The part of `path` after the prefix, if the prefix matches.
    pub fn remainder<'p>(&self, path: &'p str) -> Option<&'p str> {
        if self.prefix == "/" {
            return path.starts_with('/').then_some(path);
        }
        let rest = path.strip_prefix(self.prefix.as_str())?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }

    /// Backend URL for an inbound `path` and optional raw `query`.
    pub fn target_url(&self, path: &str, query: Option<&str>) -> String {
        let mut url = if self.strip_prefix {
            format!(
                "{}{}",
                self.target.as_str().trim_end_matches('/'),
                self.remainder(path).unwrap_or(path)
            )
        } else {
            format!("{}{}", self.origin(), path)
        };
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(q);
        }
        url
    }

    /// `scheme://host[:port]` of the backend, for logs and error bodies.
    pub fn origin(&self) -> String {
        self.target.origin().ascii_serialization()
    }
}

fn normalize_prefix(prefix: String) -> String {
    let trimmed = prefix.trim();
    if trimmed.len() > 1 {
        trimmed.trim_end_matches('/').to_string()
    } else {
        trimmed.to_string()
    }
}

/// Read-only, longest-prefix-first collection of [`ServiceRoute`]s.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<ServiceRoute>,
}

impl RouteTable {
    pub fn new(routes: Vec<ServiceRoute>) -> Result<Self, RouteTableError> {
        let mut by_prefix: HashMap<&str, &str> = HashMap::new();
        let mut names: HashMap<&str, ()> = HashMap::new();

        for route in &routes {
            if route.prefix.is_empty() {
                return Err(RouteTableError::EmptyPrefix {
                    name: route.name.clone(),
                });
            }
            if !route.prefix.starts_with('/') {
                return Err(RouteTableError::InvalidPrefix {
                    name: route.name.clone(),
                    prefix: route.prefix.clone(),
                });
            }
            if names.insert(route.name.as_str(), ()).is_some() {
                return Err(RouteTableError::DuplicateName(route.name.clone()));
            }
            if let Some(first) = by_prefix.insert(route.prefix.as_str(), route.name.as_str()) {
                return Err(RouteTableError::DuplicatePrefix {
                    prefix: route.prefix.clone(),
                    first: first.to_string(),
                    second: route.name.clone(),
                });
            }
        }

        let mut indexed: Vec<(usize, ServiceRoute)> = routes.into_iter().enumerate().collect();
        indexed.sort_by_key(|(registered, route)| (Reverse(route.prefix.len()), *registered));

        Ok(Self {
            routes: indexed.into_iter().map(|(_, route)| route).collect(),
        })
    }

    /// Most specific route whose prefix structurally matches `path`.
    pub fn resolve(&self, path: &str) -> Option<&ServiceRoute> {
        self.routes.iter().find(|route| route.matches(path))
    }

    /// Routes in match order.
    pub fn routes(&self) -> &[ServiceRoute] {
        &self.routes
    }

    pub fn get(&self, name: &str) -> Option<&ServiceRoute> {
        self.routes.iter().find(|route| route.name == name)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
