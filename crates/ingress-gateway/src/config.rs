use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::route_table::{RouteTableError, ServiceRoute};

const DEFAULT_PORT: u16 = 3002;
const DEFAULT_RATE_LIMIT_RPM: u32 = 100;
const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3001";
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_TIMEOUT_MS: u64 = 5000;
const MIN_SECRET_BYTES: usize = 32;

/// Built-in services: (name, target override variable, default target, prefix, public).
const BUILTIN_ROUTES: &[(&str, &str, &str, &str, bool)] = &[
    (
        "AuthService",
        "AUTH_SERVICE_URL",
        "http://auth_service:8000",
        "/auth",
        true,
    ),
    (
        "UserService",
        "USER_SERVICE_URL",
        "http://nestjs_service:3000",
        "/users",
        false,
    ),
    (
        "ChannelService",
        "CHANNEL_SERVICE_URL",
        "http://channel-service:3005",
        "/channels",
        false,
    ),
    (
        "RecommendationService",
        "RECOMMENDATION_SERVICE_URL",
        "http://recomsubscription-service:3006",
        "/recommendation",
        false,
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

/// One entry of the `ROUTES_PATH` JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteSpec {
    pub name: String,
    pub target: String,
    pub prefix: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub strip_prefix: bool,
    #[serde(default)]
    pub public: bool,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl RouteSpec {
    pub fn into_route(self) -> Result<ServiceRoute, RouteTableError> {
        Ok(ServiceRoute::new(
            self.name,
            &self.target,
            self.prefix,
            Duration::from_millis(self.timeout_ms),
        )?
        .with_strip_prefix(self.strip_prefix)
        .with_public(self.public))
    }
}

#[derive(Clone)]
pub struct GatewayConfig {
    /// Signing key for access credentials
    pub access_secret: Vec<u8>,
    /// Signing key for refresh credentials
    pub refresh_secret: Vec<u8>,
    pub port: u16,
    pub environment: Environment,
    /// Service routes in registration order
    pub routes: Vec<ServiceRoute>,
    /// Per (route, client) requests per minute
    pub rate_limit_rpm: u32,
    pub allowed_origins: Vec<String>,
    /// `Domain` attribute for credential cookies (None = host-only)
    pub cookie_domain: Option<String>,
    /// Bearer token required for /metrics endpoint (None = public)
    pub metrics_token: Option<String>,
    pub shutdown_timeout_secs: u64,
    pub max_body_bytes: usize,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("access_secret", &"[REDACTED]")
            .field("refresh_secret", &"[REDACTED]")
            .field("port", &self.port)
            .field("environment", &self.environment)
            .field("routes", &self.routes)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field("allowed_origins", &self.allowed_origins)
            .field("cookie_domain", &self.cookie_domain)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("shutdown_timeout_secs", &self.shutdown_timeout_secs)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

impl GatewayConfig {
    /// Config with every optional setting at its default.
    pub fn new(access_secret: &[u8], refresh_secret: &[u8], routes: Vec<ServiceRoute>) -> Self {
        Self {
            access_secret: access_secret.to_vec(),
            refresh_secret: refresh_secret.to_vec(),
            port: DEFAULT_PORT,
            environment: Environment::Development,
            routes,
            rate_limit_rpm: DEFAULT_RATE_LIMIT_RPM,
            allowed_origins: vec![DEFAULT_ALLOWED_ORIGIN.to_string()],
            cookie_domain: None,
            metrics_token: None,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from any key/value source. `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // Required: independent signing keys
        let access_secret = var("JWT_SECRET_KEY")
            .ok_or(ConfigError::MissingRequired("JWT_SECRET_KEY"))?
            .into_bytes();
        let refresh_secret = var("JWT_REFRESH_SECRET_KEY")
            .ok_or(ConfigError::MissingRequired("JWT_REFRESH_SECRET_KEY"))?
            .into_bytes();
        for (name, secret) in [
            ("JWT_SECRET_KEY", &access_secret),
            ("JWT_REFRESH_SECRET_KEY", &refresh_secret),
        ] {
            if secret.len() < MIN_SECRET_BYTES {
                tracing::warn!(
                    "{name} is short ({} bytes, recommended minimum {MIN_SECRET_BYTES}); \
                     generate one with `openssl rand -hex 32`",
                    secret.len()
                );
            }
        }

        let port = match var("PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key: "PORT", value: raw })?,
            None => DEFAULT_PORT,
        };

        let environment = var("GATEWAY_ENV")
            .or_else(|| var("NODE_ENV"))
            .map(|v| Environment::parse(&v))
            .unwrap_or(Environment::Development);

        let routes = match var("ROUTES_PATH") {
            Some(path) => load_routes_file(PathBuf::from(path))?,
            None => builtin_routes(&var)?,
        };

        let rate_limit_rpm = match var("RATE_LIMIT_RPM") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|rpm| *rpm > 0)
                .ok_or(ConfigError::InvalidValue {
                    key: "RATE_LIMIT_RPM",
                    value: raw,
                })?,
            None => DEFAULT_RATE_LIMIT_RPM,
        };

        let allowed_origins: Vec<String> = var("ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| vec![DEFAULT_ALLOWED_ORIGIN.to_string()]);

        if environment.is_production() && allowed_origins.iter().any(|o| o == "*") {
            tracing::error!(
                "Wildcard CORS origin '*' cannot be combined with credentialed requests in production. \
                 Specify explicit origins in ALLOWED_ORIGINS."
            );
            return Err(ConfigError::InvalidValue {
                key: "ALLOWED_ORIGINS",
                value: "*".to_string(),
            });
        }

        let cookie_domain = var("COOKIE_DOMAIN");
        let metrics_token = var("METRICS_TOKEN");

        let shutdown_timeout_secs = var("SHUTDOWN_TIMEOUT_SECS")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS);

        let max_body_bytes = var("MAX_BODY_BYTES")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(DEFAULT_MAX_BODY_BYTES);

        if metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set; /metrics endpoint is publicly accessible");
        }

        Ok(Self {
            access_secret,
            refresh_secret,
            port,
            environment,
            routes,
            rate_limit_rpm,
            allowed_origins,
            cookie_domain,
            metrics_token,
            shutdown_timeout_secs,
            max_body_bytes,
        })
    }
}

fn builtin_routes<F>(var: &F) -> Result<Vec<ServiceRoute>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    BUILTIN_ROUTES
        .iter()
        .map(|(name, url_var, default_target, prefix, public)| {
            let target = var(*url_var).unwrap_or_else(|| default_target.to_string());
            let route = ServiceRoute::new(
                *name,
                target.trim(),
                *prefix,
                Duration::from_millis(DEFAULT_TIMEOUT_MS),
            )?
            .with_public(*public);
            Ok(route)
        })
        .collect()
}

fn load_routes_file(path: PathBuf) -> Result<Vec<ServiceRoute>, ConfigError> {
    let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::RoutesFile {
        path: path.clone(),
        source,
    })?;
    let specs: Vec<RouteSpec> =
        serde_json::from_str(&raw).map_err(|source| ConfigError::RoutesParse {
            path: path.clone(),
            source,
        })?;

    specs
        .into_iter()
        .map(|spec| spec.into_route().map_err(ConfigError::from))
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("failed to read route file {}: {source}", path.display())]
    RoutesFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse route file {}: {source}", path.display())]
    RoutesParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid route configuration: {0}")]
    Routes(#[from] RouteTableError),

    #[error("invalid signing keys: {0}")]
    Keys(#[from] ingress_auth::KeyError),

    #[error("failed to build backend HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
