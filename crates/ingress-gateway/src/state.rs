use ingress_auth::{AuthGate, TokenIssuer};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::config::{ConfigError, GatewayConfig};
use crate::credentials::CookiePolicy;
use crate::rate_limit::{KeyedRateLimiter, RateLimiter};
use crate::route_table::RouteTable;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub routes: Arc<RouteTable>,
    pub gate: Arc<AuthGate>,
    pub limiter: Arc<dyn RateLimiter>,
    pub cookies: CookiePolicy,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(mut config: GatewayConfig) -> Result<Self, ConfigError> {
        // Move key material out of the config so only the issuer holds it.
        let access_secret = std::mem::take(&mut config.access_secret);
        let refresh_secret = std::mem::take(&mut config.refresh_secret);
        let issuer = TokenIssuer::new(&access_secret, &refresh_secret)?;

        let routes = RouteTable::new(config.routes.clone())?;

        let rpm = NonZeroU32::new(config.rate_limit_rpm).ok_or(ConfigError::InvalidValue {
            key: "RATE_LIMIT_RPM",
            value: config.rate_limit_rpm.to_string(),
        })?;

        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none()) // Redirects go back to the client
            .build()?;

        let cookies = CookiePolicy::new(
            config.environment.is_production(),
            config.cookie_domain.clone(),
        );

        Ok(Self {
            config: Arc::new(config),
            routes: Arc::new(routes),
            gate: Arc::new(AuthGate::new(issuer)),
            limiter: Arc::new(KeyedRateLimiter::per_minute(rpm)),
            cookies,
            http_client,
        })
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Whether error bodies may carry internal details.
    pub fn expose_details(&self) -> bool {
        !self.config.environment.is_production()
    }
}
