use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use ingress_auth::AuthFailure;

/// Everything the dispatcher can answer instead of a backend response.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("authentication required")]
    NoCredentials,

    #[error("authentication failed")]
    InvalidCredentials,

    #[error("rate limit exceeded for {service}")]
    RateLimited { service: String },

    #[error("no route for {path}")]
    RouteNotFound { path: String },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("backend {service} unreachable: {detail}")]
    BackendUnreachable {
        service: String,
        target: String,
        detail: String,
    },

    #[error("backend {service} timed out after {timeout_ms}ms")]
    BackendTimeout { service: String, timeout_ms: u64 },

    #[error("backend {service} returned an unusable response: {detail}")]
    MalformedResponse { service: String, detail: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<AuthFailure> for GatewayError {
    fn from(failure: AuthFailure) -> Self {
        match failure {
            AuthFailure::NoCredentials => GatewayError::NoCredentials,
            AuthFailure::InvalidCredentials => GatewayError::InvalidCredentials,
            AuthFailure::Internal(msg) => GatewayError::Internal(msg),
        }
    }
}

impl GatewayError {
    /// Metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::NoCredentials => "no_credentials",
            GatewayError::InvalidCredentials => "invalid_credentials",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::RouteNotFound { .. } => "route_not_found",
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::BackendUnreachable { .. } => "backend_unreachable",
            GatewayError::BackendTimeout { .. } => "backend_timeout",
            GatewayError::MalformedResponse { .. } => "malformed_response",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    fn service(&self) -> Option<&str> {
        match self {
            GatewayError::RateLimited { service }
            | GatewayError::BackendUnreachable { service, .. }
            | GatewayError::BackendTimeout { service, .. }
            | GatewayError::MalformedResponse { service, .. } => Some(service.as_str()),
            _ => None,
        }
    }

    fn message(&self) -> String {
        match self {
            GatewayError::NoCredentials => "Authentication required".to_string(),
            GatewayError::InvalidCredentials => {
                "Authentication failed, please sign in again".to_string()
            }
            GatewayError::RateLimited { .. } => {
                "Too many requests, please try again later".to_string()
            }
            GatewayError::RouteNotFound { path } => {
                format!("No service is configured for {path}")
            }
            GatewayError::BadRequest(msg) => msg.clone(),
            GatewayError::BackendUnreachable { service, .. }
            | GatewayError::MalformedResponse { service, .. } => {
                format!("Unable to proxy request to {service}")
            }
            GatewayError::BackendTimeout {
                service,
                timeout_ms,
            } => format!("{service} did not respond within {timeout_ms}ms"),
            GatewayError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// Internal detail, only rendered outside production.
    fn details(&self) -> Option<String> {
        match self {
            GatewayError::BackendUnreachable { target, detail, .. } => {
                Some(format!("{detail} ({target})"))
            }
            GatewayError::MalformedResponse { detail, .. } | GatewayError::Internal(detail) => {
                Some(detail.clone())
            }
            _ => None,
        }
    }

    /// JSON error response. `expose_details` adds the `details` field.
    pub fn to_response(&self, expose_details: bool) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "{}", self);
        }

        let mut body = serde_json::json!({
            "error": status.canonical_reason().unwrap_or("Error"),
            "message": self.message(),
        });
        if let Some(service) = self.service() {
            body["service"] = serde_json::json!(service);
        }
        if expose_details {
            if let Some(details) = self.details() {
                body["details"] = serde_json::json!(details);
            }
        }

        HttpResponse::build(status).json(body)
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NoCredentials | GatewayError::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::BackendUnreachable { .. } | GatewayError::MalformedResponse { .. } => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::BackendTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        self.to_response(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::MessageBody;

    fn body_json(resp: HttpResponse) -> serde_json::Value {
        let bytes = resp.into_body().try_into_bytes().ok().expect("buffered body");
        serde_json::from_slice(&bytes).unwrap()
    }

    fn unreachable() -> GatewayError {
        GatewayError::BackendUnreachable {
            service: "UserService".to_string(),
            target: "http://nestjs_service:3000".to_string(),
            detail: "connection refused".to_string(),
        }
    }

    #[test]
    fn test_bad_gateway_names_service() {
        let resp = unreachable().to_response(true);
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(resp);
        assert_eq!(body["error"], "Bad Gateway");
        assert_eq!(body["service"], "UserService");
        assert_eq!(body["message"], "Unable to proxy request to UserService");
        assert!(body["details"]
            .as_str()
            .unwrap()
            .contains("connection refused"));
    }

    #[test]
    fn test_production_hides_details() {
        let body = body_json(unreachable().to_response(false));
        assert!(body.get("details").is_none());
        assert!(!body.to_string().contains("nestjs_service"));

        let body = body_json(GatewayError::Internal("key parse failure".into()).to_response(false));
        assert_eq!(body["message"], "An internal error occurred");
        assert!(!body.to_string().contains("key parse failure"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(GatewayError::NoCredentials.status_code(), 401);
        assert_eq!(GatewayError::InvalidCredentials.status_code(), 401);
        assert_eq!(
            GatewayError::RateLimited {
                service: "S".into()
            }
            .status_code(),
            429
        );
        assert_eq!(
            GatewayError::RouteNotFound { path: "/x".into() }.status_code(),
            404
        );
        assert_eq!(
            GatewayError::BackendTimeout {
                service: "S".into(),
                timeout_ms: 5
            }
            .status_code(),
            504
        );
        assert_eq!(GatewayError::BadRequest("x".into()).status_code(), 400);
    }

    #[test]
    fn test_auth_failure_mapping() {
        assert!(matches!(
            GatewayError::from(AuthFailure::InvalidCredentials),
            GatewayError::InvalidCredentials
        ));
        assert!(matches!(
            GatewayError::from(AuthFailure::Internal("boom".into())),
            GatewayError::Internal(_)
        ));
    }
}
