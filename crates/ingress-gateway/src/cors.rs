//! CORS configuration for the gateway binary.

use actix_cors::Cors;
use actix_web::http::header::{self, HeaderName};

use crate::credentials::{ACCESS_TOKEN_HEADER, REFRESH_TOKEN_HEADER};

/// Build the CORS middleware from allowed origins.
///
/// Credentialed requests are allowed (cookies carry the credentials), and the
/// rotated credential headers are exposed to browser scripts. A wildcard
/// origin is only accepted outside production; config validation rejects it
/// otherwise.
pub fn build_cors(allowed_origins: &[String]) -> Cors {
    let allowed = allowed_origins.to_vec();
    Cors::default()
        .allowed_origin_fn(move |origin, _req_head| {
            let origin_str = origin.to_str().unwrap_or("");
            allowed.iter().any(|a| a == "*" || a == origin_str)
        })
        .allowed_methods(vec![
            "GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS",
        ])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::ACCEPT,
            header::CONTENT_TYPE,
            HeaderName::from_static(ACCESS_TOKEN_HEADER),
            HeaderName::from_static(REFRESH_TOKEN_HEADER),
            HeaderName::from_static("x-requested-with"),
            HeaderName::from_static("apollo-require-preflight"),
        ])
        .expose_headers(vec![
            HeaderName::from_static(ACCESS_TOKEN_HEADER),
            HeaderName::from_static(REFRESH_TOKEN_HEADER),
        ])
        .supports_credentials()
        .max_age(3600)
}
