use actix_web::{web, HttpRequest, HttpResponse};
use ingress_auth::security::{bearer_token, constant_time_eq};

use crate::metrics::REGISTRY;
use crate::state::AppState;

/// GET /health - Liveness plus the configured services
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let services: Vec<serde_json::Value> = state
        .routes
        .routes()
        .iter()
        .map(|route| {
            serde_json::json!({
                "name": route.name,
                "path": route.prefix,
                "target": route.target.as_str(),
                "public": route.public,
            })
        })
        .collect();

    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "ingress-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "services": services,
    }))
}

/// GET /metrics - Prometheus metrics endpoint (optionally auth-gated)
pub async fn metrics(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Some(ref expected_token) = state.config.metrics_token {
        let authorized = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .map(|token| constant_time_eq(token.as_bytes(), expected_token.as_bytes()))
            .unwrap_or(false);

        if !authorized {
            return HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "Unauthorized",
                "message": "Valid Bearer token required for /metrics"
            }));
        }
    }

    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return HttpResponse::InternalServerError().body("Failed to encode metrics");
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics));
}
