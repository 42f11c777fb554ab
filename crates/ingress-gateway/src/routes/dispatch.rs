//! Catch-all handler: every request that is not a gateway endpoint runs
//! resolve → rate limit → authenticate → forward, in that order.

use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use ingress_auth::{AuthOutcome, Principal, RotatedCredentials};

use crate::credentials;
use crate::error::GatewayError;
use crate::metrics::{AUTH_OUTCOMES, RATE_LIMITED_TOTAL, REQUESTS_TOTAL, UNMATCHED_TOTAL};
use crate::proxy;
use crate::rate_limit::limiter_key;
use crate::route_table::ServiceRoute;
use crate::state::AppState;

/// What the auth stage hands to the forwarder.
#[derive(Debug, Default)]
struct Admission {
    principal: Option<Principal>,
    rotated: Option<RotatedCredentials>,
}

pub async fn dispatch(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    let expose = state.expose_details();

    let Some(route) = state.routes.resolve(req.path()) else {
        UNMATCHED_TOTAL.inc();
        let available: Vec<String> = state
            .routes
            .routes()
            .iter()
            .map(|r| format!("{} -> {}", r.prefix, r.name))
            .collect();
        tracing::warn!(
            method = %req.method(),
            path = %req.path(),
            available = ?available,
            "no route matches request"
        );
        return finish(
            "unmatched",
            GatewayError::RouteNotFound {
                path: req.path().to_string(),
            }
            .to_response(expose),
        );
    };

    let key = limiter_key(route, req.peer_addr().map(|addr| addr.ip()));
    if !state.limiter.admit(&key) {
        RATE_LIMITED_TOTAL
            .with_label_values(&[route.name.as_str()])
            .inc();
        tracing::debug!(service = %route.name, key = %key, "rate limit exceeded");
        return finish(
            &route.name,
            GatewayError::RateLimited {
                service: route.name.clone(),
            }
            .to_response(expose),
        );
    }

    let admission = match authenticate(&req, &state, route) {
        Ok(admission) => admission,
        Err(response) => return finish(&route.name, response),
    };

    let mut response = match proxy::forward(
        &state.http_client,
        &req,
        route,
        body,
        admission.principal.as_ref(),
    )
    .await
    {
        Ok(response) => response,
        Err(e) => e.to_response(expose),
    };

    if let Some(rotated) = &admission.rotated {
        if let Err(e) = credentials::attach_rotated(&mut response, rotated, &state.cookies) {
            tracing::error!(error = %e, "failed to attach rotated credentials");
        }
    }

    finish(&route.name, response)
}

/// Run the auth gate for `route`. Public routes are admitted without a principal.
fn authenticate(
    req: &HttpRequest,
    state: &AppState,
    route: &ServiceRoute,
) -> Result<Admission, HttpResponse> {
    if route.public {
        return Ok(Admission::default());
    }

    let outcome = state.gate.authenticate(&credentials::presented(req));
    AUTH_OUTCOMES.with_label_values(&[outcome.label()]).inc();
    let clears = outcome.clears_credentials();

    match outcome {
        AuthOutcome::Admitted {
            principal,
            via,
            rotated,
        } => {
            tracing::debug!(
                service = %route.name,
                user_id = %principal.user_id,
                via = via.as_str(),
                "request admitted"
            );
            req.extensions_mut().insert(principal.clone());
            Ok(Admission {
                principal: Some(principal),
                rotated,
            })
        }
        AuthOutcome::Rejected(failure) => {
            tracing::debug!(service = %route.name, reason = failure.as_str(), "request rejected");

            let mut response = GatewayError::from(failure).to_response(state.expose_details());
            if clears {
                if let Err(e) = credentials::clear(&mut response, &state.cookies) {
                    tracing::error!(error = %e, "failed to attach credential removal cookies");
                }
            }
            Err(response)
        }
    }
}

fn finish(route: &str, response: HttpResponse) -> HttpResponse {
    REQUESTS_TOTAL
        .with_label_values(&[route, response.status().as_str()])
        .inc();
    response
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.default_service(web::to(dispatch));
}
