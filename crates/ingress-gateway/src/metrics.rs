use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Dispatch outcomes, labelled by route name ("unmatched" when nothing matched)
pub static REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("ingress_requests_total", "Total number of requests handled"),
        &["route", "status"],
    )
    .unwrap()
});

pub static UNMATCHED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ingress_unmatched_total",
        "Requests whose path matched no configured route",
    )
    .unwrap()
});

pub static RATE_LIMITED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("ingress_rate_limited_total", "Requests rejected by the rate limiter"),
        &["route"],
    )
    .unwrap()
});

// Auth gate outcomes: access_token, refreshed, no_credentials, invalid_credentials, internal_error
pub static AUTH_OUTCOMES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("ingress_auth_outcomes_total", "Authentication gate outcomes"),
        &["outcome"],
    )
    .unwrap()
});

// Proxy metrics
pub static PROXY_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ingress_proxy_requests_total",
            "Backend responses by service and status",
        ),
        &["service", "status"],
    )
    .unwrap()
});

pub static PROXY_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("ingress_proxy_failures_total", "Failed backend round trips"),
        &["service", "kind"],
    )
    .unwrap()
});

pub static PROXY_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "ingress_proxy_latency_seconds",
            "Time until backend response headers arrive",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["service"],
    )
    .unwrap()
});

/// Register all metrics with the registry. Fails if called twice.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UNMATCHED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RATE_LIMITED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(AUTH_OUTCOMES.clone()))?;
    REGISTRY.register(Box::new(PROXY_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PROXY_FAILURES.clone()))?;
    REGISTRY.register(Box::new(PROXY_LATENCY.clone()))?;
    Ok(())
}
