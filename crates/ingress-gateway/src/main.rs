use actix_web::{middleware::Logger, web, App, HttpServer};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ingress_gateway::{config::GatewayConfig, metrics::register_metrics, routes, state::AppState};

const LIMITER_HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    let port = config.port;
    let allowed_origins = config.allowed_origins.clone();
    let max_body_bytes = config.max_body_bytes;
    let shutdown_timeout = config.shutdown_timeout_secs;

    tracing::info!("Starting ingress-gateway on port {}", port);
    tracing::info!(
        "Environment: {:?}, rate limit: {} req/min per route and client",
        config.environment,
        config.rate_limit_rpm
    );

    let state = match AppState::new(config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Failed to initialize gateway: {e}");
            std::process::exit(1);
        }
    };

    for route in state.routes.routes() {
        tracing::info!(
            "Route {} -> {} ({}){}",
            route.prefix,
            route.name,
            route.target,
            if route.public { " [public]" } else { "" }
        );
    }

    if let Err(e) = register_metrics() {
        tracing::warn!("Failed to register metrics: {e}");
    }

    let limiter = state.limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(LIMITER_HOUSEKEEPING_INTERVAL);
        loop {
            interval.tick().await;
            limiter.housekeeping();
        }
    });

    let state_data = web::Data::new(state);

    HttpServer::new(move || {
        let cors = ingress_gateway::cors::build_cors(&allowed_origins);

        App::new()
            .app_data(state_data.clone())
            .app_data(web::PayloadConfig::new(max_body_bytes))
            .wrap(cors)
            .wrap(Logger::default())
            .configure(routes::health::configure)
            .configure(routes::dispatch::configure)
    })
    .shutdown_timeout(shutdown_timeout)
    .bind(("0.0.0.0", port))?
    .run()
    .await?;

    tracing::info!("ingress-gateway stopped");
    Ok(())
}
