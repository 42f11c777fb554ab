pub mod config;
pub mod cors;
pub mod credentials;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod rate_limit;
pub mod route_table;
pub mod routes;
pub mod state;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use route_table::{RouteTable, ServiceRoute};
pub use state::AppState;
