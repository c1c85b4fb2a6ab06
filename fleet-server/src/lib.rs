//! Fleet server library
//!
//! Control plane for a fleet of locally supervised backend instances: the
//! instance manifest, lifecycle script gateway, health monitor, backup/restore
//! and the per-instance request proxy.

pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::AppConfig;
pub use error::AppError;
pub use state::AppState;
