//! Service layer for the social arena
//!
//! Application state, listener lifecycle, and health reporting.

pub mod app;
pub mod health;

pub use app::{AppState, ServiceError};
pub use health::{ComponentCheck, HealthCheck, HealthStatus, ServiceStats};
