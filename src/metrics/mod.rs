//! Metrics and monitoring for the social arena service
//!
//! Prometheus collectors for transport, game and store activity, plus the
//! HTTP server that exposes them alongside health probes.

pub mod collector;
pub mod health;

pub use collector::{GameMetrics, MetricsCollector, MetricsTimer, StoreMetrics, TransportMetrics};
pub use health::{HealthServer, HealthServerState};
