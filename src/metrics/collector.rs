//! Metrics collection using Prometheus
//!
//! Counters and histograms for the transport, the match lifecycle and the
//! persistence store, registered on a private registry.

use crate::types::{QueueMode, RoundType};
use anyhow::Result;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the arena service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Connection and framing metrics
    transport_metrics: TransportMetrics,

    /// Queue, match and round metrics
    game_metrics: GameMetrics,

    /// Persistence store metrics
    store_metrics: StoreMetrics,
}

/// Connection and framing metrics
#[derive(Clone)]
pub struct TransportMetrics {
    /// Connections accepted after a successful handshake
    pub connections_total: IntCounter,

    /// Connections currently registered
    pub active_connections: IntGauge,

    /// Upgrade requests rejected before a connection was registered
    pub upgrades_rejected_total: IntCounter,

    /// Inbound frames rejected, by reason
    pub frames_rejected_total: IntCounterVec,
}

/// Queue, match and round metrics
#[derive(Clone)]
pub struct GameMetrics {
    /// Queue joins by mode
    pub queue_joins_total: IntCounterVec,

    /// Matches created, by source (queue or admin)
    pub matches_created_total: IntCounterVec,

    /// Answer submissions, by status (accepted or rejected)
    pub answers_total: IntCounterVec,

    /// Rounds resolved, by round type
    pub rounds_resolved_total: IntCounterVec,

    /// Matches that reached the final round
    pub matches_completed_total: IntCounter,
}

/// Persistence store metrics
#[derive(Clone)]
pub struct StoreMetrics {
    /// Store request latency by command and status
    pub request_duration_seconds: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with a custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let transport_metrics = TransportMetrics::new(&registry)?;
        let game_metrics = GameMetrics::new(&registry)?;
        let store_metrics = StoreMetrics::new(&registry)?;

        Ok(Self {
            registry,
            transport_metrics,
            game_metrics,
            store_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn transport(&self) -> &TransportMetrics {
        &self.transport_metrics
    }

    pub fn game(&self) -> &GameMetrics {
        &self.game_metrics
    }

    pub fn store(&self) -> &StoreMetrics {
        &self.store_metrics
    }

    /// Record a connection registered after the handshake
    pub fn record_connection_opened(&self) {
        self.transport_metrics.connections_total.inc();
        self.transport_metrics.active_connections.inc();
    }

    /// Record a registered connection going away
    pub fn record_connection_closed(&self) {
        self.transport_metrics.active_connections.dec();
    }

    pub fn record_upgrade_rejected(&self) {
        self.transport_metrics.upgrades_rejected_total.inc();
    }

    pub fn record_frame_rejected(&self, reason: &str) {
        self.transport_metrics
            .frames_rejected_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn record_queue_join(&self, mode: QueueMode) {
        let mode_str = match mode {
            QueueMode::Free => "free",
            QueueMode::Paid => "paid",
        };

        self.game_metrics
            .queue_joins_total
            .with_label_values(&[mode_str])
            .inc();
    }

    /// Record a match being created; `source` is `queue` or `admin`
    pub fn record_match_created(&self, source: &str) {
        self.game_metrics
            .matches_created_total
            .with_label_values(&[source])
            .inc();
    }

    pub fn record_answer(&self, accepted: bool) {
        let status = if accepted { "accepted" } else { "rejected" };
        self.game_metrics
            .answers_total
            .with_label_values(&[status])
            .inc();
    }

    pub fn record_round_resolved(&self, round_type: RoundType) {
        self.game_metrics
            .rounds_resolved_total
            .with_label_values(&[round_type.as_str()])
            .inc();
    }

    pub fn record_match_completed(&self) {
        self.game_metrics.matches_completed_total.inc();
    }

    /// Record one round-trip to the persistence store
    pub fn record_store_request(&self, command: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };
        self.store_metrics
            .request_duration_seconds
            .with_label_values(&[command, status])
            .observe(duration.as_secs_f64());
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl TransportMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let connections_total = IntCounter::new(
            "social_arena_connections_total",
            "Total WebSocket connections accepted",
        )?;
        registry.register(Box::new(connections_total.clone()))?;

        let active_connections = IntGauge::new(
            "social_arena_active_connections",
            "WebSocket connections currently registered",
        )?;
        registry.register(Box::new(active_connections.clone()))?;

        let upgrades_rejected_total = IntCounter::new(
            "social_arena_upgrades_rejected_total",
            "Upgrade requests rejected",
        )?;
        registry.register(Box::new(upgrades_rejected_total.clone()))?;

        let frames_rejected_total = IntCounterVec::new(
            Opts::new(
                "social_arena_frames_rejected_total",
                "Inbound frames rejected",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(frames_rejected_total.clone()))?;

        Ok(Self {
            connections_total,
            active_connections,
            upgrades_rejected_total,
            frames_rejected_total,
        })
    }
}

impl GameMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let queue_joins_total = IntCounterVec::new(
            Opts::new("social_arena_queue_joins_total", "Total queue joins"),
            &["mode"],
        )?;
        registry.register(Box::new(queue_joins_total.clone()))?;

        let matches_created_total = IntCounterVec::new(
            Opts::new("social_arena_matches_created_total", "Total matches created"),
            &["source"],
        )?;
        registry.register(Box::new(matches_created_total.clone()))?;

        let answers_total = IntCounterVec::new(
            Opts::new("social_arena_answers_total", "Total answer submissions"),
            &["status"],
        )?;
        registry.register(Box::new(answers_total.clone()))?;

        let rounds_resolved_total = IntCounterVec::new(
            Opts::new("social_arena_rounds_resolved_total", "Total rounds resolved"),
            &["round_type"],
        )?;
        registry.register(Box::new(rounds_resolved_total.clone()))?;

        let matches_completed_total = IntCounter::new(
            "social_arena_matches_completed_total",
            "Total matches completed",
        )?;
        registry.register(Box::new(matches_completed_total.clone()))?;

        Ok(Self {
            queue_joins_total,
            matches_created_total,
            answers_total,
            rounds_resolved_total,
            matches_completed_total,
        })
    }
}

impl StoreMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "social_arena_store_request_duration_seconds",
                "Persistence store request duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
            &["command", "status"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        Ok(Self {
            request_duration_seconds,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}
