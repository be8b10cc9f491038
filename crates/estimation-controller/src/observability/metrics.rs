//! Metrics definitions for the estimation controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `ec_` prefix for the estimation controller
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `event`: 4 values (joined, left, voted, reset)
//! - `status`: 2 values (ok, error)
//! - `actor_type`: 3 values (registry, session, connection)
//!
//! Session and participant identifiers are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus metrics recorder and return the handle for
/// serving metrics via HTTP.
///
/// Must be called before any metrics are recorded. Configures histogram
/// buckets for event processing latency (in-memory work plus mailbox
/// enqueues, so sub-second by a wide margin).
///
/// # Errors
///
/// Returns an error if the recorder fails to install (e.g., already
/// installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("ec_event".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set event latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Session & Participant Metrics (Gauges)
// ============================================================================

/// Set the number of active sessions.
///
/// Metric: `ec_sessions_active`
/// Labels: none
///
/// Updated by the actor system when sessions are created/removed.
pub fn set_sessions_active(count: u64) {
    // u64 to f64 conversion is safe for realistic session counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("ec_sessions_active").set(count as f64);
}

/// Set the number of participants present across all sessions.
///
/// Metric: `ec_participants_active`
/// Labels: none
///
/// Updated by session actors on joins, leaves, and teardown.
pub fn set_participants_active(count: u64) {
    // u64 to f64 conversion is safe for realistic participant counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("ec_participants_active").set(count as f64);
}

/// Set the registry actor's mailbox depth.
///
/// Metric: `ec_registry_mailbox_depth`
/// Labels: none
///
/// The registry is a singleton, so its depth exports cleanly; per-session
/// and per-connection depths are tracked by `MailboxMonitor` logging.
pub fn set_registry_mailbox_depth(depth: usize) {
    // usize to f64 conversion is safe for realistic mailbox depths
    #[allow(clippy::cast_precision_loss)]
    gauge!("ec_registry_mailbox_depth").set(depth as f64);
}

// ============================================================================
// Round & Delivery Metrics (Counters)
// ============================================================================

/// Record a completed estimation round (every participant voted).
///
/// Metric: `ec_estimations_total`
/// Labels: none
pub fn increment_estimations() {
    counter!("ec_estimations_total").increment(1);
}

/// Record a view delivery outcome.
///
/// Metric: `ec_deliveries_total`
/// Labels: `status` (ok, error)
///
/// Cardinality: 2
///
/// An `error` delivery means the transport side of a connection was gone;
/// the connection adapter turns that into a LEFT event.
pub fn record_delivery(status: &str) {
    counter!("ec_deliveries_total", "status" => status.to_string()).increment(1);
}

/// Record an actor panic event.
///
/// Metric: `ec_actor_panics_total`
/// Labels: `actor_type` (registry, session, connection)
///
/// ALERT: Any non-zero value indicates a bug and should trigger
/// investigation.
pub fn record_actor_panic(actor_type: &str) {
    counter!("ec_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

// ============================================================================
// Latency Metrics (Histograms)
// ============================================================================

/// Record session event processing latency.
///
/// Metric: `ec_event_latency_seconds`
/// Labels: `event` (joined, left, voted, reset)
///
/// Cardinality: 4
///
/// Covers roster mutation plus fan-out enqueueing for one event.
pub fn record_event_latency(event: &str, duration: Duration) {
    histogram!("ec_event_latency_seconds", "event" => event.to_string())
        .record(duration.as_secs_f64());
}
