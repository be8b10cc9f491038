//! Observability for the estimation controller.
//!
//! Health probes and Prometheus metrics. Instrumentation uses
//! `#[instrument(skip_all)]` with explicit field allow-listing, and metric
//! labels are bounded (no session ids or participant names) to keep
//! cardinality flat.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `ec_sessions_active` | Gauge | none | Currently registered sessions |
//! | `ec_participants_active` | Gauge | none | Participants present across sessions |
//! | `ec_estimations_total` | Counter | none | Completed estimation rounds |
//! | `ec_deliveries_total` | Counter | `status` | View delivery outcomes |
//! | `ec_event_latency_seconds` | Histogram | `event` | Session event processing latency |
//! | `ec_registry_mailbox_depth` | Gauge | none | Registry backpressure indicator |
//! | `ec_actor_panics_total` | Counter | `actor_type` | Actor panics (always a bug) |

pub mod health;
pub mod metrics;

// Re-exports for convenience
pub use health::{health_router, HealthState};
pub use metrics::{
    increment_estimations, init_metrics_recorder, record_actor_panic, record_delivery,
    record_event_latency, set_participants_active, set_registry_mailbox_depth,
    set_sessions_active,
};
