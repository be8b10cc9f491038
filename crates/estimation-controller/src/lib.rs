//! Estimation Controller (EC) Service Library
//!
//! This library provides the core functionality of the estimation
//! controller - a stateful session broadcast engine responsible for:
//!
//! - Real-time estimation session coordination and participant state
//! - Vote collection with concealment until a round completes
//! - Per-recipient view fan-out (each participant sees their own vote)
//! - Aggregate calculation (average, median, recommendation) over a scale
//! - Idle session expiry and graceful shutdown
//!
//! # Architecture
//!
//! The EC uses an actor model hierarchy:
//!
//! ```text
//! SessionRegistryActor (singleton per EC instance)
//! └── supervises N SessionActors
//!     └── SessionActor (one per estimation session)
//!         ├── owns the participant roster and round state
//!         └── supervises N ConnectionActors
//!             └── ConnectionActor (one per participant connection)
//! ```
//!
//! # Key Design Decisions
//!
//! - **One connection per participant seat**: joining under a live name
//!   displaces the previous connection instead of rejecting the join
//! - **Votes are concealed**: individual votes stay hidden until every
//!   present participant has voted, then the round reveals with aggregates
//! - **Sessions expire**: a session with no event traffic for the
//!   configured idle window notifies participants and removes itself
//!
//! # Modules
//!
//! - [`actors`] - Actor model implementation
//! - [`aggregate`] - Round statistics (average, median, recommendation)
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with appropriate error codes
//! - [`observability`] - Health endpoints and Prometheus metrics
//! - [`scale`] - The estimation scale catalog

pub mod actors;
pub mod aggregate;
pub mod config;
pub mod errors;
pub mod observability;
pub mod scale;
