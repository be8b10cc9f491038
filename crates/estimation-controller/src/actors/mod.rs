//! Actor model implementation for session coordination.
//!
//! The actor hierarchy:
//!
//! ```text
//! SessionRegistryActor (singleton per controller instance)
//! └── supervises N SessionActors
//!     └── SessionActor (one per estimation session)
//!         ├── owns the participant roster and round state
//!         └── supervises N ConnectionActors
//!             └── ConnectionActor (one per participant connection)
//! ```
//!
//! Each actor owns its state exclusively and communicates via message
//! passing (mpsc channels). Request/response interactions use oneshot
//! channels carried inside the request message. Shutdown flows down the
//! hierarchy via `CancellationToken` parent/child links, and failures
//! flow up via `JoinHandle` health sweeps.

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod roster;
pub mod session;

pub use connection::ConnectionActorHandle;
pub use messages::{
    CreatedSession, RegistryStatus, SessionEvent, SessionState, SessionStatus, View,
};
pub use metrics::{ActorMetrics, ActorType};
pub use registry::SessionRegistryActorHandle;
pub use session::SessionActorHandle;
