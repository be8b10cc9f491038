//! `SessionRegistryActor` - singleton supervisor for session actors.
//!
//! The `SessionRegistryActor` is the top-level actor in the hierarchy:
//!
//! - Singleton per controller instance
//! - Supervises N `SessionActor` instances
//! - Generates session identifiers and validates scale names at creation
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors child actor health (panic detection via `JoinHandle`)
//!
//! # Removal
//!
//! Sessions remove themselves: a terminating session actor sends
//! `SessionTerminated` exactly once, and the registry drops its entry.
//! The health sweep only catches actors that stopped without the notice,
//! which in practice means a panic.

use crate::errors::EcError;
use crate::observability::metrics as prom;
use crate::scale::Scale;

use super::messages::{CreatedSession, RegistryMessage, RegistryStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::session::{SessionActor, SessionActorHandle};

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// Length of generated session identifiers.
const SESSION_ID_LENGTH: usize = 16;

/// Default per-session drain window during graceful shutdown.
const SESSION_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle to the `SessionRegistryActor`.
///
/// This is the public interface for interacting with the registry.
/// All methods are async and return results via oneshot channels.
#[derive(Clone)]
pub struct SessionRegistryActorHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl SessionRegistryActorHandle {
    /// Create a new `SessionRegistryActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    ///
    /// # Arguments
    ///
    /// * `ec_id` - Controller instance ID
    /// * `session_idle_timeout` - Inactivity window handed to each session
    /// * `metrics` - Shared actor metrics
    #[must_use]
    pub fn new(
        ec_id: String,
        session_idle_timeout: Duration,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = SessionRegistryActor::new(
            ec_id,
            receiver,
            sender.clone(),
            cancel_token.clone(),
            session_idle_timeout,
            metrics,
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Create a new session with a scale from the catalog.
    ///
    /// # Errors
    ///
    /// Returns `EcError::ScaleNotFound` for an unknown scale name and
    /// `EcError::Draining` once shutdown has begun.
    pub async fn create_session(
        &self,
        session_name: String,
        scale_name: String,
    ) -> Result<CreatedSession, EcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RegistryMessage::CreateSession {
                session_name,
                scale_name,
                respond_to: tx,
            })
            .await
            .map_err(|e| EcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| EcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get a handle to an existing session actor.
    ///
    /// # Errors
    ///
    /// Returns `EcError::SessionNotFound` for an unknown session ID.
    pub async fn get_session(&self, session_id: String) -> Result<SessionActorHandle, EcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RegistryMessage::GetSession {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| EcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| EcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get the current registry status.
    ///
    /// # Errors
    ///
    /// Returns `EcError::Internal` if the registry actor is gone.
    pub async fn get_status(&self) -> Result<RegistryStatus, EcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RegistryMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| EcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| EcError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown.
    ///
    /// # Errors
    ///
    /// Returns `EcError::Internal` if the registry actor is gone.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), EcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RegistryMessage::Shutdown {
                deadline,
                respond_to: tx,
            })
            .await
            .map_err(|e| EcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| EcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for spawning child actors.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a managed session.
struct ManagedSession {
    /// Handle to the session actor.
    handle: SessionActorHandle,
    /// Join handle for monitoring the actor task.
    task_handle: JoinHandle<()>,
    /// Session creation timestamp.
    created_at: i64,
}

/// The `SessionRegistryActor` implementation.
///
/// This struct owns the actor state and runs the message loop.
pub struct SessionRegistryActor {
    /// Controller instance ID.
    ec_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Clone of the mailbox sender, handed to session actors for their
    /// termination notices.
    self_tx: mpsc::Sender<RegistryMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    /// Managed sessions by ID.
    sessions: HashMap<String, ManagedSession>,
    /// Whether the registry is accepting new sessions.
    accepting_new: bool,
    /// Inactivity window handed to each session at spawn.
    session_idle_timeout: Duration,
    /// Per-session drain window during graceful shutdown.
    shutdown_deadline: Duration,
    /// Shared metrics.
    metrics: Arc<ActorMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
}

impl SessionRegistryActor {
    /// Create a new registry actor (not started).
    fn new(
        ec_id: String,
        receiver: mpsc::Receiver<RegistryMessage>,
        self_tx: mpsc::Sender<RegistryMessage>,
        cancel_token: CancellationToken,
        session_idle_timeout: Duration,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Registry, &ec_id);

        Self {
            ec_id,
            receiver,
            self_tx,
            cancel_token,
            sessions: HashMap::new(),
            accepting_new: true,
            session_idle_timeout,
            shutdown_deadline: SESSION_SHUTDOWN_TIMEOUT,
            metrics,
            mailbox,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "ec.actor.registry", fields(ec_id = %self.ec_id))]
    async fn run(mut self) {
        info!(
            target: "ec.actor.registry",
            ec_id = %self.ec_id,
            "SessionRegistryActor started"
        );

        loop {
            // Check for terminated session actors
            self.check_session_health().await;

            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "ec.actor.registry",
                        ec_id = %self.ec_id,
                        "SessionRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                            prom::set_registry_mailbox_depth(self.mailbox.current_depth());
                        }
                        None => {
                            // Channel closed, exit
                            info!(
                                target: "ec.actor.registry",
                                ec_id = %self.ec_id,
                                "SessionRegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "ec.actor.registry",
            ec_id = %self.ec_id,
            sessions_remaining = self.sessions.len(),
            messages_processed = self.mailbox.messages_processed(),
            "SessionRegistryActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::CreateSession {
                session_name,
                scale_name,
                respond_to,
            } => {
                let result = self.create_session(session_name, &scale_name);
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetSession {
                session_id,
                respond_to,
            } => {
                let result = self.get_session(&session_id);
                let _ = respond_to.send(result);
            }

            RegistryMessage::SessionTerminated { session_id } => {
                self.handle_session_terminated(&session_id);
            }

            RegistryMessage::GetStatus { respond_to } => {
                let status = self.get_status();
                let _ = respond_to.send(status);
            }

            RegistryMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                let result = self.initiate_shutdown(deadline);
                let _ = respond_to.send(result);
            }
        }
    }

    /// Create a new session actor.
    fn create_session(
        &mut self,
        session_name: String,
        scale_name: &str,
    ) -> Result<CreatedSession, EcError> {
        // Check if we're accepting new sessions
        if !self.accepting_new {
            return Err(EcError::Draining);
        }

        // Validate the scale before spawning anything
        let Some(scale) = Scale::by_name(scale_name) else {
            return Err(EcError::ScaleNotFound(scale_name.to_string()));
        };

        let session_id = self.generate_session_id();

        debug!(
            target: "ec.actor.registry",
            ec_id = %self.ec_id,
            session_id = %session_id,
            scale = %scale_name,
            "Creating new session actor"
        );

        // Create child token for the session
        let session_token = self.cancel_token.child_token();

        let (handle, task_handle) = SessionActor::spawn(
            session_id.clone(),
            session_name,
            scale,
            self.session_idle_timeout,
            self.self_tx.clone(),
            session_token,
            Arc::clone(&self.metrics),
        );

        let created_at = chrono::Utc::now().timestamp();

        self.sessions.insert(
            session_id.clone(),
            ManagedSession {
                handle: handle.clone(),
                task_handle,
                created_at,
            },
        );

        self.metrics.session_created();

        info!(
            target: "ec.actor.registry",
            ec_id = %self.ec_id,
            session_id = %session_id,
            total_sessions = self.sessions.len(),
            "Session actor created"
        );

        Ok(CreatedSession { session_id, handle })
    }

    /// Generate a fresh session identifier.
    ///
    /// Sixteen alphanumeric symbols; regenerated on the (astronomically
    /// unlikely) collision with a live session.
    fn generate_session_id(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let candidate: String = (&mut rng)
                .sample_iter(Alphanumeric)
                .take(SESSION_ID_LENGTH)
                .map(char::from)
                .collect();

            if !self.sessions.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Look up a session actor handle.
    fn get_session(&self, session_id: &str) -> Result<SessionActorHandle, EcError> {
        match self.sessions.get(session_id) {
            Some(managed) => Ok(managed.handle.clone()),
            None => Err(EcError::SessionNotFound(session_id.to_string())),
        }
    }

    /// Handle a session's termination notice.
    ///
    /// The actor is already stopping on its own; drop the entry and reap
    /// the task off the message loop. A missing entry means the health
    /// sweep got there first, which is fine.
    fn handle_session_terminated(&mut self, session_id: &str) {
        let Some(managed) = self.sessions.remove(session_id) else {
            debug!(
                target: "ec.actor.registry",
                ec_id = %self.ec_id,
                session_id = %session_id,
                "Termination notice for unknown session, ignoring"
            );
            return;
        };

        self.metrics.session_removed();

        let lifetime_seconds = chrono::Utc::now().timestamp() - managed.created_at;
        info!(
            target: "ec.actor.registry",
            ec_id = %self.ec_id,
            session_id = %session_id,
            lifetime_seconds,
            total_sessions = self.sessions.len(),
            "Session removed"
        );

        // Reap the task in the background - don't block the message loop
        let session_id_owned = session_id.to_string();
        let ec_id = self.ec_id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(Duration::from_secs(5), managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "ec.actor.registry",
                        ec_id = %ec_id,
                        session_id = %session_id_owned,
                        "Session actor task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "ec.actor.registry",
                        ec_id = %ec_id,
                        session_id = %session_id_owned,
                        error = ?e,
                        "Session actor task panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "ec.actor.registry",
                        ec_id = %ec_id,
                        session_id = %session_id_owned,
                        "Session actor task cleanup timed out"
                    );
                }
            }
        });
    }

    /// Get current registry status.
    fn get_status(&self) -> RegistryStatus {
        RegistryStatus {
            session_count: self.sessions.len(),
            participant_count: self.metrics.participant_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    /// Initiate graceful shutdown.
    fn initiate_shutdown(&mut self, deadline: Duration) -> Result<(), EcError> {
        info!(
            target: "ec.actor.registry",
            ec_id = %self.ec_id,
            session_count = self.sessions.len(),
            deadline_seconds = deadline.as_secs(),
            "Initiating graceful shutdown"
        );

        // Stop accepting new sessions
        self.accepting_new = false;
        self.shutdown_deadline = deadline;

        // Cancel the root token (propagates to all children)
        self.cancel_token.cancel();

        Ok(())
    }

    /// Perform graceful shutdown.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "ec.actor.registry",
            ec_id = %self.ec_id,
            session_count = self.sessions.len(),
            "Performing graceful shutdown"
        );

        // Stop accepting new sessions
        self.accepting_new = false;

        // Cancel all session actors (already done via parent token, but be explicit)
        for (session_id, managed) in &self.sessions {
            debug!(
                target: "ec.actor.registry",
                ec_id = %self.ec_id,
                session_id = %session_id,
                "Cancelling session actor"
            );
            managed.handle.cancel();
        }

        // Wait for all session tasks to complete
        for (session_id, managed) in self.sessions.drain() {
            match tokio::time::timeout(self.shutdown_deadline, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "ec.actor.registry",
                        ec_id = %self.ec_id,
                        session_id = %session_id,
                        "Session actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "ec.actor.registry",
                        ec_id = %self.ec_id,
                        session_id = %session_id,
                        error = ?e,
                        "Session actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "ec.actor.registry",
                        ec_id = %self.ec_id,
                        session_id = %session_id,
                        "Session actor shutdown timed out"
                    );
                }
            }
        }

        info!(
            target: "ec.actor.registry",
            ec_id = %self.ec_id,
            "Graceful shutdown complete"
        );
    }

    /// Check health of managed session actors.
    async fn check_session_health(&mut self) {
        let mut finished_sessions = Vec::new();

        for (session_id, managed) in &self.sessions {
            if managed.task_handle.is_finished() {
                finished_sessions.push(session_id.clone());
            }
        }

        for session_id in finished_sessions {
            if let Some(managed) = self.sessions.remove(&session_id) {
                match managed.task_handle.await {
                    Ok(()) => {
                        // Clean exit; the termination notice is still in
                        // the mailbox behind this sweep.
                        info!(
                            target: "ec.actor.registry",
                            ec_id = %self.ec_id,
                            session_id = %session_id,
                            "Session actor exited cleanly"
                        );
                    }
                    Err(join_error) => {
                        if join_error.is_panic() {
                            error!(
                                target: "ec.actor.registry",
                                ec_id = %self.ec_id,
                                session_id = %session_id,
                                error = ?join_error,
                                "Session actor panicked"
                            );
                            self.metrics.record_panic(ActorType::Session);
                        }
                    }
                }

                self.metrics.session_removed();
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::messages::SessionEvent;

    fn spawn_registry() -> SessionRegistryActorHandle {
        SessionRegistryActorHandle::new(
            "ec-test-001".to_string(),
            Duration::from_secs(3600),
            ActorMetrics::new(),
        )
    }

    #[tokio::test]
    async fn test_registry_create_and_get_session() {
        let handle = spawn_registry();

        let created = handle
            .create_session("sprint 12".to_string(), "fibonacci".to_string())
            .await
            .unwrap();
        assert_eq!(created.session_id.len(), SESSION_ID_LENGTH);
        assert!(created.session_id.chars().all(char::is_alphanumeric));

        let session = handle.get_session(created.session_id.clone()).await;
        assert!(session.is_ok());
        assert_eq!(session.unwrap().session_id(), created.session_id);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_registry_get_nonexistent_session() {
        let handle = spawn_registry();

        let result = handle.get_session("doesNotExist00000".to_string()).await;
        assert!(matches!(result, Err(EcError::SessionNotFound(_))));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_registry_unknown_scale() {
        let handle = spawn_registry();

        let result = handle
            .create_session("sprint 12".to_string(), "tshirt".to_string())
            .await;
        assert!(matches!(result, Err(EcError::ScaleNotFound(_))));

        // Nothing was registered for the failed creation.
        let status = handle.get_status().await.unwrap();
        assert_eq!(status.session_count, 0);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_registry_generated_ids_are_unique() {
        let handle = spawn_registry();

        let mut ids = std::collections::HashSet::new();
        for _ in 0..5 {
            let created = handle
                .create_session("planning".to_string(), "workingdays".to_string())
                .await
                .unwrap();
            assert!(ids.insert(created.session_id));
        }

        handle.cancel();
    }

    #[tokio::test]
    async fn test_registry_status() {
        let handle = spawn_registry();

        let status = handle.get_status().await.unwrap();
        assert_eq!(status.session_count, 0);
        assert_eq!(status.participant_count, 0);
        assert!(!status.is_draining);

        let _ = handle
            .create_session("one".to_string(), "fibonacci".to_string())
            .await;
        let _ = handle
            .create_session("two".to_string(), "fibonacci".to_string())
            .await;

        let status = handle.get_status().await.unwrap();
        assert_eq!(status.session_count, 2);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_registry_removes_terminated_session() {
        let handle = spawn_registry();

        let created = handle
            .create_session("sprint 12".to_string(), "fibonacci".to_string())
            .await
            .unwrap();

        // Last participant leaving terminates the session.
        let (outbound, _transport_rx) = mpsc::channel(8);
        created
            .handle
            .submit(SessionEvent::Joined {
                participant: "alice".to_string(),
                outbound,
            })
            .await
            .unwrap();
        created
            .handle
            .submit(SessionEvent::Left {
                participant: "alice".to_string(),
            })
            .await
            .unwrap();

        // The registry hears about it and drops the entry.
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if handle
                    .get_session(created.session_id.clone())
                    .await
                    .is_err()
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let status = handle.get_status().await.unwrap();
        assert_eq!(status.session_count, 0);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_registry_shutdown() {
        let handle = spawn_registry();

        let _ = handle
            .create_session("sprint 12".to_string(), "fibonacci".to_string())
            .await;

        let result = handle.shutdown(Duration::from_secs(30)).await;
        assert!(result.is_ok());

        // Give time for cancellation to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_registry_cancellation_token() {
        let handle = spawn_registry();

        assert!(!handle.is_cancelled());

        let child = handle.child_token();
        assert!(!child.is_cancelled());

        handle.cancel();

        // Give time for cancellation to propagate
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(handle.is_cancelled());
        assert!(child.is_cancelled());
    }
}
