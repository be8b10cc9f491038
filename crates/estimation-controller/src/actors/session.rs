//! `SessionActor` - per-session actor that owns estimation state.
//!
//! Each `SessionActor`:
//! - Owns all state for one session (roster, votes, scale)
//! - Supervises N `ConnectionActor` instances, one per participant
//! - Processes participant events strictly in arrival order
//! - Enforces the idle deadline and tears the session down when it fires
//!
//! # Round lifecycle
//!
//! Votes stay concealed from peers while a round is open. The round
//! completes the moment every roster member has voted (a departure can
//! complete it too), at which point everyone receives the revealed votes
//! plus the computed round statistics. A reset clears the votes and
//! returns everyone to the blank session view.

use crate::aggregate::{aggregate, AggregateResult};
use crate::errors::EcError;
use crate::observability::metrics as prom;
use crate::scale::Scale;

use super::connection::ConnectionActor;
use super::messages::{
    Delivery, ParticipantsView, RegistryMessage, SessionContentView, SessionEvent, SessionMessage,
    SessionState, SessionStatus, TimeoutView, View,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::roster::{Participant, Roster};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 500;

/// How long to wait for a single connection actor removed mid-session.
const CONNECTION_REMOVE_TIMEOUT: Duration = Duration::from_millis(100);

/// How long to wait for each connection actor during teardown.
const CONNECTION_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a `SessionActor`.
#[derive(Clone, Debug)]
pub struct SessionActorHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    session_id: String,
}

impl SessionActorHandle {
    /// Get the session ID.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Submit a participant event for processing.
    ///
    /// Events are applied in the order they arrive on the mailbox; there
    /// is no other way to mutate session state.
    ///
    /// # Errors
    ///
    /// Returns `EcError::SessionNotFound` if the session actor is gone.
    pub async fn submit(&self, event: SessionEvent) -> Result<(), EcError> {
        self.sender
            .send(SessionMessage::Event(event))
            .await
            .map_err(|_| EcError::SessionNotFound(self.session_id.clone()))
    }

    /// Get current session state.
    ///
    /// State reads do not push the idle deadline out.
    ///
    /// # Errors
    ///
    /// Returns `EcError::Internal` if the session actor is gone.
    pub async fn get_state(&self) -> Result<SessionState, EcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SessionMessage::GetState { respond_to: tx })
            .await
            .map_err(|e| EcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| EcError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the session actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for connection actors.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    /// Session ID.
    session_id: String,
    /// Human-readable session name.
    session_name: String,
    /// The estimation scale chosen at creation.
    scale: Scale,
    /// Message receiver.
    receiver: mpsc::Receiver<SessionMessage>,
    /// Clone of the mailbox sender, handed to connection actors so they
    /// can submit LEFT events when a transport dies.
    sender: mpsc::Sender<SessionMessage>,
    /// Registry mailbox, for the termination notice.
    registry_tx: mpsc::Sender<RegistryMessage>,
    /// Cancellation token (child of the registry's token).
    cancel_token: CancellationToken,
    /// Participants and their votes.
    roster: Roster,
    /// Lifecycle state.
    status: SessionStatus,
    /// How long the session may sit without events before teardown.
    idle_timeout: Duration,
    /// Session creation timestamp.
    created_at: i64,
    /// Shared actor metrics.
    metrics: Arc<ActorMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
}

impl SessionActor {
    /// Spawn a new session actor.
    ///
    /// Returns a handle and the task join handle.
    ///
    /// # Arguments
    ///
    /// * `session_id` - Generated session identifier
    /// * `session_name` - Human-readable name chosen by the creator
    /// * `scale` - Estimation scale from the catalog
    /// * `idle_timeout` - Inactivity window before teardown
    /// * `registry_tx` - Registry mailbox for the termination notice
    /// * `cancel_token` - Cancellation token (child of the registry's token)
    /// * `metrics` - Shared actor metrics
    pub fn spawn(
        session_id: String,
        session_name: String,
        scale: Scale,
        idle_timeout: Duration,
        registry_tx: mpsc::Sender<RegistryMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (SessionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);

        let actor = Self {
            session_id: session_id.clone(),
            session_name,
            scale,
            receiver,
            sender: sender.clone(),
            registry_tx,
            cancel_token: cancel_token.clone(),
            roster: Roster::new(),
            status: SessionStatus::Active,
            idle_timeout,
            created_at: chrono::Utc::now().timestamp(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Session, &session_id),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionActorHandle {
            sender,
            cancel_token,
            session_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "ec.actor.session", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        info!(
            target: "ec.actor.session",
            session_id = %self.session_id,
            session_name = %self.session_name,
            scale = %self.scale.name(),
            "SessionActor started"
        );

        // The idle deadline starts at creation; a session nobody ever
        // joins still gets reaped.
        let idle_deadline = tokio::time::sleep(self.idle_timeout);
        tokio::pin!(idle_deadline);

        // Periodic wakeup so the health sweep runs even when idle
        let mut health_check = tokio::time::interval(Duration::from_secs(5));

        loop {
            // Reap connection actors that stopped without a leave event
            if self.check_connection_health().await {
                break;
            }

            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "ec.actor.session",
                        session_id = %self.session_id,
                        "SessionActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                // Idle deadline reached
                () = &mut idle_deadline => {
                    self.handle_idle_timeout().await;
                    break;
                }

                // Drive the connection health sweep
                _ = health_check.tick() => {}

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            // Only participant events push the deadline out;
                            // state reads keep the session on the clock.
                            if matches!(message, SessionMessage::Event(_)) {
                                idle_deadline
                                    .as_mut()
                                    .reset(Instant::now() + self.idle_timeout);
                            }

                            self.mailbox.record_enqueue();
                            let should_exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            info!(
                                target: "ec.actor.session",
                                session_id = %self.session_id,
                                "SessionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "ec.actor.session",
            session_id = %self.session_id,
            participants = self.roster.len(),
            messages_processed = self.mailbox.messages_processed(),
            "SessionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: SessionMessage) -> bool {
        match message {
            SessionMessage::Event(event) => {
                let started = Instant::now();
                let kind = event.kind();

                let should_exit = match event {
                    SessionEvent::Joined {
                        participant,
                        outbound,
                    } => self.handle_joined(participant, outbound).await,

                    SessionEvent::Left { participant } => self.handle_left(&participant).await,

                    SessionEvent::Voted {
                        participant,
                        raw_vote,
                    } => self.handle_voted(&participant, &raw_vote).await,

                    SessionEvent::Reset { participant } => self.handle_reset(&participant).await,
                };

                prom::record_event_latency(kind, started.elapsed());
                should_exit
            }

            SessionMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.get_state());
                false
            }
        }
    }

    /// Handle a participant joining.
    #[instrument(skip_all, fields(session_id = %self.session_id))]
    async fn handle_joined(&mut self, name: String, outbound: mpsc::Sender<View>) -> bool {
        debug!(
            target: "ec.actor.session",
            participant = %name,
            "Participant joining"
        );

        let connection_token = self.cancel_token.child_token();
        let (conn_handle, conn_task) = ConnectionActor::spawn(
            name.clone(),
            self.session_id.clone(),
            outbound,
            self.sender.clone(),
            connection_token,
            Arc::clone(&self.metrics),
        );

        let displaced = self
            .roster
            .insert(Participant::new(name.clone(), conn_handle, conn_task));

        match displaced {
            Some(previous) => {
                // Same name rejoining: the new connection takes over the
                // seat. Cancel the old actor so its transport teardown
                // cannot submit a stale LEFT that would evict the new
                // holder of the name.
                warn!(
                    target: "ec.actor.session",
                    participant = %name,
                    "Name already present, displacing previous connection"
                );
                let (old_connection, old_task) = previous.into_parts();
                old_connection.cancel();
                let _ = tokio::time::timeout(CONNECTION_REMOVE_TIMEOUT, old_task).await;
            }
            None => {
                self.metrics.participant_joined();
            }
        }

        // Everyone already present learns about the arrival; the joiner's
        // first view comes with the next event.
        let deliveries = self.roster_deliveries(None, Some(&name));
        self.dispatch(deliveries).await;

        info!(
            target: "ec.actor.session",
            participant = %name,
            total_participants = self.roster.len(),
            "Participant joined"
        );

        false
    }

    /// Handle a participant leaving.
    #[instrument(skip_all, fields(session_id = %self.session_id))]
    async fn handle_left(&mut self, name: &str) -> bool {
        let Some(removed) = self.roster.remove(name) else {
            debug!(
                target: "ec.actor.session",
                participant = %name,
                "Leave for unknown participant, ignoring"
            );
            return false;
        };

        self.metrics.participant_left();

        let (connection, task_handle) = removed.into_parts();
        connection.cancel();
        let _ = tokio::time::timeout(CONNECTION_REMOVE_TIMEOUT, task_handle).await;

        info!(
            target: "ec.actor.session",
            participant = %name,
            remaining_participants = self.roster.len(),
            "Participant left"
        );

        self.after_departure().await
    }

    /// Handle a submitted vote.
    async fn handle_voted(&mut self, name: &str, raw_vote: &str) -> bool {
        if !self.roster.contains(name) {
            debug!(
                target: "ec.actor.session",
                session_id = %self.session_id,
                participant = %name,
                "Vote from unknown participant, ignoring"
            );
            return false;
        }

        let vote = match raw_vote.parse::<u32>() {
            Ok(vote) => vote,
            Err(error) => {
                warn!(
                    target: "ec.actor.session",
                    session_id = %self.session_id,
                    participant = %name,
                    raw_vote = %raw_vote,
                    error = %error,
                    "Discarding unparsable vote"
                );
                return false;
            }
        };

        self.roster.set_vote(name, vote);

        debug!(
            target: "ec.actor.session",
            session_id = %self.session_id,
            participant = %name,
            "Vote recorded"
        );

        let aggregate = self.round_aggregate();
        if aggregate.is_some() {
            // Round complete: the votes get revealed to everyone.
            prom::increment_estimations();
            info!(
                target: "ec.actor.session",
                session_id = %self.session_id,
                participants = self.roster.len(),
                "Estimation round complete"
            );
        }

        let deliveries = self.roster_deliveries(aggregate, None);
        self.dispatch(deliveries).await;

        false
    }

    /// Handle a round reset.
    #[instrument(skip_all, fields(session_id = %self.session_id))]
    async fn handle_reset(&mut self, initiator: &str) -> bool {
        if !self.roster.contains(initiator) {
            debug!(
                target: "ec.actor.session",
                participant = %initiator,
                "Reset from unknown participant, ignoring"
            );
            return false;
        }

        self.roster.clear_votes();

        info!(
            target: "ec.actor.session",
            participant = %initiator,
            "Votes cleared for a new round"
        );

        // Everyone returns to the blank session view, initiator included.
        let deliveries = self.session_content_deliveries();
        self.dispatch(deliveries).await;

        false
    }

    /// Fan out the post-departure roster, or terminate when it emptied.
    /// Returns true when the session should exit.
    async fn after_departure(&mut self) -> bool {
        if self.roster.is_empty() {
            self.terminate("empty").await;
            return true;
        }

        // A departure can complete the round for those remaining.
        let aggregate = self.round_aggregate();
        let deliveries = self.roster_deliveries(aggregate, None);
        self.dispatch(deliveries).await;

        false
    }

    /// Round statistics, present only when every participant has voted.
    fn round_aggregate(&self) -> Option<AggregateResult> {
        if self.roster.all_voted() {
            aggregate(&self.roster.votes(), &self.scale)
        } else {
            None
        }
    }

    /// Handle the idle deadline firing.
    async fn handle_idle_timeout(&mut self) {
        info!(
            target: "ec.actor.session",
            session_id = %self.session_id,
            participants = self.roster.len(),
            idle_timeout_seconds = self.idle_timeout.as_secs(),
            "Idle deadline reached, terminating session"
        );

        // Final notice so clients can render the expiry.
        let deliveries: Vec<Delivery> = self
            .roster
            .participants()
            .into_iter()
            .map(|recipient| Delivery {
                connection: recipient.connection().clone(),
                view: View::Timeout(TimeoutView {
                    session_name: self.session_name.clone(),
                }),
            })
            .collect();
        self.dispatch(deliveries).await;

        self.terminate("idle timeout").await;
    }

    /// Tear down the session: deregister, correct the gauges, and stop
    /// every connection actor. Runs at most once.
    async fn terminate(&mut self, reason: &str) {
        if self.status == SessionStatus::Terminated {
            return;
        }
        self.status = SessionStatus::Terminated;

        info!(
            target: "ec.actor.session",
            session_id = %self.session_id,
            reason = %reason,
            "Session terminating"
        );

        // A send failure here means the registry itself is already gone.
        if self
            .registry_tx
            .send(RegistryMessage::SessionTerminated {
                session_id: self.session_id.clone(),
            })
            .await
            .is_err()
        {
            debug!(
                target: "ec.actor.session",
                session_id = %self.session_id,
                "Registry gone before termination notice"
            );
        }

        self.teardown_connections().await;
    }

    /// Reap connection actors that stopped without the session removing
    /// them. A clean stop always follows a transport close, so the LEFT
    /// the connection submitted is either in flight or already applied;
    /// anything else is a panic. Returns true when the session should exit.
    async fn check_connection_health(&mut self) -> bool {
        let finished: Vec<String> = self
            .roster
            .participants()
            .iter()
            .filter(|participant| participant.connection_finished())
            .map(|participant| participant.name().to_string())
            .collect();

        let mut should_exit = false;

        for name in finished {
            if let Some(participant) = self.roster.remove(&name) {
                warn!(
                    target: "ec.actor.session",
                    session_id = %self.session_id,
                    participant = %name,
                    "Connection actor stopped, removing participant"
                );
                self.metrics.participant_left();

                let (_connection, task_handle) = participant.into_parts();
                if let Err(join_error) = task_handle.await {
                    if join_error.is_panic() {
                        error!(
                            target: "ec.actor.session",
                            session_id = %self.session_id,
                            participant = %name,
                            error = ?join_error,
                            "Connection actor panicked"
                        );
                        self.metrics.record_panic(ActorType::Connection);
                    }
                }

                if self.after_departure().await {
                    should_exit = true;
                }
            }
        }

        should_exit
    }

    /// Get current session state.
    fn get_state(&self) -> SessionState {
        SessionState {
            session_id: self.session_id.clone(),
            session_name: self.session_name.clone(),
            scale: self.scale.clone(),
            status: self.status,
            participants: self
                .roster
                .participants()
                .into_iter()
                .map(|participant| participant.to_view(true))
                .collect(),
            created_at: self.created_at,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    /// One personalized roster view per recipient. `skip` omits a single
    /// recipient (the joiner learns nothing new from their own arrival).
    /// Votes are revealed exactly when round statistics are present.
    fn roster_deliveries(
        &self,
        aggregate: Option<AggregateResult>,
        skip: Option<&str>,
    ) -> Vec<Delivery> {
        let reveal = aggregate.is_some();

        self.roster
            .participants()
            .into_iter()
            .filter(|recipient| skip != Some(recipient.name()))
            .map(|recipient| Delivery {
                connection: recipient.connection().clone(),
                view: View::Participants(ParticipantsView {
                    me: recipient.to_view(true),
                    others: self
                        .roster
                        .other_participants(recipient.name())
                        .into_iter()
                        .map(|other| other.to_view(reveal))
                        .collect(),
                    aggregate,
                }),
            })
            .collect()
    }

    /// One personalized session-content view per recipient.
    fn session_content_deliveries(&self) -> Vec<Delivery> {
        self.roster
            .participants()
            .into_iter()
            .map(|recipient| Delivery {
                connection: recipient.connection().clone(),
                view: View::SessionContent(SessionContentView {
                    session_id: self.session_id.clone(),
                    session_name: self.session_name.clone(),
                    scale: self.scale.clone(),
                    me: recipient.to_view(true),
                    others: self
                        .roster
                        .other_participants(recipient.name())
                        .into_iter()
                        .map(|other| other.to_view(false))
                        .collect(),
                }),
            })
            .collect()
    }

    /// Send one prepared view to each recipient. A failed delivery is
    /// logged and skipped; the connection actor reaps its own transport.
    async fn dispatch(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            let participant = delivery.connection.participant().to_string();
            if let Err(error) = delivery.connection.deliver(delivery.view).await {
                warn!(
                    target: "ec.actor.session",
                    session_id = %self.session_id,
                    participant = %participant,
                    error = %error,
                    "View delivery failed"
                );
            }
        }
    }

    /// Cancel and drain every connection actor, correcting the
    /// participant gauge for entries still present.
    async fn teardown_connections(&mut self) {
        for participant in self.roster.drain() {
            self.metrics.participant_left();

            let name = participant.name().to_string();
            let (connection, task_handle) = participant.into_parts();
            connection.cancel();

            match tokio::time::timeout(CONNECTION_TEARDOWN_TIMEOUT, task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "ec.actor.session",
                        session_id = %self.session_id,
                        participant = %name,
                        "Connection completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "ec.actor.session",
                        session_id = %self.session_id,
                        participant = %name,
                        error = ?e,
                        "Connection task panicked during teardown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "ec.actor.session",
                        session_id = %self.session_id,
                        participant = %name,
                        "Connection teardown timed out"
                    );
                }
            }
        }
    }

    /// Perform graceful shutdown (cancellation from the registry).
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "ec.actor.session",
            session_id = %self.session_id,
            participants = self.roster.len(),
            "Performing graceful shutdown"
        );

        self.status = SessionStatus::Terminated;
        self.teardown_connections().await;

        info!(
            target: "ec.actor.session",
            session_id = %self.session_id,
            "Graceful shutdown complete"
        );
    }
}
