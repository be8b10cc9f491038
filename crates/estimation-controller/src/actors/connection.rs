//! `ConnectionActor` - per-participant delivery boundary.
//!
//! Each `ConnectionActor`:
//! - Belongs to exactly one participant in one session
//! - Forwards views from the session actor to the transport-facing sink
//! - Submits a LEFT event when the transport goes away, so the roster
//!   never keeps an unreachable participant
//!
//! # Lifecycle
//!
//! 1. Created by the session actor when it processes a JOINED event
//! 2. Runs until the transport closes, delivery fails, or the session
//!    cancels it (teardown and name-collision displacement)
//! 3. Cancellation via child token propagates from the session actor; a
//!    cancelled close never submits LEFT, since the session already owns
//!    the roster consequence

use crate::errors::EcError;
use crate::observability::metrics as prom;

use super::messages::{ConnectionMessage, SessionEvent, SessionMessage, View};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    participant: String,
    session_id: String,
}

impl ConnectionActorHandle {
    /// Get the participant's display name.
    #[must_use]
    pub fn participant(&self) -> &str {
        &self.participant
    }

    /// Get the session ID.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Deliver a view to the connected client.
    ///
    /// # Errors
    ///
    /// Returns `EcError::Internal` if the connection actor is gone.
    pub async fn deliver(&self, view: View) -> Result<(), EcError> {
        self.sender
            .send(ConnectionMessage::Deliver { view })
            .await
            .map_err(|e| EcError::Internal(format!("channel send failed: {e}")))
    }

    /// Close the connection (transport-initiated).
    ///
    /// # Errors
    ///
    /// Returns `EcError::Internal` if the connection actor is gone.
    pub async fn close(&self, reason: String) -> Result<(), EcError> {
        self.sender
            .send(ConnectionMessage::Close { reason })
            .await
            .map_err(|e| EcError::Internal(format!("channel send failed: {e}")))
    }

    /// Cancel the connection actor (session-initiated teardown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    /// Participant display name.
    participant: String,
    /// Session ID.
    session_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Transport-facing sink; the embedding transport owns the receiver
    /// and renders views for the client.
    outbound: mpsc::Sender<View>,
    /// Session mailbox, for submitting LEFT when the transport dies.
    session_tx: mpsc::Sender<SessionMessage>,
    /// Cancellation token (child of the session's token).
    cancel_token: CancellationToken,
    /// Shared metrics.
    metrics: Arc<ActorMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
    /// Whether the connection is closing.
    is_closing: bool,
}

impl ConnectionActor {
    /// Spawn a new connection actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        participant: String,
        session_id: String,
        outbound: mpsc::Sender<View>,
        session_tx: mpsc::Sender<SessionMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);

        let actor = Self {
            participant: participant.clone(),
            session_id: session_id.clone(),
            receiver,
            outbound,
            session_tx,
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Connection, &participant),
            is_closing: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            participant,
            session_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "ec.actor.connection",
        fields(
            participant = %self.participant,
            session_id = %self.session_id
        )
    )]
    async fn run(mut self) {
        debug!(
            target: "ec.actor.connection",
            participant = %self.participant,
            session_id = %self.session_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "ec.actor.connection",
                        participant = %self.participant,
                        "ConnectionActor received cancellation signal"
                    );
                    self.flush_pending().await;
                    self.graceful_close("cancelled").await;
                    break;
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let should_exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "ec.actor.connection",
                                participant = %self.participant,
                                "ConnectionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "ec.actor.connection",
            participant = %self.participant,
            session_id = %self.session_id,
            messages_processed = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Deliver { view } => self.handle_deliver(view).await,

            ConnectionMessage::Close { reason } => {
                // A transport-initiated close means the participant is gone.
                if !self.is_closing {
                    self.submit_leave().await;
                }
                self.graceful_close(&reason).await;
                true
            }
        }
    }

    /// Forward a view to the transport sink. Returns true to exit.
    async fn handle_deliver(&mut self, view: View) -> bool {
        if self.is_closing {
            warn!(
                target: "ec.actor.connection",
                participant = %self.participant,
                view = view.name(),
                "Attempted to deliver view while closing"
            );
            return false;
        }

        debug!(
            target: "ec.actor.connection",
            participant = %self.participant,
            view = view.name(),
            "Delivering view"
        );

        if self.outbound.send(view).await.is_err() {
            prom::record_delivery("error");
            warn!(
                target: "ec.actor.connection",
                participant = %self.participant,
                session_id = %self.session_id,
                "Transport sink closed, abandoning connection"
            );
            self.submit_leave().await;
            self.graceful_close("transport closed").await;
            return true;
        }

        prom::record_delivery("ok");
        false
    }

    /// Forward deliveries already queued at close time. The session's
    /// final notices (roster changes, the timeout view) are enqueued
    /// just before it cancels its connections, and must still reach
    /// the transport.
    async fn flush_pending(&mut self) {
        while let Ok(message) = self.receiver.try_recv() {
            match message {
                ConnectionMessage::Deliver { view } => {
                    if self.outbound.send(view).await.is_ok() {
                        prom::record_delivery("ok");
                    } else {
                        prom::record_delivery("error");
                        break;
                    }
                }
                ConnectionMessage::Close { .. } => {}
            }
        }
    }

    /// Submit a LEFT event for this participant to the session.
    async fn submit_leave(&self) {
        let event = SessionEvent::Left {
            participant: self.participant.clone(),
        };
        if self
            .session_tx
            .send(SessionMessage::Event(event))
            .await
            .is_err()
        {
            debug!(
                target: "ec.actor.connection",
                participant = %self.participant,
                session_id = %self.session_id,
                "Session gone before leave could be submitted"
            );
        }
    }

    /// Gracefully close the connection.
    async fn graceful_close(&mut self, reason: &str) {
        if self.is_closing {
            return;
        }

        self.is_closing = true;

        debug!(
            target: "ec.actor.connection",
            participant = %self.participant,
            reason = %reason,
            "Closing connection"
        );

        // Brief delay to allow final deliveries to flush
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::messages::TimeoutView;

    fn timeout_view() -> View {
        View::Timeout(TimeoutView {
            session_name: "sprint 12".to_string(),
        })
    }

    fn spawn_connection(
        transport_buffer: usize,
    ) -> (
        ConnectionActorHandle,
        JoinHandle<()>,
        mpsc::Receiver<View>,
        mpsc::Receiver<SessionMessage>,
    ) {
        let (outbound, transport_rx) = mpsc::channel(transport_buffer);
        let (session_tx, session_rx) = mpsc::channel(8);

        let (handle, task) = ConnectionActor::spawn(
            "alice".to_string(),
            "aB3dE5fG7hJ9kL1m".to_string(),
            outbound,
            session_tx,
            CancellationToken::new(),
            ActorMetrics::new(),
        );

        (handle, task, transport_rx, session_rx)
    }

    #[tokio::test]
    async fn test_connection_actor_spawn() {
        let (handle, _task, _transport_rx, _session_rx) = spawn_connection(8);

        assert_eq!(handle.participant(), "alice");
        assert_eq!(handle.session_id(), "aB3dE5fG7hJ9kL1m");
        assert!(!handle.is_cancelled());

        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_deliver_forwards_to_transport() {
        let (handle, _task, mut transport_rx, _session_rx) = spawn_connection(8);

        handle.deliver(timeout_view()).await.unwrap();

        let view = tokio::time::timeout(Duration::from_secs(1), transport_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(view.name(), "timeout");

        handle.cancel();
    }

    #[tokio::test]
    async fn test_failed_delivery_submits_leave_and_exits() {
        let (handle, task, transport_rx, mut session_rx) = spawn_connection(8);

        // Kill the transport side, then deliver.
        drop(transport_rx);
        handle.deliver(timeout_view()).await.unwrap();

        let message = tokio::time::timeout(Duration::from_secs(1), session_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            message,
            SessionMessage::Event(SessionEvent::Left { participant }) if participant == "alice"
        ));

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_submits_leave_and_exits() {
        let (handle, task, _transport_rx, mut session_rx) = spawn_connection(8);

        handle.close("client disconnected".to_string()).await.unwrap();

        let message = tokio::time::timeout(Duration::from_secs(1), session_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            message,
            SessionMessage::Event(SessionEvent::Left { participant }) if participant == "alice"
        ));

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_closes_without_leave() {
        let (handle, task, _transport_rx, mut session_rx) = spawn_connection(8);

        handle.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        // Session-initiated teardown never generates a LEFT event.
        assert!(session_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_parent_cancellation_propagates() {
        let parent_token = CancellationToken::new();
        let (outbound, _transport_rx) = mpsc::channel(8);
        let (session_tx, _session_rx) = mpsc::channel(8);

        let (handle, task) = ConnectionActor::spawn(
            "alice".to_string(),
            "aB3dE5fG7hJ9kL1m".to_string(),
            outbound,
            session_tx,
            parent_token.child_token(),
            ActorMetrics::new(),
        );

        parent_token.cancel();

        // Give time for cancellation to propagate
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.is_cancelled());

        let result = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_deliver_after_exit_errors() {
        let (handle, task, _transport_rx, _session_rx) = spawn_connection(8);

        handle.close("done".to_string()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        let result = handle.deliver(timeout_view()).await;
        assert!(matches!(result, Err(EcError::Internal(_))));
    }
}
