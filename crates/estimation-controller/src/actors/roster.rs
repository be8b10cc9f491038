//! Session roster - participants, their votes, and their connections.
//!
//! The roster is owned by a single `SessionActor` and mutated only on
//! that actor's task. Nothing hands out mutable access, so every roster
//! change goes through the session's mailbox in arrival order.

use super::connection::ConnectionActorHandle;
use super::messages::ParticipantView;

use std::collections::HashMap;
use tokio::task::JoinHandle;

/// A participant's entry in the roster.
#[derive(Debug)]
pub struct Participant {
    /// Display name, unique within the session.
    name: String,
    /// Current vote, if one has been cast this round.
    vote: Option<u32>,
    /// Handle to the participant's connection actor.
    connection: ConnectionActorHandle,
    /// Join handle for the connection actor task, kept for teardown.
    task_handle: JoinHandle<()>,
}

impl Participant {
    /// Create a roster entry for a freshly spawned connection actor.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        connection: ConnectionActorHandle,
        task_handle: JoinHandle<()>,
    ) -> Self {
        Self {
            name: name.into(),
            vote: None,
            connection,
            task_handle,
        }
    }

    /// Get the participant's display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current vote, if any.
    #[must_use]
    pub fn vote(&self) -> Option<u32> {
        self.vote
    }

    /// Check whether a vote has been cast this round.
    #[must_use]
    pub fn has_voted(&self) -> bool {
        self.vote.is_some()
    }

    /// Get the connection actor handle.
    #[must_use]
    pub fn connection(&self) -> &ConnectionActorHandle {
        &self.connection
    }

    /// Build the per-participant view payload.
    ///
    /// The vote value itself is only included when `reveal` is set;
    /// until a round completes, peers see `voted` but not the number.
    #[must_use]
    pub fn to_view(&self, reveal: bool) -> ParticipantView {
        ParticipantView {
            name: self.name.clone(),
            voted: self.vote.is_some(),
            vote: if reveal { self.vote } else { None },
        }
    }

    /// Whether the connection actor task has stopped.
    #[must_use]
    pub fn connection_finished(&self) -> bool {
        self.task_handle.is_finished()
    }

    /// Consume the entry, yielding the connection handle and its task.
    #[must_use]
    pub fn into_parts(self) -> (ConnectionActorHandle, JoinHandle<()>) {
        (self.connection, self.task_handle)
    }
}

/// The participants of one session, keyed by display name.
#[derive(Debug, Default)]
pub struct Roster {
    participants: HashMap<String, Participant>,
}

impl Roster {
    /// Create an empty roster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a participant, returning the displaced entry when the
    /// name was already taken.
    pub fn insert(&mut self, participant: Participant) -> Option<Participant> {
        self.participants
            .insert(participant.name.clone(), participant)
    }

    /// Remove a participant by name.
    pub fn remove(&mut self, name: &str) -> Option<Participant> {
        self.participants.remove(name)
    }

    /// Record a vote for a participant. Returns false if the name is
    /// not in the roster.
    pub fn set_vote(&mut self, name: &str, vote: u32) -> bool {
        match self.participants.get_mut(name) {
            Some(participant) => {
                participant.vote = Some(vote);
                true
            }
            None => false,
        }
    }

    /// Clear every vote, starting a fresh round.
    pub fn clear_votes(&mut self) {
        for participant in self.participants.values_mut() {
            participant.vote = None;
        }
    }

    /// Remove every participant, yielding the entries for teardown.
    pub fn drain(&mut self) -> Vec<Participant> {
        self.participants
            .drain()
            .map(|(_, participant)| participant)
            .collect()
    }

    /// Check whether a name is in the roster.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.participants.contains_key(name)
    }

    /// Get a participant by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Participant> {
        self.participants.get(name)
    }

    /// All participants, sorted by name for stable view payloads.
    #[must_use]
    pub fn participants(&self) -> Vec<&Participant> {
        let mut all: Vec<&Participant> = self.participants.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// All participants except `me`, sorted by name.
    #[must_use]
    pub fn other_participants(&self, me: &str) -> Vec<&Participant> {
        let mut others: Vec<&Participant> = self
            .participants
            .values()
            .filter(|participant| participant.name != me)
            .collect();
        others.sort_by(|a, b| a.name.cmp(&b.name));
        others
    }

    /// Whether every participant has voted. Vacuously true when empty.
    #[must_use]
    pub fn all_voted(&self) -> bool {
        self.participants.values().all(Participant::has_voted)
    }

    /// The votes cast so far, in no particular order.
    #[must_use]
    pub fn votes(&self) -> Vec<u32> {
        self.participants
            .values()
            .filter_map(Participant::vote)
            .collect()
    }

    /// Number of participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether the roster is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::connection::ConnectionActor;
    use crate::actors::metrics::ActorMetrics;

    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn entry(name: &str) -> Participant {
        let (outbound, _transport_rx) = mpsc::channel(8);
        let (session_tx, _session_rx) = mpsc::channel(8);
        let (connection, task_handle) = ConnectionActor::spawn(
            name.to_string(),
            "aB3dE5fG7hJ9kL1m".to_string(),
            outbound,
            session_tx,
            CancellationToken::new(),
            ActorMetrics::new(),
        );
        Participant::new(name, connection, task_handle)
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let mut roster = Roster::new();
        assert!(roster.is_empty());

        assert!(roster.insert(entry("alice")).is_none());
        assert!(roster.insert(entry("bob")).is_none());

        assert_eq!(roster.len(), 2);
        assert!(roster.contains("alice"));
        assert!(!roster.contains("carol"));
        assert_eq!(roster.get("bob").unwrap().name(), "bob");
    }

    #[tokio::test]
    async fn test_insert_returns_displaced_entry() {
        let mut roster = Roster::new();
        roster.insert(entry("alice"));
        roster.set_vote("alice", 8);

        let displaced = roster.insert(entry("alice")).unwrap();
        assert_eq!(displaced.vote(), Some(8));

        // The new holder of the name starts without a vote.
        assert_eq!(roster.len(), 1);
        assert!(!roster.get("alice").unwrap().has_voted());
    }

    #[tokio::test]
    async fn test_remove() {
        let mut roster = Roster::new();
        roster.insert(entry("alice"));

        assert!(roster.remove("alice").is_some());
        assert!(roster.remove("alice").is_none());
        assert!(roster.is_empty());
    }

    #[tokio::test]
    async fn test_votes_and_all_voted() {
        let mut roster = Roster::new();
        roster.insert(entry("alice"));
        roster.insert(entry("bob"));

        assert!(!roster.all_voted());
        assert!(roster.set_vote("alice", 5));
        assert!(!roster.all_voted());
        assert!(roster.set_vote("bob", 13));
        assert!(roster.all_voted());

        let mut votes = roster.votes();
        votes.sort_unstable();
        assert_eq!(votes, vec![5, 13]);
    }

    #[tokio::test]
    async fn test_set_vote_unknown_name() {
        let mut roster = Roster::new();
        roster.insert(entry("alice"));

        assert!(!roster.set_vote("mallory", 3));
        assert!(roster.votes().is_empty());
    }

    #[tokio::test]
    async fn test_clear_votes() {
        let mut roster = Roster::new();
        roster.insert(entry("alice"));
        roster.insert(entry("bob"));
        roster.set_vote("alice", 5);
        roster.set_vote("bob", 13);

        roster.clear_votes();

        assert!(!roster.all_voted());
        assert!(roster.votes().is_empty());
        assert_eq!(roster.len(), 2);
    }

    #[tokio::test]
    async fn test_ordering_is_stable() {
        let mut roster = Roster::new();
        roster.insert(entry("carol"));
        roster.insert(entry("alice"));
        roster.insert(entry("bob"));

        let names: Vec<&str> = roster
            .participants()
            .iter()
            .map(|participant| participant.name())
            .collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);

        let others: Vec<&str> = roster
            .other_participants("bob")
            .iter()
            .map(|participant| participant.name())
            .collect();
        assert_eq!(others, vec!["alice", "carol"]);
    }

    #[tokio::test]
    async fn test_view_conceals_vote_until_reveal() {
        let mut roster = Roster::new();
        roster.insert(entry("alice"));
        roster.set_vote("alice", 21);

        let concealed = roster.get("alice").unwrap().to_view(false);
        assert!(concealed.voted);
        assert_eq!(concealed.vote, None);

        let revealed = roster.get("alice").unwrap().to_view(true);
        assert_eq!(revealed.vote, Some(21));
    }
}
