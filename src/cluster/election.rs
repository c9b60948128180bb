//! Leader Election
//!
//! Ephemeral-sequential leader election: every participant volunteers a
//! candidacy node under the election path and the lowest sequence leads.
//! Followers watch only their immediate predecessor, so a leadership
//! change wakes a single peer instead of the whole herd.

use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::cluster::{ensure_node, sort_by_sequence};
use crate::coordination::{CoordinationClient, CreateMode, SessionState, WatchEvent};
use crate::error::{Error, Result};

/// Prefix for candidacy node names under the election path
const CANDIDATE_PREFIX: &str = "c_";

/// Role-change notifications delivered to the embedding application
///
/// Callbacks run on the notification path while the participant's state
/// is being transitioned; keep them quick and hand long work off to a
/// task.
pub trait RoleCallback: Send + Sync {
    /// The participant's candidacy became the lowest live sequence
    fn on_became_leader(&self);

    /// The participant entered the follower role behind a live predecessor
    fn on_became_follower(&self);
}

/// Election state of a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantState {
    /// No live candidacy (never volunteered, resigned, or session lost)
    Unregistered,
    /// Candidacy created, leadership not yet derived
    Candidate,
    /// Holds the lowest live sequence
    Leader,
    /// Behind a live predecessor
    Follower,
}

impl std::fmt::Display for ParticipantState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParticipantState::Unregistered => write!(f, "UNREGISTERED"),
            ParticipantState::Candidate => write!(f, "CANDIDATE"),
            ParticipantState::Leader => write!(f, "LEADER"),
            ParticipantState::Follower => write!(f, "FOLLOWER"),
        }
    }
}

/// Mutable election state, guarded by the participant mutex
struct Inner {
    state: ParticipantState,
    /// Bare name of our candidacy node (path prefix stripped)
    candidate: Option<String>,
    /// Full path of the predecessor we currently watch
    watched: Option<String>,
}

/// One peer in a leader election
///
/// Constructing a participant spawns its notification task; the task is
/// stopped by [`ElectionParticipant::shutdown`] or when the session
/// reaches a terminal state.
pub struct ElectionParticipant {
    client: Arc<dyn CoordinationClient>,
    election_path: String,
    callback: Arc<dyn RoleCallback>,
    inner: Mutex<Inner>,
    shutdown: CancellationToken,
}

impl ElectionParticipant {
    /// Create a participant and start its notification task
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        election_path: String,
        callback: Arc<dyn RoleCallback>,
    ) -> Arc<Self> {
        // Subscribe before any watch can be armed so no firing is missed.
        let events = client.watch_events();
        let sessions = client.session_events();

        let participant = Arc::new(Self {
            client,
            election_path,
            callback,
            inner: Mutex::new(Inner {
                state: ParticipantState::Unregistered,
                candidate: None,
                watched: None,
            }),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(Self::run(Arc::clone(&participant), events, sessions));
        participant
    }

    /// Volunteer for leadership
    ///
    /// Creates the ephemeral-sequential candidacy node and derives the
    /// initial role. Fails with `InvalidState` when already a candidate
    /// and `CoordinationUnavailable` when the session is gone; retrying
    /// is the caller's decision.
    pub async fn volunteer(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.candidate.is_some() {
            return Err(Error::InvalidState(
                "already volunteered for leadership".to_string(),
            ));
        }

        ensure_node(self.client.as_ref(), &self.election_path).await?;

        let prefix = format!("{}/{}", self.election_path, CANDIDATE_PREFIX);
        let actual = self
            .client
            .create(&prefix, &[], CreateMode::EphemeralSequential)
            .await?;
        let name = actual
            .rsplit_once('/')
            .map(|(_, name)| name.to_string())
            .unwrap_or(actual);

        tracing::info!("volunteered for leadership as {}", name);
        inner.candidate = Some(name);
        inner.state = ParticipantState::Candidate;

        self.evaluate(&mut inner).await
    }

    /// Withdraw the candidacy, deleting our node
    ///
    /// A no-op when there is no live candidacy. The successor (if any)
    /// observes the deletion like any other departure.
    pub async fn resign(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(name) = inner.candidate.take() else {
            return Ok(());
        };
        inner.state = ParticipantState::Unregistered;
        inner.watched = None;

        let path = format!("{}/{}", self.election_path, name);
        tracing::info!("resigning candidacy {}", name);
        match self.client.delete(&path, None).await {
            Ok(()) => Ok(()),
            // Already reaped by session loss.
            Err(err) if err.is_no_node() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Current election state
    pub async fn state(&self) -> ParticipantState {
        self.inner.lock().await.state
    }

    /// Whether this participant currently leads
    pub async fn is_leader(&self) -> bool {
        self.state().await == ParticipantState::Leader
    }

    /// Bare name of our candidacy node, when one is live
    pub async fn candidate_name(&self) -> Option<String> {
        self.inner.lock().await.candidate.clone()
    }

    /// Full path of the predecessor we are watching, when a follower
    pub async fn watched_path(&self) -> Option<String> {
        self.inner.lock().await.watched.clone()
    }

    /// Stop the notification task
    ///
    /// Does not delete the candidacy node; call
    /// [`ElectionParticipant::resign`] first for a graceful departure.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Re-derive the role from a fresh listing of candidacy nodes
    ///
    /// Runs with the participant mutex held so notification deliveries
    /// can never interleave two derivations.
    async fn evaluate(&self, inner: &mut Inner) -> Result<()> {
        let Some(me) = inner.candidate.clone() else {
            // Stale notification after resign/expiry; nothing to derive.
            return Ok(());
        };

        loop {
            let mut candidates = self.client.get_children(&self.election_path, false).await?;
            sort_by_sequence(&mut candidates);

            let Some(position) = candidates.iter().position(|name| *name == me) else {
                // Our node is gone: the service declared the session dead
                // while we were deriving.
                inner.candidate = None;
                inner.state = ParticipantState::Unregistered;
                inner.watched = None;
                return Err(Error::InvalidState(
                    "candidacy node no longer exists".to_string(),
                ));
            };

            if position == 0 {
                // A leader has no predecessor to watch.
                inner.watched = None;
                if inner.state != ParticipantState::Leader {
                    inner.state = ParticipantState::Leader;
                    tracing::info!("elected leader as {}", me);
                    self.callback.on_became_leader();
                }
                return Ok(());
            }

            let predecessor = format!("{}/{}", self.election_path, candidates[position - 1]);
            match self.client.exists(&predecessor, true).await? {
                Some(_) => {
                    tracing::debug!("{} watching predecessor {}", me, predecessor);
                    inner.watched = Some(predecessor);
                    if inner.state != ParticipantState::Follower {
                        inner.state = ParticipantState::Follower;
                        self.callback.on_became_follower();
                    }
                    return Ok(());
                }
                // Predecessor vanished between listing and watch; re-derive
                // instead of leaving a missed watch behind.
                None => continue,
            }
        }
    }

    /// Notification loop: predecessor deletions and session transitions
    async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<WatchEvent>,
        mut sessions: watch::Receiver<SessionState>,
    ) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,

                changed = sessions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *sessions.borrow_and_update();
                    if state.is_terminal() {
                        let mut inner = self.inner.lock().await;
                        if inner.candidate.take().is_some() {
                            tracing::warn!(
                                "session {}, candidacy void; volunteer again on a new session",
                                state
                            );
                        }
                        inner.state = ParticipantState::Unregistered;
                        inner.watched = None;
                        break;
                    }
                    tracing::debug!("session transitioned to {}", state);
                }

                event = events.recv() => match event {
                    Ok(WatchEvent::NodeDeleted(path)) => {
                        let mut inner = self.inner.lock().await;
                        if inner.watched.as_deref() == Some(path.as_str()) {
                            inner.watched = None;
                            if let Err(err) = self.evaluate(&mut inner).await {
                                tracing::warn!("re-election failed: {}", err);
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        // The deletion we armed for may be among the dropped
                        // notifications; re-derive from a fresh listing.
                        tracing::warn!("dropped {} watch notifications, re-deriving", missed);
                        let mut inner = self.inner.lock().await;
                        if inner.watched.take().is_some() {
                            if let Err(err) = self.evaluate(&mut inner).await {
                                tracing::warn!("re-election failed: {}", err);
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::testutil::eventually;
    use crate::coordination::memory::{MemoryCoordination, MemorySession};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ELECTION_PATH: &str = "/election";

    #[derive(Default)]
    struct RecordingCallback {
        leader: AtomicUsize,
        follower: AtomicUsize,
    }

    impl RecordingCallback {
        fn leader_count(&self) -> usize {
            self.leader.load(Ordering::SeqCst)
        }

        fn follower_count(&self) -> usize {
            self.follower.load(Ordering::SeqCst)
        }
    }

    impl RoleCallback for RecordingCallback {
        fn on_became_leader(&self) {
            self.leader.fetch_add(1, Ordering::SeqCst);
        }

        fn on_became_follower(&self) {
            self.follower.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn participant(
        service: &MemoryCoordination,
    ) -> (
        Arc<ElectionParticipant>,
        Arc<MemorySession>,
        Arc<RecordingCallback>,
    ) {
        let session = service.session();
        let callback = Arc::new(RecordingCallback::default());
        let participant = ElectionParticipant::new(
            session.clone(),
            ELECTION_PATH.to_string(),
            callback.clone(),
        );
        (participant, session, callback)
    }

    #[tokio::test]
    async fn test_single_participant_becomes_leader() {
        let service = MemoryCoordination::new();
        let (leader, _session, callback) = participant(&service);

        leader.volunteer().await.unwrap();

        assert_eq!(leader.state().await, ParticipantState::Leader);
        assert!(leader.is_leader().await);
        assert_eq!(leader.watched_path().await, None);
        assert_eq!(callback.leader_count(), 1);
        assert_eq!(callback.follower_count(), 0);
    }

    #[tokio::test]
    async fn test_lowest_sequence_wins() {
        let service = MemoryCoordination::new();
        let (first, _s1, cb1) = participant(&service);
        let (second, _s2, cb2) = participant(&service);
        let (third, _s3, cb3) = participant(&service);

        first.volunteer().await.unwrap();
        second.volunteer().await.unwrap();
        third.volunteer().await.unwrap();

        assert!(first.is_leader().await);
        assert_eq!(second.state().await, ParticipantState::Follower);
        assert_eq!(third.state().await, ParticipantState::Follower);

        assert_eq!(cb1.leader_count(), 1);
        assert_eq!(cb2.follower_count(), 1);
        assert_eq!(cb3.follower_count(), 1);
        assert_eq!(cb2.leader_count() + cb3.leader_count(), 0);
    }

    #[tokio::test]
    async fn test_follower_watches_immediate_predecessor() {
        let service = MemoryCoordination::new();
        let helper = service.session();
        helper
            .create(ELECTION_PATH, &[], CreateMode::Persistent)
            .await
            .unwrap();

        // Sequences 0, 1, 2 for the helper, 3 for the participant, then
        // 4 and 5 for the helper again.
        for _ in 0..3 {
            helper
                .create("/election/c_", &[], CreateMode::EphemeralSequential)
                .await
                .unwrap();
        }

        let (follower, _session, _callback) = participant(&service);
        follower.volunteer().await.unwrap();
        assert_eq!(
            follower.candidate_name().await.as_deref(),
            Some("c_0000000003")
        );

        for _ in 0..2 {
            helper
                .create("/election/c_", &[], CreateMode::EphemeralSequential)
                .await
                .unwrap();
        }

        // Thin the field down to sequences 1, 3, 5.
        helper.delete("/election/c_0000000000", None).await.unwrap();
        helper.delete("/election/c_0000000002", None).await.unwrap();
        helper.delete("/election/c_0000000004", None).await.unwrap();

        // The participant owning c_3 must watch c_1, not c_5, and must
        // stay a follower.
        assert!(
            eventually(|| async {
                follower.watched_path().await.as_deref() == Some("/election/c_0000000001")
            })
            .await
        );
        assert_eq!(follower.state().await, ParticipantState::Follower);
        assert!(!follower.is_leader().await);
    }

    #[tokio::test]
    async fn test_watch_fanout_is_bounded_to_one() {
        let service = MemoryCoordination::new();
        let (first, _s1, _cb1) = participant(&service);
        let (second, _s2, _cb2) = participant(&service);
        let (third, _s3, _cb3) = participant(&service);

        first.volunteer().await.unwrap();
        second.volunteer().await.unwrap();
        third.volunteer().await.unwrap();

        let leader_token = format!(
            "{}/{}",
            ELECTION_PATH,
            first.candidate_name().await.unwrap()
        );
        let middle_token = format!(
            "{}/{}",
            ELECTION_PATH,
            second.candidate_name().await.unwrap()
        );

        // Only the immediate successor watches each node; deleting the
        // leader notifies exactly one peer.
        assert_eq!(service.node_watch_count(&leader_token), 1);
        assert_eq!(service.node_watch_count(&middle_token), 1);
    }

    #[tokio::test]
    async fn test_leadership_hands_off_on_session_expiry() {
        let service = MemoryCoordination::new();
        let (first, s1, cb1) = participant(&service);
        let (second, _s2, cb2) = participant(&service);
        let (third, _s3, cb3) = participant(&service);

        first.volunteer().await.unwrap();
        second.volunteer().await.unwrap();
        third.volunteer().await.unwrap();

        let second_token = format!(
            "{}/{}",
            ELECTION_PATH,
            second.candidate_name().await.unwrap()
        );

        s1.expire();

        assert!(eventually(|| async { second.is_leader().await }).await);
        assert_eq!(cb2.leader_count(), 1);

        // The third participant re-arms onto the new leader and stays a
        // follower; no spurious promotion, no second follower callback.
        assert!(
            eventually(|| async {
                third.watched_path().await.as_deref() == Some(second_token.as_str())
            })
            .await
        );
        assert_eq!(third.state().await, ParticipantState::Follower);
        assert_eq!(cb3.leader_count(), 0);
        assert_eq!(cb3.follower_count(), 1);
        assert_eq!(cb1.leader_count(), 1);
    }

    #[tokio::test]
    async fn test_leadership_hands_off_on_resign() {
        let service = MemoryCoordination::new();
        let (first, _s1, _cb1) = participant(&service);
        let (second, _s2, _cb2) = participant(&service);

        first.volunteer().await.unwrap();
        second.volunteer().await.unwrap();

        first.resign().await.unwrap();

        assert_eq!(first.state().await, ParticipantState::Unregistered);
        assert!(eventually(|| async { second.is_leader().await }).await);
    }

    #[tokio::test]
    async fn test_double_volunteer_is_rejected() {
        let service = MemoryCoordination::new();
        let (leader, _session, _callback) = participant(&service);

        leader.volunteer().await.unwrap();
        let err = leader.volunteer().await.unwrap_err();

        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_resign_without_candidacy_is_noop() {
        let service = MemoryCoordination::new();
        let (bystander, session, _callback) = participant(&service);

        bystander.resign().await.unwrap();
        bystander.volunteer().await.unwrap();
        bystander.resign().await.unwrap();
        bystander.resign().await.unwrap();

        session
            .create(ELECTION_PATH, &[], CreateMode::Persistent)
            .await
            .map(|_| ())
            .or_else(|err| if err.is_node_exists() { Ok(()) } else { Err(err) })
            .unwrap();
        let remaining = session.get_children(ELECTION_PATH, false).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn test_session_expiry_resets_identity() {
        let service = MemoryCoordination::new();
        let (original, session, _callback) = participant(&service);

        original.volunteer().await.unwrap();
        assert!(original.is_leader().await);

        session.expire();

        // Leadership is void; it must be re-earned on a fresh session.
        assert!(
            eventually(|| async {
                original.state().await == ParticipantState::Unregistered
            })
            .await
        );
        assert!(!original.is_leader().await);

        let err = original.volunteer().await.unwrap_err();
        assert!(err.is_retryable());

        // A replacement participant on a new session gets a new, higher
        // sequence rather than inheriting the old rank.
        let (replacement, _new_session, _new_callback) = participant(&service);
        replacement.volunteer().await.unwrap();
        assert!(replacement.is_leader().await);
        let name = replacement.candidate_name().await.unwrap();
        assert_ne!(name, "c_0000000000");
    }
}
