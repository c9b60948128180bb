//! Service Registry
//!
//! Each worker registers an ephemeral, address-bearing node under a
//! shared registry path. Every instance keeps a cached snapshot of all
//! live member addresses, rebuilt from scratch whenever the child set
//! changes and swapped in atomically so readers never see a partial
//! list.

use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::cluster::{ensure_node, sort_by_sequence};
use crate::coordination::{CoordinationClient, CreateMode, SessionState, WatchEvent};
use crate::error::Result;

/// Prefix for member node names under the registry path
const MEMBER_PREFIX: &str = "n_";

/// Registration state, guarded by the instance mutex
struct Inner {
    /// Full path of our member node, when registered
    token: Option<String>,
}

/// One participant in the service registry
///
/// Constructing a registry spawns its notification task; the task is
/// stopped by [`MembershipRegistry::shutdown`] or when the session
/// reaches a terminal state. The watch chain starts with the first
/// [`MembershipRegistry::register`] or
/// [`MembershipRegistry::refresh_snapshot`] call.
pub struct MembershipRegistry {
    client: Arc<dyn CoordinationClient>,
    registry_path: String,
    inner: Mutex<Inner>,
    /// Published snapshot; replaced by pointer swap, never mutated
    snapshot: RwLock<Arc<Vec<String>>>,
    /// Serializes refreshes so a slower derivation can never overwrite a
    /// newer published snapshot
    refresh: Mutex<()>,
    shutdown: CancellationToken,
}

impl MembershipRegistry {
    /// Create a registry instance and start its notification task
    pub fn new(client: Arc<dyn CoordinationClient>, registry_path: String) -> Arc<Self> {
        // Subscribe before any watch can be armed so no firing is missed.
        let events = client.watch_events();
        let sessions = client.session_events();

        let registry = Arc::new(Self {
            client,
            registry_path,
            inner: Mutex::new(Inner { token: None }),
            snapshot: RwLock::new(Arc::new(Vec::new())),
            refresh: Mutex::new(()),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(Self::run(Arc::clone(&registry), events, sessions));
        registry
    }

    /// Register this process's address in the registry
    ///
    /// Creates the registry parent if missing, then one ephemeral member
    /// node carrying `address`. Idempotent at the instance level: a
    /// second call while registered is a no-op and returns `false`.
    pub async fn register(&self, address: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.token.is_some() {
            tracing::debug!("already registered to service registry");
            return Ok(false);
        }

        ensure_node(self.client.as_ref(), &self.registry_path).await?;

        let prefix = format!("{}/{}", self.registry_path, MEMBER_PREFIX);
        let actual = self
            .client
            .create(&prefix, address.as_bytes(), CreateMode::EphemeralSequential)
            .await?;
        tracing::info!("registered to service registry as {}", actual);
        inner.token = Some(actual);
        drop(inner);

        self.refresh_snapshot().await?;
        Ok(true)
    }

    /// Remove this process's member node
    ///
    /// A no-op when never registered or when the node is already gone
    /// (reaped by session loss).
    pub async fn unregister(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(path) = inner.token.take() else {
            return Ok(());
        };

        tracing::info!("unregistering {} from service registry", path);
        match self.client.delete(&path, None).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_no_node() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Rebuild and publish the member snapshot
    ///
    /// Lists the registry children with a fresh one-shot watch armed,
    /// reads each member's address, and swaps the result in. A member
    /// that vanishes between listing and read has already left and is
    /// skipped, not an error.
    pub async fn refresh_snapshot(&self) -> Result<()> {
        let _serialized = self.refresh.lock().await;

        let mut members = self.client.get_children(&self.registry_path, true).await?;
        sort_by_sequence(&mut members);

        let mut addresses = Vec::with_capacity(members.len());
        for member in &members {
            let path = format!("{}/{}", self.registry_path, member);
            match self.client.get_data(&path, false).await {
                Ok(data) => addresses.push(String::from_utf8_lossy(&data).into_owned()),
                Err(err) if err.is_no_node() => continue,
                Err(err) => return Err(err),
            }
        }

        tracing::debug!("cluster members: {:?}", addresses);
        *self.snapshot.write().await = Arc::new(addresses);
        Ok(())
    }

    /// The most recently published snapshot of member addresses
    ///
    /// Never touches the coordination service; safe to poll concurrently
    /// with refreshes.
    pub async fn snapshot(&self) -> Arc<Vec<String>> {
        Arc::clone(&*self.snapshot.read().await)
    }

    /// Whether this instance currently holds a member node
    pub async fn is_registered(&self) -> bool {
        self.inner.lock().await.token.is_some()
    }

    /// Full path of our member node, when registered
    pub async fn member_path(&self) -> Option<String> {
        self.inner.lock().await.token.clone()
    }

    /// Stop the notification task
    ///
    /// Does not delete the member node; call
    /// [`MembershipRegistry::unregister`] first for a graceful departure.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Notification loop: child-set changes and session transitions
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
                        if inner.token.take().is_some() {
                            tracing::warn!(
                                "session {}, registration void; register again on a new session",
                                state
                            );
                        }
                        break;
                    }
                    tracing::debug!("session transitioned to {}", state);
                }

                event = events.recv() => match event {
                    Ok(WatchEvent::ChildrenChanged(path)) if path == self.registry_path => {
                        if let Err(err) = self.refresh_snapshot().await {
                            tracing::warn!("membership refresh failed: {}", err);
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        // A children change may be among the dropped
                        // notifications; rebuild from a fresh listing.
                        tracing::warn!("dropped {} watch notifications, refreshing", missed);
                        if let Err(err) = self.refresh_snapshot().await {
                            tracing::warn!("membership refresh failed: {}", err);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }
}
