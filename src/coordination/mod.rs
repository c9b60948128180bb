//! Coordination Service Abstraction
//!
//! Wolfpack talks to a ZooKeeper-style coordination service: a hierarchical
//! namespace of nodes with ephemeral and sequential create modes and
//! one-shot change watches. The trait in this module is the entire surface
//! the cluster primitives depend on; backends live in submodules.

pub mod memory;
mod session;
#[cfg(feature = "zookeeper")]
pub mod zookeeper;

pub use session::Session;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use crate::error::Result;

/// How a node is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Node survives the creating session
    Persistent,
    /// Persistent node with a service-assigned sequence suffix
    PersistentSequential,
    /// Node is deleted when the creating session ends
    Ephemeral,
    /// Ephemeral node with a service-assigned sequence suffix
    EphemeralSequential,
}

impl CreateMode {
    /// Whether nodes created in this mode die with their session
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    /// Whether the service appends a sequence suffix to the node name
    pub fn is_sequential(&self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// Metadata for an existing node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStat {
    /// Data version, incremented on every write
    pub version: i32,
    /// Whether the node is bound to a session
    pub ephemeral: bool,
    /// Number of direct children
    pub num_children: u32,
}

/// A one-shot watch firing
///
/// Consuming a notification disarms the watch; observing the next change
/// requires re-calling the operation that armed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A watched path came into existence
    NodeCreated(String),
    /// A watched node was deleted
    NodeDeleted(String),
    /// A watched node's payload changed
    NodeDataChanged(String),
    /// The child set of a watched node changed
    ChildrenChanged(String),
}

impl WatchEvent {
    /// Path the event refers to
    pub fn path(&self) -> &str {
        match self {
            WatchEvent::NodeCreated(path)
            | WatchEvent::NodeDeleted(path)
            | WatchEvent::NodeDataChanged(path)
            | WatchEvent::ChildrenChanged(path) => path,
        }
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection is being established
    Connecting,
    /// Session is live
    Connected,
    /// Connection dropped; the session may still recover
    Disconnected,
    /// Session declared dead by the service; all ephemerals are gone
    Expired,
    /// Session closed by the owner
    Closed,
}

impl SessionState {
    /// Whether the session can still issue or recover requests
    pub fn is_alive(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether the session is permanently gone
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Expired | SessionState::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "CONNECTING"),
            SessionState::Connected => write!(f, "CONNECTED"),
            SessionState::Disconnected => write!(f, "DISCONNECTED"),
            SessionState::Expired => write!(f, "EXPIRED"),
            SessionState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Session-oriented client to the coordination service
///
/// One instance wraps one session. Watches armed through the `watch`
/// flags are one-shot and fire on [`CoordinationClient::watch_events`];
/// session transitions fire on [`CoordinationClient::session_events`].
/// The service guarantees per-node ordering of notifications, nothing
/// more.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Create a node, returning the actual path (sequence suffix included
    /// in sequential modes). Fails with `NodeExists` for a non-sequential
    /// path that is already present.
    async fn create(&self, path: &str, payload: &[u8], mode: CreateMode) -> Result<String>;

    /// Delete a node. Fails with `NoNode` when absent and
    /// `VersionMismatch` when `expected_version` is stale.
    async fn delete(&self, path: &str, expected_version: Option<i32>) -> Result<()>;

    /// Check a node's existence, optionally arming a one-shot watch that
    /// fires on its next creation, deletion, or data change.
    async fn exists(&self, path: &str, watch: bool) -> Result<Option<NodeStat>>;

    /// List a node's children, optionally arming a one-shot watch that
    /// fires on the next child-set change. Order is unspecified.
    async fn get_children(&self, path: &str, watch: bool) -> Result<Vec<String>>;

    /// Read a node's payload, optionally arming a one-shot watch. Fails
    /// with `NoNode` when the node vanished between listing and read.
    async fn get_data(&self, path: &str, watch: bool) -> Result<Vec<u8>>;

    /// Subscribe to one-shot watch firings armed through this client
    fn watch_events(&self) -> broadcast::Receiver<WatchEvent>;

    /// Subscribe to session lifecycle transitions
    fn session_events(&self) -> watch::Receiver<SessionState>;
}
