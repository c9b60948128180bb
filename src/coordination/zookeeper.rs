//! Apache ZooKeeper Backend
//!
//! Implements the coordination contract over the `zookeeper-async`
//! client. All watches are armed against the connection's default
//! watcher, which forwards node events onto the watch-event channel and
//! keeper-state transitions onto the session channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use zookeeper_async::{
    Acl, CreateMode as ZkCreateMode, KeeperState, Stat, WatchedEvent, WatchedEventType, Watcher,
    ZkError, ZooKeeper,
};

use crate::coordination::{CoordinationClient, CreateMode, NodeStat, SessionState, WatchEvent};
use crate::error::{Error, Result};

/// Capacity of the watch-event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Coordination client backed by an Apache ZooKeeper session
pub struct ZooKeeperCoordination {
    zk: ZooKeeper,
    events: broadcast::Sender<WatchEvent>,
    session: Arc<watch::Sender<SessionState>>,
}

/// Default watcher translating ZooKeeper events onto our channels
struct EventForwarder {
    events: broadcast::Sender<WatchEvent>,
    session: Arc<watch::Sender<SessionState>>,
}

impl Watcher for EventForwarder {
    fn handle(&self, event: WatchedEvent) {
        match event.event_type {
            WatchedEventType::None => {
                let state = match event.keeper_state {
                    KeeperState::SyncConnected
                    | KeeperState::ConnectedReadOnly
                    | KeeperState::SaslAuthenticated => SessionState::Connected,
                    KeeperState::Expired => SessionState::Expired,
                    KeeperState::AuthFailed => SessionState::Closed,
                    KeeperState::Disconnected => SessionState::Disconnected,
                };
                tracing::debug!("coordination session transitioned to {}", state);
                self.session.send_replace(state);
            }
            WatchedEventType::NodeCreated => self.forward(event.path, WatchEvent::NodeCreated),
            WatchedEventType::NodeDeleted => self.forward(event.path, WatchEvent::NodeDeleted),
            WatchedEventType::NodeDataChanged => {
                self.forward(event.path, WatchEvent::NodeDataChanged)
            }
            WatchedEventType::NodeChildrenChanged => {
                self.forward(event.path, WatchEvent::ChildrenChanged)
            }
            _ => {}
        }
    }
}

impl EventForwarder {
    fn forward(&self, path: Option<String>, make: fn(String) -> WatchEvent) {
        if let Some(path) = path {
            // No receivers just means nobody armed a watch yet.
            let _ = self.events.send(make(path));
        }
    }
}

impl ZooKeeperCoordination {
    /// Connect to a ZooKeeper ensemble
    ///
    /// `servers` is the usual comma-separated `host:port` list. The
    /// session starts in `Connecting` and transitions on keeper events.
    pub async fn connect(servers: &str, session_timeout: Duration) -> Result<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (session, _) = watch::channel(SessionState::Connecting);
        let session = Arc::new(session);

        let forwarder = EventForwarder {
            events: events.clone(),
            session: Arc::clone(&session),
        };

        let zk = ZooKeeper::connect(servers, session_timeout, forwarder)
            .await
            .map_err(|err| {
                Error::CoordinationUnavailable(format!("connect to {} failed: {:?}", servers, err))
            })?;

        Ok(Self {
            zk,
            events,
            session,
        })
    }

    /// Close the session, reaping every ephemeral node it owns
    pub async fn close(&self) -> Result<()> {
        let result = self.zk.close().await;
        self.session.send_replace(SessionState::Closed);
        result.map_err(|err| Error::Coordination(format!("close failed: {:?}", err)))
    }
}

/// Map a ZooKeeper error onto the wolfpack taxonomy
fn zk_error(err: ZkError, path: &str) -> Error {
    match err {
        ZkError::NoNode => Error::NoNode(path.to_string()),
        ZkError::NodeExists => Error::NodeExists(path.to_string()),
        ZkError::BadVersion => Error::VersionMismatch(path.to_string()),
        ZkError::ConnectionLoss | ZkError::SessionExpired | ZkError::OperationTimeout => {
            Error::CoordinationUnavailable(format!("{:?}", err))
        }
        other => Error::Coordination(format!("{:?}", other)),
    }
}

fn zk_mode(mode: CreateMode) -> ZkCreateMode {
    match mode {
        CreateMode::Persistent => ZkCreateMode::Persistent,
        CreateMode::PersistentSequential => ZkCreateMode::PersistentSequential,
        CreateMode::Ephemeral => ZkCreateMode::Ephemeral,
        CreateMode::EphemeralSequential => ZkCreateMode::EphemeralSequential,
    }
}

fn node_stat(stat: Stat) -> NodeStat {
    NodeStat {
        version: stat.version,
        ephemeral: stat.ephemeral_owner != 0,
        num_children: stat.num_children.max(0) as u32,
    }
}

#[async_trait]
impl CoordinationClient for ZooKeeperCoordination {
    async fn create(&self, path: &str, payload: &[u8], mode: CreateMode) -> Result<String> {
        self.zk
            .create(
                path,
                payload.to_vec(),
                Acl::open_unsafe().clone(),
                zk_mode(mode),
            )
            .await
            .map_err(|err| zk_error(err, path))
    }

    async fn delete(&self, path: &str, expected_version: Option<i32>) -> Result<()> {
        self.zk
            .delete(path, expected_version)
            .await
            .map_err(|err| zk_error(err, path))
    }

    async fn exists(&self, path: &str, watch: bool) -> Result<Option<NodeStat>> {
        let stat = self
            .zk
            .exists(path, watch)
            .await
            .map_err(|err| zk_error(err, path))?;
        Ok(stat.map(node_stat))
    }

    async fn get_children(&self, path: &str, watch: bool) -> Result<Vec<String>> {
        self.zk
            .get_children(path, watch)
            .await
            .map_err(|err| zk_error(err, path))
    }

    async fn get_data(&self, path: &str, watch: bool) -> Result<Vec<u8>> {
        let (data, _stat) = self
            .zk
            .get_data(path, watch)
            .await
            .map_err(|err| zk_error(err, path))?;
        Ok(data)
    }

    fn watch_events(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    fn session_events(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }
}
