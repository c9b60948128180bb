//! In-Memory Coordination Service
//!
//! A single-process implementation of the coordination contract:
//! hierarchical namespace, zero-padded sequential naming, ephemeral nodes
//! bound to killable sessions, one-shot watches. Backs the test suite and
//! lets the cluster primitives run without external infrastructure.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use crate::coordination::{CoordinationClient, CreateMode, NodeStat, SessionState, WatchEvent};
use crate::error::{Error, Result};

/// Capacity of each session's watch-event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Width the service zero-pads sequence suffixes to
const SEQUENCE_WIDTH: usize = 10;

/// One node in the namespace
#[derive(Debug, Default)]
struct Node {
    data: Vec<u8>,
    version: i32,
    /// Owning session for ephemeral nodes
    owner: Option<u64>,
    /// Counter handed to sequential children of this node
    next_sequence: u64,
}

/// Namespace and watch state shared by every session
#[derive(Default)]
struct Shared {
    nodes: BTreeMap<String, Node>,
    /// One-shot existence/data watches: path -> watching session ids
    node_watches: HashMap<String, Vec<u64>>,
    /// One-shot child-set watches: path -> watching session ids
    child_watches: HashMap<String, Vec<u64>>,
    /// Watch-event channel of each live session
    sessions: HashMap<u64, broadcast::Sender<WatchEvent>>,
}

impl Shared {
    fn parent_of(path: &str) -> Option<&str> {
        let idx = path.rfind('/')?;
        Some(if idx == 0 { "/" } else { &path[..idx] })
    }

    fn children_of(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };

        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| !key[prefix.len()..].contains('/'))
            .map(|(key, _)| key[prefix.len()..].to_string())
            .collect()
    }

    fn stat_of(&self, path: &str) -> Option<NodeStat> {
        let node = self.nodes.get(path)?;
        Some(NodeStat {
            version: node.version,
            ephemeral: node.owner.is_some(),
            num_children: self.children_of(path).len() as u32,
        })
    }

    /// Deliver an event to every session that armed a watch in `armed`
    fn fire(&mut self, armed: Vec<u64>, event: WatchEvent) {
        for session_id in armed {
            if let Some(events) = self.sessions.get(&session_id) {
                let _ = events.send(event.clone());
            }
        }
    }

    fn fire_node_watches(&mut self, path: &str, event: WatchEvent) {
        if let Some(armed) = self.node_watches.remove(path) {
            self.fire(armed, event);
        }
    }

    fn fire_child_watches(&mut self, path: &str) {
        if let Some(armed) = self.child_watches.remove(path) {
            self.fire(armed, WatchEvent::ChildrenChanged(path.to_string()));
        }
    }

    /// Remove a node and fire the watches its disappearance trips
    fn remove_node(&mut self, path: &str) {
        self.nodes.remove(path);
        self.fire_node_watches(path, WatchEvent::NodeDeleted(path.to_string()));
        if let Some(parent) = Self::parent_of(path) {
            let parent = parent.to_string();
            self.fire_child_watches(&parent);
        }
    }
}

/// In-process coordination service shared by any number of sessions
pub struct MemoryCoordination {
    shared: Arc<Mutex<Shared>>,
    next_session_id: AtomicU64,
}

impl MemoryCoordination {
    /// Create an empty namespace (root node only)
    pub fn new() -> Self {
        let mut shared = Shared::default();
        shared.nodes.insert("/".to_string(), Node::default());

        Self {
            shared: Arc::new(Mutex::new(shared)),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Open a new session against this service
    pub fn session(&self) -> Arc<MemorySession> {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state, _) = watch::channel(SessionState::Connected);

        let mut shared = self.shared.lock().expect("coordination state poisoned");
        shared.sessions.insert(id, events.clone());

        Arc::new(MemorySession {
            id,
            shared: Arc::clone(&self.shared),
            events,
            state,
        })
    }

    #[cfg(test)]
    pub(crate) fn node_watch_count(&self, path: &str) -> usize {
        let shared = self.shared.lock().expect("coordination state poisoned");
        shared.node_watches.get(path).map_or(0, |armed| armed.len())
    }
}

impl Default for MemoryCoordination {
    fn default() -> Self {
        Self::new()
    }
}

/// One session against a [`MemoryCoordination`] service
pub struct MemorySession {
    id: u64,
    shared: Arc<Mutex<Shared>>,
    events: broadcast::Sender<WatchEvent>,
    state: watch::Sender<SessionState>,
}

impl MemorySession {
    /// Simulate the service declaring this session dead
    ///
    /// Every ephemeral node the session owns is reaped, firing the
    /// corresponding watches on surviving sessions.
    pub fn expire(&self) {
        self.terminate(SessionState::Expired);
    }

    /// Close the session gracefully; ephemerals are reaped the same way
    pub fn close(&self) {
        self.terminate(SessionState::Closed);
    }

    fn terminate(&self, final_state: SessionState) {
        let mut shared = self.shared.lock().expect("coordination state poisoned");
        if shared.sessions.remove(&self.id).is_none() {
            return;
        }

        let owned: Vec<String> = shared
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(self.id))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            shared.remove_node(&path);
        }

        for armed in shared.node_watches.values_mut() {
            armed.retain(|session_id| *session_id != self.id);
        }
        for armed in shared.child_watches.values_mut() {
            armed.retain(|session_id| *session_id != self.id);
        }
        drop(shared);

        self.state.send_replace(final_state);
    }

    fn check_alive(&self, shared: &Shared) -> Result<()> {
        if shared.sessions.contains_key(&self.id) {
            Ok(())
        } else {
            Err(Error::CoordinationUnavailable(
                "session has been terminated".to_string(),
            ))
        }
    }

    fn check_path(path: &str) -> Result<()> {
        if !path.starts_with('/') || (path.len() > 1 && path.ends_with('/')) {
            return Err(Error::Coordination(format!("invalid path: {}", path)));
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationClient for MemorySession {
    async fn create(&self, path: &str, payload: &[u8], mode: CreateMode) -> Result<String> {
        Self::check_path(path)?;
        let mut shared = self.shared.lock().expect("coordination state poisoned");
        self.check_alive(&shared)?;

        let parent = Shared::parent_of(path)
            .ok_or_else(|| Error::Coordination(format!("invalid path: {}", path)))?
            .to_string();

        let parent_node = shared
            .nodes
            .get_mut(&parent)
            .ok_or_else(|| Error::NoNode(parent.clone()))?;
        if parent_node.owner.is_some() {
            return Err(Error::Coordination(format!(
                "ephemeral node {} cannot have children",
                parent
            )));
        }

        let actual = if mode.is_sequential() {
            let sequence = parent_node.next_sequence;
            parent_node.next_sequence += 1;
            format!("{}{:0width$}", path, sequence, width = SEQUENCE_WIDTH)
        } else {
            if shared.nodes.contains_key(path) {
                return Err(Error::NodeExists(path.to_string()));
            }
            path.to_string()
        };

        shared.nodes.insert(
            actual.clone(),
            Node {
                data: payload.to_vec(),
                version: 0,
                owner: mode.is_ephemeral().then_some(self.id),
                next_sequence: 0,
            },
        );

        shared.fire_node_watches(&actual, WatchEvent::NodeCreated(actual.clone()));
        shared.fire_child_watches(&parent);

        Ok(actual)
    }

    async fn delete(&self, path: &str, expected_version: Option<i32>) -> Result<()> {
        let mut shared = self.shared.lock().expect("coordination state poisoned");
        self.check_alive(&shared)?;

        let node = shared
            .nodes
            .get(path)
            .ok_or_else(|| Error::NoNode(path.to_string()))?;

        if let Some(expected) = expected_version {
            if expected != node.version {
                return Err(Error::VersionMismatch(path.to_string()));
            }
        }

        if !shared.children_of(path).is_empty() {
            return Err(Error::Coordination(format!("node has children: {}", path)));
        }

        shared.remove_node(path);
        Ok(())
    }

    async fn exists(&self, path: &str, watch: bool) -> Result<Option<NodeStat>> {
        Self::check_path(path)?;
        let mut shared = self.shared.lock().expect("coordination state poisoned");
        self.check_alive(&shared)?;

        let stat = shared.stat_of(path);
        if watch {
            // An existence watch arms even when the node is absent; it
            // then fires on the node's creation.
            let armed = shared.node_watches.entry(path.to_string()).or_default();
            if !armed.contains(&self.id) {
                armed.push(self.id);
            }
        }
        Ok(stat)
    }

    async fn get_children(&self, path: &str, watch: bool) -> Result<Vec<String>> {
        let mut shared = self.shared.lock().expect("coordination state poisoned");
        self.check_alive(&shared)?;

        if !shared.nodes.contains_key(path) {
            return Err(Error::NoNode(path.to_string()));
        }

        let children = shared.children_of(path);
        if watch {
            let armed = shared.child_watches.entry(path.to_string()).or_default();
            if !armed.contains(&self.id) {
                armed.push(self.id);
            }
        }
        Ok(children)
    }

    async fn get_data(&self, path: &str, watch: bool) -> Result<Vec<u8>> {
        let mut shared = self.shared.lock().expect("coordination state poisoned");
        self.check_alive(&shared)?;

        let data = shared
            .nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| Error::NoNode(path.to_string()))?;

        if watch {
            let armed = shared.node_watches.entry(path.to_string()).or_default();
            if !armed.contains(&self.id) {
                armed.push(self.id);
            }
        }
        Ok(data)
    }

    fn watch_events(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    fn session_events(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.terminate(SessionState::Closed);
    }
}
