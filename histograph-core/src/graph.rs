//! Incremental graph model for one session.
//!
//! [`GraphModel`] owns the canonical [`Snapshot`] and the expansion state (the
//! set of node ids the user has expanded). It is the only place that decides
//! how backend results are merged.
//!
//! Collapsing a node only removes it from the expansion state. Nodes and links
//! that an expansion merged in are never pruned again; consumers that want a
//! narrower view filter by [`GraphModel::is_expanded`] themselves.

use crate::snapshot::{MergeOutcome, NetworkStats, Snapshot, SnapshotError};
use histograph_client::{Backend, ClientError, NodeId, SessionId};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Backend failure or a payload that breaks snapshot invariants.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Backend(#[from] ClientError),

    #[error("malformed graph data: {0}")]
    Malformed(#[from] SnapshotError),
}

impl FetchError {
    pub fn is_connection(&self) -> bool {
        matches!(self, FetchError::Backend(e) if e.is_connection())
    }
}

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Expansion of '{0}' is already in progress")]
    AlreadyInProgress(NodeId),

    #[error("No session loaded")]
    NoSession,

    #[error("Node '{0}' is not part of the current snapshot")]
    UnknownNode(NodeId),

    #[error("Session changed while the request was pending")]
    Superseded,
}

impl From<ClientError> for GraphError {
    fn from(e: ClientError) -> Self {
        GraphError::Fetch(FetchError::Backend(e))
    }
}

impl From<SnapshotError> for GraphError {
    fn from(e: SnapshotError) -> Self {
        GraphError::Fetch(FetchError::Malformed(e))
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;

/// Change notifications published to subscribers.
#[derive(Debug, Clone)]
pub enum GraphEvent {
    /// A session snapshot replaced the previous one.
    Loaded {
        session: SessionId,
        snapshot: Snapshot,
    },
    /// An expansion was merged.
    Expanded {
        node: NodeId,
        snapshot: Snapshot,
        outcome: MergeOutcome,
    },
    /// A node was removed from the expansion state. The snapshot is unchanged.
    Collapsed { node: NodeId },
    /// A load (`node: None`) or an expansion failed. Prior state is intact.
    Failed {
        node: Option<NodeId>,
        message: String,
        connection: bool,
    },
}

#[derive(Default)]
struct GraphState {
    session: Option<SessionId>,
    /// Bumped every time a load is adopted.
    generation: u64,
    /// Ticket of the most recently requested load.
    load_ticket: u64,
    snapshot: Snapshot,
    expanded: HashSet<NodeId>,
}

/// Pending expansions, keyed by the load generation they were issued in.
type InFlightSet = HashSet<(u64, NodeId)>;

/// Removes an entry from the in-flight set when the expansion finishes or
/// its future is dropped.
struct InFlight<'a> {
    set: &'a Mutex<InFlightSet>,
    key: (u64, NodeId),
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.key);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct GraphModel<B: Backend> {
    backend: Arc<B>,
    state: Mutex<GraphState>,
    in_flight: Mutex<InFlightSet>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<GraphEvent>>>,
}

impl<B: Backend> GraphModel<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            state: Mutex::new(GraphState::default()),
            in_flight: Mutex::new(HashSet::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<GraphEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(tx);
        rx
    }

    fn publish(&self, event: GraphEvent) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn publish_failure(&self, node: Option<NodeId>, error: &GraphError) {
        let connection = matches!(error, GraphError::Fetch(e) if e.is_connection());
        self.publish(GraphEvent::Failed {
            node,
            message: error.to_string(),
            connection,
        });
    }

    /// Replace the current snapshot with the session's full network and clear
    /// the expansion state. On failure the previous snapshot is kept.
    pub async fn load(&self, session: SessionId) -> Result<Snapshot> {
        let ticket = {
            let mut state = lock(&self.state);
            state.load_ticket += 1;
            state.load_ticket
        };
        info!("Loading network for session {}", session);

        let fetched = match self.backend.network(session).await {
            Ok(data) => Snapshot::from_network(data).map_err(GraphError::from),
            Err(e) => Err(GraphError::from(e)),
        };

        let snapshot = match fetched {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Failed to load session {}: {}", session, e);
                self.publish_failure(None, &e);
                return Err(e);
            }
        };

        {
            let mut state = lock(&self.state);
            if state.load_ticket != ticket {
                debug!("Discarding stale load of session {}", session);
                return Err(GraphError::Superseded);
            }
            state.session = Some(session);
            state.generation += 1;
            state.snapshot = snapshot.clone();
            state.expanded.clear();
        }

        let stats = snapshot.stats();
        info!(
            "Loaded session {}: {} nodes, {} links",
            session, stats.nodes, stats.connections
        );
        self.publish(GraphEvent::Loaded {
            session,
            snapshot: snapshot.clone(),
        });
        Ok(snapshot)
    }

    /// Toggle a node.
    ///
    /// An expanded node is collapsed: it leaves the expansion state and the
    /// snapshot is returned untouched. Otherwise its neighbours are fetched and
    /// merged, then it joins the expansion state. Only one request per node id
    /// may be pending for the loaded session; a second one fails with
    /// [`GraphError::AlreadyInProgress`] without reaching the backend. A request
    /// left over from a previous session does not block the node.
    pub async fn expand(&self, node: &NodeId) -> Result<Snapshot> {
        let (session, generation) = {
            let mut state = lock(&self.state);
            let session = state.session.ok_or(GraphError::NoSession)?;
            if !state.snapshot.contains_node(node) {
                return Err(GraphError::UnknownNode(node.clone()));
            }
            if state.expanded.remove(node) {
                let snapshot = state.snapshot.clone();
                drop(state);
                info!("Collapsed node {}", node);
                self.publish(GraphEvent::Collapsed { node: node.clone() });
                return Ok(snapshot);
            }
            (session, state.generation)
        };

        let _in_flight = {
            let key = (generation, node.clone());
            let mut in_flight = lock(&self.in_flight);
            if !in_flight.insert(key.clone()) {
                debug!("Expansion of {} already pending, ignoring", node);
                return Err(GraphError::AlreadyInProgress(node.clone()));
            }
            InFlight {
                set: &self.in_flight,
                key,
            }
        };

        info!("Expanding node {} in session {}", node, session);
        let data = match self.backend.expand_node(session, node).await {
            Ok(data) => data,
            Err(e) => {
                let e = GraphError::from(e);
                warn!("Failed to expand {}: {}", node, e);
                self.publish_failure(Some(node.clone()), &e);
                return Err(e);
            }
        };

        let (snapshot, outcome) = {
            let mut state = lock(&self.state);
            if state.generation != generation {
                debug!("Discarding expansion of {} from a previous session", node);
                return Err(GraphError::Superseded);
            }
            let merged = state.snapshot.merge(data);
            let outcome = match merged {
                Ok(outcome) => outcome,
                Err(e) => {
                    drop(state);
                    let e = GraphError::from(e);
                    warn!("Rejected expansion of {}: {}", node, e);
                    self.publish_failure(Some(node.clone()), &e);
                    return Err(e);
                }
            };
            state.expanded.insert(node.clone());
            (state.snapshot.clone(), outcome)
        };

        info!(
            "Expanded {}: +{} nodes, +{} links",
            node,
            outcome.added_nodes.len(),
            outcome.added_links
        );
        self.publish(GraphEvent::Expanded {
            node: node.clone(),
            snapshot: snapshot.clone(),
            outcome,
        });
        Ok(snapshot)
    }

    pub fn current_snapshot(&self) -> Snapshot {
        lock(&self.state).snapshot.clone()
    }

    pub fn session(&self) -> Option<SessionId> {
        lock(&self.state).session
    }

    pub fn is_expanded(&self, node: &NodeId) -> bool {
        lock(&self.state).expanded.contains(node)
    }

    /// Whether an expansion of `node` issued for the loaded session is pending.
    pub fn is_pending(&self, node: &NodeId) -> bool {
        let generation = lock(&self.state).generation;
        lock(&self.in_flight).contains(&(generation, node.clone()))
    }

    pub fn expansion_state(&self) -> HashSet<NodeId> {
        lock(&self.state).expanded.clone()
    }

    pub fn stats(&self) -> NetworkStats {
        lock(&self.state).snapshot.stats()
    }
}
