use histograph_client::{Link, NetworkData, Node, NodeId, NodeType};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Unordered endpoint pair identifying an edge. `{a, b}` and `{b, a}` produce
/// the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey(NodeId, NodeId);

impl EdgeKey {
    pub fn new(a: &NodeId, b: &NodeId) -> Self {
        if a <= b {
            EdgeKey(a.clone(), b.clone())
        } else {
            EdgeKey(b.clone(), a.clone())
        }
    }

    pub fn of(link: &Link) -> Self {
        Self::new(&link.source, &link.target)
    }

    pub fn endpoints(&self) -> (&NodeId, &NodeId) {
        (&self.0, &self.1)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("duplicate node id '{0}'")]
    DuplicateNode(NodeId),

    #[error("link {from} -> {to} references unknown node '{missing}'")]
    DanglingLink {
        from: NodeId,
        to: NodeId,
        missing: NodeId,
    },
}

/// What a merge actually added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added_nodes: Vec<NodeId>,
    pub added_links: usize,
}

impl MergeOutcome {
    pub fn is_empty(&self) -> bool {
        self.added_nodes.is_empty() && self.added_links == 0
    }
}

/// Header counts shown above the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub nodes: usize,
    pub events: usize,
    pub people: usize,
    pub connections: usize,
}

/// Deduplicated node/link collection for one session.
///
/// Nodes are keyed by id and links by their unordered endpoint pair. Both keep
/// insertion order for iteration. Every stored link has both endpoints present.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    nodes: Vec<Node>,
    node_index: HashMap<NodeId, usize>,
    links: Vec<Link>,
    link_index: HashMap<EdgeKey, usize>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from a full network payload.
    ///
    /// Duplicate node ids and links to unknown nodes reject the whole payload.
    /// Reciprocal or repeated links collapse into one stored edge.
    pub fn from_network(data: NetworkData) -> Result<Self, SnapshotError> {
        let mut snapshot = Snapshot::new();
        for node in data.nodes {
            let id = node.id.clone();
            if !snapshot.insert_node(node) {
                return Err(SnapshotError::DuplicateNode(id));
            }
        }
        for link in &data.links {
            snapshot.check_endpoints(link, &HashSet::new())?;
        }
        for link in data.links {
            snapshot.insert_link(link);
        }
        Ok(snapshot)
    }

    /// Validate an expansion payload against this snapshot without applying it.
    ///
    /// A link endpoint may be either an incoming node or an existing one.
    pub fn check_merge(&self, incoming: &NetworkData) -> Result<(), SnapshotError> {
        let incoming_ids: HashSet<&NodeId> = incoming.nodes.iter().map(|n| &n.id).collect();
        for link in &incoming.links {
            self.check_endpoints(link, &incoming_ids)?;
        }
        Ok(())
    }

    /// Merge an expansion payload. Existing nodes are never overwritten and a
    /// link is only added if no stored link has the same unordered pair.
    ///
    /// The payload is validated first; on error nothing is applied.
    pub fn merge(&mut self, incoming: NetworkData) -> Result<MergeOutcome, SnapshotError> {
        self.check_merge(&incoming)?;

        let mut outcome = MergeOutcome::default();
        for node in incoming.nodes {
            let id = node.id.clone();
            if self.insert_node(node) {
                outcome.added_nodes.push(id);
            }
        }
        for link in incoming.links {
            if self.insert_link(link) {
                outcome.added_links += 1;
            }
        }
        Ok(outcome)
    }

    fn check_endpoints(&self, link: &Link, extra: &HashSet<&NodeId>) -> Result<(), SnapshotError> {
        for endpoint in [&link.source, &link.target] {
            if !self.contains_node(endpoint) && !extra.contains(endpoint) {
                return Err(SnapshotError::DanglingLink {
                    from: link.source.clone(),
                    to: link.target.clone(),
                    missing: endpoint.clone(),
                });
            }
        }
        Ok(())
    }

    fn insert_node(&mut self, node: Node) -> bool {
        if self.node_index.contains_key(&node.id) {
            return false;
        }
        self.node_index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        true
    }

    fn insert_link(&mut self, link: Link) -> bool {
        let key = EdgeKey::of(&link);
        if self.link_index.contains_key(&key) {
            return false;
        }
        self.link_index.insert(key, self.links.len());
        self.links.push(link);
        true
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn link(&self, a: &NodeId, b: &NodeId) -> Option<&Link> {
        self.link_index.get(&EdgeKey::new(a, b)).map(|&i| &self.links[i])
    }

    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.node_index.contains_key(id)
    }

    pub fn contains_edge(&self, a: &NodeId, b: &NodeId) -> bool {
        self.link_index.contains_key(&EdgeKey::new(a, b))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adjacency list over the stored links, in insertion order.
    pub fn adjacency(&self) -> HashMap<&NodeId, Vec<&NodeId>> {
        let mut adjacency: HashMap<&NodeId, Vec<&NodeId>> = HashMap::new();
        for link in &self.links {
            adjacency.entry(&link.source).or_default().push(&link.target);
            if link.source != link.target {
                adjacency.entry(&link.target).or_default().push(&link.source);
            }
        }
        adjacency
    }

    pub fn stats(&self) -> NetworkStats {
        let events = self
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Event)
            .count();
        NetworkStats {
            nodes: self.nodes.len(),
            events,
            people: self.nodes.len() - events,
            connections: self.links.len(),
        }
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes && self.links == other.links
    }
}
