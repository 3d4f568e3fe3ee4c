use crate::graph::GraphError;
use crate::snapshot::Snapshot;
use histograph_client::{ClientError, Node, NodeType, Session};

pub const LABEL_MAX_CHARS: usize = 15;
pub const DESCRIPTION_MAX_CHARS: usize = 100;

/// Why there is nothing to draw. Each reason has its own corrective action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyReason {
    NoSessions,
    NoNetworkData,
}

/// What the explorer shows in place of (or as) the graph.
///
/// An empty result and an unreachable backend are separate states: the first
/// asks the user to start an extraction, the second to retry the connection.
/// A backend that answered with an error status or a payload that could not
/// be used is reported as [`ViewState::BackendError`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState {
    Loading,
    Empty(EmptyReason),
    ConnectionError(String),
    BackendError(String),
    Ready,
}

impl ViewState {
    pub fn from_sessions(result: &Result<Vec<Session>, ClientError>) -> Self {
        match result {
            Ok(sessions) if sessions.is_empty() => ViewState::Empty(EmptyReason::NoSessions),
            Ok(_) => ViewState::Ready,
            Err(e) if e.is_connection() => {
                ViewState::ConnectionError(connection_message(&e.to_string()))
            }
            Err(e) => ViewState::BackendError(e.to_string()),
        }
    }

    pub fn from_load(result: &Result<Snapshot, GraphError>) -> Self {
        match result {
            Ok(snapshot) if snapshot.is_empty() => ViewState::Empty(EmptyReason::NoNetworkData),
            Ok(_) => ViewState::Ready,
            Err(GraphError::Fetch(e)) if e.is_connection() => {
                ViewState::ConnectionError(connection_message(&e.to_string()))
            }
            Err(GraphError::Superseded) => ViewState::Loading,
            Err(e) => ViewState::BackendError(e.to_string()),
        }
    }

    pub fn headline(&self) -> &'static str {
        match self {
            ViewState::Loading => "Loading...",
            ViewState::Empty(EmptyReason::NoSessions) => "No extraction sessions found",
            ViewState::Empty(EmptyReason::NoNetworkData) => "No Network Data Available",
            ViewState::ConnectionError(_) => "Connection Error",
            ViewState::BackendError(_) => "Backend Error",
            ViewState::Ready => "Network Graph",
        }
    }

    /// Corrective action offered to the user.
    pub fn hint(&self) -> &'static str {
        match self {
            ViewState::Loading => "",
            ViewState::Empty(EmptyReason::NoSessions) => {
                "Start a new extraction (histograph extract) to see network data."
            }
            ViewState::Empty(EmptyReason::NoNetworkData) => {
                "The selected session has no network data. Select a different session or start a new extraction."
            }
            ViewState::ConnectionError(_) => "Press r to retry the connection.",
            ViewState::BackendError(_) => "Press r to retry.",
            ViewState::Ready => "Click nodes to expand/collapse, drag to pan, scroll to zoom.",
        }
    }
}

fn connection_message(detail: &str) -> String {
    format!(
        "Failed to reach the backend. Please check that the server is running. ({})",
        detail
    )
}

/// Cut `text` to at most `max` characters, marking the cut with `...`.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

pub fn truncate_label(title: &str) -> String {
    truncate(title, LABEL_MAX_CHARS)
}

/// Transient hover detail for a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDetail {
    pub title: String,
    pub node_type: NodeType,
    pub degree: u32,
    pub expanded: bool,
    pub description: Option<String>,
    pub dates: Option<String>,
}

impl NodeDetail {
    pub fn new(node: &Node, expanded: bool) -> Self {
        let dates = match (node.start_date.as_deref(), node.end_date.as_deref()) {
            (Some(start), Some(end)) if !start.is_empty() && !end.is_empty() => {
                Some(format!("{} – {}", start, end))
            }
            (Some(date), _) | (_, Some(date)) if !date.is_empty() => Some(date.to_string()),
            _ => None,
        };

        Self {
            title: node.title.clone(),
            node_type: node.node_type,
            degree: node.degree,
            expanded,
            description: node
                .description()
                .map(|d| truncate(d, DESCRIPTION_MAX_CHARS)),
            dates,
        }
    }

    pub fn expansion_status(&self) -> &'static str {
        if self.expanded {
            "✓ Expanded"
        } else {
            "Click to expand"
        }
    }

    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            self.title.clone(),
            format!("Type: {}", self.node_type.as_str()),
            format!("Degree: {}", self.degree),
        ];
        if let Some(ref dates) = self.dates {
            lines.push(format!("Dates: {}", dates));
        }
        lines.push(self.expansion_status().to_string());
        if let Some(ref description) = self.description {
            lines.push(description.clone());
        }
        lines
    }
}
