use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Opaque node identifier, stable across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(SessionId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Event,
    Person,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Event => "Event",
            NodeType::Person => "Person",
        }
    }
}

/// A graph vertex as served by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub title: String,
    pub node_type: NodeType,
    /// Hop distance from the seed (0 = seed).
    pub degree: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, title: impl Into<String>, node_type: NodeType, degree: u32) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            node_type,
            degree,
            description: None,
            start_date: None,
            end_date: None,
            metadata: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Description with the backend's empty-string placeholder treated as absent.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref().filter(|d| !d.trim().is_empty())
    }
}

/// A graph edge. Stored ordered, compared unordered by the graph model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub source: NodeId,
    pub target: NodeId,
    /// Hop level at which the edge was discovered.
    pub degree: u32,
}

impl Link {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>, degree: u32) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            degree,
        }
    }
}

/// Node/link payload returned by the network and expand endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkData {
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

/// An extraction run. Owned by the backend; read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub session_name: String,
    pub seed_url: String,
    pub max_degree: u32,
    pub total_nodes: u64,
    pub status: SessionStatus,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegreeCount {
    #[serde(rename = "Event", default)]
    pub events: u64,
    #[serde(rename = "Person", default)]
    pub people: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session: Session,
    #[serde(default)]
    pub degree_counts: BTreeMap<u32, DegreeCount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    #[default]
    Sql,
    Csv,
}

impl OutputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputType::Sql => "sql",
            OutputType::Csv => "csv",
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sql" => Ok(OutputType::Sql),
            "csv" => Ok(OutputType::Csv),
            other => Err(format!("unknown output type '{}' (expected sql or csv)", other)),
        }
    }
}

pub const DEFAULT_SEED_URL: &str = "https://en.wikipedia.org/wiki/Korean_War";
pub const DEFAULT_MAX_DEGREE: u32 = 3;

/// Body of `POST /extract`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub output_type: OutputType,
    pub seed_url: String,
    pub max_degree: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            output_type: OutputType::Sql,
            seed_url: DEFAULT_SEED_URL.to_string(),
            max_degree: DEFAULT_MAX_DEGREE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStarted {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Completed,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Running)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    status: String,
    progress: Option<i64>,
    error: Option<String>,
}

/// Validated body of `GET /extract/{id}/status`.
///
/// A running extraction must report progress in 0..=100. Terminal reports may
/// omit it (the backend drops the field when a run fails).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStatus")]
pub struct StatusReport {
    pub status: RunState,
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TryFrom<RawStatus> for StatusReport {
    type Error = String;

    fn try_from(raw: RawStatus) -> Result<Self, Self::Error> {
        let status = match raw.status.as_str() {
            "running" => RunState::Running,
            "completed" => RunState::Completed,
            "failed" => RunState::Failed,
            other => return Err(format!("unknown extraction status '{}'", other)),
        };

        let progress = match raw.progress {
            Some(p) if (0..=100).contains(&p) => Some(p as u8),
            Some(p) => return Err(format!("progress {} outside 0..=100", p)),
            None if status == RunState::Running => {
                return Err("running status without progress".to_string());
            }
            None => None,
        };

        Ok(StatusReport {
            status,
            progress,
            error: raw.error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_decodes_backend_shape() {
        let json = r#"{
            "id": "E1",
            "title": "Korean War",
            "node_type": "Event",
            "degree": 0,
            "description": "",
            "start_date": "1950-06-25",
            "end_date": "1953-07-27",
            "metadata": {"casualties": "unknown"}
        }"#;
        let node: Node = serde_json::from_str(json).unwrap();
        assert_eq!(node.id, NodeId::from("E1"));
        assert_eq!(node.node_type, NodeType::Event);
        assert_eq!(node.description(), None);
        assert!(node.metadata.unwrap().contains_key("casualties"));
    }

    #[test]
    fn test_node_without_id_is_rejected() {
        let json = r#"{"title": "Nameless", "node_type": "Person", "degree": 1}"#;
        assert!(serde_json::from_str::<Node>(json).is_err());
    }

    #[test]
    fn test_unknown_node_type_is_rejected() {
        let json = r#"{"id": "X", "title": "X", "node_type": "Place", "degree": 1}"#;
        assert!(serde_json::from_str::<Node>(json).is_err());
    }

    #[test]
    fn test_status_report_validation() {
        let ok: StatusReport =
            serde_json::from_str(r#"{"status": "running", "progress": 55}"#).unwrap();
        assert_eq!(ok.status, RunState::Running);
        assert_eq!(ok.progress, Some(55));

        let failed: StatusReport =
            serde_json::from_str(r#"{"status": "failed", "error": "boom"}"#).unwrap();
        assert!(failed.status.is_terminal());
        assert_eq!(failed.progress, None);
        assert_eq!(failed.error.as_deref(), Some("boom"));

        assert!(serde_json::from_str::<StatusReport>(r#"{"status": "running"}"#).is_err());
        assert!(
            serde_json::from_str::<StatusReport>(r#"{"status": "running", "progress": 101}"#)
                .is_err()
        );
        assert!(
            serde_json::from_str::<StatusReport>(r#"{"status": "unknown", "progress": 0}"#)
                .is_err()
        );
    }

    #[test]
    fn test_session_summary_integer_degree_keys() {
        let json = r#"{
            "session": {
                "id": 1,
                "session_name": "Korean War",
                "seed_url": "https://en.wikipedia.org/wiki/Korean_War",
                "max_degree": 3,
                "total_nodes": 21,
                "status": "completed",
                "started_at": "2024-01-01T10:00:00",
                "created_at": "2024-01-01T10:00:00"
            },
            "degree_counts": {"0": {"Event": 1, "Person": 0}, "1": {"Event": 0, "Person": 10}}
        }"#;
        let summary: SessionSummary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.session.status, SessionStatus::Completed);
        assert_eq!(summary.degree_counts[&1].people, 10);
    }

    #[test]
    fn test_output_type_parsing() {
        assert_eq!("SQL".parse::<OutputType>().unwrap(), OutputType::Sql);
        assert_eq!("csv".parse::<OutputType>().unwrap(), OutputType::Csv);
        assert!("xml".parse::<OutputType>().is_err());
        assert_eq!(
            serde_json::to_value(ExtractionConfig::default()).unwrap()["output_type"],
            "sql"
        );
    }
}
