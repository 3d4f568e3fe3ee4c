pub mod backend;
pub mod error;
pub mod types;

pub use backend::{Backend, HttpBackend};
pub use error::ClientError;
pub use types::{
    DegreeCount, ExtractionConfig, ExtractionStarted, Link, NetworkData, Node, NodeId, NodeType,
    OutputType, RunState, Session, SessionId, SessionStatus, SessionSummary, StatusReport,
};
