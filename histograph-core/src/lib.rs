pub mod config;
pub mod directory;
pub mod graph;
pub mod launcher;
pub mod layout;
pub mod snapshot;
pub mod view;

pub use config::{Config, ConfigError};
pub use directory::{DirectoryStats, SessionDirectory};
pub use graph::{FetchError, GraphError, GraphEvent, GraphModel};
pub use launcher::{ExtractionLauncher, ExtractionRun, LaunchError, LaunchEvent, RunOutcome};
pub use layout::{Interaction, LayoutAdapter, PlacedNode, node_radius};
pub use snapshot::{EdgeKey, MergeOutcome, NetworkStats, Snapshot, SnapshotError};
pub use view::{EmptyReason, NodeDetail, ViewState};
