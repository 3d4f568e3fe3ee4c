pub mod explorer;
pub mod extraction_monitor;

pub use explorer::{Command, Explorer, Update, run_explorer};
pub use extraction_monitor::{ExtractionMonitor, MonitorAction, run_monitor};
