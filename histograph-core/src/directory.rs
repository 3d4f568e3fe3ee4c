// Session listing and text reports for the CLI

use chrono::{DateTime, NaiveDateTime};
use colored::Colorize;
use histograph_client::{Backend, ClientError, Session, SessionId, SessionStatus, SessionSummary};
use std::fmt::Write;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectoryStats {
    pub total: usize,
    pub completed: usize,
    pub running: usize,
    pub failed: usize,
    pub total_nodes: u64,
}

impl DirectoryStats {
    pub fn from_sessions(sessions: &[Session]) -> Self {
        sessions.iter().fold(Self::default(), |mut stats, session| {
            stats.total += 1;
            stats.total_nodes += session.total_nodes;
            match session.status {
                SessionStatus::Completed => stats.completed += 1,
                SessionStatus::Running => stats.running += 1,
                SessionStatus::Failed => stats.failed += 1,
            }
            stats
        })
    }
}

pub struct SessionDirectory<B: Backend> {
    backend: Arc<B>,
}

impl<B: Backend> SessionDirectory<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// All sessions, newest first.
    pub async fn list(&self) -> Result<Vec<Session>, ClientError> {
        let mut sessions = self.backend.sessions().await?;
        sessions.sort_by(|a, b| b.id.cmp(&a.id));
        debug!("Listed {} sessions", sessions.len());
        Ok(sessions)
    }

    pub async fn summary(&self, session: SessionId) -> Result<SessionSummary, ClientError> {
        self.backend.session_summary(session).await
    }
}

/// Render a backend timestamp as `YYYY-MM-DD HH:MM:SS`. Unparseable input is
/// returned unchanged.
pub fn format_timestamp(raw: &str) -> String {
    const DISPLAY: &str = "%Y-%m-%d %H:%M:%S";

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.format(DISPLAY).to_string();
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return dt.format(DISPLAY).to_string();
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return dt.format(DISPLAY).to_string();
    }
    raw.to_string()
}

fn status_label(status: SessionStatus) -> String {
    match status {
        SessionStatus::Completed => status.as_str().green().to_string(),
        SessionStatus::Running => status.as_str().yellow().to_string(),
        SessionStatus::Failed => status.as_str().red().to_string(),
    }
}

pub fn sessions_table(sessions: &[Session]) -> String {
    let mut out = String::new();
    let header = format!(
        "{:<6} {:<32} {:<11} {:>6} {:>8}  {}",
        "ID", "NAME", "STATUS", "DEGREE", "NODES", "CREATED"
    );
    let _ = writeln!(out, "{}", header.bold());
    for session in sessions {
        let name = crate::view::truncate(&session.session_name, 29);
        // Pad before colouring so escape codes don't skew the columns
        let status = format!("{:<11}", session.status.as_str());
        let _ = writeln!(
            out,
            "{:<6} {:<32} {} {:>6} {:>8}  {}",
            session.id.0,
            name,
            status.replace(session.status.as_str(), &status_label(session.status)),
            session.max_degree,
            session.total_nodes,
            format_timestamp(&session.created_at)
        );
    }
    out
}

pub fn stats_report(stats: &DirectoryStats) -> String {
    format!(
        "{} sessions: {} completed, {} running, {} failed ({} nodes extracted)",
        stats.total.to_string().bold(),
        stats.completed.to_string().green(),
        stats.running.to_string().yellow(),
        stats.failed.to_string().red(),
        stats.total_nodes
    )
}

pub fn summary_report(summary: &SessionSummary) -> String {
    let session = &summary.session;
    let mut out = String::new();

    let _ = writeln!(out, "{}", format!("Session {}", session.id).bright_white().bold());
    let _ = writeln!(out, "  Name:       {}", session.session_name);
    let _ = writeln!(out, "  Seed:       {}", session.seed_url);
    let _ = writeln!(out, "  Status:     {}", status_label(session.status));
    let _ = writeln!(out, "  Max degree: {}", session.max_degree);
    let _ = writeln!(out, "  Nodes:      {}", session.total_nodes);
    let _ = writeln!(out, "  Created:    {}", format_timestamp(&session.created_at));
    if let Some(ref started) = session.started_at {
        let _ = writeln!(out, "  Started:    {}", format_timestamp(started));
    }
    if let Some(ref completed) = session.completed_at {
        let _ = writeln!(out, "  Completed:  {}", format_timestamp(completed));
    }

    if !summary.degree_counts.is_empty() {
        let _ = writeln!(out);
        let header = format!("  {:<8} {:>8} {:>8}", "Degree", "Events", "People");
        let _ = writeln!(out, "{}", header.bold());
        for (degree, counts) in &summary.degree_counts {
            let _ = writeln!(out, "  {:<8} {:>8} {:>8}", degree, counts.events, counts.people);
        }
    }
    out
}
