//! Submits extraction jobs and follows them until they finish.

use histograph_client::{Backend, ClientError, ExtractionConfig, RunState, SessionId, StatusReport};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
pub const MIN_DEGREE: u32 = 1;
pub const MAX_DEGREE: u32 = 10;

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Invalid extraction config: {0}")]
    Validation(String),

    #[error(transparent)]
    Backend(#[from] ClientError),

    #[error("Polling task failed: {0}")]
    Join(#[from] JoinError),
}

pub type Result<T> = std::result::Result<T, LaunchError>;

/// Reject a config before anything is sent to the backend.
pub fn validate(config: &ExtractionConfig) -> Result<()> {
    if !(MIN_DEGREE..=MAX_DEGREE).contains(&config.max_degree) {
        return Err(LaunchError::Validation(format!(
            "max_degree must be between {} and {}, got {}",
            MIN_DEGREE, MAX_DEGREE, config.max_degree
        )));
    }

    let seed = config.seed_url.trim();
    if seed.is_empty() {
        return Err(LaunchError::Validation("seed_url must not be empty".to_string()));
    }
    let url = Url::parse(seed)
        .map_err(|e| LaunchError::Validation(format!("seed_url '{}' is not a URL: {}", seed, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(LaunchError::Validation(format!(
            "seed_url '{}' must be an absolute http(s) URL",
            seed
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed(Option<String>),
    Stopped,
}

impl RunOutcome {
    fn from_report(report: &StatusReport) -> Option<Self> {
        match report.status {
            RunState::Running => None,
            RunState::Completed => Some(RunOutcome::Completed),
            RunState::Failed => Some(RunOutcome::Failed(report.error.clone())),
        }
    }
}

/// Something that happened during a run. Each event renders as one log line.
#[derive(Debug, Clone, PartialEq)]
pub enum LaunchEvent {
    Started(SessionId),
    Progress { progress: u8, status: RunState },
    StatusCheckFailed(String),
    Finished(RunOutcome),
}

impl LaunchEvent {
    pub fn log_line(&self) -> String {
        match self {
            LaunchEvent::Started(id) => format!("Started extraction session {}", id),
            LaunchEvent::Progress { progress, status } => {
                format!("Progress: {}% - {}", progress, status)
            }
            LaunchEvent::StatusCheckFailed(e) => format!("Status check failed: {}", e),
            LaunchEvent::Finished(RunOutcome::Completed) => "Extraction completed".to_string(),
            LaunchEvent::Finished(RunOutcome::Failed(None)) => "Extraction failed".to_string(),
            LaunchEvent::Finished(RunOutcome::Failed(Some(e))) => {
                format!("Extraction failed: {}", e)
            }
            LaunchEvent::Finished(RunOutcome::Stopped) => "Extraction stopped by user".to_string(),
        }
    }
}

pub struct ExtractionLauncher<B: Backend> {
    backend: Arc<B>,
    poll_interval: Duration,
}

impl<B: Backend + 'static> ExtractionLauncher<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_interval(backend, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_interval(backend: Arc<B>, poll_interval: Duration) -> Self {
        Self {
            backend,
            poll_interval,
        }
    }

    /// Validate, submit and start polling. Nothing reaches the backend if the
    /// config is invalid.
    pub async fn start(&self, config: ExtractionConfig) -> Result<ExtractionRun<B>> {
        validate(&config)?;

        info!(
            "Submitting extraction: seed={} max_degree={} output={}",
            config.seed_url, config.max_degree, config.output_type
        );
        let started = self.backend.start_extraction(&config).await?;
        let session = started.session_id;
        info!("Started extraction session {}", session);

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(LaunchEvent::Started(session));

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(poll_status(
            Arc::clone(&self.backend),
            session,
            self.poll_interval,
            stop_rx,
            tx,
        ));

        Ok(ExtractionRun {
            backend: Arc::clone(&self.backend),
            session,
            events: rx,
            log: Vec::new(),
            outcome: None,
            poll: Some(PollHandle {
                task,
                stop: Some(stop_tx),
            }),
        })
    }
}

/// Owns the polling task. Dropping it aborts the task.
struct PollHandle {
    task: JoinHandle<RunOutcome>,
    stop: Option<oneshot::Sender<()>>,
}

impl PollHandle {
    async fn halt(mut self) -> std::result::Result<RunOutcome, JoinError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        (&mut self.task).await
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn poll_status<B: Backend>(
    backend: Arc<B>,
    session: SessionId,
    period: Duration,
    mut stop: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<LaunchEvent>,
) -> RunOutcome {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => {
                debug!("Polling for session {} halted", session);
                return RunOutcome::Stopped;
            }
            _ = ticker.tick() => {}
        }

        let checked = tokio::select! {
            biased;
            _ = &mut stop => {
                debug!("Polling for session {} halted during a status check", session);
                return RunOutcome::Stopped;
            }
            checked = backend.extraction_status(session) => checked,
        };

        match checked {
            Ok(report) => {
                let progress = report.progress.unwrap_or(0);
                debug!("Session {} at {}% ({})", session, progress, report.status);
                let _ = events.send(LaunchEvent::Progress {
                    progress,
                    status: report.status,
                });

                if let Some(outcome) = RunOutcome::from_report(&report) {
                    info!("Extraction {} {}", session, report.status);
                    let _ = events.send(LaunchEvent::Finished(outcome.clone()));
                    return outcome;
                }
            }
            Err(e) => {
                warn!("Status check for session {} failed: {}", session, e);
                let _ = events.send(LaunchEvent::StatusCheckFailed(e.to_string()));
            }
        }
    }
}

/// A submitted extraction being polled in the background.
pub struct ExtractionRun<B: Backend> {
    backend: Arc<B>,
    session: SessionId,
    events: mpsc::UnboundedReceiver<LaunchEvent>,
    log: Vec<String>,
    outcome: Option<RunOutcome>,
    poll: Option<PollHandle>,
}

impl<B: Backend> ExtractionRun<B> {
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Lines recorded so far, in order.
    pub fn log(&self) -> &[String] {
        &self.log
    }

    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    fn record(&mut self, event: LaunchEvent) -> LaunchEvent {
        self.log.push(event.log_line());
        if let LaunchEvent::Finished(ref outcome) = event {
            self.outcome = Some(outcome.clone());
        }
        event
    }

    /// Next event, or `None` once the run has finished and every event was
    /// delivered.
    pub async fn next_event(&mut self) -> Option<LaunchEvent> {
        if self.outcome.is_some() {
            return self.events.try_recv().ok().map(|e| self.record(e));
        }
        let event = self.events.recv().await?;
        Some(self.record(event))
    }

    /// Non-blocking variant of [`next_event`](Self::next_event) for render loops.
    pub fn try_next_event(&mut self) -> Option<LaunchEvent> {
        let event = self.events.try_recv().ok()?;
        Some(self.record(event))
    }

    /// Drain events until the run reaches a terminal state.
    pub async fn wait(&mut self) -> Result<RunOutcome> {
        while self.outcome.is_none() {
            if self.next_event().await.is_none() {
                break;
            }
        }
        if let Some(outcome) = self.outcome.clone() {
            return Ok(outcome);
        }
        // Channel closed without a terminal event: the task ended abnormally.
        match self.poll.take() {
            Some(poll) => Ok(poll.halt().await?),
            None => Ok(RunOutcome::Stopped),
        }
    }

    /// Halt polling, then ask the backend to stop the session.
    ///
    /// Polling is halted first so no status request is issued afterwards.
    /// Stopping an already finished run only halts the (finished) task.
    pub async fn stop(&mut self) -> Result<RunOutcome> {
        if let Some(poll) = self.poll.take() {
            let outcome = poll.halt().await?;
            // Keep events the task sent before it stopped
            while self.try_next_event().is_some() {}
            if outcome != RunOutcome::Stopped {
                return Ok(outcome);
            }
        }
        if let Some(outcome) = self.outcome.clone() {
            return Ok(outcome);
        }

        info!("Stopping extraction session {}", self.session);
        let stopped = self.backend.stop_extraction(self.session).await;
        self.record(LaunchEvent::Finished(RunOutcome::Stopped));
        stopped?;
        Ok(RunOutcome::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use histograph_client::{
        ExtractionStarted, NetworkData, NodeId, OutputType, Session, SessionSummary,
    };
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeBackend {
        reports: Mutex<VecDeque<StatusReport>>,
        start_calls: AtomicUsize,
        status_calls: AtomicUsize,
        stop_calls: AtomicUsize,
    }

    impl FakeBackend {
        fn with_reports(reports: Vec<(RunState, Option<u8>)>) -> Arc<Self> {
            let backend = Self::default();
            *backend.reports.lock().unwrap() = reports
                .into_iter()
                .map(|(status, progress)| StatusReport {
                    status,
                    progress,
                    error: None,
                })
                .collect();
            Arc::new(backend)
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        async fn sessions(&self) -> histograph_client::error::Result<Vec<Session>> {
            Ok(vec![])
        }

        async fn session_summary(
            &self,
            _session: SessionId,
        ) -> histograph_client::error::Result<SessionSummary> {
            Err(ClientError::InvalidUrl("unused".to_string()))
        }

        async fn network(&self, _session: SessionId) -> histograph_client::error::Result<NetworkData> {
            Ok(NetworkData::default())
        }

        async fn expand_node(
            &self,
            _session: SessionId,
            _node: &NodeId,
        ) -> histograph_client::error::Result<NetworkData> {
            Ok(NetworkData::default())
        }

        async fn start_extraction(
            &self,
            _config: &ExtractionConfig,
        ) -> histograph_client::error::Result<ExtractionStarted> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            Ok(ExtractionStarted {
                session_id: SessionId(7),
            })
        }

        async fn stop_extraction(&self, _session: SessionId) -> histograph_client::error::Result<()> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn extraction_status(
            &self,
            _session: SessionId,
        ) -> histograph_client::error::Result<StatusReport> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let next = self.reports.lock().unwrap().pop_front();
            next.ok_or_else(|| ClientError::Status {
                status: 503,
                url: "status".to_string(),
                body: String::new(),
            })
        }
    }

    fn config(max_degree: u32) -> ExtractionConfig {
        ExtractionConfig {
            max_degree,
            ..ExtractionConfig::default()
        }
    }

    #[test]
    fn test_validate_bounds() {
        assert!(validate(&config(1)).is_ok());
        assert!(validate(&config(10)).is_ok());
        assert!(matches!(validate(&config(0)), Err(LaunchError::Validation(_))));
        assert!(matches!(validate(&config(11)), Err(LaunchError::Validation(_))));
    }

    #[test]
    fn test_validate_seed_url() {
        let mut c = config(3);
        c.seed_url = "  ".to_string();
        assert!(validate(&c).is_err());
        c.seed_url = "Korean_War".to_string();
        assert!(validate(&c).is_err());
        c.seed_url = "ftp://en.wikipedia.org/wiki/Korean_War".to_string();
        assert!(validate(&c).is_err());
        c.seed_url = "https://en.wikipedia.org/wiki/Korean_War".to_string();
        assert!(validate(&c).is_ok());
    }

    #[test]
    fn test_log_lines() {
        assert_eq!(
            LaunchEvent::Started(SessionId(3)).log_line(),
            "Started extraction session 3"
        );
        assert_eq!(
            LaunchEvent::Progress {
                progress: 55,
                status: RunState::Running
            }
            .log_line(),
            "Progress: 55% - running"
        );
        assert_eq!(
            LaunchEvent::Finished(RunOutcome::Completed).log_line(),
            "Extraction completed"
        );
        assert_eq!(
            LaunchEvent::Finished(RunOutcome::Stopped).log_line(),
            "Extraction stopped by user"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_degree_never_reaches_backend() {
        let backend = FakeBackend::with_reports(vec![]);
        let launcher = ExtractionLauncher::new(Arc::clone(&backend));

        for degree in [0, 11] {
            let err = launcher.start(config(degree)).await.err().unwrap();
            assert!(matches!(err, LaunchError::Validation(_)));
        }
        assert_eq!(backend.start_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_stops_at_completed() {
        let backend = FakeBackend::with_reports(vec![
            (RunState::Running, Some(10)),
            (RunState::Running, Some(55)),
            (RunState::Completed, Some(100)),
        ]);
        let launcher = ExtractionLauncher::new(Arc::clone(&backend));

        let mut run = launcher.start(ExtractionConfig::default()).await.unwrap();
        assert_eq!(run.session(), SessionId(7));
        assert_eq!(run.wait().await.unwrap(), RunOutcome::Completed);

        // Give a misbehaving task the chance to poll again
        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 5).await;
        assert_eq!(backend.status_calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            run.log(),
            &[
                "Started extraction session 7",
                "Progress: 10% - running",
                "Progress: 55% - running",
                "Progress: 100% - completed",
                "Extraction completed",
            ]
        );
        assert_eq!(backend.stop_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_check_keeps_polling() {
        let backend = FakeBackend::with_reports(vec![(RunState::Running, Some(20))]);
        let launcher = ExtractionLauncher::new(Arc::clone(&backend));
        let mut run = launcher.start(ExtractionConfig::default()).await.unwrap();

        // Started, Progress 20, then a failed check from the empty queue
        for _ in 0..3 {
            run.next_event().await.unwrap();
        }
        assert!(run.log()[2].starts_with("Status check failed"));
        assert!(!run.is_finished());

        backend
            .reports
            .lock()
            .unwrap()
            .push_back(StatusReport {
                status: RunState::Failed,
                progress: None,
                error: Some("wikipedia unreachable".to_string()),
            });
        let outcome = run.wait().await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Failed(Some("wikipedia unreachable".to_string()))
        );
        assert_eq!(run.log().last().unwrap(), "Extraction failed: wikipedia unreachable");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_polling_then_signals_backend() {
        let backend = FakeBackend::with_reports(vec![
            (RunState::Running, Some(10)),
            (RunState::Running, Some(20)),
            (RunState::Running, Some(30)),
        ]);
        let launcher = ExtractionLauncher::new(Arc::clone(&backend));
        let mut run = launcher.start(ExtractionConfig::default()).await.unwrap();

        run.next_event().await.unwrap();
        run.next_event().await.unwrap();
        assert_eq!(backend.status_calls.load(Ordering::SeqCst), 1);

        assert_eq!(run.stop().await.unwrap(), RunOutcome::Stopped);
        assert_eq!(backend.stop_calls.load(Ordering::SeqCst), 1);
        assert_eq!(run.log().last().unwrap(), "Extraction stopped by user");

        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 5).await;
        assert_eq!(backend.status_calls.load(Ordering::SeqCst), 1);
        assert!(run.next_event().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_the_run_stops_polling() {
        let backend = FakeBackend::with_reports(vec![(RunState::Running, Some(10))]);
        let launcher = ExtractionLauncher::with_interval(
            Arc::clone(&backend),
            Duration::from_millis(500),
        );
        let run = launcher.start(config(2)).await.unwrap();
        drop(run);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(backend.status_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_output_type_is_logged_by_name() {
        assert_eq!(OutputType::Csv.to_string(), "csv");
    }
}
