use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use histograph_client::{Backend, RunState, SessionId};
use histograph_core::launcher::{ExtractionRun, LaunchEvent, RunOutcome};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph, Wrap},
};
use std::io;
use std::time::Duration;
use tracing::info;

const MAX_LOG_LINES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// What a key press asks the monitor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    None,
    /// Stop the extraction on the backend, then keep showing the result.
    Stop,
    /// Leave the monitor. A running extraction keeps running on the backend.
    Exit,
    ScrollUp,
    ScrollDown,
}

/// TUI state for following one extraction run
pub struct ExtractionMonitor {
    session: Option<SessionId>,
    seed_url: String,
    progress: u8,
    status: Option<RunState>,
    outcome: Option<RunOutcome>,
    logs: Vec<(LogLevel, String)>,
    scroll_logs: usize,
    stopping: bool,
}

impl ExtractionMonitor {
    pub fn new(seed_url: impl Into<String>) -> Self {
        Self {
            session: None,
            seed_url: seed_url.into(),
            progress: 0,
            status: None,
            outcome: None,
            logs: Vec::new(),
            scroll_logs: 0,
            stopping: false,
        }
    }

    pub fn apply(&mut self, event: &LaunchEvent) {
        let level = match event {
            LaunchEvent::Started(id) => {
                self.session = Some(*id);
                LogLevel::Info
            }
            LaunchEvent::Progress { progress, status } => {
                self.progress = *progress;
                self.status = Some(*status);
                LogLevel::Info
            }
            LaunchEvent::StatusCheckFailed(_) => LogLevel::Warn,
            LaunchEvent::Finished(outcome) => {
                if *outcome == RunOutcome::Completed {
                    self.progress = 100;
                }
                self.outcome = Some(outcome.clone());
                self.stopping = false;
                match outcome {
                    RunOutcome::Failed(_) => LogLevel::Error,
                    _ => LogLevel::Info,
                }
            }
        };
        self.push_log(level, event.log_line());
    }

    pub fn push_log(&mut self, level: LogLevel, message: String) {
        self.logs.push((level, message));
        if self.logs.len() > MAX_LOG_LINES {
            self.logs.drain(0..self.logs.len() - MAX_LOG_LINES);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn logs(&self) -> &[(LogLevel, String)] {
        &self.logs
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> MonitorAction {
        if key.kind != KeyEventKind::Press {
            return MonitorAction::None;
        }
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                if self.is_finished() || self.stopping {
                    MonitorAction::Exit
                } else {
                    self.stopping = true;
                    MonitorAction::Stop
                }
            }
            KeyCode::Char('q') | KeyCode::Esc => MonitorAction::Exit,
            KeyCode::Up | KeyCode::PageUp => {
                self.scroll_logs += 1;
                MonitorAction::ScrollUp
            }
            KeyCode::Down | KeyCode::PageDown => {
                self.scroll_logs = self.scroll_logs.saturating_sub(1);
                MonitorAction::ScrollDown
            }
            _ => MonitorAction::None,
        }
    }

    pub fn render(&self, f: &mut Frame) {
        let vertical_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(7), // Progress
                Constraint::Min(5),    // Logs
                Constraint::Length(1), // Hints bar
            ])
            .split(f.area());

        self.render_progress(f, vertical_chunks[0]);
        self.render_logs(f, vertical_chunks[1]);
        self.render_hints(f, vertical_chunks[2]);
    }

    fn render_progress(&self, f: &mut Frame, area: Rect) {
        let (title, border_color) = match self.outcome {
            Some(RunOutcome::Completed) => (" Complete ", Color::Green),
            Some(RunOutcome::Failed(_)) => (" Failed ", Color::Red),
            Some(RunOutcome::Stopped) => (" Stopped ", Color::Magenta),
            None if self.stopping => (" Stopping ", Color::Magenta),
            None => (" Extraction ", Color::Yellow),
        };

        let block = Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(Style::default().fg(border_color));
        let inner = block.inner(area);
        f.render_widget(block, area);

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Length(2)])
            .split(inner);

        let session = self
            .session
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let status = self.status.map(|s| s.as_str()).unwrap_or("submitting");
        let text = vec![
            Line::from(vec![
                Span::styled("Session: ", Style::default().fg(Color::DarkGray)),
                Span::styled(session, Style::default().fg(Color::Cyan)),
                Span::raw("  "),
                Span::styled("Status: ", Style::default().fg(Color::DarkGray)),
                Span::styled(status, Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
            ]),
            Line::from(vec![
                Span::styled("Seed: ", Style::default().fg(Color::DarkGray)),
                Span::raw(self.seed_url.clone()),
            ]),
        ];
        f.render_widget(Paragraph::new(text).wrap(Wrap { trim: true }), rows[0]);

        let gauge = Gauge::default()
            .gauge_style(Style::default().fg(border_color))
            .percent(u16::from(self.progress.min(100)))
            .label(format!("{}%", self.progress));
        f.render_widget(gauge, rows[1]);
    }

    fn render_logs(&self, f: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(" Logs ")
            .border_style(Style::default().fg(Color::Magenta));
        let inner = block.inner(area);
        f.render_widget(block, area);

        let height = inner.height as usize;
        let total_items = self.logs.len();
        // Scrolled from the bottom; 0 follows new lines
        let max_scroll = total_items.saturating_sub(height);
        let offset = max_scroll.saturating_sub(self.scroll_logs.min(max_scroll));

        let items: Vec<ListItem> = self
            .logs
            .iter()
            .skip(offset)
            .take(height)
            .map(|(level, message)| {
                let (prefix, style) = match level {
                    LogLevel::Info => ("INFO ", Style::default().fg(Color::Blue)),
                    LogLevel::Warn => ("WARN ", Style::default().fg(Color::Yellow)),
                    LogLevel::Error => ("ERROR", Style::default().fg(Color::Red)),
                };
                ListItem::new(format!("[{}] {}", prefix, message)).style(style)
            })
            .collect();
        f.render_widget(List::new(items), inner);
    }

    fn render_hints(&self, f: &mut Frame, area: Rect) {
        let key = Style::default().fg(Color::Black).bg(Color::Gray);
        let hints = if self.is_finished() {
            Line::from(vec![
                Span::styled(" q/ESC ", key),
                Span::raw(" Exit  "),
                Span::styled(" ↑/↓ ", key),
                Span::raw(" Scroll logs"),
            ])
        } else {
            Line::from(vec![
                Span::styled(" Ctrl+C ", key),
                Span::raw(" Stop extraction  "),
                Span::styled(" q/ESC ", key),
                Span::raw(" Detach  "),
                Span::styled(" ↑/↓ ", key),
                Span::raw(" Scroll logs"),
            ])
        };
        f.render_widget(
            Paragraph::new(hints).style(Style::default().bg(Color::Black).fg(Color::Gray)),
            area,
        );
    }
}

/// Follow `run` in a full-screen monitor until the user leaves.
///
/// Returns the outcome if the run finished while the monitor was open.
pub async fn run_monitor<B: Backend>(
    mut run: ExtractionRun<B>,
    seed_url: &str,
) -> Result<Option<RunOutcome>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut monitor = ExtractionMonitor::new(seed_url);
    let result = monitor_loop(&mut terminal, &mut monitor, &mut run).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result?;
    Ok(run.outcome().cloned())
}

async fn monitor_loop<T: ratatui::backend::Backend, B: Backend>(
    terminal: &mut Terminal<T>,
    monitor: &mut ExtractionMonitor,
    run: &mut ExtractionRun<B>,
) -> Result<()> {
    loop {
        while let Some(event) = run.try_next_event() {
            monitor.apply(&event);
        }

        terminal.draw(|f| monitor.render(f))?;

        if event::poll(Duration::from_millis(100))?
            && let Event::Key(key) = event::read()?
        {
            match monitor.handle_key(key) {
                MonitorAction::Stop => {
                    info!("Stop requested for session {}", run.session());
                    terminal.draw(|f| monitor.render(f))?;
                    let before = run.log().len();
                    let stopped = run.stop().await;
                    for line in &run.log()[before..] {
                        let level = if line.starts_with("Extraction failed") {
                            LogLevel::Error
                        } else {
                            LogLevel::Info
                        };
                        monitor.push_log(level, line.clone());
                    }
                    match stopped {
                        Ok(outcome) => {
                            monitor.outcome = Some(outcome);
                            monitor.stopping = false;
                        }
                        Err(e) => monitor.push_log(LogLevel::Error, format!("Stop failed: {}", e)),
                    }
                }
                MonitorAction::Exit => break,
                _ => {}
            }
        }

        tokio::task::yield_now().await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;

    fn press(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn test_progress_events_update_state() {
        let mut monitor = ExtractionMonitor::new("https://en.wikipedia.org/wiki/Korean_War");
        monitor.apply(&LaunchEvent::Started(SessionId(4)));
        monitor.apply(&LaunchEvent::Progress {
            progress: 55,
            status: RunState::Running,
        });
        assert_eq!(monitor.progress(), 55);
        assert!(!monitor.is_finished());

        monitor.apply(&LaunchEvent::Finished(RunOutcome::Completed));
        assert!(monitor.is_finished());
        assert_eq!(monitor.progress(), 100);
        assert_eq!(monitor.logs().len(), 3);
        assert_eq!(monitor.logs()[0].1, "Started extraction session 4");
    }

    #[test]
    fn test_ctrl_c_stops_then_exits() {
        let mut monitor = ExtractionMonitor::new("https://en.wikipedia.org/wiki/Korean_War");
        let ctrl_c = press(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(monitor.handle_key(ctrl_c), MonitorAction::Stop);
        // A second Ctrl+C while the stop is pending leaves
        assert_eq!(monitor.handle_key(ctrl_c), MonitorAction::Exit);
        assert_eq!(
            monitor.handle_key(press(KeyCode::Char('c'), KeyModifiers::NONE)),
            MonitorAction::None
        );
    }

    #[test]
    fn test_ctrl_c_after_completion_exits() {
        let mut monitor = ExtractionMonitor::new("https://en.wikipedia.org/wiki/Korean_War");
        monitor.apply(&LaunchEvent::Finished(RunOutcome::Failed(Some("boom".to_string()))));
        assert_eq!(monitor.logs()[0].0, LogLevel::Error);
        assert_eq!(
            monitor.handle_key(press(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            MonitorAction::Exit
        );
    }

    #[test]
    fn test_render_shows_session_and_logs() {
        let mut monitor = ExtractionMonitor::new("https://en.wikipedia.org/wiki/Korean_War");
        monitor.apply(&LaunchEvent::Started(SessionId(9)));
        monitor.apply(&LaunchEvent::Progress {
            progress: 10,
            status: RunState::Running,
        });

        let mut terminal = Terminal::new(TestBackend::new(80, 20)).unwrap();
        terminal.draw(|f| monitor.render(f)).unwrap();
        let buffer = terminal.backend().buffer();
        let text: String = buffer.content().iter().map(|c| c.symbol()).collect();
        assert!(text.contains("Session: 9"));
        assert!(text.contains("Progress: 10% - running"));
        assert!(text.contains("Ctrl+C"));
    }
}
