//! Interactive network explorer.
//!
//! The terminal loop owns an [`Explorer`] (pure UI state) and talks to the
//! graph model through a command channel. A controller task executes the
//! commands and reports results back as [`Update`]s; layout changes arrive as
//! [`GraphEvent`]s from the model's subscription.

use anyhow::Result;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
        KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use histograph_client::{Backend, ClientError, NodeId, NodeType, Session, SessionId};
use histograph_core::directory::SessionDirectory;
use histograph_core::graph::{GraphError, GraphEvent, GraphModel};
use histograph_core::layout::{Interaction, LayoutAdapter};
use histograph_core::snapshot::Snapshot;
use histograph_core::view::{NodeDetail, ViewState};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols::Marker,
    text::{Line, Span},
    widgets::{
        Block, Borders, Paragraph, Wrap,
        canvas::{Canvas, Circle, Line as CanvasLine},
    },
};
use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Layout units per terminal cell. Chosen so a Person node covers its cell.
pub const CELL_WIDTH: f64 = 4.0;
pub const CELL_HEIGHT: f64 = 8.0;
const ZOOM_STEP: f64 = 1.1;
const DETAIL_WIDTH: u16 = 34;
const FRAME: Duration = Duration::from_millis(33);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    LoadSessions,
    LoadSession(SessionId),
    Expand(NodeId),
}

#[derive(Debug)]
pub enum Update {
    Sessions(Result<Vec<Session>, ClientError>),
    Loaded(SessionId, Result<Snapshot, GraphError>),
    Expanded(NodeId, Result<Snapshot, GraphError>),
}

/// Execute commands against the model. Each command runs in its own task so
/// expansions of different nodes proceed concurrently.
pub fn spawn_controller<B: Backend + 'static>(
    model: Arc<GraphModel<B>>,
    directory: Arc<SessionDirectory<B>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    updates: mpsc::UnboundedSender<Update>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            debug!("Explorer command: {:?}", command);
            let model = Arc::clone(&model);
            let directory = Arc::clone(&directory);
            let updates = updates.clone();
            tokio::spawn(async move {
                let update = match command {
                    Command::LoadSessions => Update::Sessions(directory.list().await),
                    Command::LoadSession(id) => Update::Loaded(id, model.load(id).await),
                    Command::Expand(node) => {
                        let result = model.expand(&node).await;
                        Update::Expanded(node, result)
                    }
                };
                let _ = updates.send(update);
            });
        }
    })
}

pub struct Explorer {
    sessions: Vec<Session>,
    /// Session the user asked for.
    requested: Option<SessionId>,
    /// Session whose snapshot is on screen.
    shown: Option<SessionId>,
    view: ViewState,
    layout: LayoutAdapter,
    snapshot: Snapshot,
    expanded: HashSet<NodeId>,
    pending: HashSet<NodeId>,
    selected: Option<NodeId>,
    message: Option<String>,
    /// Command that produced `message`, resent by `r`.
    last_failed: Option<Command>,
    canvas: Rect,
    should_quit: bool,
}

impl Explorer {
    pub fn new(initial: Option<SessionId>) -> Self {
        Self {
            sessions: Vec::new(),
            requested: initial,
            shown: None,
            view: ViewState::Loading,
            layout: LayoutAdapter::new(0.0, 0.0),
            snapshot: Snapshot::new(),
            expanded: HashSet::new(),
            pending: HashSet::new(),
            selected: None,
            message: None,
            last_failed: None,
            canvas: Rect::default(),
            should_quit: false,
        }
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn shown_session(&self) -> Option<SessionId> {
        self.shown
    }

    pub fn selected(&self) -> Option<&NodeId> {
        self.selected.as_ref()
    }

    pub fn is_pending(&self, node: &NodeId) -> bool {
        self.pending.contains(node)
    }

    pub fn layout(&self) -> &LayoutAdapter {
        &self.layout
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    /// Record where the graph is drawn and size the layout to match.
    pub fn set_canvas(&mut self, area: Rect) {
        if area == self.canvas {
            return;
        }
        self.canvas = area;
        self.layout.resize(
            f64::from(area.width) * CELL_WIDTH,
            f64::from(area.height) * CELL_HEIGHT,
        );
    }

    pub fn handle_update(&mut self, update: Update) -> Option<Command> {
        match update {
            Update::Sessions(Ok(sessions)) => {
                self.view = ViewState::from_sessions(&Ok(sessions.clone()));
                self.sessions = sessions;
                let target = self
                    .requested
                    .filter(|id| self.sessions.iter().any(|s| s.id == *id))
                    .or_else(|| self.sessions.first().map(|s| s.id))?;
                self.requested = Some(target);
                if self.shown == Some(target) {
                    // Reloading would drop merged expansions and node positions
                    self.view = ViewState::from_load(&Ok(self.snapshot.clone()));
                    return None;
                }
                self.view = if self.shown.is_some() {
                    ViewState::from_load(&Ok(self.snapshot.clone()))
                } else {
                    ViewState::Loading
                };
                Some(Command::LoadSession(target))
            }
            Update::Sessions(Err(e)) => {
                warn!("Failed to list sessions: {}", e);
                if self.shown.is_some() {
                    self.message = Some(format!("Could not list sessions: {}", e));
                    self.last_failed = Some(Command::LoadSessions);
                } else {
                    self.view = ViewState::from_sessions(&Err(e));
                }
                None
            }
            Update::Loaded(_, Err(GraphError::Superseded)) => None,
            Update::Loaded(id, result) => {
                if self.requested != Some(id) {
                    return None;
                }
                match result {
                    Ok(snapshot) => {
                        self.view = ViewState::from_load(&Ok(snapshot));
                        self.shown = Some(id);
                        self.message = None;
                        self.last_failed = None;
                    }
                    Err(e) if self.shown.is_some() => {
                        // The previous session stays on screen
                        self.message = Some(format!("Could not load session {}: {}", id, e));
                        self.last_failed = Some(Command::LoadSession(id));
                        self.requested = self.shown;
                        self.view = ViewState::from_load(&Ok(self.snapshot.clone()));
                    }
                    Err(e) => {
                        self.view = ViewState::from_load(&Err(e));
                    }
                }
                None
            }
            // The first request for the node is still running, or the result
            // belongs to a session that is no longer loaded
            Update::Expanded(_, Err(GraphError::AlreadyInProgress(_)))
            | Update::Expanded(_, Err(GraphError::Superseded)) => None,
            Update::Expanded(node, result) => {
                self.pending.remove(&node);
                match result {
                    Ok(_) => {
                        if matches!(&self.last_failed, Some(Command::Expand(n)) if *n == node) {
                            self.last_failed = None;
                        }
                    }
                    Err(e) => {
                        self.message = Some(format!("Could not expand {}: {}", node, e));
                        self.last_failed = Some(Command::Expand(node));
                    }
                }
                None
            }
        }
    }

    pub fn handle_graph_event(&mut self, event: GraphEvent) {
        self.layout.apply(&event);
        match event {
            GraphEvent::Loaded { snapshot, .. } => {
                self.expanded.clear();
                self.pending.clear();
                self.selected = snapshot.nodes().first().map(|n| n.id.clone());
                self.snapshot = snapshot;
            }
            GraphEvent::Expanded { node, snapshot, .. } => {
                self.expanded.insert(node);
                self.snapshot = snapshot;
            }
            GraphEvent::Collapsed { node } => {
                self.expanded.remove(&node);
            }
            GraphEvent::Failed { .. } => {}
        }
    }

    fn request_expand(&mut self, node: NodeId) -> Command {
        self.selected = Some(node.clone());
        self.pending.insert(node.clone());
        Command::Expand(node)
    }

    fn cycle_session(&mut self, forward: bool) -> Option<Command> {
        if self.sessions.is_empty() {
            return None;
        }
        let len = self.sessions.len();
        let current = self
            .requested
            .and_then(|id| self.sessions.iter().position(|s| s.id == id))
            .unwrap_or(0);
        let next = if forward { (current + 1) % len } else { (current + len - 1) % len };
        let id = self.sessions[next].id;
        self.requested = Some(id);
        self.last_failed = None;
        if self.shown.is_none() {
            self.view = ViewState::Loading;
        }
        Some(Command::LoadSession(id))
    }

    fn cycle_node(&mut self, forward: bool) {
        let nodes = self.snapshot.nodes();
        if nodes.is_empty() {
            return;
        }
        let current = self
            .selected
            .as_ref()
            .and_then(|id| nodes.iter().position(|n| &n.id == id));
        let next = match (current, forward) {
            (None, _) => 0,
            (Some(i), true) => (i + 1) % nodes.len(),
            (Some(i), false) => (i + nodes.len() - 1) % nodes.len(),
        };
        self.selected = Some(nodes[next].id.clone());
    }

    fn canvas_centre(&self) -> (f64, f64) {
        (
            f64::from(self.canvas.width) * CELL_WIDTH / 2.0,
            f64::from(self.canvas.height) * CELL_HEIGHT / 2.0,
        )
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Option<Command> {
        if key.kind != KeyEventKind::Press {
            return None;
        }
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true;
                None
            }
            KeyCode::Char('q') => {
                self.should_quit = true;
                None
            }
            KeyCode::Esc => {
                if self.message.take().is_none() {
                    self.should_quit = true;
                }
                self.last_failed = None;
                None
            }
            KeyCode::Char('r') => {
                self.message = None;
                match self.last_failed.take() {
                    Some(Command::Expand(node))
                        if self.snapshot.contains_node(&node) && !self.expanded.contains(&node) =>
                    {
                        Some(self.request_expand(node))
                    }
                    Some(Command::LoadSession(id)) => {
                        self.requested = Some(id);
                        Some(Command::LoadSession(id))
                    }
                    _ => {
                        if self.shown.is_none() {
                            self.view = ViewState::Loading;
                        }
                        Some(Command::LoadSessions)
                    }
                }
            }
            KeyCode::Tab | KeyCode::Char('n') => self.cycle_session(true),
            KeyCode::BackTab | KeyCode::Char('p') => self.cycle_session(false),
            KeyCode::Right | KeyCode::Char('l') | KeyCode::Down | KeyCode::Char('j') => {
                self.cycle_node(true);
                None
            }
            KeyCode::Left | KeyCode::Char('h') | KeyCode::Up | KeyCode::Char('k') => {
                self.cycle_node(false);
                None
            }
            KeyCode::Enter | KeyCode::Char(' ') => {
                let node = self.selected.clone()?;
                if self.view != ViewState::Ready {
                    return None;
                }
                Some(self.request_expand(node))
            }
            KeyCode::Char('+') | KeyCode::Char('=') => {
                let (cx, cy) = self.canvas_centre();
                self.layout.zoom(ZOOM_STEP, cx, cy);
                None
            }
            KeyCode::Char('-') => {
                let (cx, cy) = self.canvas_centre();
                self.layout.zoom(1.0 / ZOOM_STEP, cx, cy);
                None
            }
            KeyCode::Char('u') => {
                if let Some(node) = self.selected.clone() {
                    self.layout.unpin(&node);
                }
                None
            }
            _ => None,
        }
    }

    /// Terminal cell to layout units, clamped to the canvas.
    fn cell_to_layout(&self, column: u16, row: u16) -> (f64, f64) {
        let col = column.clamp(self.canvas.x, self.canvas.right().saturating_sub(1)) - self.canvas.x;
        let row = row.clamp(self.canvas.y, self.canvas.bottom().saturating_sub(1)) - self.canvas.y;
        (
            (f64::from(col) + 0.5) * CELL_WIDTH,
            (f64::from(row) + 0.5) * CELL_HEIGHT,
        )
    }

    fn in_canvas(&self, column: u16, row: u16) -> bool {
        self.canvas.width > 0
            && self.canvas.height > 0
            && column >= self.canvas.x
            && column < self.canvas.right()
            && row >= self.canvas.y
            && row < self.canvas.bottom()
    }

    pub fn handle_mouse(&mut self, mouse: MouseEvent) -> Option<Command> {
        if self.view != ViewState::Ready || self.canvas.width == 0 || self.canvas.height == 0 {
            return None;
        }
        let inside = self.in_canvas(mouse.column, mouse.row);
        let (x, y) = self.cell_to_layout(mouse.column, mouse.row);

        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) if inside => {
                self.layout.pointer_down(x, y);
                None
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                self.layout.pointer_move(x, y);
                None
            }
            MouseEventKind::Up(MouseButton::Left) => match self.layout.pointer_up(x, y)? {
                Interaction::Expand(node) => Some(self.request_expand(node)),
                Interaction::Pinned(node) => {
                    self.selected = Some(node);
                    None
                }
                Interaction::Panned => None,
            },
            MouseEventKind::Moved => {
                if inside {
                    self.layout.hover(x, y);
                } else {
                    self.layout.clear_hover();
                }
                None
            }
            MouseEventKind::ScrollUp if inside => {
                self.layout.zoom(ZOOM_STEP, x, y);
                None
            }
            MouseEventKind::ScrollDown if inside => {
                self.layout.zoom(1.0 / ZOOM_STEP, x, y);
                None
            }
            _ => None,
        }
    }

    pub fn tick(&mut self, dt: f32) {
        if self.view == ViewState::Ready {
            self.layout.tick(dt);
        }
    }

    /// Detail for the hovered node, falling back to the keyboard selection.
    pub fn detail(&self) -> Option<NodeDetail> {
        let id = self.layout.hovered().or(self.selected.as_ref())?;
        let node = self.snapshot.node(id)?;
        Some(NodeDetail::new(node, self.expanded.contains(id)))
    }

    pub fn render(&mut self, f: &mut Frame) {
        let vertical = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1), // Title
                Constraint::Min(5),    // Graph + detail
                Constraint::Length(1), // Message
                Constraint::Length(1), // Hints
            ])
            .split(f.area());

        self.render_title(f, vertical[0]);

        let main = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(20), Constraint::Length(DETAIL_WIDTH)])
            .split(vertical[1]);

        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!(" {} ", self.view.headline()))
            .border_style(Style::default().fg(match self.view {
                ViewState::ConnectionError(_) | ViewState::BackendError(_) => Color::Red,
                ViewState::Empty(_) => Color::Yellow,
                _ => Color::Cyan,
            }));
        let inner = block.inner(main[0]);
        f.render_widget(block, main[0]);
        self.set_canvas(inner);

        if self.view == ViewState::Ready {
            self.render_graph(f, inner);
        } else {
            self.render_state(f, inner);
        }
        self.render_detail(f, main[1]);
        self.render_message(f, vertical[2]);
        self.render_hints(f, vertical[3]);
    }

    fn render_title(&self, f: &mut Frame, area: Rect) {
        let mut spans = vec![Span::styled(
            " Histograph ",
            Style::default().fg(Color::Black).bg(Color::Cyan).add_modifier(Modifier::BOLD),
        )];
        if let Some(id) = self.shown
            && let Some((index, session)) = self.sessions.iter().enumerate().find(|(_, s)| s.id == id)
        {
            spans.push(Span::raw(format!(
                " Session {}/{}: {} [{}]",
                index + 1,
                self.sessions.len(),
                session.session_name,
                session.status.as_str()
            )));
        }
        if self.requested != self.shown
            && let Some(id) = self.requested
        {
            spans.push(Span::styled(
                format!("  loading session {}...", id),
                Style::default().fg(Color::Yellow),
            ));
        }
        let stats = self.snapshot.stats();
        spans.push(Span::styled(
            format!(
                "  {} nodes ({} events, {} people), {} links",
                stats.nodes, stats.events, stats.people, stats.connections
            ),
            Style::default().fg(Color::DarkGray),
        ));
        f.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn render_graph(&self, f: &mut Frame, area: Rect) {
        let width = f64::from(area.width) * CELL_WIDTH;
        let height = f64::from(area.height) * CELL_HEIGHT;
        let nodes = self.layout.nodes();
        let edges = self.layout.edges();
        let selected = self.selected.clone();
        let expanded = &self.expanded;
        let pending = &self.pending;

        let canvas = Canvas::default()
            .marker(Marker::Braille)
            .x_bounds([0.0, width])
            .y_bounds([0.0, height])
            .paint(move |ctx| {
                // Canvas y grows upwards, layout y grows downwards
                for ((x1, y1), (x2, y2)) in &edges {
                    ctx.draw(&CanvasLine {
                        x1: *x1,
                        y1: height - y1,
                        x2: *x2,
                        y2: height - y2,
                        color: Color::DarkGray,
                    });
                }
                ctx.layer();
                for node in &nodes {
                    let color = if pending.contains(&node.id) {
                        Color::Yellow
                    } else if selected.as_ref() == Some(&node.id) || node.hovered {
                        Color::White
                    } else {
                        match node.node_type {
                            NodeType::Event => Color::Red,
                            NodeType::Person => Color::Blue,
                        }
                    };
                    ctx.draw(&Circle {
                        x: node.x,
                        y: height - node.y,
                        radius: node.radius,
                        color,
                    });
                    if expanded.contains(&node.id) {
                        ctx.draw(&Circle {
                            x: node.x,
                            y: height - node.y,
                            radius: node.radius / 2.0,
                            color,
                        });
                    }
                }
                for node in &nodes {
                    ctx.print(
                        node.x + node.radius,
                        height - node.y,
                        Span::styled(node.label.clone(), Style::default().fg(Color::Gray)),
                    );
                }
            });
        f.render_widget(canvas, area);
    }

    fn render_state(&self, f: &mut Frame, area: Rect) {
        let mut lines = vec![
            Line::from(""),
            Line::from(Span::styled(
                self.view.headline(),
                Style::default().add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
        ];
        if let ViewState::ConnectionError(ref detail) | ViewState::BackendError(ref detail) = self.view {
            lines.push(Line::from(Span::styled(detail.clone(), Style::default().fg(Color::Red))));
            lines.push(Line::from(""));
        }
        lines.push(Line::from(Span::styled(
            self.view.hint(),
            Style::default().fg(Color::DarkGray),
        )));
        f.render_widget(
            Paragraph::new(lines)
                .alignment(Alignment::Center)
                .wrap(Wrap { trim: true }),
            area,
        );
    }

    fn render_detail(&self, f: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(" Node ")
            .border_style(Style::default().fg(Color::Magenta));
        let lines: Vec<Line> = match self.detail() {
            Some(detail) => {
                let pending = self
                    .layout
                    .hovered()
                    .or(self.selected.as_ref())
                    .is_some_and(|id| self.pending.contains(id));
                let mut lines: Vec<Line> = detail
                    .lines()
                    .into_iter()
                    .enumerate()
                    .map(|(i, text)| {
                        if i == 0 {
                            Line::from(Span::styled(text, Style::default().add_modifier(Modifier::BOLD)))
                        } else if text == detail.expansion_status() {
                            Line::from(Span::styled(text, Style::default().fg(Color::Green)))
                        } else {
                            Line::from(text)
                        }
                    })
                    .collect();
                if pending {
                    lines.push(Line::from(Span::styled(
                        "Loading...",
                        Style::default().fg(Color::Yellow),
                    )));
                }
                lines
            }
            None => vec![Line::from(Span::styled(
                "Hover or select a node",
                Style::default().fg(Color::DarkGray),
            ))],
        };
        f.render_widget(Paragraph::new(lines).block(block).wrap(Wrap { trim: true }), area);
    }

    fn render_message(&self, f: &mut Frame, area: Rect) {
        if let Some(ref message) = self.message {
            f.render_widget(
                Paragraph::new(format!(" {} (Esc to dismiss, r to retry)", message))
                    .style(Style::default().fg(Color::Red)),
                area,
            );
        }
    }

    fn render_hints(&self, f: &mut Frame, area: Rect) {
        let key = Style::default().fg(Color::Black).bg(Color::Gray);
        let hints = Line::from(vec![
            Span::styled(" q ", key),
            Span::raw(" Quit  "),
            Span::styled(" Tab/n/p ", key),
            Span::raw(" Session  "),
            Span::styled(" ←/→ ", key),
            Span::raw(" Select  "),
            Span::styled(" Enter/click ", key),
            Span::raw(" Expand  "),
            Span::styled(" drag ", key),
            Span::raw(" Pan/pin  "),
            Span::styled(" +/-/scroll ", key),
            Span::raw(" Zoom  "),
            Span::styled(" r ", key),
            Span::raw(" Retry"),
        ]);
        f.render_widget(
            Paragraph::new(hints).style(Style::default().bg(Color::Black).fg(Color::Gray)),
            area,
        );
    }
}

/// Run the explorer until the user quits.
pub async fn run_explorer<B: Backend + 'static>(
    backend: Arc<B>,
    initial: Option<SessionId>,
) -> Result<()> {
    let model = Arc::new(GraphModel::new(Arc::clone(&backend)));
    let directory = Arc::new(SessionDirectory::new(backend));
    let mut graph_events = model.subscribe();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (update_tx, mut update_rx) = mpsc::unbounded_channel();
    let controller = spawn_controller(model, directory, command_rx, update_tx);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let mut explorer = Explorer::new(initial);
    let _ = command_tx.send(Command::LoadSessions);

    let result = async {
        let mut last = Instant::now();
        while !explorer.should_quit() {
            while let Ok(update) = update_rx.try_recv() {
                if let Some(command) = explorer.handle_update(update) {
                    let _ = command_tx.send(command);
                }
            }
            while let Ok(event) = graph_events.try_recv() {
                explorer.handle_graph_event(event);
            }

            let now = Instant::now();
            explorer.tick(now.duration_since(last).as_secs_f32());
            last = now;

            terminal.draw(|f| explorer.render(f))?;

            if event::poll(FRAME)? {
                let command = match event::read()? {
                    Event::Key(key) => explorer.handle_key(key),
                    Event::Mouse(mouse) => explorer.handle_mouse(mouse),
                    _ => None,
                };
                if let Some(command) = command {
                    let _ = command_tx.send(command);
                }
            }
            tokio::task::yield_now().await;
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;
    controller.abort();

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use histograph_client::{HttpBackend, Link, NetworkData, Node, SessionStatus};
    use histograph_core::snapshot::MergeOutcome;
    use ratatui::backend::TestBackend;

    fn session(id: u64) -> Session {
        Session {
            id: SessionId(id),
            session_name: format!("Extraction {}", id),
            seed_url: "https://en.wikipedia.org/wiki/Korean_War".to_string(),
            max_degree: 3,
            total_nodes: 2,
            status: SessionStatus::Completed,
            started_at: None,
            completed_at: None,
            created_at: "2024-01-01T10:00:00".to_string(),
        }
    }

    fn snapshot() -> Snapshot {
        Snapshot::from_network(NetworkData {
            nodes: vec![
                Node::new("E1", "Korean War", NodeType::Event, 0),
                Node::new("P1", "Douglas MacArthur", NodeType::Person, 1),
            ],
            links: vec![Link::new("E1", "P1", 1)],
        })
        .unwrap()
    }

    fn ready_explorer() -> Explorer {
        let mut explorer = Explorer::new(None);
        explorer.set_canvas(Rect::new(1, 2, 100, 40));
        let command = explorer.handle_update(Update::Sessions(Ok(vec![session(1)])));
        assert_eq!(command, Some(Command::LoadSession(SessionId(1))));
        explorer.handle_graph_event(GraphEvent::Loaded {
            session: SessionId(1),
            snapshot: snapshot(),
        });
        explorer.handle_update(Update::Loaded(SessionId(1), Ok(snapshot())));
        assert_eq!(explorer.view(), &ViewState::Ready);
        explorer
    }

    fn cell_of(explorer: &Explorer, id: &str) -> (u16, u16) {
        let node = explorer
            .layout()
            .nodes()
            .into_iter()
            .find(|n| n.id.as_str() == id)
            .unwrap();
        (
            explorer.canvas.x + (node.x / CELL_WIDTH) as u16,
            explorer.canvas.y + (node.y / CELL_HEIGHT) as u16,
        )
    }

    fn mouse(kind: MouseEventKind, column: u16, row: u16) -> MouseEvent {
        MouseEvent {
            kind,
            column,
            row,
            modifiers: KeyModifiers::NONE,
        }
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn bad_gateway() -> GraphError {
        GraphError::from(ClientError::Status {
            status: 502,
            url: "http://localhost:5000/api/sessions/1/nodes/P1/expand".to_string(),
            body: String::new(),
        })
    }

    fn screen_text(explorer: &mut Explorer) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 30)).unwrap();
        terminal.draw(|f| explorer.render(f)).unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|c| c.symbol())
            .collect()
    }

    #[test]
    fn test_empty_session_list_is_not_an_error() {
        let mut explorer = Explorer::new(None);
        assert_eq!(explorer.handle_update(Update::Sessions(Ok(vec![]))), None);
        assert!(matches!(explorer.view(), ViewState::Empty(_)));

        let mut explorer = Explorer::new(None);
        explorer.handle_update(Update::Sessions(Err(ClientError::InvalidUrl("x".to_string()))));
        assert!(matches!(explorer.view(), ViewState::BackendError(_)));
        assert_eq!(
            explorer.handle_key(KeyEvent::new(KeyCode::Char('r'), KeyModifiers::NONE)),
            Some(Command::LoadSessions)
        );
        assert_eq!(explorer.view(), &ViewState::Loading);
    }

    #[test]
    fn test_initial_session_is_preferred() {
        let mut explorer = Explorer::new(Some(SessionId(2)));
        let command = explorer.handle_update(Update::Sessions(Ok(vec![session(3), session(2)])));
        assert_eq!(command, Some(Command::LoadSession(SessionId(2))));

        let mut explorer = Explorer::new(Some(SessionId(9)));
        let command = explorer.handle_update(Update::Sessions(Ok(vec![session(3), session(2)])));
        assert_eq!(command, Some(Command::LoadSession(SessionId(3))));
    }

    #[test]
    fn test_click_on_node_requests_expand() {
        let mut explorer = ready_explorer();
        let (col, row) = cell_of(&explorer, "P1");
        let transform = explorer.layout().transform();

        assert_eq!(
            explorer.handle_mouse(mouse(MouseEventKind::Down(MouseButton::Left), col, row)),
            None
        );
        let command = explorer.handle_mouse(mouse(MouseEventKind::Up(MouseButton::Left), col, row));
        assert_eq!(command, Some(Command::Expand("P1".into())));
        assert_eq!(explorer.selected(), Some(&NodeId::from("P1")));
        assert_eq!(explorer.layout().transform(), transform);
    }

    #[test]
    fn test_background_drag_pans() {
        let mut explorer = ready_explorer();
        let (x, y) = (2, 3);
        explorer.handle_mouse(mouse(MouseEventKind::Down(MouseButton::Left), x, y));
        explorer.handle_mouse(mouse(MouseEventKind::Drag(MouseButton::Left), x + 10, y + 2));
        let command = explorer.handle_mouse(mouse(MouseEventKind::Up(MouseButton::Left), x + 10, y + 2));

        assert_eq!(command, None);
        let transform = explorer.layout().transform();
        assert_eq!(transform.x, 200.0 + 10.0 * CELL_WIDTH);
        assert_eq!(transform.y, 160.0 + 2.0 * CELL_HEIGHT);
    }

    #[test]
    fn test_keyboard_selection_and_expand() {
        let mut explorer = ready_explorer();
        assert_eq!(explorer.selected(), Some(&NodeId::from("E1")));
        explorer.handle_key(KeyEvent::new(KeyCode::Right, KeyModifiers::NONE));
        assert_eq!(explorer.selected(), Some(&NodeId::from("P1")));
        explorer.handle_key(KeyEvent::new(KeyCode::Right, KeyModifiers::NONE));
        assert_eq!(explorer.selected(), Some(&NodeId::from("E1")));

        let command = explorer.handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE));
        assert_eq!(command, Some(Command::Expand("E1".into())));

        explorer.handle_graph_event(GraphEvent::Expanded {
            node: "E1".into(),
            snapshot: snapshot(),
            outcome: MergeOutcome::default(),
        });
        explorer.handle_update(Update::Expanded("E1".into(), Ok(snapshot())));
        assert_eq!(explorer.detail().unwrap().expansion_status(), "✓ Expanded");

        explorer.handle_graph_event(GraphEvent::Collapsed { node: "E1".into() });
        assert_eq!(explorer.detail().unwrap().expansion_status(), "Click to expand");
    }

    #[test]
    fn test_failed_session_switch_keeps_graph() {
        let mut explorer = ready_explorer();
        explorer.handle_update(Update::Sessions(Ok(vec![session(1), session(2)])));
        explorer.handle_update(Update::Loaded(SessionId(1), Ok(snapshot())));
        let command = explorer.handle_key(KeyEvent::new(KeyCode::Tab, KeyModifiers::NONE));
        assert_eq!(command, Some(Command::LoadSession(SessionId(2))));

        explorer.handle_update(Update::Loaded(
            SessionId(2),
            Err(GraphError::from(ClientError::InvalidUrl("down".to_string()))),
        ));
        assert_eq!(explorer.view(), &ViewState::Ready);
        assert_eq!(explorer.shown_session(), Some(SessionId(1)));
        assert!(explorer.message().unwrap().contains("session 2"));

        // Esc dismisses the message before quitting
        explorer.handle_key(KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE));
        assert!(explorer.message().is_none());
        assert!(!explorer.should_quit());
    }

    #[test]
    fn test_stale_load_is_ignored() {
        let mut explorer = ready_explorer();
        explorer.handle_update(Update::Sessions(Ok(vec![session(1), session(2)])));
        explorer.handle_update(Update::Loaded(SessionId(1), Ok(snapshot())));
        explorer.handle_key(KeyEvent::new(KeyCode::Tab, KeyModifiers::NONE));
        explorer.handle_update(Update::Loaded(SessionId(2), Err(GraphError::Superseded)));
        assert_eq!(explorer.shown_session(), Some(SessionId(1)));
        assert!(explorer.message().is_none());
    }

    #[test]
    fn test_retry_resends_failed_expansion() {
        let mut explorer = ready_explorer();
        explorer.handle_graph_event(GraphEvent::Expanded {
            node: "E1".into(),
            snapshot: snapshot(),
            outcome: MergeOutcome::default(),
        });
        explorer.handle_update(Update::Expanded("E1".into(), Ok(snapshot())));

        explorer.handle_key(key(KeyCode::Right));
        assert_eq!(explorer.handle_key(key(KeyCode::Enter)), Some(Command::Expand("P1".into())));
        explorer.handle_update(Update::Expanded("P1".into(), Err(bad_gateway())));
        assert!(explorer.message().unwrap().contains("Could not expand P1"));
        assert!(!explorer.is_pending(&"P1".into()));

        assert_eq!(explorer.handle_key(key(KeyCode::Char('r'))), Some(Command::Expand("P1".into())));
        assert!(explorer.message().is_none());
        assert!(explorer.is_pending(&"P1".into()));

        explorer.handle_update(Update::Expanded("P1".into(), Ok(snapshot())));
        assert!(!explorer.is_pending(&"P1".into()));
        assert_eq!(explorer.shown_session(), Some(SessionId(1)));
        assert!(explorer.expanded.contains(&NodeId::from("E1")));

        // Nothing left to retry, so r refreshes the session list
        assert_eq!(explorer.handle_key(key(KeyCode::Char('r'))), Some(Command::LoadSessions));
    }

    #[test]
    fn test_session_refresh_keeps_shown_graph() {
        let mut explorer = ready_explorer();
        explorer.handle_graph_event(GraphEvent::Expanded {
            node: "E1".into(),
            snapshot: snapshot(),
            outcome: MergeOutcome::default(),
        });
        let positions = explorer.layout().nodes();

        assert_eq!(explorer.handle_key(key(KeyCode::Char('r'))), Some(Command::LoadSessions));
        let command = explorer.handle_update(Update::Sessions(Ok(vec![session(2), session(1)])));

        assert_eq!(command, None);
        assert_eq!(explorer.view(), &ViewState::Ready);
        assert_eq!(explorer.shown_session(), Some(SessionId(1)));
        assert!(explorer.expanded.contains(&NodeId::from("E1")));
        assert_eq!(explorer.layout().nodes().len(), positions.len());
    }

    #[test]
    fn test_retry_resends_failed_session_switch() {
        let mut explorer = ready_explorer();
        explorer.handle_update(Update::Sessions(Ok(vec![session(1), session(2)])));
        explorer.handle_key(key(KeyCode::Tab));
        explorer.handle_update(Update::Loaded(SessionId(2), Err(bad_gateway())));
        assert_eq!(explorer.shown_session(), Some(SessionId(1)));

        assert_eq!(
            explorer.handle_key(key(KeyCode::Char('r'))),
            Some(Command::LoadSession(SessionId(2)))
        );
        explorer.handle_update(Update::Loaded(SessionId(2), Ok(snapshot())));
        assert_eq!(explorer.shown_session(), Some(SessionId(2)));
        assert!(explorer.message().is_none());
    }

    #[test]
    fn test_duplicate_expand_keeps_pending_marker() {
        let mut explorer = ready_explorer();
        assert_eq!(explorer.handle_key(key(KeyCode::Enter)), Some(Command::Expand("E1".into())));
        assert_eq!(explorer.handle_key(key(KeyCode::Enter)), Some(Command::Expand("E1".into())));

        explorer.handle_update(Update::Expanded(
            "E1".into(),
            Err(GraphError::AlreadyInProgress("E1".into())),
        ));
        assert!(explorer.is_pending(&"E1".into()));
        assert!(explorer.message().is_none());
        assert!(screen_text(&mut explorer).contains("Loading..."));

        explorer.handle_update(Update::Expanded("E1".into(), Ok(snapshot())));
        assert!(!explorer.is_pending(&"E1".into()));
        assert!(!screen_text(&mut explorer).contains("Loading..."));
    }

    #[tokio::test]
    async fn test_render_connection_error() {
        // Nothing listens on port 9 on loopback in the test environment.
        let backend = HttpBackend::with_timeout("http://127.0.0.1:9/api", 2).unwrap();
        let mut explorer = Explorer::new(None);
        explorer.handle_update(Update::Sessions(backend.sessions().await));

        let text = screen_text(&mut explorer);
        assert!(text.contains("Connection Error"));
        assert!(text.contains("Failed to reach the backend"));
        assert!(text.contains("Press r to retry the connection"));
    }

    #[test]
    fn test_render_backend_error() {
        let mut explorer = Explorer::new(None);
        explorer.handle_update(Update::Sessions(Err(ClientError::Status {
            status: 500,
            url: "http://localhost:5000/api/sessions".to_string(),
            body: "db down".to_string(),
        })));

        let text = screen_text(&mut explorer);
        assert!(text.contains("Backend Error"));
        assert!(!text.contains("Failed to reach the backend"));
        assert!(text.contains("Press r to retry."));
    }
}
