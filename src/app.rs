use anyhow::{Context, Result};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph},
    Frame,
};

use agent_conductor::spawn::{detect_state, Mode, SessionState};
use agent_conductor::ticket::{AgentStatus, FileTicketStore, TicketStatus};
use agent_conductor::tmux::Multiplexer;

use crate::actions::Action;

/// Theme colors
pub struct Theme {
    pub bg: Color,
    pub fg: Color,
    pub accent: Color,
    pub dim: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            bg: Color::Rgb(30, 30, 30),
            fg: Color::Rgb(220, 220, 220),
            accent: Color::Rgb(217, 119, 87),
            dim: Color::Rgb(100, 100, 100),
            success: Color::Rgb(80, 200, 120),
            warning: Color::Rgb(255, 193, 7),
            error: Color::Rgb(220, 53, 69),
        }
    }
}

/// One ticket as shown in the list, with the state of its agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRow {
    pub id: String,
    pub title: String,
    pub ticket_type: String,
    pub status: TicketStatus,
    pub state: SessionState,
    pub agent: Option<String>,
    pub activity: Option<AgentStatus>,
    /// Window of the latest session, if any
    pub window: Option<String>,
}

impl TicketRow {
    /// Read every ticket and check its window in `group`
    pub async fn collect(
        store: &FileTicketStore,
        mux: &dyn Multiplexer,
        group: &str,
    ) -> Result<Vec<TicketRow>> {
        let tickets = store.list().await.context("failed to list tickets")?;
        let mut rows = Vec::with_capacity(tickets.len());

        for (ticket, status) in tickets {
            let info = detect_state(ticket.session.as_ref(), group, Some(mux))
                .await
                .with_context(|| format!("failed to detect state of {}", ticket.id))?;
            let session = ticket.session.as_ref();
            rows.push(TicketRow {
                ticket_type: ticket.effective_type().to_string(),
                id: ticket.id,
                title: ticket.title,
                status,
                state: info.state,
                agent: session.map(|s| s.agent.clone()),
                activity: session.filter(|s| s.is_active()).and_then(|s| s.status),
                window: session.map(|s| s.window.clone()),
            });
        }
        Ok(rows)
    }

    fn running_window(&self) -> Option<&str> {
        if self.state == SessionState::Active {
            self.window.as_deref()
        } else {
            None
        }
    }
}

fn activity_label(activity: AgentStatus) -> &'static str {
    match activity {
        AgentStatus::Starting => "starting",
        AgentStatus::InProgress => "working",
        AgentStatus::Idle => "idle",
        AgentStatus::WaitingPermission => "needs permission",
        AgentStatus::Error => "error",
    }
}

/// Footer message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Error(String),
}

/// Input mode for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    /// Typing the title of a new ticket
    Creating,
    /// Confirming a fresh restart of the selected ticket
    Confirming,
}

/// Main application state
pub struct App {
    pub tickets: Vec<TicketRow>,
    pub list_state: ListState,
    pub notice: Option<Notice>,
    /// tmux session the project's agents live in
    pub session_group: String,
    pub theme: Theme,
    pub input_mode: InputMode,
    pub input_buffer: String,
    pub pending_actions: Vec<Action>,
}

impl App {
    pub fn new(session_group: impl Into<String>) -> Self {
        let mut list_state = ListState::default();
        list_state.select(Some(0));

        Self {
            tickets: Vec::new(),
            list_state,
            notice: None,
            session_group: session_group.into(),
            theme: Theme::default(),
            input_mode: InputMode::Normal,
            input_buffer: String::new(),
            pending_actions: Vec::new(),
        }
    }

    pub fn selected_ticket(&self) -> Option<&TicketRow> {
        self.list_state.selected().and_then(|i| self.tickets.get(i))
    }

    /// Take pending actions (drains the queue)
    pub fn take_pending_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.pending_actions)
    }

    pub fn info(&mut self, msg: impl Into<String>) {
        self.notice = Some(Notice::Info(msg.into()));
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.notice = Some(Notice::Error(msg.into()));
    }

    /// Handle an action and return whether to quit
    pub fn handle_action(&mut self, action: Action) -> Result<bool> {
        match action {
            Action::KeyPress(key) => self.handle_key(key),
            Action::TicketsUpdated(tickets) => {
                self.tickets = tickets;
                if let Some(selected) = self.list_state.selected() {
                    if selected >= self.tickets.len() && !self.tickets.is_empty() {
                        self.list_state.select(Some(self.tickets.len() - 1));
                    }
                }
                Ok(false)
            }
            Action::Error(msg) => {
                self.error(msg);
                Ok(false)
            }
            Action::Quit => Ok(true),
            _ => Ok(false),
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        if self.notice.is_some() && self.input_mode == InputMode::Normal {
            self.notice = None;
        }

        match self.input_mode {
            InputMode::Normal => self.handle_normal_key(key),
            InputMode::Creating => self.handle_creating_key(key),
            InputMode::Confirming => self.handle_confirming_key(key),
        }
    }

    fn orchestrate_selected(&mut self, mode: Mode) {
        if let Some(ticket) = self.selected_ticket() {
            let ticket_id = ticket.id.clone();
            self.pending_actions
                .push(Action::Orchestrate { ticket_id, mode });
        }
    }

    fn selected_window(&mut self) -> Option<String> {
        let ticket = self.selected_ticket()?;
        match ticket.running_window() {
            Some(window) => Some(window.to_string()),
            None => {
                let msg = format!("{} has no running agent ({})", ticket.id, ticket.state);
                self.error(msg);
                None
            }
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('j') | KeyCode::Down => self.next_ticket(),
            KeyCode::Char('k') | KeyCode::Up => self.previous_ticket(),
            KeyCode::Enter => self.orchestrate_selected(Mode::Normal),
            KeyCode::Char('r') => self.orchestrate_selected(Mode::Resume),
            KeyCode::Char('f') => {
                if self.selected_ticket().is_some() {
                    self.input_mode = InputMode::Confirming;
                }
            }
            KeyCode::Char('a') => {
                if let Some(window) = self.selected_window() {
                    self.pending_actions.push(Action::Attach(window));
                }
            }
            KeyCode::Char('y') => {
                if let Some(window) = self.selected_window() {
                    self.pending_actions.push(Action::CopyAttach(window));
                }
            }
            KeyCode::Char('n') => {
                self.input_mode = InputMode::Creating;
                self.input_buffer.clear();
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Ok(true);
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_creating_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Enter => {
                let title = self.input_buffer.trim().to_string();
                if !title.is_empty() {
                    self.pending_actions.push(Action::CreateTicket(title));
                }
                self.input_buffer.clear();
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Esc => {
                self.input_buffer.clear();
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Char(c) => self.input_buffer.push(c),
            KeyCode::Backspace => {
                self.input_buffer.pop();
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_confirming_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                self.orchestrate_selected(Mode::Fresh);
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.input_mode = InputMode::Normal;
            }
            _ => {}
        }
        Ok(false)
    }

    fn next_ticket(&mut self) {
        if self.tickets.is_empty() {
            return;
        }
        let i = match self.list_state.selected() {
            Some(i) if i + 1 < self.tickets.len() => i + 1,
            _ => 0,
        };
        self.list_state.select(Some(i));
    }

    fn previous_ticket(&mut self) {
        if self.tickets.is_empty() {
            return;
        }
        let i = match self.list_state.selected() {
            Some(0) | None => self.tickets.len() - 1,
            Some(i) => i - 1,
        };
        self.list_state.select(Some(i));
    }

    fn state_color(&self, state: SessionState) -> Color {
        match state {
            SessionState::Active => self.theme.success,
            SessionState::Orphaned => self.theme.warning,
            SessionState::Ended => self.theme.dim,
            SessionState::Normal => self.theme.fg,
        }
    }

    pub fn render(&mut self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(0),    // Main content
                Constraint::Length(3), // Footer/status
            ])
            .split(frame.area());

        self.render_header(frame, chunks[0]);
        self.render_main(frame, chunks[1]);
        self.render_footer(frame, chunks[2]);

        match self.input_mode {
            InputMode::Creating => self.render_create_dialog(frame),
            InputMode::Confirming => self.render_confirm_dialog(frame),
            InputMode::Normal => {}
        }
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let title = Paragraph::new(Line::from(vec![
            Span::styled(
                " Conductor ",
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("│ tmux session {}", self.session_group),
                Style::default().fg(self.theme.dim),
            ),
        ]))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(title, area);
    }

    fn render_main(&mut self, frame: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
            .split(area);

        self.render_ticket_list(frame, chunks[0]);
        self.render_detail_pane(frame, chunks[1]);
    }

    fn render_ticket_list(&mut self, frame: &mut Frame, area: Rect) {
        let items: Vec<ListItem> = if self.tickets.is_empty() {
            vec![ListItem::new(Line::from(Span::styled(
                "  No tickets yet. Press 'n' to create one.",
                Style::default().fg(self.theme.dim),
            )))]
        } else {
            self.tickets
                .iter()
                .map(|ticket| {
                    let icon = match ticket.state {
                        SessionState::Active => "● ",
                        SessionState::Orphaned => "◐ ",
                        SessionState::Ended => "○ ",
                        SessionState::Normal => "  ",
                    };
                    ListItem::new(Line::from(vec![
                        Span::styled(icon, Style::default().fg(self.state_color(ticket.state))),
                        Span::styled(
                            format!("[{}] ", ticket.status),
                            Style::default().fg(self.theme.dim),
                        ),
                        Span::styled(ticket.title.as_str(), Style::default().fg(self.theme.fg)),
                    ]))
                })
                .collect()
        };

        let list = List::new(items)
            .block(
                Block::default()
                    .title(" Tickets ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(self.theme.dim)),
            )
            .highlight_style(
                Style::default()
                    .bg(Color::Rgb(50, 50, 50))
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("▶ ");

        frame.render_stateful_widget(list, area, &mut self.list_state);
    }

    fn render_detail_pane(&self, frame: &mut Frame, area: Rect) {
        let field = |label: &'static str, value: String, color: Color| {
            Line::from(vec![
                Span::styled(label, Style::default().fg(self.theme.dim)),
                Span::styled(value, Style::default().fg(color)),
            ])
        };

        let content = if let Some(ticket) = self.selected_ticket() {
            let mut lines = vec![
                field("Title: ", ticket.title.clone(), self.theme.fg),
                field("ID: ", ticket.id.clone(), self.theme.fg),
                field("Type: ", ticket.ticket_type.clone(), self.theme.fg),
                field("Status: ", ticket.status.to_string(), self.theme.fg),
                field(
                    "Agent: ",
                    ticket.state.to_string(),
                    self.state_color(ticket.state),
                ),
            ];
            if let Some(agent) = &ticket.agent {
                lines.push(field("Runtime: ", agent.clone(), self.theme.fg));
            }
            if let Some(window) = &ticket.window {
                lines.push(field("Window: ", window.clone(), self.theme.fg));
            }
            if let Some(activity) = ticket.activity {
                let color = match activity {
                    AgentStatus::WaitingPermission => self.theme.accent,
                    AgentStatus::Error => self.theme.error,
                    _ => self.theme.fg,
                };
                lines.push(field("Activity: ", activity_label(activity).to_string(), color));
            }
            lines.push(Line::from(""));
            let hint = match ticket.state {
                SessionState::Active => "Press 'a' to attach, 'y' to copy the attach command",
                SessionState::Orphaned => "Press 'r' to resume, 'f' to start fresh",
                _ => "Press Enter to spawn an agent",
            };
            lines.push(Line::from(Span::styled(
                hint,
                Style::default().fg(self.theme.dim),
            )));
            lines
        } else {
            vec![Line::from(Span::styled(
                "No ticket selected",
                Style::default().fg(self.theme.dim),
            ))]
        };

        let detail = Paragraph::new(content).block(
            Block::default()
                .title(" Details ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(detail, area);
    }

    fn render_footer(&self, frame: &mut Frame, area: Rect) {
        let help_text =
            " q: Quit │ j/k: Navigate │ Enter: Spawn │ r: Resume │ f: Fresh │ a: Attach │ y: Copy attach │ n: New ";

        let content = match &self.notice {
            Some(Notice::Info(msg)) => Line::from(Span::styled(
                format!(" {} ", msg),
                Style::default().fg(self.theme.success),
            )),
            Some(Notice::Error(msg)) => Line::from(Span::styled(
                format!(" {} ", msg),
                Style::default().fg(self.theme.error),
            )),
            None => Line::from(Span::styled(help_text, Style::default().fg(self.theme.dim))),
        };

        let footer = Paragraph::new(content).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(footer, area);
    }

    fn render_create_dialog(&self, frame: &mut Frame) {
        let area = centered_rect(50, 20, frame.area());

        frame.render_widget(Clear, area);

        let block = Block::default()
            .title(" New Ticket ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.theme.accent));

        let inner = block.inner(area);
        frame.render_widget(block, area);

        let text = vec![
            Line::from(""),
            Line::from(Span::styled("Title:", Style::default().fg(self.theme.fg))),
            Line::from(""),
            Line::from(Span::styled(
                format!("▶ {}_", self.input_buffer),
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "Press Enter to create, Esc to cancel",
                Style::default().fg(self.theme.dim),
            )),
        ];

        frame.render_widget(Paragraph::new(text), inner);
    }

    fn render_confirm_dialog(&self, frame: &mut Frame) {
        let area = centered_rect(50, 20, frame.area());

        frame.render_widget(Clear, area);

        let block = Block::default()
            .title(" Start Fresh ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.theme.warning));

        let inner = block.inner(area);
        frame.render_widget(block, area);

        let title = self
            .selected_ticket()
            .map(|t| t.title.as_str())
            .unwrap_or("unknown");

        let text = vec![
            Line::from(""),
            Line::from(Span::styled(
                format!("Restart '{}' with a new agent?", title),
                Style::default().fg(self.theme.fg),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "The previous conversation will not be resumable.",
                Style::default().fg(self.theme.warning),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "Press 'y' to confirm, 'n' or Esc to cancel",
                Style::default().fg(self.theme.dim),
            )),
        ];

        frame.render_widget(Paragraph::new(text), inner);
    }
}

/// Helper function to create a centered rectangle
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
