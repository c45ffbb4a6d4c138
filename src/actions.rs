use crossterm::event::KeyEvent;

use agent_conductor::spawn::Mode;

use crate::app::TicketRow;

/// Actions that can be dispatched through the dashboard
#[derive(Debug, Clone)]
pub enum Action {
    /// A key was pressed
    KeyPress(KeyEvent),
    /// Tickets and their detected states were refreshed
    TicketsUpdated(Vec<TicketRow>),
    /// An error occurred
    Error(String),
    /// Request to quit the application
    Quit,
    /// Start, resume or restart the agent of a ticket
    Orchestrate { ticket_id: String, mode: Mode },
    /// Create a backlog ticket with this title
    CreateTicket(String),
    /// Attach to a window of the project's tmux session
    Attach(String),
    /// Copy the attach command for a window to the clipboard
    CopyAttach(String),
}
