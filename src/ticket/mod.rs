mod slug;
mod store;

pub use slug::generate_slug;
pub use store::{FileTicketStore, StoreError, TicketStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::worktree::Worktree;

/// Ticket type used when a ticket does not declare one
pub const DEFAULT_TICKET_TYPE: &str = "work";

/// Workflow status of a ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Backlog,
    Progress,
    Review,
    Done,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 4] = [
        TicketStatus::Backlog,
        TicketStatus::Progress,
        TicketStatus::Review,
        TicketStatus::Done,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Backlog => "backlog",
            TicketStatus::Progress => "progress",
            TicketStatus::Review => "review",
            TicketStatus::Done => "done",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TicketStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown ticket status '{}'", s))
    }
}

/// Activity reported by a running agent through its hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Starting,
    InProgress,
    Idle,
    WaitingPermission,
    Error,
}

/// One spawned agent process, tied to a ticket or to a role key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Owning ticket id, or the role key (`architect`, `meta`)
    pub ticket_id: String,
    pub agent: String,
    /// tmux window hosting the agent
    pub window: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AgentStatus>,
    /// Upstream conversation id the agent can be resumed with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_id: Option<String>,
    /// Checkout the agent works in, when spawned into a git worktree
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<Worktree>,
}

impl Session {
    pub fn new(ticket_id: &str, agent: &str, window: &str, resume_id: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ticket_id: ticket_id.to_string(),
            agent: agent.to_string(),
            window: window.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            status: Some(AgentStatus::Starting),
            resume_id,
            worktree: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// A unit of work tracked by the ticket store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    #[serde(default, rename = "type")]
    pub ticket_type: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

impl Ticket {
    pub fn new(title: &str, body: &str, ticket_type: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ticket_type: ticket_type.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            created: now,
            updated: now,
            session: None,
        }
    }

    /// Ticket type, falling back to the default type when unset
    pub fn effective_type(&self) -> &str {
        if self.ticket_type.is_empty() {
            DEFAULT_TICKET_TYPE
        } else {
            &self.ticket_type
        }
    }

    pub fn has_active_session(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in TicketStatus::ALL {
            assert_eq!(status.as_str().parse::<TicketStatus>().unwrap(), status);
        }
        assert!("archived".parse::<TicketStatus>().is_err());
    }

    #[test]
    fn test_effective_type_defaults_to_work() {
        let mut ticket = Ticket::new("Title", "", "");
        assert_eq!(ticket.effective_type(), "work");
        ticket.ticket_type = "debug".to_string();
        assert_eq!(ticket.effective_type(), "debug");
    }

    #[test]
    fn test_active_session_requires_no_end_stamp() {
        let mut ticket = Ticket::new("Title", "", "work");
        assert!(!ticket.has_active_session());

        ticket.session = Some(Session::new(&ticket.id, "claude", "title", None));
        assert!(ticket.has_active_session());

        if let Some(session) = ticket.session.as_mut() {
            session.ended_at = Some(Utc::now());
        }
        assert!(!ticket.has_active_session());
    }
}
