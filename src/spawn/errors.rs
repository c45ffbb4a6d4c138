use thiserror::Error;

use super::state::SessionState;
use crate::ticket::StoreError;
use crate::tmux::TmuxError;
use crate::worktree::WorktreeError;

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("config error: {field}: {message}")]
    Config { field: String, message: String },

    #[error("ticket {ticket_id} in state {state}: {message}")]
    State {
        ticket_id: String,
        state: SessionState,
        message: String,
    },

    #[error("{binary} not found: {cause}")]
    BinaryNotFound { binary: String, cause: String },

    #[error("tmux {operation}: {source}")]
    Tmux {
        operation: String,
        #[source]
        source: TmuxError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("create worktree: {0}")]
    Worktree(#[from] WorktreeError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("spawn failed: {0}")]
    Failed(String),
}

impl SpawnError {
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        SpawnError::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn state(
        ticket_id: impl Into<String>,
        state: SessionState,
        message: impl Into<String>,
    ) -> Self {
        SpawnError::State {
            ticket_id: ticket_id.into(),
            state,
            message: message.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        SpawnError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_state_error(&self) -> bool {
        matches!(self, SpawnError::State { .. })
    }

    pub fn is_config_error(&self) -> bool {
        matches!(self, SpawnError::Config { .. })
    }

    /// Name of the offending field for config errors
    pub fn config_field(&self) -> Option<&str> {
        match self {
            SpawnError::Config { field, .. } => Some(field),
            _ => None,
        }
    }
}
