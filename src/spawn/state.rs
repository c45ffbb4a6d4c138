use serde::{Deserialize, Serialize};
use std::fmt;

use super::SpawnError;
use crate::ticket::Session;
use crate::tmux::Multiplexer;

/// Lifecycle state derived from a session record and its tmux window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session has ever been recorded
    Normal,
    /// Unended record with a live window
    Active,
    /// Unended record whose window is gone
    Orphaned,
    /// Record carries an end stamp
    Ended,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Normal => "normal",
            SessionState::Active => "active",
            SessionState::Orphaned => "orphaned",
            SessionState::Ended => "ended",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateInfo {
    pub state: SessionState,
    pub session: Option<Session>,
    pub window_exists: bool,
}

impl StateInfo {
    pub fn can_spawn(&self) -> bool {
        matches!(
            self.state,
            SessionState::Normal | SessionState::Orphaned | SessionState::Ended
        )
    }

    pub fn can_resume(&self) -> bool {
        self.state == SessionState::Orphaned && self.resume_id().is_some()
    }

    /// Upstream conversation id recorded on the session, if any
    pub fn resume_id(&self) -> Option<&str> {
        self.session
            .as_ref()
            .and_then(|s| s.resume_id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

/// Reconcile a session record with the multiplexer.
///
/// Without a checker, a group name or a recorded window name the window
/// cannot be checked; such sessions are reported `Active` with
/// `window_exists` set, so callers never spawn over an agent they cannot see.
pub async fn detect_state(
    session: Option<&Session>,
    group: &str,
    checker: Option<&dyn Multiplexer>,
) -> Result<StateInfo, SpawnError> {
    let Some(session) = session else {
        return Ok(StateInfo {
            state: SessionState::Normal,
            session: None,
            window_exists: false,
        });
    };

    let mut info = StateInfo {
        state: SessionState::Ended,
        session: Some(session.clone()),
        window_exists: false,
    };
    if session.ended_at.is_some() {
        return Ok(info);
    }

    match checker {
        Some(checker) if !group.is_empty() && !session.window.is_empty() => {
            let exists = checker
                .window_exists(group, &session.window)
                .await
                .map_err(|source| SpawnError::Tmux {
                    operation: "check window".to_string(),
                    source,
                })?;
            info.window_exists = exists;
            info.state = if exists {
                SessionState::Active
            } else {
                SessionState::Orphaned
            };
        }
        _ => {
            info.window_exists = true;
            info.state = SessionState::Active;
        }
    }

    Ok(info)
}
