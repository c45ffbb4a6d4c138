use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use super::{AgentStatus, Session, Ticket, TicketStatus};
use crate::fsutil::atomic_write;
use crate::locks::KeyedLocks;
use crate::worktree::Worktree;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed record {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Ticket persistence the orchestrator relies on.
///
/// Implementations must make each operation atomic per ticket: a
/// `set_session` racing an `end_session` on the same ticket may not
/// interleave their read-modify-write cycles.
#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<(Ticket, TicketStatus), StoreError>;

    async fn move_to(&self, id: &str, to: TicketStatus) -> Result<(), StoreError>;

    /// Record a new current session, replacing whatever was there
    async fn set_session(
        &self,
        id: &str,
        agent: &str,
        window: &str,
        resume_id: Option<String>,
        worktree: Option<Worktree>,
    ) -> Result<Session, StoreError>;

    /// Stamp the current session as ended. No-op when it already is.
    async fn end_session(&self, id: &str) -> Result<(), StoreError>;
}

/// Tickets stored as `<root>/<status>/<id>.json`.
///
/// Moving between statuses renames the file, so the last writer wins.
pub struct FileTicketStore {
    root: PathBuf,
    locks: KeyedLocks,
}

impl FileTicketStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: KeyedLocks::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, status: TicketStatus, id: &str) -> PathBuf {
        self.root.join(status.as_str()).join(format!("{}.json", id))
    }

    async fn locate(&self, id: &str) -> Result<(PathBuf, TicketStatus), StoreError> {
        for status in TicketStatus::ALL {
            let path = self.path_for(status, id);
            let exists = tokio::fs::try_exists(&path)
                .await
                .map_err(|e| StoreError::io(format!("stat {}", path.display()), e))?;
            if exists {
                return Ok((path, status));
            }
        }
        Err(StoreError::NotFound {
            resource: "ticket",
            id: id.to_string(),
        })
    }

    async fn read(path: &Path) -> Result<Ticket, StoreError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::io(format!("read {}", path.display()), e))?;
        serde_json::from_slice(&data).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    async fn write(path: &Path, ticket: &Ticket) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(ticket).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        atomic_write(path, &data)
            .await
            .map_err(|e| StoreError::io(format!("write {}", path.display()), e))
    }

    /// Create a ticket in the backlog
    pub async fn create(
        &self,
        title: &str,
        body: &str,
        ticket_type: &str,
    ) -> Result<Ticket, StoreError> {
        let ticket = Ticket::new(title, body, ticket_type);
        let path = self.path_for(TicketStatus::Backlog, &ticket.id);
        Self::write(&path, &ticket).await?;
        debug!(ticket_id = %ticket.id, "created ticket");
        Ok(ticket)
    }

    /// All tickets, oldest first
    pub async fn list(&self) -> Result<Vec<(Ticket, TicketStatus)>, StoreError> {
        let root = self.root.clone();
        let scanned = tokio::task::spawn_blocking(move || scan_tickets(&root))
            .await
            .map_err(|e| StoreError::io("scan tickets", std::io::Error::other(e)))??;
        Ok(scanned)
    }

    /// Record the activity an agent reported through its hooks
    pub async fn update_agent_status(
        &self,
        id: &str,
        status: AgentStatus,
    ) -> Result<(), StoreError> {
        let _guard = self.locks.lock(id).await;
        let (path, _) = self.locate(id).await?;
        let mut ticket = Self::read(&path).await?;
        match ticket.session.as_mut() {
            Some(session) if session.is_active() => session.status = Some(status),
            _ => {
                return Err(StoreError::NotFound {
                    resource: "active session",
                    id: id.to_string(),
                })
            }
        }
        Self::write(&path, &ticket).await
    }
}

fn scan_tickets(root: &Path) -> Result<Vec<(Ticket, TicketStatus)>, StoreError> {
    let mut tickets = Vec::new();

    for status in TicketStatus::ALL {
        let dir = root.join(status.as_str());
        if !dir.is_dir() {
            continue;
        }

        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                StoreError::io(format!("walk {}", dir.display()), std::io::Error::other(e))
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let data = std::fs::read(path)
                .map_err(|e| StoreError::io(format!("read {}", path.display()), e))?;
            let ticket: Ticket =
                serde_json::from_slice(&data).map_err(|source| StoreError::Json {
                    path: path.to_path_buf(),
                    source,
                })?;
            tickets.push((ticket, status));
        }
    }

    tickets.sort_by(|a, b| a.0.created.cmp(&b.0.created));
    Ok(tickets)
}

#[async_trait]
impl TicketStore for FileTicketStore {
    async fn get(&self, id: &str) -> Result<(Ticket, TicketStatus), StoreError> {
        let _guard = self.locks.lock(id).await;
        let (path, status) = self.locate(id).await?;
        let ticket = Self::read(&path).await?;
        Ok((ticket, status))
    }

    async fn move_to(&self, id: &str, to: TicketStatus) -> Result<(), StoreError> {
        let _guard = self.locks.lock(id).await;
        let (from_path, from) = self.locate(id).await?;
        if from == to {
            return Ok(());
        }

        let to_path = self.path_for(to, id);
        if let Some(parent) = to_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(format!("create {}", parent.display()), e))?;
        }
        tokio::fs::rename(&from_path, &to_path)
            .await
            .map_err(|e| StoreError::io(format!("move ticket {} to {}", id, to), e))?;

        debug!(ticket_id = id, %from, %to, "moved ticket");
        Ok(())
    }

    async fn set_session(
        &self,
        id: &str,
        agent: &str,
        window: &str,
        resume_id: Option<String>,
        worktree: Option<Worktree>,
    ) -> Result<Session, StoreError> {
        let _guard = self.locks.lock(id).await;
        let (path, _) = self.locate(id).await?;
        let mut ticket = Self::read(&path).await?;

        let mut session = Session::new(id, agent, window, resume_id);
        session.worktree = worktree;
        ticket.session = Some(session.clone());
        ticket.updated = Utc::now();
        Self::write(&path, &ticket).await?;

        debug!(ticket_id = id, session_id = %session.id, window, "recorded session");
        Ok(session)
    }

    async fn end_session(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.locks.lock(id).await;
        let (path, _) = self.locate(id).await?;
        let mut ticket = Self::read(&path).await?;

        match ticket.session.as_mut() {
            Some(session) if session.is_active() => {
                let now = Utc::now();
                session.ended_at = Some(now);
                ticket.updated = now;
            }
            _ => return Ok(()),
        }

        Self::write(&path, &ticket).await?;
        debug!(ticket_id = id, "ended session");
        Ok(())
    }
}
