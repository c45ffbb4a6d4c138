//! Sessions that do not belong to a ticket.
//!
//! The architect (one per project) and the meta agent (one per user) are
//! tracked here, keyed by role name instead of ticket id.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::fsutil::atomic_write;
use crate::ticket::{Session, StoreError};

/// Session key of the per-project architect agent
pub const ARCHITECT_SESSION_KEY: &str = "architect";
/// Session key of the per-user meta agent
pub const META_SESSION_KEY: &str = "meta";

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_by_key(&self, key: &str) -> Result<Option<Session>, StoreError>;

    async fn create(
        &self,
        key: &str,
        agent: &str,
        window: &str,
        resume_id: Option<String>,
    ) -> Result<Session, StoreError>;

    /// Stamp the session under `key` as ended. No-op when absent or ended.
    async fn end(&self, key: &str) -> Result<(), StoreError>;
}

/// All role sessions of one scope, kept in a single JSON file
pub struct FileSessionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store for a project's architect session
    pub fn for_project(project_path: &Path) -> Self {
        Self::new(project_path.join(".conductor").join("sessions.json"))
    }

    /// Store for the user-wide meta session under `~/.conductor`
    pub fn for_user() -> Self {
        let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
        Self::new(home.join(".conductor").join("meta-session.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<HashMap<String, Session>, StoreError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    context: format!("read {}", self.path.display()),
                    source,
                })
            }
        };

        if data.is_empty() {
            return Ok(HashMap::new());
        }

        serde_json::from_slice(&data).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })
    }

    async fn save(&self, sessions: &HashMap<String, Session>) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(sessions).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        atomic_write(&self.path, &data)
            .await
            .map_err(|source| StoreError::Io {
                context: format!("write {}", self.path.display()),
                source,
            })
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get_by_key(&self, key: &str) -> Result<Option<Session>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn create(
        &self,
        key: &str,
        agent: &str,
        window: &str,
        resume_id: Option<String>,
    ) -> Result<Session, StoreError> {
        let _guard = self.lock.lock().await;
        let mut sessions = self.load().await?;
        let session = Session::new(key, agent, window, resume_id);
        sessions.insert(key.to_string(), session.clone());
        self.save(&sessions).await?;
        debug!(key, session_id = %session.id, "recorded role session");
        Ok(session)
    }

    async fn end(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut sessions = self.load().await?;
        match sessions.get_mut(key) {
            Some(session) if session.is_active() => session.ended_at = Some(Utc::now()),
            _ => return Ok(()),
        }
        self.save(&sessions).await
    }
}
