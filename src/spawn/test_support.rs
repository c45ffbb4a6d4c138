//! In-memory collaborators with call counters and failure switches.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use crate::session::SessionStore;
use crate::ticket::{Session, StoreError, Ticket, TicketStatus, TicketStore};
use crate::tmux::{Multiplexer, TmuxError};
use crate::worktree::{Worktree, WorktreeError, WorktreeManager};

#[derive(Default)]
pub struct FakeTicketStore {
    tickets: Mutex<HashMap<String, (Ticket, TicketStatus)>>,
    set_session_calls: AtomicUsize,
    end_session_calls: AtomicUsize,
    move_calls: AtomicUsize,
    fail_moves: AtomicBool,
}

impl FakeTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a `work` ticket with a fixed id
    pub fn add_ticket(&self, id: &str, title: &str, status: TicketStatus) -> Ticket {
        let mut ticket = Ticket::new(title, "Do the thing", "work");
        ticket.id = id.to_string();
        self.tickets
            .lock()
            .insert(id.to_string(), (ticket.clone(), status));
        ticket
    }

    /// Attach a session record directly, bypassing the counters
    pub fn attach_session(&self, id: &str, session: Session) {
        if let Some((ticket, _)) = self.tickets.lock().get_mut(id) {
            ticket.session = Some(session);
        }
    }

    pub fn set_ticket_type(&self, id: &str, ticket_type: &str) {
        if let Some((ticket, _)) = self.tickets.lock().get_mut(id) {
            ticket.ticket_type = ticket_type.to_string();
        }
    }

    pub fn snapshot(&self, id: &str) -> (Ticket, TicketStatus) {
        self.tickets.lock()[id].clone()
    }

    pub fn fail_moves(&self) {
        self.fail_moves.store(true, Ordering::SeqCst);
    }

    pub fn set_session_count(&self) -> usize {
        self.set_session_calls.load(Ordering::SeqCst)
    }

    pub fn end_session_count(&self) -> usize {
        self.end_session_calls.load(Ordering::SeqCst)
    }

    pub fn move_count(&self) -> usize {
        self.move_calls.load(Ordering::SeqCst)
    }
}

fn not_found(id: &str) -> StoreError {
    StoreError::NotFound {
        resource: "ticket",
        id: id.to_string(),
    }
}

#[async_trait]
impl TicketStore for FakeTicketStore {
    async fn get(&self, id: &str) -> Result<(Ticket, TicketStatus), StoreError> {
        self.tickets.lock().get(id).cloned().ok_or_else(|| not_found(id))
    }

    async fn move_to(&self, id: &str, to: TicketStatus) -> Result<(), StoreError> {
        self.move_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_moves.load(Ordering::SeqCst) {
            return Err(StoreError::Io {
                context: format!("move ticket {}", id),
                source: std::io::Error::other("disk full"),
            });
        }
        let mut tickets = self.tickets.lock();
        let entry = tickets.get_mut(id).ok_or_else(|| not_found(id))?;
        entry.1 = to;
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
        self.set_session_calls.fetch_add(1, Ordering::SeqCst);
        let mut tickets = self.tickets.lock();
        let (ticket, _) = tickets.get_mut(id).ok_or_else(|| not_found(id))?;
        let mut session = Session::new(id, agent, window, resume_id);
        session.worktree = worktree;
        ticket.session = Some(session.clone());
        Ok(session)
    }

    async fn end_session(&self, id: &str) -> Result<(), StoreError> {
        self.end_session_calls.fetch_add(1, Ordering::SeqCst);
        let mut tickets = self.tickets.lock();
        let (ticket, _) = tickets.get_mut(id).ok_or_else(|| not_found(id))?;
        if let Some(session) = ticket.session.as_mut().filter(|s| s.is_active()) {
            session.ended_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    end_calls: AtomicUsize,
}

impl FakeSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, session: Session) {
        self.sessions.lock().insert(key.to_string(), session);
    }

    pub fn get(&self, key: &str) -> Option<Session> {
        self.sessions.lock().get(key).cloned()
    }

    pub fn end_count(&self) -> usize {
        self.end_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for FakeSessionStore {
    async fn get_by_key(&self, key: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.get(key))
    }

    async fn create(
        &self,
        key: &str,
        agent: &str,
        window: &str,
        resume_id: Option<String>,
    ) -> Result<Session, StoreError> {
        let session = Session::new(key, agent, window, resume_id);
        self.insert(key, session.clone());
        Ok(session)
    }

    async fn end(&self, key: &str) -> Result<(), StoreError> {
        self.end_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(session) = self
            .sessions
            .lock()
            .get_mut(key)
            .filter(|s| s.is_active())
        {
            session.ended_at = Some(Utc::now());
        }
        Ok(())
    }
}

/// Multiplexer whose windows are a set of `(group, window)` pairs
#[derive(Default)]
pub struct FakeMux {
    windows: Mutex<HashSet<(String, String)>>,
    checks: AtomicUsize,
    agent_spawns: AtomicUsize,
    primary_spawns: AtomicUsize,
    next_index: AtomicU32,
    fail_spawn: AtomicBool,
    fail_check: AtomicBool,
    last_working_dir: Mutex<Option<PathBuf>>,
}

impl FakeMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_window(&self, group: &str, window: &str) {
        self.windows
            .lock()
            .insert((group.to_string(), window.to_string()));
    }

    pub fn has_window(&self, group: &str, window: &str) -> bool {
        self.windows
            .lock()
            .contains(&(group.to_string(), window.to_string()))
    }

    pub fn fail_spawn(&self) {
        self.fail_spawn.store(true, Ordering::SeqCst);
    }

    pub fn fail_check(&self) {
        self.fail_check.store(true, Ordering::SeqCst);
    }

    pub fn check_count(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    /// Windows opened, agent and primary alike
    pub fn spawn_count(&self) -> usize {
        self.agent_spawns.load(Ordering::SeqCst) + self.primary_count()
    }

    pub fn primary_count(&self) -> usize {
        self.primary_spawns.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.check_count() + self.spawn_count()
    }

    /// Working directory of the most recent window opened
    pub fn last_working_dir(&self) -> Option<PathBuf> {
        self.last_working_dir.lock().clone()
    }

    fn open(&self, group: &str, window: &str, working_dir: &Path) -> Result<(), TmuxError> {
        *self.last_working_dir.lock() = Some(working_dir.to_path_buf());
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(TmuxError::Command {
                command: "new-window".to_string(),
                output: "server exited unexpectedly".to_string(),
            });
        }
        self.add_window(group, window);
        Ok(())
    }
}

#[async_trait]
impl Multiplexer for FakeMux {
    async fn window_exists(&self, group: &str, window: &str) -> Result<bool, TmuxError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.fail_check.load(Ordering::SeqCst) {
            return Err(TmuxError::Command {
                command: "list-windows".to_string(),
                output: "lost server".to_string(),
            });
        }
        Ok(self.has_window(group, window))
    }

    async fn spawn_agent(
        &self,
        group: &str,
        window: &str,
        _command: &str,
        working_dir: &Path,
    ) -> Result<u32, TmuxError> {
        self.agent_spawns.fetch_add(1, Ordering::SeqCst);
        self.open(group, window, working_dir)?;
        Ok(self.next_index.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn spawn_primary_window(
        &self,
        group: &str,
        window: &str,
        _command: &str,
        working_dir: &Path,
    ) -> Result<(), TmuxError> {
        self.primary_spawns.fetch_add(1, Ordering::SeqCst);
        self.open(group, window, working_dir)
    }
}

/// Worktrees that exist only as a set of paths
#[derive(Default)]
pub struct FakeWorktrees {
    live: Mutex<HashSet<PathBuf>>,
    removed: Mutex<Vec<Worktree>>,
    fail_create: AtomicBool,
}

impl FakeWorktrees {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    pub fn removed(&self) -> Vec<Worktree> {
        self.removed.lock().clone()
    }
}

#[async_trait]
impl WorktreeManager for FakeWorktrees {
    async fn create(&self, _repo: &Path, name: &str, slug: &str) -> Result<Worktree, WorktreeError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(WorktreeError::Command {
                command: "worktree add".to_string(),
                output: "fatal: not a git repository".to_string(),
            });
        }
        let worktree = Worktree {
            path: PathBuf::from("/worktrees").join(name),
            branch: format!("ticket/{}", slug),
        };
        self.live.lock().insert(worktree.path.clone());
        Ok(worktree)
    }

    async fn remove(&self, _repo: &Path, worktree: &Worktree) -> Result<(), WorktreeError> {
        self.live.lock().remove(&worktree.path);
        self.removed.lock().push(worktree.clone());
        Ok(())
    }
}
