pub mod config;
pub mod fsutil;
pub mod locks;
pub mod session;
pub mod spawn;
pub mod ticket;
pub mod tmux;
pub mod worktree;
