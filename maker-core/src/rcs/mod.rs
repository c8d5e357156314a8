//! `RevisionControl`: the version-control collaborator contract (spec §6).

pub mod git;

use crate::error::MakerResult;
use crate::state::Conflict;
use async_trait::async_trait;
use std::path::PathBuf;

/// One entry in a branch's commit history, as exposed to the UI.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub sha: String,
    pub message: String,
}

/// An active git worktree, as returned by `createWorktree`/`listWorktrees`.
#[derive(Debug, Clone)]
pub struct WorktreeHandle {
    pub path: PathBuf,
    pub branch: String,
}

/// Version control operations the Step Executor and Engine Facade need,
/// abstracted so the core never shells out to `git` directly (spec §6).
#[async_trait]
pub trait RevisionControl: Send + Sync {
    async fn status(&self) -> MakerResult<Vec<String>>;
    async fn init_repo(&self) -> MakerResult<()>;
    async fn ensure_gitignore(&self, entries: &[String]) -> MakerResult<()>;
    async fn create_checkpoint(&self, message: &str) -> MakerResult<String>;
    async fn commit_all(&self, message: &str) -> MakerResult<String>;
    async fn create_worktree(&self, task_id: &str, step_id: &str) -> MakerResult<WorktreeHandle>;
    async fn cleanup_worktree(&self, handle: &WorktreeHandle) -> MakerResult<()>;
    async fn merge_squash(&self, handle: &WorktreeHandle) -> MakerResult<()>;
    async fn get_history(&self, max_entries: usize) -> MakerResult<Vec<HistoryEntry>>;
    async fn list_worktrees(&self) -> MakerResult<Vec<WorktreeHandle>>;
    async fn get_conflicts(&self) -> MakerResult<Vec<Conflict>>;
    async fn resolve_conflict(&self, conflict_id: &str, resolution: &str) -> MakerResult<()>;
    async fn sync_remote(&self) -> MakerResult<()>;
}
