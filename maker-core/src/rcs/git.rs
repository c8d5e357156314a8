//! `GitRevisionControl`: default git-backed `RevisionControl` adapter,
//! merging the teacher's checkpoint/rollback handling with its worktree
//! lifecycle into one collaborator (spec §6.1).

use super::{HistoryEntry, RevisionControl, WorktreeHandle};
use crate::error::{MakerError, MakerResult};
use crate::state::Conflict;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// Branch naming matches spec §6.1: `maker/{taskId}/step-{stepId}`. The
/// caller supplies the already-formatted branch-safe task and step ids.
fn worktree_branch(task_id: &str, step_id: &str) -> String {
    format!("maker/{task_id}/step-{step_id}")
}

/// Retry budget for transient lock contention (teacher's
/// `git_manager.rs` retries index-lock failures a fixed number of times
/// with a short fixed backoff rather than giving up immediately).
const LOCK_RETRY_ATTEMPTS: u32 = 3;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(200);

pub struct GitRevisionControl {
    repo_root: PathBuf,
    worktree_base: PathBuf,
}

impl GitRevisionControl {
    pub fn new(repo_root: impl Into<PathBuf>, worktree_base: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            worktree_base: worktree_base.into(),
        }
    }

    async fn run_git(&self, dir: &Path, args: &[&str]) -> MakerResult<String> {
        let mut attempt = 0;
        loop {
            let output = Command::new("git")
                .args(args)
                .current_dir(dir)
                .output()
                .await
                .map_err(|e| MakerError::rcs(args.join(" "), e.to_string()))?;

            if output.status.success() {
                return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
            }

            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            let err = MakerError::rcs(args.join(" "), stderr);
            attempt += 1;
            if err.is_retryable() && attempt < LOCK_RETRY_ATTEMPTS {
                tokio::time::sleep(LOCK_RETRY_DELAY).await;
                continue;
            }
            return Err(err);
        }
    }
}

#[async_trait]
impl RevisionControl for GitRevisionControl {
    async fn status(&self) -> MakerResult<Vec<String>> {
        let out = self.run_git(&self.repo_root, &["status", "--porcelain"]).await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    async fn init_repo(&self) -> MakerResult<()> {
        self.run_git(&self.repo_root, &["init"]).await?;
        Ok(())
    }

    async fn ensure_gitignore(&self, entries: &[String]) -> MakerResult<()> {
        let path = self.repo_root.join(".gitignore");
        let existing = tokio::fs::read_to_string(&path).await.unwrap_or_default();
        let mut lines: Vec<&str> = existing.lines().collect();
        let mut changed = false;
        for entry in entries {
            if !lines.contains(&entry.as_str()) {
                lines.push(entry.as_str());
                changed = true;
            }
        }
        if changed {
            tokio::fs::write(&path, lines.join("\n")).await?;
        }
        Ok(())
    }

    async fn create_checkpoint(&self, message: &str) -> MakerResult<String> {
        self.commit_all(message).await
    }

    async fn commit_all(&self, message: &str) -> MakerResult<String> {
        self.run_git(&self.repo_root, &["add", "-A"]).await?;
        self.run_git(&self.repo_root, &["commit", "-m", message, "--allow-empty"]).await?;
        let sha = self.run_git(&self.repo_root, &["rev-parse", "HEAD"]).await?;
        Ok(sha.trim().to_string())
    }

    async fn create_worktree(&self, task_id: &str, step_id: &str) -> MakerResult<WorktreeHandle> {
        let branch = worktree_branch(task_id, step_id);
        let path = self.worktree_base.join(step_id);

        if path.exists() {
            return Err(MakerError::worktree(step_id, "worktree already exists"));
        }

        tokio::fs::create_dir_all(&self.worktree_base).await?;
        self.run_git(
            &self.repo_root,
            &["worktree", "add", "-b", &branch, &path.to_string_lossy()],
        )
        .await
        .map_err(|e| MakerError::worktree(step_id, e.to_string()))?;

        Ok(WorktreeHandle { path, branch })
    }

    async fn cleanup_worktree(&self, handle: &WorktreeHandle) -> MakerResult<()> {
        let _ = self
            .run_git(
                &self.repo_root,
                &["worktree", "remove", "--force", &handle.path.to_string_lossy()],
            )
            .await;
        let _ = self.run_git(&self.repo_root, &["branch", "-D", &handle.branch]).await;
        Ok(())
    }

    async fn merge_squash(&self, handle: &WorktreeHandle) -> MakerResult<()> {
        if self
            .run_git(&self.repo_root, &["merge", "--squash", &handle.branch])
            .await
            .is_err()
        {
            return Err(MakerError::MergeConflict {
                branch: handle.branch.clone(),
            });
        }

        self.run_git(
            &self.repo_root,
            &["commit", "-m", &format!("squash merge {}", handle.branch)],
        )
        .await?;
        Ok(())
    }

    async fn get_history(&self, max_entries: usize) -> MakerResult<Vec<HistoryEntry>> {
        let format_arg = format!("-{max_entries}");
        let out = self
            .run_git(&self.repo_root, &["log", &format_arg, "--pretty=format:%H%x09%s"])
            .await?;
        Ok(out
            .lines()
            .filter_map(|line| {
                let (sha, message) = line.split_once('\t')?;
                Some(HistoryEntry {
                    sha: sha.to_string(),
                    message: message.to_string(),
                })
            })
            .collect())
    }

    async fn list_worktrees(&self) -> MakerResult<Vec<WorktreeHandle>> {
        let out = self
            .run_git(&self.repo_root, &["worktree", "list", "--porcelain"])
            .await?;

        let mut handles = Vec::new();
        let mut current_path: Option<PathBuf> = None;
        let mut current_branch: Option<String> = None;
        for line in out.lines() {
            if let Some(path) = line.strip_prefix("worktree ") {
                if let (Some(p), Some(b)) = (current_path.take(), current_branch.take()) {
                    handles.push(WorktreeHandle { path: p, branch: b });
                }
                current_path = Some(PathBuf::from(path));
            } else if let Some(branch) = line.strip_prefix("branch refs/heads/") {
                current_branch = Some(branch.to_string());
            }
        }
        if let (Some(p), Some(b)) = (current_path, current_branch) {
            handles.push(WorktreeHandle { path: p, branch: b });
        }
        Ok(handles)
    }

    async fn get_conflicts(&self) -> MakerResult<Vec<Conflict>> {
        let out = self
            .run_git(&self.repo_root, &["diff", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(out
            .lines()
            .enumerate()
            .map(|(i, path)| Conflict {
                id: format!("conflict-{i}"),
                path: path.to_string(),
                branch: String::new(),
            })
            .collect())
    }

    async fn resolve_conflict(&self, conflict_id: &str, resolution: &str) -> MakerResult<()> {
        self.run_git(&self.repo_root, &["checkout", resolution, "--", conflict_id])
            .await?;
        Ok(())
    }

    async fn sync_remote(&self) -> MakerResult<()> {
        self.run_git(&self.repo_root, &["push"]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn init_repo(dir: &Path) {
        for args in [
            vec!["init"],
            vec!["config", "user.email", "test@test.dev"],
            vec!["config", "user.name", "Test"],
        ] {
            Command::new("git").args(&args).current_dir(dir).output().await.unwrap();
        }
        tokio::fs::write(dir.join("README.md"), "hello").await.unwrap();
        Command::new("git").args(["add", "."]).current_dir(dir).output().await.unwrap();
        Command::new("git")
            .args(["commit", "-m", "init"])
            .current_dir(dir)
            .output()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_and_list_worktree_round_trips() {
        let repo = tempdir().unwrap();
        init_repo(repo.path()).await;
        let wt_base = tempdir().unwrap();

        let rcs = GitRevisionControl::new(repo.path(), wt_base.path());
        let handle = rcs.create_worktree("task-1", "step-1").await.unwrap();
        assert!(handle.path.exists());

        let worktrees = rcs.list_worktrees().await.unwrap();
        assert!(worktrees.iter().any(|w| w.branch == handle.branch));

        rcs.cleanup_worktree(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn commit_all_returns_sha() {
        let repo = tempdir().unwrap();
        init_repo(repo.path()).await;
        let rcs = GitRevisionControl::new(repo.path(), repo.path().join(".worktrees"));
        let sha = rcs.commit_all("checkpoint").await.unwrap();
        assert_eq!(sha.len(), 40);
    }
}
