//! Step Executor: the per-step state machine and its scoped worktree
//! acquisition/release (spec §4.8, §4.9).
//!
//! The legal-transition table and transition log are adapted from the
//! teacher's orchestrator state machine, generalized from a single
//! terminal loop over one issue to the step lifecycle in spec §4.9.

use chrono::Utc;
use maker_core::fs_mirror::FilesystemMirror;
use maker_core::state::StepStatus;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// Legal transitions for a step's status (spec §4.9 state diagram).
pub(crate) fn is_legal_transition(from: StepStatus, to: StepStatus) -> bool {
    use StepStatus::*;

    if to == Failed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Planning, Queued)
            // Worktree path (spec §4.9): PLANNING -> QUEUED -> IDLE ->
            // ANALYZING, while direct mode skips IDLE entirely.
            | (Queued, Idle)
            | (Idle, Analyzing)
            | (Queued, Analyzing)
            | (Analyzing, Thinking)
            | (Analyzing, Voting)
            | (Analyzing, SkippedVote)
            | (Thinking, Voting)
            | (Thinking, SkippedVote)
            | (Voting, Executing)
            | (SkippedVote, Executing)
            | (Executing, Checkpointing)
            | (Checkpointing, Merging)
            | (Checkpointing, Queued)
            | (Merging, Passed)
            // Tool steps (spec §4.8 "direct mode") skip voting and
            // checkpointing entirely: Analyzing -> SkippedVote -> Executing -> Passed.
            | (Executing, Passed)
    )
}

/// A single recorded step-status transition, kept on the step's trace for
/// the flight recorder (spec §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: StepStatus,
    pub to: StepStatus,
    pub elapsed_ms: u64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: StepStatus,
    pub to: StepStatus,
}

impl std::fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "illegal step transition: {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Drives one step's status forward, recording every transition.
pub struct StepStateMachine {
    current: StepStatus,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StepStateMachine {
    pub fn new() -> Self {
        Self {
            current: StepStatus::Planning,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> StepStatus {
        self.current
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn advance(&mut self, to: StepStatus, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition { from: self.current, to });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };
        debug!(from = %self.current, to = %to, "step transition");
        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(StepStatus::Failed, Some(reason))
    }
}

impl Default for StepStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// A scoped worktree guard: acquired on entering `Executing`, released on
/// every exit path including early failure (spec §9 "scoped worktree
/// acquisition/release").
pub struct WorktreeGuard<'a> {
    rcs: &'a dyn maker_core::rcs::RevisionControl,
    handle: Option<maker_core::rcs::WorktreeHandle>,
}

impl<'a> WorktreeGuard<'a> {
    pub async fn acquire(
        rcs: &'a dyn maker_core::rcs::RevisionControl,
        task_id: &str,
        step_id: &str,
    ) -> maker_core::error::MakerResult<Self> {
        let handle = rcs.create_worktree(task_id, step_id).await?;
        Ok(Self {
            rcs,
            handle: Some(handle),
        })
    }

    pub fn path(&self) -> Option<&std::path::Path> {
        self.handle.as_ref().map(|h| h.path.as_path())
    }

    /// Consumes the guard, merging the worktree branch back before release.
    /// Release happens regardless of whether the merge succeeds.
    pub async fn merge_and_release(mut self) -> maker_core::error::MakerResult<()> {
        let handle = self.handle.take().expect("worktree guard already released");
        let merge_result = self.rcs.merge_squash(&handle).await;
        let cleanup_result = self.rcs.cleanup_worktree(&handle).await;
        merge_result?;
        cleanup_result
    }

    /// Consumes the guard without merging — tool steps acquire a worktree
    /// for isolation (spec §4.8 "same as coding") but never checkpoint or
    /// merge one, since they have no generated-file change to land.
    pub async fn release_without_merge(mut self) -> maker_core::error::MakerResult<()> {
        let handle = self.handle.take().expect("worktree guard already released");
        self.rcs.cleanup_worktree(&handle).await
    }
}

impl Drop for WorktreeGuard<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!(path = %handle.path.display(), emitted_at = %Utc::now(), "worktree guard dropped without explicit release");
        }
    }
}

/// Read-only tools never treat a step's `fileTarget` as an output sink
/// (spec §4.8 tool step, step 5).
const READ_ONLY_TOOLS: &[&str] = &["read_file", "ls", "grep", "make_directory"];

/// A step's terminal outcome, the typed replacement for the source's
/// exception-message-encoded replan sentinel (spec §9 "Re-plan
/// propagation"). `Passed`/`Failed` are reflected in the store directly by
/// the executor; `Replan` carries the rescue set back to the Scheduler,
/// which splices it into the session's decomposition (spec §4.11 step 5).
pub enum StepOutcome {
    Passed,
    Replan(Vec<maker_core::state::Step>),
}

/// What the Scheduler dispatches against — one step, end to end (spec
/// §4.8). Kept as a trait so the Scheduler's tests can inject a recording
/// double instead of wiring up every external collaborator.
#[async_trait::async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, session_id: &str, step_id: &str) -> maker_core::error::MakerResult<StepOutcome>;
}

/// The default `StepExecutor`: drives a step through Analyzing →
/// (Thinking|Voting|SkippedVote) → Executing → Checkpointing → Merging →
/// Passed, calling out to the core collaborators at each phase (spec §4.8
/// steps 1-7).
pub struct DefaultStepExecutor {
    pub store: std::sync::Arc<maker_core::state::StateStore>,
    pub notifier: maker_core::events::SharedNotifier,
    pub mirror: std::sync::Arc<dyn maker_core::fs_mirror::FilesystemMirror>,
    pub rcs: std::sync::Arc<dyn maker_core::rcs::RevisionControl>,
    pub tool_runner: std::sync::Arc<dyn maker_core::tools::ToolRunner>,
    pub providers: Vec<Box<dyn maker_core::lint::LanguageProvider>>,
    pub judge: std::sync::Arc<dyn maker_core::model::ModelClient>,
    pub candidate_clients: std::collections::HashMap<String, Box<dyn maker_core::model::ModelClient>>,
    pub workspace_root: std::path::PathBuf,
    /// System prompt handed to the Decomposer when the Linter Loop
    /// exhausts its auto-fix budget and escalates to a rescue re-plan
    /// (spec §4.7, §4.4 `replan`).
    pub replan_system_prompt: String,
}

#[async_trait::async_trait]
impl StepExecutor for DefaultStepExecutor {
    async fn execute(&self, session_id: &str, step_id: &str) -> maker_core::error::MakerResult<StepOutcome> {
        use maker_core::error::MakerError;

        self.store.with_session_mut(session_id, |session| {
            if let Some(step) = session.step_mut(step_id) {
                step.set_status(StepStatus::Analyzing);
            }
        })?;
        self.emit_snapshot();

        let (description, file_target, role, assigned_agent_id, tool_call) = {
            let session = self.store.get_session(session_id)?;
            let step = session
                .step(step_id)
                .ok_or_else(|| MakerError::UnknownStep { step_id: step_id.to_string() })?;
            (
                step.description.clone(),
                step.file_target.clone(),
                step.role.clone(),
                step.assigned_agent_id.clone(),
                step.tool_call.clone(),
            )
        };
        let config = self.store.config();

        // Tool steps (spec §4.8 "direct mode"): no risk assessment, no
        // voting, no red-flag guard, no linting. Worktree acquisition still
        // happens (same isolation as a coding step) but there is no
        // checkpoint/merge — the worktree is released unmerged once the
        // tool has run.
        if let Some(tool_call) = tool_call {
            self.store.with_session_mut(session_id, |session| {
                if let Some(step) = session.step_mut(step_id) {
                    step.set_status(StepStatus::SkippedVote);
                    step.set_status(StepStatus::Executing);
                }
            })?;
            self.emit_snapshot();

            let worktree = if config.use_git_worktrees {
                Some(WorktreeGuard::acquire(self.rcs.as_ref(), session_id, step_id).await?)
            } else {
                None
            };
            let cwd = worktree
                .as_ref()
                .and_then(|w| w.path())
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| self.workspace_root.display().to_string());

            let output = maker_core::tools::dispatch_tool_call(
                &tool_call,
                &config.tools,
                self.mirror.as_ref(),
                self.tool_runner.as_ref(),
                &cwd,
            )
            .await?;

            let is_read_only = READ_ONLY_TOOLS.contains(&tool_call.tool_name.as_str());
            if !is_read_only && !file_target.is_empty() {
                if let Some(guard) = worktree.as_ref() {
                    if let Some(path) = guard.path() {
                        let worktree_mirror = maker_core::fs_mirror::LocalFilesystemMirror::new(path);
                        worktree_mirror.write(&file_target, &output).await?;
                    }
                } else {
                    self.mirror.write(&file_target, &output).await?;
                }
            }

            if let Some(guard) = worktree {
                guard.release_without_merge().await?;
            }

            self.store.with_session_mut(session_id, |session| {
                if let Some(step) = session.step_mut(step_id) {
                    step.log(output);
                    step.set_status(StepStatus::Passed);
                }
            })?;
            self.emit_snapshot();
            return Ok(StepOutcome::Passed);
        }

        let role_enum = role.as_deref().and_then(|r| match r {
            "architect" => Some(maker_core::agent_profile::AgentRole::Architect),
            "developer" => Some(maker_core::agent_profile::AgentRole::Developer),
            "qa" => Some(maker_core::agent_profile::AgentRole::Qa),
            "security" => Some(maker_core::agent_profile::AgentRole::Security),
            _ => None,
        });
        let (risk_score, risk_reason) = maker_core::risk::assess_risk(&description, role_enum);

        self.store.with_session_mut(session_id, |session| {
            if let Some(step) = session.step_mut(step_id) {
                step.set_status(StepStatus::Thinking);
                step.risk_score = risk_score;
                step.risk_reason = risk_reason.clone();
            }
        })?;
        self.emit_snapshot();

        // Risk gate (spec §4.10, §9 glossary): `riskScore > min(riskThreshold,
        // agentRiskTolerance + 0.3)`. A step dispatched with no assigned
        // agent (e.g. direct unit tests of the executor) falls back to the
        // threshold alone.
        let agent_tolerance = assigned_agent_id
            .as_deref()
            .and_then(|id| config.agent_profiles.iter().find(|p| p.id == id))
            .map(|p| p.risk_tolerance);
        let gate = match agent_tolerance {
            Some(tolerance) => config.risk_threshold.min(tolerance + 0.3),
            None => config.risk_threshold,
        };
        let needs_vote = risk_score > gate;
        self.store.with_session_mut(session_id, |session| {
            if let Some(step) = session.step_mut(step_id) {
                step.set_status(if needs_vote { StepStatus::Voting } else { StepStatus::SkippedVote });
            }
        })?;
        self.emit_snapshot();

        // Step 3 (spec §4.8, §4.3 `getTaskContext`): scope context to this
        // step's file target plus whatever its dependencies produced,
        // folded into the generation prompt below.
        let (dependency_ids, all_steps) = {
            let session = self.store.get_session(session_id)?;
            let dependency_ids: Vec<maker_core::state::StepId> = session
                .step(step_id)
                .map(|s| s.dependencies.iter().cloned().collect())
                .unwrap_or_default();
            (dependency_ids, session.decomposition)
        };
        let assembler = maker_core::context::ContextAssembler::new(self.mirror.as_ref());
        let task_context = assembler
            .get_task_context(&file_target, &dependency_ids, &all_steps, &self.providers)
            .await
            .unwrap_or_default();
        let user_prompt = if task_context.trim().is_empty() {
            description.clone()
        } else {
            format!("{description}\n\n{task_context}")
        };

        let primary_language = maker_core::redflag::PrimaryLanguage::for_file_target(&file_target);

        let content = if needs_vote && !config.agent_profiles.is_empty() {
            let voters = maker_core::voter::select_voters(&config.agent_profiles, assigned_agent_id.as_deref());
            let artifacts = maker_core::voter::perform_voting(
                &voters,
                &self.candidate_clients,
                self.judge.as_ref(),
                "Generate the implementation for this step.",
                &user_prompt,
            )
            .await?;
            let winner = artifacts
                .winner_agent_id
                .as_ref()
                .and_then(|id| artifacts.candidates.iter().find(|c| &c.agent_id == id))
                .map(|c| c.content.clone())
                .unwrap_or_default();
            self.store.with_session_mut(session_id, |session| {
                if let Some(step) = session.step_mut(step_id) {
                    step.candidates = artifacts;
                }
            })?;

            // The Red-Flag Guard still applies to a voted winner (spec §4.8
            // step 5 runs unconditionally after step 4's branch); a winner
            // that still trips a flag has no further voting round to retry,
            // so it fails the step directly rather than silently landing.
            let flags = maker_core::redflag::scan(primary_language, &winner);
            if !flags.is_empty() {
                self.store.with_session_mut(session_id, |session| {
                    if let Some(step) = session.step_mut(step_id) {
                        step.trace.response = Some(winner.clone());
                        step.trace.red_flags = flags.clone();
                    }
                })?;
                return Err(MakerError::RedFlagPersisted {
                    attempts: flags.len() as u32,
                    flags,
                });
            }
            winner
        } else {
            let guarded = maker_core::redflag::guard(
                self.judge.as_ref(),
                "Generate the implementation for this step.",
                &user_prompt,
                primary_language,
            )
            .await?;
            match guarded {
                Ok(content) => content,
                Err((content, flags)) => {
                    self.store.with_session_mut(session_id, |session| {
                        if let Some(step) = session.step_mut(step_id) {
                            step.trace.response = Some(content);
                            step.trace.red_flags = flags.clone();
                        }
                    })?;
                    return Err(MakerError::RedFlagPersisted {
                        attempts: flags.len() as u32,
                        flags,
                    });
                }
            }
        };

        self.store.with_session_mut(session_id, |session| {
            if let Some(step) = session.step_mut(step_id) {
                step.set_status(StepStatus::Executing);
                step.trace.response = Some(content.clone());
            }
        })?;
        self.emit_snapshot();

        // Worktree acquisition happens before the write so the target path
        // resolves inside the worktree when one is in play (spec §4.8 step
        // 6: "inside worktree if present, else under project root").
        let worktree = if config.use_git_worktrees {
            Some(WorktreeGuard::acquire(self.rcs.as_ref(), session_id, step_id).await?)
        } else {
            None
        };
        let lint_root: std::path::PathBuf = worktree
            .as_ref()
            .and_then(|w| w.path())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| self.workspace_root.clone());

        if !file_target.is_empty() {
            if let Some(guard) = worktree.as_ref() {
                if let Some(path) = guard.path() {
                    let worktree_mirror = maker_core::fs_mirror::LocalFilesystemMirror::new(path);
                    worktree_mirror.write(&file_target, &content).await?;
                }
            } else {
                self.mirror.write(&file_target, &content).await?;
            }
        }

        if let Some(provider) = maker_core::lint::provider_for(&self.providers, &file_target) {
            let fix_file_target = file_target.clone();
            let fix_root = lint_root.clone();
            let outcome = maker_core::linter_loop::run(
                provider,
                &lint_root,
                config.auto_fix_linter,
                Some(self.judge.as_ref()),
                provider.system_prompt(),
                |diagnostics| format!("Fix these lint errors: {diagnostics:?}"),
                |fixed_content| {
                    let file_target = fix_file_target.clone();
                    let root = fix_root.clone();
                    async move {
                        if file_target.is_empty() {
                            return Ok(());
                        }
                        let mirror = maker_core::fs_mirror::LocalFilesystemMirror::new(&root);
                        mirror.write(&file_target, &fixed_content).await
                    }
                },
            )
            .await?;

            if let maker_core::linter_loop::LintOutcome::Replan { failure_summary } = outcome {
                // The candidate content never lands on main: release the
                // worktree unmerged and escalate to the Decomposer for a
                // rescue set (spec §4.7 "escalates to the Decomposer for
                // rescue", §4.11 step 5).
                if let Some(guard) = worktree {
                    let _ = guard.release_without_merge().await;
                }
                self.store.with_session_mut(session_id, |session| {
                    if let Some(step) = session.step_mut(step_id) {
                        step.log(format!("linter requested replan: {failure_summary}"));
                    }
                })?;

                let failing_step = self.store.get_session(session_id)?.step(step_id).cloned().ok_or_else(|| {
                    MakerError::UnknownStep {
                        step_id: step_id.to_string(),
                    }
                })?;
                let rescue = maker_core::decomposer::replan(
                    self.judge.as_ref(),
                    &self.replan_system_prompt,
                    &failing_step,
                    &failure_summary,
                )
                .await;
                return match rescue {
                    Ok(steps) if !steps.is_empty() => Ok(StepOutcome::Replan(steps)),
                    _ => Err(MakerError::LintUnrecoverable {
                        step_id: step_id.to_string(),
                    }),
                };
            }
        }

        self.store.with_session_mut(session_id, |session| {
            if let Some(step) = session.step_mut(step_id) {
                step.set_status(StepStatus::Checkpointing);
            }
        })?;

        // Adaptive checkpointing (spec §4.8 step 8, glossary "Adaptive
        // checkpointing"): worktree mode always commits-then-merges per
        // step; direct mode only commits per step once the plan has grown
        // to 3+ steps, otherwise the Scheduler emits one aggregate
        // checkpoint when the whole session finishes (spec §8 S1).
        let total_steps = self.store.get_session(session_id)?.total_steps();
        if config.use_git_worktrees || total_steps >= 3 {
            self.rcs.create_checkpoint(&format!("step {step_id}: {description}")).await?;
        }

        self.store.with_session_mut(session_id, |session| {
            if let Some(step) = session.step_mut(step_id) {
                step.set_status(StepStatus::Merging);
            }
        })?;
        if let Some(guard) = worktree {
            guard.merge_and_release().await?;
        }

        self.store.with_session_mut(session_id, |session| {
            if let Some(step) = session.step_mut(step_id) {
                step.set_status(StepStatus::Passed);
            }
        })?;
        self.emit_snapshot();

        Ok(StepOutcome::Passed)
    }
}

impl DefaultStepExecutor {
    fn emit_snapshot(&self) {
        let state = maker_core::state::EngineStateSnapshot {
            sessions: self.store.all_sessions(),
            active_session_id: self.store.active_session_id(),
            global_active_workers: self.store.global_active_workers(),
        };
        self.notifier
            .publish(maker_core::events::EngineSnapshot::new(state, self.store.config()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_legal() {
        let mut sm = StepStateMachine::new();
        sm.advance(StepStatus::Queued, None).unwrap();
        sm.advance(StepStatus::Analyzing, None).unwrap();
        sm.advance(StepStatus::Voting, None).unwrap();
        sm.advance(StepStatus::Executing, None).unwrap();
        sm.advance(StepStatus::Checkpointing, None).unwrap();
        sm.advance(StepStatus::Merging, None).unwrap();
        sm.advance(StepStatus::Passed, None).unwrap();
        assert_eq!(sm.current(), StepStatus::Passed);
        assert_eq!(sm.transitions().len(), 7);
    }

    #[test]
    fn worktree_path_routes_through_idle() {
        let mut sm = StepStateMachine::new();
        sm.advance(StepStatus::Queued, None).unwrap();
        sm.advance(StepStatus::Idle, None).unwrap();
        sm.advance(StepStatus::Analyzing, None).unwrap();
        sm.advance(StepStatus::SkippedVote, None).unwrap();
        sm.advance(StepStatus::Executing, None).unwrap();
        assert_eq!(sm.current(), StepStatus::Executing);
    }

    #[test]
    fn skipped_vote_path_reaches_executing() {
        let mut sm = StepStateMachine::new();
        sm.advance(StepStatus::Queued, None).unwrap();
        sm.advance(StepStatus::Analyzing, None).unwrap();
        sm.advance(StepStatus::SkippedVote, None).unwrap();
        sm.advance(StepStatus::Executing, None).unwrap();
        assert_eq!(sm.current(), StepStatus::Executing);
    }

    #[test]
    fn any_non_terminal_state_can_fail() {
        let mut sm = StepStateMachine::new();
        sm.advance(StepStatus::Queued, None).unwrap();
        sm.fail("decomposition replan exhausted").unwrap();
        assert_eq!(sm.current(), StepStatus::Failed);
    }

    #[test]
    fn rejects_skipping_queued() {
        let mut sm = StepStateMachine::new();
        let err = sm.advance(StepStatus::Executing, None).unwrap_err();
        assert_eq!(err.from, StepStatus::Planning);
    }

    #[test]
    fn cannot_leave_terminal_failed_state() {
        let mut sm = StepStateMachine::new();
        sm.fail("early abort").unwrap();
        assert!(sm.advance(StepStatus::Queued, None).is_err());
    }
}
