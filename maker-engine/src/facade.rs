//! Engine Facade: the single entry point external callers use to drive a
//! Maker engine instance (spec §4.1).
//!
//! Grounded on the teacher's `SessionManager`-style lifecycle plus
//! `SwarmConfig`'s env-driven `Default`: one long-lived facade owns the
//! state store, the Notifier, and the collaborator set, and exposes a small
//! surface (`subscribe`, `updateConfig`, `startTask`, `executePlan`,
//! `switchSession`) rather than handing callers the internals directly.

use crate::executor::{DefaultStepExecutor, StepExecutor, StepOutcome};
use crate::scheduler::Scheduler;
use maker_core::error::{MakerError, MakerResult};
use maker_core::events::{EngineSnapshot, Notifier, SharedNotifier};
use maker_core::state::{EngineStateSnapshot, MakerConfig, Session, SessionId, StateStore, StepStatus};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// The engine's single entry point.
pub struct MakerEngine {
    store: Arc<StateStore>,
    notifier: SharedNotifier,
    executor: Arc<dyn StepExecutor>,
    scheduler: Scheduler,
    /// Cooperative shutdown signal for `execute_plan`, adapted from the
    /// teacher's per-run mode cancellation token.
    cancel: CancellationToken,
}

impl MakerEngine {
    pub fn new(config: MakerConfig, executor: Arc<dyn StepExecutor>) -> Self {
        let store = Arc::new(StateStore::new(config));
        let notifier = Notifier::new().shared();
        let scheduler = Scheduler::new(store.clone());
        Self {
            store,
            notifier,
            executor,
            scheduler,
            cancel: CancellationToken::new(),
        }
    }

    /// Builds the default engine with every default adapter wired
    /// together (spec §6.1), rooted at `workspace_root`.
    pub fn with_defaults(config: MakerConfig, workspace_root: impl Into<std::path::PathBuf>) -> MakerResult<Self> {
        let workspace_root = workspace_root.into();
        let mirror: Arc<dyn maker_core::fs_mirror::FilesystemMirror> =
            Arc::new(maker_core::fs_mirror::LocalFilesystemMirror::new(workspace_root.clone()));
        let rcs: Arc<dyn maker_core::rcs::RevisionControl> = Arc::new(maker_core::rcs::git::GitRevisionControl::new(
            workspace_root.clone(),
            workspace_root.join(".maker-worktrees"),
        ));
        let tool_runner: Arc<dyn maker_core::tools::ToolRunner> = Arc::new(maker_core::tools::ShellToolRunner);

        let judge_tag = config
            .agent_profiles
            .first()
            .map(|p| p.model_tag.clone())
            .unwrap_or_else(|| "reasoner".to_string());
        let judge: Arc<dyn maker_core::model::ModelClient> =
            maker_core::model::default_model_client(&config, &judge_tag)?.into();

        let mut candidate_clients = std::collections::HashMap::new();
        for profile in &config.agent_profiles {
            let client = maker_core::model::default_model_client(&config, &profile.model_tag)?;
            candidate_clients.insert(profile.id.clone(), client);
        }

        let store = Arc::new(StateStore::new(config));
        let notifier = Notifier::new().shared();
        let scheduler = Scheduler::with_rcs(store.clone(), rcs.clone());

        let executor: Arc<dyn StepExecutor> = Arc::new(DefaultStepExecutor {
            store: store.clone(),
            notifier: notifier.clone(),
            mirror,
            rcs,
            tool_runner,
            providers: maker_core::lint::default_providers(),
            judge,
            candidate_clients,
            workspace_root,
            replan_system_prompt:
                "You are the Decomposer producing a rescue plan for a step whose Linter Loop could not converge. \
                 Return 1-3 corrected steps as a JSON array."
                    .to_string(),
        });

        Ok(Self {
            store,
            notifier,
            executor,
            scheduler,
            cancel: CancellationToken::new(),
        })
    }

    /// Requests that a running `execute_plan` loop stop after its current
    /// tick. Already-dispatched steps still run to completion.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Subscribe to best-effort-latest engine snapshots (spec §4.2).
    pub fn subscribe(&self) -> watch::Receiver<Option<EngineSnapshot>> {
        self.notifier.subscribe()
    }

    /// Applies a partial config patch (spec §4.1 `updateConfig`).
    pub fn update_config(&self, patch: &serde_json::Value) -> MakerResult<MakerConfig> {
        let config = self.store.update_config(patch)?;
        self.publish_snapshot();
        Ok(config)
    }

    pub fn config(&self) -> MakerConfig {
        self.store.config()
    }

    /// Starts a new task: creates its session, decomposes it, and makes it
    /// the active session (spec §4.1 `startTask`).
    ///
    /// Enforces spec §5's parallel-session rule: a second session cannot
    /// start while another still has active workers, unless worktrees are
    /// enabled.
    pub async fn start_task(
        &self,
        model: &dyn maker_core::model::ModelClient,
        task_id: impl Into<String>,
        prompt: impl Into<String>,
        architect_system_prompt: &str,
    ) -> MakerResult<SessionId> {
        let config = self.store.config();
        if !config.use_git_worktrees && self.store.global_active_workers() > 0 {
            return Err(MakerError::ParallelNotAllowed);
        }

        let task_id = task_id.into();
        let prompt = prompt.into();
        let mut session = Session::new(task_id.clone(), prompt.clone());
        session.is_planning = true;
        self.store.insert_session(session);
        self.publish_snapshot();

        let steps = maker_core::decomposer::decompose(model, architect_system_prompt, &prompt).await?;
        maker_core::dag::validate_acyclic(&steps)?;

        self.store.with_session_mut(&task_id, |session| {
            session.decomposition = steps;
            session.is_planning = false;
        })?;

        self.store.set_active_session_id(Some(task_id.clone()));
        self.publish_snapshot();
        info!(task = %task_id, "task started");
        Ok(task_id)
    }

    /// Runs scheduler ticks until every step in the active session reaches
    /// a terminal status or no further progress can be made (spec §4.1
    /// `executePlan`).
    ///
    /// First flips the active session's plan out of `PLANNING` into
    /// `QUEUED` through the legal-transition gate — the plan→approve→QUEUED
    /// step the Decomposer itself deliberately leaves undone (spec §4.9).
    pub async fn execute_plan(&self) -> MakerResult<()> {
        if let Some(active_id) = self.store.active_session_id() {
            self.store.with_session_mut(&active_id, |session| -> MakerResult<()> {
                for step in session.decomposition.iter_mut() {
                    if step.status != StepStatus::Planning {
                        continue;
                    }
                    if !crate::executor::is_legal_transition(step.status, StepStatus::Queued) {
                        return Err(MakerError::InvalidStateTransition {
                            from: step.status.to_string(),
                            to: StepStatus::Queued.to_string(),
                        });
                    }
                    step.set_status(StepStatus::Queued);
                }
                Ok(())
            })??;
            self.publish_snapshot();
        }

        loop {
            if self.cancel.is_cancelled() {
                info!("execute_plan cancelled");
                break;
            }

            let report = self.scheduler.tick(self.executor.clone()).await?;
            self.publish_snapshot();

            let all_terminal = self
                .store
                .all_sessions()
                .iter()
                .all(|s| s.decomposition.iter().all(|step| step.status.is_terminal()));

            if all_terminal || report.dispatched.is_empty() {
                break;
            }
        }
        Ok(())
    }

    /// Switches the active session pointer (spec §4.1 `switchSession`).
    pub fn switch_session(&self, session_id: &str) -> MakerResult<()> {
        self.store.get_session(session_id)?;
        self.store.set_active_session_id(Some(session_id.to_string()));
        self.publish_snapshot();
        Ok(())
    }

    fn publish_snapshot(&self) {
        let state = EngineStateSnapshot {
            sessions: self.store.all_sessions(),
            active_session_id: self.store.active_session_id(),
            global_active_workers: self.store.global_active_workers(),
        };
        self.notifier.publish(EngineSnapshot::new(state, self.store.config()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NoopExecutor;

    #[async_trait]
    impl StepExecutor for NoopExecutor {
        async fn execute(&self, _session_id: &str, _step_id: &str) -> MakerResult<StepOutcome> {
            Ok(StepOutcome::Passed)
        }
    }

    #[tokio::test]
    async fn second_session_without_worktrees_is_rejected_once_active() {
        let engine = MakerEngine::new(MakerConfig::default(), Arc::new(NoopExecutor));
        let mut session = maker_core::state::Session::new("busy", "p");
        session.decomposition.push({
            let mut s = maker_core::state::Step::new("s1", "implement x", "x.rs");
            s.set_status(maker_core::state::StepStatus::Executing);
            s
        });
        engine.store.insert_session(session);

        struct DummyModel;
        #[async_trait]
        impl maker_core::model::ModelClient for DummyModel {
            async fn generate(&self, _s: &str, _u: &str) -> MakerResult<String> {
                Ok("[]".to_string())
            }
            fn model_tag(&self) -> &str {
                "dummy"
            }
        }

        let err = engine
            .start_task(&DummyModel, "t2", "do a new thing", "architect prompt")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ERR_PARALLEL_NOT_ALLOWED");
    }

    #[test]
    fn switch_session_rejects_unknown_id() {
        let engine = MakerEngine::new(MakerConfig::default(), Arc::new(NoopExecutor));
        let err = engine.switch_session("missing").unwrap_err();
        assert_eq!(err.code(), "ERR_UNKNOWN_SESSION");
    }
}
