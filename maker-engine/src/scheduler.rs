//! Scheduler: walks every session, dispatches every dependency-satisfied
//! step, respects the global parallelism cap (spec §4.11).
//!
//! Generalized from the teacher's orchestrator loop, which drove exactly
//! one issue through `StateMachine` at a time; this walks every session's
//! decomposition each tick and dispatches whichever `QUEUED` steps are
//! both dependency-satisfied and within the remaining parallelism budget.

use crate::executor::{StepExecutor, StepOutcome};
use maker_core::error::MakerResult;
use maker_core::rcs::RevisionControl;
use maker_core::state::{SessionId, StateStore, StepId, StepStatus};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// One scheduling tick's outcome, useful for tests and the demo binary's
/// progress reporting.
#[derive(Debug, Default)]
pub struct TickReport {
    pub dispatched: Vec<(SessionId, StepId)>,
}

/// Runs the Scheduler's tick logic against a shared state store.
pub struct Scheduler {
    store: Arc<StateStore>,
    /// RCS handle used only for the adaptive final aggregate checkpoint
    /// (spec §4.11 step 1, §8 S1) — per-step checkpoints live in the
    /// executor. `None` when the scheduler is driven in a test harness that
    /// has no revision-control collaborator to exercise.
    rcs: Option<Arc<dyn RevisionControl>>,
    /// Round-robin counter for `agentProfiles[index % len]` agent
    /// assignment (spec §4.11 step 4).
    dispatch_counter: AtomicU32,
}

impl Scheduler {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self {
            store,
            rcs: None,
            dispatch_counter: AtomicU32::new(0),
        }
    }

    pub fn with_rcs(store: Arc<StateStore>, rcs: Arc<dyn RevisionControl>) -> Self {
        Self {
            store,
            rcs: Some(rcs),
            dispatch_counter: AtomicU32::new(0),
        }
    }

    /// One scheduling pass: finds every runnable step across every session,
    /// dispatches as many as the parallelism budget allows (preferring the
    /// session with the oldest pending work), and runs them concurrently so
    /// `globalActiveWorkers` genuinely reflects steps in flight together
    /// rather than one at a time (spec §8 S5).
    ///
    /// Each dispatched step runs on its own task; the tick is a barrier over
    /// that batch, same shape as the teacher's cancellable mode runners but
    /// joined instead of detached.
    pub async fn tick(&self, executor: Arc<dyn StepExecutor>) -> MakerResult<TickReport> {
        let config = self.store.config();
        let mut report = TickReport::default();

        let mut sessions = self.store.all_sessions();
        sessions.sort_by_key(|s| s.created_at);

        let mut budget = config
            .max_parallelism
            .saturating_sub(self.store.global_active_workers() as u32);

        let mut joins: JoinSet<(SessionId, StepId, MakerResult<StepOutcome>)> = JoinSet::new();

        for session in sessions {
            if budget == 0 {
                break;
            }
            if session.is_planning {
                continue;
            }

            let completed = session.completed_ids();
            let runnable: Vec<StepId> = session
                .decomposition
                .iter()
                .filter(|s| s.status == StepStatus::Queued)
                .filter(|s| s.dependencies.iter().all(|d| completed.contains(d)))
                .map(|s| s.id.clone())
                .collect();

            for step_id in runnable {
                if budget == 0 {
                    break;
                }

                // Step 4 (spec §4.11): round-robin agent assignment.
                if !config.agent_profiles.is_empty() {
                    let index = self.dispatch_counter.fetch_add(1, Ordering::Relaxed) as usize;
                    let agent_id = config.agent_profiles[index % config.agent_profiles.len()].id.clone();
                    self.store.with_session_mut(&session.task_id, |s| {
                        if let Some(step) = s.step_mut(&step_id) {
                            step.assigned_agent_id = Some(agent_id);
                        }
                    })?;
                }

                debug!(session = %session.task_id, step = %step_id, "dispatching step");
                let executor = executor.clone();
                let session_id = session.task_id.clone();
                let spawned_step_id = step_id.clone();
                joins.spawn(async move {
                    let result = executor.execute(&session_id, &spawned_step_id).await;
                    (session_id, spawned_step_id, result)
                });
                report.dispatched.push((session.task_id.clone(), step_id));
                budget = budget.saturating_sub(1);
            }
        }

        while let Some(joined) = joins.join_next().await {
            let (session_id, step_id, result) = joined.map_err(|e| maker_core::error::MakerError::validation(format!("step task panicked: {e}")))?;
            match result {
                Ok(StepOutcome::Passed) => {}
                Ok(StepOutcome::Replan(rescues)) => {
                    // Step 5 (spec §4.11): splice the rescue set in place of
                    // the failing step. Not an error — `errorCount` is left
                    // untouched (spec §7 "the re-plan sentinel is not an
                    // error in the ordinary sense").
                    info!(session = %session_id, step = %step_id, rescues = rescues.len(), "splicing rescue plan");
                    self.store.with_session_mut(&session_id, |s| s.splice_step(&step_id, rescues))?;
                }
                Err(err) => {
                    // Spec §7: any unrecovered error becomes a terminal
                    // FAILED step, with the message appended to its logs;
                    // siblings continue where dependency-satisfied.
                    warn!(session = %session_id, step = %step_id, error = %err, "step execution failed");
                    let message = err.to_string();
                    self.store.with_session_mut(&session_id, |s| {
                        if let Some(step) = s.step_mut(&step_id) {
                            if !step.status.is_terminal() {
                                step.log(message);
                                step.set_status(StepStatus::Failed);
                            }
                        }
                    })?;
                }
            }
        }

        // Step 1 (spec §4.11): once a session has no active workers and
        // every step is terminal, emit one adaptive aggregate checkpoint
        // when it's small, not using worktrees, and at least one step
        // passed. Checked after joining so the very tick that lands a
        // session's last step also closes it out, matching the facade's
        // `execute_plan` loop (which stops as soon as a tick reports
        // everything terminal).
        for session in self.store.all_sessions() {
            if session.final_checkpoint_emitted || session.active_workers() > 0 {
                continue;
            }
            if session.decomposition.is_empty() || !session.decomposition.iter().all(|s| s.status.is_terminal()) {
                continue;
            }

            if let Some(rcs) = &self.rcs {
                if !config.use_git_worktrees
                    && session.total_steps() < 3
                    && session.decomposition.iter().any(|s| s.status == StepStatus::Passed)
                {
                    rcs.create_checkpoint(&format!("MAKER: Completed Task: {}", session.original_prompt))
                        .await?;
                }
            }
            self.store.with_session_mut(&session.task_id, |s| s.final_checkpoint_emitted = true)?;
        }

        info!(dispatched = report.dispatched.len(), "scheduler tick complete");
        Ok(report)
    }
}
