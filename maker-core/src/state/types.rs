//! Core data model for the execution engine (spec §3).

use crate::agent_profile::AgentProfile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Identifier for a step, unique within its session.
pub type StepId = String;

/// Identifier for a session, unique within the engine.
pub type SessionId = String;

/// A step's lifecycle status (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Planning,
    Queued,
    Idle,
    Analyzing,
    Thinking,
    Voting,
    SkippedVote,
    Executing,
    Checkpointing,
    Merging,
    Passed,
    Failed,
}

impl StepStatus {
    /// `PASSED`/`FAILED` are the only terminal statuses.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::Failed)
    }

    /// Statuses counted towards `Session.active_workers` (everything that
    /// isn't queued, planning, or terminal).
    pub fn is_active_worker(self) -> bool {
        matches!(
            self,
            Self::Analyzing
                | Self::Thinking
                | Self::Voting
                | Self::SkippedVote
                | Self::Executing
                | Self::Checkpointing
                | Self::Merging
                | Self::Idle
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Planning => "planning",
            Self::Queued => "queued",
            Self::Idle => "idle",
            Self::Analyzing => "analyzing",
            Self::Thinking => "thinking",
            Self::Voting => "voting",
            Self::SkippedVote => "skipped_vote",
            Self::Executing => "executing",
            Self::Checkpointing => "checkpointing",
            Self::Merging => "merging",
            Self::Passed => "passed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A tool invocation attached to a step. Its presence switches the step's
/// kind from *coding* to *tool* (enforced at Decomposer parse time, spec §9
/// "Dynamic dispatch on step kind").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub arguments: std::collections::BTreeMap<String, String>,
}

/// A single candidate produced during a voting round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub agent_id: String,
    pub content: String,
}

/// The outcome of a voting round for a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteArtifacts {
    pub candidates: Vec<Candidate>,
    pub winner_agent_id: Option<String>,
    pub vote_count: u32,
    pub is_consensus: bool,
    pub judge_reasoning: Option<String>,
}

impl Default for VoteArtifacts {
    fn default() -> Self {
        Self {
            candidates: Vec::new(),
            winner_agent_id: None,
            vote_count: 0,
            is_consensus: false,
            judge_reasoning: None,
        }
    }
}

/// The flight recorder for a step's last generation attempt (spec §7
/// "trace captures the exact final prompt and raw response").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trace {
    pub prompt: Option<String>,
    pub response: Option<String>,
    pub red_flags: Vec<String>,
    pub attempt_started_at: Option<DateTime<Utc>>,
    pub attempt_finished_at: Option<DateTime<Utc>>,
}

/// One atomic unit of work (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub description: String,
    /// Relative path, or empty for tool-only steps.
    pub file_target: String,
    pub status: StepStatus,
    pub dependencies: HashSet<StepId>,
    pub risk_score: f32,
    pub risk_reason: String,
    pub role: Option<String>,
    pub role_description: Option<String>,
    pub tool_call: Option<ToolCall>,
    pub candidates: VoteArtifacts,
    pub trace: Trace,
    pub logs: Vec<String>,
    pub attempts: u32,
    pub votes: u32,
    pub git_branch: Option<String>,
    pub worktree_path: Option<String>,
    pub assigned_agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Step {
    pub fn new(id: impl Into<String>, description: impl Into<String>, file_target: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            description: description.into(),
            file_target: file_target.into(),
            status: StepStatus::Planning,
            dependencies: HashSet::new(),
            risk_score: 0.0,
            risk_reason: String::new(),
            role: None,
            role_description: None,
            tool_call: None,
            candidates: VoteArtifacts::default(),
            trace: Trace::default(),
            logs: Vec::new(),
            attempts: 0,
            votes: 0,
            git_branch: None,
            worktree_path: None,
            assigned_agent_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this is a tool step (presence of `tool_call`) vs a coding step.
    pub fn is_tool_step(&self) -> bool {
        self.tool_call.is_some()
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.logs.push(message.into());
        self.updated_at = Utc::now();
    }

    pub fn set_status(&mut self, status: StepStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// A conflict entry exposed by the RCS adapter for UI resolution
/// (spec §6 `getConflicts`/`resolveConflict`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub path: String,
    pub branch: String,
}

/// One user-submitted task with its own DAG and counters (spec §3 Session).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub task_id: SessionId,
    pub original_prompt: String,
    pub decomposition: Vec<Step>,
    pub is_planning: bool,
    pub conflicts: Vec<Conflict>,
    pub created_at: DateTime<Utc>,
    /// Set once the Scheduler has emitted the adaptive final aggregate
    /// checkpoint for this session (spec §4.11 step 1, §8 S1), so a later
    /// tick over an already-terminal session never double-commits.
    #[serde(default)]
    pub final_checkpoint_emitted: bool,
}

impl Session {
    pub fn new(task_id: impl Into<String>, original_prompt: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            original_prompt: original_prompt.into(),
            decomposition: Vec::new(),
            is_planning: false,
            conflicts: Vec::new(),
            created_at: Utc::now(),
            final_checkpoint_emitted: false,
        }
    }

    pub fn total_steps(&self) -> usize {
        self.decomposition.len()
    }

    pub fn completed_steps(&self) -> usize {
        self.decomposition
            .iter()
            .filter(|s| s.status == StepStatus::Passed)
            .count()
    }

    pub fn error_count(&self) -> usize {
        self.decomposition
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count()
    }

    pub fn active_workers(&self) -> usize {
        self.decomposition
            .iter()
            .filter(|s| s.status.is_active_worker())
            .count()
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.decomposition.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.decomposition.iter_mut().find(|s| s.id == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.decomposition.iter().position(|s| s.id == id)
    }

    /// The set of ids whose steps are `PASSED` — the dependency closure a
    /// `QUEUED` step checks before it becomes runnable (spec §4.11).
    pub fn completed_ids(&self) -> HashSet<StepId> {
        self.decomposition
            .iter()
            .filter(|s| s.status == StepStatus::Passed)
            .map(|s| s.id.clone())
            .collect()
    }

    /// Replaces the step `failed_id` in place with a rescue set (spec §4.4
    /// `replan`, §4.11 step 5, §8 S4). Every rescue step with no explicit
    /// dependencies of its own inherits the failed step's dependencies;
    /// every rescue step enters `QUEUED`. A no-op if `failed_id` isn't
    /// present (it may have already been spliced by a concurrent tick).
    pub fn splice_step(&mut self, failed_id: &str, mut rescues: Vec<Step>) {
        let Some(idx) = self.index_of(failed_id) else {
            return;
        };
        let inherited_deps = self.decomposition[idx].dependencies.clone();
        for step in rescues.iter_mut() {
            if step.dependencies.is_empty() {
                step.dependencies = inherited_deps.clone();
            }
            step.set_status(StepStatus::Queued);
        }
        self.decomposition.splice(idx..=idx, rescues);
    }
}

/// A registered shell-level tool (spec §3 ToolDefinition).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Template with `{{arg}}` placeholders.
    pub command_template: String,
    pub requires_approval: bool,
    pub is_system: bool,
}

/// The supported LLM provider selection (spec §3 MakerConfig).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Gemini,
    OpenAi,
}

/// Opaque credential storage keyed by `MAKER_API_KEY`. `Debug` never
/// reveals the secret value (spec §4.1 "Persists credentials opaquely").
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct ProviderCredentials(pub Option<String>);

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Some(_) => write!(f, "ProviderCredentials(<redacted>)"),
            None => write!(f, "ProviderCredentials(None)"),
        }
    }
}

/// Recognized configuration options (spec §3 MakerConfig).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MakerConfig {
    pub llm_provider: LlmProvider,
    pub provider_credentials: ProviderCredentials,
    pub risk_threshold: f32,
    pub max_agents: u32,
    pub auto_fix_linter: bool,
    pub use_git_worktrees: bool,
    pub max_parallelism: u32,
    pub agent_profiles: Vec<AgentProfile>,
    pub tools: Vec<ToolDefinition>,
}

impl Default for MakerConfig {
    fn default() -> Self {
        Self {
            llm_provider: LlmProvider::Gemini,
            provider_credentials: ProviderCredentials::default(),
            risk_threshold: 0.7,
            max_agents: 3,
            auto_fix_linter: true,
            use_git_worktrees: false,
            max_parallelism: 2,
            agent_profiles: AgentProfile::default_roster(),
            tools: Vec::new(),
        }
    }
}

impl MakerConfig {
    /// Merge a partial JSON patch into this config, the way `updateConfig`
    /// does (spec §4.1). Unknown keys are ignored; recognized keys replace
    /// the corresponding field wholesale (no deep-merge of vectors).
    pub fn merge_patch(&mut self, patch: &serde_json::Value) -> crate::error::MakerResult<()> {
        let obj = patch
            .as_object()
            .ok_or_else(|| crate::error::MakerError::config("config patch must be a JSON object"))?;

        if let Some(v) = obj.get("risk_threshold").and_then(|v| v.as_f64()) {
            self.risk_threshold = v as f32;
        }
        if let Some(v) = obj.get("max_agents").and_then(|v| v.as_u64()) {
            self.max_agents = v as u32;
        }
        if let Some(v) = obj.get("auto_fix_linter").and_then(|v| v.as_bool()) {
            self.auto_fix_linter = v;
        }
        if let Some(v) = obj.get("use_git_worktrees").and_then(|v| v.as_bool()) {
            self.use_git_worktrees = v;
        }
        if let Some(v) = obj.get("max_parallelism").and_then(|v| v.as_u64()) {
            self.max_parallelism = v as u32;
        }
        if let Some(v) = obj.get("provider_credentials").and_then(|v| v.as_str()) {
            self.provider_credentials = ProviderCredentials(Some(v.to_string()));
        }
        if let Some(v) = obj.get("llm_provider").and_then(|v| v.as_str()) {
            self.llm_provider = match v {
                "openai" => LlmProvider::OpenAi,
                _ => LlmProvider::Gemini,
            };
        }

        if self.max_parallelism < 1 {
            return Err(crate::error::MakerError::config("max_parallelism must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.risk_threshold) {
            return Err(crate::error::MakerError::config("risk_threshold must be within [0, 1]"));
        }
        Ok(())
    }
}

/// The engine-wide state (spec §3 Engine State).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStateSnapshot {
    pub sessions: Vec<Session>,
    pub active_session_id: Option<SessionId>,
    pub global_active_workers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_counters_match_step_statuses() {
        let mut session = Session::new("t1", "prompt");
        let mut a = Step::new("a", "do a", "src/a.rs");
        a.set_status(StepStatus::Passed);
        let mut b = Step::new("b", "do b", "src/b.rs");
        b.set_status(StepStatus::Executing);
        session.decomposition.push(a);
        session.decomposition.push(b);

        assert_eq!(session.total_steps(), 2);
        assert_eq!(session.completed_steps(), 1);
        assert_eq!(session.active_workers(), 1);
    }

    #[test]
    fn merge_patch_rejects_invalid_parallelism() {
        let mut config = MakerConfig::default();
        let patch = serde_json::json!({ "max_parallelism": 0 });
        assert!(config.merge_patch(&patch).is_err());
    }

    #[test]
    fn merge_patch_updates_recognized_fields() {
        let mut config = MakerConfig::default();
        let patch = serde_json::json!({ "max_parallelism": 5, "auto_fix_linter": false });
        config.merge_patch(&patch).unwrap();
        assert_eq!(config.max_parallelism, 5);
        assert!(!config.auto_fix_linter);
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = ProviderCredentials(Some("sk-secret".to_string()));
        let printed = format!("{creds:?}");
        assert!(!printed.contains("sk-secret"));
    }

    #[test]
    fn splice_step_replaces_in_place_and_inherits_dependencies() {
        let mut session = Session::new("t1", "prompt");
        let mut a = Step::new("a", "do a", "src/a.rs");
        a.set_status(StepStatus::Passed);
        let mut x = Step::new("x", "do x", "src/x.rs");
        x.set_status(StepStatus::Failed);
        x.dependencies.insert("a".to_string());
        let z = Step::new("z", "do z", "src/z.rs");
        session.decomposition.push(a);
        session.decomposition.push(x);
        session.decomposition.push(z);

        let rescue_one = Step::new("x-rescue-1", "rescue one", "src/x.rs");
        let rescue_two = Step::new("x-rescue-2", "rescue two", "src/x.rs");
        session.splice_step("x", vec![rescue_one, rescue_two]);

        let ids: Vec<&str> = session.decomposition.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "x-rescue-1", "x-rescue-2", "z"]);

        for rescue_id in ["x-rescue-1", "x-rescue-2"] {
            let rescue = session.step(rescue_id).unwrap();
            assert_eq!(rescue.status, StepStatus::Queued);
            assert!(rescue.dependencies.contains("a"));
        }
    }
}
