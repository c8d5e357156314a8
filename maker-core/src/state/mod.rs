//! Data model and in-memory persistence for the execution engine (spec §3, §4.2).
//!
//! Sessions, steps, and config live behind a single [`StateStore`] for the
//! lifetime of the process; nothing here survives a restart (spec §1
//! Non-goals).

pub mod store;
pub mod types;

pub use store::StateStore;
pub use types::{
    Candidate, Conflict, EngineStateSnapshot, LlmProvider, MakerConfig, ProviderCredentials,
    Session, SessionId, Step, StepId, StepStatus, ToolCall, ToolDefinition, Trace, VoteArtifacts,
};
