//! Agent profiles — the roster of personas the Scheduler assigns to steps.
//!
//! Profiles are immutable within a task execution; they are only edited via
//! `updateConfig` between tasks (spec §4.1).

use serde::{Deserialize, Serialize};

/// The role an agent plays when assigned to a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Designs structure and interfaces; wired into the risk gate for
    /// security-sensitive scaffolding decisions.
    Architect,
    /// Writes the bulk of feature code.
    Developer,
    /// Focuses on edge cases, test coverage, regressions.
    Qa,
    /// Flags security-critical components; raises risk scores for
    /// auth/JWT-shaped work (spec §4.10).
    Security,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Architect => write!(f, "architect"),
            Self::Developer => write!(f, "developer"),
            Self::Qa => write!(f, "qa"),
            Self::Security => write!(f, "security"),
        }
    }
}

/// One agent persona available to the Scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub display_name: String,
    pub role: AgentRole,
    /// How much risk this agent can absorb before the risk gate forces a
    /// voting round. Clamped to `[0.0, 1.0]`.
    pub risk_tolerance: f32,
    /// Which model tier/name this profile is bound to (opaque to the core;
    /// interpreted by the `ModelClient` adapter).
    pub model_tag: String,
}

impl AgentProfile {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        role: AgentRole,
        risk_tolerance: f32,
        model_tag: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            role,
            risk_tolerance: risk_tolerance.clamp(0.0, 1.0),
            model_tag: model_tag.into(),
        }
    }

    /// The default four-role roster (Architect, Developer, QA, Security),
    /// seeded when `MakerConfig.agent_profiles` is empty so the Voter's
    /// roster selection always has candidates (SPEC_FULL §3.1).
    pub fn default_roster() -> Vec<AgentProfile> {
        vec![
            AgentProfile::new("architect-1", "Architect", AgentRole::Architect, 0.4, "planner"),
            AgentProfile::new("developer-1", "Developer", AgentRole::Developer, 0.6, "coder"),
            AgentProfile::new("qa-1", "QA", AgentRole::Qa, 0.5, "coder"),
            AgentProfile::new("security-1", "Security", AgentRole::Security, 0.2, "reasoner"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_tolerance_is_clamped() {
        let profile = AgentProfile::new("a", "A", AgentRole::Developer, 1.5, "m");
        assert_eq!(profile.risk_tolerance, 1.0);
        let profile = AgentProfile::new("b", "B", AgentRole::Developer, -0.5, "m");
        assert_eq!(profile.risk_tolerance, 0.0);
    }

    #[test]
    fn default_roster_has_all_four_roles() {
        let roster = AgentProfile::default_roster();
        assert_eq!(roster.len(), 4);
        assert!(roster.iter().any(|p| p.role == AgentRole::Security));
    }
}
