//! Risk Assessor: a pure, deterministic risk-score function (spec §4.10).

use crate::agent_profile::AgentRole;

/// Scores a step's risk from its description and assigned role. No model
/// call, no I/O — unit-testable without an async runtime (SPEC_FULL §4).
///
/// Base score is 0.85 when the description mentions "implement" or "logic"
/// (case-insensitive), else 0.2. Security-role steps touching "auth"/"jwt"
/// get +0.3, capped at 0.99. The reason string is one of the three literal
/// values spec §4.10 names: `"Business Logic"`, `"Boilerplate/Scaffold"`, or
/// `"<agent> flagged security critical component"`.
pub fn assess_risk(description: &str, role: Option<AgentRole>) -> (f32, String) {
    let lower = description.to_lowercase();
    let mentions_logic = lower.contains("implement") || lower.contains("logic");

    let mut score = if mentions_logic { 0.85 } else { 0.2 };
    let mut reason = if mentions_logic { "Business Logic".to_string() } else { "Boilerplate/Scaffold".to_string() };

    if role == Some(AgentRole::Security) && (lower.contains("auth") || lower.contains("jwt")) {
        score = (score + 0.3).min(0.99);
        reason = format!("{} flagged security critical component", AgentRole::Security);
    }

    (score, reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_risk_description_scores_low() {
        let (score, reason) = assess_risk("add a README section", None);
        assert_eq!(score, 0.2);
        assert_eq!(reason, "Boilerplate/Scaffold");
    }

    #[test]
    fn implementation_description_scores_high() {
        let (score, reason) = assess_risk("Implement the retry logic", None);
        assert_eq!(score, 0.85);
        assert_eq!(reason, "Business Logic");
    }

    #[test]
    fn security_auth_step_is_boosted_and_capped() {
        let (score, reason) = assess_risk("Implement JWT auth validation", Some(AgentRole::Security));
        assert_eq!(score, 0.99);
        assert_eq!(reason, "security flagged security critical component");
    }

    #[test]
    fn security_boost_never_exceeds_cap() {
        let (score, _) = assess_risk("Implement auth logic with JWT tokens", Some(AgentRole::Security));
        assert!(score <= 0.99);
    }
}
