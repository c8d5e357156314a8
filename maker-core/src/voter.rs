//! Voter: generates candidate implementations from the agent roster, then
//! has a judge select a winner (spec §4.5).

use crate::agent_profile::AgentProfile;
use crate::error::{MakerError, MakerResult};
use crate::model::ModelClient;
use crate::state::{Candidate, VoteArtifacts};
use std::collections::HashMap;

/// Selects the voter roster for a step: the lead agent plus up to 2 other
/// profiles, ordered by roster position and excluding the lead (spec §4.5
/// "Picks leadAgent plus up to 2 other profiles"). Falls back to the first
/// 3 profiles in roster order when no lead is assigned or known.
pub fn select_voters<'a>(roster: &'a [AgentProfile], lead_agent_id: Option<&str>) -> Vec<&'a AgentProfile> {
    let lead = lead_agent_id.and_then(|id| roster.iter().find(|p| p.id == id));
    let mut voters: Vec<&AgentProfile> = Vec::new();
    if let Some(lead) = lead {
        voters.push(lead);
    }
    for profile in roster {
        if voters.len() >= 3 {
            break;
        }
        if lead.is_some_and(|l| l.id == profile.id) {
            continue;
        }
        voters.push(profile);
    }
    voters
}

/// Runs a voting round for a step: every candidate agent generates its own
/// attempt, then a judge model picks the winner by index (spec §4.5
/// "performVoting").
///
/// `candidates` must already be the selected voter roster (lead plus up to
/// 2 others — see [`select_voters`]), not the full agent roster.
/// `candidate_clients` maps `AgentProfile.id` to the `ModelClient` bound to
/// that profile's `model_tag`; `judge` is a separate, typically
/// higher-capability client used only for selection.
pub async fn perform_voting(
    candidates: &[&AgentProfile],
    candidate_clients: &HashMap<String, Box<dyn ModelClient>>,
    judge: &dyn ModelClient,
    system_prompt: &str,
    user_prompt: &str,
) -> MakerResult<VoteArtifacts> {
    if candidates.is_empty() {
        return Err(MakerError::validation("voting requires at least one candidate agent"));
    }

    let mut generated = Vec::new();
    for profile in candidates {
        let client = candidate_clients
            .get(&profile.id)
            .ok_or_else(|| MakerError::Model(format!("no model client bound for agent {}", profile.id)))?;
        let content = client.generate(system_prompt, user_prompt).await?;
        generated.push(Candidate {
            agent_id: profile.id.clone(),
            content,
        });
    }

    // A single candidate wins by default; no point asking a judge to pick
    // among one option.
    if generated.len() == 1 {
        let winner_agent_id = generated[0].agent_id.clone();
        return Ok(VoteArtifacts {
            candidates: generated,
            winner_agent_id: Some(winner_agent_id),
            vote_count: 1,
            is_consensus: true,
            judge_reasoning: None,
        });
    }

    let judge_prompt = build_judge_prompt(&generated);
    let voter_count = generated.len() as u32;
    let judge_response = judge.generate(JUDGE_SYSTEM_PROMPT, &judge_prompt).await;
    // On judge failure, return the first candidate with isConsensus = false
    // (spec §4.5 "On judge failure, returns the first candidate").
    let Ok(judge_response) = judge_response else {
        return Ok(VoteArtifacts {
            winner_agent_id: Some(generated[0].agent_id.clone()),
            candidates: generated,
            vote_count: voter_count,
            is_consensus: false,
            judge_reasoning: None,
        });
    };
    let Ok((winner_index, reasoning)) = parse_judge_response(&judge_response, generated.len()) else {
        return Ok(VoteArtifacts {
            winner_agent_id: Some(generated[0].agent_id.clone()),
            candidates: generated,
            vote_count: voter_count,
            is_consensus: false,
            judge_reasoning: None,
        });
    };

    Ok(VoteArtifacts {
        winner_agent_id: Some(generated[winner_index].agent_id.clone()),
        candidates: generated,
        vote_count: voter_count,
        is_consensus: true,
        judge_reasoning: Some(reasoning),
    })
}

const JUDGE_SYSTEM_PROMPT: &str =
    "You are judging candidate implementations. Respond with JSON: {\"winner_index\": <int>, \"reasoning\": \"<text>\"}.";

fn build_judge_prompt(candidates: &[Candidate]) -> String {
    let mut prompt = String::from("Candidates:\n");
    for (i, candidate) in candidates.iter().enumerate() {
        prompt.push_str(&format!("\n--- Candidate {i} (agent {}) ---\n{}\n", candidate.agent_id, candidate.content));
    }
    prompt
}

fn parse_judge_response(raw: &str, candidate_count: usize) -> MakerResult<(usize, String)> {
    let stripped = crate::model::strip_code_fence(raw);
    let value: serde_json::Value =
        serde_json::from_str(stripped).map_err(|e| MakerError::Model(format!("judge response not JSON: {e}")))?;

    let index = value["winner_index"]
        .as_u64()
        .ok_or_else(|| MakerError::Model("judge response missing winner_index".to_string()))? as usize;

    if index >= candidate_count {
        return Err(MakerError::Model(format!(
            "judge selected out-of-range winner_index {index} for {candidate_count} candidates"
        )));
    }

    let reasoning = value["reasoning"].as_str().unwrap_or_default().to_string();
    Ok((index, reasoning))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_judge_response() {
        let raw = r#"{"winner_index": 1, "reasoning": "cleaner error handling"}"#;
        let (index, reasoning) = parse_judge_response(raw, 2).unwrap();
        assert_eq!(index, 1);
        assert_eq!(reasoning, "cleaner error handling");
    }

    #[test]
    fn rejects_out_of_range_winner_index() {
        let raw = r#"{"winner_index": 5, "reasoning": "x"}"#;
        assert!(parse_judge_response(raw, 2).is_err());
    }

    #[test]
    fn rejects_non_json_judge_response() {
        assert!(parse_judge_response("not json at all", 2).is_err());
    }

    #[test]
    fn select_voters_caps_at_lead_plus_two() {
        let roster = crate::agent_profile::AgentProfile::default_roster();
        let voters = select_voters(&roster, Some("security-1"));
        assert_eq!(voters.len(), 3);
        assert_eq!(voters[0].id, "security-1");
        assert!(voters[1..].iter().all(|p| p.id != "security-1"));
    }

    #[test]
    fn select_voters_falls_back_to_roster_order_without_lead() {
        let roster = crate::agent_profile::AgentProfile::default_roster();
        let voters = select_voters(&roster, None);
        assert_eq!(voters.len(), 3);
        assert_eq!(voters[0].id, "architect-1");
    }
}
