//! Decomposer: turns a prompt (plus architect context) into an ordered set
//! of steps, tolerant of the many shapes a model's JSON response can take
//! (spec §4.4).

use crate::error::{MakerError, MakerResult};
use crate::model::{strip_code_fence, ModelClient};
use crate::state::{Step, ToolCall};
use schemars::JsonSchema;
use serde::Deserialize;
use std::collections::HashSet;

/// The partial shape the model is asked to emit per step; only
/// `description` is required, everything else defaults.
#[derive(Debug, Deserialize, JsonSchema)]
struct PartialStep {
    id: Option<String>,
    description: String,
    #[serde(default)]
    file_target: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    tool_arguments: std::collections::BTreeMap<String, String>,
}

/// JSON schema for one decomposition step, embeddable in an architect
/// system prompt to constrain the model's output shape.
pub fn partial_step_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(PartialStep)).unwrap_or(serde_json::Value::Null)
}

/// Recovers a `Vec<PartialStep>` from a model response regardless of
/// whether it's a bare JSON array or an object wrapping the array under
/// one of `steps`/`tasks`/`decomposition`/`items` (spec §4.4 "tolerant of
/// common wrapper-object shapes").
fn recover_steps(raw: &str) -> MakerResult<Vec<PartialStep>> {
    let stripped = strip_code_fence(raw);
    let value: serde_json::Value = serde_json::from_str(stripped)
        .map_err(|e| MakerError::Decomposition { reason: e.to_string() })?;

    let array = if value.is_array() {
        value
    } else if let Some(obj) = value.as_object() {
        if let Some(wrapped) = ["steps", "tasks", "decomposition", "items"]
            .iter()
            .find_map(|key| obj.get(*key).cloned())
        {
            wrapped
        } else if obj.contains_key("id") && obj.contains_key("description") {
            // A single-step object (spec §4.4: "if it is a single object with
            // `id` and `description`, it is wrapped in a one-element array").
            serde_json::Value::Array(vec![value])
        } else {
            return Err(MakerError::Decomposition {
                reason: "response object has none of steps/tasks/decomposition/items".to_string(),
            });
        }
    } else {
        return Err(MakerError::Decomposition {
            reason: "response is neither a JSON array nor a wrapper object".to_string(),
        });
    };

    serde_json::from_value(array).map_err(|e| MakerError::Decomposition { reason: e.to_string() })
}

fn partial_to_step(index: usize, partial: PartialStep) -> Step {
    let id = partial.id.unwrap_or_else(|| format!("step-{index}"));
    let mut step = Step::new(id, partial.description, partial.file_target);
    step.dependencies = partial.dependencies.into_iter().collect();
    if let Some(tool_name) = partial.tool_name {
        step.tool_call = Some(ToolCall {
            tool_name,
            arguments: partial.tool_arguments,
        });
    }
    step
}

/// Decomposes a prompt into steps via the model, validating that every
/// declared dependency refers to a step actually present in the result
/// (spec §4.4 "rejects a decomposition with a dangling dependency").
pub async fn decompose(client: &dyn ModelClient, system_prompt: &str, user_prompt: &str) -> MakerResult<Vec<Step>> {
    let raw = client.generate(system_prompt, user_prompt).await?;
    let partials = recover_steps(&raw)?;

    if partials.is_empty() {
        return Err(MakerError::Decomposition {
            reason: "decomposition produced zero steps".to_string(),
        });
    }

    let steps: Vec<Step> = partials.into_iter().enumerate().map(|(i, p)| partial_to_step(i, p)).collect();
    let ids: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
    for step in &steps {
        for dep in &step.dependencies {
            if !ids.contains(dep.as_str()) {
                return Err(MakerError::Decomposition {
                    reason: format!("step {} depends on unknown step {dep}", step.id),
                });
            }
        }
    }

    Ok(steps)
}

/// Re-plans a single failing step into one or more replacement steps when
/// the Linter Loop's auto-fix budget is exhausted (spec §4.7, §9 "typed
/// Replan outcome").
///
/// Each returned step's id is rewritten to `{failing_step.id}-rescue-{rand}`
/// (spec §4.4); a rescue step that declared no dependencies of its own
/// inherits the failed step's dependencies, matching §8 S4.
pub async fn replan(
    client: &dyn ModelClient,
    system_prompt: &str,
    failing_step: &Step,
    failure_summary: &str,
) -> MakerResult<Vec<Step>> {
    let user_prompt = format!(
        "The following step failed and needs to be replaced with one or more corrected steps.\n\nOriginal step: {}\nFailure: {failure_summary}",
        failing_step.description
    );
    let mut steps = decompose(client, system_prompt, &user_prompt).await?;

    let id_map: std::collections::HashMap<String, String> = steps
        .iter()
        .map(|s| (s.id.clone(), format!("{}-rescue-{}", failing_step.id, rescue_suffix())))
        .collect();

    for step in steps.iter_mut() {
        let remapped_deps: HashSet<String> = step
            .dependencies
            .iter()
            .filter_map(|dep| id_map.get(dep).cloned())
            .collect();
        step.dependencies = if remapped_deps.is_empty() {
            failing_step.dependencies.clone()
        } else {
            remapped_deps
        };
        step.id = id_map[&step.id].clone();
    }

    Ok(steps)
}

/// A short random token for rescue-step id disambiguation (spec §4.4
/// `${failedStep.id}-rescue-${rand}`).
fn rescue_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_step_schema_describes_description_field() {
        let schema = partial_step_schema();
        assert!(schema["properties"]["description"].is_object());
    }

    #[test]
    fn recovers_bare_array() {
        let raw = r#"[{"description":"do a"},{"description":"do b"}]"#;
        let steps = recover_steps(raw).unwrap();
        assert_eq!(steps.len(), 2);
    }

    #[test]
    fn recovers_wrapped_object_under_steps_key() {
        let raw = r#"{"steps":[{"description":"do a"}]}"#;
        let steps = recover_steps(raw).unwrap();
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn recovers_fenced_wrapped_object_under_tasks_key() {
        let raw = "```json\n{\"tasks\":[{\"description\":\"do a\"}]}\n```";
        let steps = recover_steps(raw).unwrap();
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn wraps_single_object_with_id_and_description() {
        let raw = r#"{"id":"a","description":"do a"}"#;
        let steps = recover_steps(raw).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].id.as_deref(), Some("a"));
    }

    #[test]
    fn rejects_dangling_dependency() {
        let partials = vec![PartialStep {
            id: Some("a".into()),
            description: "do a".into(),
            file_target: String::new(),
            dependencies: vec!["ghost".into()],
            tool_name: None,
            tool_arguments: Default::default(),
        }];
        let steps: Vec<Step> = partials.into_iter().enumerate().map(|(i, p)| partial_to_step(i, p)).collect();
        let ids: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
        let dangling = steps[0].dependencies.iter().any(|d| !ids.contains(d.as_str()));
        assert!(dangling);
    }
}
