//! Linter Loop: runs the language provider's linter against a candidate
//! change, auto-fixing within a bounded budget, re-planning when that
//! budget is exhausted (spec §4.7).

use crate::error::{MakerError, MakerResult};
use crate::lint::{Diagnostic, LanguageProvider, Severity};
use crate::model::ModelClient;
use crate::retry::{bounded_retry, ValidationOutcome};
use std::path::Path;

const MAX_AUTOFIX_ATTEMPTS: u32 = 3;

/// The Linter Loop's outcome for one step. `Replan` is a typed variant
/// rather than a sentinel string or exception (§9 Design Notes).
pub enum LintOutcome {
    Clean,
    Replan { failure_summary: String },
}

/// Runs the loop for a step whose content has already been written to the
/// workspace. Any `SECURITY:`-prefixed diagnostic fails immediately
/// regardless of `auto_fix_linter` (spec §4.7 "security diagnostics are
/// never auto-fixed"). Each auto-fix attempt's generated content is handed
/// to `apply_fix` before the workspace is re-linted, so the budget tracks
/// genuine fix/re-lint cycles rather than a single ungated generate call.
pub async fn run<W, WFut>(
    provider: &dyn LanguageProvider,
    workspace_root: &Path,
    auto_fix_linter: bool,
    client: Option<&dyn ModelClient>,
    system_prompt: &str,
    regenerate_prompt_for: impl Fn(&[Diagnostic]) -> String,
    apply_fix: W,
) -> MakerResult<LintOutcome>
where
    W: Fn(String) -> WFut,
    WFut: std::future::Future<Output = MakerResult<()>>,
{
    let diagnostics = provider.lint(workspace_root).await?;

    if let Some(security) = diagnostics.iter().find(|d| d.severity == Severity::Security) {
        return Err(MakerError::Security {
            message: security.message.clone(),
        });
    }

    let errors: Vec<&Diagnostic> = diagnostics.iter().filter(|d| d.severity == Severity::Error).collect();
    if errors.is_empty() {
        return Ok(LintOutcome::Clean);
    }

    if !auto_fix_linter {
        return Ok(LintOutcome::Replan {
            failure_summary: summarize(&diagnostics),
        });
    }

    let Some(client) = client else {
        return Ok(LintOutcome::Replan {
            failure_summary: summarize(&diagnostics),
        });
    };

    let result = bounded_retry(
        MAX_AUTOFIX_ATTEMPTS,
        |feedback| {
            let prompt = match feedback {
                Some(fb) => fb.to_string(),
                None => regenerate_prompt_for(&diagnostics),
            };
            async move { client.generate(system_prompt, &prompt).await }
        },
        |fix| {
            let fix = fix.clone();
            async {
                apply_fix(fix).await?;
                let diagnostics = provider.lint(workspace_root).await?;
                if let Some(security) = diagnostics.iter().find(|d| d.severity == Severity::Security) {
                    return Err(MakerError::Security {
                        message: security.message.clone(),
                    });
                }
                let still_erroring = diagnostics.iter().any(|d| d.severity == Severity::Error);
                if still_erroring {
                    Ok(ValidationOutcome::Rejected {
                        feedback: summarize(&diagnostics),
                        artifacts: diagnostics,
                    })
                } else {
                    Ok(ValidationOutcome::Accepted)
                }
            }
        },
    )
    .await?;

    match result {
        Ok(_) => Ok(LintOutcome::Clean),
        Err((_, diagnostics)) => Ok(LintOutcome::Replan {
            failure_summary: summarize(&diagnostics),
        }),
    }
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .filter(|d| d.severity != Severity::Warning)
        .map(|d| format!("{}:{} {}", d.file, d.line, d.message))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarize_includes_errors_not_warnings() {
        let diagnostics = vec![
            Diagnostic::classify("a.rs", 1, "unused variable", false),
            Diagnostic::classify("a.rs", 2, "mismatched types", true),
        ];
        let summary = summarize(&diagnostics);
        assert!(summary.contains("mismatched types"));
        assert!(!summary.contains("unused variable"));
    }

    struct ScriptedProvider {
        diagnostics_per_call: std::sync::Mutex<Vec<Vec<Diagnostic>>>,
    }

    #[async_trait::async_trait]
    impl LanguageProvider for ScriptedProvider {
        fn supports(&self, _file_target: &str) -> bool {
            true
        }
        fn manifest_files(&self) -> Vec<&'static str> {
            vec![]
        }
        fn system_prompt(&self) -> &'static str {
            "scripted"
        }
        async fn lint(&self, _workspace_root: &Path) -> MakerResult<Vec<Diagnostic>> {
            let mut scripts = self.diagnostics_per_call.lock().unwrap();
            if scripts.is_empty() {
                Ok(vec![])
            } else {
                Ok(scripts.remove(0))
            }
        }
    }

    struct FakeClient;

    #[async_trait::async_trait]
    impl ModelClient for FakeClient {
        async fn generate(&self, _system: &str, _user: &str) -> MakerResult<String> {
            Ok("fixed content".to_string())
        }
        fn model_tag(&self) -> &str {
            "fake"
        }
    }

    #[tokio::test]
    async fn autofix_relints_after_applying_each_attempt_and_clears() {
        let provider = ScriptedProvider {
            diagnostics_per_call: std::sync::Mutex::new(vec![
                vec![Diagnostic::classify("a.rs", 1, "mismatched types", true)],
                vec![Diagnostic::classify("a.rs", 1, "mismatched types", true)],
                vec![],
            ]),
        };
        let client = FakeClient;
        let applied = std::sync::Mutex::new(Vec::new());

        let outcome = run(
            &provider,
            Path::new("/tmp/nonexistent"),
            true,
            Some(&client),
            "fix it",
            |diags| format!("fix: {diags:?}"),
            |content| {
                applied.lock().unwrap().push(content);
                async { Ok(()) }
            },
        )
        .await
        .unwrap();

        assert!(matches!(outcome, LintOutcome::Clean));
        assert_eq!(applied.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn autofix_replans_when_budget_exhausted_without_clearing() {
        let provider = ScriptedProvider {
            diagnostics_per_call: std::sync::Mutex::new(vec![
                vec![Diagnostic::classify("a.rs", 1, "mismatched types", true)],
                vec![Diagnostic::classify("a.rs", 1, "mismatched types", true)],
                vec![Diagnostic::classify("a.rs", 1, "mismatched types", true)],
                vec![Diagnostic::classify("a.rs", 1, "mismatched types", true)],
            ]),
        };
        let client = FakeClient;

        let outcome = run(
            &provider,
            Path::new("/tmp/nonexistent"),
            true,
            Some(&client),
            "fix it",
            |diags| format!("fix: {diags:?}"),
            |_content| async { Ok(()) },
        )
        .await
        .unwrap();

        assert!(matches!(outcome, LintOutcome::Replan { .. }));
    }
}
