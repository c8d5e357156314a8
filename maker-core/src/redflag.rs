//! Red-Flag Guard: static checks on generated content before it's committed,
//! with a bounded feedback/retry loop (spec §4.6).

use crate::error::MakerResult;
use crate::model::ModelClient;
use crate::retry::{bounded_retry, ValidationOutcome};

const MAX_ATTEMPTS: u32 = 3;
const MAX_CONTENT_LEN: usize = 50_000;

/// A project's dominant language, as surfaced by the Context Assembler and
/// consumed by the Red-Flag Guard's cross-ecosystem checks (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryLanguage {
    Rust,
    Python,
    TypeScript,
    Other,
}

impl PrimaryLanguage {
    /// Infers the project's primary language from a step's file target
    /// extension, the way `getArchitectContext` surfaces it for the Red-Flag
    /// Guard's cross-ecosystem checks (spec §4.3, §4.6).
    pub fn for_file_target(file_target: &str) -> Self {
        if file_target.ends_with(".rs") {
            Self::Rust
        } else if file_target.ends_with(".py") {
            Self::Python
        } else if file_target.ends_with(".ts") || file_target.ends_with(".tsx") {
            Self::TypeScript
        } else {
            Self::Other
        }
    }
}

/// Scans generated content for red flags, returning the human-readable
/// reasons for every one that matched (spec §4.6's three literal checks):
/// a Python project whose generated content reaches for `npm install`, a
/// Rust project whose generated content reaches for `pip install`, and any
/// content over 50,000 characters.
pub fn scan(primary_language: PrimaryLanguage, content: &str) -> Vec<String> {
    let mut flags = Vec::new();
    if primary_language == PrimaryLanguage::Python && content.contains("npm install") {
        flags.push("Python project content contains 'npm install'".to_string());
    }
    if primary_language == PrimaryLanguage::Rust && content.contains("pip install") {
        flags.push("Rust project content contains 'pip install'".to_string());
    }
    if content.len() > MAX_CONTENT_LEN {
        flags.push("output too large".to_string());
    }
    flags
}

/// Formats the feedback string the Decomposer/Voter regenerate against
/// after a Red-Flag Guard rejection (spec §4.6 "CRITICAL SYSTEM WARNING -
/// RED FLAGS DETECTED: …").
fn format_feedback(flags: &[String]) -> String {
    format!("CRITICAL SYSTEM WARNING - RED FLAGS DETECTED: {}", flags.join("; "))
}

/// Runs the bounded generate→scan→feedback→retry loop for one step. On
/// exhaustion, returns the last generated content together with the red
/// flags that still fired so the caller can surface
/// `MakerError::RedFlagPersisted` (spec §4.6 "persists after the retry
/// budget, escalate").
pub async fn guard(
    client: &dyn ModelClient,
    system_prompt: &str,
    base_user_prompt: &str,
    primary_language: PrimaryLanguage,
) -> MakerResult<Result<String, (String, Vec<String>)>> {
    bounded_retry(
        MAX_ATTEMPTS,
        |feedback| {
            let prompt = match feedback {
                Some(fb) => format!("{base_user_prompt}\n\n{fb}"),
                None => base_user_prompt.to_string(),
            };
            async move { client.generate(system_prompt, &prompt).await }
        },
        |content| {
            let flags = scan(primary_language, content);
            async move {
                if flags.is_empty() {
                    Ok(ValidationOutcome::Accepted)
                } else {
                    Ok(ValidationOutcome::Rejected {
                        feedback: format_feedback(&flags),
                        artifacts: flags,
                    })
                }
            }
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_flags_npm_install_in_python_project() {
        let flags = scan(PrimaryLanguage::Python, "run `npm install` to set up tooling");
        assert_eq!(flags.len(), 1);
    }

    #[test]
    fn scan_flags_pip_install_in_rust_project() {
        let flags = scan(PrimaryLanguage::Rust, "first, pip install the helper script");
        assert_eq!(flags.len(), 1);
    }

    #[test]
    fn scan_ignores_pip_install_in_python_project() {
        let flags = scan(PrimaryLanguage::Python, "pip install -r requirements.txt");
        assert!(flags.is_empty());
    }

    #[test]
    fn scan_flags_oversized_output() {
        let content = "a".repeat(MAX_CONTENT_LEN + 1);
        let flags = scan(PrimaryLanguage::Other, &content);
        assert_eq!(flags, vec!["output too large".to_string()]);
    }

    #[test]
    fn scan_is_empty_for_clean_content() {
        let flags = scan(PrimaryLanguage::Rust, "fn add(a: i32, b: i32) -> i32 { a + b }");
        assert!(flags.is_empty());
    }
}
