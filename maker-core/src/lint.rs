//! `LanguageProvider`: per-language manifest/lint collaborator (spec §6).

use crate::error::{MakerError, MakerResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Severity levels a provider's linter can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
    /// `SECURITY:`-prefixed diagnostics, treated as immediately fatal by
    /// the Linter Loop regardless of `auto_fix_linter` (spec §4.7).
    Security,
}

/// One linter finding, normalized across every language provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub message: String,
    pub severity: Severity,
}

impl Diagnostic {
    /// Promotes any diagnostic whose message starts with `SECURITY:` to
    /// [`Severity::Security`], the convention the Linter Loop keys off of
    /// (spec §4.7).
    pub fn classify(file: impl Into<String>, line: u32, message: impl Into<String>, is_error: bool) -> Self {
        let message = message.into();
        let severity = if message.starts_with("SECURITY:") {
            Severity::Security
        } else if is_error {
            Severity::Error
        } else {
            Severity::Warning
        };
        Self {
            file: file.into(),
            line,
            message,
            severity,
        }
    }
}

/// A language's manifest shape, system prompt fragment, and linter.
#[async_trait]
pub trait LanguageProvider: Send + Sync {
    fn supports(&self, file_target: &str) -> bool;
    fn manifest_files(&self) -> Vec<&'static str>;
    fn system_prompt(&self) -> &'static str;
    async fn lint(&self, workspace_root: &Path) -> MakerResult<Vec<Diagnostic>>;
}

pub struct RustProvider;

#[async_trait]
impl LanguageProvider for RustProvider {
    fn supports(&self, file_target: &str) -> bool {
        file_target.ends_with(".rs")
    }

    fn manifest_files(&self) -> Vec<&'static str> {
        vec!["Cargo.toml"]
    }

    fn system_prompt(&self) -> &'static str {
        "You are writing idiomatic Rust. Prefer explicit error handling over panics."
    }

    async fn lint(&self, workspace_root: &Path) -> MakerResult<Vec<Diagnostic>> {
        run_json_lines_lint(
            "cargo",
            &["clippy", "--message-format=json"],
            workspace_root,
            parse_clippy_json,
        )
        .await
    }
}

pub struct PythonProvider;

#[async_trait]
impl LanguageProvider for PythonProvider {
    fn supports(&self, file_target: &str) -> bool {
        file_target.ends_with(".py")
    }

    fn manifest_files(&self) -> Vec<&'static str> {
        vec!["pyproject.toml", "requirements.txt"]
    }

    fn system_prompt(&self) -> &'static str {
        "You are writing idiomatic Python 3. Prefer type hints and explicit exceptions."
    }

    async fn lint(&self, workspace_root: &Path) -> MakerResult<Vec<Diagnostic>> {
        run_json_lint("ruff", &["check", "--output-format=json", "."], workspace_root, parse_ruff_json).await
    }
}

pub struct TypeScriptProvider;

#[async_trait]
impl LanguageProvider for TypeScriptProvider {
    fn supports(&self, file_target: &str) -> bool {
        file_target.ends_with(".ts") || file_target.ends_with(".tsx")
    }

    fn manifest_files(&self) -> Vec<&'static str> {
        vec!["package.json", "tsconfig.json"]
    }

    fn system_prompt(&self) -> &'static str {
        "You are writing idiomatic TypeScript. Prefer explicit types over `any`."
    }

    async fn lint(&self, workspace_root: &Path) -> MakerResult<Vec<Diagnostic>> {
        run_json_lint("eslint", &["--format=json", "."], workspace_root, parse_eslint_json).await
    }
}

async fn run_json_lint(
    program: &str,
    args: &[&str],
    workspace_root: &Path,
    parse: impl Fn(&str) -> MakerResult<Vec<Diagnostic>>,
) -> MakerResult<Vec<Diagnostic>> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .current_dir(workspace_root)
        .output()
        .await
        .map_err(|e| MakerError::Tool(format!("{program} failed to launch: {e}")))?;
    parse(&String::from_utf8_lossy(&output.stdout))
}

/// Clippy emits one JSON object per line rather than a single array.
async fn run_json_lines_lint(
    program: &str,
    args: &[&str],
    workspace_root: &Path,
    parse: impl Fn(&str) -> MakerResult<Vec<Diagnostic>>,
) -> MakerResult<Vec<Diagnostic>> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .current_dir(workspace_root)
        .output()
        .await
        .map_err(|e| MakerError::Tool(format!("{program} failed to launch: {e}")))?;
    parse(&String::from_utf8_lossy(&output.stdout))
}

fn parse_clippy_json(stdout: &str) -> MakerResult<Vec<Diagnostic>> {
    let mut diagnostics = Vec::new();
    for line in stdout.lines() {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        let Some(message) = value.get("message") else {
            continue;
        };
        let level = message.get("level").and_then(|v| v.as_str()).unwrap_or("warning");
        let text = message.get("message").and_then(|v| v.as_str()).unwrap_or_default();
        let span = message["spans"][0].clone();
        let file = span.get("file_name").and_then(|v| v.as_str()).unwrap_or_default();
        let line_no = span.get("line_start").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        diagnostics.push(Diagnostic::classify(file, line_no, text, level == "error"));
    }
    Ok(diagnostics)
}

fn parse_ruff_json(stdout: &str) -> MakerResult<Vec<Diagnostic>> {
    let parsed: serde_json::Value = serde_json::from_str(stdout).unwrap_or(serde_json::Value::Array(vec![]));
    let mut diagnostics = Vec::new();
    if let Some(items) = parsed.as_array() {
        for item in items {
            let file = item.get("filename").and_then(|v| v.as_str()).unwrap_or_default();
            let line = item["location"]["row"].as_u64().unwrap_or(0) as u32;
            let message = item.get("message").and_then(|v| v.as_str()).unwrap_or_default();
            diagnostics.push(Diagnostic::classify(file, line, message, true));
        }
    }
    Ok(diagnostics)
}

fn parse_eslint_json(stdout: &str) -> MakerResult<Vec<Diagnostic>> {
    let parsed: serde_json::Value = serde_json::from_str(stdout).unwrap_or(serde_json::Value::Array(vec![]));
    let mut diagnostics = Vec::new();
    if let Some(files) = parsed.as_array() {
        for file_result in files {
            let file = file_result.get("filePath").and_then(|v| v.as_str()).unwrap_or_default();
            if let Some(messages) = file_result.get("messages").and_then(|v| v.as_array()) {
                for m in messages {
                    let line = m.get("line").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                    let text = m.get("message").and_then(|v| v.as_str()).unwrap_or_default();
                    let severity = m.get("severity").and_then(|v| v.as_u64()).unwrap_or(1);
                    diagnostics.push(Diagnostic::classify(file, line, text, severity >= 2));
                }
            }
        }
    }
    Ok(diagnostics)
}

/// The default registry, one provider per supported language (spec §6.1).
pub fn default_providers() -> Vec<Box<dyn LanguageProvider>> {
    vec![Box::new(RustProvider), Box::new(PythonProvider), Box::new(TypeScriptProvider)]
}

pub fn provider_for<'a>(providers: &'a [Box<dyn LanguageProvider>], file_target: &str) -> Option<&'a dyn LanguageProvider> {
    providers.iter().find(|p| p.supports(file_target)).map(|p| p.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_prefixed_message_is_classified_fatal() {
        let diag = Diagnostic::classify("a.rs", 1, "SECURITY: possible SQL injection", false);
        assert_eq!(diag.severity, Severity::Security);
    }

    #[test]
    fn registry_routes_by_extension() {
        let providers = default_providers();
        let provider = provider_for(&providers, "src/main.rs").unwrap();
        assert!(provider.manifest_files().contains(&"Cargo.toml"));
    }

    #[test]
    fn ruff_json_parses_location() {
        let stdout = r#"[{"filename":"a.py","location":{"row":3},"message":"unused import"}]"#;
        let diags = parse_ruff_json(stdout).unwrap();
        assert_eq!(diags[0].line, 3);
    }
}
