//! Context Assembler: builds the prompt context handed to the model at
//! decomposition time and at each step's Analyzing phase (spec §4.3).

use crate::error::MakerResult;
use crate::fs_mirror::FilesystemMirror;
use crate::lint::LanguageProvider;
use crate::state::{Step, StepId, ToolDefinition};
use std::path::Path;

const DEFAULT_EXCLUDES: &[&str] = &["target", "node_modules", ".git", "dist"];

/// A file the Architect Context scouted as relevant to the prompt, with its
/// content already read (spec §4.3 "scoutedFiles").
#[derive(Debug, Clone)]
pub struct ScoutedFile {
    pub path: String,
    pub content: String,
}

/// Everything the Decomposer needs to ground an initial plan in the
/// workspace's actual shape (spec §4.3 `getArchitectContext`).
#[derive(Debug, Clone, Default)]
pub struct ArchitectContext {
    pub file_tree: Vec<String>,
    pub manifests: String,
    pub scouted_files: Vec<ScoutedFile>,
    pub primary_language: Option<String>,
    pub package_manager: Option<String>,
    pub forbidden_keywords: Vec<String>,
    pub tools: Vec<ToolDefinition>,
}

pub struct ContextAssembler<'a> {
    mirror: &'a dyn FilesystemMirror,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(mirror: &'a dyn FilesystemMirror) -> Self {
        Self { mirror }
    }

    /// Top-level project structure for the initial decomposition prompt:
    /// the file tree, every registered Language Provider's manifest content
    /// that's actually present, up to three prompt-relevant scouted files,
    /// the inferred primary language/package manager, the Red-Flag Guard's
    /// cross-ecosystem keywords for that language, and the tool registry
    /// (spec §4.3 `getArchitectContext`).
    pub async fn get_architect_context(
        &self,
        prompt: &str,
        providers: &[Box<dyn LanguageProvider>],
        tools: &[ToolDefinition],
    ) -> MakerResult<ArchitectContext> {
        let excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        let file_tree = self.mirror.get_directory_tree(&excludes).await?;

        let mut manifest_names: Vec<&'static str> = Vec::new();
        for provider in providers {
            for name in provider.manifest_files() {
                if !manifest_names.contains(&name) {
                    manifest_names.push(name);
                }
            }
        }

        let mut manifests = String::new();
        let mut present_manifest: Option<&'static str> = None;
        for name in &manifest_names {
            if let Ok(content) = self.mirror.read(name).await {
                if present_manifest.is_none() {
                    present_manifest = Some(name);
                }
                manifests.push_str(&format!("--- {name} ---\n{content}\n"));
            }
        }

        let scouted_files = self.scout_files(prompt, &file_tree).await;

        let primary_language = present_manifest.map(language_for_manifest).map(str::to_string);
        let package_manager = present_manifest.map(package_manager_for_manifest).map(str::to_string);
        let forbidden_keywords = forbidden_keywords_for(primary_language.as_deref());

        Ok(ArchitectContext {
            file_tree,
            manifests,
            scouted_files,
            primary_language,
            package_manager,
            forbidden_keywords,
            tools: tools.to_vec(),
        })
    }

    /// Scoped context for a single step: the current contents of its file
    /// target, each dependency step's tool output (or its own produced
    /// file's contents when it logged nothing), and the language
    /// guideline text for whichever provider handles the target (spec §4.3
    /// `getTaskContext`).
    pub async fn get_task_context(
        &self,
        file_target: &str,
        dependency_step_ids: &[StepId],
        all_steps: &[Step],
        providers: &[Box<dyn LanguageProvider>],
    ) -> MakerResult<String> {
        let mut sections = Vec::new();

        if !file_target.is_empty() {
            if let Ok(current) = self.mirror.read(file_target).await {
                sections.push(format!("--- current contents of {file_target} ---\n{current}"));
            }
        }

        for dep_id in dependency_step_ids {
            let Some(dependency) = all_steps.iter().find(|s| &s.id == dep_id) else {
                continue;
            };
            if !dependency.logs.is_empty() {
                sections.push(format!(
                    "--- dependency {dep_id} tool output ---\n{}",
                    dependency.logs.join("\n")
                ));
            } else if !dependency.file_target.is_empty() {
                if let Ok(content) = self.mirror.read(&dependency.file_target).await {
                    sections.push(format!(
                        "--- dependency {dep_id} produced {} ---\n{content}",
                        dependency.file_target
                    ));
                }
            }
        }

        if let Some(provider) = providers.iter().find(|p| p.supports(file_target)) {
            sections.push(format!("--- language guidelines ---\n{}", provider.system_prompt()));
        }

        Ok(sections.join("\n\n"))
    }

    /// Cross-tree filename search triggered by a failure: extracts the
    /// first quoted token from the error message and looks for a
    /// same-named source file anywhere in the tree, tagging whatever it
    /// finds as AUTO-DISCOVERED (spec §4.3 `expandContext`).
    pub async fn expand_context(&self, error_message: &str) -> MakerResult<Option<String>> {
        let Some(token) = first_quoted_token(error_message) else {
            return Ok(None);
        };

        let excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        let tree = self.mirror.get_directory_tree(&excludes).await?;

        let candidates: Vec<String> = EXPAND_EXTENSIONS
            .iter()
            .map(|ext| format!("{token}.{ext}").to_lowercase())
            .collect();

        let Some(matched) = tree.iter().find(|path| {
            let basename = Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            candidates.contains(&basename)
        }) else {
            return Ok(None);
        };

        let content = self.mirror.read(matched).await?;
        Ok(Some(format!("AUTO-DISCOVERED ({matched}):\n{content}")))
    }

    /// Up to three files from the tree whose basename contains a
    /// meaningful (longer than 4 characters) whitespace-split token from
    /// the prompt, case-insensitively (spec §4.3 "scoutedFiles").
    async fn scout_files(&self, prompt: &str, file_tree: &[String]) -> Vec<ScoutedFile> {
        let tokens: Vec<String> = prompt
            .split_whitespace()
            .filter(|t| t.len() > 4)
            .map(|t| t.to_lowercase())
            .collect();

        let mut scouted = Vec::new();
        for path in file_tree {
            if scouted.len() >= 3 {
                break;
            }
            let basename = Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if !tokens.iter().any(|t| basename.contains(t.as_str())) {
                continue;
            }
            if let Ok(content) = self.mirror.read(path).await {
                scouted.push(ScoutedFile {
                    path: path.clone(),
                    content,
                });
            }
        }
        scouted
    }
}

const EXPAND_EXTENSIONS: &[&str] = &["ts", "tsx", "rs", "py"];

/// Extracts the first single- or double-quoted token from a message (spec
/// §4.3 `expandContext`).
fn first_quoted_token(message: &str) -> Option<&str> {
    for quote in ['"', '\''] {
        if let Some(start) = message.find(quote) {
            let rest = &message[start + 1..];
            if let Some(end) = rest.find(quote) {
                return Some(&rest[..end]);
            }
        }
    }
    None
}

fn language_for_manifest(name: &'static str) -> &'static str {
    match name {
        "Cargo.toml" => "rust",
        "pyproject.toml" | "requirements.txt" => "python",
        "package.json" | "tsconfig.json" => "typescript",
        _ => "unknown",
    }
}

fn package_manager_for_manifest(name: &'static str) -> &'static str {
    match name {
        "Cargo.toml" => "cargo",
        "pyproject.toml" => "poetry",
        "requirements.txt" => "pip",
        "package.json" | "tsconfig.json" => "npm",
        _ => "unknown",
    }
}

/// Mirrors the Red-Flag Guard's own cross-ecosystem checks (spec §4.6) so
/// the architect prompt steers the model away from tripping them later.
fn forbidden_keywords_for(primary_language: Option<&str>) -> Vec<String> {
    match primary_language {
        Some("python") => vec!["npm install".to_string()],
        Some("rust") => vec!["pip install".to_string()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lint::default_providers;
    use crate::state::{Step, StepStatus};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeMirror {
        files: Mutex<HashMap<String, String>>,
        tree: Vec<String>,
    }

    #[async_trait]
    impl FilesystemMirror for FakeMirror {
        async fn read(&self, path: &str) -> MakerResult<String> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| crate::error::MakerError::validation("missing"))
        }
        async fn write(&self, _path: &str, _contents: &str) -> MakerResult<()> {
            Ok(())
        }
        async fn mkdir(&self, _path: &str) -> MakerResult<()> {
            Ok(())
        }
        async fn list(&self, _path: &str) -> MakerResult<Vec<String>> {
            Ok(self.tree.clone())
        }
        async fn get_directory_tree(&self, _excludes: &[String]) -> MakerResult<Vec<String>> {
            Ok(self.tree.clone())
        }
    }

    #[tokio::test]
    async fn architect_context_surfaces_manifest_and_language() {
        let mut files = HashMap::new();
        files.insert("Cargo.toml".to_string(), "[package]\nname = \"x\"".to_string());
        let mirror = FakeMirror {
            files: Mutex::new(files),
            tree: vec!["Cargo.toml".to_string(), "src/main.rs".to_string()],
        };
        let assembler = ContextAssembler::new(&mirror);
        let ctx = assembler
            .get_architect_context("build a thing", &default_providers(), &[])
            .await
            .unwrap();

        assert_eq!(ctx.file_tree.len(), 2);
        assert!(ctx.manifests.contains("[package]"));
        assert_eq!(ctx.primary_language.as_deref(), Some("rust"));
        assert_eq!(ctx.package_manager.as_deref(), Some("cargo"));
        assert_eq!(ctx.forbidden_keywords, vec!["pip install".to_string()]);
    }

    #[tokio::test]
    async fn architect_context_scouts_prompt_relevant_files() {
        let mut files = HashMap::new();
        files.insert("src/checkout.rs".to_string(), "fn checkout() {}".to_string());
        let mirror = FakeMirror {
            files: Mutex::new(files),
            tree: vec!["src/checkout.rs".to_string(), "src/other.rs".to_string()],
        };
        let assembler = ContextAssembler::new(&mirror);
        let ctx = assembler
            .get_architect_context("fix the checkout flow", &[], &[])
            .await
            .unwrap();

        assert_eq!(ctx.scouted_files.len(), 1);
        assert_eq!(ctx.scouted_files[0].path, "src/checkout.rs");
    }

    #[tokio::test]
    async fn task_context_includes_current_file_and_dependency_logs() {
        let mut files = HashMap::new();
        files.insert("src/b.rs".to_string(), "fn b() {}".to_string());
        let mirror = FakeMirror {
            files: Mutex::new(files),
            tree: vec![],
        };
        let assembler = ContextAssembler::new(&mirror);

        let mut dep = Step::new("a", "do a", "src/a.rs");
        dep.set_status(StepStatus::Passed);
        dep.log("ran cargo build successfully");

        let ctx = assembler
            .get_task_context("src/b.rs", &["a".to_string()], &[dep], &[])
            .await
            .unwrap();

        assert!(ctx.contains("fn b() {}"));
        assert!(ctx.contains("ran cargo build successfully"));
    }

    #[tokio::test]
    async fn expand_context_finds_file_by_quoted_token() {
        let mut files = HashMap::new();
        files.insert("src/util.rs".to_string(), "pub fn helper() {}".to_string());
        let mirror = FakeMirror {
            files: Mutex::new(files),
            tree: vec!["src/util.rs".to_string()],
        };
        let assembler = ContextAssembler::new(&mirror);
        let found = assembler
            .expand_context("error: cannot find module 'util' in this scope")
            .await
            .unwrap();

        assert!(found.unwrap().contains("pub fn helper()"));
    }

    #[tokio::test]
    async fn expand_context_returns_none_without_a_match() {
        let mirror = FakeMirror {
            files: Mutex::new(HashMap::new()),
            tree: vec!["src/util.rs".to_string()],
        };
        let assembler = ContextAssembler::new(&mirror);
        let found = assembler
            .expand_context("error: cannot find module 'ghost' in this scope")
            .await
            .unwrap();

        assert!(found.is_none());
    }
}
