//! `ToolRunner`: executes a step's templated shell tool (spec §6, §4.8 step 4).

use crate::error::{MakerError, MakerResult};
use crate::fs_mirror::FilesystemMirror;
use crate::state::{ToolCall, ToolDefinition};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// The pseudo-command the Step Executor intercepts before ever reaching a
/// `ToolRunner`, routing it to the `FilesystemMirror` instead (spec §4.8
/// step 4: "internal pseudo-commands never touch the shell").
pub const INTERNAL_READ_FILE: &str = "__INTERNAL_READ_FILE__";

/// Interpolates `{{arg}}` placeholders in a command template. A missing
/// `{{path}}` placeholder defaults to `.` (spec §6 "unbound `path` defaults
/// to the workspace root").
pub fn render_command(template: &str, arguments: &BTreeMap<String, String>) -> String {
    let mut rendered = template.to_string();
    for (key, value) in arguments {
        rendered = rendered.replace(&format!("{{{{{key}}}}}"), &sanitize_arg(value));
    }
    if rendered.contains("{{path}}") {
        rendered = rendered.replace("{{path}}", ".");
    }
    rendered
}

/// Strips characters that would let a templated argument break out of its
/// position and chain a second shell command (spec §6 "arguments are
/// sanitized, never interpolated raw").
fn sanitize_arg(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, ';' | '&' | '|' | '`' | '$' | '\n'))
        .collect()
}

/// Runs a tool's rendered command against the workspace.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, command: &str, workspace_root: &str) -> MakerResult<String>;
}

/// The built-in tool registry every engine carries regardless of
/// `MakerConfig.tools` (spec §4.8 step 3 "resolve the tool by `toolCall.
/// toolName` from `system_tools ∪ config.tools`"; spec §8 S6's `ls` step
/// expects `git ls-files --full-name`).
pub fn default_system_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            id: "ls".to_string(),
            name: "ls".to_string(),
            description: "List tracked files in the repository.".to_string(),
            command_template: "git ls-files --full-name".to_string(),
            requires_approval: false,
            is_system: true,
        },
        ToolDefinition {
            id: "grep".to_string(),
            name: "grep".to_string(),
            description: "Search tracked files for a pattern.".to_string(),
            command_template: "git grep -n {{query}}".to_string(),
            requires_approval: false,
            is_system: true,
        },
        ToolDefinition {
            id: "read_file".to_string(),
            name: "read_file".to_string(),
            description: "Print a file's contents.".to_string(),
            command_template: "cat {{path}}".to_string(),
            requires_approval: false,
            is_system: true,
        },
        ToolDefinition {
            id: "make_directory".to_string(),
            name: "make_directory".to_string(),
            description: "Create a directory, including parents.".to_string(),
            command_template: "mkdir -p {{path}}".to_string(),
            requires_approval: false,
            is_system: true,
        },
    ]
}

/// Dispatches a step's tool call: internal pseudo-commands go straight to
/// the filesystem mirror, everything else is resolved from `system_tools ∪
/// config.tools` (config tools taking precedence on id collision), rendered,
/// and handed to the `ToolRunner`.
pub async fn dispatch_tool_call(
    tool_call: &ToolCall,
    tool_defs: &[ToolDefinition],
    mirror: &dyn FilesystemMirror,
    runner: &dyn ToolRunner,
    workspace_root: &str,
) -> MakerResult<String> {
    if tool_call.tool_name == INTERNAL_READ_FILE {
        let path = tool_call
            .arguments
            .get("path")
            .ok_or_else(|| MakerError::validation("__INTERNAL_READ_FILE__ requires a path argument"))?;
        return mirror.read(path).await;
    }

    let matches = |t: &&ToolDefinition| t.id == tool_call.tool_name || t.name == tool_call.tool_name;
    let command_template = if let Some(def) = tool_defs.iter().find(matches) {
        def.command_template.clone()
    } else {
        let system_tools = default_system_tools();
        let def = system_tools
            .iter()
            .find(matches)
            .ok_or_else(|| MakerError::Tool(format!("unknown tool: {}", tool_call.tool_name)))?;
        def.command_template.clone()
    };

    let command = render_command(&command_template, &tool_call.arguments);
    runner.run(&command, workspace_root).await
}

/// A `std::process::Command`-backed runner.
pub struct ShellToolRunner;

#[async_trait]
impl ToolRunner for ShellToolRunner {
    async fn run(&self, command: &str, workspace_root: &str) -> MakerResult<String> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(workspace_root)
            .output()
            .await
            .map_err(|e| MakerError::Tool(e.to_string()))?;

        if !output.status.success() {
            return Err(MakerError::Tool(format!(
                "command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_command_substitutes_args_and_sanitizes() {
        let mut args = BTreeMap::new();
        args.insert("query".to_string(), "foo; rm -rf /".to_string());
        let rendered = render_command("grep {{query}} .", &args);
        assert_eq!(rendered, "grep foo rm -rf / .");
    }

    #[test]
    fn render_command_defaults_missing_path() {
        let args = BTreeMap::new();
        let rendered = render_command("ls {{path}}", &args);
        assert_eq!(rendered, "ls .");
    }

    struct RecordingRunner {
        last_command: std::sync::Mutex<Option<String>>,
    }

    #[async_trait]
    impl ToolRunner for RecordingRunner {
        async fn run(&self, command: &str, _workspace_root: &str) -> MakerResult<String> {
            *self.last_command.lock().unwrap() = Some(command.to_string());
            Ok(String::new())
        }
    }

    struct NoopMirror;
    #[async_trait]
    impl FilesystemMirror for NoopMirror {
        async fn read(&self, _path: &str) -> MakerResult<String> {
            Ok(String::new())
        }
        async fn write(&self, _path: &str, _contents: &str) -> MakerResult<()> {
            Ok(())
        }
        async fn mkdir(&self, _path: &str) -> MakerResult<()> {
            Ok(())
        }
        async fn list(&self, _path: &str) -> MakerResult<Vec<String>> {
            Ok(Vec::new())
        }
        async fn get_directory_tree(&self, _excludes: &[String]) -> MakerResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn dispatch_resolves_builtin_ls_from_system_tools() {
        let tool_call = ToolCall {
            tool_name: "ls".to_string(),
            arguments: BTreeMap::new(),
        };
        let runner = RecordingRunner {
            last_command: std::sync::Mutex::new(None),
        };
        let mirror = NoopMirror;
        dispatch_tool_call(&tool_call, &[], &mirror, &runner, ".").await.unwrap();
        assert_eq!(runner.last_command.lock().unwrap().as_deref(), Some("git ls-files --full-name"));
    }
}
