//! `FilesystemMirror`: the workspace-filesystem collaborator contract (spec §6).

use crate::error::{MakerError, MakerResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Normalizes a user/model-supplied relative path: backslashes become
/// forward slashes, a leading `./` is stripped, and any `..` segment is
/// rejected outright rather than resolved (spec §6 "rejects any path
/// containing a `..` segment after normalization").
pub fn normalize_relative_path(raw: &str) -> MakerResult<PathBuf> {
    let unified = raw.replace('\\', "/");
    let stripped = unified.strip_prefix("./").unwrap_or(&unified);

    if stripped.split('/').any(|segment| segment == "..") {
        return Err(MakerError::path_traversal(stripped));
    }

    Ok(PathBuf::from(stripped))
}

/// A workspace filesystem, abstracted so the core never calls `std::fs`
/// directly (spec §6).
#[async_trait]
pub trait FilesystemMirror: Send + Sync {
    async fn read(&self, path: &str) -> MakerResult<String>;
    async fn write(&self, path: &str, contents: &str) -> MakerResult<()>;
    async fn mkdir(&self, path: &str) -> MakerResult<()>;
    async fn list(&self, path: &str) -> MakerResult<Vec<String>>;
    async fn get_directory_tree(&self, excludes: &[String]) -> MakerResult<Vec<String>>;
}

/// A `std::fs`-backed mirror rooted at a single workspace directory.
pub struct LocalFilesystemMirror {
    root: PathBuf,
}

impl LocalFilesystemMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> MakerResult<PathBuf> {
        Ok(self.root.join(normalize_relative_path(path)?))
    }
}

#[async_trait]
impl FilesystemMirror for LocalFilesystemMirror {
    async fn read(&self, path: &str) -> MakerResult<String> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::read_to_string(full).await?)
    }

    async fn write(&self, path: &str, contents: &str) -> MakerResult<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(full, contents).await?;
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> MakerResult<()> {
        let full = self.resolve(path)?;
        tokio::fs::create_dir_all(full).await?;
        Ok(())
    }

    async fn list(&self, path: &str) -> MakerResult<Vec<String>> {
        let full = self.resolve(path)?;
        let mut entries = tokio::fs::read_dir(full).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn get_directory_tree(&self, excludes: &[String]) -> MakerResult<Vec<String>> {
        let root = self.root.clone();
        let excludes = excludes.to_vec();
        tokio::task::spawn_blocking(move || walk_tree(&root, &excludes))
            .await
            .map_err(|e| MakerError::Io(std::io::Error::other(e)))?
    }
}

fn walk_tree(root: &Path, excludes: &[String]) -> MakerResult<Vec<String>> {
    let mut builder = ignore::WalkBuilder::new(root);
    builder.hidden(false).git_ignore(true);
    for pattern in excludes {
        builder.add_custom_ignore_filename(pattern);
    }

    let mut paths = Vec::new();
    for entry in builder.build() {
        let entry = entry.map_err(|e| MakerError::Io(std::io::Error::other(e.to_string())))?;
        if entry.path() == root {
            continue;
        }
        if excludes.iter().any(|e| entry.path().to_string_lossy().contains(e.as_str())) {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            paths.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_traversal() {
        assert!(normalize_relative_path("../etc/passwd").is_err());
        assert!(normalize_relative_path("src/../../etc/passwd").is_err());
    }

    #[test]
    fn strips_leading_dot_slash_and_backslashes() {
        let normalized = normalize_relative_path(".\\src\\main.rs").unwrap();
        assert_eq!(normalized, PathBuf::from("src/main.rs"));
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalFilesystemMirror::new(dir.path());
        mirror.write("src/lib.rs", "fn main() {}").await.unwrap();
        let contents = mirror.read("src/lib.rs").await.unwrap();
        assert_eq!(contents, "fn main() {}");
    }
}
