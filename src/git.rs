//! Thin shell around the `git` binary for commit identity and change sets.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{AtlasError, Result};
use crate::indexer::ChangedPath;

pub struct GitRepo {
    root: PathBuf,
}

impl GitRepo {
    /// Opens `root` as a git work tree; errors when it is not one.
    pub fn open(root: &Path) -> Result<Self> {
        let output = Command::new("git")
            .arg("-C")
            .arg(root)
            .args(["rev-parse", "--is-inside-work-tree"])
            .output()
            .map_err(|e| AtlasError::Git(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            return Err(AtlasError::Git(format!(
                "{} is not a git work tree",
                root.display()
            )));
        }

        Ok(Self { root: root.to_path_buf() })
    }

    pub fn head_commit(&self) -> Result<String> {
        let stdout = self.run(&["rev-parse", "HEAD"])?;
        let commit = stdout.trim().to_string();
        if commit.is_empty() {
            return Err(AtlasError::Git("repository has no HEAD commit".to_string()));
        }
        Ok(commit)
    }

    /// Paths changed between `commit` and the working tree, including
    /// untracked files. Paths are relative to the repository root.
    pub fn changed_since(&self, commit: &str) -> Result<Vec<ChangedPath>> {
        let mut changes = Vec::new();

        let diff = self.run(&["diff", "--name-status", commit])?;
        for line in diff.lines() {
            let mut parts = line.split('\t');
            let Some(status) = parts.next() else { continue };
            // Renames list old then new path; the old one is a deletion.
            if status.starts_with('R') {
                if let Some(old) = parts.next() {
                    changes.push(ChangedPath { path: self.root.join(old), deleted: true });
                }
                if let Some(new) = parts.next() {
                    changes.push(ChangedPath { path: self.root.join(new), deleted: false });
                }
                continue;
            }
            let Some(path) = parts.next() else { continue };
            changes.push(ChangedPath {
                path: self.root.join(path),
                deleted: status.starts_with('D'),
            });
        }

        let untracked = self.run(&["ls-files", "--others", "--exclude-standard"])?;
        for line in untracked.lines() {
            let line = line.trim();
            if !line.is_empty() {
                changes.push(ChangedPath { path: self.root.join(line), deleted: false });
            }
        }

        Ok(changes)
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(args)
            .output()
            .map_err(|e| AtlasError::Git(format!("failed to run git {}: {e}", args.join(" "))))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AtlasError::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
