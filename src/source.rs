//! External collaborators: change enumeration, revision reads, tree listing.
//!
//! The engine core consumes these through traits so tests can pin repository
//! state in memory. The shipped defaults shell out to git and walk the file
//! system.

use crate::model::{ChangeBatch, RawChange};
use crate::util;
use anyhow::{bail, Context, Result};
use ignore::WalkBuilder;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Which side of a comparison a file content is read from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Revision {
    /// A committed revision (`<ref>:<path>`).
    Rev(String),
    /// The working tree as it is on disk.
    WorkingTree,
}

/// Enumerates the change set from the underlying version-control system.
pub trait ChangeEnumerator {
    /// Base-revision-versus-head comparison with rename detection.
    fn base_to_head(&self, base_ref: &str) -> Result<ChangeBatch>;
    /// Working-tree-versus-head-commit comparison with rename detection.
    fn working_tree(&self) -> Result<ChangeBatch>;
    /// Untracked files, repo-relative.
    fn untracked(&self) -> Result<Vec<String>>;
}

/// Reads file contents keyed by (path, revision).
pub trait RevisionReader {
    fn read(&self, path: &str, revision: &Revision) -> Result<String>;
}

/// Recursively lists files under a repo-relative directory.
pub trait TreeLister {
    /// Repo-relative forward-slash paths, unordered.
    fn list(&self, rel_root: &str) -> Result<Vec<String>>;
}

/// Git-backed enumerator and reader.
pub struct GitWorkspace {
    repo_root: PathBuf,
}

impl GitWorkspace {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        GitWorkspace {
            repo_root: repo_root.into(),
        }
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_root)
            .args(args)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn diff_name_status(&self, extra: &[&str]) -> Result<ChangeBatch> {
        let mut args = vec!["diff", "--name-status", "-M"];
        args.extend_from_slice(extra);
        let stdout = self.git(&args)?;
        Ok(parse_name_status(&stdout))
    }
}

impl ChangeEnumerator for GitWorkspace {
    fn base_to_head(&self, base_ref: &str) -> Result<ChangeBatch> {
        self.diff_name_status(&[base_ref, "HEAD"])
    }

    fn working_tree(&self) -> Result<ChangeBatch> {
        self.diff_name_status(&["HEAD"])
    }

    fn untracked(&self) -> Result<Vec<String>> {
        let stdout = self.git(&["ls-files", "--others", "--exclude-standard"])?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| util::normalize_slashes(line))
            .collect())
    }
}

impl RevisionReader for GitWorkspace {
    fn read(&self, path: &str, revision: &Revision) -> Result<String> {
        match revision {
            Revision::Rev(rev) => self.git(&["show", &format!("{rev}:{path}")]),
            Revision::WorkingTree => {
                let abs = self.repo_root.join(path);
                std::fs::read_to_string(&abs).with_context(|| format!("read {}", abs.display()))
            }
        }
    }
}

/// Parse `git diff --name-status` output. Malformed lines are skipped and
/// reported as warnings instead of failing the enumeration.
pub fn parse_name_status(stdout: &str) -> ChangeBatch {
    let mut batch = ChangeBatch::default();
    for line in stdout.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let Some(status) = fields.next().map(str::trim).filter(|s| !s.is_empty()) else {
            batch
                .warnings
                .push(format!("skipped malformed diff line: {line:?}"));
            continue;
        };
        let first = fields.next().map(str::trim);
        let second = fields.next().map(str::trim);
        let entry = match (status.chars().next(), first, second) {
            (Some('R') | Some('C'), Some(old), Some(new)) => RawChange {
                status: status.to_string(),
                old_path: Some(util::normalize_slashes(old)),
                path: util::normalize_slashes(new),
            },
            (Some(_), Some(path), None) => RawChange {
                status: status.to_string(),
                old_path: None,
                path: util::normalize_slashes(path),
            },
            _ => {
                batch
                    .warnings
                    .push(format!("skipped malformed diff line: {line:?}"));
                continue;
            }
        };
        batch.changes.push(entry);
    }
    batch
}

/// File-system tree lister honoring ignore rules, like the index scanner.
pub struct FsTree {
    repo_root: PathBuf,
}

impl FsTree {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        FsTree {
            repo_root: repo_root.into(),
        }
    }
}

impl TreeLister for FsTree {
    fn list(&self, rel_root: &str) -> Result<Vec<String>> {
        let root = if rel_root.is_empty() || rel_root == "." {
            self.repo_root.clone()
        } else {
            self.repo_root.join(rel_root)
        };
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for entry in WalkBuilder::new(&root).hidden(false).build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(_) => continue,
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&self.repo_root) {
                let rel = util::normalize_path(rel);
                if !rel.starts_with(".git/") {
                    paths.push(rel);
                }
            }
        }
        Ok(paths)
    }
}

/// In-memory collaborators for tests and embedders that already hold the
/// change set.
#[derive(Default)]
pub struct MemoryWorkspace {
    pub base_to_head: ChangeBatch,
    pub working_tree: ChangeBatch,
    pub untracked: Vec<String>,
    /// Content per (revision, path).
    pub contents: HashMap<(Revision, String), String>,
    pub fail_enumeration: bool,
}

impl MemoryWorkspace {
    pub fn insert(&mut self, revision: Revision, path: &str, content: &str) {
        self.contents
            .insert((revision, path.to_string()), content.to_string());
    }
}

impl ChangeEnumerator for MemoryWorkspace {
    fn base_to_head(&self, _base_ref: &str) -> Result<ChangeBatch> {
        if self.fail_enumeration {
            bail!("change enumerator exited non-zero");
        }
        Ok(self.base_to_head.clone())
    }

    fn working_tree(&self) -> Result<ChangeBatch> {
        if self.fail_enumeration {
            bail!("change enumerator exited non-zero");
        }
        Ok(self.working_tree.clone())
    }

    fn untracked(&self) -> Result<Vec<String>> {
        Ok(self.untracked.clone())
    }
}

impl RevisionReader for MemoryWorkspace {
    fn read(&self, path: &str, revision: &Revision) -> Result<String> {
        match self.contents.get(&(revision.clone(), path.to_string())) {
            Some(content) => Ok(content.clone()),
            None => bail!("no content for {path} at {revision:?}"),
        }
    }
}

impl TreeLister for MemoryWorkspace {
    fn list(&self, rel_root: &str) -> Result<Vec<String>> {
        Ok(self
            .contents
            .keys()
            .filter(|(revision, path)| {
                *revision == Revision::WorkingTree && util::is_under(path, rel_root)
            })
            .map(|(_, path)| path.clone())
            .collect())
    }
}

/// Lists a directory tree rooted at a real path without ignore semantics;
/// used by tests over temp directories that lack a git checkout.
pub struct PlainTree {
    repo_root: PathBuf,
}

impl PlainTree {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        PlainTree {
            repo_root: repo_root.into(),
        }
    }

    fn walk(&self, dir: &Path, out: &mut Vec<String>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.walk(&path, out);
            } else if path.is_file() {
                if let Ok(rel) = path.strip_prefix(&self.repo_root) {
                    out.push(util::normalize_path(rel));
                }
            }
        }
    }
}

impl TreeLister for PlainTree {
    fn list(&self, rel_root: &str) -> Result<Vec<String>> {
        let root = if rel_root.is_empty() || rel_root == "." {
            self.repo_root.clone()
        } else {
            self.repo_root.join(rel_root)
        };
        let mut out = Vec::new();
        if root.is_dir() {
            self.walk(&root, &mut out);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_status_lines() {
        let batch = parse_name_status("M\tsrc/a.ts\nR087\told.ts\tnew.ts\nD\tgone.ts\n");
        assert_eq!(batch.changes.len(), 3);
        assert_eq!(batch.changes[0].status, "M");
        assert_eq!(batch.changes[1].old_path.as_deref(), Some("old.ts"));
        assert_eq!(batch.changes[1].path, "new.ts");
        assert!(batch.warnings.is_empty());
    }

    #[test]
    fn malformed_lines_become_warnings() {
        let batch = parse_name_status("M\tsrc/a.ts\nR100\tonly-one-field\n\t\n");
        assert_eq!(batch.changes.len(), 1);
        assert_eq!(batch.warnings.len(), 2);
    }

    #[test]
    fn memory_workspace_roundtrip() {
        let mut ws = MemoryWorkspace::default();
        ws.insert(Revision::WorkingTree, "src/a.ts", "export {}");
        assert_eq!(
            ws.read("src/a.ts", &Revision::WorkingTree).unwrap(),
            "export {}"
        );
        assert!(ws.read("src/a.ts", &Revision::Rev("HEAD".into())).is_err());
    }
}
