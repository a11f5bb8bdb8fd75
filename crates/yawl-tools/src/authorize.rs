// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
//! Path-scope authorization for tool operations.
//!
//! The gate is the trust boundary between model output and filesystem
//! mutation: anything the model writes, renames, or deletes outside the
//! session working directory must go back to the user for confirmation.

use std::path::{Component, Path, PathBuf};

/// Decision for one (path, operation) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    /// Inside the working directory — proceed.
    Allowed,
    /// Outside the working directory — the model receives this reason as an
    /// error and should ask the user for explicit confirmation.
    Required { reason: String },
}

impl Authorization {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Authorization::Allowed)
    }
}

/// Scope decisions relative to a session working directory.
#[derive(Debug)]
pub struct WorkspaceGate {
    root: PathBuf,
    unrestricted_reads: bool,
}

impl WorkspaceGate {
    /// `root` must exist; it is resolved through symlinks once here so that
    /// later prefix checks compare canonical paths.
    pub fn new(root: impl AsRef<Path>, unrestricted_reads: bool) -> std::io::Result<Self> {
        Ok(Self {
            root: root.as_ref().canonicalize()?,
            unrestricted_reads,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a tool-supplied path to an absolute, symlink-free form.
    /// Relative paths are taken relative to the working directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        let abs = if path.is_absolute() {
            lexical_normalize(path)
        } else {
            lexical_normalize(&self.root.join(path))
        };
        // Canonicalize the deepest existing ancestor so a symlink inside the
        // tree cannot point the prefix check at the wrong place, then
        // re-attach the not-yet-existing tail.
        let mut existing = abs.clone();
        let mut tail: Vec<std::ffi::OsString> = Vec::new();
        while !existing.exists() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    tail.push(name.to_os_string());
                    existing = parent.to_path_buf();
                }
                _ => break,
            }
        }
        let mut resolved = existing.canonicalize().unwrap_or(existing);
        for name in tail.iter().rev() {
            resolved.push(name);
        }
        resolved
    }

    /// Read operations may be unrestricted (configurable).
    pub fn check_read(&self, path: &Path) -> Authorization {
        if self.unrestricted_reads {
            return Authorization::Allowed;
        }
        self.check_scope(path, "read")
    }

    /// Mutations (write, append, delete, rename, create_directory) always
    /// gate on the working-directory prefix.
    pub fn check_mutation(&self, path: &Path, operation: &str) -> Authorization {
        self.check_scope(path, operation)
    }

    fn check_scope(&self, path: &Path, operation: &str) -> Authorization {
        let resolved = self.resolve(path);
        if resolved.starts_with(&self.root) {
            Authorization::Allowed
        } else {
            Authorization::Required {
                reason: format!(
                    "authorization required: {operation} on {} is outside the working \
                     directory {}. Ask the user to confirm this operation explicitly \
                     before retrying.",
                    resolved.display(),
                    self.root.display()
                ),
            }
        }
    }
}

/// Normalize `.` and `..` components without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(unrestricted_reads: bool) -> (tempfile::TempDir, WorkspaceGate) {
        let dir = tempfile::tempdir().unwrap();
        let gate = WorkspaceGate::new(dir.path(), unrestricted_reads).unwrap();
        (dir, gate)
    }

    #[test]
    fn mutation_inside_workdir_is_allowed() {
        let (_dir, g) = gate(true);
        let target = g.root().join("notes.txt");
        assert!(g.check_mutation(&target, "write").is_allowed());
    }

    #[test]
    fn relative_paths_resolve_against_workdir() {
        let (_dir, g) = gate(true);
        assert!(g.check_mutation(Path::new("sub/file.txt"), "write").is_allowed());
    }

    #[test]
    fn mutation_outside_workdir_requires_authorization() {
        let (_dir, g) = gate(true);
        match g.check_mutation(Path::new("/etc/passwd"), "delete") {
            Authorization::Required { reason } => {
                assert!(reason.contains("authorization required"));
                assert!(reason.contains("/etc/passwd"));
            }
            Authorization::Allowed => panic!("must not allow /etc/passwd"),
        }
    }

    #[test]
    fn dotdot_escape_is_caught() {
        let (_dir, g) = gate(true);
        let sneaky = g.root().join("sub/../../../../etc/passwd");
        assert!(!g.check_mutation(&sneaky, "write").is_allowed());
    }

    #[test]
    fn symlink_escape_is_caught() {
        let (_dir, g) = gate(true);
        let link = g.root().join("outside");
        std::os::unix::fs::symlink("/etc", &link).unwrap();
        let target = link.join("passwd");
        assert!(!g.check_mutation(&target, "write").is_allowed());
    }

    #[test]
    fn reads_unrestricted_when_configured() {
        let (_dir, g) = gate(true);
        assert!(g.check_read(Path::new("/etc/hosts")).is_allowed());
    }

    #[test]
    fn reads_gated_when_restricted() {
        let (_dir, g) = gate(false);
        assert!(!g.check_read(Path::new("/etc/hosts")).is_allowed());
        assert!(g.check_read(&g.root().join("x")).is_allowed());
    }

    #[test]
    fn nonexistent_target_inside_workdir_is_allowed() {
        let (_dir, g) = gate(true);
        let target = g.root().join("brand/new/deep/file.txt");
        assert!(g.check_mutation(&target, "write").is_allowed());
    }

    #[test]
    fn lexical_normalize_handles_dot_and_dotdot() {
        assert_eq!(
            lexical_normalize(Path::new("/a/b/./c/../d")),
            PathBuf::from("/a/b/d")
        );
    }
}
