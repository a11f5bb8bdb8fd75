// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
//! Durable session state.
//!
//! `conversation.json` is written atomically: serialize to a temp file in
//! the same directory, fsync, then rename over the target — a crash
//! mid-write leaves the previous valid version in place.  A per-session
//! advisory lock file guards against concurrent writers.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use yawl_model::Message;

/// The persisted form of a session: conversation, identity, and the
/// configuration snapshot captured when the session was created (so a
/// mid-session provider swap in config is explicit, never silent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDocument {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub config: serde_json::Value,
    pub messages: Vec<Message>,
}

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session '{0}' not found")]
    NotFound(String),
    #[error("session '{0}' is locked by another process")]
    Locked(String),
    #[error("conversation file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn session_dir(&self, id: &str) -> PathBuf {
        self.root.join("sessions").join(id)
    }

    fn conversation_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("conversation.json")
    }

    /// Create the session directory tree.
    pub fn create_dirs(&self, id: &str) -> std::io::Result<PathBuf> {
        let dir = self.session_dir(id);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Atomic write: temp file in the same directory, fsync, rename.
    pub fn save(&self, doc: &SessionDocument) -> Result<(), PersistError> {
        let dir = self.create_dirs(&doc.id)?;
        let tmp = dir.join(".conversation.json.tmp");
        let bytes = serde_json::to_vec_pretty(doc)?;
        {
            let mut f = File::create(&tmp)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp, self.conversation_path(&doc.id))?;
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<SessionDocument, PersistError> {
        let path = self.conversation_path(id);
        if !path.is_file() {
            return Err(PersistError::NotFound(id.to_string()));
        }
        let bytes = std::fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Acquire the per-session exclusive lock.  Fails fast when another
    /// process holds it — one writer per session.
    pub fn lock(&self, id: &str) -> Result<SessionLock, PersistError> {
        let dir = self.create_dirs(id)?;
        let path = dir.join("lock");
        let file = File::create(&path)?;
        match file.try_lock_exclusive() {
            Ok(true) => Ok(SessionLock { file }),
            Ok(false) => Err(PersistError::Locked(id.to_string())),
            Err(e) => Err(PersistError::Io(e)),
        }
    }

    /// Session ids present on disk, newest first by modification time.
    pub fn list(&self) -> std::io::Result<Vec<String>> {
        let sessions = self.root.join("sessions");
        if !sessions.is_dir() {
            return Ok(Vec::new());
        }
        let mut entries: Vec<(String, std::time::SystemTime)> = Vec::new();
        for entry in std::fs::read_dir(&sessions)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            entries.push((entry.file_name().to_string_lossy().to_string(), modified));
        }
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(entries.into_iter().map(|(id, _)| id).collect())
    }
}

/// Held for the lifetime of the owning process; the advisory lock is
/// released on drop.
pub struct SessionLock {
    file: File,
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = fs4::fs_std::FileExt::unlock(&self.file);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use yawl_model::Message;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        (dir, store)
    }

    fn doc(id: &str) -> SessionDocument {
        let now = Utc::now();
        SessionDocument {
            id: id.into(),
            created_at: now,
            updated_at: now,
            provider: "mock".into(),
            model: "mock-model".into(),
            config: serde_json::json!({"max_iterations": 25}),
            messages: vec![
                Message::system("sys"),
                Message::user("hello"),
                Message::assistant("hi"),
            ],
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let (_d, s) = store();
        let d = doc("s1");
        s.save(&d).unwrap();
        let loaded = s.load("s1").unwrap();
        assert_eq!(loaded.id, "s1");
        assert_eq!(loaded.messages, d.messages);
        assert_eq!(loaded.config["max_iterations"], 25);
    }

    #[test]
    fn persisted_bytes_are_stable_across_reload() {
        let (_d, s) = store();
        s.save(&doc("s1")).unwrap();
        let first = std::fs::read(s.conversation_path("s1")).unwrap();
        let loaded = s.load("s1").unwrap();
        s.save(&loaded).unwrap();
        let second = std::fs::read(s.conversation_path("s1")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn save_leaves_no_temp_file() {
        let (_d, s) = store();
        s.save(&doc("s1")).unwrap();
        assert!(!s.session_dir("s1").join(".conversation.json.tmp").exists());
    }

    #[test]
    fn interrupted_write_preserves_previous_version() {
        let (_d, s) = store();
        s.save(&doc("s1")).unwrap();
        // Simulate a crash mid-write: a torn temp file next to the target.
        std::fs::write(
            s.session_dir("s1").join(".conversation.json.tmp"),
            b"{\"id\": \"s1\", \"trunca",
        )
        .unwrap();
        let loaded = s.load("s1").unwrap();
        assert_eq!(loaded.messages.len(), 3);
    }

    #[test]
    fn load_missing_session_is_not_found() {
        let (_d, s) = store();
        assert!(matches!(s.load("ghost"), Err(PersistError::NotFound(_))));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let (_d, s) = store();
        s.create_dirs("s1").unwrap();
        std::fs::write(s.conversation_path("s1"), b"not json").unwrap();
        assert!(matches!(s.load("s1"), Err(PersistError::Corrupt(_))));
    }

    #[test]
    fn lock_is_exclusive_within_process() {
        let (_d, s) = store();
        let _held = s.lock("s1").unwrap();
        assert!(matches!(s.lock("s1"), Err(PersistError::Locked(_))));
    }

    #[test]
    fn lock_releases_on_drop() {
        let (_d, s) = store();
        {
            let _held = s.lock("s1").unwrap();
        }
        assert!(s.lock("s1").is_ok());
    }

    #[test]
    fn list_returns_saved_sessions() {
        let (_d, s) = store();
        s.save(&doc("aaa")).unwrap();
        s.save(&doc("bbb")).unwrap();
        let mut ids = s.list().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["aaa", "bbb"]);
    }
}
