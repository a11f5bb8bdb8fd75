// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
//! Chunked persistence for oversized tool outputs.
//!
//! Outputs up to the inline threshold pass through verbatim.  Anything
//! larger is persisted under `<session_dir>/tool_results/<call-id>` and the
//! model receives a preview plus a marker naming the call id and the
//! retrieval operation.  Persisted bytes are immutable: written once at
//! spill time, read-only afterwards.

use std::path::{Path, PathBuf};

/// Outputs at or below this many bytes are embedded verbatim.
pub const INLINE_THRESHOLD: usize = 8192;
/// Preview size prepended to the stored-marker for spilled outputs.
pub const PREVIEW_BYTES: usize = 8192;
/// Upper bound on a single retrieval chunk.
pub const MAX_CHUNK_BYTES: usize = 32768;
/// Lines longer than this are soft-wrapped at word boundaries before
/// persistence (pathological single-line payloads tokenize badly).
const WRAP_LINE_BYTES: usize = 1024;

/// Name of the built-in retrieval tool, referenced in the stored marker.
pub const RETRIEVAL_TOOL: &str = "read_tool_result";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no stored result for call id '{call_id}'")]
    NotFound { call_id: String },
    #[error("offset {offset} is out of range; valid offsets are 0..{total}")]
    InvalidOffset { offset: usize, total: usize },
    #[error("stored result belongs to session '{expected}', access from '{requested}' denied")]
    SessionMismatch { expected: String, requested: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One retrieved byte range of a stored result.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub content: String,
    pub offset: usize,
    pub length: usize,
    pub total_length: usize,
    pub has_more: bool,
    pub next_offset: Option<usize>,
}

pub struct ToolResultStore {
    session_id: String,
    dir: PathBuf,
}

impl ToolResultStore {
    pub fn new(session_id: impl Into<String>, session_dir: &Path) -> Self {
        Self {
            session_id: session_id.into(),
            dir: session_dir.join("tool_results"),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn stored_path(&self, call_id: &str) -> PathBuf {
        self.dir.join(sanitize_call_id(call_id))
    }

    /// Identity for outputs within the inline threshold; spill + preview for
    /// anything larger.  The returned string is what the model sees.
    pub fn process_result(&self, call_id: &str, output: &str) -> std::io::Result<String> {
        if output.len() <= INLINE_THRESHOLD {
            return Ok(output.to_string());
        }

        let wrapped = soft_wrap(output, WRAP_LINE_BYTES);
        let was_wrapped = wrapped != output;
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.stored_path(call_id), wrapped.as_bytes())?;

        let total = wrapped.len();
        let cut = floor_char_boundary(&wrapped, PREVIEW_BYTES);
        let remaining = total - cut;
        let wrap_note = if was_wrapped {
            " long_lines_wrapped=true"
        } else {
            ""
        };
        Ok(format!(
            "{}\n[stored_result call_id={call_id} total_bytes={total} shown_bytes={cut} \
             remaining_bytes={remaining}{wrap_note}]\n\
             [retrieve more with the {RETRIEVAL_TOOL} tool: \
             {{\"call_id\": \"{call_id}\", \"offset\": {cut}, \"length\": {PREVIEW_BYTES}}}]",
            &wrapped[..cut]
        ))
    }

    /// Read one byte range of a stored result.
    ///
    /// `session_id` must match the owning session; `offset` must lie in
    /// `[0, total)`; `length` is clamped to [`MAX_CHUNK_BYTES`].
    pub fn retrieve_chunk(
        &self,
        call_id: &str,
        session_id: &str,
        offset: usize,
        length: usize,
    ) -> Result<Chunk, StoreError> {
        if session_id != self.session_id {
            return Err(StoreError::SessionMismatch {
                expected: self.session_id.clone(),
                requested: session_id.to_string(),
            });
        }
        let path = self.stored_path(call_id);
        if !path.is_file() {
            return Err(StoreError::NotFound {
                call_id: call_id.to_string(),
            });
        }
        let bytes = std::fs::read(&path)?;
        let total = bytes.len();
        if offset >= total {
            return Err(StoreError::InvalidOffset { offset, total });
        }
        let length = length.clamp(1, MAX_CHUNK_BYTES);
        let end = (offset + length).min(total);
        let content = String::from_utf8_lossy(&bytes[offset..end]).into_owned();
        let has_more = end < total;
        Ok(Chunk {
            content,
            offset,
            length: end - offset,
            total_length: total,
            has_more,
            next_offset: has_more.then_some(end),
        })
    }
}

/// Call ids come from the provider and land in filenames; keep only
/// filesystem-safe characters.
fn sanitize_call_id(call_id: &str) -> String {
    call_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Largest index `<= max` that is a char boundary of `s`.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut i = max;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Soft-wrap lines longer than `width` bytes at word boundaries; a single
/// word longer than the width is hard-broken at a char boundary.
fn soft_wrap(text: &str, width: usize) -> String {
    if text.lines().all(|l| l.len() <= width) {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len() + 64);
    let mut first = true;
    for line in text.split('\n') {
        if !first {
            out.push('\n');
        }
        first = false;
        if line.len() <= width {
            out.push_str(line);
            continue;
        }
        let mut rest = line;
        while rest.len() > width {
            let window_end = floor_char_boundary(rest, width);
            let break_at = rest[..window_end]
                .rfind(char::is_whitespace)
                .map(|i| i + 1)
                .unwrap_or(window_end);
            out.push_str(rest[..break_at].trim_end());
            out.push('\n');
            rest = &rest[break_at..];
        }
        out.push_str(rest);
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ToolResultStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ToolResultStore::new("sess-1", dir.path());
        (dir, store)
    }

    /// Payload of exactly `total` bytes made of sub-wrap-width lines, so the
    /// stored bytes equal the raw output and byte arithmetic stays exact.
    fn lined(total: usize) -> String {
        let mut s = String::new();
        while s.len() < total {
            let remaining = total - s.len();
            if remaining <= 1000 {
                s.push_str(&"a".repeat(remaining));
            } else {
                s.push_str(&"a".repeat(999));
                s.push('\n');
            }
        }
        s
    }

    // ── process_result boundaries ─────────────────────────────────────────────

    #[test]
    fn small_output_is_identity() {
        let (_d, s) = store();
        let out = "x".repeat(100);
        assert_eq!(s.process_result("c1", &out).unwrap(), out);
    }

    #[test]
    fn zero_length_output_passes_through_without_marker() {
        let (_d, s) = store();
        let processed = s.process_result("c1", "").unwrap();
        assert_eq!(processed, "");
        assert!(!s.stored_path("c1").exists());
    }

    #[test]
    fn exactly_threshold_stays_inline() {
        let (_d, s) = store();
        let out = "a".repeat(INLINE_THRESHOLD);
        let processed = s.process_result("c1", &out).unwrap();
        assert_eq!(processed, out);
        assert!(!s.stored_path("c1").exists());
    }

    #[test]
    fn one_byte_over_threshold_spills() {
        let (_d, s) = store();
        let out = lined(INLINE_THRESHOLD + 1);
        let processed = s.process_result("c1", &out).unwrap();
        assert!(processed.contains("stored_result call_id=c1"));
        assert!(processed.contains("total_bytes=8193"));
        assert!(processed.contains("remaining_bytes=1"));
        assert!(s.stored_path("c1").exists());
    }

    #[test]
    fn spilled_file_holds_full_payload() {
        let (_d, s) = store();
        let out = lined(50_000);
        s.process_result("big", &out).unwrap();
        let on_disk = std::fs::read(s.stored_path("big")).unwrap();
        assert_eq!(on_disk.len(), 50_000);
    }

    #[test]
    fn marker_names_retrieval_tool_and_call_id() {
        let (_d, s) = store();
        let out = "c".repeat(20_000);
        let processed = s.process_result("call-42", &out).unwrap();
        assert!(processed.contains(RETRIEVAL_TOOL));
        assert!(processed.contains("\"call_id\": \"call-42\""));
        assert!(processed.contains("\"offset\": 8192"));
    }

    // ── retrieve_chunk ────────────────────────────────────────────────────────

    #[test]
    fn chunks_are_byte_identical_and_sum_to_total() {
        let (_d, s) = store();
        let out: String = (0..500).map(|i| format!("{i:0>99}\n")).collect();
        assert_eq!(out.len(), 50_000);
        s.process_result("c", &out).unwrap();

        let mut reassembled = String::new();
        let mut offset = 0;
        let mut summed = 0;
        loop {
            let chunk = s.retrieve_chunk("c", "sess-1", offset, 8192).unwrap();
            assert_eq!(chunk.offset, offset);
            summed += chunk.length;
            reassembled.push_str(&chunk.content);
            match chunk.next_offset {
                Some(next) => offset = next,
                None => break,
            }
        }
        assert_eq!(reassembled, out);
        assert_eq!(summed, out.len());
    }

    #[test]
    fn first_chunk_reports_next_offset() {
        let (_d, s) = store();
        let out = lined(50_000);
        s.process_result("c", &out).unwrap();
        let chunk = s.retrieve_chunk("c", "sess-1", 8192, 8192).unwrap();
        assert_eq!(chunk.length, 8192);
        assert_eq!(chunk.next_offset, Some(16384));
        assert!(chunk.has_more);
    }

    #[test]
    fn last_byte_chunk_has_no_more() {
        let (_d, s) = store();
        let out = lined(10_000);
        s.process_result("c", &out).unwrap();
        let chunk = s.retrieve_chunk("c", "sess-1", 9_999, MAX_CHUNK_BYTES).unwrap();
        assert_eq!(chunk.length, 1);
        assert!(!chunk.has_more);
        assert_eq!(chunk.next_offset, None);
    }

    #[test]
    fn offset_at_total_is_invalid() {
        let (_d, s) = store();
        let out = lined(10_000);
        s.process_result("c", &out).unwrap();
        match s.retrieve_chunk("c", "sess-1", 10_000, 10) {
            Err(StoreError::InvalidOffset { offset, total }) => {
                assert_eq!(offset, 10_000);
                assert_eq!(total, 10_000);
            }
            other => panic!("expected InvalidOffset, got {other:?}"),
        }
    }

    #[test]
    fn chunk_length_is_capped() {
        let (_d, s) = store();
        let out = lined(100_000);
        s.process_result("c", &out).unwrap();
        let chunk = s.retrieve_chunk("c", "sess-1", 0, 1_000_000).unwrap();
        assert_eq!(chunk.length, MAX_CHUNK_BYTES);
    }

    #[test]
    fn cross_session_access_is_denied() {
        let (_d, s) = store();
        let out = lined(10_000);
        s.process_result("c", &out).unwrap();
        assert!(matches!(
            s.retrieve_chunk("c", "some-other-session", 0, 100),
            Err(StoreError::SessionMismatch { .. })
        ));
    }

    #[test]
    fn unknown_call_id_is_not_found() {
        let (_d, s) = store();
        assert!(matches!(
            s.retrieve_chunk("nope", "sess-1", 0, 100),
            Err(StoreError::NotFound { .. })
        ));
    }

    // ── soft wrapping ─────────────────────────────────────────────────────────

    #[test]
    fn short_lines_survive_unwrapped() {
        let text = "short line\nanother short line";
        assert_eq!(soft_wrap(text, 1024), text);
    }

    #[test]
    fn long_line_wraps_at_word_boundary() {
        let long = format!("{} tail", "word ".repeat(400));
        let wrapped = soft_wrap(&long, 1024);
        assert!(wrapped.lines().all(|l| l.len() <= 1024));
        // No words were lost
        assert_eq!(
            wrapped.split_whitespace().count(),
            long.split_whitespace().count()
        );
    }

    #[test]
    fn unbroken_run_is_hard_wrapped() {
        let long = "x".repeat(3000);
        let wrapped = soft_wrap(&long, 1024);
        assert!(wrapped.lines().all(|l| l.len() <= 1024));
        assert_eq!(wrapped.replace('\n', ""), long);
    }

    #[test]
    fn call_id_is_sanitized_for_filenames() {
        assert_eq!(sanitize_call_id("call/../../etc"), "call_.._.._etc");
        assert_eq!(sanitize_call_id("toolu_01AbC"), "toolu_01AbC");
    }
}
