// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
//! SSE plumbing shared by the provider adapters.
//!
//! SSE events can be split across TCP packets, so a line buffer is carried
//! across chunks and only complete `\n`-terminated lines reach the decoder.
//! Each adapter supplies a stateful [`SseDecoder`] that owns the partial
//! tool-argument buffers; `decode_sse` turns an HTTP response into the
//! uniform event stream, applying the inactivity cap on top.

use std::collections::VecDeque;
use std::time::Duration;

use futures::StreamExt;

use crate::{error::ModelError, provider::EventStream, ResponseEvent};

/// A stateful per-stream decoder.  `decode_line` receives every complete
/// line; `finish` runs when the body ends so pending state can be flushed.
pub(crate) trait SseDecoder: Send + 'static {
    fn decode_line(&mut self, line: &str) -> Vec<Result<ResponseEvent, ModelError>>;
    fn finish(&mut self) -> Vec<Result<ResponseEvent, ModelError>>;
}

/// Drain all complete `\n`-terminated lines from `buf`, leaving any trailing
/// partial line in place for the next chunk.  Strips a Windows-style `\r`.
pub(crate) fn drain_complete_lines(buf: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        lines.push(line);
    }
    lines
}

/// Check an HTTP response, mapping error statuses (and a `retry-after`
/// header, when present) into the classified [`ModelError`].
pub(crate) async fn check_response(
    result: Result<reqwest::Response, reqwest::Error>,
) -> Result<reqwest::Response, ModelError> {
    let resp = result?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = resp.text().await.unwrap_or_default();
    Err(ModelError::from_status(status.as_u16(), body, retry_after))
}

struct DecodeState<D> {
    inner: futures::stream::BoxStream<'static, Result<Vec<u8>, ModelError>>,
    buf: String,
    decoder: D,
    pending: VecDeque<Result<ResponseEvent, ModelError>>,
    done: bool,
}

/// Turn a streaming HTTP response into the uniform event stream.
///
/// `idle_timeout` bounds the gap between consecutive events; zero disables
/// the inactivity cap.
pub(crate) fn decode_sse<D: SseDecoder>(
    resp: reqwest::Response,
    decoder: D,
    idle_timeout: Duration,
) -> EventStream {
    let raw = resp
        .bytes_stream()
        .map(|chunk| {
            chunk
                .map(|b| b.to_vec())
                .map_err(|e| ModelError::Transport(e.to_string()))
        })
        .boxed();

    let stream = futures::stream::unfold(
        DecodeState {
            inner: raw,
            buf: String::new(),
            decoder,
            pending: VecDeque::new(),
            done: false,
        },
        |mut st| async move {
            loop {
                if let Some(ev) = st.pending.pop_front() {
                    return Some((ev, st));
                }
                if st.done {
                    return None;
                }
                match st.inner.next().await {
                    Some(Ok(bytes)) => {
                        st.buf.push_str(&String::from_utf8_lossy(&bytes));
                        for line in drain_complete_lines(&mut st.buf) {
                            st.pending.extend(st.decoder.decode_line(&line));
                        }
                    }
                    Some(Err(e)) => {
                        st.done = true;
                        st.pending.push_back(Err(e));
                    }
                    None => {
                        st.done = true;
                        st.pending.extend(st.decoder.finish());
                    }
                }
            }
        },
    );

    if idle_timeout.is_zero() {
        return Box::pin(stream);
    }

    let secs = idle_timeout.as_secs();
    let timed = tokio_stream::StreamExt::timeout(stream, idle_timeout).map(move |item| {
        item.unwrap_or_else(|_| {
            Err(ModelError::Transport(format!(
                "stream produced no data for {secs}s"
            )))
        })
    });
    Box::pin(timed)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
