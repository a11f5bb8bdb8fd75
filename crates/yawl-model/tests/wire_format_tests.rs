// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
//! Wire-format tests: spin up a minimal HTTP/1.1 mock server, point each
//! driver at it, issue a `CompletionRequest`, and assert both the HTTP
//! request the driver sent and the `ResponseEvent`s it emitted.
//!
//! These tests run without API keys and without external network access.
//! They exercise the full driver pipeline: serialisation → HTTP → SSE
//! decoding → event normalization.

use std::collections::HashMap;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use yawl_config::ModelConfig;
use yawl_model::{
    from_config, CompletionRequest, Message, ModelError, ResponseEvent, StopReason, ToolSchema,
};

// ── Minimal HTTP/1.1 mock server ──────────────────────────────────────────────

#[derive(Debug)]
struct CapturedRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Value,
}

/// Bind a one-shot HTTP/1.1 mock server on a random loopback port.  It
/// accepts exactly one request, captures it, and replies with the given
/// status + body.
async fn mock_server_once(
    status: u16,
    content_type: &'static str,
    resp_body: impl Into<String> + Send + 'static,
) -> (u16, tokio::sync::oneshot::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = tokio::sync::oneshot::channel::<CapturedRequest>();

    tokio::spawn(async move {
        let resp_body: String = resp_body.into();
        let (stream, _) = listener.accept().await.expect("accept");
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let mut request_line = String::new();
        reader.read_line(&mut request_line).await.unwrap();
        let request_line = request_line.trim().to_string();
        let mut parts = request_line.splitn(3, ' ');
        let method = parts.next().unwrap_or("").to_string();
        let path = parts.next().unwrap_or("").to_string();

        let mut headers: HashMap<String, String> = HashMap::new();
        let mut content_length: usize = 0;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }
            if let Some((k, v)) = trimmed.split_once(": ") {
                let key = k.to_lowercase();
                if key == "content-length" {
                    content_length = v.parse().unwrap_or(0);
                }
                headers.insert(key, v.to_string());
            }
        }

        let mut body_bytes = vec![0u8; content_length];
        reader.read_exact(&mut body_bytes).await.unwrap();
        let body: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

        let _ = tx.send(CapturedRequest {
            method,
            path,
            headers,
            body,
        });

        let http_resp = format!(
            "HTTP/1.1 {status} OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            resp_body.len(),
            resp_body,
        );
        let _ = write_half.write_all(http_resp.as_bytes()).await;
    });

    (port, rx)
}

/// Build a minimal SSE body from a list of `data:` payloads, appending
/// `data: [DONE]\n\n` automatically (chat-completions framing).
fn sse_body(events: &[&str]) -> String {
    let mut s = events
        .iter()
        .map(|e| format!("data: {e}\n\n"))
        .collect::<String>();
    s.push_str("data: [DONE]\n\n");
    s
}

async fn collect_events(
    cfg: &ModelConfig,
    req: CompletionRequest,
) -> Result<Vec<ResponseEvent>, ModelError> {
    let provider = from_config(cfg).unwrap();
    let mut stream = provider.complete(req).await?;
    let mut events = Vec::new();
    while let Some(ev) = stream.next().await {
        events.push(ev?);
    }
    Ok(events)
}

fn openai_cfg(port: u16) -> ModelConfig {
    ModelConfig {
        provider: "openai".into(),
        name: "gpt-4o-mini".into(),
        api_key: Some("sk-test".into()),
        base_url: Some(format!("http://127.0.0.1:{port}/v1")),
        idle_timeout_secs: 5,
        request_timeout_secs: 10,
        ..Default::default()
    }
}

fn anthropic_cfg(port: u16) -> ModelConfig {
    ModelConfig {
        provider: "anthropic".into(),
        name: "claude-sonnet-4-20250514".into(),
        api_key: Some("sk-ant-test".into()),
        base_url: Some(format!("http://127.0.0.1:{port}")),
        idle_timeout_secs: 5,
        request_timeout_secs: 10,
        ..Default::default()
    }
}

fn simple_request() -> CompletionRequest {
    CompletionRequest {
        messages: vec![Message::system("be brief"), Message::user("Say HELLO")],
        tools: vec![],
        stream: true,
    }
}

fn tool_schema() -> ToolSchema {
    ToolSchema {
        name: "list_dir".into(),
        description: "List a directory".into(),
        parameters: json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        }),
    }
}

// ── OpenAI-compatible dialect ─────────────────────────────────────────────────

#[tokio::test]
async fn openai_request_body_and_headers() {
    let sse = sse_body(&[r#"{"choices":[{"delta":{"content":"hi"}}]}"#]);
    let (port, req_rx) = mock_server_once(200, "text/event-stream", sse).await;

    let mut req = simple_request();
    req.tools.push(tool_schema());
    let events = collect_events(&openai_cfg(port), req).await.unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, ResponseEvent::TextDelta(t) if t == "hi")));

    let captured = req_rx.await.unwrap();
    assert_eq!(captured.method, "POST");
    assert_eq!(captured.path, "/v1/chat/completions");
    assert_eq!(
        captured.headers.get("authorization").map(String::as_str),
        Some("Bearer sk-test")
    );
    assert_eq!(captured.body["model"], "gpt-4o-mini");
    assert_eq!(captured.body["stream"], true);
    assert_eq!(captured.body["stream_options"]["include_usage"], true);
    assert_eq!(captured.body["tool_choice"], "auto");
    assert_eq!(captured.body["messages"][0]["role"], "system");
    assert_eq!(captured.body["messages"][1]["content"], "Say HELLO");
    let tool = &captured.body["tools"][0];
    assert_eq!(tool["type"], "function");
    assert_eq!(tool["function"]["name"], "list_dir");
    assert_eq!(tool["function"]["parameters"]["required"][0], "path");
}

#[tokio::test]
async fn openai_streams_tool_call_and_usage() {
    let sse = sse_body(&[
        r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"list_dir","arguments":"{\"path\""}}]}}]}"#,
        r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":":\".\"}"}}]}}]}"#,
        r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        r#"{"choices":[],"usage":{"prompt_tokens":20,"completion_tokens":7}}"#,
    ]);
    let (port, _req_rx) = mock_server_once(200, "text/event-stream", sse).await;

    let events = collect_events(&openai_cfg(port), simple_request())
        .await
        .unwrap();

    let finished = events
        .iter()
        .find_map(|e| match e {
            ResponseEvent::ToolCallFinished {
                id,
                name,
                arguments,
                malformed,
            } => Some((id.clone(), name.clone(), arguments.clone(), *malformed)),
            _ => None,
        })
        .expect("a finished tool call");
    assert_eq!(finished.0, "call_1");
    assert_eq!(finished.1, "list_dir");
    assert_eq!(finished.2["path"], ".");
    assert!(!finished.3);

    assert!(events
        .iter()
        .any(|e| matches!(e, ResponseEvent::Stop(StopReason::ToolCalls))));
    assert!(events.iter().any(|e| matches!(
        e,
        ResponseEvent::Usage {
            input_tokens: 20,
            output_tokens: 7
        }
    )));
    assert!(matches!(events.last(), Some(ResponseEvent::Done)));
}

#[tokio::test]
async fn openai_auth_failure_maps_to_auth_error() {
    let (port, _req_rx) =
        mock_server_once(401, "application/json", r#"{"error":"bad key"}"#).await;
    let err = collect_events(&openai_cfg(port), simple_request())
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::Auth(_)));
}

#[tokio::test]
async fn openai_client_error_maps_to_http_error() {
    let (port, _req_rx) =
        mock_server_once(400, "application/json", r#"{"error":"bad request"}"#).await;
    let err = collect_events(&openai_cfg(port), simple_request())
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::Http { status: 400, .. }));
}

// ── Anthropic Messages dialect ────────────────────────────────────────────────

fn anthropic_sse(events: &[&str]) -> String {
    // Anthropic frames with event: + data: lines; the decoder keys off the
    // data payload's type field.
    let mut s = String::new();
    for e in events {
        let v: Value = serde_json::from_str(e).unwrap();
        s.push_str(&format!(
            "event: {}\ndata: {}\n\n",
            v["type"].as_str().unwrap_or("message"),
            e
        ));
    }
    s
}

#[tokio::test]
async fn anthropic_request_body_and_headers() {
    let sse = anthropic_sse(&[
        r#"{"type":"message_start","message":{"usage":{"input_tokens":12}}}"#,
        r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"HELLO"}}"#,
        r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":3}}"#,
        r#"{"type":"message_stop"}"#,
    ]);
    let (port, req_rx) = mock_server_once(200, "text/event-stream", sse).await;

    let mut req = simple_request();
    req.tools.push(tool_schema());
    let events = collect_events(&anthropic_cfg(port), req).await.unwrap();

    let captured = req_rx.await.unwrap();
    assert_eq!(captured.path, "/v1/messages");
    assert_eq!(
        captured.headers.get("x-api-key").map(String::as_str),
        Some("sk-ant-test")
    );
    assert_eq!(
        captured.headers.get("anthropic-version").map(String::as_str),
        Some("2023-06-01")
    );
    // System prompt lifted out of the messages array.
    assert_eq!(captured.body["system"], "be brief");
    assert_eq!(captured.body["messages"][0]["role"], "user");
    // Tool schema mapped to input_schema.
    assert_eq!(captured.body["tools"][0]["input_schema"]["required"][0], "path");
    assert!(captured.body["tools"][0].get("parameters").is_none());

    assert!(events
        .iter()
        .any(|e| matches!(e, ResponseEvent::TextDelta(t) if t == "HELLO")));
    assert!(events
        .iter()
        .any(|e| matches!(e, ResponseEvent::Stop(StopReason::Stop))));
    assert!(matches!(events.last(), Some(ResponseEvent::Done)));
}

#[tokio::test]
async fn anthropic_tool_use_round_trip() {
    let sse = anthropic_sse(&[
        r#"{"type":"message_start","message":{"usage":{"input_tokens":30}}}"#,
        r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_9","name":"list_dir"}}"#,
        r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"path\":\".\"}"}}"#,
        r#"{"type":"content_block_stop","index":0}"#,
        r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":11}}"#,
        r#"{"type":"message_stop"}"#,
    ]);
    let (port, _req_rx) = mock_server_once(200, "text/event-stream", sse).await;

    let events = collect_events(&anthropic_cfg(port), simple_request())
        .await
        .unwrap();

    assert!(events.iter().any(
        |e| matches!(e, ResponseEvent::ToolCallStarted { id, name } if id == "toolu_9" && name == "list_dir")
    ));
    let args = events
        .iter()
        .find_map(|e| match e {
            ResponseEvent::ToolCallFinished { arguments, malformed, .. } => {
                assert!(!malformed);
                Some(arguments.clone())
            }
            _ => None,
        })
        .expect("finished tool call");
    assert_eq!(args["path"], ".");
    assert!(events
        .iter()
        .any(|e| matches!(e, ResponseEvent::Stop(StopReason::ToolCalls))));
}

#[tokio::test]
async fn anthropic_tool_results_sent_as_user_blocks() {
    let sse = anthropic_sse(&[r#"{"type":"message_stop"}"#]);
    let (port, req_rx) = mock_server_once(200, "text/event-stream", sse).await;

    let req = CompletionRequest {
        messages: vec![
            Message::user("What files are in .?"),
            Message::tool_call("toolu_9", "list_dir", &json!({"path": "."})),
            Message::tool_result("toolu_9", "a\nb\nc", false),
        ],
        tools: vec![],
        stream: true,
    };
    collect_events(&anthropic_cfg(port), req).await.unwrap();

    let captured = req_rx.await.unwrap();
    let messages = captured.body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["content"][0]["type"], "tool_use");
    assert_eq!(messages[2]["role"], "user");
    let result_block = &messages[2]["content"][0];
    assert_eq!(result_block["type"], "tool_result");
    assert_eq!(result_block["tool_use_id"], "toolu_9");
    assert_eq!(result_block["content"], "a\nb\nc");
}

#[tokio::test]
async fn rate_limit_carries_retry_after_classification() {
    // 429 is retryable; the driver retries up to its attempt cap, so serve
    // the error from a server that answers every connection.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 65536];
                let _ = stream.read(&mut buf).await;
                let body = r#"{"error":"slow down"}"#;
                let resp = format!(
                    "HTTP/1.1 429 Too Many Requests\r\nContent-Type: application/json\r\nretry-after: 0\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(resp.as_bytes()).await;
            });
        }
    });

    let err = collect_events(&openai_cfg(port), simple_request())
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::RateLimited { .. }));
}
