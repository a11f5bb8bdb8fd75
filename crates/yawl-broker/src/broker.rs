// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use fs4::fs_std::FileExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::protocol::{decode_line, encode_line, BrokerMessage};
use crate::spawn::pid_alive;

/// Per-session rendezvous directory under the temp root.
pub fn rendezvous_dir(session: &str) -> PathBuf {
    std::env::temp_dir().join(format!("yawl-broker-{session}"))
}

/// Allocate the next agent id from the session-scoped counter file,
/// serialized by an advisory lock so concurrent spawns never collide.
pub fn allocate_agent_id(dir: &Path) -> std::io::Result<u32> {
    std::fs::create_dir_all(dir)?;
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(dir.join("agents.seq"))?;
    file.lock_exclusive()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    let next = contents.trim().parse::<u32>().unwrap_or(0) + 1;
    file.seek(SeekFrom::Start(0))?;
    file.set_len(0)?;
    write!(file, "{next}")?;
    let _ = FileExt::unlock(&file);
    Ok(next)
}

struct AgentHandle {
    pid: u32,
    writer: OwnedWriteHalf,
}

/// Coordinator side of the rendezvous.
///
/// Owns the routing state; message bodies flow through the event channel to
/// whatever drives the coordinator (the delegation tool, a supervisor loop).
pub struct Broker {
    dir: PathBuf,
    agents: Arc<Mutex<HashMap<u32, AgentHandle>>>,
}

impl Broker {
    /// Bind the session socket and start accepting sub-agent connections.
    /// Returns the broker plus the stream of incoming messages (connects,
    /// statuses, completions, blocks).
    pub async fn bind(session: &str) -> anyhow::Result<(Self, mpsc::Receiver<BrokerMessage>)> {
        let dir = rendezvous_dir(session);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating rendezvous dir {}", dir.display()))?;
        let sock_path = dir.join("broker.sock");
        // A stale socket from a dead coordinator blocks bind; remove it.
        if sock_path.exists() {
            let _ = std::fs::remove_file(&sock_path);
        }
        let listener = UnixListener::bind(&sock_path)
            .with_context(|| format!("binding {}", sock_path.display()))?;

        let agents: Arc<Mutex<HashMap<u32, AgentHandle>>> = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::channel::<BrokerMessage>(64);

        let accept_agents = Arc::clone(&agents);
        let record_dir = dir.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "broker accept failed; stopping");
                        break;
                    }
                };
                let agents = Arc::clone(&accept_agents);
                let events = event_tx.clone();
                let record_dir = record_dir.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, agents, events, record_dir).await {
                        debug!(error = %e, "sub-agent connection ended with error");
                    }
                });
            }
        });

        Ok((Self { dir, agents }, event_rx))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Delegate a task to a connected sub-agent.
    pub async fn send_task(&self, agent_id: u32, prompt: impl Into<String>) -> anyhow::Result<()> {
        let line = encode_line(&BrokerMessage::Task {
            agent_id,
            prompt: prompt.into(),
        })?;
        let mut agents = self.agents.lock().await;
        let handle = agents
            .get_mut(&agent_id)
            .with_context(|| format!("no connected sub-agent with id {agent_id}"))?;
        handle.writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Ids of currently connected sub-agents, sorted.
    pub async fn connected(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.agents.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Drop registrations whose process died without disconnecting.
    pub async fn reap_dead(&self) -> Vec<u32> {
        let mut agents = self.agents.lock().await;
        let dead: Vec<u32> = agents
            .iter()
            .filter(|(_, h)| !pid_alive(h.pid))
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            warn!(agent_id = id, "reaping dead sub-agent");
            agents.remove(id);
            let _ = std::fs::remove_file(self.dir.join(format!("agent-{id}.json")));
        }
        dead
    }

    /// Coordinator shutdown: tell every sub-agent to disconnect.
    pub async fn shutdown(&self) {
        let mut agents = self.agents.lock().await;
        for (id, handle) in agents.iter_mut() {
            if let Ok(line) = encode_line(&BrokerMessage::Disconnect { agent_id: *id }) {
                let _ = handle.writer.write_all(line.as_bytes()).await;
            }
        }
        agents.clear();
    }
}

async fn handle_connection(
    stream: UnixStream,
    agents: Arc<Mutex<HashMap<u32, AgentHandle>>>,
    events: mpsc::Sender<BrokerMessage>,
    record_dir: PathBuf,
) -> anyhow::Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // First frame must be the registration.
    let first = lines
        .next_line()
        .await?
        .context("connection closed before registration")?;
    let (agent_id, pid) = match decode_line(&first)? {
        BrokerMessage::Connect { agent_id, pid } => (agent_id, pid),
        other => anyhow::bail!("expected connect, got {other:?}"),
    };
    debug!(agent_id, pid, "sub-agent connected");

    // Connection record: lets the coordinator (and debugging humans) see
    // who is attached without walking socket state.
    let record = serde_json::json!({ "agent_id": agent_id, "pid": pid });
    std::fs::write(
        record_dir.join(format!("agent-{agent_id}.json")),
        record.to_string(),
    )?;

    agents.lock().await.insert(
        agent_id,
        AgentHandle {
            pid,
            writer: write_half,
        },
    );
    let _ = events.send(BrokerMessage::Connect { agent_id, pid }).await;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match decode_line(&line) {
            Ok(BrokerMessage::Disconnect { .. }) => break,
            Ok(msg) => {
                let _ = events.send(msg).await;
            }
            Err(e) => warn!(agent_id, error = %e, "undecodable frame from sub-agent"),
        }
    }

    debug!(agent_id, "sub-agent disconnected");
    agents.lock().await.remove(&agent_id);
    let _ = std::fs::remove_file(record_dir.join(format!("agent-{agent_id}.json")));
    let _ = events.send(BrokerMessage::Disconnect { agent_id }).await;
    Ok(())
}

/// Sub-agent side of the rendezvous.
pub struct BrokerClient {
    agent_id: u32,
    lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl BrokerClient {
    /// Connect to the session's coordinator and register.
    pub async fn connect(session: &str, agent_id: u32, pid: u32) -> anyhow::Result<Self> {
        let sock_path = rendezvous_dir(session).join("broker.sock");
        let stream = UnixStream::connect(&sock_path)
            .await
            .with_context(|| format!("connecting to {}", sock_path.display()))?;
        let (read_half, mut write_half) = stream.into_split();
        let line = encode_line(&BrokerMessage::Connect { agent_id, pid })?;
        write_half.write_all(line.as_bytes()).await?;
        Ok(Self {
            agent_id,
            lines: BufReader::new(read_half).lines(),
            writer: write_half,
        })
    }

    pub fn agent_id(&self) -> u32 {
        self.agent_id
    }

    /// Block until the coordinator delegates a task.  Returns `None` on
    /// disconnect (explicit or socket close).
    pub async fn next_task(&mut self) -> anyhow::Result<Option<String>> {
        while let Some(line) = self.lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match decode_line(&line)? {
                BrokerMessage::Task { prompt, .. } => return Ok(Some(prompt)),
                BrokerMessage::Disconnect { .. } => return Ok(None),
                other => debug!(agent_id = self.agent_id, "ignoring frame: {other:?}"),
            }
        }
        Ok(None)
    }

    async fn send(&mut self, msg: &BrokerMessage) -> anyhow::Result<()> {
        let line = encode_line(msg)?;
        self.writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    pub async fn send_status(&mut self, note: impl Into<String>) -> anyhow::Result<()> {
        self.send(&BrokerMessage::Status {
            agent_id: self.agent_id,
            note: note.into(),
        })
        .await
    }

    pub async fn send_completed(&mut self, summary: Option<String>) -> anyhow::Result<()> {
        self.send(&BrokerMessage::Completed {
            agent_id: self.agent_id,
            summary,
        })
        .await
    }

    pub async fn send_blocked(&mut self, reason: impl Into<String>) -> anyhow::Result<()> {
        self.send(&BrokerMessage::Blocked {
            agent_id: self.agent_id,
            reason: reason.into(),
        })
        .await
    }

    pub async fn disconnect(mut self) -> anyhow::Result<()> {
        let msg = BrokerMessage::Disconnect {
            agent_id: self.agent_id,
        };
        self.send(&msg).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
