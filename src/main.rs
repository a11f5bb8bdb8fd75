// Copyright (c) 2026 The yawl authors
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::io::Write as _;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use yawl_broker::BrokerClient;
use yawl_config::Config;
use yawl_core::{
    prompts, Agent, AgentEvent, PersistError, RecallTool, Session, SessionLock, SessionStore,
    TurnError,
};
use yawl_model::ModelError;
use yawl_tools::{
    FsTool, ReadToolResultTool, Redactor, ShellTool, ToolRegistry, ToolResultStore, WebFetchTool,
    WorkspaceGate,
};

// Exit codes distinguish failure classes for scripts and CI.
const EXIT_INTERNAL: i32 = 1;
const EXIT_AUTH: i32 = 2;
const EXIT_TRANSPORT: i32 = 3;
const EXIT_RATE: i32 = 4;
const EXIT_INTERRUPT: i32 = 5;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", user_facing(&e));
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

fn init_logging(verbose: u8) {
    let default = if std::env::var_os("YAWL_DEBUG").is_some() {
        "debug"
    } else {
        match verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    };
    let base = std::env::var("YAWL_LOG").unwrap_or_else(|_| default.to_string());
    let filter = EnvFilter::try_new(&base).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// One line naming the failure kind plus a short hint; verbose mode carries
/// the full diagnostic via tracing.
fn user_facing(e: &anyhow::Error) -> String {
    if let Some(turn) = e.downcast_ref::<TurnError>() {
        if let TurnError::Model(m) = turn {
            return match m {
                ModelError::Auth(_) => "authentication failed; check your API key".into(),
                ModelError::RateLimited { retry_after } => match retry_after {
                    Some(d) => format!("rate limited, retry after {}s", d.as_secs()),
                    None => "rate limited; try again shortly".into(),
                },
                ModelError::Transport(_) => "network failure talking to the provider".into(),
                other => other.to_string(),
            };
        }
        return turn.to_string();
    }
    format!("{e:#}")
}

fn exit_code_for(e: &anyhow::Error) -> i32 {
    if let Some(TurnError::Model(m)) = e.downcast_ref::<TurnError>() {
        return match m {
            ModelError::Auth(_) => EXIT_AUTH,
            ModelError::RateLimited { .. } => EXIT_RATE,
            ModelError::Transport(_) | ModelError::Http { .. } | ModelError::Protocol(_) => {
                EXIT_TRANSPORT
            }
            ModelError::Cancelled => EXIT_INTERRUPT,
        };
    }
    EXIT_INTERNAL
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    if let Some(cmd) = &cli.command {
        match cmd {
            Commands::Sessions { limit } => {
                let config = yawl_config::load(cli.config.as_deref())?;
                let store = SessionStore::new(config.session.resolve_root());
                for id in store.list()?.into_iter().take(*limit) {
                    println!("{id}");
                }
                return Ok(0);
            }
            Commands::ShowConfig => {
                let config = yawl_config::load(cli.config.as_deref())?;
                println!("{}", serde_json::to_string_pretty(&config)?);
                return Ok(0);
            }
        }
    }

    let config = Arc::new(yawl_config::load(cli.config.as_deref())?);

    // Sub-agent mode: a coordinator spawned this process and expects it to
    // join the broker session and run delegated tasks until disconnect.
    if let Ok(broker_session) = std::env::var("YAWL_BROKER_SESSION") {
        return run_subagent(&broker_session, &config).await;
    }

    run_cli(cli, config).await
}

/// Everything one session needs, wired together.
struct Runtime {
    agent: Agent,
    _lock: SessionLock,
}

fn build_runtime(
    config: &Arc<Config>,
    store: &Arc<SessionStore>,
    session: Session,
) -> anyhow::Result<Runtime> {
    let workdir = std::env::current_dir().context("resolving working directory")?;
    let session_dir = store.create_dirs(&session.id)?;
    let lock = store.lock(&session.id).map_err(|e| match e {
        PersistError::Locked(id) => {
            anyhow::anyhow!("session {id} is already in use by another process")
        }
        other => anyhow::Error::from(other),
    })?;

    let model: Arc<dyn yawl_model::ModelProvider> =
        Arc::from(yawl_model::from_config(&config.model)?);

    let gate = Arc::new(
        WorkspaceGate::new(&workdir, config.tools.unrestricted_reads)
            .context("resolving workspace root")?,
    );
    let longterm = Arc::new(yawl_core::LongTermLog::new(&session_dir));
    let result_store = Arc::new(ToolResultStore::new(session.id.clone(), &session_dir));

    let mut registry = ToolRegistry::new();
    registry.register(FsTool::new(Arc::clone(&gate)));
    registry.register(ShellTool::new(&workdir, config.tools.shell_timeout_secs));
    registry.register(WebFetchTool);
    registry.register(ReadToolResultTool::new(Arc::clone(&result_store)));
    registry.register(RecallTool::new(
        Arc::clone(&longterm),
        config.agent.recall_page_size,
    ));

    let instructions = config
        .session
        .resolve_instructions()
        .and_then(|p| match std::fs::read_to_string(&p) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(path = %p.display(), error = %e, "cannot read custom instructions");
                None
            }
        });
    let system_prompt = prompts::system_prompt(
        config.agent.system_prompt.as_deref(),
        instructions.as_deref(),
        &workdir,
    );

    let agent = Agent::new(
        model,
        Arc::new(registry),
        Arc::new(config.agent.clone()),
        session,
        Arc::clone(store),
        longterm,
        result_store,
        Redactor::new(config.tools.redaction),
        system_prompt,
    );
    Ok(Runtime {
        agent,
        _lock: lock,
    })
}

fn open_session(config: &Arc<Config>, store: &Arc<SessionStore>, cli: &Cli) -> anyhow::Result<Session> {
    let window = config.model.context_window;
    let factor = config.model.token_factor;

    if let Some(id) = cli.resume.as_deref() {
        let doc = store.load(id)?;
        debug!(session = id, messages = doc.messages.len(), "resumed session");
        return Ok(Session::resume(
            doc.id,
            doc.created_at,
            doc.messages,
            window,
            factor,
        ));
    }
    let mut session = Session::new(window, factor);
    if let Some(id) = cli.session.as_deref() {
        if !cli.new_session {
            if let Ok(doc) = store.load(id) {
                return Ok(Session::resume(
                    doc.id,
                    doc.created_at,
                    doc.messages,
                    window,
                    factor,
                ));
            }
        }
        session.id = id.to_string();
    }
    Ok(session)
}

async fn run_cli(cli: Cli, config: Arc<Config>) -> anyhow::Result<i32> {
    let store = Arc::new(SessionStore::new(config.session.resolve_root()));
    let session = open_session(&config, &store, &cli)?;
    debug!(session = %session.id, "session ready");
    let mut runtime = build_runtime(&config, &store, session)?;

    // Input source: explicit prompt, piped stdin, or the interactive loop.
    if let Some(prompt) = cli.prompt.clone() {
        return run_turn_to_stdout(&mut runtime.agent, &prompt).await;
    }
    if cli.is_headless() {
        let mut input = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut input)?;
        let input = input.trim();
        if input.is_empty() {
            anyhow::bail!("no input provided on stdin");
        }
        return run_turn_to_stdout(&mut runtime.agent, input).await;
    }

    // Interactive line loop.  The full-screen TUI is a separate front-end;
    // this reads cooked lines and streams deltas straight to stdout.
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }
        let code = run_turn_to_stdout(&mut runtime.agent, input).await?;
        if code == EXIT_INTERRUPT {
            // Cancelled turn: the partial transcript is preserved; keep going.
            continue;
        }
        if cli.once {
            return Ok(code);
        }
    }
    Ok(0)
}

/// Drive one turn: print text deltas byte-live to stdout, status lines to
/// stderr, and wire Ctrl-C to the per-turn cancel handle.
async fn run_turn_to_stdout(agent: &mut Agent, input: &str) -> anyhow::Result<i32> {
    let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);

    let printer = tokio::spawn(async move {
        let mut aborted = false;
        while let Some(ev) = rx.recv().await {
            match ev {
                AgentEvent::TextDelta(d) => {
                    print!("{d}");
                    let _ = std::io::stdout().flush();
                }
                AgentEvent::ThinkingDelta(_) => {} // hidden by default
                AgentEvent::TextComplete(_) => {}
                AgentEvent::ToolCallStarted { tool_name, .. } => {
                    eprintln!("[tool] {tool_name} ...");
                }
                AgentEvent::ToolCallFinished {
                    tool_name,
                    is_error,
                    action,
                    ..
                } => {
                    if is_error {
                        eprintln!("[tool] {tool_name} failed");
                    } else if let Some(action) = action {
                        eprintln!("[tool] {action}");
                    }
                }
                AgentEvent::TokenUsage { .. } => {}
                AgentEvent::ContextTrimmed { archived, .. } => {
                    eprintln!("[context] archived {archived} older messages");
                }
                AgentEvent::Status(s) => {
                    debug!("{s}");
                }
                AgentEvent::Aborted { .. } => {
                    println!();
                    eprintln!("[interrupted]");
                    aborted = true;
                }
                AgentEvent::TurnComplete => {
                    println!();
                }
            }
        }
        aborted
    });

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let turn = agent.submit_with_cancel(input, tx, cancel_rx);
    tokio::pin!(turn);

    let mut cancel_tx = Some(cancel_tx);
    let result = loop {
        tokio::select! {
            r = &mut turn => break r,
            _ = tokio::signal::ctrl_c(), if cancel_tx.is_some() => {
                if let Some(c) = cancel_tx.take() {
                    let _ = c.send(());
                }
            }
        }
    };

    let aborted = printer.await.unwrap_or(false);
    result.map_err(anyhow::Error::from)?;
    Ok(if aborted { EXIT_INTERRUPT } else { 0 })
}

/// Persistent sub-agent mode: join the broker session, run delegated tasks
/// through the same agent loop (and the same authorization gate, scoped to
/// this process's working directory) until the coordinator disconnects.
async fn run_subagent(broker_session: &str, config: &Arc<Config>) -> anyhow::Result<i32> {
    let dir = yawl_broker::rendezvous_dir(broker_session);
    let agent_id = yawl_broker::allocate_agent_id(&dir)?;
    let mut client = BrokerClient::connect(broker_session, agent_id, std::process::id())
        .await
        .context("connecting to coordinator")?;
    debug!(agent_id, session = broker_session, "sub-agent connected");

    let store = Arc::new(SessionStore::new(config.session.resolve_root()));
    let session = Session::new(config.model.context_window, config.model.token_factor);
    let mut runtime = build_runtime(config, &store, session)?;

    while let Some(prompt) = client.next_task().await? {
        client.send_status("task started").await?;
        let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
        let collector = tokio::spawn(async move {
            let mut final_text = String::new();
            while let Some(ev) = rx.recv().await {
                if let AgentEvent::TextComplete(t) = ev {
                    final_text = t;
                }
            }
            final_text
        });

        match runtime.agent.submit(&prompt, tx).await {
            Ok(()) => {
                let summary = collector.await.unwrap_or_default();
                let summary = (!summary.is_empty()).then_some(summary);
                client.send_completed(summary).await?;
            }
            Err(e) => {
                warn!(error = %e, "delegated task failed");
                client.send_blocked(e.to_string()).await?;
            }
        }
    }

    debug!(agent_id, "coordinator disconnected; exiting");
    Ok(0)
}
