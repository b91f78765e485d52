//! Wiring shared by `chat` and `send`: provider, tools, memory, scheduler,
//! and the live event printer.

use chorus_agent::Scheduler;
use chorus_config::AppConfig;
use chorus_core::event::{DomainEvent, EventBus};
use chorus_core::memory::MemoryStore;
use chorus_core::message::PersonaId;
use chorus_core::provider::StreamChunk;
use chorus_core::tool::{ToolExecutor, ToolRegistry};
use chorus_memory::{FileBackend, InMemoryBackend};
use chorus_providers::HttpProvider;
use chorus_tools::RpcToolExecutor;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Build a scheduler with every configured persona registered.
pub async fn build(config: &AppConfig) -> Result<Arc<Scheduler>, Box<dyn std::error::Error>> {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let provider = Arc::new(HttpProvider::new(timeout)?);

    let tools: Arc<dyn ToolExecutor> = match &config.tools.rpc_url {
        Some(url) => match RpcToolExecutor::connect(url.as_str(), timeout).await {
            Ok(executor) => {
                info!(url = %url, tools = executor.definitions().len(), "Tool executor connected");
                Arc::new(executor)
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Tool executor unavailable, running without tools");
                Arc::new(ToolRegistry::new())
            }
        },
        None => Arc::new(ToolRegistry::new()),
    };

    let memory: Arc<dyn MemoryStore> = match config.memory.backend.as_str() {
        "in_memory" => Arc::new(InMemoryBackend::new()),
        _ => Arc::new(FileBackend::new(config.memory.resolved_path())),
    };

    let scheduler = Scheduler::new(config, provider, tools, memory);
    scheduler.register_all(config).await?;
    Ok(Arc::new(scheduler))
}

/// Resolve a persona name against the registered ones. `None` picks the
/// first.
pub async fn pick_persona(
    scheduler: &Scheduler,
    name: Option<&str>,
) -> Result<PersonaId, Box<dyn std::error::Error>> {
    let personas = scheduler.personas().await;
    match name {
        Some(name) => personas
            .into_iter()
            .find(|p| p.as_str() == name)
            .ok_or_else(|| format!("Unknown persona: {name}").into()),
        None => personas
            .into_iter()
            .next()
            .ok_or_else(|| "No personas configured".into()),
    }
}

/// Print live events until the bus closes.
pub fn spawn_printer(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Output fell behind, some events were dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_event(event: &DomainEvent) {
    match event {
        DomainEvent::Chunk { chunk, .. } => match chunk {
            StreamChunk::Text { delta } => {
                print!("{delta}");
                let _ = std::io::stdout().flush();
            }
            StreamChunk::Reasoning { delta } => {
                eprint!("\x1b[2m{delta}\x1b[0m");
            }
            StreamChunk::ToolStart { name, .. } => {
                eprintln!("\n  [tool] {name} ...");
            }
            StreamChunk::Done => println!(),
            StreamChunk::Error { message } => eprintln!("\n  [Error] {message}"),
            StreamChunk::ToolDone { .. } | StreamChunk::Stats { .. } | StreamChunk::ResponseId { .. } => {}
        },
        DomainEvent::ToolCompleted {
            tool_name,
            success,
            duration_ms,
            ..
        } => {
            let status = if *success { "ok" } else { "failed" };
            eprintln!("  [tool] {tool_name} {status} ({duration_ms} ms)");
        }
        DomainEvent::MessageQueued {
            persona, position, ..
        } => {
            eprintln!("  [{persona}] busy, message queued at position {position}");
        }
        DomainEvent::AbortRequested { persona, reason, .. } => {
            eprintln!("  [{persona}] abort requested ({reason:?}), stopping at next step");
        }
        DomainEvent::Compacted {
            persona,
            entries_cleared,
            summary_saved,
            ..
        } => {
            let saved = if *summary_saved { "summary saved" } else { "no summary" };
            eprintln!("  [{persona}] compacted {entries_cleared} entries, {saved}");
        }
        DomainEvent::ErrorOccurred { error_message, .. } => {
            eprintln!("  [Error] {error_message}");
        }
        DomainEvent::ThinkingChanged { .. }
        | DomainEvent::ToolRequested { .. }
        | DomainEvent::TurnFinished { .. } => {}
    }
}
