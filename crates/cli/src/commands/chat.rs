//! `chorus chat`: interactive multi-persona chat.
//!
//! Each message runs in its own task, so the prompt stays live while a
//! persona is thinking. Typing while busy queues the message.

use chorus_agent::{Scheduler, SendOutcome, TurnReport};
use chorus_config::AppConfig;
use chorus_core::message::PersonaId;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use super::runtime;

pub async fn run(persona: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let scheduler = runtime::build(&config).await?;
    let mut current = runtime::pick_persona(&scheduler, persona.as_deref()).await?;
    let printer = runtime::spawn_printer(&scheduler.bus());
    let shutdown = CancellationToken::new();

    let checkins = config.agent.checkin_interval_minutes;
    if checkins > 0 {
        chorus_agent::spawn_checkins(
            scheduler.clone(),
            Duration::from_secs(checkins * 60),
            config.agent.checkin_prompt.clone(),
            shutdown.clone(),
        );
    }

    println!();
    println!("  Chorus interactive mode");
    println!();
    println!("  Endpoint:  {} ({})", config.endpoint, config.dialect());
    println!("  Model:     {}", config.default_model);
    println!(
        "  Personas:  {}",
        scheduler
            .personas()
            .await
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!();
    println!("  Commands: /persona <name>, /personas, /abort, /compact,");
    println!("            /model <name>, /endpoint <url>, /models, /exit");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt(&current)?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            prompt(&current)?;
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let (name, arg) = command
                .split_once(' ')
                .map(|(n, a)| (n, a.trim()))
                .unwrap_or((command, ""));
            match name {
                "exit" | "quit" => break,
                "persona" => match runtime::pick_persona(&scheduler, Some(arg)).await {
                    Ok(p) => current = p,
                    Err(e) => eprintln!("  [Error] {e}"),
                },
                "personas" => {
                    for p in scheduler.personas().await {
                        let state = if scheduler.is_thinking(&p).await? { "thinking" } else { "idle" };
                        println!("  {p}  ({state}, {} queued)", scheduler.pending(&p).await?);
                    }
                }
                "abort" => {
                    if !scheduler.abort(&current).await? {
                        println!("  {current} is idle");
                    }
                }
                "compact" => spawn_compact(scheduler.clone(), current.clone()),
                "model" if !arg.is_empty() => scheduler.set_model(&current, arg).await?,
                "endpoint" if !arg.is_empty() => scheduler.set_endpoint(&current, arg).await?,
                "models" => {
                    for (endpoint, models) in scheduler.refresh_models().await {
                        println!("  {endpoint}");
                        for m in models {
                            println!("    {}  [{}]", m.id, m.state);
                        }
                    }
                }
                other => eprintln!("  Unknown command: /{other}"),
            }
            prompt(&current)?;
            continue;
        }

        spawn_send(scheduler.clone(), current.clone(), line.to_string(), config.stream);
    }

    println!();
    println!("  Goodbye!");
    shutdown.cancel();
    printer.abort();
    Ok(())
}

fn prompt(persona: &PersonaId) -> std::io::Result<()> {
    print!("  {persona} < ");
    std::io::stdout().flush()
}

fn spawn_send(scheduler: Arc<Scheduler>, persona: PersonaId, text: String, streamed: bool) {
    tokio::spawn(async move {
        match scheduler.send(&persona, text).await {
            Ok(SendOutcome::Completed { report, drained }) => {
                for report in std::iter::once(report).chain(drained) {
                    show(&persona, report, streamed);
                }
            }
            Ok(SendOutcome::Queued { .. }) => {}
            Err(e) => eprintln!("  [Error] {e}"),
        }
        let _ = prompt(&persona);
    });
}

/// Print a finished turn. Streamed text was already printed live.
fn show(persona: &PersonaId, report: TurnReport, streamed: bool) {
    match report.text.filter(|t| !t.is_empty()) {
        Some(text) if !streamed => {
            if let Some(reasoning) = report.reasoning {
                eprintln!("\x1b[2m{reasoning}\x1b[0m");
            }
            println!("\n  {persona} > {text}");
        }
        Some(_) => {}
        None => eprintln!("  [{persona}] no answer ({:?})", report.outcome),
    }
}

fn spawn_compact(scheduler: Arc<Scheduler>, persona: PersonaId) {
    tokio::spawn(async move {
        match scheduler.compact(&persona).await {
            Ok(true) => {}
            Ok(false) => eprintln!("  [{persona}] compaction stopped, history kept"),
            Err(e) => eprintln!("  [Error] {e}"),
        }
    });
}
