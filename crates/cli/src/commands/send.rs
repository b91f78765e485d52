//! `chorus send`: one message, one answer.

use chorus_agent::SendOutcome;
use chorus_config::AppConfig;

use super::runtime;

pub async fn run(message: String, persona: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let scheduler = runtime::build(&config).await?;
    let persona = runtime::pick_persona(&scheduler, persona.as_deref()).await?;

    // Streaming prints as it arrives; otherwise print the final text below
    let printer = config.stream.then(|| runtime::spawn_printer(&scheduler.bus()));
    if printer.is_none() {
        eprint!("  Thinking...");
    }

    let outcome = scheduler.send(&persona, message).await?;

    if let Some(printer) = printer {
        // Let the printer flush the terminal chunk
        tokio::task::yield_now().await;
        printer.abort();
        return Ok(());
    }

    eprint!("\r              \r");
    if let SendOutcome::Completed { report, .. } = outcome {
        if let Some(reasoning) = report.reasoning {
            eprintln!("\x1b[2m{reasoning}\x1b[0m");
        }
        println!("{}", report.text.unwrap_or_default());
    }
    Ok(())
}
