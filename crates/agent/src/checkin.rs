//! Scheduled check-ins.
//!
//! Every interval, each idle persona gets one isolated call with the
//! check-in prompt. Busy personas are skipped for that tick.

use chorus_core::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::loop_runner::TurnReport;
use crate::scheduler::Scheduler;

/// Run one round of check-ins. Returns the reports of personas that ran.
pub async fn check_in_all(scheduler: &Scheduler, prompt: &str) -> Vec<(String, TurnReport)> {
    let mut reports = Vec::new();
    for persona in scheduler.personas().await {
        match scheduler.isolated(&persona, prompt).await {
            Ok(report) => reports.push((persona.to_string(), report)),
            Err(Error::Busy(_)) => {
                debug!(persona = %persona, "Persona busy, skipping check-in");
            }
            Err(e) => warn!(persona = %persona, error = %e, "Check-in failed"),
        }
    }
    reports
}

/// Start the check-in loop. The first round runs one full interval after
/// start. Cancel `shutdown` to stop it.
pub fn spawn_checkins(
    scheduler: Arc<Scheduler>,
    interval: Duration,
    prompt: String,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(secs = interval.as_secs(), "Check-in loop started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let ran = check_in_all(&scheduler, &prompt).await;
                    debug!(personas = ran.len(), "Check-in round finished");
                }
            }
        }

        info!("Check-in loop stopped");
    })
}
