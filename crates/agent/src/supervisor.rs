//! Cancellation supervisor.
//!
//! Arms a wall-clock timer when a persona starts thinking. On expiry, or on
//! a manual trigger, it raises the persona's abort flag and tells observers
//! right away. The loop itself only notices at its next step boundary.

use chorus_core::event::{AbortReason, DomainEvent, EventBus};
use chorus_core::message::PersonaId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone)]
pub struct Supervisor {
    bus: Arc<EventBus>,
    timeout: Option<Duration>,
}

impl Supervisor {
    /// `timeout` of zero disables the timer.
    pub fn new(bus: Arc<EventBus>, timeout: Duration) -> Self {
        Self {
            bus,
            timeout: (!timeout.is_zero()).then_some(timeout),
        }
    }

    /// Start the thinking timer. Dropping the returned guard disarms it.
    pub fn arm(&self, persona: PersonaId, abort: Arc<AtomicBool>) -> TimerGuard {
        let token = CancellationToken::new();
        let Some(timeout) = self.timeout else {
            return TimerGuard { token };
        };

        let cancelled = token.clone();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    info!(persona = %persona, secs = timeout.as_secs(), "Thinking timeout, requesting abort");
                    trigger(&bus, &persona, &abort, AbortReason::Timeout);
                }
            }
        });

        TimerGuard { token }
    }

    /// Manual abort.
    pub fn abort(&self, persona: &PersonaId, abort: &AtomicBool) {
        trigger(&self.bus, persona, abort, AbortReason::Manual);
    }
}

fn trigger(bus: &EventBus, persona: &PersonaId, abort: &AtomicBool, reason: AbortReason) {
    abort.store(true, Ordering::SeqCst);
    bus.publish(DomainEvent::AbortRequested {
        persona: persona.clone(),
        reason,
        timestamp: chrono::Utc::now(),
    });
}

/// Disarms the timer on drop.
pub struct TimerGuard {
    token: CancellationToken,
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
