//! When to compact a conversation.
//!
//! Before the backend has reported any real token counts, only the raw
//! message count is trusted. Once counts exist, the estimate is the larger
//! of the last reported usage and a chars/4 approximation of the system
//! prompt plus history, compared against a fraction of the context window.

use chorus_config::CompactionConfig;
use tracing::debug;

use crate::session::EntitySession;

/// Characters per token for the rough estimate.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone)]
pub struct CompactionPolicy {
    threshold: f64,
    message_threshold: usize,
    default_context_window: u32,
}

impl CompactionPolicy {
    pub fn new(threshold: f64, message_threshold: usize, default_context_window: u32) -> Self {
        Self {
            threshold,
            message_threshold,
            default_context_window,
        }
    }

    pub fn from_config(config: &CompactionConfig) -> Self {
        Self::new(
            config.threshold,
            config.message_threshold,
            config.default_context_window,
        )
    }

    /// The context window in effect for `session`.
    pub fn window(&self, session: &EntitySession) -> u32 {
        session
            .max_context
            .filter(|w| *w > 0)
            .unwrap_or(self.default_context_window)
    }

    /// Estimated tokens in use, or `None` before any real count exists.
    pub fn estimate(&self, session: &EntitySession) -> Option<u64> {
        let stats = session.last_stats.as_ref()?;
        let reported = u64::from(stats.input_tokens) + u64::from(stats.output_tokens);
        let approximate = (session.char_len() / CHARS_PER_TOKEN) as u64;
        Some(reported.max(approximate))
    }

    pub fn should_compact(&self, session: &EntitySession) -> bool {
        if session.conversation.is_empty() {
            return false;
        }

        let Some(estimate) = self.estimate(session) else {
            return session.conversation.len() > self.message_threshold;
        };

        let limit = self.threshold * f64::from(self.window(session));
        let trigger = estimate as f64 >= limit;
        if trigger {
            debug!(
                persona = %session.persona,
                estimate,
                limit,
                "Context near window limit"
            );
        }
        trigger
    }
}
