//! Agent runtime for Chorus.
//!
//! Each persona runs a bounded **call → tool dispatch → call** loop:
//!
//! 1. **Admit** the message, or queue it if the persona is thinking
//! 2. **Compact** first if the context is near its window
//! 3. **Call** the backend through the global admission gate
//! 4. **If tool calls**: run them in order, append results, loop back to 3
//! 5. **If text**: append it and drain the queue
//!
//! The loop stops when the backend answers without tools, when the step cap
//! forces a tool-free final call, or at the first step boundary after an
//! abort request.

pub mod admission;
pub mod checkin;
pub mod compaction;
pub mod loop_runner;
pub mod scheduler;
pub mod session;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use admission::{AdmissionController, CallSlot};
pub use checkin::{check_in_all, spawn_checkins};
pub use compaction::CompactionPolicy;
pub use loop_runner::{AgentLoop, LoopSettings, TurnOutcome, TurnReport};
pub use scheduler::{Scheduler, SendOutcome};
pub use session::{EntityHandle, EntitySession};
pub use supervisor::{Supervisor, TimerGuard};
