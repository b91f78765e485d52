//! Tool executors for Chorus.
//!
//! Tools run outside the agent loop: either in a separate local process
//! reached over HTTP ([`rpc::RpcToolExecutor`]) or in-process through a
//! [`ToolRegistry`](chorus_core::ToolRegistry). [`layered::LayeredExecutor`]
//! puts built-ins such as [`memory_save::SaveMemoryTool`] in front of either.

pub mod layered;
pub mod memory_save;
pub mod rpc;

pub use layered::LayeredExecutor;
pub use memory_save::SaveMemoryTool;
pub use rpc::RpcToolExecutor;
