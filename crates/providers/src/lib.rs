//! Wire protocol layer for Chorus.
//!
//! Every outbound call derives its [`WireDialect`](chorus_core::WireDialect)
//! from the endpoint URL, then goes through the same four steps:
//! [`request::build`], transport, and either [`response::parse`] or the
//! [`stream`] normalizers, which resolve to the same result shape.

pub mod anthropic;
pub mod extract;
pub mod http;
pub mod local;
pub mod models;
pub mod openai_compat;
pub mod request;
pub mod response;
pub mod sse;
pub mod stream;

pub use http::HttpProvider;
pub use request::{BuiltRequest, build};
pub use stream::{StreamDriver, replay};
