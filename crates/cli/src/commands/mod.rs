pub mod chat;
pub mod config_cmd;
pub mod detect;
pub mod models;
pub mod runtime;
pub mod send;
