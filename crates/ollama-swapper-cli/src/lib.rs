//! The `ollama-swapper` binary: `proxy`/`ps`/`sweep`/`stop` command dispatch.
#![deny(unsafe_code)]

pub mod cli;
pub mod handlers;
pub mod sweep;

pub use cli::{Cli, Commands};
