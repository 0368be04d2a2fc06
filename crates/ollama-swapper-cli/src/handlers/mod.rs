//! Command handlers: thin wrappers that parse CLI input, call into
//! [`crate::sweep`] or [`ollama_swapper_proxy`], and format terminal output.

pub mod proxy;
pub mod ps;
pub mod stop;
pub mod sweep;
