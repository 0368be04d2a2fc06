//! Dialect adapters, stream translators, the request pipeline, and the
//! axum HTTP surface for the Ollama-compatible reverse proxy.
#![deny(unsafe_code)]

pub mod dialect;
pub mod pipeline;
pub mod server;
pub mod stream;

pub use pipeline::Pipeline;
pub use server::serve;
