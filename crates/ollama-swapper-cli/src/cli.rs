//! Clap argument definitions for the `ollama-swapper` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Ollama-compatible reverse proxy: run it, or manage models loaded on the host.
#[derive(Debug, Parser)]
#[command(name = "ollama-swapper", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the proxy server.
    Proxy {
        /// Path to the JSON or YAML config file.
        #[arg(long, short = 'c')]
        config: PathBuf,
    },
    /// Show models currently loaded in Ollama.
    Ps,
    /// Stop every model currently loaded in Ollama.
    Sweep,
    /// Stop a single model.
    Stop {
        /// Model name, as shown by `ollama ps`.
        model: String,
    },
}
