//! `ollama-swapper proxy --config <path>`: load config, bind `listen`, serve.

use std::path::Path;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;

use ollama_swapper_core::{load_config, parse_listen};

/// Execute the `proxy` command: load `config`, bind to `server.listen`, and
/// serve until the process is terminated.
///
/// # Errors
///
/// Returns an error if the config fails to load or validate, `listen` is
/// malformed, or the socket can't be bound.
pub async fn execute(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let listen = parse_listen(&config.server.listen)?;

    info!(host = %listen.host, port = %listen.port, upstream = %config.server.upstream, "starting ollama-swapper proxy");

    let listener = TcpListener::bind((listen.host, listen.port)).await?;
    ollama_swapper_proxy::serve(listener, config).await
}
