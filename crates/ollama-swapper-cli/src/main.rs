//! CLI entry point — the composition root.
//!
//! `proxy` loads config and binds the reverse proxy; `ps`/`sweep`/`stop`
//! shell out to the local `ollama` binary and share no state with it
//! (spec §1, §6).

use clap::Parser;

use ollama_swapper_cli::{Cli, Commands, handlers};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Proxy { config } => handlers::proxy::execute(&config).await,
        Commands::Ps => handlers::ps::execute(),
        Commands::Sweep => handlers::sweep::execute(),
        Commands::Stop { model } => handlers::stop::execute(model),
    }
}
