//! `ollama-swapper sweep`: stop every model currently loaded in Ollama.

use anyhow::Result;

use crate::sweep::{parse_ps_output, run_ps, stop_models};

pub fn execute() -> Result<()> {
    let output = run_ps()?;
    let models = parse_ps_output(&output);

    if models.is_empty() {
        println!("No models loaded.");
        return Ok(());
    }

    let result = stop_models(models);
    let summary = serde_json::json!({"stopped": result.stopped, "failed": result.failed});
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if !result.failed.is_empty() {
        anyhow::bail!("failed to stop {} model(s)", result.failed.len());
    }
    Ok(())
}
