//! `ollama-swapper stop <model>`: stop a single loaded model.

use anyhow::Result;

use crate::sweep::stop_models;

pub fn execute(model: String) -> Result<()> {
    let label = model.clone();
    let result = stop_models(std::iter::once(model));

    if !result.failed.is_empty() {
        anyhow::bail!("failed to stop: {label}");
    }
    println!("Stopped: {label}");
    Ok(())
}
