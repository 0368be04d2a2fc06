//! `ollama-swapper ps`: print whatever `ollama ps` prints.

use anyhow::Result;

use crate::sweep::run_ps;

pub fn execute() -> Result<()> {
    let output = run_ps()?;
    print!("{output}");
    Ok(())
}
