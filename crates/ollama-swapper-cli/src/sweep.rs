//! `ps`/`sweep`/`stop`: auxiliary commands that shell out to the `ollama`
//! binary on the host (spec §6). Independent of the proxy's process state —
//! these never touch [`ollama_swapper_core::AppConfig`] or the pipeline.

use std::process::Command;

/// Outcome of stopping a batch of models: which succeeded, which didn't.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepResult {
    pub stopped: Vec<String>,
    pub failed: Vec<String>,
}

/// Parse the `ollama ps` table into model names, skipping the header line
/// and taking the first whitespace-separated column of each remaining line.
#[must_use]
pub fn parse_ps_output(output: &str) -> Vec<String> {
    let lines: Vec<&str> = output.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let Some((_header, rest)) = lines.split_first() else {
        return Vec::new();
    };
    rest.iter()
        .filter_map(|line| line.split_whitespace().next().map(str::to_owned))
        .collect()
}

/// Run `ollama ps` and return its stdout.
///
/// # Errors
///
/// Returns an error if the `ollama` binary can't be spawned or exits
/// non-zero.
pub fn run_ps() -> anyhow::Result<String> {
    let output = Command::new("ollama").arg("ps").output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        anyhow::bail!(if stderr.is_empty() {
            "ollama ps failed".to_string()
        } else {
            stderr
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Stop each named model via `ollama stop <model>`, collecting successes
/// and failures rather than aborting on the first one.
#[must_use]
pub fn stop_models<I>(models: I) -> SweepResult
where
    I: IntoIterator<Item = String>,
{
    let mut result = SweepResult::default();
    for model in models {
        let stopped = Command::new("ollama")
            .arg("stop")
            .arg(&model)
            .output()
            .is_ok_and(|out| out.status.success());

        if stopped {
            result.stopped.push(model);
        } else {
            result.failed.push(model);
        }
    }
    result
}
