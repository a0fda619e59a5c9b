// src/cli/golden.rs
// golden save | compare | list | delete

use std::path::Path;

use crate::config::BellwetherConfig;
use crate::error::Result;
use crate::executor::ScenarioRecord;
use crate::golden::GoldenStore;

use super::check::run_check;

fn all_records(run: &super::check::CheckRun) -> Vec<ScenarioRecord> {
    run.outcome
        .tool_results
        .iter()
        .flat_map(|r| r.records.iter().cloned())
        .collect()
}

/// `golden save`: run a check and pin the stable tool outputs.
pub async fn run_save(config_path: &Path) -> Result<i32> {
    let config = BellwetherConfig::load(config_path)?;
    let run = run_check(&config, None).await?;
    let store = GoldenStore::new(&config.golden_dir);
    let count = store.save(&all_records(&run))?;
    println!("pinned outputs for {} tool(s) in {}", count, config.golden_dir.display());
    Ok(0)
}

/// `golden compare`: run a check and report divergence from pinned outputs.
pub async fn run_compare(config_path: &Path, fail_on_drift: bool) -> Result<i32> {
    let config = BellwetherConfig::load(config_path)?;
    let run = run_check(&config, None).await?;
    let store = GoldenStore::new(&config.golden_dir);
    let mismatches = store.compare(&all_records(&run))?;

    if mismatches.is_empty() {
        println!("all golden outputs match");
        return Ok(0);
    }
    for mismatch in &mismatches {
        println!(
            "{} {} at '{}': expected {}, got {}",
            mismatch.tool,
            mismatch.scenario_id,
            mismatch.path,
            render(&mismatch.expected),
            render(&mismatch.actual),
        );
    }
    println!("{} mismatch(es)", mismatches.len());
    Ok(if fail_on_drift { 2 } else { 0 })
}

/// `golden list`: tools with pinned outputs.
pub fn run_list(config_path: &Path) -> Result<i32> {
    let config = BellwetherConfig::load(config_path)?;
    let store = GoldenStore::new(&config.golden_dir);
    for tool in store.list()? {
        println!("{}", tool);
    }
    Ok(0)
}

/// `golden delete`: remove one tool's pinned outputs.
pub fn run_delete(config_path: &Path, tool: &str) -> Result<i32> {
    let config = BellwetherConfig::load(config_path)?;
    let store = GoldenStore::new(&config.golden_dir);
    if store.delete(tool)? {
        println!("deleted golden for '{}'", tool);
        Ok(0)
    } else {
        println!("no golden stored for '{}'", tool);
        Ok(1)
    }
}

fn render(value: &Option<serde_json::Value>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => "<absent>".to_string(),
    }
}
