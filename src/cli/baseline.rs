// src/cli/baseline.rs
// baseline save | compare | show | diff

use std::path::Path;
use tracing::info;

use crate::baseline::builder::{load_baseline, load_baseline_unchecked, save_baseline};
use crate::baseline::differ::diff_baselines;
use crate::config::BellwetherConfig;
use crate::error::Result;
use crate::report;

use super::check::run_check;

/// `baseline save`: run a fresh check and persist its baseline.
pub async fn run_save(config_path: &Path, output: Option<&Path>) -> Result<i32> {
    let config = BellwetherConfig::load(config_path)?;
    let run = run_check(&config, None).await?;

    let path = output.unwrap_or(&config.baseline_path);
    save_baseline(&run.baseline, path)?;
    print!("{}", report::render_run(&run.baseline, &run.outcome));
    println!("baseline saved to {}", path.display());
    Ok(if run.outcome.fatal.is_some() { 1 } else { 0 })
}

/// `baseline compare`: run a fresh check and diff it against the stored
/// baseline without overwriting it.
pub async fn run_compare(
    config_path: &Path,
    baseline_path: Option<&Path>,
    fail_on_drift: bool,
) -> Result<i32> {
    let config = BellwetherConfig::load(config_path)?;
    let path = baseline_path.unwrap_or(&config.baseline_path);
    let prior = load_baseline(path)?;

    let run = run_check(&config, Some(&prior)).await?;
    let diff = diff_baselines(&prior, &run.baseline, &config.diff)?;
    print!("{}", report::render_diff(&diff));

    Ok(if fail_on_drift {
        diff.severity.exit_code()
    } else {
        0
    })
}

/// `baseline show`: print a stored baseline's summary.
pub fn run_show(path: &Path) -> Result<i32> {
    let baseline = load_baseline_unchecked(path)?;
    println!(
        "{} v{} (protocol {}, format {})",
        baseline.server.name,
        baseline.server.version,
        baseline.server.protocol_version,
        baseline.version
    );
    println!(
        "generated {} via '{}'{}",
        baseline.metadata.generated_at,
        baseline.metadata.server_command,
        if baseline.metadata.cancelled {
            " (cancelled run)"
        } else {
            ""
        }
    );
    println!(
        "tools: {} profiled, {} workflow signature(s)",
        baseline.tool_profiles.len(),
        baseline.workflow_signatures.len()
    );
    for profile in &baseline.tool_profiles {
        println!(
            "  {} schema={} tested={}",
            profile.name, profile.schema_hash, profile.last_tested_at
        );
        for note in &profile.security_notes {
            println!("    security: {}", note);
        }
        for limitation in &profile.limitations {
            println!("    limitation: {}", limitation);
        }
    }
    println!("hash: {}", baseline.hash);
    Ok(0)
}

/// `baseline diff A B`: compare two stored baselines.
pub fn run_diff(
    config_path: Option<&Path>,
    old_path: &Path,
    new_path: &Path,
    fail_on_drift: bool,
    allow_cancelled: bool,
) -> Result<i32> {
    // Diffing two files should work without a config; fall back to the
    // default policy when none is present.
    let mut policy = match config_path {
        Some(path) if path.exists() => BellwetherConfig::load(path)?.diff,
        _ => Default::default(),
    };
    policy.allow_cancelled = policy.allow_cancelled || allow_cancelled;

    let old = load_baseline(old_path)?;
    let new = load_baseline(new_path)?;
    info!(old = %old_path.display(), new = %new_path.display(), "diffing baselines");

    let diff = diff_baselines(&old, &new, &policy)?;
    print!("{}", report::render_diff(&diff));

    Ok(if fail_on_drift {
        diff.severity.exit_code()
    } else {
        0
    })
}
