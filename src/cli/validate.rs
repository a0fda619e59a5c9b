// src/cli/validate.rs
// validate-config: structural checks before any network activity

use std::path::Path;

use crate::config::BellwetherConfig;
use crate::error::Result;
use crate::workflow::load_workflows;

/// `bellwether validate-config`: load the config, check its structure, and
/// parse every referenced workflow file. No network activity.
pub fn run_validate(config_path: &Path) -> Result<i32> {
    let config = BellwetherConfig::load(config_path)?;

    let transport = config.server.transport_kind()?;
    println!("config ok: {:?} transport", transport);

    let mut failures = 0;
    for path in &config.workflows {
        match load_workflows(path) {
            Ok(workflows) => {
                println!(
                    "workflow file {}: {} workflow(s) valid",
                    path.display(),
                    workflows.len()
                );
            }
            Err(e) => {
                println!("workflow file {}: {}", path.display(), e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        println!("{} workflow file(s) failed validation", failures);
        return Ok(1);
    }
    println!("configuration valid");
    Ok(0)
}
