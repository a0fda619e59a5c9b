// src/cli/check.rs
// The deterministic check run: discover, execute, baseline, diff

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::baseline::{Baseline, BaselineBuilder, WorkflowSignature};
use crate::baseline::builder::{load_baseline, save_baseline};
use crate::baseline::differ::diff_baselines;
use crate::config::{BellwetherConfig, EnvCredentialResolver};
use crate::discovery::{DiscoveredServer, discover};
use crate::error::Result;
use crate::executor::{RunOptions, RunOutcome, execute};
use crate::oracle::HeuristicOracle;
use crate::session::Session;
use crate::state::is_probe;
use crate::workflow::{WorkflowRunResult, load_workflows, run_workflow};
use crate::{report, transport};

/// Everything a full check run produces.
pub struct CheckRun {
    pub discovered: DiscoveredServer,
    pub outcome: RunOutcome,
    pub baseline: Baseline,
    pub workflow_results: Vec<WorkflowRunResult>,
}

/// Run the deterministic check pipeline: connect, discover, execute the
/// catalog, run workflows, build the baseline.
pub async fn run_check(config: &BellwetherConfig, prior: Option<&Baseline>) -> Result<CheckRun> {
    let started = Instant::now();
    let resolver = EnvCredentialResolver::new(None);

    let (transport, events) = transport::connect(&config.server, &resolver).await?;
    let session = Session::new(transport, events);

    let request_timeout = Duration::from_millis(config.run.request_timeout_ms);
    let discovered = match discover(&session, request_timeout).await {
        Ok(discovered) => discovered,
        Err(e) => {
            session.close().await;
            return Err(e);
        }
    };

    info!(
        tools = discovered.tools.len(),
        server = %discovered.server.name,
        "discovery complete; scheduling catalog"
    );

    let cancel = CancellationToken::new();
    {
        // Ctrl-C flips the cooperative token; in-flight scenarios drain.
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling run");
                cancel.cancel();
            }
        });
    }

    let options = RunOptions::from_config(&config.run);
    let outcome = execute(
        Arc::clone(&session),
        &discovered.tools,
        prior,
        Arc::new(HeuristicOracle),
        &options,
        cancel.clone(),
    )
    .await;

    let mut workflow_results = Vec::new();
    if outcome.fatal.is_none() && !cancel.is_cancelled() {
        let probes: Vec<_> = discovered
            .tools
            .iter()
            .filter(|t| is_probe(t))
            .cloned()
            .collect();
        for path in &config.workflows {
            let workflows = match load_workflows(path) {
                Ok(workflows) => workflows,
                Err(e) => {
                    warn!(path = %path.display(), "skipping workflow file: {}", e);
                    continue;
                }
            };
            for workflow in &workflows {
                if cancel.is_cancelled() {
                    break;
                }
                workflow_results.push(
                    run_workflow(
                        &session,
                        workflow,
                        &discovered.tools,
                        &probes,
                        &config.snapshot,
                        request_timeout,
                    )
                    .await,
                );
            }
        }
    }

    let diagnostics = session.diagnostics();
    session.close().await;

    let signatures: Vec<WorkflowSignature> = workflow_results
        .iter()
        .map(|r| r.signature.clone())
        .collect();
    let baseline = BaselineBuilder::from_discovery(&discovered, config.server.command_line())
        .build(
            &outcome,
            signatures,
            started.elapsed().as_millis() as u64,
        );

    let diagnostics_text = report::render_diagnostics(&diagnostics);
    if !diagnostics_text.is_empty() {
        eprint!("{}", diagnostics_text);
    }

    Ok(CheckRun {
        discovered,
        outcome,
        baseline,
        workflow_results,
    })
}

/// `bellwether check`: run, optionally save, optionally diff against the
/// stored baseline. Returns the process exit code.
pub async fn run_check_command(
    config_path: &Path,
    save: bool,
    fail_on_drift: bool,
) -> Result<i32> {
    let config = BellwetherConfig::load(config_path)?;

    let prior = if config.baseline_path.exists() {
        match load_baseline(&config.baseline_path) {
            Ok(baseline) => Some(baseline),
            Err(e) => {
                warn!("prior baseline unusable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let run = run_check(&config, prior.as_ref()).await?;
    print!("{}", report::render_run(&run.baseline, &run.outcome));

    if save {
        save_baseline(&run.baseline, &config.baseline_path)?;
        println!("baseline saved to {}", config.baseline_path.display());
    }

    if let Some(prior) = &prior {
        let diff = diff_baselines(prior, &run.baseline, &config.diff)?;
        print!("{}", report::render_diff(&diff));
        if fail_on_drift {
            return Ok(diff.severity.exit_code());
        }
    }

    Ok(if run.outcome.fatal.is_some() { 1 } else { 0 })
}
