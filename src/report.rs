// src/report.rs
// Terse terminal rendering of run results and diffs

use std::fmt::Write as _;

use crate::baseline::{Baseline, BaselineDiff, DiffSeverity};
use crate::discovery::DiscoveredServer;
use crate::executor::RunOutcome;
use crate::transport::TransportDiagnostics;

/// One-screen run summary.
pub fn render_run(baseline: &Baseline, outcome: &RunOutcome) -> String {
    let mut out = String::new();
    let summary = &baseline.summary;

    let _ = writeln!(
        out,
        "{} v{} (protocol {})",
        baseline.server.name, baseline.server.version, baseline.server.protocol_version
    );
    let _ = writeln!(
        out,
        "tools: {} discovered, {} tested, {} carried forward",
        summary.tools_discovered, summary.tools_tested, summary.tools_skipped
    );
    let _ = writeln!(
        out,
        "scenarios: {} run, {} passed, {} failed",
        summary.scenarios_run, summary.scenarios_passed, summary.scenarios_failed
    );

    for result in &outcome.tool_results {
        let failures: Vec<&crate::executor::ScenarioRecord> =
            result.records.iter().filter(|r| !r.passed).collect();
        if failures.is_empty() {
            continue;
        }
        let _ = writeln!(out, "  {} ({} failing)", result.fingerprint.name, failures.len());
        for failure in failures.iter().take(5) {
            let detail = failure
                .error
                .clone()
                .or_else(|| {
                    failure
                        .assertion_outcomes
                        .iter()
                        .find(|a| !a.passed)
                        .map(|a| a.message.clone())
                })
                .unwrap_or_else(|| "assertion failed".into());
            let _ = writeln!(out, "    {} - {}", failure.scenario_id, detail);
        }
        if failures.len() > 5 {
            let _ = writeln!(out, "    ... and {} more", failures.len() - 5);
        }
    }

    if baseline.metadata.cancelled {
        let _ = writeln!(out, "run was cancelled; baseline is partial");
    }
    if let Some(fatal) = &outcome.fatal {
        let _ = writeln!(out, "run aborted: {}", fatal);
    }
    let _ = writeln!(out, "baseline hash: {}", baseline.hash);
    out
}

/// Render a diff verdict with its change lists.
pub fn render_diff(diff: &BaselineDiff) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "drift severity: {}", diff.severity);

    if let Some(note) = &diff.version_compatibility {
        let _ = writeln!(out, "note: {}", note);
    }
    if !diff.tools_added.is_empty() {
        let _ = writeln!(out, "added: {}", diff.tools_added.join(", "));
    }
    if !diff.tools_removed.is_empty() {
        let _ = writeln!(out, "removed: {}", diff.tools_removed.join(", "));
    }
    if !diff.workflows_regressed.is_empty() {
        let _ = writeln!(out, "workflows regressed: {}", diff.workflows_regressed.join(", "));
    }
    for modification in &diff.tools_modified {
        let _ = writeln!(
            out,
            "modified: {}{}",
            modification.tool,
            if modification.schema_changed {
                " (schema changed)"
            } else {
                ""
            }
        );
        for change in &modification.changes {
            let _ = writeln!(
                out,
                "  [{}] {}: {}",
                change.significance, change.aspect, change.description
            );
        }
    }
    if diff.is_clean() {
        let _ = writeln!(out, "no drift detected");
    }
    out
}

/// Capability listing for the `discover` command.
pub fn render_discovery(discovered: &DiscoveredServer) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} v{} (protocol {})",
        discovered.server.name, discovered.server.version, discovered.protocol_version
    );
    let _ = writeln!(out, "features: {}", discovered.features.active().join(", "));
    let _ = writeln!(out, "capabilities: {}", discovered.capabilities.names().join(", "));

    let _ = writeln!(out, "tools ({}):", discovered.tools.len());
    for tool in &discovered.tools {
        let _ = writeln!(
            out,
            "  {} - {}",
            tool.name,
            crate::utils::truncate(tool.description_or_empty(), 80)
        );
    }
    if !discovered.prompts.is_empty() {
        let _ = writeln!(out, "prompts ({}):", discovered.prompts.len());
        for prompt in &discovered.prompts {
            let _ = writeln!(out, "  {}", prompt.name);
        }
    }
    if !discovered.resources.is_empty() {
        let _ = writeln!(out, "resources ({}):", discovered.resources.len());
        for resource in &discovered.resources {
            let _ = writeln!(out, "  {} ({})", resource.name, resource.uri);
        }
    }
    if !discovered.resource_templates.is_empty() {
        let _ = writeln!(out, "resource templates ({}):", discovered.resource_templates.len());
        for template in &discovered.resource_templates {
            let _ = writeln!(out, "  {} ({})", template.name, template.uri_template);
        }
    }
    if let Some(instructions) = &discovered.instructions {
        let _ = writeln!(out, "instructions: {}", crate::utils::truncate(instructions, 200));
    }
    out
}

/// Append transport diagnostics when they carry signal.
pub fn render_diagnostics(diagnostics: &TransportDiagnostics) -> String {
    let mut out = String::new();
    if diagnostics.discarded_frames > 0 {
        let _ = writeln!(
            out,
            "transport discarded {} malformed frame(s)",
            diagnostics.discarded_frames
        );
    }
    if !diagnostics.stderr_tail.is_empty() {
        let _ = writeln!(out, "server stderr (tail):");
        for line in diagnostics.stderr_tail.iter().rev().take(10).rev() {
            let _ = writeln!(out, "  {}", line);
        }
    }
    out
}

/// Exit code for a run that produced a diff under `--fail-on-drift`.
pub fn drift_exit_code(severity: DiffSeverity) -> i32 {
    severity.exit_code()
}
