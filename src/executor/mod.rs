// src/executor/mod.rs
// Scheduler: drives the catalog to completion with bounded concurrency

pub mod assertions;
pub mod invoke;
pub mod unwrap;

pub use invoke::{ScenarioRecord, run_scenario};

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::baseline::{Baseline, ErrorPattern, ToolFingerprint};
use crate::config::RunConfig;
use crate::oracle::ValueOracle;
use crate::protocol::McpTool;
use crate::prune::{DecisionLog, decide, incremental_skip};
use crate::scenario::{Catalog, Category, Scenario, synthesize_catalog};
use crate::schema::schema_hash_opt;
use crate::session::Session;

/// Process-wide run counter. Initialized at load, bumped once per run.
pub static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Live counters shared by all workers of one run.
#[derive(Debug, Default)]
pub struct RunMetrics {
    pub scenarios_run: AtomicUsize,
    pub scenarios_passed: AtomicUsize,
    pub scenarios_failed: AtomicUsize,
}

/// Options distilled from [`RunConfig`] plus the decision-log location.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub parallel_tools: usize,
    pub request_timeout: Duration,
    pub run_deadline: Option<Duration>,
    pub warmup_scenarios: usize,
    pub include_warmup_in_fingerprint: bool,
    pub max_skipped_categories: usize,
    pub max_fingerprint_age_hours: u64,
    pub decision_log: Option<PathBuf>,
}

impl RunOptions {
    pub fn from_config(run: &RunConfig) -> Self {
        Self {
            parallel_tools: run.parallel_tools.max(1),
            request_timeout: Duration::from_millis(run.request_timeout_ms),
            run_deadline: run.run_deadline_ms.map(Duration::from_millis),
            warmup_scenarios: run.warmup_scenarios,
            include_warmup_in_fingerprint: run.include_warmup_in_fingerprint,
            max_skipped_categories: run.max_skipped_categories,
            max_fingerprint_age_hours: run.max_fingerprint_age_hours,
            decision_log: None,
        }
    }
}

/// Result for one tool: its fingerprint plus every scenario record.
#[derive(Debug)]
pub struct ToolRunResult {
    pub fingerprint: ToolFingerprint,
    pub records: Vec<ScenarioRecord>,
    /// True when the incremental analyzer carried the fingerprint forward
    /// without re-testing.
    pub skipped: bool,
}

/// Outcome of a whole scheduled run.
#[derive(Debug)]
pub struct RunOutcome {
    /// Sorted by tool name.
    pub tool_results: Vec<ToolRunResult>,
    pub cancelled: bool,
    /// Fatal fault that terminated the run early, if any.
    pub fatal: Option<String>,
}

struct WorkItem {
    tool: McpTool,
    catalog: Catalog,
}

/// Execute the full catalog for every tool.
///
/// The outer loop is over tools: up to `parallel_tools` run concurrently,
/// while scenarios within one tool run sequentially in FIFO order so the
/// server sees linear error contexts. Workers own no scheduler state; the
/// shared pieces are the work queue, the result collector and the metrics.
pub async fn execute(
    session: Arc<Session>,
    tools: &[McpTool],
    prior: Option<&Baseline>,
    oracle: Arc<dyn ValueOracle>,
    options: &RunOptions,
    cancel: CancellationToken,
) -> RunOutcome {
    let run_number = RUN_COUNTER.fetch_add(1, Ordering::SeqCst) + 1;
    debug!(run_number, tools = tools.len(), "starting scheduled run");

    let mut decision_log = match DecisionLog::open(options.decision_log.as_deref()) {
        Ok(log) => log,
        Err(e) => {
            warn!("decision log unavailable: {}", e);
            DecisionLog::disabled()
        }
    };

    let mut results: Vec<ToolRunResult> = Vec::new();
    let mut queue: VecDeque<WorkItem> = VecDeque::new();

    for tool in tools {
        if let Some(prior_fingerprint) =
            incremental_skip(tool, prior, options.max_fingerprint_age_hours)
        {
            info!(tool = %tool.name, "schema unchanged and fresh; carrying fingerprint forward");
            results.push(ToolRunResult {
                fingerprint: prior_fingerprint.clone(),
                records: Vec::new(),
                skipped: true,
            });
            continue;
        }

        let prior_fingerprint = prior.and_then(|b| b.fingerprint(&tool.name));
        let decision = decide(tool, prior_fingerprint, options.max_skipped_categories);
        decision_log.record(&decision);

        let mut catalog = synthesize_catalog(
            tool,
            &decision.enabled_categories(),
            decision.priority,
            oracle.as_ref(),
        );
        prepend_warmup(&mut catalog, options.warmup_scenarios);
        queue.push_back(WorkItem {
            tool: tool.clone(),
            catalog,
        });
    }

    let queue = Arc::new(Mutex::new(queue));
    let collector = Arc::new(Mutex::new(results));
    let fatal: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let metrics = Arc::new(RunMetrics::default());

    if let Some(deadline) = options.run_deadline {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if !cancel.is_cancelled() {
                warn!("global run deadline reached; cancelling");
                cancel.cancel();
            }
        });
    }

    let worker_count = options
        .parallel_tools
        .min(queue.lock().unwrap_or_else(|e| e.into_inner()).len().max(1));
    let mut workers = Vec::with_capacity(worker_count);
    for worker_id in 0..worker_count {
        workers.push(tokio::spawn(worker_loop(
            worker_id,
            Arc::clone(&session),
            Arc::clone(&queue),
            Arc::clone(&collector),
            Arc::clone(&fatal),
            Arc::clone(&metrics),
            cancel.clone(),
            options.clone(),
        )));
    }
    for worker in workers {
        let _ = worker.await;
    }

    let mut tool_results = match Arc::try_unwrap(collector) {
        Ok(mutex) => mutex.into_inner().unwrap_or_else(|e| e.into_inner()),
        Err(arc) => arc
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect(),
    };
    tool_results.sort_by(|a, b| a.fingerprint.name.cmp(&b.fingerprint.name));

    let fatal = fatal.lock().unwrap_or_else(|e| e.into_inner()).clone();
    let cancelled = cancel.is_cancelled() && fatal.is_none();

    info!(
        run_number,
        tools = tool_results.len(),
        scenarios = metrics.scenarios_run.load(Ordering::Relaxed),
        cancelled,
        "run finished"
    );

    RunOutcome {
        tool_results,
        cancelled,
        fatal,
    }
}

/// Warmup scenarios are copies of the first happy-path case; they prime
/// caches and feed the error-history estimate only.
fn prepend_warmup(catalog: &mut Catalog, count: usize) {
    if count == 0 {
        return;
    }
    let Some(happy) = catalog
        .by_category(Category::HappyPath)
        .next()
        .cloned()
    else {
        return;
    };
    let mut warmups: Vec<Scenario> = Vec::with_capacity(count);
    for i in 0..count {
        let mut scenario = happy.clone();
        scenario.id = format!("{}::warmup::{}", scenario.tool_name, i);
        warmups.push(scenario);
    }
    let rest = std::mem::take(&mut catalog.scenarios);
    catalog.scenarios = warmups.into_iter().chain(rest).collect();
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_id: usize,
    session: Arc<Session>,
    queue: Arc<Mutex<VecDeque<WorkItem>>>,
    collector: Arc<Mutex<Vec<ToolRunResult>>>,
    fatal: Arc<Mutex<Option<String>>>,
    metrics: Arc<RunMetrics>,
    cancel: CancellationToken,
    options: RunOptions,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(item) = queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        else {
            break;
        };

        debug!(worker_id, tool = %item.tool.name, scenarios = item.catalog.len(), "worker picked tool");
        let mut records: Vec<ScenarioRecord> = Vec::with_capacity(item.catalog.len());
        let warmup_count = item
            .catalog
            .scenarios
            .iter()
            .take_while(|s| s.id.contains("::warmup::"))
            .count();

        for (index, scenario) in item.catalog.scenarios.iter().enumerate() {
            // Workers check the token between scenarios and before each send.
            if cancel.is_cancelled() {
                break;
            }
            match run_scenario(&session, scenario, options.request_timeout).await {
                Ok(mut record) => {
                    record.warmup = index < warmup_count;
                    metrics.scenarios_run.fetch_add(1, Ordering::Relaxed);
                    if record.passed {
                        metrics.scenarios_passed.fetch_add(1, Ordering::Relaxed);
                    } else {
                        metrics.scenarios_failed.fetch_add(1, Ordering::Relaxed);
                    }
                    records.push(record);
                }
                Err(e) => {
                    warn!(tool = %item.tool.name, "fatal fault: {}", e);
                    let mut fatal = fatal.lock().unwrap_or_else(|e| e.into_inner());
                    if fatal.is_none() {
                        *fatal = Some(e.to_string());
                    }
                    cancel.cancel();
                    break;
                }
            }
        }

        let fingerprint =
            build_fingerprint(&item.tool, &records, options.include_warmup_in_fingerprint);
        collector
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ToolRunResult {
                fingerprint,
                records,
                skipped: false,
            });
    }
}

/// Aggregate a tool's records into its fingerprint.
pub fn build_fingerprint(
    tool: &McpTool,
    records: &[ScenarioRecord],
    include_warmup: bool,
) -> ToolFingerprint {
    let counted: Vec<&ScenarioRecord> = records
        .iter()
        .filter(|r| include_warmup || !r.warmup)
        .collect();

    let mut assertions: Vec<String> = Vec::new();
    for category in Category::ALL {
        let of_category: Vec<&&ScenarioRecord> =
            counted.iter().filter(|r| r.category == category).collect();
        if of_category.is_empty() {
            continue;
        }
        let passed = of_category.iter().filter(|r| r.passed).count();
        if passed == of_category.len() {
            assertions.push(format!("{}: all scenarios pass", category));
        } else {
            assertions.push(format!(
                "{}: {}/{} scenarios pass",
                category,
                passed,
                of_category.len()
            ));
        }
    }
    assertions.sort();

    let mut security_notes: Vec<String> = counted
        .iter()
        .filter_map(|r| r.security_note.clone())
        .collect();
    security_notes.sort();
    security_notes.dedup();

    let mut limitations: Vec<String> = counted
        .iter()
        .filter_map(|r| r.limitation.clone())
        .collect();
    limitations.sort();
    limitations.dedup();

    let mut error_patterns: Vec<ErrorPattern> = Vec::new();
    for category in Category::ALL {
        let count = records
            .iter()
            .filter(|r| r.category == category && !r.passed)
            .count() as u32;
        if count > 0 {
            error_patterns.push(ErrorPattern {
                category: category.as_str().to_string(),
                count,
            });
        }
    }

    let schema_hash = schema_hash_opt(tool.input_schema.as_ref());
    ToolFingerprint {
        name: tool.name.clone(),
        description: tool.description_or_empty().to_string(),
        schema_hash: schema_hash.clone(),
        assertions,
        security_notes,
        limitations,
        last_tested_at: crate::utils::now_rfc3339(),
        input_schema_hash_at_test: schema_hash,
        error_patterns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(category: Category, passed: bool) -> ScenarioRecord {
        ScenarioRecord {
            scenario_id: format!("t::{}::0", category),
            tool_name: "t".into(),
            category,
            args: json!({}),
            raw_response: None,
            payload: json!({}),
            passed,
            assertion_outcomes: Vec::new(),
            error: None,
            error_kind: None,
            security_note: None,
            limitation: None,
            duration_ms: 1,
            warmup: false,
        }
    }

    fn tool() -> McpTool {
        serde_json::from_value(json!({
            "name": "t",
            "inputSchema": {"type": "object", "properties": {}}
        }))
        .unwrap()
    }

    #[test]
    fn test_fingerprint_assertions_are_sorted_and_stable() {
        let records = vec![
            record(Category::HappyPath, true),
            record(Category::ErrorHandling, true),
            record(Category::ErrorHandling, false),
        ];
        let a = build_fingerprint(&tool(), &records, false);
        let b = build_fingerprint(&tool(), &records, false);
        assert_eq!(a.assertions, b.assertions);
        let mut sorted = a.assertions.clone();
        sorted.sort();
        assert_eq!(a.assertions, sorted);
        assert!(a.assertions.iter().any(|s| s.contains("1/2")));
    }

    #[test]
    fn test_fingerprint_error_patterns_count_failures() {
        let records = vec![
            record(Category::HappyPath, false),
            record(Category::HappyPath, false),
            record(Category::Security, true),
        ];
        let fingerprint = build_fingerprint(&tool(), &records, false);
        assert_eq!(fingerprint.error_patterns.len(), 1);
        assert_eq!(fingerprint.error_patterns[0].category, "happy_path");
        assert_eq!(fingerprint.error_patterns[0].count, 2);
    }

    #[test]
    fn test_warmup_excluded_unless_enabled() {
        let mut warm = record(Category::HappyPath, false);
        warm.warmup = true;
        let records = vec![warm, record(Category::HappyPath, true)];

        let without = build_fingerprint(&tool(), &records, false);
        assert!(without.assertions.iter().any(|s| s.contains("all scenarios pass")));

        let with = build_fingerprint(&tool(), &records, true);
        assert!(with.assertions.iter().any(|s| s.contains("1/2")));
    }

    #[test]
    fn test_prepend_warmup_copies_happy_path() {
        let oracle = crate::oracle::HeuristicOracle;
        let tool = tool();
        let mut catalog = synthesize_catalog(&tool, &[Category::HappyPath], 50, &oracle);
        prepend_warmup(&mut catalog, 2);
        assert_eq!(catalog.scenarios.len(), 3);
        assert!(catalog.scenarios[0].id.contains("::warmup::"));
        assert!(catalog.scenarios[1].id.contains("::warmup::"));
    }
}
