use crate::atom::{AtomDefinition, AtomResult, AtomStatus, ArgumentSource};
use crate::dag::DependencyGraph;
use crate::error::{Result, WorkflowError};
use crate::fingerprint::{Fingerprint, FingerprintStore, ResolvedInputs};
use crate::registry::AtomRegistry;
use crate::retry::{Invocation, RetryPolicy};
use rayon::prelude::*;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const MISSING_INPUT: &Value = &Value::Null;

/// Shared flag that stops a run before further atoms start.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Atoms that must run this time regardless of cache validity.
    pub recompute: HashSet<String>,
    pub cancellation: Option<CancellationToken>,
}

impl ExecuteOptions {
    pub fn recompute<I, S>(atoms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            recompute: atoms.into_iter().map(Into::into).collect(),
            cancellation: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

/// Result map of one `execute()` call.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    results: HashMap<String, AtomResult>,
    order: Vec<String>,
    cancelled: bool,
    duration: Duration,
}

impl ExecutionReport {
    pub fn get(&self, name: &str) -> Option<&AtomResult> {
        self.results.get(name)
    }

    pub fn status(&self, name: &str) -> Option<AtomStatus> {
        self.results.get(name).map(|r| r.status)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.results.get(name).and_then(|r| r.value.as_ref())
    }

    pub fn results(&self) -> &HashMap<String, AtomResult> {
        &self.results
    }

    pub fn into_results(self) -> HashMap<String, AtomResult> {
        self.results
    }

    /// Atom names in the order their results were produced.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AtomResult)> {
        self.order
            .iter()
            .filter_map(|name| self.results.get(name).map(|r| (name.as_str(), r)))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled && self.results.values().all(|r| r.status.is_success())
    }

    pub fn summary(&self) -> ExecutionSummary {
        let mut summary = ExecutionSummary {
            total: self.results.len(),
            ..ExecutionSummary::default()
        };
        for (name, result) in self.iter() {
            match result.status {
                AtomStatus::Computed => summary.computed += 1,
                AtomStatus::Cached => summary.cached += 1,
                AtomStatus::UpstreamFailed => summary.upstream_failed += 1,
                AtomStatus::Failed => {
                    let message = result
                        .error
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_default();
                    summary.failed.push((name.to_string(), message));
                }
            }
        }
        summary
    }
}

impl IntoIterator for ExecutionReport {
    type Item = (String, AtomResult);
    type IntoIter = std::collections::hash_map::IntoIter<String, AtomResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub total: usize,
    pub computed: usize,
    pub cached: usize,
    pub upstream_failed: usize,
    pub failed: Vec<(String, String)>,
}

enum AtomPlan<'a> {
    Blocked { upstream: String },
    Cached(Value),
    Run {
        atom: &'a AtomDefinition,
        args: Vec<Value>,
        fingerprint: Fingerprint,
    },
}

#[derive(Default)]
struct RunState {
    results: HashMap<String, AtomResult>,
    order: Vec<String>,
    /// Atom -> the failed ancestor it is blocked by.
    blocked: HashMap<String, String>,
    cancelled: bool,
}

impl RunState {
    fn finish(&mut self, name: &str, result: AtomResult) {
        self.order.push(name.to_string());
        self.results.insert(name.to_string(), result);
    }
}

/// Walks the dependency graph deciding, per atom, between serving the cache
/// and invoking the atom body.
pub struct DagExecutor<'a> {
    registry: &'a AtomRegistry,
    graph: &'a DependencyGraph,
    inputs: &'a HashMap<String, Value>,
    default_retry: RetryPolicy,
    concurrency: usize,
}

impl<'a> DagExecutor<'a> {
    pub fn new(
        registry: &'a AtomRegistry,
        graph: &'a DependencyGraph,
        inputs: &'a HashMap<String, Value>,
    ) -> Self {
        Self {
            registry,
            graph,
            inputs,
            default_retry: RetryPolicy::default(),
            concurrency: 1,
        }
    }

    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = policy;
        self
    }

    /// More than one worker runs independent atoms of the same depth in parallel.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn execute(
        &self,
        store: &mut FingerprintStore,
        options: &ExecuteOptions,
    ) -> Result<ExecutionReport> {
        self.validate(options)?;

        let start = Instant::now();
        tracing::info!(
            "Executing {} atoms with concurrency of {}",
            self.graph.len(),
            self.concurrency
        );

        let state = if self.concurrency > 1 {
            self.execute_levels(store, options)?
        } else {
            self.execute_sequential(store, options)
        };

        let report = ExecutionReport {
            results: state.results,
            order: state.order,
            cancelled: state.cancelled,
            duration: start.elapsed(),
        };

        let summary = report.summary();
        tracing::info!(
            "Run finished in {:.3}s: {} computed, {} cached, {} failed, {} skipped{}",
            report.duration.as_secs_f64(),
            summary.computed,
            summary.cached,
            summary.failed.len(),
            summary.upstream_failed,
            if report.cancelled { " (cancelled)" } else { "" }
        );

        Ok(report)
    }

    /// Rejects invalid requests before any atom runs.
    fn validate(&self, options: &ExecuteOptions) -> Result<()> {
        for name in self.registry.names() {
            if !self.graph.contains(name) {
                return Err(WorkflowError::ExecutionEngine(format!(
                    "Atom '{}' is registered but missing from the dependency graph",
                    name
                )));
            }
        }
        if self.graph.len() != self.registry.len() {
            return Err(WorkflowError::ExecutionEngine(
                "Dependency graph does not match the registry".to_string(),
            ));
        }

        let mut requested: Vec<&String> = options.recompute.iter().collect();
        requested.sort();
        for name in requested {
            if !self.registry.contains(name) {
                return Err(WorkflowError::UnknownAtom { name: name.clone() });
            }
        }
        Ok(())
    }

    fn execute_sequential(&self, store: &mut FingerprintStore, options: &ExecuteOptions) -> RunState {
        let mut state = RunState::default();

        for name in self.graph.topological_order() {
            if options.is_cancelled() {
                tracing::info!("Run cancelled before atom '{}'", name);
                state.cancelled = true;
                break;
            }

            match self.plan_atom(name, &state, store, options) {
                AtomPlan::Blocked { upstream } => {
                    tracing::debug!("Skipping atom '{}': upstream '{}' failed", name, upstream);
                    state.finish(name, AtomResult::upstream_failed(name, &upstream));
                }
                AtomPlan::Cached(value) => {
                    tracing::debug!("Serving atom '{}' from cache", name);
                    state.finish(name, AtomResult::cached(value));
                }
                AtomPlan::Run {
                    atom,
                    args,
                    fingerprint,
                } => {
                    tracing::debug!("Computing atom {}", atom.describe());
                    let invocation = self.policy_for(atom).invoke(atom, &args);
                    self.complete(name, fingerprint, invocation, &mut state, store);
                }
            }
        }

        state
    }

    fn execute_levels(
        &self,
        store: &mut FingerprintStore,
        options: &ExecuteOptions,
    ) -> Result<RunState> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .build()
            .map_err(|e| WorkflowError::ExecutionEngine(e.to_string()))?;

        let mut state = RunState::default();

        for level in self.graph.levels() {
            if options.is_cancelled() {
                state.cancelled = true;
                break;
            }

            let mut runs = Vec::new();
            for name in &level {
                match self.plan_atom(name, &state, store, options) {
                    AtomPlan::Blocked { upstream } => {
                        state.finish(name, AtomResult::upstream_failed(name, &upstream));
                    }
                    AtomPlan::Cached(value) => {
                        state.finish(name, AtomResult::cached(value));
                    }
                    AtomPlan::Run {
                        atom,
                        args,
                        fingerprint,
                    } => runs.push((atom, args, fingerprint)),
                }
            }

            let outcomes: Vec<_> = pool.install(|| {
                runs.into_par_iter()
                    .map(|(atom, args, fingerprint)| {
                        if options.is_cancelled() {
                            return (atom, fingerprint, None);
                        }
                        tracing::debug!("Computing atom {}", atom.describe());
                        let invocation = self.policy_for(atom).invoke(atom, &args);
                        (atom, fingerprint, Some(invocation))
                    })
                    .collect()
            });

            for (atom, fingerprint, invocation) in outcomes {
                match invocation {
                    Some(invocation) => {
                        self.complete(&atom.name, fingerprint, invocation, &mut state, store);
                    }
                    None => state.cancelled = true,
                }
            }

            if state.cancelled {
                tracing::info!("Run cancelled; remaining atoms were not started");
                break;
            }
        }

        Ok(state)
    }

    fn plan_atom(
        &self,
        name: &str,
        state: &RunState,
        store: &mut FingerprintStore,
        options: &ExecuteOptions,
    ) -> AtomPlan<'a> {
        if let Some(upstream) = state.blocked.get(name) {
            return AtomPlan::Blocked {
                upstream: upstream.clone(),
            };
        }

        let dependencies = self.graph.dependencies(name);
        let mut dependency_values: Vec<(&str, &Value)> = Vec::with_capacity(dependencies.len());
        for dep in dependencies {
            match state.results.get(dep).and_then(|r| r.value.as_ref()) {
                Some(value) => dependency_values.push((dep.as_str(), value)),
                None => {
                    return AtomPlan::Blocked {
                        upstream: dep.clone(),
                    };
                }
            }
        }

        // Graph and registry were checked against each other in `validate`.
        let Ok(atom) = self.registry.get(name) else {
            return AtomPlan::Blocked {
                upstream: name.to_string(),
            };
        };

        let mut args = Vec::new();
        let mut external: Vec<(String, &Value)> = Vec::new();
        for source in atom.argument_sources(dependencies) {
            match source {
                ArgumentSource::Dependency(dep) => {
                    let value = dependency_values
                        .iter()
                        .find(|(n, _)| *n == dep)
                        .map_or(MISSING_INPUT, |(_, v)| *v);
                    args.push(value.clone());
                }
                ArgumentSource::Input(input) => {
                    let value = self.inputs.get(&input).unwrap_or_else(|| {
                        tracing::warn!(
                            "Atom '{}' reads input '{}' which was not supplied; using null",
                            name,
                            input
                        );
                        MISSING_INPUT
                    });
                    args.push(value.clone());
                    external.push((input, value));
                }
            }
        }

        let fingerprint = FingerprintStore::compute_input_fingerprint(
            atom,
            &ResolvedInputs {
                dependencies: dependency_values,
                external: external.iter().map(|(k, v)| (k.as_str(), *v)).collect(),
            },
        );

        let forced = atom.force_recompute || options.recompute.contains(name);
        if forced {
            store.invalidate(name);
        } else if store.is_cache_valid(name, &fingerprint) {
            if let Some(value) = store.cached_value(name) {
                return AtomPlan::Cached(value.clone());
            }
        }

        AtomPlan::Run {
            atom,
            args,
            fingerprint,
        }
    }

    fn complete(
        &self,
        name: &str,
        fingerprint: Fingerprint,
        invocation: Invocation,
        state: &mut RunState,
        store: &mut FingerprintStore,
    ) {
        match invocation.outcome {
            Ok(value) => {
                store.record(name, fingerprint, value.clone());
                state.finish(name, AtomResult::computed(value, invocation.attempts));
            }
            Err(error) => {
                store.invalidate(name);
                let dependents = self.graph.downstream_of(std::iter::once(name));
                if !dependents.is_empty() {
                    tracing::warn!(
                        "Atom '{}' failed; {} dependent atom(s) will not run",
                        name,
                        dependents.len()
                    );
                }
                for dependent in dependents {
                    state
                        .blocked
                        .entry(dependent)
                        .or_insert_with(|| name.to_string());
                }
                state.finish(name, AtomResult::failed(error, invocation.attempts));
            }
        }
    }

    fn policy_for(&self, atom: &AtomDefinition) -> RetryPolicy {
        atom.retry_policy.unwrap_or(self.default_retry)
    }
}
