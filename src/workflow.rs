//! Explicit workflow context: owns the registry, the fingerprint store and
//! the external inputs, and runs the executor on demand.

use crate::atom::AtomDefinition;
use crate::config::EngineConfig;
use crate::dag::DependencyGraph;
use crate::dag_executor::{DagExecutor, ExecuteOptions, ExecutionReport};
use crate::error::{Result, WorkflowError};
use crate::fingerprint::FingerprintStore;
use crate::registry::AtomRegistry;
use crate::retry::RetryPolicy;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
pub struct Workflow {
    registry: AtomRegistry,
    store: FingerprintStore,
    inputs: HashMap<String, Value>,
    default_retry: RetryPolicy,
    concurrency: usize,
}

/// Returned by registration; names the atom in later calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AtomHandle {
    name: String,
}

impl AtomHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Workflow {
    pub fn new() -> Self {
        Self {
            concurrency: 1,
            ..Self::default()
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            default_retry: config.default_retry,
            concurrency: config.max_concurrency.max(1),
            ..Self::default()
        }
    }

    /// Overrides the default policy for atoms registered without one.
    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = policy;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn default_retry(&self) -> RetryPolicy {
        self.default_retry
    }

    /// Starts registering an atom.
    pub fn atom(&mut self, name: impl Into<String>) -> AtomBuilder<'_> {
        AtomBuilder {
            workflow: self,
            definition: PendingAtom {
                name: name.into(),
                ..PendingAtom::default()
            },
        }
    }

    pub fn register(&mut self, atom: AtomDefinition) -> Result<AtomHandle> {
        let name = atom.name.clone();
        self.registry.register(atom)?;
        Ok(AtomHandle { name })
    }

    pub fn get(&self, name: &str) -> Result<&AtomDefinition> {
        self.registry.get(name)
    }

    pub fn registry(&self) -> &AtomRegistry {
        &self.registry
    }

    pub fn store(&self) -> &FingerprintStore {
        &self.store
    }

    /// Sets an externally supplied value read by atom parameters that do not
    /// name an atom.
    pub fn set_input(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.inputs.insert(name.into(), value)
    }

    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    pub fn graph(&self) -> Result<DependencyGraph> {
        DependencyGraph::build(&self.registry)
    }

    pub fn execute(&mut self) -> Result<ExecutionReport> {
        self.execute_with(&ExecuteOptions::default())
    }

    /// Runs with the named atoms forced to recompute.
    pub fn execute_recompute<I, S>(&mut self, atoms: I) -> Result<ExecutionReport>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.execute_with(&ExecuteOptions::recompute(atoms))
    }

    pub fn execute_with(&mut self, options: &ExecuteOptions) -> Result<ExecutionReport> {
        let graph = DependencyGraph::build(&self.registry)?;
        DagExecutor::new(&self.registry, &graph, &self.inputs)
            .with_default_retry(self.default_retry)
            .with_concurrency(self.concurrency)
            .execute(&mut self.store, options)
    }

    /// Drops the cache entries of the named atoms and everything downstream
    /// of them. Returns the invalidated names.
    pub fn invalidate<'a, I>(&mut self, atoms: I) -> Result<BTreeSet<String>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let graph = DependencyGraph::build(&self.registry)?;
        let atoms: Vec<&str> = atoms.into_iter().collect();
        for name in &atoms {
            if !graph.contains(name) {
                return Err(WorkflowError::UnknownAtom {
                    name: name.to_string(),
                });
            }
        }

        let mut affected = graph.downstream_of(atoms.iter().copied());
        affected.extend(atoms.iter().map(|name| name.to_string()));
        for name in &affected {
            self.store.invalidate(name);
        }
        tracing::debug!("Invalidated {} cached atom(s)", affected.len());
        Ok(affected)
    }
}

#[derive(Default)]
struct PendingAtom {
    name: String,
    params: Option<Vec<String>>,
    dependencies: Option<Vec<String>>,
    retry_policy: Option<RetryPolicy>,
    force_recompute: bool,
    version: Option<String>,
    component_id: Option<String>,
}

/// Builder-style registration; `compute` registers the atom.
pub struct AtomBuilder<'w> {
    workflow: &'w mut Workflow,
    definition: PendingAtom,
}

impl AtomBuilder<'_> {
    /// Formal parameter names of the body, in positional order.
    pub fn params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.definition.params = Some(params.into_iter().map(Into::into).collect());
        self
    }

    /// Manual dependencies; disables inference from parameter names.
    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.definition.dependencies = Some(dependencies.into_iter().map(Into::into).collect());
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.definition.retry_policy = Some(policy);
        self
    }

    pub fn force_recompute(mut self) -> Self {
        self.definition.force_recompute = true;
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.definition.version = Some(version.into());
        self
    }

    pub fn component(mut self, component_id: impl Into<String>) -> Self {
        self.definition.component_id = Some(component_id.into());
        self
    }

    pub fn compute<F>(self, callable: F) -> Result<AtomHandle>
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let pending = self.definition;
        let mut atom = AtomDefinition::new(pending.name, callable);
        atom.params = pending.params;
        atom.dependencies = pending.dependencies;
        atom.retry_policy = pending.retry_policy;
        atom.force_recompute = pending.force_recompute;
        atom.version = pending.version;
        atom.component_id = pending.component_id;
        self.workflow.register(atom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomStatus;
    use serde_json::json;

    #[test]
    fn test_builder_registers_atom() {
        let mut workflow = Workflow::new();
        let handle = workflow
            .atom("greeting")
            .version("v1")
            .component("text-1")
            .compute(|_| Ok(json!("hello")))
            .unwrap();

        assert_eq!(handle.name(), "greeting");
        let atom = workflow.get("greeting").unwrap();
        assert_eq!(atom.version.as_deref(), Some("v1"));
        assert_eq!(atom.component_id.as_deref(), Some("text-1"));
    }

    #[test]
    fn test_external_inputs_feed_parameters() {
        let mut workflow = Workflow::new();
        workflow.set_input("tax_rate", json!(0.5));
        workflow.atom("price").compute(|_| Ok(json!(10.0))).unwrap();
        workflow
            .atom("total")
            .params(["price", "tax_rate"])
            .compute(|args| {
                let price = args[0].as_f64().unwrap_or_default();
                let rate = args[1].as_f64().unwrap_or_default();
                Ok(json!(price * (1.0 + rate)))
            })
            .unwrap();

        let report = workflow.execute().unwrap();
        assert_eq!(report.value("total"), Some(&json!(15.0)));

        // A changed input invalidates only the atoms reading it.
        workflow.set_input("tax_rate", json!(1.0));
        let report = workflow.execute().unwrap();
        assert_eq!(report.status("price"), Some(AtomStatus::Cached));
        assert_eq!(report.status("total"), Some(AtomStatus::Computed));
        assert_eq!(report.value("total"), Some(&json!(20.0)));
    }

    #[test]
    fn test_invalidate_includes_downstream() {
        let mut workflow = Workflow::new();
        workflow.atom("a").compute(|_| Ok(json!(1))).unwrap();
        workflow.atom("b").params(["a"]).compute(|args| Ok(args[0].clone())).unwrap();
        workflow.atom("c").compute(|_| Ok(json!(3))).unwrap();
        workflow.execute().unwrap();

        let invalidated = workflow.invalidate(["a"]).unwrap();
        assert_eq!(invalidated.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);

        let report = workflow.execute().unwrap();
        assert_eq!(report.status("a"), Some(AtomStatus::Computed));
        assert_eq!(report.status("b"), Some(AtomStatus::Computed));
        assert_eq!(report.status("c"), Some(AtomStatus::Cached));

        assert!(matches!(
            workflow.invalidate(["nope"]),
            Err(WorkflowError::UnknownAtom { .. })
        ));
    }

    #[test]
    fn test_unknown_recompute_target_is_rejected() {
        let mut workflow = Workflow::new();
        workflow.atom("a").compute(|_| Ok(json!(1))).unwrap();

        assert!(matches!(
            workflow.execute_recompute(["missing"]),
            Err(WorkflowError::UnknownAtom { .. })
        ));
        assert!(workflow.store().is_empty());
    }

    #[test]
    fn test_from_config() {
        let config = EngineConfig {
            max_concurrency: 0,
            default_retry: RetryPolicy::new(3),
            ..EngineConfig::default()
        };
        let workflow = Workflow::from_config(&config);
        assert_eq!(workflow.default_retry().attempts(), 3);
    }
}
