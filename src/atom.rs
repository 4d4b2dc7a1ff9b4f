use crate::retry::RetryPolicy;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Body of an atom: receives one positional argument per parameter
/// (or per dependency when no parameters were declared).
pub trait AtomFn: Send + Sync {
    fn call(&self, args: &[Value]) -> anyhow::Result<Value>;
}

impl<F> AtomFn for F
where
    F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync,
{
    fn call(&self, args: &[Value]) -> anyhow::Result<Value> {
        self(args)
    }
}

/// A registered unit of computation.
#[derive(Clone)]
pub struct AtomDefinition {
    pub name: String,
    pub callable: Arc<dyn AtomFn>,
    /// Formal parameter names, captured once at registration.
    pub params: Option<Vec<String>>,
    /// Manual dependencies; take precedence over inference from `params`.
    pub dependencies: Option<Vec<String>>,
    /// Falls back to the workflow default when unset.
    pub retry_policy: Option<RetryPolicy>,
    pub force_recompute: bool,
    /// Declared identity mixed into the input fingerprint.
    pub version: Option<String>,
    pub component_id: Option<String>,
}

impl AtomDefinition {
    pub fn new<F>(name: impl Into<String>, callable: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::from_callable(name, Arc::new(callable))
    }

    pub fn from_callable(name: impl Into<String>, callable: Arc<dyn AtomFn>) -> Self {
        Self {
            name: name.into(),
            callable,
            params: None,
            dependencies: None,
            retry_policy: None,
            force_recompute: false,
            version: None,
            component_id: None,
        }
    }

    /// Maps each positional argument to where its value comes from, given the
    /// atom's effective dependencies.
    pub fn argument_sources(&self, dependencies: &[String]) -> Vec<ArgumentSource> {
        match &self.params {
            Some(params) => params
                .iter()
                .map(|param| {
                    if dependencies.contains(param) {
                        ArgumentSource::Dependency(param.clone())
                    } else {
                        ArgumentSource::Input(param.clone())
                    }
                })
                .collect(),
            None => dependencies
                .iter()
                .cloned()
                .map(ArgumentSource::Dependency)
                .collect(),
        }
    }

    pub fn describe(&self) -> String {
        match &self.params {
            Some(params) => format!("{}({})", self.name, params.join(", ")),
            None => self.name.clone(),
        }
    }
}

impl fmt::Debug for AtomDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomDefinition")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("dependencies", &self.dependencies)
            .field("retry_policy", &self.retry_policy)
            .field("force_recompute", &self.force_recompute)
            .field("version", &self.version)
            .field("component_id", &self.component_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentSource {
    Dependency(String),
    /// Externally supplied workflow input.
    Input(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomStatus {
    Computed,
    Cached,
    Failed,
    UpstreamFailed,
}

impl AtomStatus {
    pub fn is_success(self) -> bool {
        matches!(self, AtomStatus::Computed | AtomStatus::Cached)
    }
}

impl fmt::Display for AtomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AtomStatus::Computed => "computed",
            AtomStatus::Cached => "cached",
            AtomStatus::Failed => "failed",
            AtomStatus::UpstreamFailed => "skipped (upstream failed)",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AtomExecutionError {
    #[error("Atom '{atom}' failed after {attempts} attempt(s): {message}")]
    Failed {
        atom: String,
        attempts: u32,
        message: String,
    },

    #[error("Atom '{atom}' was not run because upstream atom '{upstream}' failed")]
    UpstreamFailed { atom: String, upstream: String },
}

impl AtomExecutionError {
    pub fn atom(&self) -> &str {
        match self {
            AtomExecutionError::Failed { atom, .. } | AtomExecutionError::UpstreamFailed { atom, .. } => atom,
        }
    }
}

/// Outcome of one atom in one `execute()` call.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomResult {
    pub value: Option<Value>,
    pub status: AtomStatus,
    pub error: Option<AtomExecutionError>,
    pub attempts: u32,
}

impl AtomResult {
    pub fn computed(value: Value, attempts: u32) -> Self {
        Self {
            value: Some(value),
            status: AtomStatus::Computed,
            error: None,
            attempts,
        }
    }

    pub fn cached(value: Value) -> Self {
        Self {
            value: Some(value),
            status: AtomStatus::Cached,
            error: None,
            attempts: 0,
        }
    }

    pub fn failed(error: AtomExecutionError, attempts: u32) -> Self {
        Self {
            value: None,
            status: AtomStatus::Failed,
            error: Some(error),
            attempts,
        }
    }

    pub fn upstream_failed(atom: &str, upstream: &str) -> Self {
        Self {
            value: None,
            status: AtomStatus::UpstreamFailed,
            error: Some(AtomExecutionError::UpstreamFailed {
                atom: atom.to_string(),
                upstream: upstream.to_string(),
            }),
            attempts: 0,
        }
    }

    /// Consumes the result, yielding the value or the captured failure.
    pub fn into_value(self) -> crate::Result<Value> {
        match (self.value, self.error) {
            (Some(value), _) => Ok(value),
            (None, Some(error)) => Err(error.into()),
            (None, None) => Ok(Value::Null),
        }
    }
}
