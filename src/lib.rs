//! Incremental execution of scripts expressed as a graph of cached
//! computation atoms.
//!
//! Atoms are registered on a [`Workflow`], ordered by their dependencies and
//! executed with fingerprint-based caching: an atom runs again only when its
//! version or the values it reads changed. Scripts can be lifted into atoms
//! automatically with [`lifting::transform`].

pub mod atom;
pub mod commands;
pub mod config;
pub mod dag;
pub mod dag_executor;
pub mod error;
pub mod fingerprint;
pub mod lifting;
pub mod registry;
pub mod retry;
pub mod workflow;

pub use atom::{AtomDefinition, AtomExecutionError, AtomFn, AtomResult, AtomStatus};
pub use config::EngineConfig;
pub use dag::DependencyGraph;
pub use dag_executor::{CancellationToken, ExecuteOptions, ExecutionReport, ExecutionSummary};
pub use error::{Result, WorkflowError};
pub use fingerprint::{Fingerprint, FingerprintStore};
pub use lifting::{LiftOptions, LiftedScript, transform};
pub use retry::{Backoff, RetryPolicy};
pub use workflow::{AtomHandle, Workflow};
