use crate::atom::AtomExecutionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Atom '{name}' is already registered")]
    DuplicateAtom { name: String },

    #[error("Unknown atom: {name}")]
    UnknownAtom { name: String },

    #[error("Cyclic dependency detected: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Atom '{atom}' depends on '{dependency}' which is not registered")]
    UnresolvedDependency { atom: String, dependency: String },

    #[error("Unsupported assignment ({target}) at line {line}, column {column}: {statement}")]
    UnsupportedAssignment {
        target: String,
        line: usize,
        column: usize,
        statement: String,
    },

    #[error("Unsupported statement ({reason}) at line {line}, column {column}: {statement}")]
    UnsupportedStatement {
        reason: String,
        line: usize,
        column: usize,
        statement: String,
    },

    #[error("Script parse error: {0}")]
    ScriptParse(String),

    #[error(transparent)]
    AtomExecution(#[from] AtomExecutionError),

    #[error("Execution engine error: {0}")]
    ExecutionEngine(String),

    #[error("Configuration error: {0}")]
    Config(#[from] confy::ConfyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkflowError {
    /// True for errors describing the shape of the atom graph rather than a run.
    pub fn is_graph_error(&self) -> bool {
        matches!(
            self,
            WorkflowError::DuplicateAtom { .. }
                | WorkflowError::UnknownAtom { .. }
                | WorkflowError::CyclicDependency { .. }
                | WorkflowError::UnresolvedDependency { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
