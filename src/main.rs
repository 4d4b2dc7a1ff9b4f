use atomflow::WorkflowError;
use atomflow::commands;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "atomflow")]
#[command(about = "Incremental script execution with cached atoms")]
struct Cli {
    /// Configuration file (defaults to the per-user atomflow config)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Treat calls to this operation as reactive producers (repeatable)
    #[arg(long, global = true, value_name = "OP")]
    reactive: Vec<String>,

    /// Treat calls to this operation as UI components (repeatable)
    #[arg(long, global = true, value_name = "OP")]
    component: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the script rewritten into atom registrations
    Lift {
        script: PathBuf,
    },
    /// Show lifted atoms, their dependencies and the execution order
    Plan {
        script: PathBuf,
    },
}

fn exit_code(error: &WorkflowError) -> exitcode::ExitCode {
    match error {
        WorkflowError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => exitcode::NOINPUT,
        WorkflowError::Io(_) => exitcode::IOERR,
        WorkflowError::Config(_) => exitcode::CONFIG,
        WorkflowError::ScriptParse(_)
        | WorkflowError::UnsupportedAssignment { .. }
        | WorkflowError::UnsupportedStatement { .. } => exitcode::DATAERR,
        e if e.is_graph_error() => exitcode::DATAERR,
        _ => exitcode::SOFTWARE,
    }
}

fn run(cli: Cli) -> atomflow::Result<()> {
    let (config, options) =
        commands::load_options(cli.config.as_deref(), &cli.reactive, &cli.component)?;

    match cli.command {
        Commands::Lift { script } => {
            commands::lift::execute(&script, &options)?;
        }
        Commands::Plan { script } => {
            commands::plan::execute(&script, &config, &options)?;
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(exit_code(&e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_errors_are_data_errors() {
        let errors = [
            WorkflowError::UnknownAtom {
                name: "missing".to_string(),
            },
            WorkflowError::DuplicateAtom {
                name: "twice".to_string(),
            },
            WorkflowError::UnresolvedDependency {
                atom: "a".to_string(),
                dependency: "b".to_string(),
            },
        ];
        for error in &errors {
            assert_eq!(exit_code(error), exitcode::DATAERR, "for {error}");
        }
    }

    #[test]
    fn test_script_errors_are_data_errors() {
        let error = WorkflowError::UnsupportedStatement {
            reason: "export of a lifted value".to_string(),
            line: 1,
            column: 1,
            statement: "export const n = get_df(\"n\");".to_string(),
        };
        assert_eq!(exit_code(&error), exitcode::DATAERR);
    }

    #[test]
    fn test_io_errors() {
        let missing = WorkflowError::Io(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(exit_code(&missing), exitcode::NOINPUT);
        let denied = WorkflowError::Io(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert_eq!(exit_code(&denied), exitcode::IOERR);
    }
}
