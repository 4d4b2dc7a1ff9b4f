use crate::config::EngineConfig;
use crate::lifting::{self, LiftOptions};
use crate::workflow::Workflow;
use crate::Result;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub struct PlanResult {
    pub workflow: Workflow,
    /// Atom names in execution order.
    pub ordered_atoms: Vec<String>,
}

fn placeholder(_: &[Value]) -> anyhow::Result<Value> {
    Ok(Value::Null)
}

pub fn execute(script: &Path, config: &EngineConfig, options: &LiftOptions) -> Result<PlanResult> {
    info!("Generating execution plan for {}", script.display());

    let lifted = lifting::transform_file(script, options)?;
    let mut workflow = Workflow::from_config(config);
    lifted.register_into(&mut workflow, |_| Arc::new(placeholder))?;

    let graph = workflow.graph()?;
    let ordered_atoms = graph.topological_order().to_vec();

    println!("\nExecution Plan:");
    println!("================\n");

    if ordered_atoms.is_empty() {
        println!("No atoms to execute.");
        return Ok(PlanResult {
            workflow,
            ordered_atoms,
        });
    }

    for (idx, name) in ordered_atoms.iter().enumerate() {
        let Some(atom) = lifted.atom(name) else {
            continue;
        };
        let dependencies = graph.dependencies(name);
        println!(
            "{}. {} (line {}){}",
            idx + 1,
            name,
            atom.line,
            if dependencies.is_empty() {
                String::new()
            } else {
                format!(" [depends on: {}]", dependencies.join(", "))
            }
        );
        if let Some(component_id) = &atom.component_id {
            println!("   component: {}", component_id);
        }
        println!("   {}", atom.source.lines().next().unwrap_or_default());
    }

    let levels = graph.levels();
    println!(
        "\nTotal: {} atom(s) in {} level(s), concurrency {}",
        ordered_atoms.len(),
        levels.len(),
        config.max_concurrency.max(1)
    );

    Ok(PlanResult {
        workflow,
        ordered_atoms,
    })
}
