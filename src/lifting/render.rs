use super::{LiftedAtom, LiftedScript, ScriptItem};
use serde_json::Value;

const INDENT: &str = "  ";

impl LiftedScript {
    /// Rewritten script: plain statements verbatim, one `workflow.atom`
    /// registration per lifted atom, then a single `workflow.execute();`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for item in &self.items {
            match item {
                ScriptItem::Plain(text) => {
                    out.push_str(text);
                    out.push('\n');
                }
                ScriptItem::Atom(atom) => render_atom(atom, &mut out),
            }
        }
        out.push_str("workflow.execute();\n");
        out
    }
}

fn quoted(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

fn render_atom(atom: &LiftedAtom, out: &mut String) {
    out.push_str("workflow.atom({\n");
    out.push_str(&format!("{INDENT}name: {},\n", quoted(&atom.name)));
    let dependencies: Vec<String> = atom.dependencies.iter().map(|d| quoted(d)).collect();
    out.push_str(&format!("{INDENT}dependencies: [{}],\n", dependencies.join(", ")));
    out.push_str(&format!("{INDENT}version: {},\n", quoted(&atom.content_hash)));
    if let Some(component_id) = &atom.component_id {
        out.push_str(&format!("{INDENT}component: {},\n", quoted(component_id)));
    }
    out.push_str(&format!("}}, ({}) => {{\n", atom.params.join(", ")));

    for alias in &atom.aliases {
        let value = match alias.index {
            Some(index) => format!("{}[{}]", alias.param, index),
            None => alias.param.clone(),
        };
        out.push_str(&format!("{INDENT}let {} = {};\n", alias.variable, value));
    }
    for line in &atom.body {
        for part in line.lines() {
            out.push_str(INDENT);
            out.push_str(part);
            out.push('\n');
        }
    }
    out.push_str(&format!("{INDENT}return {};\n", atom.returns));
    out.push_str("});\n");
}
