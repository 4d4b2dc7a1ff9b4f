//! Source lifting: rewrites a flat script's top-level statements into atom
//! registrations with inferred dependencies.
//!
//! A statement is lifted when it calls a reactive operation, or binds or
//! uses a value that an earlier lifted statement produced. Everything else
//! stays plain. Lifted atoms receive their upstream values positionally
//! (`param0`, `param1`, ...) and re-bind them to the original names.
//!
//! ```rust,ignore
//! let script = atomflow::lifting::transform(
//!     "const n = slider(\"n\");\nconst doubled = n * 2;",
//!     &LiftOptions::default(),
//! )?;
//! println!("{}", script.render());
//! ```

pub mod ast_parser;
mod render;

use crate::atom::AtomFn;
use crate::error::{Result, WorkflowError};
use crate::workflow::{AtomHandle, Workflow};
use ast_parser::{BoundValue, CallSite, ScriptParser, ScriptStatement, StatementShape};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

const ATOM_PREFIX: &str = "_auto_atom_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiftOptions {
    pub reactive_operations: BTreeSet<String>,
    pub component_operations: BTreeSet<String>,
    pub log_rewritten_source: bool,
}

impl Default for LiftOptions {
    fn default() -> Self {
        crate::config::EngineConfig::default().lift_options()
    }
}

impl LiftOptions {
    fn is_reactive(&self, operation: &str) -> bool {
        self.reactive_operations.contains(operation) || self.component_operations.contains(operation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiftKind {
    /// Calls a reactive operation.
    Producer,
    /// Binds names from values of earlier lifted atoms.
    Derived,
    /// Uses lifted values without binding anything.
    Consumer,
}

/// Where a lifted variable's value lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub atom: String,
    /// Position in the atom's returned array for unpacked targets.
    pub index: Option<usize>,
}

/// Re-binds a positional parameter to the variable name the statement uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub variable: String,
    pub param: String,
    pub index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiftedAtom {
    pub name: String,
    pub kind: LiftKind,
    pub dependencies: Vec<String>,
    /// One positional parameter per dependency.
    pub params: Vec<String>,
    pub aliases: Vec<Alias>,
    pub targets: Vec<String>,
    /// Statements executed after the aliases.
    pub body: Vec<String>,
    /// Returned expression.
    pub returns: String,
    pub source: String,
    pub content_hash: String,
    pub operation: Option<String>,
    pub component_id: Option<String>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptItem {
    Plain(String),
    Atom(LiftedAtom),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LiftedScript {
    items: Vec<ScriptItem>,
    bindings: BTreeMap<String, Binding>,
}

impl LiftedScript {
    pub fn items(&self) -> &[ScriptItem] {
        &self.items
    }

    pub fn atoms(&self) -> impl Iterator<Item = &LiftedAtom> {
        self.items.iter().filter_map(|item| match item {
            ScriptItem::Atom(atom) => Some(atom),
            ScriptItem::Plain(_) => None,
        })
    }

    pub fn atom(&self, name: &str) -> Option<&LiftedAtom> {
        self.atoms().find(|atom| atom.name == name)
    }

    /// Plain statements, in source order.
    pub fn plain(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|item| match item {
            ScriptItem::Plain(text) => Some(text.as_str()),
            ScriptItem::Atom(_) => None,
        })
    }

    /// Final binding of every variable still produced by a lifted atom.
    pub fn binding(&self, variable: &str) -> Option<&Binding> {
        self.bindings.get(variable)
    }

    pub fn bindings(&self) -> &BTreeMap<String, Binding> {
        &self.bindings
    }

    /// Registers every lifted atom, asking `factory` for each body. Plain
    /// statements are left to the host. Nothing is registered when any name
    /// is already taken.
    pub fn register_into<F>(&self, workflow: &mut Workflow, mut factory: F) -> Result<Vec<AtomHandle>>
    where
        F: FnMut(&LiftedAtom) -> Arc<dyn AtomFn>,
    {
        for atom in self.atoms() {
            if workflow.registry().contains(&atom.name) {
                return Err(WorkflowError::DuplicateAtom {
                    name: atom.name.clone(),
                });
            }
        }

        let mut handles = Vec::new();
        for atom in self.atoms() {
            let mut definition = crate::atom::AtomDefinition::from_callable(&atom.name, factory(atom));
            definition.dependencies = Some(atom.dependencies.clone());
            definition.version = Some(atom.content_hash.clone());
            definition.component_id = atom.component_id.clone();
            handles.push(workflow.register(definition)?);
        }
        Ok(handles)
    }
}

/// Lifts a JavaScript module.
pub fn transform(source: &str, options: &LiftOptions) -> Result<LiftedScript> {
    let statements = ScriptParser::new(source).parse()?;
    finish(Lifter::new(options).lift(statements)?, options)
}

/// Lifts a script file; the extension selects JavaScript or TypeScript.
pub fn transform_file(path: &Path, options: &LiftOptions) -> Result<LiftedScript> {
    let source = std::fs::read_to_string(path)?;
    let statements = ScriptParser::for_path(&source, path)?.parse()?;
    finish(Lifter::new(options).lift(statements)?, options)
}

fn finish(script: LiftedScript, options: &LiftOptions) -> Result<LiftedScript> {
    tracing::info!(
        "Lifted {} of {} statement(s) into atoms",
        script.atoms().count(),
        script.items.len()
    );
    if options.log_rewritten_source {
        tracing::debug!("Rewritten script:\n{}", script.render());
    }
    Ok(script)
}

/// Where a statement sits in the source, for error reporting.
#[derive(Debug, Clone)]
struct Origin {
    text: String,
    line: usize,
    column: usize,
}

impl Origin {
    fn unsupported(&self, reason: impl Into<String>) -> WorkflowError {
        WorkflowError::UnsupportedStatement {
            reason: reason.into(),
            line: self.line,
            column: self.column,
            statement: self.text.clone(),
        }
    }
}

struct Lifter<'o> {
    options: &'o LiftOptions,
    bindings: BTreeMap<String, Binding>,
    atom_names: HashMap<String, usize>,
    component_ids: HashMap<String, usize>,
    items: Vec<ScriptItem>,
    /// Names read by statements left plain.
    plain_refs: HashSet<String>,
    /// Plain declarations whose bodies read a name later on.
    deferred_readers: HashMap<String, Origin>,
}

impl<'o> Lifter<'o> {
    fn new(options: &'o LiftOptions) -> Self {
        Self {
            options,
            bindings: BTreeMap::new(),
            atom_names: HashMap::new(),
            component_ids: HashMap::new(),
            items: Vec::new(),
            plain_refs: HashSet::new(),
            deferred_readers: HashMap::new(),
        }
    }

    fn lift(mut self, statements: Vec<ScriptStatement>) -> Result<LiftedScript> {
        for statement in statements {
            self.lift_statement(statement)?;
        }
        Ok(LiftedScript {
            items: self.items,
            bindings: self.bindings,
        })
    }

    fn lift_statement(&mut self, statement: ScriptStatement) -> Result<()> {
        let ScriptStatement {
            shape,
            text,
            line,
            column,
        } = statement;
        let origin = Origin { text, line, column };

        match shape {
            StatementShape::Declaration => self.plain(origin, &[]),
            StatementShape::Function { name, refs } => self.lift_declaration(name, refs, origin)?,
            StatementShape::Export { calls, refs } => {
                if self.producer_call(&calls).is_some() || !self.lifted_refs(&refs).is_empty() {
                    return Err(origin.unsupported("export of a lifted value"));
                }
                self.defer(&refs, &origin);
                self.plain(origin, &refs);
            }
            StatementShape::Bind {
                keyword,
                targets,
                augmented,
                exported,
                value: Some(value),
            } => self.lift_binding(keyword, targets, augmented, exported, value, origin)?,
            StatementShape::Bind { targets, .. } => {
                self.unbind(&targets);
                self.plain(origin, &[]);
            }
            StatementShape::Expression {
                calls,
                refs,
                expression,
            } => {
                let lifted = self.lifted_refs(&refs);
                let producer = self.producer_call(&calls).is_some();
                if !producer && lifted.is_empty() {
                    self.plain(origin, &refs);
                    return Ok(());
                }
                let kind = if producer {
                    LiftKind::Producer
                } else {
                    LiftKind::Consumer
                };
                let atom = self.build_atom(kind, &lifted, &calls, Vec::new(), Vec::new(), expression, &origin);
                self.items.push(ScriptItem::Atom(atom));
            }
            StatementShape::Other { calls, refs } => {
                let lifted = self.lifted_refs(&refs);
                let producer = self.producer_call(&calls).is_some();
                if !producer && lifted.is_empty() {
                    self.plain(origin, &refs);
                    return Ok(());
                }
                let kind = if producer {
                    LiftKind::Producer
                } else {
                    LiftKind::Consumer
                };
                let body = vec![origin.text.clone()];
                let atom = self.build_atom(kind, &lifted, &calls, Vec::new(), body, "null".to_string(), &origin);
                self.items.push(ScriptItem::Atom(atom));
            }
        }
        Ok(())
    }

    /// Function and class declarations reading lifted values are lifted
    /// whole and re-exposed under their own name.
    fn lift_declaration(&mut self, name: String, refs: Vec<String>, origin: Origin) -> Result<()> {
        let lifted = self.lifted_refs(&refs);
        if lifted.is_empty() {
            self.unbind(std::slice::from_ref(&name));
            self.defer(&refs, &origin);
            self.plain(origin, &refs);
            return Ok(());
        }
        if self.plain_refs.contains(&name) {
            return Err(origin.unsupported(format!("'{name}' is used before its lifted declaration")));
        }
        self.check_deferred_readers(std::slice::from_ref(&name))?;

        let body = vec![origin.text.clone()];
        let atom = self.build_atom(
            LiftKind::Derived,
            &lifted,
            &[],
            vec![name.clone()],
            body,
            name.clone(),
            &origin,
        );
        self.bindings.insert(
            name,
            Binding {
                atom: atom.name.clone(),
                index: None,
            },
        );
        self.items.push(ScriptItem::Atom(atom));
        Ok(())
    }

    fn lift_binding(
        &mut self,
        keyword: Option<&'static str>,
        targets: Vec<String>,
        augmented: bool,
        exported: bool,
        value: BoundValue,
        origin: Origin,
    ) -> Result<()> {
        let producer = self.producer_call(&value.calls).is_some();
        let mut refs = value.refs.clone();
        if augmented {
            // `x += y` reads x as well.
            for target in targets.iter().rev() {
                if !refs.contains(target) {
                    refs.insert(0, target.clone());
                }
            }
        }
        let lifted = self.lifted_refs(&refs);

        if !producer && lifted.is_empty() {
            self.unbind(&targets);
            self.plain(origin, &refs);
            return Ok(());
        }
        if exported {
            return Err(origin.unsupported("export of a lifted value"));
        }
        self.check_deferred_readers(&targets)?;

        let mut body = Vec::new();
        if keyword.is_none() && !augmented {
            let undeclared: Vec<&str> = targets
                .iter()
                .filter(|t| !value.refs.contains(t))
                .map(String::as_str)
                .collect();
            if !undeclared.is_empty() {
                body.push(format!("let {};", undeclared.join(", ")));
            }
        }
        body.push(origin.text.clone());

        let returns = match targets.as_slice() {
            [single] => single.clone(),
            many => format!("[{}]", many.join(", ")),
        };
        let kind = if producer {
            LiftKind::Producer
        } else {
            LiftKind::Derived
        };

        let atom = self.build_atom(kind, &lifted, &value.calls, targets.clone(), body, returns, &origin);

        let unpacked = targets.len() > 1;
        for (index, target) in targets.into_iter().enumerate() {
            self.bindings.insert(
                target,
                Binding {
                    atom: atom.name.clone(),
                    index: unpacked.then_some(index),
                },
            );
        }
        self.items.push(ScriptItem::Atom(atom));
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn build_atom(
        &mut self,
        kind: LiftKind,
        lifted: &[(String, Binding)],
        calls: &[CallSite],
        targets: Vec<String>,
        body: Vec<String>,
        returns: String,
        origin: &Origin,
    ) -> LiftedAtom {
        let mut dependencies: Vec<String> = Vec::new();
        let mut aliases = Vec::with_capacity(lifted.len());
        for (variable, binding) in lifted {
            let position = match dependencies.iter().position(|d| d == &binding.atom) {
                Some(position) => position,
                None => {
                    dependencies.push(binding.atom.clone());
                    dependencies.len() - 1
                }
            };
            aliases.push(Alias {
                variable: variable.clone(),
                param: format!("param{position}"),
                index: binding.index,
            });
        }
        let params = (0..dependencies.len()).map(|i| format!("param{i}")).collect();

        let content_hash = sha256_hex(&origin.text);
        let name = unique(
            &mut self.atom_names,
            format!("{}{}", ATOM_PREFIX, &content_hash[..16]),
        );

        let operation = self.producer_call(calls).map(|c| c.operation.clone());
        let component_id = calls
            .iter()
            .find(|c| self.options.component_operations.contains(&c.operation))
            .map(|c| {
                let digest = format!("{:x}", md5::compute(c.text.as_bytes()));
                format!("{}-{}", c.operation, &digest[..12])
            })
            .map(|base| unique(&mut self.component_ids, base));

        tracing::debug!(
            "Lifted line {} into {} ({:?}, {} dependencies)",
            origin.line,
            name,
            kind,
            dependencies.len()
        );

        LiftedAtom {
            name,
            kind,
            dependencies,
            params,
            aliases,
            targets,
            body,
            returns,
            source: origin.text.clone(),
            content_hash,
            operation,
            component_id,
            line: origin.line,
        }
    }

    /// First call to a reactive operation, outermost first.
    fn producer_call<'c>(&self, calls: &'c [CallSite]) -> Option<&'c CallSite> {
        calls.iter().find(|c| self.options.is_reactive(&c.operation))
    }

    fn lifted_refs(&self, refs: &[String]) -> Vec<(String, Binding)> {
        refs.iter()
            .filter_map(|name| {
                self.bindings
                    .get(name)
                    .map(|binding| (name.clone(), binding.clone()))
            })
            .collect()
    }

    fn plain(&mut self, origin: Origin, refs: &[String]) {
        self.plain_refs.extend(refs.iter().cloned());
        self.items.push(ScriptItem::Plain(origin.text));
    }

    /// Remembers a plain declaration's free names; lifting one of them later
    /// would leave the declaration reading a name that no longer exists.
    fn defer(&mut self, refs: &[String], origin: &Origin) {
        for name in refs {
            self.deferred_readers
                .entry(name.clone())
                .or_insert_with(|| origin.clone());
        }
    }

    fn check_deferred_readers(&self, targets: &[String]) -> Result<()> {
        for target in targets {
            if let Some(reader) = self.deferred_readers.get(target) {
                return Err(reader.unsupported(format!("declaration reads '{target}', which is lifted later")));
            }
        }
        Ok(())
    }

    /// A plain (re)binding ends any lifted binding of the same name.
    fn unbind(&mut self, targets: &[String]) {
        for target in targets {
            self.bindings.remove(target);
        }
    }
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Suffixes repeated names with their occurrence count.
fn unique(seen: &mut HashMap<String, usize>, base: String) -> String {
    let count = seen.entry(base.clone()).or_insert(0);
    *count += 1;
    if *count == 1 {
        base
    } else {
        format!("{}_{}", base, *count - 1)
    }
}
