use crate::atom::AtomDefinition;
use crate::error::{Result, WorkflowError};
use std::collections::HashMap;

/// Atom definitions keyed by name, remembering registration order.
#[derive(Debug, Default, Clone)]
pub struct AtomRegistry {
    atoms: HashMap<String, AtomDefinition>,
    order: Vec<String>,
}

impl AtomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, atom: AtomDefinition) -> Result<()> {
        use std::collections::hash_map::Entry;
        match self.atoms.entry(atom.name.clone()) {
            Entry::Occupied(entry) => Err(WorkflowError::DuplicateAtom {
                name: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                tracing::debug!("Registered atom {}", atom.describe());
                self.order.push(atom.name.clone());
                entry.insert(atom);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<&AtomDefinition> {
        self.atoms.get(name).ok_or_else(|| WorkflowError::UnknownAtom {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.atoms.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Atom names in registration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Definitions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &AtomDefinition> {
        self.order.iter().filter_map(|name| self.atoms.get(name))
    }

    pub fn registration_index(&self, name: &str) -> Option<usize> {
        self.order.iter().position(|n| n == name)
    }

    /// Effective dependencies of an atom: the manual list when one was given,
    /// otherwise every parameter that names a registered atom, in parameter order.
    pub fn dependencies_of(&self, atom: &AtomDefinition) -> Vec<String> {
        if let Some(manual) = &atom.dependencies {
            return manual.clone();
        }

        let mut inferred: Vec<String> = Vec::new();
        for param in atom.params.iter().flatten() {
            if param != &atom.name && self.contains(param) && !inferred.contains(param) {
                inferred.push(param.clone());
            }
        }
        inferred
    }
}
