//! Content fingerprints and the per-atom cache.
//!
//! Fingerprints hash values, not identities: two structurally equal JSON
//! values computed independently fingerprint equally, because `serde_json`
//! renders object keys in sorted order.

use crate::atom::AtomDefinition;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of_value(value: &Value) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(value.to_string().as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolved inputs of one atom invocation, as seen by the fingerprint.
#[derive(Debug, Default)]
pub struct ResolvedInputs<'a> {
    /// Every effective dependency with its output, in declaration order.
    pub dependencies: Vec<(&'a str, &'a Value)>,
    /// External inputs read by the atom's parameters.
    pub external: Vec<(&'a str, &'a Value)>,
}

#[derive(Debug, Clone)]
pub struct FingerprintEntry {
    pub input_fingerprint: Fingerprint,
    pub output_fingerprint: Fingerprint,
    pub cached_value: Value,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct FingerprintStore {
    entries: HashMap<String, FingerprintEntry>,
}

impl FingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pure digest of the atom identity and its resolved inputs.
    pub fn compute_input_fingerprint(atom: &AtomDefinition, inputs: &ResolvedInputs<'_>) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(b"atom:");
        hasher.update(atom.name.as_bytes());
        hasher.update(b"\0version:");
        hasher.update(atom.version.as_deref().unwrap_or("").as_bytes());

        for (name, value) in &inputs.dependencies {
            hasher.update(b"\0dep:");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(Fingerprint::of_value(value).as_str().as_bytes());
        }
        for (name, value) in &inputs.external {
            hasher.update(b"\0input:");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(Fingerprint::of_value(value).as_str().as_bytes());
        }

        Fingerprint(format!("{:x}", hasher.finalize()))
    }

    pub fn is_cache_valid(&self, atom_name: &str, fingerprint: &Fingerprint) -> bool {
        self.entries
            .get(atom_name)
            .is_some_and(|entry| &entry.input_fingerprint == fingerprint)
    }

    pub fn record(&mut self, atom_name: &str, fingerprint: Fingerprint, value: Value) {
        let output_fingerprint = Fingerprint::of_value(&value);
        self.entries.insert(
            atom_name.to_string(),
            FingerprintEntry {
                input_fingerprint: fingerprint,
                output_fingerprint,
                cached_value: value,
                recorded_at: Utc::now(),
            },
        );
    }

    pub fn invalidate(&mut self, atom_name: &str) -> bool {
        self.entries.remove(atom_name).is_some()
    }

    pub fn get(&self, atom_name: &str) -> Option<&FingerprintEntry> {
        self.entries.get(atom_name)
    }

    pub fn cached_value(&self, atom_name: &str) -> Option<&Value> {
        self.entries.get(atom_name).map(|entry| &entry.cached_value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn atom(name: &str) -> AtomDefinition {
        AtomDefinition::new(name, |_: &[Value]| Ok(Value::Null))
    }

    #[test]
    fn test_value_fingerprint_is_structural() {
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": [1, 2]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y": [1, 2], "x": 1}"#).unwrap();
        assert_eq!(Fingerprint::of_value(&a), Fingerprint::of_value(&b));
        assert_ne!(Fingerprint::of_value(&a), Fingerprint::of_value(&json!({"x": 2})));
    }

    #[test]
    fn test_input_fingerprint_depends_on_values() {
        let def = atom("sum");
        let one = json!(1);
        let two = json!(2);

        let first = FingerprintStore::compute_input_fingerprint(
            &def,
            &ResolvedInputs {
                dependencies: vec![("a", &one)],
                external: vec![],
            },
        );
        let same = FingerprintStore::compute_input_fingerprint(
            &def,
            &ResolvedInputs {
                dependencies: vec![("a", &one)],
                external: vec![],
            },
        );
        let changed = FingerprintStore::compute_input_fingerprint(
            &def,
            &ResolvedInputs {
                dependencies: vec![("a", &two)],
                external: vec![],
            },
        );

        assert_eq!(first, same);
        assert_ne!(first, changed);
    }

    #[test]
    fn test_zero_dependency_fingerprint_uses_identity() {
        let mut v1 = atom("source");
        v1.version = Some("1".to_string());
        let mut v2 = atom("source");
        v2.version = Some("2".to_string());

        let empty = ResolvedInputs::default();
        assert_eq!(
            FingerprintStore::compute_input_fingerprint(&v1, &empty),
            FingerprintStore::compute_input_fingerprint(&v1, &empty)
        );
        assert_ne!(
            FingerprintStore::compute_input_fingerprint(&v1, &empty),
            FingerprintStore::compute_input_fingerprint(&v2, &empty)
        );
        assert_ne!(
            FingerprintStore::compute_input_fingerprint(&v1, &empty),
            FingerprintStore::compute_input_fingerprint(&atom("other"), &empty)
        );
    }

    #[test]
    fn test_record_and_invalidate() {
        let mut store = FingerprintStore::new();
        let fp = FingerprintStore::compute_input_fingerprint(&atom("a"), &ResolvedInputs::default());

        assert!(!store.is_cache_valid("a", &fp));
        store.record("a", fp.clone(), json!({"rows": 3}));
        assert!(store.is_cache_valid("a", &fp));
        assert_eq!(store.cached_value("a"), Some(&json!({"rows": 3})));
        assert_eq!(
            store.get("a").unwrap().output_fingerprint,
            Fingerprint::of_value(&json!({"rows": 3}))
        );

        assert!(store.invalidate("a"));
        assert!(!store.is_cache_valid("a", &fp));
        assert!(!store.invalidate("a"));
        assert!(store.is_empty());
    }
}
