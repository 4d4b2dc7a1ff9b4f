use crate::lifting::LiftOptions;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

const APP_NAME: &str = "atomflow";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads; 1 runs atoms one at a time in topological order.
    pub max_concurrency: usize,
    /// Emit the rewritten form of lifted scripts at debug level.
    pub log_rewritten_source: bool,
    /// Calls lifted as reactive producers.
    pub reactive_operations: Vec<String>,
    /// UI-producing calls; these also receive a component id.
    pub component_operations: Vec<String>,
    pub default_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            log_rewritten_source: false,
            reactive_operations: ["get_df", "query", "load_data"]
                .into_iter()
                .map(String::from)
                .collect(),
            component_operations: [
                "alert", "button", "chart", "checkbox", "image", "progress", "selectbox",
                "slider", "table", "text", "text_input",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            default_retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load(APP_NAME, None)
    }

    pub fn load_path(path: &Path) -> Result<Self, confy::ConfyError> {
        confy::load_path(path)
    }

    pub fn store_path(&self, path: &Path) -> Result<(), confy::ConfyError> {
        confy::store_path(path, self)
    }

    pub fn lift_options(&self) -> LiftOptions {
        LiftOptions {
            reactive_operations: self.reactive_operations.iter().cloned().collect(),
            component_operations: self.component_operations.iter().cloned().collect(),
            log_rewritten_source: self.log_rewritten_source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Backoff;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("atomflow.toml");

        let config = EngineConfig::load_path(&path).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn test_store_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("atomflow.toml");

        let config = EngineConfig {
            max_concurrency: 4,
            log_rewritten_source: true,
            reactive_operations: vec!["fetch".to_string()],
            default_retry: RetryPolicy::new(3).with_backoff(Backoff::Exponential {
                base_ms: 50,
                max_ms: 400,
            }),
            ..EngineConfig::default()
        };
        config.store_path(&path).unwrap();

        let loaded = EngineConfig::load_path(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("atomflow.toml");
        std::fs::write(&path, "max_concurrency = 2\n").unwrap();

        let loaded = EngineConfig::load_path(&path).unwrap();
        assert_eq!(loaded.max_concurrency, 2);
        assert_eq!(loaded.default_retry, RetryPolicy::default());
        assert!(loaded.component_operations.contains(&"slider".to_string()));
    }

    #[test]
    fn test_lift_options() {
        let options = EngineConfig::default().lift_options();
        assert!(options.component_operations.contains("table"));
        assert!(options.reactive_operations.contains("get_df"));
    }
}
