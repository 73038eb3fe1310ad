//! Interpreter options forwarded to the engine at load time.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::InferenceError;
use crate::Result;

/// Graph optimization level requested from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationLevel {
    Disabled,
    Basic,
    Extended,
    All,
}

/// Engine configuration.
///
/// The session never reads these fields; each adapter maps the ones its
/// engine understands and ignores the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterOptions {
    /// Number of intra-op CPU threads.
    pub num_threads: usize,

    /// Graph optimization level.
    pub optimization: OptimizationLevel,

    /// Register the XNNPACK execution provider (ort only).
    pub use_xnnpack: bool,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            num_threads: 4,
            optimization: OptimizationLevel::All,
            use_xnnpack: true,
        }
    }
}

impl InterpreterOptions {
    /// Load options from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| InferenceError::Config(e.to_string()))
    }

    /// Save options to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| InferenceError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn with_optimization(mut self, optimization: OptimizationLevel) -> Self {
        self.optimization = optimization;
        self
    }

    pub fn with_xnnpack(mut self, use_xnnpack: bool) -> Self {
        self.use_xnnpack = use_xnnpack;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_fields_take_defaults() {
        let options: InterpreterOptions = serde_json::from_str(r#"{"num_threads": 2}"#).unwrap();
        assert_eq!(options.num_threads, 2);
        assert_eq!(options.optimization, OptimizationLevel::All);
        assert!(options.use_xnnpack);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        let options = InterpreterOptions::default()
            .with_num_threads(1)
            .with_optimization(OptimizationLevel::Disabled)
            .with_xnnpack(false);
        options.save(&path).unwrap();
        assert_eq!(InterpreterOptions::from_file(&path).unwrap(), options);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = InterpreterOptions::from_file(&path).unwrap_err();
        assert!(matches!(err, InferenceError::Config(_)));
    }
}
