use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// JSON schema every engine configuration document is checked against
pub const CONFIG_SCHEMA: &str = r#"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "title": "domain-mapper engine configuration",
  "type": "object",
  "additionalProperties": false,
  "properties": {
    "worker_threads": { "type": ["integer", "null"], "minimum": 1 },
    "parallel_bulk": { "type": "boolean" },
    "bulk_parallel_threshold": { "type": "integer", "minimum": 1 },
    "hook_failure": { "type": "string", "enum": ["abort", "skip"] }
  }
}"#;

/// What happens when a post-processor fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookFailurePolicy {
    /// The whole mapping fails
    #[default]
    Abort,
    /// The failure becomes a warning and the remaining hooks still run
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Size of the process-wide pool; CPU count when unset
    pub worker_threads: Option<usize>,
    /// Fan bulk mappings out on the pool
    pub parallel_bulk: bool,
    /// Smallest bulk input that is fanned out
    pub bulk_parallel_threshold: usize,
    pub hook_failure: HookFailurePolicy,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported config file extension: {0}")]
    UnsupportedExtension(String),

    #[error("Failed to compile config schema: {0}")]
    SchemaCompile(String),

    #[error("Config failed schema validation with {} error(s): {}", .0.len(), .0.join("; "))]
    SchemaViolation(Vec<String>),
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            parallel_bulk: true,
            bulk_parallel_threshold: 2,
            hook_failure: HookFailurePolicy::Abort,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads.max(1));
        self
    }

    pub fn with_parallel_bulk(mut self, enabled: bool) -> Self {
        self.parallel_bulk = enabled;
        self
    }

    pub fn with_bulk_parallel_threshold(mut self, threshold: usize) -> Self {
        self.bulk_parallel_threshold = threshold.max(1);
        self
    }

    pub fn with_hook_failure(mut self, policy: HookFailurePolicy) -> Self {
        self.hook_failure = policy;
        self
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let document: serde_json::Value = serde_yaml::from_str(content)?;
        Self::from_document(document)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let document: serde_json::Value = serde_json::from_str(content)?;
        Self::from_document(document)
    }

    /// Loads a `.yaml`/`.yml` or `.json` file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml_str(&content),
            "json" => Self::from_json_str(&content),
            _ => Err(ConfigError::UnsupportedExtension(path.display().to_string())),
        }
    }

    fn from_document(document: serde_json::Value) -> Result<Self, ConfigError> {
        // An empty YAML document means "all defaults"
        let document = if document.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            document
        };

        validate_document(&document)?;
        Ok(serde_json::from_value(document)?)
    }
}

fn validate_document(document: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value = serde_json::from_str(CONFIG_SCHEMA)?;
    let compiled = jsonschema::JSONSchema::compile(&schema).map_err(|e| ConfigError::SchemaCompile(e.to_string()))?;

    if let Err(errors) = compiled.validate(document) {
        let messages: Vec<String> = errors
            .map(|error| format!("{}: {}", error.instance_path, error))
            .collect();
        return Err(ConfigError::SchemaViolation(messages));
    }
    Ok(())
}
