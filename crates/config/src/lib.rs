//! Static configuration for the MemNet memory layer.
//!
//! Options are loaded from a JSON settings file and live under the
//! top-level `"MemNet"` key, with PascalCase field names on the wire
//! (`VectorStore.Endpoint`, `DuplicateThreshold`, …). Every component
//! receives an immutable slice of this bundle at construction; nothing
//! here is consulted again after startup.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct VectorStoreConfig {
    pub endpoint: String,
    pub collection_name: String,
    /// Optional credential. Redis-style backends accept the
    /// `user:password` form; see [`VectorStoreConfig::credentials`].
    pub api_key: Option<String>,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            collection_name: "memnet_collection".to_string(),
            api_key: None,
        }
    }
}

impl VectorStoreConfig {
    /// Split the api key into `(user, password)` for backends that
    /// authenticate with both. A key without `:` yields an empty user
    /// and the whole key as the password.
    pub fn credentials(&self) -> Option<(String, String)> {
        let key = self.api_key.as_deref()?;
        match key.split_once(':') {
            Some((user, password)) => Some((user.to_string(), password.to_string())),
            None => Some((String::new(), key.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct EmbedderConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct MemNetConfig {
    pub vector_store: VectorStoreConfig,
    #[serde(rename = "LLM")]
    pub llm: LlmConfig,
    pub embedder: EmbedderConfig,
    /// Similarity cut-off for the duplicate merge path. Higher means
    /// "more similar"; a candidate merges into an existing memory when
    /// `score > duplicate_threshold`.
    pub duplicate_threshold: f32,
    pub enable_reranking: bool,
    /// Reserved for conversation-history tracking.
    pub history_limit: usize,
}

impl Default for MemNetConfig {
    fn default() -> Self {
        Self {
            vector_store: VectorStoreConfig::default(),
            llm: LlmConfig::default(),
            embedder: EmbedderConfig::default(),
            duplicate_threshold: 0.6,
            enable_reranking: true,
            history_limit: 10,
        }
    }
}

/// Shape of the settings file: everything MemNet reads sits under one key
/// so the file can be shared with the hosting application.
#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(rename = "MemNet", default)]
    memnet: MemNetConfig,
}

impl MemNetConfig {
    /// Load from a JSON settings file. The file must exist; keys missing
    /// under `"MemNet"` fall back to their defaults.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let settings: SettingsFile = serde_json::from_str(&raw)?;
        Ok(settings.memnet)
    }

    /// Reject contradictory or unusable option combinations before any
    /// component is constructed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vector_store.endpoint.is_empty() && self.vector_store.api_key.is_some() {
            return Err(ConfigError::Invalid(
                "vector store api key set without an endpoint".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.duplicate_threshold) {
            return Err(ConfigError::Invalid(format!(
                "duplicate threshold {} outside [0, 1]",
                self.duplicate_threshold
            )));
        }
        if self.vector_store.collection_name.is_empty() {
            return Err(ConfigError::Invalid("collection name is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = MemNetConfig::default();
        assert_eq!(config.vector_store.collection_name, "memnet_collection");
        assert_eq!(config.duplicate_threshold, 0.6);
        assert!(config.enable_reranking);
        assert_eq!(config.history_limit, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_pascal_case_json_under_memnet_key() {
        let raw = r#"{
            "Logging": {"Level": "info"},
            "MemNet": {
                "VectorStore": {"Endpoint": "http://localhost:6333", "CollectionName": "facts"},
                "LLM": {"Endpoint": "http://localhost:11434/v1", "Model": "qwen2.5", "ApiKey": "sk-x"},
                "Embedder": {"Endpoint": "http://localhost:11434/v1", "Model": "nomic-embed-text"},
                "DuplicateThreshold": 0.9,
                "EnableReranking": false
            }
        }"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(raw.as_bytes()).unwrap();

        let config = MemNetConfig::load_from(file.path()).unwrap();
        assert_eq!(config.vector_store.endpoint, "http://localhost:6333");
        assert_eq!(config.vector_store.collection_name, "facts");
        assert_eq!(config.llm.model, "qwen2.5");
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-x"));
        assert_eq!(config.embedder.model, "nomic-embed-text");
        assert_eq!(config.duplicate_threshold, 0.9);
        assert!(!config.enable_reranking);
        // Unset keys keep their defaults.
        assert_eq!(config.history_limit, 10);
    }

    #[test]
    fn missing_memnet_key_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{\"Other\": {}}").unwrap();

        let config = MemNetConfig::load_from(file.path()).unwrap();
        assert_eq!(config.vector_store.collection_name, "memnet_collection");
    }

    #[test]
    fn credentials_split_user_and_password() {
        let store = VectorStoreConfig {
            api_key: Some("admin:hunter2".to_string()),
            ..VectorStoreConfig::default()
        };
        assert_eq!(
            store.credentials(),
            Some(("admin".to_string(), "hunter2".to_string()))
        );

        let bare = VectorStoreConfig {
            api_key: Some("hunter2".to_string()),
            ..VectorStoreConfig::default()
        };
        assert_eq!(bare.credentials(), Some((String::new(), "hunter2".to_string())));

        assert_eq!(VectorStoreConfig::default().credentials(), None);
    }

    #[test]
    fn validate_rejects_out_of_range_threshold() {
        let config = MemNetConfig {
            duplicate_threshold: 1.5,
            ..MemNetConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validate_rejects_key_without_endpoint() {
        let config = MemNetConfig {
            vector_store: VectorStoreConfig {
                api_key: Some("secret".to_string()),
                ..VectorStoreConfig::default()
            },
            ..MemNetConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
