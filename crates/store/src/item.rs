use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Arbitrary attribute bag attached to each memory. Values are
/// JSON-representable scalars or nested objects.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// The unit of persisted memory: one atomic factual statement plus its
/// embedding, partition keys, and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryItem {
    pub id: String,
    pub data: String,
    /// Fixed-length vector; its length must equal the collection's
    /// declared dimension at all times.
    pub embedding: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
    /// Reserved content fingerprint for exact-duplicate short-circuit.
    /// Carried opaquely; nothing sets or consults it yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Absent until the first mutation after creation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl MemoryItem {
    /// Create a fresh item with a generated id and `created_at = now`.
    pub fn new(data: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            data: data.into(),
            embedding,
            user_id: None,
            agent_id: None,
            run_id: None,
            metadata: Metadata::new(),
            hash: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Mark the item as mutated now. `created_at` never changes.
    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

/// Transient join of a stored item and its similarity to a query.
/// `score` is a similarity in `[0, 1]`; the embedding may be left empty
/// by backends that do not return vectors from search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySearchResult {
    pub memory: MemoryItem,
    pub score: f32,
}
