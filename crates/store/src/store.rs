use async_trait::async_trait;

use crate::error::StoreError;
use crate::item::{MemoryItem, MemorySearchResult};

/// The capability set every memory backend provides.
///
/// Backends are variants over this one contract; the orchestrator never
/// sees anything else. All operations are eventually consistent with the
/// backing store. `insert` uses wait-for-visibility semantics where the
/// backend supports it, so a following `get` with the same id observes
/// the item.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if missing. When it exists with a different
    /// declared dimension, recreate it if `allow_recreation` is set and
    /// fail with [`StoreError::SchemaMismatch`] otherwise. Idempotent
    /// when dimensions match.
    async fn ensure_collection_exists(
        &self,
        vector_size: usize,
        allow_recreation: bool,
    ) -> Result<(), StoreError>;

    /// Upsert by id.
    async fn insert(&self, items: &[MemoryItem]) -> Result<(), StoreError>;

    /// Semantically delete-then-insert for the listed ids. Backends with
    /// native upsert may short-circuit.
    async fn update(&self, items: &[MemoryItem]) -> Result<(), StoreError>;

    /// ANN search. `user_id` restricts results to that partition; `None`
    /// means no restriction. Returned scores are similarities in `[0, 1]`,
    /// higher is better.
    async fn search(
        &self,
        query: &[f32],
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemorySearchResult>, StoreError>;

    /// Up to `limit` items for the partition, newest first where the
    /// backend makes that feasible.
    async fn list(&self, user_id: Option<&str>, limit: usize)
    -> Result<Vec<MemoryItem>, StoreError>;

    /// The item, or `None` when the id is unknown.
    async fn get(&self, id: &str) -> Result<Option<MemoryItem>, StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    async fn delete_by_user(&self, user_id: &str) -> Result<(), StoreError>;

    /// Drop the collection and everything in it. Callers re-initialize
    /// before using the store again.
    async fn reset(&self) -> Result<(), StoreError>;
}
