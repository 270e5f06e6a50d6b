use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::error::StoreError;
use crate::item::{MemoryItem, MemorySearchResult};
use crate::score::cosine_similarity;
use crate::store::VectorStore;

/// Linear-scan reference store.
///
/// Maps `id → MemoryItem` under a single coarse mutex; every operation
/// takes the same lock so reads observe a consistent snapshot. Not
/// persistent; it exists to bound the contract and seed tests.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    vector_size: Option<usize>,
    items: HashMap<String, MemoryItem>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("store mutex poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate_write(inner: &Inner, items: &[MemoryItem]) -> Result<(), StoreError> {
        let Some(size) = inner.vector_size else {
            return Err(StoreError::Validation(
                "collection not initialized".to_string(),
            ));
        };
        for item in items {
            if item.embedding.len() != size {
                return Err(StoreError::Validation(format!(
                    "embedding length {} does not match collection dimension {size}",
                    item.embedding.len()
                )));
            }
            if item.data.is_empty() {
                return Err(StoreError::Validation("memory data is empty".to_string()));
            }
        }
        Ok(())
    }

    fn write(&self, items: &[MemoryItem]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        Self::validate_write(&inner, items)?;
        for item in items {
            inner.items.insert(item.id.clone(), item.clone());
        }
        Ok(())
    }
}

fn in_partition(item: &MemoryItem, user_id: Option<&str>) -> bool {
    match user_id {
        Some(user) => item.user_id.as_deref() == Some(user),
        None => true,
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn ensure_collection_exists(
        &self,
        vector_size: usize,
        allow_recreation: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        match inner.vector_size {
            Some(existing) if existing == vector_size => Ok(()),
            Some(existing) => {
                if !allow_recreation {
                    return Err(StoreError::SchemaMismatch {
                        name: "in-memory".to_string(),
                        expected: vector_size,
                        actual: existing,
                    });
                }
                debug!(from = existing, to = vector_size, "recreating in-memory collection");
                inner.items.clear();
                inner.vector_size = Some(vector_size);
                Ok(())
            }
            None => {
                inner.vector_size = Some(vector_size);
                Ok(())
            }
        }
    }

    async fn insert(&self, items: &[MemoryItem]) -> Result<(), StoreError> {
        self.write(items)
    }

    async fn update(&self, items: &[MemoryItem]) -> Result<(), StoreError> {
        self.write(items)
    }

    async fn search(
        &self,
        query: &[f32],
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemorySearchResult>, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let mut results: Vec<MemorySearchResult> = inner
            .items
            .values()
            .filter(|item| in_partition(item, user_id))
            .map(|item| MemorySearchResult {
                score: cosine_similarity(query, &item.embedding),
                memory: item.clone(),
            })
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(limit);
        Ok(results)
    }

    async fn list(
        &self,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryItem>, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let mut items: Vec<MemoryItem> = inner
            .items
            .values()
            .filter(|item| in_partition(item, user_id))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit);
        Ok(items)
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryItem>, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.items.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.items.remove(id);
        Ok(())
    }

    async fn delete_by_user(&self, user_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner
            .items
            .retain(|_, item| item.user_id.as_deref() != Some(user_id));
        Ok(())
    }

    async fn reset(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.items.clear();
        inner.vector_size = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    async fn ready_store(dimension: usize) -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .ensure_collection_exists(dimension, false)
            .await
            .expect("fresh collection");
        store
    }

    fn item(data: &str, embedding: Vec<f32>, user: &str) -> MemoryItem {
        MemoryItem::new(data, embedding).with_user_id(user)
    }

    #[tokio::test]
    async fn round_trip_preserves_fields() -> Result<()> {
        let store = ready_store(3).await;
        let mut metadata = crate::Metadata::new();
        metadata.insert("topic".into(), serde_json::json!("food"));
        let original = item("User likes pizza", vec![1.0, 0.0, 0.0], "u1")
            .with_agent_id("a1")
            .with_run_id("r1")
            .with_metadata(metadata);
        store.insert(std::slice::from_ref(&original)).await?;

        let fetched = store.get(&original.id).await?.expect("inserted item");
        assert_eq!(fetched.data, original.data);
        assert_eq!(fetched.user_id, original.user_id);
        assert_eq!(fetched.agent_id, original.agent_id);
        assert_eq!(fetched.run_id, original.run_id);
        assert_eq!(fetched.metadata, original.metadata);
        assert_eq!(fetched.created_at, original.created_at);
        Ok(())
    }

    #[tokio::test]
    async fn partition_isolation_holds_for_search_and_list() -> Result<()> {
        let store = ready_store(2).await;
        store
            .insert(&[
                item("u1 fact", vec![1.0, 0.0], "u1"),
                item("u2 fact", vec![1.0, 0.0], "u2"),
            ])
            .await?;

        let hits = store.search(&[1.0, 0.0], Some("u1"), 10).await?;
        assert_eq!(hits.len(), 1);
        assert!(hits.iter().all(|h| h.memory.user_id.as_deref() == Some("u1")));

        let listed = store.list(Some("u1"), 10).await?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].user_id.as_deref(), Some("u1"));
        Ok(())
    }

    #[tokio::test]
    async fn search_and_list_respect_limit() -> Result<()> {
        let store = ready_store(2).await;
        let items: Vec<MemoryItem> = (0..5)
            .map(|i| item(&format!("fact {i}"), vec![1.0, 0.0], "u1"))
            .collect();
        store.insert(&items).await?;

        assert_eq!(store.search(&[1.0, 0.0], Some("u1"), 2).await?.len(), 2);
        assert_eq!(store.list(Some("u1"), 3).await?.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn search_orders_by_descending_similarity_with_bounded_scores() -> Result<()> {
        let store = ready_store(2).await;
        store
            .insert(&[
                item("close", vec![1.0, 0.05], "u1"),
                item("far", vec![0.0, 1.0], "u1"),
                item("exact", vec![1.0, 0.0], "u1"),
            ])
            .await?;

        let hits = store.search(&[1.0, 0.0], Some("u1"), 10).await?;
        assert_eq!(hits[0].memory.data, "exact");
        assert_eq!(hits[1].memory.data, "close");
        assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        Ok(())
    }

    #[tokio::test]
    async fn update_replaces_data_and_stamps_updated_at() -> Result<()> {
        let store = ready_store(2).await;
        let mut original = item("old text", vec![1.0, 0.0], "u1");
        store.insert(std::slice::from_ref(&original)).await?;

        original.data = "new text".to_string();
        original.embedding = vec![0.0, 1.0];
        original.touch();
        store.update(std::slice::from_ref(&original)).await?;

        let fetched = store.get(&original.id).await?.expect("updated item");
        assert_eq!(fetched.data, "new text");
        assert!(fetched.updated_at.expect("stamped") >= fetched.created_at);
        Ok(())
    }

    #[tokio::test]
    async fn delete_erases_from_get_and_search() -> Result<()> {
        let store = ready_store(2).await;
        let victim = item("doomed", vec![1.0, 0.0], "u1");
        store.insert(std::slice::from_ref(&victim)).await?;

        store.delete(&victim.id).await?;
        assert!(store.get(&victim.id).await?.is_none());
        assert!(store.search(&[1.0, 0.0], Some("u1"), 10).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn delete_by_user_clears_only_that_partition() -> Result<()> {
        let store = ready_store(2).await;
        store
            .insert(&[
                item("u1 fact", vec![1.0, 0.0], "u1"),
                item("u2 fact", vec![1.0, 0.0], "u2"),
            ])
            .await?;

        store.delete_by_user("u1").await?;
        assert!(store.list(Some("u1"), 10).await?.is_empty());
        assert_eq!(store.list(Some("u2"), 10).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn dimension_mismatch_requires_recreation() -> Result<()> {
        let store = ready_store(1536).await;
        store
            .insert(&[item("fact", vec![0.5; 1536], "u1")])
            .await?;

        let refused = store.ensure_collection_exists(1024, false).await;
        assert!(matches!(
            refused,
            Err(StoreError::SchemaMismatch { expected: 1024, actual: 1536, .. })
        ));

        store.ensure_collection_exists(1024, true).await?;
        assert!(store.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn ensure_is_idempotent_when_dimensions_match() -> Result<()> {
        let store = ready_store(8).await;
        store.insert(&[item("kept", vec![0.1; 8], "u1")]).await?;
        store.ensure_collection_exists(8, false).await?;
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn writes_reject_wrong_dimension_and_uninitialized_collection() {
        let store = InMemoryStore::new();
        let result = store.insert(&[item("early", vec![1.0], "u1")]).await;
        assert!(matches!(result, Err(StoreError::Validation(_))));

        store.ensure_collection_exists(3, false).await.unwrap();
        let result = store.insert(&[item("short", vec![1.0], "u1")]).await;
        assert!(matches!(result, Err(StoreError::Validation(_))));
    }

    #[tokio::test]
    async fn list_returns_newest_first() -> Result<()> {
        let store = ready_store(1).await;
        let mut older = item("older", vec![1.0], "u1");
        older.created_at = chrono::Utc::now() - chrono::Duration::hours(1);
        let newer = item("newer", vec![1.0], "u1");
        store.insert(&[older, newer]).await?;

        let listed = store.list(Some("u1"), 10).await?;
        assert_eq!(listed[0].data, "newer");
        assert_eq!(listed[1].data, "older");
        Ok(())
    }
}
