use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::http::{ensure_success, join_url};
use crate::item::{MemoryItem, MemorySearchResult, Metadata};
use crate::score::clamp_score;
use crate::store::VectorStore;

/// Document-payload ANN backend speaking the Qdrant REST API.
///
/// One point per memory; everything except id and vector travels in the
/// point payload under the stable keys `data`, `userId`, `agentId`,
/// `runId`, `metadata`, `createdAt`, `updatedAt`, `hash`. Writes use
/// `wait=true` so a following `get` observes them.
pub struct QdrantStore {
    client: reqwest::Client,
    endpoint: String,
    collection: String,
    api_key: Option<String>,
}

/// Payload half of a point; the id and vector are carried beside it.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PointPayload {
    data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    metadata: Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

impl From<&MemoryItem> for PointPayload {
    fn from(item: &MemoryItem) -> Self {
        Self {
            data: item.data.clone(),
            user_id: item.user_id.clone(),
            agent_id: item.agent_id.clone(),
            run_id: item.run_id.clone(),
            metadata: item.metadata.clone(),
            hash: item.hash.clone(),
            created_at: item.created_at,
            updated_at: item.updated_at,
        }
    }
}

impl PointPayload {
    fn into_item(self, id: String, embedding: Vec<f32>) -> MemoryItem {
        MemoryItem {
            id,
            data: self.data,
            embedding,
            user_id: self.user_id,
            agent_id: self.agent_id,
            run_id: self.run_id,
            metadata: self.metadata,
            hash: self.hash,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    config: CollectionConfig,
}

#[derive(Debug, Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Debug, Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Debug, Deserialize)]
struct VectorParams {
    size: usize,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: serde_json::Value,
    score: f32,
    payload: PointPayload,
}

#[derive(Debug, Deserialize)]
struct RetrievedPoint {
    id: serde_json::Value,
    payload: PointPayload,
    #[serde(default)]
    vector: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct ScrollPage {
    points: Vec<RetrievedPoint>,
}

/// Qdrant renders point ids either as JSON strings or integers.
fn id_to_string(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn user_filter(user_id: &str) -> serde_json::Value {
    json!({
        "must": [{ "key": "userId", "match": { "value": user_id } }]
    })
}

fn partition_filter(user_id: Option<&str>) -> Option<serde_json::Value> {
    user_id.map(user_filter)
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            collection: collection.into(),
            api_key,
        }
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.endpoint, path)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    /// Declared dimension of the remote collection, or `None` when the
    /// collection does not exist.
    async fn remote_dimension(&self) -> Result<Option<usize>, StoreError> {
        let response = self
            .request(self.client.get(self.url(&format!("collections/{}", self.collection))))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let envelope: Envelope<CollectionInfo> = ensure_success(response).await?.json().await?;
        Ok(Some(envelope.result.config.params.vectors.size))
    }

    async fn create_collection(&self, vector_size: usize) -> Result<(), StoreError> {
        let body = json!({
            "vectors": { "size": vector_size, "distance": "Cosine" }
        });
        let response = self
            .request(self.client.put(self.url(&format!("collections/{}", self.collection))))
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn drop_collection(&self) -> Result<(), StoreError> {
        let response = self
            .request(
                self.client
                    .delete(self.url(&format!("collections/{}", self.collection))),
            )
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn upsert(&self, items: &[MemoryItem]) -> Result<(), StoreError> {
        if items.is_empty() {
            return Ok(());
        }
        let points: Vec<serde_json::Value> = items
            .iter()
            .map(|item| {
                json!({
                    "id": item.id,
                    "vector": item.embedding,
                    "payload": PointPayload::from(item),
                })
            })
            .collect();
        let response = self
            .request(
                self.client
                    .put(self.url(&format!("collections/{}/points", self.collection)))
                    .query(&[("wait", "true")]),
            )
            .json(&json!({ "points": points }))
            .send()
            .await?;
        ensure_success(response).await?;
        debug!(count = items.len(), collection = %self.collection, "upserted points");
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection_exists(
        &self,
        vector_size: usize,
        allow_recreation: bool,
    ) -> Result<(), StoreError> {
        match self.remote_dimension().await? {
            Some(actual) if actual == vector_size => Ok(()),
            Some(actual) => {
                if !allow_recreation {
                    return Err(StoreError::SchemaMismatch {
                        name: self.collection.clone(),
                        expected: vector_size,
                        actual,
                    });
                }
                info!(
                    collection = %self.collection,
                    from = actual,
                    to = vector_size,
                    "recreating collection with new dimension"
                );
                self.drop_collection().await?;
                self.create_collection(vector_size).await
            }
            None => self.create_collection(vector_size).await,
        }
    }

    async fn insert(&self, items: &[MemoryItem]) -> Result<(), StoreError> {
        self.upsert(items).await
    }

    async fn update(&self, items: &[MemoryItem]) -> Result<(), StoreError> {
        // Points are upserted whole, so this is the delete-then-insert
        // the contract asks for.
        self.upsert(items).await
    }

    async fn search(
        &self,
        query: &[f32],
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemorySearchResult>, StoreError> {
        let mut body = json!({
            "vector": query,
            "limit": limit,
            "with_payload": true,
            "with_vector": false,
        });
        if let Some(filter) = partition_filter(user_id) {
            body["filter"] = filter;
        }
        let response = self
            .request(
                self.client
                    .post(self.url(&format!("collections/{}/points/search", self.collection))),
            )
            .json(&body)
            .send()
            .await?;
        let envelope: Envelope<Vec<ScoredPoint>> = ensure_success(response).await?.json().await?;
        Ok(envelope
            .result
            .into_iter()
            .map(|point| MemorySearchResult {
                // Qdrant reports cosine similarity natively.
                score: clamp_score(point.score),
                memory: point.payload.into_item(id_to_string(&point.id), Vec::new()),
            })
            .collect())
    }

    async fn list(
        &self,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryItem>, StoreError> {
        let mut body = json!({
            "limit": limit,
            "with_payload": true,
            "with_vector": true,
        });
        if let Some(filter) = partition_filter(user_id) {
            body["filter"] = filter;
        }
        let response = self
            .request(
                self.client
                    .post(self.url(&format!("collections/{}/points/scroll", self.collection))),
            )
            .json(&body)
            .send()
            .await?;
        let envelope: Envelope<ScrollPage> = ensure_success(response).await?.json().await?;
        let mut items: Vec<MemoryItem> = envelope
            .result
            .points
            .into_iter()
            .map(|point| {
                let id = id_to_string(&point.id);
                point.payload.into_item(id, point.vector.unwrap_or_default())
            })
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryItem>, StoreError> {
        let body = json!({
            "ids": [id],
            "with_payload": true,
            "with_vector": true,
        });
        let response = self
            .request(
                self.client
                    .post(self.url(&format!("collections/{}/points", self.collection))),
            )
            .json(&body)
            .send()
            .await?;
        let envelope: Envelope<Vec<RetrievedPoint>> =
            ensure_success(response).await?.json().await?;
        Ok(envelope.result.into_iter().next().map(|point| {
            let id = id_to_string(&point.id);
            point.payload.into_item(id, point.vector.unwrap_or_default())
        }))
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let response = self
            .request(
                self.client
                    .post(self.url(&format!("collections/{}/points/delete", self.collection)))
                    .query(&[("wait", "true")]),
            )
            .json(&json!({ "points": [id] }))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn delete_by_user(&self, user_id: &str) -> Result<(), StoreError> {
        let filter = user_filter(user_id);
        let response = self
            .request(
                self.client
                    .post(self.url(&format!("collections/{}/points/delete", self.collection)))
                    .query(&[("wait", "true")]),
            )
            .json(&json!({ "filter": filter }))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn reset(&self) -> Result<(), StoreError> {
        self.drop_collection().await
    }
}
