use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::http::{ensure_success, join_url};
use crate::item::{MemoryItem, MemorySearchResult, Metadata};
use crate::score::clamp_score;
use crate::store::VectorStore;

/// Structured vector DB backend speaking the Milvus v2 RESTful API.
///
/// One row per memory: the vector lives in the `embedding` field, scalar
/// fields carry the item attributes verbatim, and `metadata` is
/// stringified to JSON because the row schema cannot hold nested
/// objects. Partition filtering is a scalar expression on `userId`.
pub struct MilvusStore {
    client: reqwest::Client,
    endpoint: String,
    collection: String,
    /// Bearer token; Milvus also accepts the `user:password` form here.
    token: Option<String>,
}

/// A row as the v2 API returns it. Dynamic fields surface at the top
/// level of each row, so this maps 1:1 onto the stored schema.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MilvusRow {
    id: serde_json::Value,
    #[serde(default)]
    embedding: Vec<f32>,
    data: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    metadata: Option<String>,
    #[serde(default)]
    hash: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    /// Present on search responses. With the COSINE metric the v2 API
    /// reports similarity in this field, higher is better.
    #[serde(default)]
    distance: Option<f32>,
}

impl MilvusRow {
    fn into_item(self) -> Result<MemoryItem, StoreError> {
        let metadata: Metadata = match self.metadata.as_deref() {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
            _ => Metadata::new(),
        };
        let id = match self.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(MemoryItem {
            id,
            data: self.data,
            embedding: self.embedding,
            user_id: self.user_id,
            agent_id: self.agent_id,
            run_id: self.run_id,
            metadata,
            hash: self.hash,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const OUTPUT_FIELDS: &[&str] = &[
    "id",
    "embedding",
    "data",
    "userId",
    "agentId",
    "runId",
    "metadata",
    "hash",
    "createdAt",
    "updatedAt",
];

/// Escape a string literal for a Milvus filter expression. Backslashes
/// and double quotes are the reserved characters inside `"…"`.
fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn user_filter(user_id: &str) -> String {
    format!("userId == \"{}\"", escape_literal(user_id))
}

fn item_to_row(item: &MemoryItem) -> Result<serde_json::Value, StoreError> {
    let mut row = json!({
        "id": item.id,
        "embedding": item.embedding,
        "data": item.data,
        "createdAt": item.created_at,
    });
    if let Some(user) = &item.user_id {
        row["userId"] = json!(user);
    }
    if let Some(agent) = &item.agent_id {
        row["agentId"] = json!(agent);
    }
    if let Some(run) = &item.run_id {
        row["runId"] = json!(run);
    }
    if !item.metadata.is_empty() {
        row["metadata"] = json!(serde_json::to_string(&item.metadata)?);
    }
    if let Some(hash) = &item.hash {
        row["hash"] = json!(hash);
    }
    if let Some(updated) = &item.updated_at {
        row["updatedAt"] = json!(updated);
    }
    Ok(row)
}

impl MilvusStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            collection: collection.into(),
            token,
        }
    }

    /// POST a v2 API request and unwrap the `{code, message, data}`
    /// envelope. The API reports failures with HTTP 200 and a non-zero
    /// in-body code, so both layers are checked here.
    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, StoreError> {
        let mut request = self.client.post(join_url(&self.endpoint, path)).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = ensure_success(request.send().await?).await?;
        let status = response.status().as_u16();
        let envelope: serde_json::Value = response.json().await?;
        let code = envelope.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
        if code != 0 {
            let message = envelope
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown milvus error");
            return Err(StoreError::Protocol {
                status,
                body: format!("code {code}: {message}"),
            });
        }
        Ok(envelope.get("data").cloned().unwrap_or(serde_json::Value::Null))
    }

    /// Declared dimension of the remote collection, or `None` when it
    /// does not exist. Read from the `embedding` field's `dim` param in
    /// the describe response.
    async fn remote_dimension(&self) -> Result<Option<usize>, StoreError> {
        let has = self
            .post(
                "v2/vectordb/collections/has",
                json!({ "collectionName": self.collection }),
            )
            .await?;
        if !has.get("has").and_then(|h| h.as_bool()).unwrap_or(false) {
            return Ok(None);
        }

        let described = self
            .post(
                "v2/vectordb/collections/describe",
                json!({ "collectionName": self.collection }),
            )
            .await?;
        let dimension = described
            .get("fields")
            .and_then(|fields| fields.as_array())
            .into_iter()
            .flatten()
            .filter(|field| field.get("name").and_then(|n| n.as_str()) == Some("embedding"))
            .filter_map(|field| field.get("params").and_then(|p| p.as_array()))
            .flatten()
            .filter(|param| param.get("key").and_then(|k| k.as_str()) == Some("dim"))
            .filter_map(|param| param.get("value"))
            .filter_map(|value| match value {
                serde_json::Value::String(s) => s.parse::<usize>().ok(),
                serde_json::Value::Number(n) => n.as_u64().map(|n| n as usize),
                _ => None,
            })
            .next();

        dimension.map(Some).ok_or_else(|| StoreError::Protocol {
            status: 200,
            body: format!(
                "collection '{}' describe response has no embedding dimension",
                self.collection
            ),
        })
    }

    async fn create_collection(&self, vector_size: usize) -> Result<(), StoreError> {
        self.post(
            "v2/vectordb/collections/create",
            json!({
                "collectionName": self.collection,
                "dimension": vector_size,
                "metricType": "COSINE",
                "idType": "VarChar",
                "primaryFieldName": "id",
                "vectorFieldName": "embedding",
                "params": { "max_length": "64" },
            }),
        )
        .await?;
        Ok(())
    }

    async fn drop_collection(&self) -> Result<(), StoreError> {
        self.post(
            "v2/vectordb/collections/drop",
            json!({ "collectionName": self.collection }),
        )
        .await?;
        Ok(())
    }

    async fn write(&self, path: &str, items: &[MemoryItem]) -> Result<(), StoreError> {
        if items.is_empty() {
            return Ok(());
        }
        let rows = items
            .iter()
            .map(item_to_row)
            .collect::<Result<Vec<_>, _>>()?;
        self.post(
            path,
            json!({ "collectionName": self.collection, "data": rows }),
        )
        .await?;
        debug!(count = items.len(), collection = %self.collection, "wrote rows");
        Ok(())
    }
}

#[async_trait]
impl VectorStore for MilvusStore {
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
        self.write("v2/vectordb/entities/insert", items).await
    }

    async fn update(&self, items: &[MemoryItem]) -> Result<(), StoreError> {
        // Native upsert replaces the whole row for each id.
        self.write("v2/vectordb/entities/upsert", items).await
    }

    async fn search(
        &self,
        query: &[f32],
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemorySearchResult>, StoreError> {
        let mut body = json!({
            "collectionName": self.collection,
            "data": [query],
            "annsField": "embedding",
            "limit": limit,
            "outputFields": OUTPUT_FIELDS,
        });
        if let Some(user) = user_id {
            body["filter"] = json!(user_filter(user));
        }
        let data = self.post("v2/vectordb/entities/search", body).await?;
        let rows: Vec<MilvusRow> = serde_json::from_value(data)?;
        rows.into_iter()
            .map(|row| {
                let score = clamp_score(row.distance.unwrap_or(0.0));
                Ok(MemorySearchResult {
                    memory: row.into_item()?,
                    score,
                })
            })
            .collect()
    }

    async fn list(
        &self,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryItem>, StoreError> {
        // `query` requires a filter; an always-true expression stands in
        // when no partition is requested.
        let filter = match user_id {
            Some(user) => user_filter(user),
            None => "id != \"\"".to_string(),
        };
        let data = self
            .post(
                "v2/vectordb/entities/query",
                json!({
                    "collectionName": self.collection,
                    "filter": filter,
                    "limit": limit,
                    "outputFields": OUTPUT_FIELDS,
                }),
            )
            .await?;
        let rows: Vec<MilvusRow> = serde_json::from_value(data)?;
        let mut items = rows
            .into_iter()
            .map(MilvusRow::into_item)
            .collect::<Result<Vec<_>, _>>()?;
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryItem>, StoreError> {
        let data = self
            .post(
                "v2/vectordb/entities/get",
                json!({
                    "collectionName": self.collection,
                    "id": [id],
                    "outputFields": OUTPUT_FIELDS,
                }),
            )
            .await?;
        let rows: Vec<MilvusRow> = serde_json::from_value(data)?;
        rows.into_iter().next().map(MilvusRow::into_item).transpose()
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.post(
            "v2/vectordb/entities/delete",
            json!({
                "collectionName": self.collection,
                "filter": format!("id == \"{}\"", escape_literal(id)),
            }),
        )
        .await?;
        Ok(())
    }

    async fn delete_by_user(&self, user_id: &str) -> Result<(), StoreError> {
        self.post(
            "v2/vectordb/entities/delete",
            json!({
                "collectionName": self.collection,
                "filter": user_filter(user_id),
            }),
        )
        .await?;
        Ok(())
    }

    async fn reset(&self) -> Result<(), StoreError> {
        self.drop_collection().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_escapes_quotes_and_backslashes() {
        assert_eq!(user_filter("plain"), "userId == \"plain\"");
        assert_eq!(
            user_filter("o\"hara\\x"),
            "userId == \"o\\\"hara\\\\x\""
        );
    }

    #[test]
    fn rows_carry_scalar_fields_and_stringified_metadata() {
        let mut metadata = Metadata::new();
        metadata.insert("lang".into(), serde_json::json!("en"));
        let item = MemoryItem::new("User speaks English", vec![0.0, 1.0])
            .with_user_id("u1")
            .with_metadata(metadata);

        let row = item_to_row(&item).unwrap();
        assert_eq!(row["id"], item.id.as_str());
        assert_eq!(row["data"], "User speaks English");
        assert_eq!(row["userId"], "u1");
        // Nested metadata travels as a JSON string.
        let raw = row["metadata"].as_str().unwrap();
        let parsed: Metadata = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed["lang"], serde_json::json!("en"));
        assert!(row.get("updatedAt").is_none());
    }

    #[test]
    fn row_decodes_back_into_item() {
        let raw = json!({
            "id": "mem-1",
            "embedding": [0.5, 0.5],
            "data": "User likes rowing",
            "userId": "u1",
            "metadata": "{\"sport\":\"rowing\"}",
            "createdAt": "2026-03-01T10:00:00Z",
            "updatedAt": "2026-03-02T10:00:00Z",
            "distance": 0.93,
        });
        let row: MilvusRow = serde_json::from_value(raw).unwrap();
        assert_eq!(row.distance, Some(0.93));
        let item = row.into_item().unwrap();
        assert_eq!(item.id, "mem-1");
        assert_eq!(item.metadata["sport"], serde_json::json!("rowing"));
        assert!(item.updated_at.unwrap() > item.created_at);
    }

    #[test]
    fn missing_metadata_decodes_to_empty_map() {
        let raw = json!({
            "id": "mem-2",
            "data": "bare",
            "createdAt": "2026-03-01T10:00:00Z",
        });
        let item: MemoryItem = serde_json::from_value::<MilvusRow>(raw)
            .unwrap()
            .into_item()
            .unwrap();
        assert!(item.metadata.is_empty());
        assert!(item.embedding.is_empty());
    }
}
