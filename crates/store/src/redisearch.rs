use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{IntoConnectionInfo, Value};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::item::{MemoryItem, MemorySearchResult, Metadata};
use crate::score::similarity_from_distance;
use crate::store::VectorStore;

/// Redis-module backend: one hash per memory keyed `{collection}:{id}`,
/// searched through a RediSearch HNSW index over the `embedding` field
/// with the COSINE metric.
///
/// The embedding travels as little-endian float32 bytes; `metadata` is a
/// JSON string; timestamps are RFC 3339 strings. RediSearch reports
/// cosine *distance* in `__embedding_score`, converted to similarity on
/// the way out. The documented hash layout is extended with `agent_id`
/// and `run_id` so items round-trip whole.
pub struct RedisStore {
    conn: ConnectionManager,
    collection: String,
    index: String,
}

const SCORE_FIELD: &str = "__embedding_score";

/// Result-set cap when collecting keys for a partition-wide delete.
const DELETE_SCAN_LIMIT: usize = 10_000;

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Escape RediSearch query syntax inside a tag value. Every character
/// outside `[A-Za-z0-9_]` is reserved somewhere in the query language
/// (hyphens, colons, at-signs, braces, …), so all of them are escaped.
fn escape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if !ch.is_alphanumeric() && ch != '_' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Compose the KNN query: exactly one KNN clause referencing exactly one
/// `$vec` parameter, with the partition filter as the prefilter.
fn knn_query(user_id: Option<&str>, k: usize) -> String {
    let prefilter = match user_id {
        Some(user) => format!("(@user_id:{{{}}})", escape_tag(user)),
        None => "(*)".to_string(),
    };
    format!("{prefilter}=>[KNN {k} @embedding $vec AS {SCORE_FIELD}]")
}

fn tag_query(user_id: Option<&str>) -> String {
    match user_id {
        Some(user) => format!("@user_id:{{{}}}", escape_tag(user)),
        None => "*".to_string(),
    }
}

/// Flatten an item into the hash field list written with HSET.
fn item_to_fields(item: &MemoryItem) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
    let mut fields: Vec<(String, Vec<u8>)> = vec![
        ("id".into(), item.id.clone().into_bytes()),
        ("data".into(), item.data.clone().into_bytes()),
        ("created_at".into(), item.created_at.to_rfc3339().into_bytes()),
        ("embedding".into(), embedding_to_bytes(&item.embedding)),
    ];
    if let Some(user) = &item.user_id {
        fields.push(("user_id".into(), user.clone().into_bytes()));
    }
    if let Some(agent) = &item.agent_id {
        fields.push(("agent_id".into(), agent.clone().into_bytes()));
    }
    if let Some(run) = &item.run_id {
        fields.push(("run_id".into(), run.clone().into_bytes()));
    }
    if !item.metadata.is_empty() {
        fields.push(("metadata".into(), serde_json::to_vec(&item.metadata)?));
    }
    if let Some(hash) = &item.hash {
        fields.push(("hash".into(), hash.clone().into_bytes()));
    }
    if let Some(updated) = &item.updated_at {
        fields.push(("updated_at".into(), updated.to_rfc3339().into_bytes()));
    }
    Ok(fields)
}

fn corrupt(detail: impl Into<String>) -> StoreError {
    StoreError::Protocol {
        status: 0,
        body: detail.into(),
    }
}

fn field_string(map: &HashMap<String, Vec<u8>>, name: &str) -> Option<String> {
    map.get(name)
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
}

fn parse_timestamp(raw: &str, field: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| corrupt(format!("malformed {field} '{raw}': {err}")))
}

fn hash_to_item(map: HashMap<String, Vec<u8>>) -> Result<MemoryItem, StoreError> {
    let id = field_string(&map, "id").ok_or_else(|| corrupt("hash missing id field"))?;
    let data = field_string(&map, "data").ok_or_else(|| corrupt("hash missing data field"))?;
    let created_raw =
        field_string(&map, "created_at").ok_or_else(|| corrupt("hash missing created_at"))?;
    let created_at = parse_timestamp(&created_raw, "created_at")?;
    let updated_at = field_string(&map, "updated_at")
        .map(|raw| parse_timestamp(&raw, "updated_at"))
        .transpose()?;
    let metadata: Metadata = match map.get("metadata") {
        Some(bytes) => serde_json::from_slice(bytes)?,
        None => Metadata::new(),
    };
    Ok(MemoryItem {
        id,
        data,
        embedding: map
            .get("embedding")
            .map(|bytes| bytes_to_embedding(bytes))
            .unwrap_or_default(),
        user_id: field_string(&map, "user_id"),
        agent_id: field_string(&map, "agent_id"),
        run_id: field_string(&map, "run_id"),
        metadata,
        hash: field_string(&map, "hash"),
        created_at,
        updated_at,
    })
}

// ── Reply walking ─────────────────────────────────────────────────────────────

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::SimpleString(s) => Some(s.clone()),
        Value::Int(i) => Some(i.to_string()),
        Value::Double(d) => Some(d.to_string()),
        _ => None,
    }
}

fn value_to_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::BulkString(bytes) => Some(bytes.clone()),
        Value::SimpleString(s) => Some(s.clone().into_bytes()),
        Value::Int(i) => Some(i.to_string().into_bytes()),
        Value::Double(d) => Some(d.to_string().into_bytes()),
        _ => None,
    }
}

/// Look up a key in a reply that is either a RESP2 alternating
/// name/value array or a RESP3 map.
fn reply_entry<'a>(reply: &'a Value, key: &str) -> Option<&'a Value> {
    match reply {
        Value::Array(values) => values.chunks_exact(2).find_map(|pair| {
            (value_to_string(&pair[0]).as_deref() == Some(key)).then_some(&pair[1])
        }),
        Value::Map(entries) => entries.iter().find_map(|(name, value)| {
            (value_to_string(name).as_deref() == Some(key)).then_some(value)
        }),
        _ => None,
    }
}

/// Pull the declared vector dimension of the `embedding` attribute out
/// of an FT.INFO reply. `None` when the server does not report one.
fn index_dimension(info: &Value) -> Option<usize> {
    let attributes = match reply_entry(info, "attributes")? {
        Value::Array(attrs) => attrs,
        _ => return None,
    };
    for attribute in attributes {
        let identifier = reply_entry(attribute, "identifier")
            .and_then(value_to_string)
            .unwrap_or_default();
        if identifier != "embedding" {
            continue;
        }
        return reply_entry(attribute, "dim")
            .and_then(value_to_string)
            .and_then(|dim| dim.parse().ok());
    }
    None
}

/// Parse an FT.SEARCH document reply (total, key, fields, key, fields…)
/// into `(key, field map)` pairs.
fn parse_documents(reply: &Value) -> Result<Vec<(String, HashMap<String, Vec<u8>>)>, StoreError> {
    let Value::Array(values) = reply else {
        return Err(corrupt("unexpected FT.SEARCH reply shape"));
    };
    let mut documents = Vec::new();
    let mut cursor = values.iter().skip(1);
    while let Some(key) = cursor.next() {
        let key = value_to_string(key).ok_or_else(|| corrupt("non-string document key"))?;
        let Some(Value::Array(pairs)) = cursor.next() else {
            return Err(corrupt(format!("document '{key}' has no field array")));
        };
        let map: HashMap<String, Vec<u8>> = pairs
            .chunks_exact(2)
            .filter_map(|pair| Some((value_to_string(&pair[0])?, value_to_bytes(&pair[1])?)))
            .collect();
        documents.push((key, map));
    }
    Ok(documents)
}

fn is_unknown_index(err: &redis::RedisError) -> bool {
    let detail = err.detail().unwrap_or_default().to_ascii_lowercase();
    detail.contains("unknown index") || detail.contains("no such index")
}

impl RedisStore {
    /// Connect to the redis endpoint (a `redis://…` URL). Credentials
    /// come pre-split; the empty-user form authenticates with the
    /// default user.
    pub async fn connect(
        endpoint: &str,
        collection: impl Into<String>,
        credentials: Option<(String, String)>,
    ) -> Result<Self, StoreError> {
        let mut info = endpoint.into_connection_info()?;
        if let Some((user, password)) = credentials {
            info.redis.username = (!user.is_empty()).then_some(user);
            info.redis.password = Some(password);
        }
        let client = redis::Client::open(info)?;
        let conn = ConnectionManager::new(client).await?;
        let collection = collection.into();
        let index = format!("{collection}_idx");
        Ok(Self {
            conn,
            collection,
            index,
        })
    }

    fn key(&self, id: &str) -> String {
        format!("{}:{}", self.collection, id)
    }

    async fn create_index(&self, vector_size: usize) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("FT.CREATE")
            .arg(&self.index)
            .arg("ON")
            .arg("HASH")
            .arg("PREFIX")
            .arg(1)
            .arg(format!("{}:", self.collection))
            .arg("SCHEMA")
            .arg("data")
            .arg("TEXT")
            .arg("user_id")
            .arg("TAG")
            .arg("embedding")
            .arg("VECTOR")
            .arg("HNSW")
            .arg(6)
            .arg("TYPE")
            .arg("FLOAT32")
            .arg("DIM")
            .arg(vector_size)
            .arg("DISTANCE_METRIC")
            .arg("COSINE")
            .query_async(&mut conn)
            .await?;
        info!(index = %self.index, dim = vector_size, "created vector index");
        Ok(())
    }

    async fn drop_index(&self, delete_documents: bool) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("FT.DROPINDEX");
        cmd.arg(&self.index);
        if delete_documents {
            cmd.arg("DD");
        }
        let dropped: Result<(), redis::RedisError> = cmd.query_async(&mut conn).await;
        match dropped {
            Ok(()) => Ok(()),
            Err(err) if is_unknown_index(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write(&self, items: &[MemoryItem]) -> Result<(), StoreError> {
        if items.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for item in items {
            let key = self.key(&item.id);
            // Full replacement: a plain HSET would leave stale optional
            // fields behind when they are absent from the new revision.
            pipe.del(&key).ignore();
            let mut cmd = redis::cmd("HSET");
            cmd.arg(&key);
            for (field, value) in item_to_fields(item)? {
                cmd.arg(field).arg(value);
            }
            pipe.add_command(cmd).ignore();
        }
        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        debug!(count = items.len(), collection = %self.collection, "wrote hashes");
        Ok(())
    }

    async fn search_raw(&self, query: &str, args: &[&str]) -> Result<Value, StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("FT.SEARCH");
        cmd.arg(&self.index).arg(query);
        for arg in args {
            cmd.arg(*arg);
        }
        Ok(cmd.query_async(&mut conn).await?)
    }
}

#[async_trait]
impl VectorStore for RedisStore {
    async fn ensure_collection_exists(
        &self,
        vector_size: usize,
        allow_recreation: bool,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let info: Result<Value, redis::RedisError> = redis::cmd("FT.INFO")
            .arg(&self.index)
            .query_async(&mut conn)
            .await;
        match info {
            Err(err) if is_unknown_index(&err) => self.create_index(vector_size).await,
            Err(err) => Err(err.into()),
            Ok(info) => match index_dimension(&info) {
                // Older servers omit the dim from FT.INFO; the existing
                // index is accepted as-is in that case.
                None => Ok(()),
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
                        index = %self.index,
                        from = actual,
                        to = vector_size,
                        "recreating vector index with new dimension"
                    );
                    self.drop_index(true).await?;
                    self.create_index(vector_size).await
                }
            },
        }
    }

    async fn insert(&self, items: &[MemoryItem]) -> Result<(), StoreError> {
        self.write(items).await
    }

    async fn update(&self, items: &[MemoryItem]) -> Result<(), StoreError> {
        self.write(items).await
    }

    async fn search(
        &self,
        query: &[f32],
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemorySearchResult>, StoreError> {
        let knn = knn_query(user_id, limit);
        let mut conn = self.conn.clone();
        let reply: Value = redis::cmd("FT.SEARCH")
            .arg(&self.index)
            .arg(&knn)
            .arg("PARAMS")
            .arg(2)
            .arg("vec")
            .arg(embedding_to_bytes(query))
            .arg("SORTBY")
            .arg(SCORE_FIELD)
            .arg("ASC")
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .arg("DIALECT")
            .arg(2)
            .query_async(&mut conn)
            .await?;

        let mut results = Vec::new();
        for (_, mut fields) in parse_documents(&reply)? {
            let distance: f32 = fields
                .remove(SCORE_FIELD)
                .and_then(|bytes| String::from_utf8_lossy(&bytes).parse().ok())
                .ok_or_else(|| corrupt("search hit missing distance field"))?;
            results.push(MemorySearchResult {
                score: similarity_from_distance(distance),
                memory: hash_to_item(fields)?,
            });
        }
        Ok(results)
    }

    async fn list(
        &self,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryItem>, StoreError> {
        let limit_arg = limit.to_string();
        let reply = self
            .search_raw(&tag_query(user_id), &["LIMIT", "0", &limit_arg])
            .await?;
        let mut items = parse_documents(&reply)?
            .into_iter()
            .map(|(_, fields)| hash_to_item(fields))
            .collect::<Result<Vec<_>, _>>()?;
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryItem>, StoreError> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, Vec<u8>> = redis::cmd("HGETALL")
            .arg(self.key(id))
            .query_async(&mut conn)
            .await?;
        if map.is_empty() {
            return Ok(None);
        }
        hash_to_item(map).map(Some)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL")
            .arg(self.key(id))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete_by_user(&self, user_id: &str) -> Result<(), StoreError> {
        let scan_limit = DELETE_SCAN_LIMIT.to_string();
        let reply = self
            .search_raw(
                &tag_query(Some(user_id)),
                &["NOCONTENT", "LIMIT", "0", &scan_limit],
            )
            .await?;
        let Value::Array(values) = reply else {
            return Err(corrupt("unexpected FT.SEARCH reply shape"));
        };
        let keys: Vec<String> = values.iter().skip(1).filter_map(value_to_string).collect();
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
        debug!(count = keys.len(), user_id, "deleted partition");
        Ok(())
    }

    async fn reset(&self) -> Result<(), StoreError> {
        self.drop_index(true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_bytes_round_trip_little_endian() {
        let embedding = vec![0.25_f32, -1.5, 3.75, 0.0];
        let bytes = embedding_to_bytes(&embedding);
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..4], &0.25_f32.to_le_bytes());
        assert_eq!(bytes_to_embedding(&bytes), embedding);
    }

    #[test]
    fn tag_escaping_covers_reserved_characters() {
        assert_eq!(escape_tag("plain_user1"), "plain_user1");
        assert_eq!(escape_tag("a-b"), "a\\-b");
        assert_eq!(escape_tag("user@host:1"), "user\\@host\\:1");
        assert_eq!(escape_tag("{brace}"), "\\{brace\\}");
    }

    #[test]
    fn knn_query_has_exactly_one_knn_clause_and_parameter() {
        let query = knn_query(Some("u-1"), 5);
        assert_eq!(
            query,
            "(@user_id:{u\\-1})=>[KNN 5 @embedding $vec AS __embedding_score]"
        );
        assert_eq!(query.matches("KNN").count(), 1);
        assert_eq!(query.matches("$vec").count(), 1);

        let unfiltered = knn_query(None, 3);
        assert!(unfiltered.starts_with("(*)=>[KNN 3 "));
    }

    #[test]
    fn hash_fields_round_trip_into_item() {
        let mut metadata = Metadata::new();
        metadata.insert("city".into(), serde_json::json!("Oslo"));
        let mut original = MemoryItem::new("User lives in Oslo", vec![0.5, -0.5])
            .with_user_id("u1")
            .with_agent_id("a1")
            .with_run_id("r1")
            .with_metadata(metadata);
        original.touch();

        let map: HashMap<String, Vec<u8>> = item_to_fields(&original).unwrap().into_iter().collect();
        let rebuilt = hash_to_item(map).unwrap();
        // RFC 3339 keeps sub-second precision, so timestamps survive.
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn absent_optional_fields_decode_as_none() {
        let bare = MemoryItem::new("bare fact", vec![1.0]);
        let map: HashMap<String, Vec<u8>> = item_to_fields(&bare).unwrap().into_iter().collect();
        assert!(!map.contains_key("user_id"));
        assert!(!map.contains_key("updated_at"));

        let rebuilt = hash_to_item(map).unwrap();
        assert!(rebuilt.user_id.is_none());
        assert!(rebuilt.updated_at.is_none());
        assert!(rebuilt.metadata.is_empty());
    }

    #[test]
    fn corrupt_hash_is_a_protocol_error() {
        let mut map = HashMap::new();
        map.insert("id".to_string(), b"x".to_vec());
        map.insert("data".to_string(), b"y".to_vec());
        map.insert("created_at".to_string(), b"not-a-date".to_vec());
        assert!(matches!(hash_to_item(map), Err(StoreError::Protocol { .. })));
    }

    #[test]
    fn search_reply_parses_documents_and_distance() {
        let reply = Value::Array(vec![
            Value::Int(1),
            Value::BulkString(b"mem:abc".to_vec()),
            Value::Array(vec![
                Value::BulkString(SCORE_FIELD.as_bytes().to_vec()),
                Value::BulkString(b"0.25".to_vec()),
                Value::BulkString(b"id".to_vec()),
                Value::BulkString(b"abc".to_vec()),
                Value::BulkString(b"data".to_vec()),
                Value::BulkString(b"User rows".to_vec()),
                Value::BulkString(b"created_at".to_vec()),
                Value::BulkString(b"2026-03-01T10:00:00+00:00".to_vec()),
            ]),
        ]);
        let documents = parse_documents(&reply).unwrap();
        assert_eq!(documents.len(), 1);
        let (key, fields) = &documents[0];
        assert_eq!(key, "mem:abc");
        assert_eq!(fields.get(SCORE_FIELD).unwrap(), b"0.25");
        assert_eq!(fields.get("data").unwrap(), b"User rows");
    }

    #[test]
    fn ft_info_dimension_extraction() {
        let info = Value::Array(vec![
            Value::BulkString(b"index_name".to_vec()),
            Value::BulkString(b"mem_idx".to_vec()),
            Value::BulkString(b"attributes".to_vec()),
            Value::Array(vec![Value::Array(vec![
                Value::BulkString(b"identifier".to_vec()),
                Value::BulkString(b"embedding".to_vec()),
                Value::BulkString(b"type".to_vec()),
                Value::BulkString(b"VECTOR".to_vec()),
                Value::BulkString(b"dim".to_vec()),
                Value::Int(1536),
            ])]),
        ]);
        assert_eq!(index_dimension(&info), Some(1536));
        assert_eq!(index_dimension(&Value::Array(vec![])), None);
    }
}
