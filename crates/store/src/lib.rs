//! Vector store abstraction for the MemNet memory layer.
//!
//! One contract, several interchangeable backends:
//!
//! - [`InMemoryStore`]: linear-scan reference implementation; not
//!   persistent, authoritative for behaviour.
//! - [`QdrantStore`]: document-payload ANN engine over its REST API.
//! - [`MilvusStore`]: structured vector DB over the v2 RESTful API.
//! - [`RedisStore`]: RediSearch HNSW index over hashes.
//!
//! Every backend translates the partition filter (`user_id`) into its
//! native predicate and normalizes its native score to a similarity in
//! `[0, 1]` where 1 means "most similar".

mod error;
mod in_memory;
mod item;
mod milvus;
mod qdrant;
mod redisearch;
mod score;
mod store;

pub(crate) mod http;

pub use error::StoreError;
pub use in_memory::InMemoryStore;
pub use item::{MemoryItem, MemorySearchResult, Metadata};
pub use milvus::MilvusStore;
pub use qdrant::QdrantStore;
pub use redisearch::RedisStore;
pub use score::{clamp_score, cosine_similarity, similarity_from_distance};
pub use store::VectorStore;
