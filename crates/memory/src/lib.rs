//! MemNet: a long-term memory layer for conversational agents.
//!
//! Transcripts go in; atomic factual statements come out. Each statement
//! is embedded, checked against the caller's partition for near
//! duplicates, and either merged into the existing memory or stored
//! fresh. Retrieval embeds the query, runs an ANN search in the backing
//! vector store, and optionally asks the LLM to rerank the hits.
//!
//! [`MemoryService`] is the orchestrator; the pluggable pieces are the
//! [`VectorStore`], [`LlmProvider`], and [`TextEmbedder`] traits from
//! the sibling crates, re-exported here. The service itself is stateless
//! across restarts: everything durable lives in the vector store.

mod error;
mod service;
mod types;

pub use error::MemoryError;
pub use service::{DEFAULT_LIST_LIMIT, MemoryService, ServiceOptions};
pub use types::{
    AddMemoryRequest, AddMemoryResponse, MemoryEvent, MemoryEventResult, Message, MessageRole,
    SearchMemoryRequest,
};

pub use memnet_config::MemNetConfig;
pub use memnet_llm::{ExtractedMemory, HttpEmbedder, HttpLlm, LlmProvider, TextEmbedder};
pub use memnet_store::{
    InMemoryStore, MemoryItem, MemorySearchResult, Metadata, MilvusStore, QdrantStore, RedisStore,
    VectorStore,
};
