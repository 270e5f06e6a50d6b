//! LLM and embedding clients for the MemNet memory layer.
//!
//! Two seams, both trait objects so the orchestrator can be driven by
//! stubs in tests:
//!
//! - [`TextEmbedder`]: text to dense vector, with the native dimension
//!   detected once and cached.
//! - [`LlmProvider`]: the three prompt-driven operations the pipeline
//!   needs: extract atomic facts from a transcript, merge a duplicate
//!   pair, and rerank search hits.
//!
//! The HTTP implementations speak the OpenAI-compatible surface
//! (`/chat/completions`, `/embeddings`) that local gateways and hosted
//! providers both expose.

mod embedder;
mod error;
mod json;
mod prompts;
mod provider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use embedder::HttpEmbedder;
pub use error::LlmError;
pub use provider::HttpLlm;

/// A single statement produced by the extractor. Transient; carries only
/// the statement text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedMemory {
    pub data: String,
}

/// Text → dense float vector.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;

    /// Native output dimension. Detected by embedding a sentinel string
    /// on first call and cached; call before initializing the store.
    async fn vector_size(&self) -> Result<usize, LlmError>;
}

/// The three one-shot prompt operations of the memory pipeline.
///
/// Model-quality failures are degraded, not raised: an unparseable
/// extraction yields an empty list and an unparseable ranking yields the
/// identity order. Transport failures always propagate.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Distill a role-tagged conversation into standalone factual
    /// statements, in the order the model emitted them.
    async fn extract_memories(&self, conversation: &str)
    -> Result<Vec<ExtractedMemory>, LlmError>;

    /// Merge two statements about the same fact into one, preferring the
    /// newer on conflict. Returns the merged text only.
    async fn merge_memories(&self, existing: &str, incoming: &str) -> Result<String, LlmError>;

    /// Order `candidates` by relevance to `query`. Returns indices into
    /// `candidates`: the model's order is authoritative, out-of-range
    /// indices are discarded, and omitted indices mean the candidate is
    /// dropped.
    async fn rank(&self, query: &str, candidates: &[String]) -> Result<Vec<usize>, LlmError>;
}
