use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, info};

use memnet_config::MemNetConfig;
use memnet_llm::{LlmProvider, TextEmbedder};
use memnet_store::{MemoryItem, MemorySearchResult, VectorStore};

use crate::error::MemoryError;
use crate::types::{
    AddMemoryRequest, AddMemoryResponse, MemoryEvent, MemoryEventResult, SearchMemoryRequest,
};

/// Default result cap for `search` and `get_all`.
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// How many neighbours the duplicate probe inspects per candidate.
const DUPLICATE_PROBE_LIMIT: usize = 5;

/// Tunables the service reads per call; immutable after construction.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Similarity above which a candidate merges into an existing
    /// memory. Strictly greater-than; higher means more similar.
    pub duplicate_threshold: f32,
    pub enable_reranking: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            duplicate_threshold: 0.6,
            enable_reranking: true,
        }
    }
}

impl From<&MemNetConfig> for ServiceOptions {
    fn from(config: &MemNetConfig) -> Self {
        Self {
            duplicate_threshold: config.duplicate_threshold,
            enable_reranking: config.enable_reranking,
        }
    }
}

/// The memory lifecycle orchestrator.
///
/// Holds no per-request state; collaborators are long-lived trait
/// objects created at bootstrap. Within one `add` call the stages run
/// strictly in order (extract, embed, probe, write); across calls there
/// is no ordering guarantee and duplicate detection is best-effort.
pub struct MemoryService {
    store: Arc<dyn VectorStore>,
    llm: Arc<dyn LlmProvider>,
    embedder: Arc<dyn TextEmbedder>,
    options: ServiceOptions,
}

impl MemoryService {
    pub fn new(
        store: Arc<dyn VectorStore>,
        llm: Arc<dyn LlmProvider>,
        embedder: Arc<dyn TextEmbedder>,
        options: ServiceOptions,
    ) -> Self {
        Self {
            store,
            llm,
            embedder,
            options,
        }
    }

    /// Detect the embedder's native dimension and make sure the
    /// collection exists with it. Must complete before any other
    /// operation.
    pub async fn initialize(&self, allow_recreation: bool) -> Result<(), MemoryError> {
        let vector_size = self.embedder.vector_size().await?;
        self.store
            .ensure_collection_exists(vector_size, allow_recreation)
            .await?;
        info!(vector_size, "memory service initialized");
        Ok(())
    }

    /// Ingest a conversation: extract statements, dedup them against the
    /// caller's partition, and write the survivors.
    ///
    /// Inserts are flushed before updates in two separate store calls;
    /// a cancellation between them leaves the inserts durable and the
    /// updates unapplied.
    pub async fn add(&self, request: AddMemoryRequest) -> Result<AddMemoryResponse, MemoryError> {
        if request.messages.is_empty() {
            return Err(MemoryError::Validation("message list is empty".to_string()));
        }

        let transcript = render_transcript(&request);
        let candidates = self.llm.extract_memories(&transcript).await?;
        if candidates.is_empty() {
            debug!("extractor produced no candidates");
            return Ok(AddMemoryResponse::default());
        }

        let mut inserts: Vec<MemoryItem> = Vec::new();
        let mut updates: Vec<MemoryItem> = Vec::new();
        let mut results: Vec<MemoryEventResult> = Vec::new();

        for candidate in &candidates {
            let embedding = self.embedder.embed(&candidate.data).await?;
            let neighbours = self
                .store
                .search(&embedding, request.user_id.as_deref(), DUPLICATE_PROBE_LIMIT)
                .await?;
            let duplicate = neighbours
                .into_iter()
                .filter(|hit| hit.score > self.options.duplicate_threshold)
                .max_by(|a, b| a.score.total_cmp(&b.score));

            match duplicate {
                Some(existing) => {
                    debug!(
                        id = %existing.memory.id,
                        score = existing.score,
                        "merging candidate into existing memory"
                    );
                    // An earlier candidate in this batch may already have
                    // merged into the same record; build on its pending
                    // text so no fact from this batch is lost.
                    let pending = updates.iter().position(|item| item.id == existing.memory.id);
                    let existing_text = match pending {
                        Some(index) => updates[index].data.clone(),
                        None => existing.memory.data.clone(),
                    };
                    let merged = self
                        .llm
                        .merge_memories(&existing_text, &candidate.data)
                        .await?;
                    let embedding = self.embedder.embed(&merged).await?;
                    let item = match pending {
                        Some(index) => &mut updates[index],
                        None => {
                            updates.push(existing.memory);
                            updates.last_mut().expect("just pushed")
                        }
                    };
                    item.embedding = embedding;
                    item.data = merged;
                    item.touch();
                    results.push(MemoryEventResult {
                        id: item.id.clone(),
                        memory: item.data.clone(),
                        event: MemoryEvent::Update,
                    });
                }
                None => {
                    let mut item = MemoryItem::new(candidate.data.clone(), embedding)
                        .with_metadata(request.metadata.clone());
                    item.user_id = request.user_id.clone();
                    item.agent_id = request.agent_id.clone();
                    item.run_id = request.run_id.clone();
                    results.push(MemoryEventResult {
                        id: item.id.clone(),
                        memory: item.data.clone(),
                        event: MemoryEvent::Add,
                    });
                    inserts.push(item);
                }
            }
        }

        self.store.insert(&inserts).await?;
        self.store.update(&updates).await?;
        info!(
            added = inserts.len(),
            merged = updates.len(),
            "add pipeline complete"
        );
        Ok(AddMemoryResponse { results })
    }

    /// Embed the query, search the partition, and optionally let the LLM
    /// reorder the hits. The reranker's order is authoritative and may
    /// drop results; if its answer is unusable the store order stands.
    pub async fn search(
        &self,
        request: SearchMemoryRequest,
    ) -> Result<Vec<MemorySearchResult>, MemoryError> {
        if request.query.trim().is_empty() {
            return Err(MemoryError::Validation("search query is empty".to_string()));
        }

        let embedding = self.embedder.embed(&request.query).await?;
        let results = self
            .store
            .search(&embedding, request.user_id.as_deref(), request.limit)
            .await?;

        if !self.options.enable_reranking || results.is_empty() {
            return Ok(results);
        }

        let texts: Vec<String> = results.iter().map(|hit| hit.memory.data.clone()).collect();
        let order = self.llm.rank(&request.query, &texts).await?;
        let mut slots: Vec<Option<MemorySearchResult>> = results.into_iter().map(Some).collect();
        let reranked: Vec<MemorySearchResult> = order
            .into_iter()
            .filter_map(|index| slots.get_mut(index).and_then(Option::take))
            .collect();
        debug!(kept = reranked.len(), "rerank applied");
        Ok(reranked)
    }

    /// Up to `limit` memories of the partition, newest first where the
    /// backend supports it.
    pub async fn get_all(
        &self,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryItem>, MemoryError> {
        Ok(self.store.list(user_id, limit).await?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<MemoryItem>, MemoryError> {
        Ok(self.store.get(id).await?)
    }

    /// Replace a memory's text, re-embedding it and stamping
    /// `updated_at`. Returns `false` when the id is unknown.
    pub async fn update(&self, id: &str, content: &str) -> Result<bool, MemoryError> {
        if content.trim().is_empty() {
            return Err(MemoryError::Validation("update content is empty".to_string()));
        }
        let Some(mut item) = self.store.get(id).await? else {
            return Ok(false);
        };
        item.embedding = self.embedder.embed(content).await?;
        item.data = content.to_string();
        item.touch();
        self.store.update(std::slice::from_ref(&item)).await?;
        Ok(true)
    }

    pub async fn delete(&self, id: &str) -> Result<(), MemoryError> {
        Ok(self.store.delete(id).await?)
    }

    pub async fn delete_all(&self, user_id: &str) -> Result<(), MemoryError> {
        Ok(self.store.delete_by_user(user_id).await?)
    }

    /// Drop the collection and recreate it empty with the embedder's
    /// current dimension.
    pub async fn reset(&self) -> Result<(), MemoryError> {
        self.store.reset().await?;
        self.initialize(true).await
    }
}

/// Join the transcript into one role-tagged block for the extractor.
fn render_transcript(request: &AddMemoryRequest) -> String {
    let mut out = String::new();
    for message in &request.messages {
        let _ = writeln!(out, "{}: {}", message.role, message.content);
    }
    out
}
