use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::json::parse_model_json;
use crate::prompts::{
    EXTRACT_SYSTEM, MERGE_SYSTEM, RERANK_SYSTEM, extract_user_prompt, merge_user_prompt,
    rerank_user_prompt,
};
use crate::{ExtractedMemory, LlmProvider};

/// Chat-completions client for OpenAI-compatible endpoints, driving the
/// three one-shot pipeline prompts at temperature 0.
pub struct HttpLlm {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtractionBatch {
    memories: Vec<ExtractedMemory>,
}

#[derive(Debug, Deserialize)]
struct RankedIndices {
    ranked_indices: Vec<usize>,
}

/// Parse the extractor's answer. Anything unparseable means "nothing to
/// remember", an expected model-quality failure, not a system failure.
fn parse_extraction(raw: &str) -> Vec<ExtractedMemory> {
    match parse_model_json::<ExtractionBatch>(raw) {
        Some(batch) => batch
            .memories
            .into_iter()
            .filter(|memory| !memory.data.trim().is_empty())
            .collect(),
        None => {
            warn!("extraction response was not valid JSON, treating as empty");
            Vec::new()
        }
    }
}

/// Parse the reranker's answer against `candidate_count` inputs.
/// Out-of-range indices are discarded, repeats keep their first
/// position, and garbage falls open to the identity order.
fn parse_ranked_indices(raw: &str, candidate_count: usize) -> Vec<usize> {
    match parse_model_json::<RankedIndices>(raw) {
        Some(ranked) => {
            let mut seen = vec![false; candidate_count];
            ranked
                .ranked_indices
                .into_iter()
                .filter(|&index| {
                    index < candidate_count && !std::mem::replace(&mut seen[index], true)
                })
                .collect()
        }
        None => {
            warn!("rerank response was not valid JSON, keeping original order");
            (0..candidate_count).collect()
        }
    }
}

impl HttpLlm {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
        }
    }

    /// One-shot system+user completion; returns the assistant text.
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "temperature": 0,
        });
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Protocol {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Malformed("completion had no message content".to_string()))
    }
}

#[async_trait]
impl LlmProvider for HttpLlm {
    async fn extract_memories(
        &self,
        conversation: &str,
    ) -> Result<Vec<ExtractedMemory>, LlmError> {
        let raw = self
            .complete(EXTRACT_SYSTEM, &extract_user_prompt(conversation))
            .await?;
        let memories = parse_extraction(&raw);
        debug!(count = memories.len(), "extracted candidate memories");
        Ok(memories)
    }

    async fn merge_memories(&self, existing: &str, incoming: &str) -> Result<String, LlmError> {
        let raw = self
            .complete(MERGE_SYSTEM, &merge_user_prompt(existing, incoming))
            .await?;
        let merged = raw.trim().trim_matches('"').trim();
        if merged.is_empty() {
            // A merge that loses both statements would destroy data;
            // keep the newer text instead.
            warn!("merge response was empty, keeping the newer statement");
            return Ok(incoming.to_string());
        }
        Ok(merged.to_string())
    }

    async fn rank(&self, query: &str, candidates: &[String]) -> Result<Vec<usize>, LlmError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let raw = self
            .complete(RERANK_SYSTEM, &rerank_user_prompt(query, candidates))
            .await?;
        Ok(parse_ranked_indices(&raw, candidates.len()))
    }
}
