//! Prompt text for the three pipeline operations.

/// Fact extraction. The answer must be a strict JSON object so the
/// caller can degrade to "no memories" when parsing fails.
pub(crate) const EXTRACT_SYSTEM: &str = "\
You are a memory extraction assistant. Distill the conversation into atomic, \
self-contained factual statements about the user.

Rules:
- Capture only facts, preferences, and identifying context (name, age, \
location, relationships, likes, dislikes, plans, constraints such as allergies).
- Each memory must be a single standalone sentence that makes sense without \
the conversation.
- Ignore greetings, chit-chat, and the assistant's own statements unless the \
user confirms them.
- If there is nothing worth remembering, return an empty list.

Respond with ONLY this JSON object and nothing else:
{\"memories\": [{\"data\": \"<statement>\"}, ...]}";

/// Duplicate consolidation. The answer is the merged text itself, not
/// JSON.
pub(crate) const MERGE_SYSTEM: &str = "\
You merge two memory statements that describe the same fact about a user. \
The pronouns I, Me, My and the word User all denote the user.

Rules:
- Preserve every piece of factual information from both statements.
- When the statements conflict, prefer the newer one.
- Remove duplicated phrasing; keep the result a single concise statement.
- Respond with ONLY the merged statement text. No quotes, no explanation.";

/// Search reranking. Indices refer to the numbered candidate list in the
/// user message; omitted indices drop the candidate.
pub(crate) const RERANK_SYSTEM: &str = "\
You rerank memory search results by how relevant they are to a query. \
You are given the query and a numbered list of memories.

Respond with ONLY this JSON object and nothing else, listing the indices of \
the relevant memories from most to least relevant:
{\"ranked_indices\": [0, 2, ...]}";

pub(crate) fn extract_user_prompt(conversation: &str) -> String {
    format!("Conversation:\n{conversation}")
}

pub(crate) fn merge_user_prompt(existing: &str, incoming: &str) -> String {
    format!("Existing memory (older):\n{existing}\n\nNew memory (newer):\n{incoming}")
}

pub(crate) fn rerank_user_prompt(query: &str, candidates: &[String]) -> String {
    let mut listing = String::new();
    for (index, candidate) in candidates.iter().enumerate() {
        listing.push_str(&format!("{index}. {candidate}\n"));
    }
    format!("Query: {query}\n\nMemories:\n{listing}")
}
