//! Token-bounded semantic chunking of extracted document text.
//!
//! - Sizing: an explicit `TEXT_SPLITTER_CHUNK_SIZE` wins; otherwise the budget is a quarter of
//!   the embedding model's context window, clamped to `[256, 1024]`.
//! - Overlap: an optional sliding token overlap keeps spans around boundaries retrievable.
//! - Token counting: `tiktoken-rs` where an encoding is known, whitespace counting otherwise.
//! - Filtering: chunks under `min_chunk_tokens` are dropped and repeated texts are kept once,
//!   keyed by their SHA-256 digest.

use crate::config::{Config, EmbeddingBackend};
use crate::index::Chunk;
use crate::qdrant::compute_chunk_hash;
use anyhow::Error as TokenizerError;
use semchunk_rs::Chunker;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, model::get_context_size, o200k_base, p50k_base,
    r50k_base,
};

use super::types::ChunkingError;

type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

const MIN_AUTOMATIC_CHUNK_SIZE: usize = 256;
const MAX_AUTOMATIC_CHUNK_SIZE: usize = 1024;

/// Parameters for [`chunk_document`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkingSettings {
    /// Hard upper bound on tokens per chunk.
    pub chunk_size: usize,
    /// Tokens carried over from the previous chunk.
    pub overlap: usize,
    /// Chunks with fewer tokens are dropped.
    pub min_chunk_tokens: usize,
    /// Provider whose tokenizer is used for counting.
    pub provider: EmbeddingBackend,
    /// Model whose tokenizer is used for counting.
    pub model: String,
}

impl ChunkingSettings {
    /// Derive settings from process configuration.
    pub fn from_config(config: &Config) -> Self {
        let chunk_size = determine_chunk_size(
            config.text_splitter_chunk_size,
            config.embedding_provider,
            &config.embedding_model,
        );
        tracing::debug!(
            chunk_size,
            override = config.text_splitter_chunk_size,
            provider = ?config.embedding_provider,
            model = %config.embedding_model,
            overlap = config.text_splitter_chunk_overlap,
            "Derived chunk size"
        );
        Self {
            chunk_size,
            overlap: config.text_splitter_chunk_overlap,
            min_chunk_tokens: config.min_chunk_tokens,
            provider: config.embedding_provider,
            model: config.embedding_model.clone(),
        }
    }
}

/// Split `text` into chunks of `document_id`.
///
/// Chunk indices follow the splitter's output order, so dropped chunks leave gaps. Each chunk
/// carries its text digest in `metadata.chunk_hash`. Whitespace-only input yields no chunks.
pub fn chunk_document(
    document_id: &str,
    text: &str,
    settings: &ChunkingSettings,
) -> Result<Vec<Chunk>, ChunkingError> {
    if settings.chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let token_counter = build_token_counter(settings.provider, &settings.model)?;
    Ok(build_chunks(document_id, text, settings, token_counter))
}

fn build_chunks(
    document_id: &str,
    text: &str,
    settings: &ChunkingSettings,
    token_counter: TokenCounter,
) -> Vec<Chunk> {
    let segments = chunk_text_with_counter(
        text,
        settings.chunk_size,
        settings.overlap,
        token_counter.clone(),
    );
    let produced = segments.len();

    let mut seen = HashSet::new();
    let mut chunks = Vec::with_capacity(produced);
    let mut too_small = 0;
    let mut duplicates = 0;
    for (index, segment) in segments.into_iter().enumerate() {
        if segment.trim().is_empty() {
            continue;
        }
        let token_count = token_counter.as_ref()(&segment);
        if token_count < settings.min_chunk_tokens {
            too_small += 1;
            continue;
        }
        let hash = compute_chunk_hash(&segment);
        if !seen.insert(hash.clone()) {
            duplicates += 1;
            continue;
        }
        let mut chunk = Chunk::new(
            document_id,
            format!("{document_id}_chunk_{index}"),
            index as u64,
            segment,
            token_count,
        );
        chunk
            .metadata
            .insert("chunk_hash".to_string(), Value::String(hash));
        chunks.push(chunk);
    }

    tracing::debug!(
        document_id,
        produced,
        kept = chunks.len(),
        too_small,
        duplicates,
        "Document chunked"
    );
    chunks
}

/// Determine the chunk size, respecting an explicit override.
pub(crate) fn determine_chunk_size(
    override_size: Option<usize>,
    provider: EmbeddingBackend,
    model: &str,
) -> usize {
    if let Some(explicit) = override_size {
        return explicit.max(1);
    }

    let window = embedding_context_window(provider, model);
    (window / 4).clamp(MIN_AUTOMATIC_CHUNK_SIZE, MAX_AUTOMATIC_CHUNK_SIZE)
}

fn embedding_context_window(provider: EmbeddingBackend, model: &str) -> usize {
    match provider {
        EmbeddingBackend::OpenAI | EmbeddingBackend::Hashing => {
            if model.starts_with("text-embedding-3") || model.starts_with("text-embedding-ada-002")
            {
                8192
            } else {
                get_context_size(model)
            }
        }
        EmbeddingBackend::Ollama => {
            let normalized = model.to_lowercase();
            match normalized.as_str() {
                "nomic-embed-text" | "mxbai-embed-large" | "mxbai-embed-large-v1" => 8192,
                value if value.contains("all-minilm") => 512,
                _ => 4096,
            }
        }
    }
}

fn build_token_counter(
    provider: EmbeddingBackend,
    model: &str,
) -> Result<TokenCounter, ChunkingError> {
    match provider {
        EmbeddingBackend::OpenAI => build_tiktoken_counter(model),
        EmbeddingBackend::Ollama | EmbeddingBackend::Hashing => {
            match build_tiktoken_counter(model) {
                Ok(counter) => Ok(counter),
                Err(error) => {
                    tracing::warn!(
                        model,
                        error = %error,
                        "Tokenizer unavailable; falling back to whitespace counter"
                    );
                    Ok(whitespace_token_counter())
                }
            }
        }
    }
}

fn build_tiktoken_counter(model: &str) -> Result<TokenCounter, ChunkingError> {
    let target = match model.trim() {
        "" => "cl100k_base",
        trimmed => trimmed,
    };
    let encoding = resolve_encoding(target).map_err(|source| ChunkingError::Tokenizer {
        model: target.to_string(),
        source,
    })?;
    let encoding = Arc::new(encoding);

    Ok(Arc::new(move |segment: &str| {
        encoding.encode_ordinary(segment).len()
    }))
}

fn resolve_encoding(model: &str) -> Result<CoreBPE, TokenizerError> {
    if let Ok(encoding) = get_bpe_from_model(model) {
        return Ok(encoding);
    }
    match model {
        "o200k_base" => o200k_base(),
        "p50k_base" => p50k_base(),
        "r50k_base" | "gpt2" => r50k_base(),
        _ => {
            tracing::debug!(model, "Using 'cl100k_base' encoding for token counting");
            cl100k_base()
        }
    }
}

fn whitespace_token_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

fn chunk_text_with_counter(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    token_counter: TokenCounter,
) -> Vec<String> {
    let counter_for_chunker = token_counter.clone();
    let chunker = Chunker::new(
        chunk_size,
        Box::new(move |segment: &str| counter_for_chunker.as_ref()(segment)),
    );
    let base_chunks = chunker.chunk(text);
    apply_overlap(base_chunks, chunk_size, overlap, &token_counter)
}

/// Prefix each chunk with a token-limited tail of its predecessor, staying within budget.
fn apply_overlap(
    chunks: Vec<String>,
    chunk_size: usize,
    overlap: usize,
    token_counter: &TokenCounter,
) -> Vec<String> {
    let effective_overlap = overlap.min(chunk_size.saturating_sub(1));
    if effective_overlap == 0 || chunks.len() < 2 {
        return chunks;
    }

    let mut overlapped = Vec::with_capacity(chunks.len());
    overlapped.push(chunks[0].clone());
    for pair in chunks.windows(2) {
        let tail = tail_within_budget(&pair[0], effective_overlap, token_counter);
        let mut combined = String::with_capacity(tail.len() + pair[1].len() + 1);
        if !tail.is_empty() {
            combined.push_str(tail);
            if !tail.ends_with(char::is_whitespace) && !pair[1].starts_with(char::is_whitespace) {
                combined.push(' ');
            }
        }
        combined.push_str(&pair[1]);
        overlapped.push(tail_within_budget(&combined, chunk_size, token_counter).to_string());
    }
    overlapped
}

/// Longest suffix of `text` (leading whitespace trimmed) counting at most `budget` tokens.
fn tail_within_budget<'a>(text: &'a str, budget: usize, token_counter: &TokenCounter) -> &'a str {
    if budget == 0 {
        return "";
    }
    for (start, _) in text.char_indices() {
        let candidate = text[start..].trim_start();
        if token_counter.as_ref()(candidate) <= budget {
            return candidate;
        }
    }
    ""
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(chunk_size: usize, overlap: usize, min_chunk_tokens: usize) -> ChunkingSettings {
        ChunkingSettings {
            chunk_size,
            overlap,
            min_chunk_tokens,
            provider: EmbeddingBackend::Ollama,
            model: "custom-model".to_string(),
        }
    }

    #[test]
    fn whitespace_counter_respects_chunk_size() {
        let chunks =
            chunk_text_with_counter("one two three four five", 2, 0, whitespace_token_counter());
        assert_eq!(chunks, vec!["one two", "three four", "five"]);
    }

    #[test]
    fn overlap_stays_within_budget() {
        let counter = whitespace_token_counter();
        let chunks = chunk_text_with_counter("one two three four five", 3, 1, counter.clone());
        assert_eq!(chunks, vec!["one two three", "three four five"]);
        assert!(chunks.iter().all(|chunk| counter.as_ref()(chunk) <= 3));
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let error = chunk_document("doc", "hello", &settings(0, 0, 0)).unwrap_err();
        assert!(matches!(error, ChunkingError::InvalidChunkSize));
    }

    #[test]
    fn blank_text_yields_no_chunks() {
        let chunks = chunk_document("doc", "  \n\t", &settings(8, 0, 0)).expect("chunks");
        assert!(chunks.is_empty());
    }

    #[test]
    fn chunks_carry_ids_hashes_and_lengths() {
        let text = "Fire damage is covered.\n\nFlood damage is excluded from this policy.";
        let chunks = build_chunks("doc-7", text, &settings(8, 0, 1), whitespace_token_counter());
        assert!(!chunks.is_empty());
        for (position, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.document_id, "doc-7");
            assert_eq!(chunk.chunk_id, format!("doc-7_chunk_{}", chunk.chunk_index));
            assert_eq!(chunk.text_length, chunk.text.chars().count());
            assert!(chunk.token_count >= 1);
            assert_eq!(
                chunk.metadata["chunk_hash"],
                Value::String(compute_chunk_hash(&chunk.text))
            );
            if position > 0 {
                assert_ne!(chunks[position - 1].chunk_index, chunk.chunk_index);
            }
        }
    }

    #[test]
    fn duplicate_segments_are_kept_once() {
        let text = "alpha beta\n\nalpha beta\n\ngamma delta";
        let chunks = build_chunks("doc", text, &settings(2, 0, 1), whitespace_token_counter());
        let texts: Vec<_> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["alpha beta", "gamma delta"]);
        assert_eq!(chunks[1].chunk_id, "doc_chunk_2");
    }

    #[test]
    fn tiny_chunks_are_dropped() {
        let chunks = chunk_document("doc", "tiny", &settings(64, 0, 16)).expect("chunks");
        assert!(chunks.is_empty());
    }

    #[test]
    fn chunk_size_prefers_override_then_context_window() {
        assert_eq!(
            determine_chunk_size(Some(42), EmbeddingBackend::OpenAI, "text-embedding-3-small"),
            42
        );
        assert_eq!(
            determine_chunk_size(None, EmbeddingBackend::OpenAI, "text-embedding-3-large"),
            1024
        );
        assert_eq!(
            determine_chunk_size(None, EmbeddingBackend::Ollama, "all-minilm-l6-v2"),
            256
        );
    }
}
