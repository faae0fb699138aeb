//! Context manager: ranking and compression.
//!
//! Given a query and candidate sources, returns a bounded context string
//! that maximizes relevance within the configured character budget.
//! Sources are chunked with overlapping word windows, embedded, and
//! ranked by cosine similarity; when the embedding provider is down the
//! manager falls back to lexical overlap scoring. It never errors to the
//! caller.

pub mod embed;
pub mod vector;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::types::ScrapedSource;
use embed::{cosine_similarity, Embedder};
use vector::VectorStore;

/// Word window / stride used to chunk sources for embedding.
const CHUNK_WORDS: usize = 200;
const CHUNK_STRIDE_WORDS: usize = 100;

pub struct ContextManager {
    embedder: Arc<dyn Embedder>,
    max_chars: usize,
    similarity_threshold: f32,
}

struct RankedChunk<'a> {
    url: &'a str,
    title: &'a str,
    chunk: String,
    score: f32,
}

impl ContextManager {
    pub fn new(embedder: Arc<dyn Embedder>, max_chars: usize, similarity_threshold: f32) -> Self {
        Self {
            embedder,
            max_chars,
            similarity_threshold,
        }
    }

    /// Rank `sources` against `query` and return the bounded context.
    /// Empty candidates produce an empty string.
    pub async fn similar_content_by_query(
        &self,
        query: &str,
        sources: &[ScrapedSource],
    ) -> String {
        // One candidate set per url; scraping already dedupes, this guards
        // callers that pass pre-scraped corpora.
        let mut seen = HashSet::new();
        let candidates: Vec<&ScrapedSource> = sources
            .iter()
            .filter(|s| !s.raw_text.trim().is_empty() && seen.insert(s.url.as_str()))
            .collect();
        if candidates.is_empty() {
            return String::new();
        }

        let mut chunks: Vec<(usize, String)> = Vec::new();
        for (source_idx, source) in candidates.iter().enumerate() {
            for chunk in chunk_text(&source.raw_text, CHUNK_WORDS, CHUNK_STRIDE_WORDS) {
                chunks.push((source_idx, chunk));
            }
        }

        let scores = match self.embed_scores(query, &chunks).await {
            Ok(scores) => scores,
            Err(e) => {
                warn!("embedding provider unavailable ({e:#}); using lexical scoring");
                lexical_scores(query, &chunks)
            }
        };

        let mut ranked: Vec<RankedChunk> = chunks
            .into_iter()
            .zip(scores)
            .map(|((source_idx, chunk), score)| RankedChunk {
                url: &candidates[source_idx].url,
                title: &candidates[source_idx].title,
                chunk,
                score,
            })
            .collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        self.assemble(ranked)
    }

    /// Vector-store variant: prefer the store's own similarity search with
    /// the caller's metadata filter.
    pub async fn similar_content_by_query_with_vectorstore(
        &self,
        query: &str,
        store: &dyn VectorStore,
        filter: Option<&HashMap<String, String>>,
        k: usize,
    ) -> String {
        let documents = match store.similarity_search(query, k, filter).await {
            Ok(documents) => documents,
            Err(e) => {
                warn!("vector store search failed ({e:#}); returning empty context");
                return String::new();
            }
        };

        let empty = String::new();
        let ranked = documents
            .iter()
            .map(|doc| RankedChunk {
                url: doc.metadata.get("url").unwrap_or(&empty),
                title: doc.metadata.get("title").unwrap_or(&empty),
                chunk: doc.content.clone(),
                score: 0.0,
            })
            .collect();
        self.assemble(ranked)
    }

    async fn embed_scores(
        &self,
        query: &str,
        chunks: &[(usize, String)],
    ) -> anyhow::Result<Vec<f32>> {
        let mut texts: Vec<String> = Vec::with_capacity(chunks.len() + 1);
        texts.push(query.to_string());
        texts.extend(chunks.iter().map(|(_, chunk)| chunk.clone()));

        let vectors = self.embedder.embed(&texts).await?;
        anyhow::ensure!(!vectors.is_empty(), "no vectors returned");
        let query_vec = &vectors[0];
        Ok(vectors[1..]
            .iter()
            .map(|v| cosine_similarity(query_vec, v))
            .collect())
    }

    /// Keep the best chunk per url, in descending similarity, until the
    /// character budget is reached. Truncation happens at chunk
    /// boundaries only, so the context always ends at a delimiter.
    fn assemble(&self, ranked: Vec<RankedChunk>) -> String {
        let mut used_urls: HashSet<String> = HashSet::new();
        let mut parts: Vec<String> = Vec::new();
        let mut budget = self.max_chars;
        let mut below_threshold = 0usize;

        for candidate in &ranked {
            if !used_urls.insert(candidate.url.to_string()) {
                continue;
            }
            if candidate.score < self.similarity_threshold && !parts.is_empty() {
                below_threshold += 1;
                continue;
            }
            let block = format!(
                "Source: {}\nTitle: {}\nContent: {}",
                candidate.url, candidate.title, candidate.chunk
            );
            if block.len() + 2 > budget {
                debug!("context budget reached; dropping remaining chunks");
                break;
            }
            budget -= block.len() + 2;
            parts.push(block);
        }

        if below_threshold > 0 {
            debug!(
                "{} chunks below similarity threshold {:.2} skipped",
                below_threshold, self.similarity_threshold
            );
        }
        info!(
            "context assembled from {} sources ({} chars)",
            parts.len(),
            self.max_chars - budget
        );
        parts.join("\n\n")
    }
}

/// Split `text` into overlapping word-window chunks.
fn chunk_text(text: &str, window: usize, stride: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return vec![];
    }
    if words.len() <= window {
        return vec![words.join(" ")];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < words.len() {
        let end = (start + window).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += stride;
    }
    chunks
}

/// Token-overlap scoring used when no embedding provider is reachable.
/// Same weighting idea as the search-result reranker: full-word matches
/// against the query, normalized by query length.
fn lexical_scores(query: &str, chunks: &[(usize, String)]) -> Vec<f32> {
    let query_tokens: HashSet<String> = tokenize(query).into_iter().collect();
    if query_tokens.is_empty() {
        return vec![0.5; chunks.len()];
    }

    chunks
        .iter()
        .map(|(_, chunk)| {
            let chunk_tokens: HashSet<String> = tokenize(chunk).into_iter().collect();
            let matches = query_tokens.intersection(&chunk_tokens).count();
            matches as f32 / query_tokens.len() as f32
        })
        .collect()
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() > 2)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ScrapeStatus;
    use async_trait::async_trait;

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            anyhow::bail!("embedding backend down")
        }
    }

    fn source(url: &str, text: &str) -> ScrapedSource {
        ScrapedSource {
            url: url.into(),
            title: "t".into(),
            raw_text: text.into(),
            image_urls: vec![],
            status: ScrapeStatus::Success,
            warnings: vec![],
        }
    }

    #[test]
    fn chunking_windows_and_strides() {
        let words: Vec<String> = (0..350).map(|i| format!("w{i}")).collect();
        let text = words.join(" ");
        let chunks = chunk_text(&text, 200, 100);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with("w0 "));
        assert!(chunks[1].starts_with("w100 "));

        assert_eq!(chunk_text("short text", 200, 100).len(), 1);
        assert!(chunk_text("", 200, 100).is_empty());
    }

    #[tokio::test]
    async fn empty_candidates_give_empty_context() {
        let manager = ContextManager::new(Arc::new(FailingEmbedder), 10_000, 0.4);
        assert_eq!(manager.similar_content_by_query("q", &[]).await, "");
    }

    #[tokio::test]
    async fn embedding_failure_falls_back_to_lexical() {
        let manager = ContextManager::new(Arc::new(FailingEmbedder), 10_000, 0.1);
        let sources = vec![
            source("https://a", "tokio is an async runtime for rust"),
            source("https://b", "bananas are yellow fruit"),
        ];
        let context = manager
            .similar_content_by_query("rust async runtime", &sources)
            .await;
        assert!(!context.is_empty());
        // The relevant source ranks first.
        let a_pos = context.find("https://a").unwrap();
        assert!(context.find("https://b").map(|b| a_pos < b).unwrap_or(true));
    }

    #[tokio::test]
    async fn budget_truncates_at_chunk_boundary() {
        let manager = ContextManager::new(Arc::new(FailingEmbedder), 200, 0.0);
        let long = "rust ".repeat(100);
        let sources = vec![
            source("https://a", &format!("rust relevant {long}")),
            source("https://b", &format!("rust also relevant {long}")),
        ];
        let context = manager.similar_content_by_query("rust", &sources).await;
        assert!(context.len() <= 200);
        // Whatever made it in is a whole block, not a sliced one.
        assert!(context.is_empty() || context.starts_with("Source: "));
    }

    #[tokio::test]
    async fn duplicate_urls_collapse() {
        let manager = ContextManager::new(Arc::new(FailingEmbedder), 10_000, 0.0);
        let sources = vec![
            source("https://a", "rust content one"),
            source("https://a", "rust content two"),
        ];
        let context = manager.similar_content_by_query("rust", &sources).await;
        assert_eq!(context.matches("Source: https://a").count(), 1);
    }
}
