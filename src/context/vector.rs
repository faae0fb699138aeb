//! Vector store interface.
//!
//! External stores (pgvector, LanceDB, …) are out of scope; the core only
//! depends on this trait. The in-memory implementation covers local
//! corpus mode and tests.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::embed::{cosine_similarity, Embedder};

#[derive(Debug, Clone)]
pub struct VectorDocument {
    pub content: String,
    /// Provenance metadata (`url`, `title`, …) used for citation and
    /// filtered search.
    pub metadata: HashMap<String, String>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn load(&self, documents: Vec<VectorDocument>) -> Result<()>;

    /// Top-k by similarity, optionally restricted to documents whose
    /// metadata contains every key/value pair in `filter`.
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&HashMap<String, String>>,
    ) -> Result<Vec<VectorDocument>>;
}

pub struct InMemoryVectorStore {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<Vec<(VectorDocument, Vec<f32>)>>,
}

impl InMemoryVectorStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn load(&self, documents: Vec<VectorDocument>) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        let mut entries = self.entries.write().await;
        entries.extend(documents.into_iter().zip(vectors));
        Ok(())
    }

    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&HashMap<String, String>>,
    ) -> Result<Vec<VectorDocument>> {
        let query_vec = self
            .embedder
            .embed(std::slice::from_ref(&query.to_string()))
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        let entries = self.entries.read().await;
        let mut scored: Vec<(&VectorDocument, f32)> = entries
            .iter()
            .filter(|(doc, _)| {
                filter
                    .map(|f| {
                        f.iter()
                            .all(|(key, value)| doc.metadata.get(key) == Some(value))
                    })
                    .unwrap_or(true)
            })
            .map(|(doc, vec)| (doc, cosine_similarity(&query_vec, vec)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored.into_iter().take(k).map(|(doc, _)| doc.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            // Deterministic toy embedding: [letter count, digit count].
            Ok(texts
                .iter()
                .map(|t| {
                    let letters = t.chars().filter(|c| c.is_alphabetic()).count() as f32;
                    let digits = t.chars().filter(|c| c.is_numeric()).count() as f32;
                    vec![letters, digits, 1.0]
                })
                .collect())
        }
    }

    fn doc(content: &str, url: &str) -> VectorDocument {
        VectorDocument {
            content: content.into(),
            metadata: HashMap::from([("url".to_string(), url.to_string())]),
        }
    }

    #[tokio::test]
    async fn filtered_search_respects_metadata() {
        let store = InMemoryVectorStore::new(Arc::new(StubEmbedder));
        store
            .load(vec![doc("abc", "https://a"), doc("123456", "https://b")])
            .await
            .unwrap();

        let filter = HashMap::from([("url".to_string(), "https://b".to_string())]);
        let hits = store
            .similarity_search("anything", 5, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata["url"], "https://b");
    }

    #[tokio::test]
    async fn k_bounds_results() {
        let store = InMemoryVectorStore::new(Arc::new(StubEmbedder));
        store
            .load(vec![
                doc("one", "https://1"),
                doc("two", "https://2"),
                doc("three", "https://3"),
            ])
            .await
            .unwrap();
        let hits = store.similarity_search("query", 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
    }
}
