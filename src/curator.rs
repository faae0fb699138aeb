//! Source curation.
//!
//! A best-effort quality gate: the smart LLM is asked to keep the sources
//! that best cover the query, preserving their content verbatim, returned
//! as JSON in the same shape they were given in. Any failure, transport
//! or parse, leaves the research context untouched.

use tracing::{info, warn};

use crate::conductor::Researcher;
use crate::core::types::ScrapedSource;
use crate::llm::{parse, ChatMessage, ChatRequest};

pub struct SourceCurator<'a> {
    researcher: &'a Researcher,
}

impl<'a> SourceCurator<'a> {
    pub fn new(researcher: &'a Researcher) -> Self {
        Self { researcher }
    }

    /// Curate the collected sources and compose the replacement context.
    /// On any failure the original context comes back unchanged.
    pub async fn curate_and_compose(&self, original_context: &str) -> String {
        let sources = self.researcher.research_sources();
        if sources.is_empty() {
            return original_context.to_string();
        }

        self.researcher.streamer.log(
            "research_plan",
            "⚖️ Evaluating and curating sources by credibility and relevance...",
        );

        match self.curate_sources(&sources).await {
            Some(curated) if !curated.is_empty() => {
                self.researcher.streamer.log(
                    "research_plan",
                    format!("🏅 Verified and ranked the top {} most reliable sources", curated.len()),
                );
                compose_context(&curated)
            }
            _ => {
                self.researcher
                    .streamer
                    .log("research_plan", "🚫 Source verification failed");
                original_context.to_string()
            }
        }
    }

    async fn curate_sources(&self, sources: &[ScrapedSource]) -> Option<Vec<ScrapedSource>> {
        let sources_json = serde_json::to_string(sources).ok()?;
        let prompt = self.researcher.prompts.curate_sources_prompt(
            &self.researcher.task.query,
            &sources_json,
            self.researcher.config.max_curated_sources,
        );

        let request = ChatRequest {
            temperature: 0.2,
            max_tokens: Some(8000),
            ..ChatRequest::new(
                &self.researcher.config.smart_llm.model,
                vec![
                    ChatMessage::system(self.researcher.persona().role),
                    ChatMessage::user(prompt),
                ],
            )
        };

        let response = match self.researcher.llm.chat(request).await {
            Ok(response) => response.content,
            Err(e) => {
                warn!("curation LLM call failed: {e}");
                return None;
            }
        };

        let value = parse::parse_tolerant(&response)?;
        let curated: Vec<ScrapedSource> = serde_json::from_value(value).ok()?;
        info!("curation kept {}/{} sources", curated.len(), sources.len());
        Some(curated)
    }
}

fn compose_context(sources: &[ScrapedSource]) -> String {
    sources
        .iter()
        .map(|source| {
            format!(
                "Source: {}\nTitle: {}\nContent: {}",
                source.url, source.title, source.raw_text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ScrapeStatus;

    #[test]
    fn composed_context_carries_provenance() {
        let sources = vec![ScrapedSource {
            url: "https://a".into(),
            title: "A".into(),
            raw_text: "alpha".into(),
            image_urls: vec![],
            status: ScrapeStatus::Success,
            warnings: vec![],
        }];
        let context = compose_context(&sources);
        assert!(context.contains("Source: https://a"));
        assert!(context.contains("Content: alpha"));
    }
}
