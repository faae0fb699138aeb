//! Tavily API retriever.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::{env_key, Retriever};
use crate::core::types::SearchHit;

const SEARCH_URL: &str = "https://api.tavily.com/search";

pub struct TavilySearch {
    http: reqwest::Client,
    query: String,
    query_domains: Vec<String>,
    api_key: String,
}

impl TavilySearch {
    /// API key resolution: task header `tavily_api_key` → `TAVILY_API_KEY`.
    pub fn new(
        http: reqwest::Client,
        query: &str,
        query_domains: &[String],
        headers: &HashMap<String, String>,
    ) -> Result<Self> {
        let api_key = headers
            .get("tavily_api_key")
            .cloned()
            .or_else(|| env_key("TAVILY_API_KEY"))
            .context("Tavily API key not found; set the TAVILY_API_KEY env var")?;
        Ok(Self {
            http,
            query: query.to_string(),
            query_domains: query_domains.to_vec(),
            api_key,
        })
    }
}

#[async_trait]
impl Retriever for TavilySearch {
    fn name(&self) -> &'static str {
        "tavily"
    }

    async fn search(&self, max_results: usize) -> Result<Vec<SearchHit>> {
        let body = json!({
            "query": self.query,
            "search_depth": "basic",
            "topic": "general",
            "days": 2,
            "max_results": max_results,
            "include_domains": self.query_domains,
            "include_answer": false,
            "include_raw_content": false,
            "include_images": false,
            "api_key": self.api_key,
        });

        let resp = self
            .http
            .post(SEARCH_URL)
            .json(&body)
            .send()
            .await
            .context("tavily request failed")?
            .error_for_status()
            .context("tavily returned an error status")?;

        let payload: serde_json::Value = resp.json().await.context("tavily response not JSON")?;
        let results = payload
            .get("results")
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default();
        if results.is_empty() {
            debug!("tavily returned no results for '{}'", self.query);
        }

        Ok(results
            .iter()
            .filter_map(|item| {
                Some(SearchHit {
                    title: item.get("title").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    href: item.get("url")?.as_str()?.to_string(),
                    body: item
                        .get("content")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect())
    }
}
