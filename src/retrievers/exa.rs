//! Exa (neural search) retriever.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;

use super::{env_key, Retriever};
use crate::core::types::SearchHit;

const SEARCH_URL: &str = "https://api.exa.ai/search";

pub struct ExaSearch {
    http: reqwest::Client,
    query: String,
    query_domains: Vec<String>,
    api_key: String,
}

impl ExaSearch {
    pub fn new(http: reqwest::Client, query: &str, query_domains: &[String]) -> Result<Self> {
        let api_key = env_key("EXA_API_KEY")
            .context("Exa API key not found; set the EXA_API_KEY env var")?;
        Ok(Self {
            http,
            query: query.to_string(),
            query_domains: query_domains.to_vec(),
            api_key,
        })
    }
}

#[async_trait]
impl Retriever for ExaSearch {
    fn name(&self) -> &'static str {
        "exa"
    }

    async fn search(&self, max_results: usize) -> Result<Vec<SearchHit>> {
        let mut body = json!({
            "query": self.query,
            "type": "neural",
            "useAutoprompt": false,
            "numResults": max_results,
            "contents": {"text": true},
        });
        if !self.query_domains.is_empty() {
            body["includeDomains"] = json!(self.query_domains);
        }

        let resp = self
            .http
            .post(SEARCH_URL)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("exa request failed")?
            .error_for_status()
            .context("exa returned an error status")?;

        let payload: serde_json::Value = resp.json().await.context("exa response not JSON")?;
        let results = payload
            .get("results")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(results
            .iter()
            .filter_map(|item| {
                Some(SearchHit {
                    title: item.get("title").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    href: item.get("url")?.as_str()?.to_string(),
                    body: item
                        .get("text")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect())
    }
}
