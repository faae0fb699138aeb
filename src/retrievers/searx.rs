//! SearxNG retriever. Requires a self-hosted or public instance with the
//! JSON output format enabled.

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{env_key, Retriever};
use crate::core::types::SearchHit;

pub struct SearxSearch {
    http: reqwest::Client,
    query: String,
    base_url: String,
}

impl SearxSearch {
    pub fn new(http: reqwest::Client, query: &str) -> Result<Self> {
        let mut base_url = env_key("SEARX_URL")
            .context("SearxNG URL not found; set the SEARX_URL env var")?;
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self {
            http,
            query: query.to_string(),
            base_url,
        })
    }
}

#[async_trait]
impl Retriever for SearxSearch {
    fn name(&self) -> &'static str {
        "searx"
    }

    async fn search(&self, max_results: usize) -> Result<Vec<SearchHit>> {
        let search_url = format!("{}search", self.base_url);
        let resp = self
            .http
            .get(&search_url)
            .header("Accept", "application/json")
            .query(&[("q", self.query.as_str()), ("format", "json")])
            .send()
            .await
            .context("searx request failed")?
            .error_for_status()
            .context("searx returned an error status")?;

        let payload: serde_json::Value = resp.json().await.context("searx response not JSON")?;
        let results = payload
            .get("results")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(results
            .iter()
            .take(max_results)
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
