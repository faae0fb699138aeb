//! Google Custom Search API retriever.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{env_key, with_domain_filter, Retriever};
use crate::core::types::SearchHit;

const SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";

pub struct GoogleSearch {
    http: reqwest::Client,
    query: String,
    query_domains: Vec<String>,
    api_key: String,
    cx_key: String,
}

impl GoogleSearch {
    /// Keys come from the task headers (`google_api_key` / `google_cx_key`)
    /// or from `GOOGLE_API_KEY` / `GOOGLE_CX_KEY`.
    pub fn new(
        http: reqwest::Client,
        query: &str,
        query_domains: &[String],
        headers: &HashMap<String, String>,
    ) -> Result<Self> {
        let api_key = headers
            .get("google_api_key")
            .cloned()
            .or_else(|| env_key("GOOGLE_API_KEY"))
            .context("Google API key not found; set the GOOGLE_API_KEY env var")?;
        let cx_key = headers
            .get("google_cx_key")
            .cloned()
            .or_else(|| env_key("GOOGLE_CX_KEY"))
            .context("Google CX key not found; set the GOOGLE_CX_KEY env var")?;
        Ok(Self {
            http,
            query: query.to_string(),
            query_domains: query_domains.to_vec(),
            api_key,
            cx_key,
        })
    }
}

#[async_trait]
impl Retriever for GoogleSearch {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn search(&self, max_results: usize) -> Result<Vec<SearchHit>> {
        let search_query = with_domain_filter(&self.query, &self.query_domains);
        let resp = self
            .http
            .get(SEARCH_URL)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.cx_key.as_str()),
                ("q", search_query.as_str()),
                ("start", "1"),
            ])
            .send()
            .await
            .context("google custom search request failed")?
            .error_for_status()
            .context("google custom search returned an error status")?;

        let payload: serde_json::Value = resp.json().await.context("google response not JSON")?;
        let items = payload
            .get("items")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(items
            .iter()
            .filter_map(|item| {
                let link = item.get("link")?.as_str()?;
                if link.contains("youtube.com") {
                    return None;
                }
                Some(SearchHit {
                    title: item.get("title").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    href: link.to_string(),
                    body: item
                        .get("snippet")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .take(max_results)
            .collect())
    }
}
