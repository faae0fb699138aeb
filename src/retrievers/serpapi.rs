//! SerpApi retriever.

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{env_key, Retriever};
use crate::core::types::SearchHit;

const SEARCH_URL: &str = "https://serpapi.com/search.json";

pub struct SerpApiSearch {
    http: reqwest::Client,
    query: String,
    api_key: String,
}

impl SerpApiSearch {
    pub fn new(http: reqwest::Client, query: &str) -> Result<Self> {
        let api_key = env_key("SERPAPI_API_KEY")
            .context("SerpApi key not found; set the SERPAPI_API_KEY env var")?;
        Ok(Self {
            http,
            query: query.to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl Retriever for SerpApiSearch {
    fn name(&self) -> &'static str {
        "serpapi"
    }

    async fn search(&self, max_results: usize) -> Result<Vec<SearchHit>> {
        let resp = self
            .http
            .get(SEARCH_URL)
            .query(&[("q", self.query.as_str()), ("api_key", self.api_key.as_str())])
            .send()
            .await
            .context("serpapi request failed")?
            .error_for_status()
            .context("serpapi returned an error status")?;

        let payload: serde_json::Value = resp.json().await.context("serpapi response not JSON")?;
        let organic = payload
            .get("organic_results")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(organic
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
