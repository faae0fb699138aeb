//! SearchApi.io retriever.

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{env_key, Retriever};
use crate::core::types::SearchHit;

const SEARCH_URL: &str = "https://www.searchapi.io/api/v1/search";

pub struct SearchApiSearch {
    http: reqwest::Client,
    query: String,
    api_key: String,
}

impl SearchApiSearch {
    pub fn new(http: reqwest::Client, query: &str) -> Result<Self> {
        let api_key = env_key("SEARCHAPI_API_KEY")
            .context("SearchApi key not found; set the SEARCHAPI_API_KEY env var")?;
        Ok(Self {
            http,
            query: query.to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl Retriever for SearchApiSearch {
    fn name(&self) -> &'static str {
        "searchapi"
    }

    async fn search(&self, max_results: usize) -> Result<Vec<SearchHit>> {
        let resp = self
            .http
            .get(SEARCH_URL)
            .bearer_auth(&self.api_key)
            .query(&[("q", self.query.as_str()), ("engine", "google")])
            .send()
            .await
            .context("searchapi request failed")?
            .error_for_status()
            .context("searchapi returned an error status")?;

        let payload: serde_json::Value = resp.json().await.context("searchapi response not JSON")?;
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
