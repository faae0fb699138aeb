//! Bing Web Search retriever.

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{env_key, Retriever};
use crate::core::types::SearchHit;

const SEARCH_URL: &str = "https://api.bing.microsoft.com/v7.0/search";

pub struct BingSearch {
    http: reqwest::Client,
    query: String,
    api_key: String,
}

impl BingSearch {
    pub fn new(http: reqwest::Client, query: &str) -> Result<Self> {
        let api_key = env_key("BING_API_KEY")
            .context("Bing API key not found; set the BING_API_KEY env var")?;
        Ok(Self {
            http,
            query: query.to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl Retriever for BingSearch {
    fn name(&self) -> &'static str {
        "bing"
    }

    async fn search(&self, max_results: usize) -> Result<Vec<SearchHit>> {
        let count = max_results.to_string();
        let resp = self
            .http
            .get(SEARCH_URL)
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .query(&[
                ("responseFilter", "Webpages"),
                ("q", self.query.as_str()),
                ("count", count.as_str()),
                ("setLang", "en-GB"),
                ("textDecorations", "false"),
                ("textFormat", "HTML"),
                ("safeSearch", "Strict"),
            ])
            .send()
            .await
            .context("bing request failed")?
            .error_for_status()
            .context("bing returned an error status")?;

        let payload: serde_json::Value = resp.json().await.context("bing response not JSON")?;
        let pages = payload
            .get("webPages")
            .and_then(|v| v.get("value"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(pages
            .iter()
            .filter_map(|item| {
                let url = item.get("url")?.as_str()?;
                if url.contains("youtube.com") {
                    return None;
                }
                Some(SearchHit {
                    title: item.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    href: url.to_string(),
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
