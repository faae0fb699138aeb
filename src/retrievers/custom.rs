//! Custom endpoint retriever.
//!
//! Queries an arbitrary HTTP endpoint configured with `RETRIEVER_ENDPOINT`;
//! extra query params come from `RETRIEVER_ARG_*` env vars. The endpoint
//! must return a JSON array of `{"url", "raw_content"}` objects.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{env_key, Retriever};
use crate::core::types::SearchHit;

pub struct CustomRetriever {
    http: reqwest::Client,
    query: String,
    endpoint: String,
    params: HashMap<String, String>,
}

impl CustomRetriever {
    pub fn new(http: reqwest::Client, query: &str) -> Result<Self> {
        let endpoint = env_key("RETRIEVER_ENDPOINT")
            .context("RETRIEVER_ENDPOINT env var is not set")?;
        let params = std::env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix("RETRIEVER_ARG_")
                    .map(|arg| (arg.to_ascii_lowercase(), value))
            })
            .collect();
        Ok(Self {
            http,
            query: query.to_string(),
            endpoint,
            params,
        })
    }
}

#[async_trait]
impl Retriever for CustomRetriever {
    fn name(&self) -> &'static str {
        "custom"
    }

    async fn search(&self, max_results: usize) -> Result<Vec<SearchHit>> {
        let mut query_params: Vec<(&str, &str)> = vec![("query", self.query.as_str())];
        for (key, value) in &self.params {
            query_params.push((key.as_str(), value.as_str()));
        }

        let resp = self
            .http
            .get(&self.endpoint)
            .query(&query_params)
            .send()
            .await
            .context("custom retriever request failed")?
            .error_for_status()
            .context("custom retriever returned an error status")?;

        let payload: serde_json::Value = resp.json().await.context("custom response not JSON")?;
        let items = payload.as_array().cloned().unwrap_or_default();

        Ok(items
            .iter()
            .filter_map(|item| {
                Some(SearchHit {
                    title: item.get("title").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    href: item.get("url")?.as_str()?.to_string(),
                    body: item
                        .get("raw_content")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .take(max_results)
            .collect())
    }
}
