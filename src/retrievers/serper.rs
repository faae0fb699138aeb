//! Google Serper retriever with country/language/time filters.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;

use super::{env_key, Retriever};
use crate::core::types::SearchHit;

const SEARCH_URL: &str = "https://google.serper.dev/search";

pub struct SerperSearch {
    http: reqwest::Client,
    query: String,
    query_domains: Vec<String>,
    api_key: String,
    country: Option<String>,
    language: Option<String>,
    time_range: Option<String>,
    exclude_sites: Vec<String>,
}

impl SerperSearch {
    pub fn new(http: reqwest::Client, query: &str, query_domains: &[String]) -> Result<Self> {
        let api_key = env_key("SERPER_API_KEY")
            .context("Serper API key not found; set the SERPER_API_KEY env var")?;
        let exclude_sites = env_key("SERPER_EXCLUDE_SITES")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            http,
            query: query.to_string(),
            query_domains: query_domains.to_vec(),
            api_key,
            country: env_key("SERPER_REGION"),
            language: env_key("SERPER_LANGUAGE"),
            time_range: env_key("SERPER_TIME_RANGE"),
            exclude_sites,
        })
    }

    fn filtered_query(&self) -> String {
        let mut query = self.query.clone();
        for site in &self.exclude_sites {
            query.push_str(&format!(" -site:{site}"));
        }
        if !self.query_domains.is_empty() {
            query.push_str(" site:");
            query.push_str(&self.query_domains.join(" OR site:"));
        }
        query
    }
}

#[async_trait]
impl Retriever for SerperSearch {
    fn name(&self) -> &'static str {
        "serper"
    }

    async fn search(&self, max_results: usize) -> Result<Vec<SearchHit>> {
        let mut params = json!({
            "q": self.filtered_query(),
            "num": max_results,
        });
        if let Some(country) = &self.country {
            params["gl"] = json!(country);
        }
        if let Some(language) = &self.language {
            params["hl"] = json!(language);
        }
        if let Some(time_range) = &self.time_range {
            params["tbs"] = json!(time_range);
        }

        let resp = self
            .http
            .post(SEARCH_URL)
            .header("X-API-KEY", &self.api_key)
            .json(&params)
            .send()
            .await
            .context("serper request failed")?
            .error_for_status()
            .context("serper returned an error status")?;

        let payload: serde_json::Value = resp.json().await.context("serper response not JSON")?;
        let organic = payload
            .get("organic")
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
