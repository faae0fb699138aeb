//! PubMed Central retriever over the NCBI E-utilities.
//!
//! Two-step flow: `esearch` resolves article ids for the query, `esummary`
//! resolves titles. Hits link to the PMC article pages so the scraper can
//! pull full text. Without `NCBI_API_KEY` requests are rate-limited but
//! still work.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::warn;

use super::{env_key, Retriever};
use crate::core::types::SearchHit;

const ESEARCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
const ESUMMARY_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esummary.fcgi";

pub struct PubMedCentralSearch {
    http: reqwest::Client,
    query: String,
    api_key: Option<String>,
    db: String,
}

impl PubMedCentralSearch {
    pub fn new(http: reqwest::Client, query: &str) -> Self {
        let api_key = env_key("NCBI_API_KEY");
        if api_key.is_none() {
            warn!("NCBI_API_KEY not set; PubMed requests will be rate limited");
        }
        Self {
            http,
            query: query.to_string(),
            api_key,
            db: env_key("PUBMED_DB").unwrap_or_else(|| "pmc".to_string()),
        }
    }

    async fn search_ids(&self, max_results: usize) -> Result<Vec<String>> {
        // PMC articles always have full text; plain pubmed needs the filter.
        let term = if self.db == "pubmed" {
            format!("{} AND (ffrft[filter] OR pmc[filter])", self.query)
        } else {
            self.query.clone()
        };

        let retmax = max_results.to_string();
        let mut params = vec![
            ("db", self.db.as_str()),
            ("term", term.as_str()),
            ("retmax", retmax.as_str()),
            ("retmode", "json"),
            ("sort", "relevance"),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.as_str()));
        }

        let resp = self
            .http
            .get(ESEARCH_URL)
            .query(&params)
            .send()
            .await
            .context("pubmed esearch request failed")?
            .error_for_status()
            .context("pubmed esearch returned an error status")?;

        let payload: serde_json::Value = resp.json().await.context("esearch response not JSON")?;
        Ok(payload
            .get("esearchresult")
            .and_then(|r| r.get("idlist"))
            .and_then(|v| v.as_array())
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn article_url(&self, id: &str) -> String {
        if self.db == "pmc" {
            format!("https://www.ncbi.nlm.nih.gov/pmc/articles/PMC{id}/")
        } else {
            format!("https://pubmed.ncbi.nlm.nih.gov/{id}/")
        }
    }
}

#[async_trait]
impl Retriever for PubMedCentralSearch {
    fn name(&self) -> &'static str {
        "pubmed_central"
    }

    async fn search(&self, max_results: usize) -> Result<Vec<SearchHit>> {
        let ids = self.search_ids(max_results).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let id_list = ids.join(",");
        let mut params = vec![
            ("db", self.db.as_str()),
            ("id", id_list.as_str()),
            ("retmode", "json"),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.as_str()));
        }

        let resp = self
            .http
            .get(ESUMMARY_URL)
            .query(&params)
            .send()
            .await
            .context("pubmed esummary request failed")?
            .error_for_status()
            .context("pubmed esummary returned an error status")?;
        let payload: serde_json::Value = resp.json().await.context("esummary response not JSON")?;
        let summaries = payload.get("result").cloned().unwrap_or_default();

        Ok(ids
            .iter()
            .map(|id| {
                let summary = summaries.get(id);
                let title = summary
                    .and_then(|s| s.get("title"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("PubMed article")
                    .to_string();
                let source = summary
                    .and_then(|s| s.get("fulljournalname").or_else(|| s.get("source")))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                SearchHit {
                    href: self.article_url(id),
                    body: format!("{title} ({source})"),
                    title,
                }
            })
            .collect())
    }
}
