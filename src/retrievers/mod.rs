//! Retriever adapters.
//!
//! A retriever turns a query into `{title, href, body}` hits without
//! fetching page bodies. Adapters are dispatched through a name-keyed
//! registry rather than inheritance; each one is constructed per
//! sub-query with `(query, query_domains, headers)` and exposes a single
//! `search(max_results)` capability.
//!
//! The `mcp` name is a marker handled by the MCP subsystem: it never
//! produces URLs for scraping, so the URL fan-out skips it.

pub mod bing;
pub mod custom;
pub mod duckduckgo;
pub mod exa;
pub mod google;
pub mod pubmed_central;
pub mod searchapi;
pub mod searx;
pub mod serpapi;
pub mod serper;
pub mod tavily;

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::core::types::SearchHit;

#[async_trait]
pub trait Retriever: Send + Sync {
    fn name(&self) -> &'static str;

    /// Search for up to `max_results` hits. Callers must not invoke this
    /// with `max_results == 0`; the fan-out short-circuits first.
    async fn search(&self, max_results: usize) -> Result<Vec<SearchHit>>;
}

/// Builds retriever instances per sub-query. The conductor depends on this
/// trait so tests can substitute scripted retrievers.
pub trait RetrieverProvider: Send + Sync {
    /// Construct the named retriever for one sub-query. Missing credentials
    /// surface here as errors and are classified by the caller.
    fn build(
        &self,
        name: &str,
        query: &str,
        query_domains: &[String],
        headers: &HashMap<String, String>,
    ) -> Result<Box<dyn Retriever>>;
}

pub fn is_mcp_retriever(name: &str) -> bool {
    name.eq_ignore_ascii_case("mcp")
}

/// Default registry backed by the real adapters.
#[derive(Clone)]
pub struct RetrieverRegistry {
    http: reqwest::Client,
}

impl RetrieverRegistry {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl RetrieverProvider for RetrieverRegistry {
    fn build(
        &self,
        name: &str,
        query: &str,
        query_domains: &[String],
        headers: &HashMap<String, String>,
    ) -> Result<Box<dyn Retriever>> {
        let http = self.http.clone();
        let retriever: Box<dyn Retriever> = match name {
            "tavily" => Box::new(tavily::TavilySearch::new(http, query, query_domains, headers)?),
            "serper" => Box::new(serper::SerperSearch::new(http, query, query_domains)?),
            "google" => Box::new(google::GoogleSearch::new(http, query, query_domains, headers)?),
            "serpapi" => Box::new(serpapi::SerpApiSearch::new(http, query)?),
            "searchapi" => Box::new(searchapi::SearchApiSearch::new(http, query)?),
            "bing" => Box::new(bing::BingSearch::new(http, query)?),
            "exa" => Box::new(exa::ExaSearch::new(http, query, query_domains)?),
            "searx" => Box::new(searx::SearxSearch::new(http, query)?),
            "duckduckgo" => Box::new(duckduckgo::DuckDuckGoSearch::new(http, query, query_domains)),
            "pubmed_central" => Box::new(pubmed_central::PubMedCentralSearch::new(http, query)),
            "custom" => Box::new(custom::CustomRetriever::new(http, query)?),
            "mcp" => bail!("the 'mcp' retriever is handled by the MCP subsystem"),
            other => bail!("unknown retriever '{other}'"),
        };
        Ok(retriever)
    }
}

/// Append `site:` filters for a domain allow-list, Google-syntax style.
pub(crate) fn with_domain_filter(query: &str, query_domains: &[String]) -> String {
    if query_domains.is_empty() {
        return query.to_string();
    }
    let sites = query_domains
        .iter()
        .map(|d| format!("site:{d}"))
        .collect::<Vec<_>>()
        .join(" OR ");
    format!("({sites}) {query}")
}

pub(crate) fn env_key(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_filter_uses_site_syntax() {
        assert_eq!(with_domain_filter("rust", &[]), "rust");
        assert_eq!(
            with_domain_filter("rust", &["docs.rs".into(), "github.com".into()]),
            "(site:docs.rs OR site:github.com) rust"
        );
    }

    #[test]
    fn mcp_is_not_buildable_as_plain_retriever() {
        let registry = RetrieverRegistry::new(reqwest::Client::new());
        assert!(registry
            .build("mcp", "q", &[], &HashMap::new())
            .is_err());
        assert!(is_mcp_retriever("mcp"));
        assert!(!is_mcp_retriever("tavily"));
    }
}
