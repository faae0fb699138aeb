//! DuckDuckGo HTML retriever. Key-less: parses the html.duckduckgo.com
//! SERP directly, unwrapping the `uddg` redirect links.

use anyhow::{Context, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};

use super::Retriever;
use crate::core::types::SearchHit;

pub struct DuckDuckGoSearch {
    http: reqwest::Client,
    query: String,
    query_domains: Vec<String>,
}

impl DuckDuckGoSearch {
    pub fn new(http: reqwest::Client, query: &str, query_domains: &[String]) -> Self {
        Self {
            http,
            query: query.to_string(),
            query_domains: query_domains.to_vec(),
        }
    }
}

/// DuckDuckGo wraps most result links in a `/l/?uddg=<target>` redirect.
/// Resolve a raw SERP href (possibly relative or protocol-relative) to
/// its destination; anything that is not plain http(s) is dropped.
fn resolve_hit_url(href: &str) -> Option<String> {
    let base = url::Url::parse("https://duckduckgo.com/").ok()?;
    let resolved = base.join(href.trim()).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }

    if resolved.domain() == Some("duckduckgo.com") {
        // Redirect wrapper: the real target rides in the uddg param.
        return resolved
            .query_pairs()
            .find(|(key, _)| key == "uddg")
            .map(|(_, target)| target.into_owned())
            .filter(|target| !target.trim().is_empty());
    }
    Some(resolved.into())
}

pub fn parse_results(html: &str, max_results: usize) -> Vec<SearchHit> {
    let doc = Html::parse_document(html);
    let sel_item = Selector::parse("div.results_links, div.result").unwrap();
    let sel_link = Selector::parse("a.result__a").unwrap();
    let sel_snip = Selector::parse("a.result__snippet, div.result__snippet").unwrap();

    let mut out = Vec::new();
    for item in doc.select(&sel_item) {
        if out.len() >= max_results {
            break;
        }

        let link = match item.select(&sel_link).next() {
            Some(l) => l,
            None => continue,
        };
        let Some(href) = link.value().attr("href").and_then(resolve_hit_url) else {
            continue;
        };
        let title = link.text().collect::<Vec<_>>().join(" ");
        let title = title.split_whitespace().collect::<Vec<_>>().join(" ");

        let snippet = item
            .select(&sel_snip)
            .next()
            .map(|n| n.text().collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        let snippet = snippet.split_whitespace().collect::<Vec<_>>().join(" ");

        out.push(SearchHit {
            title,
            href,
            body: snippet,
        });
    }

    out
}

#[async_trait]
impl Retriever for DuckDuckGoSearch {
    fn name(&self) -> &'static str {
        "duckduckgo"
    }

    async fn search(&self, max_results: usize) -> Result<Vec<SearchHit>> {
        let mut url =
            reqwest::Url::parse("https://html.duckduckgo.com/html/").expect("static url");
        let query = if self.query_domains.is_empty() {
            self.query.clone()
        } else {
            format!(
                "{} site:{}",
                self.query,
                self.query_domains.join(" OR site:")
            )
        };
        url.query_pairs_mut().append_pair("q", &query);

        let resp = self
            .http
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml")
            .send()
            .await
            .context("duckduckgo request failed")?
            .error_for_status()
            .context("duckduckgo returned an error status")?;
        let body = resp.text().await.context("duckduckgo body unreadable")?;

        Ok(parse_results(&body, max_results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <div class="results_links">
          <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2F&rut=x">
            The Rust Programming Language
          </a>
          <div class="result__snippet">A language empowering everyone.</div>
        </div>
        <div class="results_links">
          <a class="result__a" href="https://docs.rs/">Docs.rs</a>
          <a class="result__snippet">Documentation host.</a>
        </div>
        <div class="results_links">
          <a class="result__a" href="javascript:void(0)">Bogus</a>
        </div>
    "#;

    #[test]
    fn parses_serp_and_unwraps_redirects() {
        let hits = parse_results(SAMPLE, 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].href, "https://www.rust-lang.org/");
        assert_eq!(hits[0].title, "The Rust Programming Language");
        assert_eq!(hits[1].href, "https://docs.rs/");
    }

    #[test]
    fn respects_max_results() {
        let hits = parse_results(SAMPLE, 1);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn rejects_non_http_hrefs() {
        assert_eq!(resolve_hit_url("javascript:void(0)"), None);
        assert_eq!(resolve_hit_url(""), None);
        assert_eq!(
            resolve_hit_url("//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com"),
            Some("https://example.com".to_string())
        );
        assert_eq!(
            resolve_hit_url("/l/?uddg=https%3A%2F%2Fexample.com%2Fpage&rut=abc"),
            Some("https://example.com/page".to_string())
        );
    }
}
