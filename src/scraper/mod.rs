//! Scraper pool.
//!
//! Fetches batches of URLs with best-effort text extraction. Concurrency
//! runs through `buffer_unordered` while a per-registrable-domain
//! semaphore (capacity 1) serializes requests to the same site, with
//! random jitter when the semaphore was contended. One URL failing, or
//! one domain stalling, never affects the rest of the batch.

pub mod arxiv;
pub mod extract;
pub mod pdf;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rand::RngExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::types::{ScrapeStatus, ScrapedSource};

/// The scraping contract the conductor depends on: N URLs in, N records
/// out, failures reported per URL and never propagated.
#[async_trait]
pub trait UrlScraper: Send + Sync {
    async fn browse_urls(&self, urls: Vec<String>) -> Vec<ScrapedSource>;
}

/// Bodies shorter than this are kept but flagged for diagnostics.
const SOFT_MIN_BODY_CHARS: usize = 200;

enum Backend {
    Static,
    Pdf,
    Arxiv,
}

fn backend_for(url: &str) -> Backend {
    if arxiv::arxiv_id(url).is_some() {
        return Backend::Arxiv;
    }
    let path = url::Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_default();
    if path.ends_with(".pdf") {
        return Backend::Pdf;
    }
    Backend::Static
}

/// Registrable domain = last two labels of the host. Good enough to keep
/// one crawler off a site's back without a public-suffix table.
pub fn registrable_domain(url: &str) -> String {
    let host = url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string());
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() <= 2 {
        host
    } else {
        labels[labels.len() - 2..].join(".")
    }
}

pub struct ScraperPool {
    http: reqwest::Client,
    cache: moka::future::Cache<String, ScrapedSource>,
    domain_limits: Mutex<HashMap<String, Arc<Semaphore>>>,
    user_agent: String,
    timeout: Duration,
    max_concurrent: usize,
    cancel: CancellationToken,
}

impl ScraperPool {
    pub fn new(
        http: reqwest::Client,
        user_agent: String,
        timeout_secs: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            http,
            cache: moka::future::Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(60 * 30))
                .build(),
            domain_limits: Mutex::new(HashMap::new()),
            user_agent,
            timeout: Duration::from_secs(timeout_secs),
            max_concurrent: 8,
            cancel,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    fn domain_semaphore(&self, domain: &str) -> Arc<Semaphore> {
        let mut limits = self.domain_limits.lock().expect("domain limits poisoned");
        Arc::clone(
            limits
                .entry(domain.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(1))),
        )
    }

    /// Scrape every URL in the batch. The returned vector has one record
    /// per input URL; failures come back as `status = failed`.
    async fn browse_all(&self, urls: Vec<String>) -> Vec<ScrapedSource> {
        let total = urls.len();
        info!("scraping {} urls (pool size {})", total, self.max_concurrent);

        let results: Vec<ScrapedSource> = stream::iter(urls)
            .map(|url| async move { self.scrape_one(url).await })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let ok = results
            .iter()
            .filter(|r| r.status == ScrapeStatus::Success)
            .count();
        info!("scrape batch done: {}/{} succeeded", ok, total);
        results
    }
}

#[async_trait]
impl UrlScraper for ScraperPool {
    async fn browse_urls(&self, urls: Vec<String>) -> Vec<ScrapedSource> {
        self.browse_all(urls).await
    }
}

impl ScraperPool {
    async fn scrape_one(&self, url: String) -> ScrapedSource {
        if let Some(cached) = self.cache.get(&url).await {
            debug!("scrape cache hit for {}", url);
            return cached;
        }
        if self.cancel.is_cancelled() {
            return ScrapedSource {
                url,
                title: String::new(),
                raw_text: String::new(),
                image_urls: Vec::new(),
                status: ScrapeStatus::Skipped,
                warnings: vec!["cancelled".into()],
            };
        }

        let domain = registrable_domain(&url);
        let semaphore = self.domain_semaphore(&domain);

        // Same-domain contention gets jitter so we never hammer one site.
        let contended = semaphore.available_permits() == 0;
        let _permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => unreachable!("domain semaphores are never closed"),
        };
        if contended {
            let jitter = {
                let mut rng = rand::rng();
                Duration::from_millis(rng.random_range(600..=1200))
            };
            tokio::time::sleep(jitter).await;
        }

        let outcome = tokio::select! {
            result = self.fetch(&url) => result,
            _ = self.cancel.cancelled() => {
                return ScrapedSource {
                    url,
                    title: String::new(),
                    raw_text: String::new(),
                    image_urls: Vec::new(),
                    status: ScrapeStatus::Skipped,
                    warnings: vec!["cancelled".into()],
                };
            }
        };

        let source = match outcome {
            Ok(mut source) => {
                if source.raw_text.len() < SOFT_MIN_BODY_CHARS {
                    source.warnings.push("thin_content".into());
                }
                source
            }
            Err(e) => {
                warn!("failed to scrape {}: {:#}", url, e);
                ScrapedSource {
                    url,
                    title: String::new(),
                    raw_text: String::new(),
                    image_urls: Vec::new(),
                    status: ScrapeStatus::Failed,
                    warnings: vec![e.to_string()],
                }
            }
        };

        if source.status == ScrapeStatus::Success {
            self.cache.insert(source.url.clone(), source.clone()).await;
        }
        source
    }

    async fn fetch(&self, url: &str) -> Result<ScrapedSource> {
        match backend_for(url) {
            Backend::Arxiv => {
                let paper = arxiv::fetch(&self.http, url).await?;
                Ok(ScrapedSource {
                    url: url.to_string(),
                    title: paper.title,
                    raw_text: paper.text,
                    image_urls: Vec::new(),
                    status: ScrapeStatus::Success,
                    warnings: Vec::new(),
                })
            }
            Backend::Pdf => self.fetch_pdf(url).await,
            Backend::Static => self.fetch_static(url).await,
        }
    }

    async fn fetch_pdf(&self, url: &str) -> Result<ScrapedSource> {
        let resp = self
            .http
            .get(url)
            .header("User-Agent", &self.user_agent)
            .timeout(self.timeout)
            .send()
            .await
            .context("pdf request failed")?
            .error_for_status()
            .context("pdf fetch returned an error status")?;
        let bytes = resp.bytes().await.context("pdf body unreadable")?;
        let text = pdf::extract_text(&bytes)?;

        let title = url::Url::parse(url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut s| s.next_back().map(str::to_string))
            })
            .unwrap_or_else(|| url.to_string());

        Ok(ScrapedSource {
            url: url.to_string(),
            title,
            raw_text: text,
            image_urls: Vec::new(),
            status: ScrapeStatus::Success,
            warnings: Vec::new(),
        })
    }

    async fn fetch_static(&self, url: &str) -> Result<ScrapedSource> {
        // Transient failures (connect errors, 5xx, 429) retry briefly with
        // exponential backoff; everything else fails the URL immediately.
        let policy = backoff::ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_elapsed_time(Some(Duration::from_secs(8)))
            .build();
        let resp = backoff::future::retry(policy, || async {
            let resp = self
                .http
                .get(url)
                .header("User-Agent", &self.user_agent)
                .header("Accept", "text/html,application/xhtml+xml,application/pdf")
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(anyhow::anyhow!("request failed: {e}")))?;

            let status = resp.status();
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(backoff::Error::transient(anyhow::anyhow!(
                    "fetch returned HTTP {status}"
                )));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(anyhow::anyhow!(
                    "fetch returned HTTP {status}"
                )));
            }
            Ok(resp)
        })
        .await?;

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        // Servers lie about extensions; trust the content type for PDFs.
        if content_type.contains("application/pdf") {
            let bytes = resp.bytes().await.context("pdf body unreadable")?;
            let text = pdf::extract_text(&bytes)?;
            return Ok(ScrapedSource {
                url: url.to_string(),
                title: url.to_string(),
                raw_text: text,
                image_urls: Vec::new(),
                status: ScrapeStatus::Success,
                warnings: Vec::new(),
            });
        }

        let html = resp.text().await.context("body unreadable")?;
        let page = extract::extract_page(&html, url);
        Ok(ScrapedSource {
            url: url.to_string(),
            title: page.title,
            raw_text: page.text,
            image_urls: page.image_urls,
            status: ScrapeStatus::Success,
            warnings: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registrable_domain_takes_last_two_labels() {
        assert_eq!(registrable_domain("https://docs.rs/tokio"), "docs.rs");
        assert_eq!(
            registrable_domain("https://export.arxiv.org/api"),
            "arxiv.org"
        );
        assert_eq!(registrable_domain("https://localhost:8080/x"), "localhost");
        assert_eq!(
            registrable_domain("https://a.b.example.co.uk/p"),
            "co.uk"
        );
    }

    #[test]
    fn backend_dispatch() {
        assert!(matches!(
            backend_for("https://arxiv.org/abs/2403.01234"),
            Backend::Arxiv
        ));
        assert!(matches!(
            backend_for("https://example.com/paper.PDF"),
            Backend::Pdf
        ));
        assert!(matches!(
            backend_for("https://example.com/page"),
            Backend::Static
        ));
    }

    #[tokio::test]
    async fn same_domain_shares_a_semaphore() {
        let pool = ScraperPool::new(
            reqwest::Client::new(),
            "test-agent".into(),
            5,
            CancellationToken::new(),
        );
        let a = pool.domain_semaphore("example.com");
        let b = pool.domain_semaphore("example.com");
        let c = pool.domain_semaphore("other.org");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(a.available_permits(), 1);
    }

    #[tokio::test]
    async fn cancelled_pool_skips_urls() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pool = ScraperPool::new(
            reqwest::Client::new(),
            "test-agent".into(),
            5,
            cancel,
        );
        let results = pool
            .browse_urls(vec!["https://example.com/a".into()])
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ScrapeStatus::Skipped);
    }
}
