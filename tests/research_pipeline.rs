//! End-to-end pipeline scenarios driven through scripted back-ends:
//! retrievers, scraper, embedder, MCP and the LLM are all substituted so
//! the conductor's scheduling, caching and failure-isolation behavior is
//! observable without any network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sage_researcher::context::embed::Embedder;
use sage_researcher::llm::{ChatRequest, ChatResponse, ChatUsage, LlmClient};
use sage_researcher::mcp::McpResearch;
use sage_researcher::retrievers::{Retriever, RetrieverProvider};
use sage_researcher::scraper::UrlScraper;
use sage_researcher::{
    Config, ContextEntry, McpStrategy, Researcher, ResearchError, ResearchTask, ReportOptions,
    ScrapeStatus, ScrapedSource, SearchHit, SourceKind,
};

// ───────────────────────────────────────────────────────────────────────────
// Scripted back-ends
// ───────────────────────────────────────────────────────────────────────────

struct ScriptedLlm {
    planner_response: String,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    fn new(planner_response: &str) -> Arc<Self> {
        Arc::new(Self {
            planner_response: planner_response.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    fn respond(&self, request: &ChatRequest) -> ChatResponse {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let all_text: String = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let content = if all_text.contains("google search queries") {
            self.planner_response.clone()
        } else if all_text.contains("The server is determined by the field") {
            r#"{"server": "🔬 Test Agent", "agent_role_prompt": "You are a test research agent."}"#
                .to_string()
        } else {
            "# Research Report\n\nFindings with a [citation](https://example.com).".to_string()
        };
        ChatResponse {
            content,
            tool_calls: Vec::new(),
            usage: Some(ChatUsage {
                prompt_tokens: 120,
                completion_tokens: 40,
            }),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, sage_researcher::LlmError> {
        Ok(self.respond(&request))
    }

    async fn chat_stream(
        &self,
        request: ChatRequest,
        tokens: mpsc::Sender<String>,
    ) -> Result<ChatResponse, sage_researcher::LlmError> {
        let response = self.respond(&request);
        for token in response.content.split_inclusive(' ') {
            let _ = tokens.send(token.to_string()).await;
        }
        Ok(response)
    }
}

struct ScriptedRetriever {
    hits: Vec<SearchHit>,
    fail: bool,
    searches: Arc<AtomicUsize>,
}

#[async_trait]
impl Retriever for ScriptedRetriever {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn search(&self, max_results: usize) -> anyhow::Result<Vec<SearchHit>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("scripted retriever outage");
        }
        Ok(self.hits.iter().take(max_results).cloned().collect())
    }
}

#[derive(Default)]
struct ScriptedProvider {
    /// Hits per retriever name.
    hits: HashMap<String, Vec<SearchHit>>,
    failing: Vec<String>,
    searches: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    fn with_urls(name: &str, urls: &[&str]) -> Self {
        let hits = urls
            .iter()
            .map(|url| SearchHit {
                title: format!("Title for {url}"),
                href: url.to_string(),
                body: "snippet".to_string(),
            })
            .collect();
        Self {
            hits: HashMap::from([(name.to_string(), hits)]),
            ..Default::default()
        }
    }

    fn failing(mut self, name: &str) -> Self {
        self.failing.push(name.to_string());
        self
    }
}

impl RetrieverProvider for ScriptedProvider {
    fn build(
        &self,
        name: &str,
        _query: &str,
        _query_domains: &[String],
        _headers: &HashMap<String, String>,
    ) -> anyhow::Result<Box<dyn Retriever>> {
        Ok(Box::new(ScriptedRetriever {
            hits: self.hits.get(name).cloned().unwrap_or_default(),
            fail: self.failing.iter().any(|f| f == name),
            searches: Arc::clone(&self.searches),
        }))
    }
}

#[derive(Default)]
struct RecordingScraper {
    scraped: Mutex<Vec<String>>,
}

impl RecordingScraper {
    fn scraped_urls(&self) -> Vec<String> {
        self.scraped.lock().unwrap().clone()
    }
}

#[async_trait]
impl UrlScraper for RecordingScraper {
    async fn browse_urls(&self, urls: Vec<String>) -> Vec<ScrapedSource> {
        self.scraped.lock().unwrap().extend(urls.iter().cloned());
        urls.into_iter()
            .map(|url| ScrapedSource {
                title: format!("Page {url}"),
                raw_text: format!(
                    "research content about rust async runtimes found at {url}, \
                     with enough words to rank against any query"
                ),
                url,
                image_urls: vec!["https://example.com/images/figure-2.png".into()],
                status: ScrapeStatus::Success,
                warnings: vec![],
            })
            .collect()
    }
}

struct HashEmbedder;

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; 8];
                for (i, b) in text.bytes().enumerate() {
                    v[i % 8] += (b as f32) / 255.0;
                }
                v
            })
            .collect())
    }
}

struct CountingMcp {
    invocations: AtomicUsize,
    entries: Vec<ContextEntry>,
}

impl CountingMcp {
    fn new(n_entries: usize) -> Arc<Self> {
        let entries = (0..n_entries)
            .map(|i| ContextEntry {
                content: format!("mcp finding {i}"),
                url: format!("https://mcp.example/{i}"),
                title: format!("MCP {i}"),
                origin_query: "q".into(),
                kind: SourceKind::Mcp,
            })
            .collect();
        Arc::new(Self {
            invocations: AtomicUsize::new(0),
            entries,
        })
    }

    fn count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl McpResearch for CountingMcp {
    async fn research(&self, _query: &str) -> Vec<ContextEntry> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.entries.clone()
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Harness
// ───────────────────────────────────────────────────────────────────────────

fn test_config(retrievers: &[&str], mcp_strategy: McpStrategy) -> Config {
    let mut config = Config::resolve(Default::default());
    config.retrievers = retrievers.iter().map(|s| s.to_string()).collect();
    config.mcp_strategy = mcp_strategy;
    config.max_iterations = 2;
    config
}

struct Harness {
    researcher: Researcher,
    scraper: Arc<RecordingScraper>,
    provider_searches: Arc<AtomicUsize>,
}

fn build_harness(
    config: Config,
    provider: ScriptedProvider,
    planner_response: &str,
    mcp: Option<Arc<CountingMcp>>,
) -> Harness {
    let scraper = Arc::new(RecordingScraper::default());
    let provider_searches = Arc::clone(&provider.searches);
    let mut builder = Researcher::builder(ResearchTask::new("capital of France"), config)
        .llm_client(ScriptedLlm::new(planner_response))
        .embedder(Arc::new(HashEmbedder))
        .retriever_provider(Arc::new(provider))
        .scraper(Arc::clone(&scraper) as Arc<dyn UrlScraper>);
    if let Some(mcp) = mcp {
        builder = builder.mcp(mcp as Arc<dyn McpResearch>);
    }
    Harness {
        researcher: builder.build(),
        scraper,
        provider_searches,
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Scenarios
// ───────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn web_only_pipeline_produces_report_and_dedupes_urls() {
    let provider = ScriptedProvider::with_urls(
        "duckduckgo",
        &["https://a.example/1", "https://b.example/2", "https://c.example/3"],
    );
    let harness = build_harness(
        test_config(&["duckduckgo"], McpStrategy::Fast),
        provider,
        r#"["sub query one", "sub query two"]"#,
        None,
    );

    let context = harness.researcher.conduct_research().await.unwrap();
    assert!(!context.is_empty());

    // Every sub-query surfaces the same three urls; the visited filter
    // must hand each to the scraper exactly once.
    let scraped = harness.scraper.scraped_urls();
    assert_eq!(scraped.len(), 3);
    let visited = harness.researcher.visited_urls();
    assert_eq!(visited.len(), 3);

    let report = harness
        .researcher
        .write_report(ReportOptions::default())
        .await
        .unwrap();
    assert!(report.starts_with("# "));
    assert!(harness.researcher.costs() > 0.0);
    assert!(!harness.researcher.image_urls().is_empty());
}

#[tokio::test]
async fn mcp_fast_runs_exactly_once_and_shares_cache() {
    let provider =
        ScriptedProvider::with_urls("tavily", &["https://a.example/1", "https://b.example/2"]);
    let mcp = CountingMcp::new(2);
    let harness = build_harness(
        test_config(&["tavily", "mcp"], McpStrategy::Fast),
        provider,
        r#"["sub one", "sub two"]"#,
        Some(Arc::clone(&mcp)),
    );

    let context = harness.researcher.conduct_research().await.unwrap();

    // Exactly one MCP research invocation, cache shared by 3 sub-queries
    // (two planned plus the appended original).
    assert_eq!(mcp.count(), 1);
    assert_eq!(context.matches("mcp finding 0").count(), 3);
    assert_eq!(context.matches("mcp finding 1").count(), 3);
    assert!(context.contains("*Source: MCP 0 (https://mcp.example/0)*"));
}

#[tokio::test]
async fn mcp_deep_runs_once_per_sub_query() {
    let provider =
        ScriptedProvider::with_urls("tavily", &["https://a.example/1", "https://b.example/2"]);
    let mcp = CountingMcp::new(1);
    let harness = build_harness(
        test_config(&["tavily", "mcp"], McpStrategy::Deep),
        provider,
        r#"["sub one", "sub two"]"#,
        Some(Arc::clone(&mcp)),
    );

    harness.researcher.conduct_research().await.unwrap();
    // Two planned sub-queries plus the appended original query.
    assert_eq!(mcp.count(), 3);
}

#[tokio::test]
async fn mcp_disabled_never_invokes_mcp() {
    let provider = ScriptedProvider::with_urls("tavily", &["https://a.example/1"]);
    let mcp = CountingMcp::new(1);
    let harness = build_harness(
        test_config(&["tavily", "mcp"], McpStrategy::Disabled),
        provider,
        r#"["sub one"]"#,
        Some(Arc::clone(&mcp)),
    );

    let context = harness.researcher.conduct_research().await.unwrap();
    assert_eq!(mcp.count(), 0);
    assert!(!context.contains("mcp finding"));
}

#[tokio::test]
async fn task_option_overrides_config_strategy() {
    let provider = ScriptedProvider::with_urls("tavily", &["https://a.example/1"]);
    let mcp = CountingMcp::new(1);
    let scraper = Arc::new(RecordingScraper::default());
    let mut task = ResearchTask::new("query");
    // Legacy alias on the task wins over the config's `disabled`.
    task.mcp_strategy = Some("comprehensive".into());
    let researcher = Researcher::builder(task, test_config(&["tavily", "mcp"], McpStrategy::Disabled))
        .llm_client(ScriptedLlm::new(r#"["one", "two"]"#))
        .embedder(Arc::new(HashEmbedder))
        .retriever_provider(Arc::new(provider))
        .scraper(scraper as Arc<dyn UrlScraper>)
        .mcp(Arc::clone(&mcp) as Arc<dyn McpResearch>)
        .build();

    assert_eq!(researcher.resolved_mcp_strategy(), McpStrategy::Deep);
    researcher.conduct_research().await.unwrap();
    assert_eq!(mcp.count(), 3);
}

#[tokio::test]
async fn failing_retriever_never_reduces_completed_sub_queries() {
    let mut provider =
        ScriptedProvider::with_urls("duckduckgo", &["https://ok.example/1", "https://ok.example/2"]);
    provider.hits.insert(
        "tavily".to_string(),
        vec![SearchHit {
            title: "never seen".into(),
            href: "https://broken.example/x".into(),
            body: String::new(),
        }],
    );
    let provider = provider.failing("tavily");

    let harness = build_harness(
        test_config(&["tavily", "duckduckgo"], McpStrategy::Disabled),
        provider,
        r#"["sub one", "sub two"]"#,
        None,
    );

    let context = harness.researcher.conduct_research().await.unwrap();
    assert!(!context.is_empty());

    // Nothing from the broken retriever leaks into visited urls; every
    // healthy url is scraped.
    let visited = harness.researcher.visited_urls();
    assert!(visited.iter().all(|url| !url.contains("broken.example")));
    assert_eq!(visited.len(), 2);
    assert_eq!(harness.scraper.scraped_urls().len(), 2);
}

#[tokio::test]
async fn malformed_planner_output_falls_back_to_original_query() {
    let provider = ScriptedProvider::with_urls("duckduckgo", &["https://a.example/1"]);
    let harness = build_harness(
        test_config(&["duckduckgo"], McpStrategy::Disabled),
        provider,
        "not-json",
        None,
    );

    let context = harness.researcher.conduct_research().await.unwrap();
    assert!(!context.is_empty());

    // The fallback plan is exactly [original]; appending the original and
    // deduplicating leaves one sub-query, so one retriever fan-out plus
    // the planner seed search.
    assert_eq!(harness.provider_searches.load(Ordering::SeqCst), 2);

    let report = harness
        .researcher
        .write_report(ReportOptions::default())
        .await
        .unwrap();
    assert!(!report.is_empty());
}

#[tokio::test]
async fn zero_max_results_never_invokes_retrievers() {
    let provider = ScriptedProvider::with_urls("duckduckgo", &["https://a.example/1"]);
    let mut config = test_config(&["duckduckgo"], McpStrategy::Disabled);
    config.max_search_results_per_query = 0;
    let harness = build_harness(config, provider, r#"["sub one"]"#, None);

    let result = harness.researcher.conduct_research().await;
    assert_eq!(harness.provider_searches.load(Ordering::SeqCst), 0);
    assert!(matches!(result, Err(ResearchError::NoSources(_))));
}

#[tokio::test]
async fn cancellation_before_research_is_typed() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let researcher = Researcher::builder(
        ResearchTask::new("query"),
        test_config(&["duckduckgo"], McpStrategy::Disabled),
    )
    .llm_client(ScriptedLlm::new("[]"))
    .embedder(Arc::new(HashEmbedder))
    .retriever_provider(Arc::new(ScriptedProvider::default()))
    .scraper(Arc::new(RecordingScraper::default()) as Arc<dyn UrlScraper>)
    .cancel(cancel)
    .build();

    assert!(matches!(
        researcher.conduct_research().await,
        Err(ResearchError::Cancelled)
    ));
    assert!(matches!(
        researcher.write_report(ReportOptions::default()).await,
        Err(ResearchError::Cancelled)
    ));
}

#[tokio::test]
async fn empty_context_yields_error_report_without_llm_call() {
    let researcher = Researcher::builder(
        ResearchTask::new("unanswerable"),
        test_config(&["duckduckgo"], McpStrategy::Disabled),
    )
    .llm_client(ScriptedLlm::new("[]"))
    .embedder(Arc::new(HashEmbedder))
    .retriever_provider(Arc::new(ScriptedProvider::default()))
    .scraper(Arc::new(RecordingScraper::default()) as Arc<dyn UrlScraper>)
    .build();

    let report = researcher
        .write_report(ReportOptions {
            external_context: Some(String::new()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(report.starts_with("# Report could not be generated"));
    // The error report is produced without ever calling the model, so no
    // cost accrues.
    assert_eq!(researcher.costs(), 0.0);
}

#[tokio::test]
async fn subtopic_report_does_not_append_original_query() {
    let provider = ScriptedProvider::with_urls("duckduckgo", &["https://a.example/1"]);
    let scraper = Arc::new(RecordingScraper::default());
    let provider_searches = Arc::clone(&provider.searches);
    let mut task = ResearchTask::new("subtopic");
    task.parent_query = Some("main topic".into());
    task.report_type = sage_researcher::ReportType::SubtopicReport;
    let researcher = Researcher::builder(task, test_config(&["duckduckgo"], McpStrategy::Disabled))
        .llm_client(ScriptedLlm::new(r#"["one", "two"]"#))
        .embedder(Arc::new(HashEmbedder))
        .retriever_provider(Arc::new(provider))
        .scraper(scraper as Arc<dyn UrlScraper>)
        .build();

    researcher.conduct_research().await.unwrap();
    // Seed search + two sub-queries, no appended original.
    assert_eq!(provider_searches.load(Ordering::SeqCst), 3);
}
