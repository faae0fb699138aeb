//! Research conductor.
//!
//! Drives the full pipeline for one task: persona selection, sub-query
//! planning, per-sub-query fan-out across retrievers and MCP, scraping,
//! context ranking, and the final context join. Shared mutable state
//! (visited urls, collected sources, the MCP result cache) lives here,
//! serialized behind short-held locks.

pub mod agent;
pub mod planner;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use futures::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::context::embed::{Embedder, OpenAiCompatEmbedder};
use crate::context::vector::VectorStore;
use crate::context::ContextManager;
use crate::core::config::Config;
use crate::core::costs::CostTracker;
use crate::core::errors::ResearchError;
use crate::core::types::{
    ContextEntry, McpStrategy, ReportSource, ReportType, ResearchOutput, ResearchTask,
    ScrapeStatus, ScrapedSource, SearchHit,
};
use crate::curator::SourceCurator;
use crate::documents::DocumentLoader;
use crate::llm::{LlmClient, OpenAiCompatClient, TrackedLlm};
use crate::mcp::research::LLM_ANALYSIS_URL;
use crate::mcp::{McpResearch, McpSubsystem};
use crate::prompts::{family_for_model, PromptFamily};
use crate::report::{ReportGenerator, ReportOptions};
use crate::retrievers::{is_mcp_retriever, RetrieverProvider, RetrieverRegistry};
use crate::scraper::{ScraperPool, UrlScraper};
use crate::stream::Streamer;

use agent::Persona;

pub struct Researcher {
    pub task: ResearchTask,
    pub config: Arc<Config>,
    pub streamer: Streamer,
    pub llm: TrackedLlm,
    pub prompts: Arc<dyn PromptFamily>,
    pub scraper: Arc<dyn UrlScraper>,
    pub context_manager: Arc<ContextManager>,
    retrievers: Arc<dyn RetrieverProvider>,
    mcp: Option<Arc<dyn McpResearch>>,
    pub vector_store: Option<Arc<dyn VectorStore>>,
    pub vector_store_filter: Option<HashMap<String, String>>,
    /// Caller-provided corpus for the langchain_docs source mode.
    external_documents: Vec<ScrapedSource>,
    cancel: CancellationToken,

    persona: Mutex<Option<Persona>>,
    visited_urls: Mutex<HashSet<String>>,
    /// Written exactly once before sub-query fan-out in fast mode,
    /// read-only afterwards.
    mcp_cache: OnceLock<Vec<ContextEntry>>,
    research_sources: Mutex<Vec<ScrapedSource>>,
    research_images: Mutex<Vec<String>>,
    pub context: Mutex<String>,
}

pub struct ResearcherBuilder {
    task: ResearchTask,
    config: Arc<Config>,
    streamer: Option<Streamer>,
    costs: Option<CostTracker>,
    llm_client: Option<Arc<dyn LlmClient>>,
    embedder: Option<Arc<dyn Embedder>>,
    retrievers: Option<Arc<dyn RetrieverProvider>>,
    scraper: Option<Arc<dyn UrlScraper>>,
    mcp: Option<Arc<dyn McpResearch>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    vector_store_filter: Option<HashMap<String, String>>,
    external_documents: Vec<ScrapedSource>,
    cancel: Option<CancellationToken>,
}

impl ResearcherBuilder {
    pub fn streamer(mut self, streamer: Streamer) -> Self {
        self.streamer = Some(streamer);
        self
    }

    pub fn costs(mut self, costs: CostTracker) -> Self {
        self.costs = Some(costs);
        self
    }

    pub fn llm_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.llm_client = Some(client);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn retriever_provider(mut self, provider: Arc<dyn RetrieverProvider>) -> Self {
        self.retrievers = Some(provider);
        self
    }

    pub fn scraper(mut self, scraper: Arc<dyn UrlScraper>) -> Self {
        self.scraper = Some(scraper);
        self
    }

    pub fn mcp(mut self, mcp: Arc<dyn McpResearch>) -> Self {
        self.mcp = Some(mcp);
        self
    }

    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    pub fn vector_store_filter(mut self, filter: HashMap<String, String>) -> Self {
        self.vector_store_filter = Some(filter);
        self
    }

    pub fn external_documents(mut self, documents: Vec<ScrapedSource>) -> Self {
        self.external_documents = documents;
        self
    }

    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> Researcher {
        let config = self.config;
        let streamer = self.streamer.unwrap_or_else(Streamer::detached);
        let costs = self.costs.unwrap_or_default();
        let cancel = self.cancel.unwrap_or_default();
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_default();

        let llm_client: Arc<dyn LlmClient> = self.llm_client.unwrap_or_else(|| {
            Arc::new(OpenAiCompatClient::new(
                http.clone(),
                config.llm_base_url.clone(),
                config.llm_api_key.clone(),
            ))
        });
        let llm = TrackedLlm::new(llm_client, costs, streamer.clone());

        let embedder: Arc<dyn Embedder> = self.embedder.unwrap_or_else(|| {
            Arc::new(OpenAiCompatEmbedder::new(
                http.clone(),
                config.llm_base_url.clone(),
                config.llm_api_key.clone(),
                config.embedding.model.clone(),
            ))
        });
        let context_manager = Arc::new(ContextManager::new(
            embedder,
            config.context_token_budget * config.chars_per_token,
            config.similarity_threshold,
        ));

        let scraper: Arc<dyn UrlScraper> = self.scraper.unwrap_or_else(|| {
            Arc::new(ScraperPool::new(
                http.clone(),
                config.user_agent.clone(),
                config.scrape_timeout_secs,
                cancel.clone(),
            ))
        });

        let retrievers: Arc<dyn RetrieverProvider> = self
            .retrievers
            .unwrap_or_else(|| Arc::new(RetrieverRegistry::new(http)));

        let prompts = family_for_model(&config.smart_llm.model);

        // MCP servers may come from the task or the config file.
        let mcp = self.mcp.or_else(|| {
            let mut configs = self.task.mcp_configs.clone();
            if configs.is_empty() {
                configs = config.mcp_servers.clone();
            }
            if configs.is_empty() {
                return None;
            }
            Some(Arc::new(McpSubsystem::new(
                configs,
                llm.clone(),
                config.strategic_llm.model.clone(),
                Arc::clone(&prompts),
                streamer.clone(),
            )) as Arc<dyn McpResearch>)
        });

        Researcher {
            task: self.task,
            config,
            streamer,
            llm,
            prompts,
            scraper,
            context_manager,
            retrievers,
            mcp,
            vector_store: self.vector_store,
            vector_store_filter: self.vector_store_filter,
            external_documents: self.external_documents,
            cancel,
            persona: Mutex::new(None),
            visited_urls: Mutex::new(HashSet::new()),
            mcp_cache: OnceLock::new(),
            research_sources: Mutex::new(Vec::new()),
            research_images: Mutex::new(Vec::new()),
            context: Mutex::new(String::new()),
        }
    }
}

impl Researcher {
    pub fn builder(task: ResearchTask, config: Config) -> ResearcherBuilder {
        ResearcherBuilder {
            task,
            config: Arc::new(config),
            streamer: None,
            costs: None,
            llm_client: None,
            embedder: None,
            retrievers: None,
            scraper: None,
            mcp: None,
            vector_store: None,
            vector_store_filter: None,
            external_documents: Vec::new(),
            cancel: None,
        }
    }

    pub fn costs(&self) -> f64 {
        self.llm.costs().total()
    }

    pub fn visited_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .visited_urls
            .lock()
            .expect("visited urls poisoned")
            .iter()
            .cloned()
            .collect();
        urls.sort();
        urls
    }

    pub fn image_urls(&self) -> Vec<String> {
        self.research_images
            .lock()
            .expect("research images poisoned")
            .clone()
    }

    pub fn persona(&self) -> Persona {
        self.persona
            .lock()
            .expect("persona poisoned")
            .clone()
            .unwrap_or_else(Persona::default_researcher)
    }

    pub fn research_sources(&self) -> Vec<ScrapedSource> {
        self.research_sources
            .lock()
            .expect("research sources poisoned")
            .clone()
    }

    /// Strategy resolution priority: explicit task option > config value >
    /// default `fast`. Legacy aliases are accepted with a warning.
    pub fn resolved_mcp_strategy(&self) -> McpStrategy {
        match self.task.mcp_strategy.as_deref() {
            Some(value) => McpStrategy::parse(value),
            None => self.config.mcp_strategy,
        }
    }

    fn mcp_enabled(&self) -> bool {
        self.mcp.is_some()
            && self
                .config
                .retrievers
                .iter()
                .any(|name| is_mcp_retriever(name))
    }

    // ───────────────────────────────────────────────────────────────────
    // Top-level pipeline
    // ───────────────────────────────────────────────────────────────────

    /// Run research and return the composed context. Also retains the
    /// context internally for `write_report`.
    pub async fn conduct_research(&self) -> Result<String, ResearchError> {
        if self.cancel.is_cancelled() {
            return Err(ResearchError::Cancelled);
        }

        self.visited_urls
            .lock()
            .expect("visited urls poisoned")
            .clear();
        let run_id = uuid::Uuid::new_v4();
        info!(
            %run_id,
            "enabled retrievers: {:?}", self.config.retrievers
        );
        self.streamer.log(
            "starting_research",
            format!("🔍 Starting the research task for '{}'...", self.task.query),
        );

        // Choose agent and role if not already defined.
        let persona = {
            let current = self.persona.lock().expect("persona poisoned").clone();
            match current {
                Some(persona) => persona,
                None => {
                    let persona = agent::choose_agent(
                        &self.llm,
                        &self.config.smart_llm.model,
                        &*self.prompts,
                        &self.task.query,
                        self.task.parent_query.as_deref(),
                    )
                    .await;
                    *self.persona.lock().expect("persona poisoned") = Some(persona.clone());
                    persona
                }
            }
        };
        self.streamer.log("agent_generated", persona.server.clone());

        let research_data = if !self.task.source_urls.is_empty() {
            let mut context = self.get_context_by_urls(&self.task.source_urls).await;
            if self.task.complement_source_urls {
                info!("complementing provided source urls with a web search");
                let web = self
                    .get_context_by_web_search(&self.task.query, Arc::new(Vec::new()))
                    .await;
                if !web.is_empty() {
                    if !context.is_empty() {
                        context.push_str("\n\n");
                    }
                    context.push_str(&web);
                }
            }
            context
        } else {
            match self.task.report_source {
                ReportSource::Web => {
                    self.get_context_by_web_search(&self.task.query, Arc::new(Vec::new()))
                        .await
                }
                ReportSource::Local => {
                    let documents = self.load_local_documents().await?;
                    self.get_context_by_web_search(&self.task.query, Arc::new(documents))
                        .await
                }
                ReportSource::Hybrid => {
                    let documents = self.load_local_documents().await?;
                    let docs_context = self
                        .get_context_by_web_search(&self.task.query, Arc::new(documents))
                        .await;
                    let web_context = self
                        .get_context_by_web_search(&self.task.query, Arc::new(Vec::new()))
                        .await;
                    self.prompts
                        .join_local_web_documents(&docs_context, &web_context)
                }
                ReportSource::Azure => {
                    // Blob transport is an external collaborator; the blobs
                    // are expected pre-downloaded under doc_path.
                    let documents = self.load_local_documents().await?;
                    self.get_context_by_web_search(&self.task.query, Arc::new(documents))
                        .await
                }
                ReportSource::LangchainDocs => {
                    let documents = self.external_documents.clone();
                    if let Some(store) = &self.vector_store {
                        let docs = crate::documents::to_vector_documents(&documents);
                        if let Err(e) = store.load(docs).await {
                            warn!("vector store load failed: {e:#}");
                        }
                    }
                    self.get_context_by_web_search(&self.task.query, Arc::new(documents))
                        .await
                }
                ReportSource::LangchainVstore => self.get_context_by_vectorstore().await,
            }
        };

        let context = if self.config.curate_sources {
            info!("curating sources");
            let curator = SourceCurator::new(self);
            curator.curate_and_compose(&research_data).await
        } else {
            research_data
        };

        if context.trim().is_empty() {
            self.streamer
                .error(format!("no sources found for '{}'", self.task.query))
                .await;
            return Err(ResearchError::NoSources(self.task.query.clone()));
        }

        *self.context.lock().expect("context poisoned") = context.clone();
        self.streamer.log(
            "research_step_finalized",
            format!("Finalized research step.\n💸 Total research costs: ${:.4}", self.costs()),
        );
        self.streamer.cost(self.llm.costs().snapshot()).await;
        info!("research complete; context size {} chars", context.len());
        Ok(context)
    }

    /// Write the final report from the retained (or overridden) context.
    pub async fn write_report(&self, options: ReportOptions) -> Result<String, ResearchError> {
        if self.cancel.is_cancelled() {
            return Err(ResearchError::Cancelled);
        }
        let generator = ReportGenerator::new(self);
        generator.write_report(options).await
    }

    /// Convenience: research then report, returning all task artifacts.
    pub async fn run(&self) -> Result<ResearchOutput, ResearchError> {
        let context = self.conduct_research().await?;
        let report = self.write_report(ReportOptions::default()).await?;
        Ok(ResearchOutput {
            report,
            context,
            visited_urls: self.visited_urls(),
            image_urls: self.image_urls(),
            costs: self.costs(),
        })
    }

    // ───────────────────────────────────────────────────────────────────
    // Context production
    // ───────────────────────────────────────────────────────────────────

    async fn load_local_documents(&self) -> Result<Vec<ScrapedSource>, ResearchError> {
        let loader = DocumentLoader::new(&self.config.doc_path);
        let documents = loader
            .load()
            .await
            .map_err(|e| ResearchError::Config(format!("loading documents: {e:#}")))?;
        info!("loaded {} local documents", documents.len());
        if let Some(store) = &self.vector_store {
            let docs = crate::documents::to_vector_documents(&documents);
            if let Err(e) = store.load(docs).await {
                warn!("vector store load failed: {e:#}");
            }
        }
        Ok(documents)
    }

    async fn get_context_by_urls(&self, urls: &[String]) -> String {
        let new_urls = self.get_new_urls(urls.iter().cloned());
        info!("scraping {} provided source urls", new_urls.len());
        let sources = self.scrape_and_collect(new_urls).await;
        if sources.is_empty() {
            self.streamer.log(
                "answering_from_memory",
                "🧐 No content found in the provided sources...",
            );
            return String::new();
        }
        self.context_manager
            .similar_content_by_query(&self.task.query, &sources)
            .await
    }

    /// The main web path: MCP pre-pass, planning, bounded sub-query
    /// fan-out, per-sub-query combination, deterministic join.
    async fn get_context_by_web_search(
        &self,
        query: &str,
        scraped_data: Arc<Vec<ScrapedSource>>,
    ) -> String {
        let strategy = self.resolved_mcp_strategy();

        // MCP pre-pass: in fast mode research runs exactly once, with the
        // original query, before any sub-query starts.
        if self.mcp_enabled() && self.mcp_cache.get().is_none() {
            match strategy {
                McpStrategy::Disabled => {
                    info!("MCP disabled by strategy; skipping MCP research");
                    self.streamer
                        .log("mcp_disabled", "⚡ MCP research disabled by configuration");
                }
                McpStrategy::Fast => {
                    self.streamer.log(
                        "mcp_optimization",
                        "🚀 MCP fast mode: researching the main query once",
                    );
                    let mcp = self.mcp.as_ref().expect("mcp_enabled checked");
                    let entries = mcp.research(query).await;
                    info!("MCP results cached: {} context entries", entries.len());
                    let _ = self.mcp_cache.set(entries);
                }
                McpStrategy::Deep => {
                    info!("MCP deep mode: will run for every sub-query");
                    self.streamer.log(
                        "mcp_comprehensive",
                        "🔍 MCP deep mode: running for each sub-query",
                    );
                }
            }
        }

        let seed = self.seed_search_results(query).await;
        let planned = planner::plan_research_outline(
            &self.llm,
            &self.config,
            &*self.prompts,
            planner::PlanInput {
                query,
                parent_query: self.task.parent_query.as_deref(),
                report_type: self.task.report_type,
                search_results: &seed,
                retriever_names: &self.config.retrievers,
            },
        )
        .await;
        let sub_queries =
            planner::finalize_sub_queries(planned, query, self.task.report_type);
        self.streamer.log_with_metadata(
            "subqueries",
            format!("🗂️ I will research based on the following queries: {sub_queries:?}"),
            json!(sub_queries),
        );

        let total = sub_queries.len();
        let completed = AtomicUsize::new(0);
        let concurrency = self
            .config
            .max_subquery_concurrency
            .unwrap_or(total.max(1));

        let mut contexts: Vec<(usize, String)> = stream::iter(
            sub_queries
                .into_iter()
                .enumerate()
                .map(|(index, sub_query)| {
                    let scraped_data = Arc::clone(&scraped_data);
                    let completed = &completed;
                    async move {
                        let context = self
                            .process_sub_query(&sub_query, strategy, scraped_data)
                            .await;
                        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                        self.streamer.progress(done, total);
                        (index, context)
                    }
                }),
        )
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

        // No ordering is guaranteed across concurrent sub-queries; the
        // final join is deterministic, ordered by sub-query index.
        contexts.sort_by_key(|(index, _)| *index);
        let joined: Vec<String> = contexts
            .into_iter()
            .map(|(_, context)| context)
            .filter(|context| !context.trim().is_empty())
            .collect();
        info!("aggregated context from {} sub-queries", joined.len());
        joined.join("\n\n")
    }

    async fn get_context_by_vectorstore(&self) -> String {
        let Some(store) = &self.vector_store else {
            warn!("langchain_vstore source selected without a vector store");
            return String::new();
        };

        let planned = planner::plan_research_outline(
            &self.llm,
            &self.config,
            &*self.prompts,
            planner::PlanInput {
                query: &self.task.query,
                parent_query: self.task.parent_query.as_deref(),
                report_type: self.task.report_type,
                search_results: &[],
                retriever_names: &self.config.retrievers,
            },
        )
        .await;
        let sub_queries =
            planner::finalize_sub_queries(planned, &self.task.query, self.task.report_type);

        let contexts: Vec<String> = stream::iter(sub_queries.iter().map(|sub_query| async {
            self.context_manager
                .similar_content_by_query_with_vectorstore(
                    sub_query,
                    store.as_ref(),
                    self.vector_store_filter.as_ref(),
                    8,
                )
                .await
        }))
        .buffer_unordered(sub_queries.len().max(1))
        .collect()
        .await;

        contexts
            .into_iter()
            .filter(|context| !context.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Seed hits for the planner, from the first non-MCP retriever.
    async fn seed_search_results(&self, query: &str) -> Vec<SearchHit> {
        let Some(name) = self
            .config
            .retrievers
            .iter()
            .find(|name| !is_mcp_retriever(name))
        else {
            return Vec::new();
        };
        if self.config.max_search_results_per_query == 0 {
            return Vec::new();
        }

        match self.retrievers.build(
            name,
            query,
            &self.task.query_domains,
            &self.task.headers,
        ) {
            Ok(retriever) => {
                match tokio::time::timeout(
                    std::time::Duration::from_secs(self.config.retriever_timeout_secs),
                    retriever.search(self.config.max_search_results_per_query),
                )
                .await
                {
                    Ok(Ok(hits)) => hits,
                    Ok(Err(e)) => {
                        warn!("seed search with {name} failed: {e:#}");
                        Vec::new()
                    }
                    Err(_) => {
                        warn!("seed search with {name} timed out");
                        Vec::new()
                    }
                }
            }
            Err(e) => {
                warn!("cannot build seed retriever {name}: {e:#}");
                Vec::new()
            }
        }
    }

    async fn process_sub_query(
        &self,
        sub_query: &str,
        strategy: McpStrategy,
        scraped_data: Arc<Vec<ScrapedSource>>,
    ) -> String {
        if self.cancel.is_cancelled() {
            return String::new();
        }
        self.streamer.log(
            "running_subquery_research",
            format!("\n🔍 Running research for '{sub_query}'..."),
        );

        // MCP context per strategy.
        let mcp_context: Vec<ContextEntry> = if self.mcp_enabled() {
            match strategy {
                McpStrategy::Disabled => Vec::new(),
                McpStrategy::Fast => match self.mcp_cache.get() {
                    Some(cached) => {
                        self.streamer.log(
                            "mcp_cache_reuse",
                            format!(
                                "♻️ Reusing {} cached MCP results for '{sub_query}'",
                                cached.len()
                            ),
                        );
                        cached.clone()
                    }
                    None => {
                        // The pre-pass populates the cache before fan-out;
                        // reaching here means it was skipped, so run now.
                        warn!("MCP cache unavailable; researching per sub-query");
                        let mcp = self.mcp.as_ref().expect("mcp_enabled checked");
                        mcp.research(sub_query).await
                    }
                },
                McpStrategy::Deep => {
                    self.streamer.log(
                        "mcp_comprehensive_run",
                        format!("🔍 Running deep MCP research for '{sub_query}'"),
                    );
                    let mcp = self.mcp.as_ref().expect("mcp_enabled checked");
                    mcp.research(sub_query).await
                }
            }
        } else {
            Vec::new()
        };

        // Web context from the non-MCP retrievers (skipped when the caller
        // supplied a pre-scraped corpus).
        let data = if scraped_data.is_empty() {
            self.scrape_data_by_urls(sub_query).await
        } else {
            scraped_data.as_ref().clone()
        };
        let web_context = if data.is_empty() {
            String::new()
        } else {
            self.context_manager
                .similar_content_by_query(sub_query, &data)
                .await
        };

        let combined = combine_mcp_and_web_context(&mcp_context, &web_context);
        if combined.is_empty() {
            self.streamer.log(
                "subquery_context_not_found",
                format!("🤷 No content found for '{sub_query}'..."),
            );
        } else {
            info!(
                "sub-query '{}' combined context: {} chars ({} MCP sources, web: {})",
                sub_query,
                combined.len(),
                mcp_context.len(),
                !web_context.is_empty()
            );
        }
        combined
    }

    /// Retriever fan-out for one sub-query: every configured non-MCP
    /// retriever searches, failures are classified and skipped, new URLs
    /// pass the visited filter, get shuffled, and go to the scraper.
    async fn scrape_data_by_urls(&self, sub_query: &str) -> Vec<ScrapedSource> {
        let new_urls = self.search_relevant_source_urls(sub_query).await;
        if new_urls.is_empty() {
            return Vec::new();
        }
        self.streamer.log(
            "researching",
            "🤔 Researching for relevant information across multiple sources...\n",
        );
        self.scrape_and_collect(new_urls).await
    }

    async fn search_relevant_source_urls(&self, sub_query: &str) -> Vec<String> {
        let mut candidate_urls: Vec<String> = Vec::new();
        let max_results = self.config.max_search_results_per_query;

        for name in &self.config.retrievers {
            // MCP results are self-contained context entries, never URLs.
            if is_mcp_retriever(name) {
                continue;
            }
            if max_results == 0 {
                continue;
            }

            let retriever = match self.retrievers.build(
                name,
                sub_query,
                &self.task.query_domains,
                &self.task.headers,
            ) {
                Ok(retriever) => retriever,
                Err(e) => {
                    error!("cannot build retriever {name}: {e:#}");
                    continue;
                }
            };

            let hits = match tokio::time::timeout(
                std::time::Duration::from_secs(self.config.retriever_timeout_secs),
                retriever.search(max_results),
            )
            .await
            {
                Ok(Ok(hits)) => hits,
                Ok(Err(e)) => {
                    error!("search with {name} failed: {e:#}");
                    continue;
                }
                Err(_) => {
                    warn!("search with {name} timed out");
                    continue;
                }
            };
            candidate_urls.extend(
                hits.into_iter()
                    .map(|hit| hit.href)
                    .filter(|href| !href.is_empty()),
            );
        }

        let mut new_urls = self.get_new_urls(candidate_urls.into_iter());
        new_urls.shuffle(&mut rand::rng());
        new_urls
    }

    /// Filter URLs through the task-wide visited set, inserting as we go.
    fn get_new_urls(&self, urls: impl Iterator<Item = String>) -> Vec<String> {
        let mut visited = self.visited_urls.lock().expect("visited urls poisoned");
        let mut new_urls = Vec::new();
        for url in urls {
            if url.is_empty() {
                continue;
            }
            if visited.insert(url.clone()) {
                self.streamer.log_with_metadata(
                    "added_source_url",
                    format!("✅ Added source url to research: {url}\n"),
                    json!(url),
                );
                new_urls.push(url);
            }
        }
        new_urls
    }

    async fn scrape_and_collect(&self, urls: Vec<String>) -> Vec<ScrapedSource> {
        let results = self.scraper.browse_urls(urls).await;

        let successes: Vec<ScrapedSource> = results
            .into_iter()
            .filter(|source| source.status == ScrapeStatus::Success)
            .collect();

        let mut new_images: Vec<String> = Vec::new();
        {
            let mut images = self.research_images.lock().expect("research images poisoned");
            for source in &successes {
                for image in &source.image_urls {
                    if !images.contains(image) {
                        images.push(image.clone());
                        new_images.push(image.clone());
                    }
                }
            }
        }
        self.streamer.images(new_images);

        if let Some(store) = &self.vector_store {
            let docs = crate::documents::to_vector_documents(&successes);
            if let Err(e) = store.load(docs).await {
                warn!("vector store load failed: {e:#}");
            }
        }

        self.research_sources
            .lock()
            .expect("research sources poisoned")
            .extend(successes.iter().cloned());
        successes
    }
}

/// Combine per-sub-query MCP and web contexts: web first, then each MCP
/// entry with its citation line, MCP entries separated by a horizontal
/// rule. Empty iff both inputs are empty.
pub fn combine_mcp_and_web_context(mcp_context: &[ContextEntry], web_context: &str) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !web_context.trim().is_empty() {
        parts.push(web_context.trim().to_string());
    }

    let formatted: Vec<String> = mcp_context
        .iter()
        .filter(|entry| !entry.content.trim().is_empty())
        .map(|entry| {
            let citation = if !entry.url.is_empty() && entry.url != LLM_ANALYSIS_URL {
                format!("\n\n*Source: {} ({})*", entry.title, entry.url)
            } else {
                format!("\n\n*Source: {}*", entry.title)
            };
            format!("{}{citation}", entry.content.trim())
        })
        .collect();
    if !formatted.is_empty() {
        parts.push(formatted.join("\n\n---\n\n"));
    }

    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SourceKind;

    fn entry(content: &str, url: &str, title: &str) -> ContextEntry {
        ContextEntry {
            content: content.into(),
            url: url.into(),
            title: title.into(),
            origin_query: "q".into(),
            kind: SourceKind::Mcp,
        }
    }

    #[test]
    fn combine_empty_inputs_is_empty() {
        assert_eq!(combine_mcp_and_web_context(&[], ""), "");
        assert_eq!(combine_mcp_and_web_context(&[], "   "), "");
        assert_eq!(
            combine_mcp_and_web_context(&[entry("", "https://a", "A")], ""),
            ""
        );
    }

    #[test]
    fn combine_web_comes_first() {
        let mcp = vec![entry("mcp finding", "https://a", "A")];
        let combined = combine_mcp_and_web_context(&mcp, "web context");
        assert!(combined.starts_with("web context"));
        assert!(combined.contains("mcp finding"));
        assert!(combined.contains("*Source: A (https://a)*"));
    }

    #[test]
    fn combine_separates_mcp_entries_with_rule() {
        let mcp = vec![
            entry("one", "https://a", "A"),
            entry("two", "https://b", "B"),
        ];
        let combined = combine_mcp_and_web_context(&mcp, "");
        assert!(combined.contains("\n\n---\n\n"));
    }

    #[test]
    fn combine_llm_analysis_has_bare_citation() {
        let mcp = vec![entry("analysis", LLM_ANALYSIS_URL, "LLM analysis")];
        let combined = combine_mcp_and_web_context(&mcp, "");
        assert!(combined.contains("*Source: LLM analysis*"));
        assert!(!combined.contains(LLM_ANALYSIS_URL));
    }
}
