use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::core::types::{McpServerConfig, McpStrategy, ReportSource};

// ---------------------------------------------------------------------------
// Config — file-based loader (sage-researcher.json) with env-var fallback
// ---------------------------------------------------------------------------

pub const ENV_CONFIG_PATH: &str = "SAGE_RESEARCHER_CONFIG";

/// Raw shape of `sage-researcher.json`. Every field is optional; resolution
/// order for each is: JSON field → env var → built-in default.
#[derive(Deserialize, Default, Clone, Debug)]
pub struct ConfigFile {
    pub retriever: Option<String>,
    pub fast_llm: Option<String>,
    pub smart_llm: Option<String>,
    pub strategic_llm: Option<String>,
    pub embedding: Option<String>,
    pub reasoning_effort: Option<String>,
    pub report_source: Option<String>,
    pub mcp_strategy: Option<String>,
    pub doc_path: Option<String>,
    pub llm_base_url: Option<String>,
    /// Never logged. Leave blank for key-less local endpoints.
    pub llm_api_key: Option<String>,
    pub max_iterations: Option<usize>,
    pub max_search_results_per_query: Option<usize>,
    pub max_subquery_concurrency: Option<usize>,
    pub total_words: Option<usize>,
    pub temperature: Option<f32>,
    pub curate_sources: Option<bool>,
    pub max_curated_sources: Option<usize>,
    pub context_token_budget: Option<usize>,
    pub chars_per_token: Option<usize>,
    pub similarity_threshold: Option<f32>,
    pub smart_token_limit: Option<u32>,
    pub strategic_token_limit: Option<u32>,
    pub retriever_timeout_secs: Option<u64>,
    pub scrape_timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
}

/// An LLM endpoint selection in `<provider>:<model>` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmSpec {
    pub provider: String,
    pub model: String,
}

impl LlmSpec {
    /// Parse `"openai:gpt-4o-mini"` → provider + model. The model part may
    /// itself contain colons (Azure deployments do).
    pub fn parse(value: &str) -> Result<LlmSpec, String> {
        match value.split_once(':') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => Ok(LlmSpec {
                provider: provider.to_string(),
                model: model.to_string(),
            }),
            _ => Err(format!(
                "expected '<provider>:<model>', got '{value}' — e.g. 'openai:gpt-4o-mini'"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReasoningEffort {
    Low,
    #[default]
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn parse(value: &str) -> Result<ReasoningEffort, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            other => Err(format!(
                "invalid REASONING_EFFORT '{other}'; expected low|medium|high"
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

/// Fully-resolved runtime settings for a research task.
#[derive(Debug, Clone)]
pub struct Config {
    /// Enabled retriever names, in configured order.
    pub retrievers: Vec<String>,
    pub fast_llm: LlmSpec,
    pub smart_llm: LlmSpec,
    pub strategic_llm: LlmSpec,
    pub embedding: LlmSpec,
    pub reasoning_effort: ReasoningEffort,
    pub report_source: ReportSource,
    pub mcp_strategy: McpStrategy,
    pub doc_path: String,
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub max_iterations: usize,
    pub max_search_results_per_query: usize,
    /// `None` = unbounded sub-query fan-out (back-pressure still applies
    /// through the scraper pool and outbound limits).
    pub max_subquery_concurrency: Option<usize>,
    pub total_words: usize,
    pub temperature: f32,
    pub curate_sources: bool,
    pub max_curated_sources: usize,
    pub context_token_budget: usize,
    pub chars_per_token: usize,
    pub similarity_threshold: f32,
    pub smart_token_limit: u32,
    pub strategic_token_limit: u32,
    pub retriever_timeout_secs: u64,
    pub scrape_timeout_secs: u64,
    pub user_agent: String,
    pub language: String,
    pub mcp_servers: Vec<McpServerConfig>,
}

pub const VALID_RETRIEVERS: &[&str] = &[
    "tavily",
    "serper",
    "google",
    "serpapi",
    "searchapi",
    "bing",
    "exa",
    "searx",
    "duckduckgo",
    "pubmed_central",
    "custom",
    "mcp",
];

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Default for Config {
    fn default() -> Self {
        Config::resolve(ConfigFile::default())
    }
}

impl Config {
    /// Load `sage-researcher.json` from standard locations and resolve every
    /// field against env vars and defaults.
    ///
    /// Search order (first found wins):
    /// 1. `SAGE_RESEARCHER_CONFIG` env var path
    /// 2. `./sage-researcher.json`
    /// 3. `../sage-researcher.json`
    /// 4. `~/.sage-researcher/config.json`
    ///
    /// Missing file → defaults (env-var fallbacks still apply).
    /// Parse error → warning, then defaults.
    pub fn load() -> Config {
        let mut candidates: Vec<PathBuf> = vec![
            PathBuf::from("sage-researcher.json"),
            PathBuf::from("../sage-researcher.json"),
        ];
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".sage-researcher").join("config.json"));
        }
        if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
            candidates.insert(0, PathBuf::from(env_path));
        }

        for path in &candidates {
            match std::fs::read_to_string(path) {
                Ok(contents) => match serde_json::from_str::<ConfigFile>(&contents) {
                    Ok(file) => {
                        tracing::info!("config loaded from {}", path.display());
                        return Config::resolve(file);
                    }
                    Err(e) => {
                        tracing::warn!(
                            "config parse error at {}: {} — using defaults",
                            path.display(),
                            e
                        );
                        return Config::resolve(ConfigFile::default());
                    }
                },
                Err(_) => continue,
            }
        }

        Config::resolve(ConfigFile::default())
    }

    /// Resolve a raw config file against env vars and built-in defaults.
    pub fn resolve(file: ConfigFile) -> Config {
        let retriever_list = file
            .retriever
            .or_else(|| env_nonempty("RETRIEVER"))
            .unwrap_or_else(|| "tavily".to_string());
        let retrievers = Self::parse_retrievers(&retriever_list);

        let llm = |file_value: Option<String>, env_key: &str, default: &str| -> LlmSpec {
            let raw = file_value
                .or_else(|| env_nonempty(env_key))
                .unwrap_or_else(|| default.to_string());
            LlmSpec::parse(&raw).unwrap_or_else(|e| {
                tracing::warn!("{}: {} — using default '{}'", env_key, e, default);
                LlmSpec::parse(default).expect("default llm spec is valid")
            })
        };

        let reasoning_effort = file
            .reasoning_effort
            .or_else(|| env_nonempty("REASONING_EFFORT"))
            .map(|v| {
                ReasoningEffort::parse(&v).unwrap_or_else(|e| {
                    tracing::warn!("{e}; using medium");
                    ReasoningEffort::Medium
                })
            })
            .unwrap_or_default();

        let report_source = file
            .report_source
            .or_else(|| env_nonempty("REPORT_SOURCE"))
            .map(|v| Self::parse_report_source(&v))
            .unwrap_or_default();

        let mcp_strategy = file
            .mcp_strategy
            .or_else(|| env_nonempty("MCP_STRATEGY"))
            .map(|v| McpStrategy::parse(&v))
            .unwrap_or_default();

        let num = |file_value: Option<usize>, env_key: &str, default: usize| -> usize {
            file_value
                .or_else(|| env_nonempty(env_key).and_then(|v| v.parse().ok()))
                .unwrap_or(default)
        };

        Config {
            retrievers,
            fast_llm: llm(file.fast_llm, "FAST_LLM", "openai:gpt-4o-mini"),
            smart_llm: llm(file.smart_llm, "SMART_LLM", "openai:gpt-4.1"),
            strategic_llm: llm(file.strategic_llm, "STRATEGIC_LLM", "openai:o4-mini"),
            embedding: llm(file.embedding, "EMBEDDING", "openai:text-embedding-3-small"),
            reasoning_effort,
            report_source,
            mcp_strategy,
            doc_path: file
                .doc_path
                .or_else(|| env_nonempty("DOC_PATH"))
                .unwrap_or_else(|| "./my-docs".to_string()),
            llm_base_url: file
                .llm_base_url
                .or_else(|| env_nonempty("OPENAI_BASE_URL"))
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            llm_api_key: file.llm_api_key.or_else(|| env_nonempty("OPENAI_API_KEY")),
            max_iterations: num(file.max_iterations, "MAX_ITERATIONS", 3),
            max_search_results_per_query: num(
                file.max_search_results_per_query,
                "MAX_SEARCH_RESULTS_PER_QUERY",
                5,
            ),
            max_subquery_concurrency: file.max_subquery_concurrency.or_else(|| {
                env_nonempty("MAX_SUBQUERY_CONCURRENCY").and_then(|v| v.parse().ok())
            }),
            total_words: num(file.total_words, "TOTAL_WORDS", 1200),
            temperature: file
                .temperature
                .or_else(|| env_nonempty("TEMPERATURE").and_then(|v| v.parse().ok()))
                .unwrap_or(0.4),
            curate_sources: file
                .curate_sources
                .or_else(|| {
                    env_nonempty("CURATE_SOURCES")
                        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
                })
                .unwrap_or(false),
            max_curated_sources: num(file.max_curated_sources, "MAX_CURATED_SOURCES", 10),
            context_token_budget: num(file.context_token_budget, "CONTEXT_TOKEN_BUDGET", 10_000),
            chars_per_token: num(file.chars_per_token, "CHARS_PER_TOKEN", 4),
            similarity_threshold: file
                .similarity_threshold
                .or_else(|| env_nonempty("SIMILARITY_THRESHOLD").and_then(|v| v.parse().ok()))
                .unwrap_or(0.42),
            smart_token_limit: file
                .smart_token_limit
                .or_else(|| env_nonempty("SMART_TOKEN_LIMIT").and_then(|v| v.parse().ok()))
                .unwrap_or(4000),
            strategic_token_limit: file
                .strategic_token_limit
                .or_else(|| env_nonempty("STRATEGIC_TOKEN_LIMIT").and_then(|v| v.parse().ok()))
                .unwrap_or(4000),
            retriever_timeout_secs: file
                .retriever_timeout_secs
                .or_else(|| env_nonempty("RETRIEVER_TIMEOUT_SECS").and_then(|v| v.parse().ok()))
                .unwrap_or(15),
            scrape_timeout_secs: file
                .scrape_timeout_secs
                .or_else(|| env_nonempty("SCRAPE_TIMEOUT_SECS").and_then(|v| v.parse().ok()))
                .unwrap_or(30),
            user_agent: file.user_agent.or_else(|| env_nonempty("USER_AGENT")).unwrap_or_else(
                || {
                    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
                     Chrome/128.0.0.0 Safari/537.36"
                        .to_string()
                },
            ),
            language: file
                .language
                .or_else(|| env_nonempty("LANGUAGE"))
                .unwrap_or_else(|| "english".to_string()),
            mcp_servers: file.mcp_servers,
        }
    }

    /// Split a comma list of retriever names and validate each. Invalid
    /// names are reported and the whole list falls back to `tavily`.
    pub fn parse_retrievers(raw: &str) -> Vec<String> {
        let names: Vec<String> = raw
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        let invalid: Vec<&String> = names
            .iter()
            .filter(|n| !VALID_RETRIEVERS.contains(&n.as_str()))
            .collect();
        if !invalid.is_empty() {
            tracing::warn!(
                "invalid retriever(s) {:?}; valid options: {}. Defaulting to 'tavily'",
                invalid,
                VALID_RETRIEVERS.join(", ")
            );
            return vec!["tavily".to_string()];
        }
        if names.is_empty() {
            return vec!["tavily".to_string()];
        }
        names
    }

    fn parse_report_source(raw: &str) -> ReportSource {
        match raw.trim().to_ascii_lowercase().as_str() {
            "web" => ReportSource::Web,
            "local" => ReportSource::Local,
            "hybrid" => ReportSource::Hybrid,
            "langchain_documents" | "langchain_docs" => ReportSource::LangchainDocs,
            "langchain_vectorstore" | "langchain_vstore" => ReportSource::LangchainVstore,
            "azure" => ReportSource::Azure,
            other => {
                tracing::warn!("unknown REPORT_SOURCE '{}'; using 'web'", other);
                ReportSource::Web
            }
        }
    }

    /// Credential env vars each retriever needs to be usable.
    fn required_credentials(name: &str) -> &'static [&'static str] {
        match name {
            "tavily" => &["TAVILY_API_KEY"],
            "serper" => &["SERPER_API_KEY"],
            "google" => &["GOOGLE_API_KEY", "GOOGLE_CX_KEY"],
            "serpapi" => &["SERPAPI_API_KEY"],
            "searchapi" => &["SEARCHAPI_API_KEY"],
            "bing" => &["BING_API_KEY"],
            "exa" => &["EXA_API_KEY"],
            "searx" => &["SEARX_URL"],
            "custom" => &["RETRIEVER_ENDPOINT"],
            // duckduckgo, pubmed_central and mcp work without credentials
            // (NCBI_API_KEY only lifts rate limits).
            _ => &[],
        }
    }

    /// Readiness probe: for every enabled retriever, list the credential
    /// env vars that are missing. Nothing is auto-disabled — a runtime task
    /// proceeds with whatever retrievers turn out to be usable.
    pub fn readiness(&self) -> HashMap<String, Vec<String>> {
        let mut missing: HashMap<String, Vec<String>> = HashMap::new();
        for name in &self.retrievers {
            let absent: Vec<String> = Self::required_credentials(name)
                .iter()
                .filter(|key| env_nonempty(key).is_none())
                .map(|key| key.to_string())
                .collect();
            if !absent.is_empty() {
                missing.insert(name.clone(), absent);
            }
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_spec_parses_triples() {
        let spec = LlmSpec::parse("openai:gpt-4o-mini").unwrap();
        assert_eq!(spec.provider, "openai");
        assert_eq!(spec.model, "gpt-4o-mini");

        // Azure-style model ids keep their inner colons.
        let spec = LlmSpec::parse("azure_openai:gpt-4o:eastus").unwrap();
        assert_eq!(spec.model, "gpt-4o:eastus");

        assert!(LlmSpec::parse("gpt-4o-mini").is_err());
        assert!(LlmSpec::parse(":model").is_err());
    }

    #[test]
    fn invalid_retriever_falls_back_to_tavily() {
        assert_eq!(Config::parse_retrievers("tavily,mcp"), vec!["tavily", "mcp"]);
        assert_eq!(Config::parse_retrievers("altavista"), vec!["tavily"]);
        assert_eq!(Config::parse_retrievers(""), vec!["tavily"]);
    }

    #[test]
    fn reasoning_effort_validates() {
        assert_eq!(
            ReasoningEffort::parse("high").unwrap(),
            ReasoningEffort::High
        );
        assert!(ReasoningEffort::parse("extreme").is_err());
    }

    #[test]
    fn defaults_resolve() {
        let cfg = Config::resolve(ConfigFile::default());
        assert_eq!(cfg.max_iterations, 3);
        assert_eq!(cfg.mcp_strategy, McpStrategy::Fast);
        assert_eq!(cfg.chars_per_token, 4);
        assert!(!cfg.curate_sources);
    }

    #[test]
    fn readiness_reports_missing_credentials() {
        let mut cfg = Config::resolve(ConfigFile::default());
        cfg.retrievers = vec!["duckduckgo".into()];
        assert!(cfg.readiness().is_empty());
    }
}
