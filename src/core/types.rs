use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ───────────────────────────────────────────────────────────────────────────
// Retrieval types
// ───────────────────────────────────────────────────────────────────────────

/// A single hit returned by a retriever: title + link + snippet.
/// Retrievers never fetch page bodies; that is the scraper's job.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    pub href: String,
    #[serde(default)]
    pub body: String,
}

/// Scrape outcome per URL.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStatus {
    Success,
    Failed,
    Skipped,
}

/// One scraped source, keyed by url. A url is globally unique within a task.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScrapedSource {
    pub url: String,
    pub title: String,
    pub raw_text: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
    pub status: ScrapeStatus,
    /// Set when the extracted body is suspiciously short (< 200 chars).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Where a context entry came from.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Web,
    Mcp,
    Local,
    Vector,
}

/// A ranked, cited passage ready to be fed to the report LLM.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ContextEntry {
    pub content: String,
    pub url: String,
    pub title: String,
    /// The (sub-)query that produced this entry.
    pub origin_query: String,
    pub kind: SourceKind,
}

// ───────────────────────────────────────────────────────────────────────────
// Task enums
// ───────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    #[default]
    ResearchReport,
    ResourceReport,
    OutlineReport,
    CustomReport,
    SubtopicReport,
    Deep,
    MultiAgents,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::ResearchReport => "research_report",
            ReportType::ResourceReport => "resource_report",
            ReportType::OutlineReport => "outline_report",
            ReportType::CustomReport => "custom_report",
            ReportType::SubtopicReport => "subtopic_report",
            ReportType::Deep => "deep",
            ReportType::MultiAgents => "multi_agents",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportSource {
    #[default]
    Web,
    Local,
    Hybrid,
    LangchainDocs,
    LangchainVstore,
    Azure,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    #[default]
    Objective,
    Formal,
    Analytical,
    Persuasive,
    Informative,
    Explanatory,
    Descriptive,
    Critical,
    Comparative,
    Speculative,
    Reflective,
    Narrative,
    Humorous,
    Optimistic,
    Pessimistic,
    Simple,
    Casual,
}

impl Tone {
    pub fn describe(&self) -> &'static str {
        match self {
            Tone::Objective => "Objective (impartial and unbiased presentation of facts and findings)",
            Tone::Formal => "Formal (adheres to academic standards with sophisticated language and structure)",
            Tone::Analytical => "Analytical (critical evaluation and detailed examination of data and theories)",
            Tone::Persuasive => "Persuasive (convincing the audience of a particular viewpoint or argument)",
            Tone::Informative => "Informative (providing clear and comprehensive information on a topic)",
            Tone::Explanatory => "Explanatory (clarifying complex concepts and processes)",
            Tone::Descriptive => "Descriptive (detailed depiction of phenomena, experiments, or case studies)",
            Tone::Critical => "Critical (judging the validity and relevance of the research and its conclusions)",
            Tone::Comparative => "Comparative (juxtaposing different theories, data, or methods to highlight differences and similarities)",
            Tone::Speculative => "Speculative (exploring hypotheses and potential implications or future research directions)",
            Tone::Reflective => "Reflective (considering the research process and personal insights or experiences)",
            Tone::Narrative => "Narrative (telling a story to illustrate research findings or methodologies)",
            Tone::Humorous => "Humorous (light-hearted and engaging, usually to make the content more relatable)",
            Tone::Optimistic => "Optimistic (highlighting positive findings and potential benefits)",
            Tone::Pessimistic => "Pessimistic (focusing on limitations, challenges, or negative outcomes)",
            Tone::Simple => "Simple (written for young readers, using basic vocabulary and clear explanations)",
            Tone::Casual => "Casual (conversational and relaxed style for easy, everyday reading)",
        }
    }
}

// ───────────────────────────────────────────────────────────────────────────
// MCP configuration
// ───────────────────────────────────────────────────────────────────────────

/// How often the MCP subsystem runs per task.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum McpStrategy {
    /// Run MCP research once with the original query; share the cached
    /// result vector across all sub-queries.
    #[default]
    Fast,
    /// Run MCP research once per sub-query, no cache reuse.
    Deep,
    /// Never invoke MCP for this task.
    Disabled,
}

impl McpStrategy {
    /// Parse a strategy name, accepting the legacy aliases
    /// `optimized` (→ fast) and `comprehensive` (→ deep).
    /// Unknown values coerce to `fast` with a warning.
    pub fn parse(value: &str) -> McpStrategy {
        match value.trim().to_ascii_lowercase().as_str() {
            "fast" => McpStrategy::Fast,
            "deep" => McpStrategy::Deep,
            "disabled" => McpStrategy::Disabled,
            "optimized" => {
                tracing::warn!("mcp_strategy 'optimized' is deprecated; use 'fast'");
                McpStrategy::Fast
            }
            "comprehensive" => {
                tracing::warn!("mcp_strategy 'comprehensive' is deprecated; use 'deep'");
                McpStrategy::Deep
            }
            other => {
                tracing::warn!("unknown mcp_strategy '{}'; falling back to 'fast'", other);
                McpStrategy::Fast
            }
        }
    }
}

/// Per-server MCP configuration. Transport is inferred from
/// `connection_url` unless `connection_type` pins it explicitly.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct McpServerConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub connection_url: Option<String>,
    #[serde(default)]
    pub connection_type: Option<String>,
    #[serde(default)]
    pub connection_token: Option<String>,
    /// Optional pin of a specific tool on this server.
    #[serde(default)]
    pub tool_name: Option<String>,
}

/// A tool discovered at MCP connect time. Immutable during a task.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    /// Name of the server this tool is bound to.
    pub server: String,
}

// ───────────────────────────────────────────────────────────────────────────
// Research task
// ───────────────────────────────────────────────────────────────────────────

/// Everything the conductor needs to run one research task.
/// Created per request and owned by its conductor until the report returns.
#[derive(Debug, Clone, Default)]
pub struct ResearchTask {
    pub query: String,
    /// Set when this task researches a subtopic of a larger report.
    pub parent_query: Option<String>,
    pub report_type: ReportType,
    pub report_source: ReportSource,
    pub tone: Tone,
    pub language: Option<String>,
    /// Domain allow-list appended to retriever queries.
    pub query_domains: Vec<String>,
    /// Extra headers (also used to pass per-retriever API keys).
    pub headers: HashMap<String, String>,
    /// When set, these URLs are scraped directly instead of searching.
    pub source_urls: Vec<String>,
    /// Complement `source_urls` with a web search.
    pub complement_source_urls: bool,
    /// User-supplied prompt override for custom reports.
    pub custom_prompt: Option<String>,
    pub mcp_configs: Vec<McpServerConfig>,
    /// Explicit per-task strategy; overrides the config value.
    pub mcp_strategy: Option<String>,
    pub verbose: bool,
}

impl ResearchTask {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            verbose: true,
            ..Default::default()
        }
    }
}

/// The final artifacts handed back to the caller.
#[derive(Debug, Serialize, Clone)]
pub struct ResearchOutput {
    pub report: String,
    pub context: String,
    pub visited_urls: Vec<String>,
    pub image_urls: Vec<String>,
    /// Total accumulated LLM spend in USD.
    pub costs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_accepts_legacy_aliases() {
        assert_eq!(McpStrategy::parse("fast"), McpStrategy::Fast);
        assert_eq!(McpStrategy::parse("deep"), McpStrategy::Deep);
        assert_eq!(McpStrategy::parse("disabled"), McpStrategy::Disabled);
        assert_eq!(McpStrategy::parse("optimized"), McpStrategy::Fast);
        assert_eq!(McpStrategy::parse("comprehensive"), McpStrategy::Deep);
    }

    #[test]
    fn strategy_coerces_unknown_to_fast() {
        assert_eq!(McpStrategy::parse("turbo"), McpStrategy::Fast);
        assert_eq!(McpStrategy::parse(""), McpStrategy::Fast);
    }

    #[test]
    fn report_type_names_are_stable() {
        assert_eq!(ReportType::SubtopicReport.as_str(), "subtopic_report");
        assert_eq!(ReportType::ResearchReport.as_str(), "research_report");
    }
}
