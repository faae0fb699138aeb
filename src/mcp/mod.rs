//! MCP subsystem: tool-serving processes exposed as a higher-order
//! retriever. For a query it enumerates the available tools, has the
//! strategic LLM pick a relevant subset, lets the LLM drive the calls,
//! and normalizes every payload into context entries.

pub mod client;
pub mod research;
pub mod tool_selector;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::core::types::{ContextEntry, McpServerConfig};
use crate::llm::TrackedLlm;
use crate::prompts::PromptFamily;
use crate::stream::Streamer;

use client::McpClientManager;
use research::McpResearchSkill;
use tool_selector::{ToolSelector, DEFAULT_MAX_TOOLS};

/// The conductor's view of MCP research. Behind a trait so the fan-out
/// and strategy semantics are testable without live tool servers.
#[async_trait]
pub trait McpResearch: Send + Sync {
    /// Run MCP research for one query. Soft-fails to an empty vector;
    /// the task always continues on the other sources.
    async fn research(&self, query: &str) -> Vec<ContextEntry>;
}

pub struct McpSubsystem {
    client: McpClientManager,
    llm: TrackedLlm,
    strategic_model: String,
    prompts: Arc<dyn PromptFamily>,
    streamer: Streamer,
    max_tools: usize,
}

impl McpSubsystem {
    pub fn new(
        configs: Vec<McpServerConfig>,
        llm: TrackedLlm,
        strategic_model: String,
        prompts: Arc<dyn PromptFamily>,
        streamer: Streamer,
    ) -> Self {
        Self {
            client: McpClientManager::new(configs),
            llm,
            strategic_model,
            prompts,
            streamer,
            max_tools: DEFAULT_MAX_TOOLS,
        }
    }

    pub fn with_max_tools(mut self, max_tools: usize) -> Self {
        self.max_tools = max_tools.max(1);
        self
    }

    pub async fn close(&self) {
        self.client.close().await;
    }
}

#[async_trait]
impl McpResearch for McpSubsystem {
    async fn research(&self, query: &str) -> Vec<ContextEntry> {
        let all_tools = match self.client.list_tools().await {
            Ok(tools) if !tools.is_empty() => tools,
            Ok(_) => {
                warn!("MCP servers exposed no tools");
                return Vec::new();
            }
            Err(e) => {
                warn!("MCP tool discovery failed: {e:#}");
                return Vec::new();
            }
        };

        self.streamer.log(
            "mcp_tool_selection",
            format!("Selecting MCP tools for: {query}"),
        );

        // Tools pinned via `tool_name` skip selection entirely.
        let pinned = self.client.pinned_tools();
        let selected = if pinned.is_empty() {
            let selector = ToolSelector::new(&self.llm, &self.strategic_model, &*self.prompts);
            selector
                .select_relevant_tools(query, all_tools, self.max_tools)
                .await
        } else {
            let selected: Vec<_> = all_tools
                .into_iter()
                .filter(|tool| pinned.contains(&tool.name))
                .collect();
            info!("{} pinned MCP tools in use", selected.len());
            selected
        };

        if selected.is_empty() {
            warn!("no MCP tools selected for '{query}'");
            return Vec::new();
        }

        let skill =
            McpResearchSkill::new(&self.llm, &self.strategic_model, &*self.prompts, &self.streamer);
        let results = skill
            .conduct_research_with_tools(query, &selected, &self.client)
            .await;

        results
            .into_iter()
            .filter(|result| !result.body.trim().is_empty())
            .map(|result| result.into_context_entry(query))
            .collect()
    }
}
