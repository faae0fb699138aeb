//! Tool-driven MCP research and result normalization.
//!
//! Binds the selected tools to the strategic LLM, lets it drive the tool
//! calls, and folds every payload into retriever-shaped records. The
//! LLM's own synthesis is captured as a final record under
//! `mcp://llm_analysis`.

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::core::types::{ContextEntry, SourceKind, ToolDescriptor};
use crate::llm::{ChatMessage, ChatRequest, TrackedLlm};
use crate::prompts::PromptFamily;
use crate::stream::{Streamer, ToolStage};

use super::client::McpClientManager;

pub const LLM_ANALYSIS_URL: &str = "mcp://llm_analysis";

/// Retriever-shaped record every tool payload is folded into.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NormalizedResult {
    pub title: String,
    pub href: String,
    pub body: String,
}

impl NormalizedResult {
    pub fn into_context_entry(self, origin_query: &str) -> ContextEntry {
        ContextEntry {
            content: self.body,
            url: self.href,
            title: self.title,
            origin_query: origin_query.to_string(),
            kind: SourceKind::Mcp,
        }
    }
}

pub struct McpResearchSkill<'a> {
    llm: &'a TrackedLlm,
    strategic_model: &'a str,
    prompts: &'a dyn PromptFamily,
    streamer: &'a Streamer,
}

impl<'a> McpResearchSkill<'a> {
    pub fn new(
        llm: &'a TrackedLlm,
        strategic_model: &'a str,
        prompts: &'a dyn PromptFamily,
        streamer: &'a Streamer,
    ) -> Self {
        Self {
            llm,
            strategic_model,
            prompts,
            streamer,
        }
    }

    /// Run one round of tool-driven research for `query`.
    pub async fn conduct_research_with_tools(
        &self,
        query: &str,
        selected_tools: &[ToolDescriptor],
        client: &McpClientManager,
    ) -> Vec<NormalizedResult> {
        if selected_tools.is_empty() {
            warn!("no tools available for MCP research");
            return Vec::new();
        }
        info!("researching with {} bound tools", selected_tools.len());

        let tool_defs: Vec<Value> = selected_tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.input_schema,
                    }
                })
            })
            .collect();

        let request = ChatRequest {
            tools: tool_defs,
            ..ChatRequest::new(
                self.strategic_model,
                vec![ChatMessage::user(
                    self.prompts.mcp_research_prompt(query, selected_tools),
                )],
            )
        };

        let response = match self.llm.chat(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("tool-bound LLM call failed: {e}");
                return Vec::new();
            }
        };

        let mut results: Vec<NormalizedResult> = Vec::new();
        let total = response.tool_calls.len();
        info!("LLM requested {} tool calls", total);

        for (i, call) in response.tool_calls.iter().enumerate() {
            let Some(tool) = selected_tools.iter().find(|t| t.name == call.name) else {
                warn!("tool '{}' not among the selected tools; skipping", call.name);
                continue;
            };
            info!("executing tool {}/{}: {}", i + 1, total, call.name);
            self.streamer.tool(&call.name, ToolStage::Start, None);

            match client
                .call_tool(&tool.server, &tool.name, call.args.clone())
                .await
            {
                Ok(payload) => {
                    let normalized = normalize_tool_result(&call.name, &payload);
                    info!(
                        "tool '{}' yielded {} formatted results",
                        call.name,
                        normalized.len()
                    );
                    self.streamer.tool(
                        &call.name,
                        ToolStage::Complete,
                        Some(json!({"results": normalized.len()})),
                    );
                    results.extend(normalized);
                }
                Err(e) => {
                    // A failed invocation never stops the remaining tools.
                    warn!("tool '{}' failed: {:#}", call.name, e);
                    self.streamer.tool(
                        &call.name,
                        ToolStage::Complete,
                        Some(json!({"error": e.to_string()})),
                    );
                }
            }
        }

        if !response.content.trim().is_empty() {
            results.push(NormalizedResult {
                title: format!("LLM analysis: {query}"),
                href: LLM_ANALYSIS_URL.to_string(),
                body: response.content,
            });
        }

        info!("MCP research complete: {} results", results.len());
        results
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Result normalization
// ───────────────────────────────────────────────────────────────────────────

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn field<'v>(map: &'v Value, keys: &[&str]) -> Option<&'v Value> {
    keys.iter().find_map(|key| map.get(*key))
}

/// Fold an arbitrary tool payload into retriever-shaped records.
///
/// Rules, in order:
/// 1. A mapping carrying `structured_content`/`content` is an MCP result
///    wrapper: prefer `structured_content` (a `results` list becomes one
///    record per item, any other mapping one record), else fold `content`
///    parts into a single synthetic record.
/// 2. A list becomes one record per item.
/// 3. Any other mapping becomes a single record with field fallbacks.
/// 4. Everything else is stringified into one record.
///
/// Running the normalizer over one of its own outputs is a no-op.
pub fn normalize_tool_result(tool_name: &str, result: &Value) -> Vec<NormalizedResult> {
    // 1) MCP wrapper with structured_content / content.
    if result.is_object()
        && (result.get("structured_content").is_some() || result.get("content").is_some())
    {
        let mut results = Vec::new();

        if let Some(structured) = result.get("structured_content").filter(|v| v.is_object()) {
            match structured.get("results").and_then(Value::as_array) {
                Some(items) => {
                    for (i, item) in items.iter().enumerate() {
                        if let Some(map) = item.as_object() {
                            let map = Value::Object(map.clone());
                            results.push(NormalizedResult {
                                title: field(&map, &["title"])
                                    .map(value_to_text)
                                    .unwrap_or_else(|| {
                                        format!("Result from {tool_name} #{}", i + 1)
                                    }),
                                href: field(&map, &["href", "url"])
                                    .map(value_to_text)
                                    .unwrap_or_else(|| format!("mcp://{tool_name}/{i}")),
                                body: field(&map, &["body", "content"])
                                    .map(value_to_text)
                                    .unwrap_or_else(|| value_to_text(&map)),
                            });
                        }
                    }
                }
                None => {
                    results.push(NormalizedResult {
                        title: field(structured, &["title"])
                            .map(value_to_text)
                            .unwrap_or_else(|| format!("Result from {tool_name}")),
                        href: field(structured, &["href", "url"])
                            .map(value_to_text)
                            .unwrap_or_else(|| format!("mcp://{tool_name}")),
                        body: field(structured, &["body", "content"])
                            .map(value_to_text)
                            .unwrap_or_else(|| value_to_text(structured)),
                    });
                }
            }
        }

        // Fold `content` only when structured_content yielded nothing.
        if results.is_empty() {
            let body = match result.get("content") {
                Some(Value::Array(parts)) => parts
                    .iter()
                    .map(|part| match part {
                        Value::Object(map) => map
                            .get("text")
                            .map(value_to_text)
                            .unwrap_or_else(|| value_to_text(part)),
                        other => value_to_text(other),
                    })
                    .filter(|text| !text.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n\n"),
                Some(Value::String(text)) => text.clone(),
                _ => value_to_text(result),
            };
            results.push(NormalizedResult {
                title: format!("Result from {tool_name}"),
                href: format!("mcp://{tool_name}"),
                body,
            });
        }
        return results;
    }

    // 2) Plain list: one record per item.
    if let Some(items) = result.as_array() {
        return items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let has_direct_fields = item.get("title").is_some()
                    && (item.get("content").is_some() || item.get("body").is_some());
                if has_direct_fields {
                    NormalizedResult {
                        title: field(item, &["title"]).map(value_to_text).unwrap_or_default(),
                        href: field(item, &["href", "url"])
                            .map(value_to_text)
                            .unwrap_or_else(|| format!("mcp://{tool_name}/{i}")),
                        body: field(item, &["body", "content"])
                            .map(value_to_text)
                            .unwrap_or_else(|| value_to_text(item)),
                    }
                } else {
                    NormalizedResult {
                        title: format!("Result from {tool_name}"),
                        href: format!("mcp://{tool_name}/{i}"),
                        body: value_to_text(item),
                    }
                }
            })
            .collect();
    }

    // 3) Any other mapping: single record.
    if result.is_object() {
        return vec![NormalizedResult {
            title: field(result, &["title"])
                .map(value_to_text)
                .unwrap_or_else(|| format!("Result from {tool_name}")),
            href: field(result, &["href", "url"])
                .map(value_to_text)
                .unwrap_or_else(|| format!("mcp://{tool_name}")),
            body: field(result, &["body", "content"])
                .map(value_to_text)
                .unwrap_or_else(|| value_to_text(result)),
        }];
    }

    // 4) Stringify.
    vec![NormalizedResult {
        title: format!("Result from {tool_name}"),
        href: format!("mcp://{tool_name}"),
        body: value_to_text(result),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapper_with_structured_results_list() {
        let payload = json!({
            "structured_content": {
                "results": [
                    {"title": "Doc A", "url": "https://a", "content": "alpha"},
                    {"body": "beta"}
                ]
            },
            "content": [{"type": "text", "text": "ignored when structured wins"}]
        });
        let results = normalize_tool_result("lookup", &payload);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Doc A");
        assert_eq!(results[0].href, "https://a");
        assert_eq!(results[0].body, "alpha");
        assert_eq!(results[1].title, "Result from lookup #2");
        assert_eq!(results[1].href, "mcp://lookup/1");
        assert_eq!(results[1].body, "beta");
    }

    #[test]
    fn wrapper_with_structured_single_mapping() {
        let payload = json!({
            "structured_content": {"title": "One", "href": "https://one", "body": "b"}
        });
        let results = normalize_tool_result("lookup", &payload);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].href, "https://one");
    }

    #[test]
    fn wrapper_folds_content_parts() {
        let payload = json!({
            "content": [
                {"type": "text", "text": "part one"},
                {"type": "text", "text": "part two"},
                "bare string"
            ]
        });
        let results = normalize_tool_result("search", &payload);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Result from search");
        assert_eq!(results[0].href, "mcp://search");
        assert_eq!(results[0].body, "part one\n\npart two\n\nbare string");
    }

    #[test]
    fn wrapper_with_string_content() {
        let payload = json!({"content": "plain answer"});
        let results = normalize_tool_result("search", &payload);
        assert_eq!(results[0].body, "plain answer");
    }

    #[test]
    fn list_items_with_and_without_fields() {
        let payload = json!([
            {"title": "T", "content": "c", "href": "https://t"},
            {"random": 1}
        ]);
        let results = normalize_tool_result("tool", &payload);
        assert_eq!(results[0].title, "T");
        assert_eq!(results[0].body, "c");
        assert_eq!(results[1].title, "Result from tool");
        assert_eq!(results[1].href, "mcp://tool/1");
        assert_eq!(results[1].body, "{\"random\":1}");
    }

    #[test]
    fn bare_mapping_and_scalar() {
        let results = normalize_tool_result("tool", &json!({"title": "x", "body": "y"}));
        assert_eq!(results[0].title, "x");

        let results = normalize_tool_result("tool", &json!(42));
        assert_eq!(results[0].body, "42");
        assert_eq!(results[0].href, "mcp://tool");
    }

    #[test]
    fn normalizer_is_idempotent() {
        let payload = json!({
            "structured_content": {
                "results": [{"title": "Doc", "url": "https://doc", "content": "text"}]
            }
        });
        let first = normalize_tool_result("tool", &payload);
        let reinput = serde_json::to_value(&first[0]).unwrap();
        let second = normalize_tool_result("tool", &reinput);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0], first[0]);
    }
}
