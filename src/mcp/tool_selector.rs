//! LLM-driven MCP tool selection.
//!
//! Asks the strategic LLM (temperature 0) to pick up to K tools for the
//! query, parsing its JSON tolerantly. When the model fails (transport,
//! garbage output, or an empty pick) selection falls back to keyword
//! scoring over a fixed set of research verbs, with name matches worth
//! three times a description match.

use serde_json::Value;
use tracing::{info, warn};

use crate::core::types::ToolDescriptor;
use crate::llm::{parse, ChatMessage, ChatRequest, TrackedLlm};
use crate::prompts::PromptFamily;

pub const DEFAULT_MAX_TOOLS: usize = 3;

const RESEARCH_VERBS: &[&str] = &[
    "search", "get", "read", "fetch", "find", "list", "query", "lookup", "retrieve", "browse",
    "view", "show", "describe",
];

pub struct ToolSelector<'a> {
    llm: &'a TrackedLlm,
    strategic_model: &'a str,
    prompts: &'a dyn PromptFamily,
}

impl<'a> ToolSelector<'a> {
    pub fn new(
        llm: &'a TrackedLlm,
        strategic_model: &'a str,
        prompts: &'a dyn PromptFamily,
    ) -> Self {
        Self {
            llm,
            strategic_model,
            prompts,
        }
    }

    pub async fn select_relevant_tools(
        &self,
        query: &str,
        all_tools: Vec<ToolDescriptor>,
        max_tools: usize,
    ) -> Vec<ToolDescriptor> {
        if all_tools.is_empty() {
            return Vec::new();
        }
        let max_tools = max_tools.min(all_tools.len());
        info!(
            "selecting up to {} of {} MCP tools for '{}'",
            max_tools,
            all_tools.len(),
            query
        );

        let prompt = self
            .prompts
            .mcp_tool_selection_prompt(query, &all_tools, max_tools);
        let request = ChatRequest {
            temperature: 0.0,
            ..ChatRequest::new(self.strategic_model, vec![ChatMessage::user(prompt)])
        };

        let response = match self.llm.chat(request).await {
            Ok(response) => response.content,
            Err(e) => {
                warn!("tool-selection LLM call failed ({e}); using keyword fallback");
                return fallback_selection(&all_tools, max_tools);
            }
        };

        match parse_selection(&response, &all_tools, max_tools) {
            Some(selected) if !selected.is_empty() => {
                info!("LLM selected {} tools", selected.len());
                selected
            }
            _ => {
                warn!("LLM tool selection unusable; using keyword fallback");
                fallback_selection(&all_tools, max_tools)
            }
        }
    }
}

fn parse_selection(
    response: &str,
    all_tools: &[ToolDescriptor],
    max_tools: usize,
) -> Option<Vec<ToolDescriptor>> {
    let value = parse::parse_tolerant(response)?;
    let selections = value.get("selected_tools")?.as_array()?;

    let mut selected = Vec::new();
    for selection in selections.iter().take(max_tools) {
        let Some(index) = selection.get("index").and_then(Value::as_u64) else {
            continue;
        };
        let Some(tool) = all_tools.get(index as usize) else {
            continue;
        };
        let score = selection
            .get("relevance_score")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let reason = selection
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("no reason given");
        info!("selected tool '{}' (score {score}): {reason}", tool.name);
        selected.push(tool.clone());
    }

    if let Some(reasoning) = value.get("selection_reasoning").and_then(Value::as_str) {
        info!("selection strategy: {reasoning}");
    }
    Some(selected)
}

/// Keyword fallback: rank tools by research-verb matches, name hits
/// weighted 3×, description hits 1×. Tools scoring zero are dropped.
pub fn fallback_selection(all_tools: &[ToolDescriptor], max_tools: usize) -> Vec<ToolDescriptor> {
    let mut scored: Vec<(&ToolDescriptor, usize)> = all_tools
        .iter()
        .filter_map(|tool| {
            let name = tool.name.to_ascii_lowercase();
            let description = tool.description.to_ascii_lowercase();
            let mut score = 0;
            for verb in RESEARCH_VERBS {
                if name.contains(verb) {
                    score += 3;
                }
                if description.contains(verb) {
                    score += 1;
                }
            }
            (score > 0).then_some((tool, score))
        })
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored
        .into_iter()
        .take(max_tools)
        .map(|(tool, score)| {
            info!("fallback selected '{}' (score {})", tool.name, score);
            tool.clone()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, description: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.into(),
            description: description.into(),
            input_schema: json!({"type": "object"}),
            server: "srv".into(),
        }
    }

    #[test]
    fn fallback_prefers_name_matches() {
        let tools = vec![
            tool("compile_code", "can search docs while compiling"),
            tool("search_web", "general web access"),
            tool("paint", "draws pictures"),
        ];
        let selected = fallback_selection(&tools, 2);
        assert_eq!(selected.len(), 2);
        // name hit (3) beats description hit (1)
        assert_eq!(selected[0].name, "search_web");
        assert_eq!(selected[1].name, "compile_code");
    }

    #[test]
    fn fallback_drops_zero_scores() {
        let tools = vec![tool("paint", "draws pictures")];
        assert!(fallback_selection(&tools, 3).is_empty());
    }

    #[test]
    fn parse_selection_honors_indices_and_bounds() {
        let tools = vec![tool("a", ""), tool("b", ""), tool("c", "")];
        let response = json!({
            "selected_tools": [
                {"index": 2, "name": "c", "relevance_score": 9, "reason": "fits"},
                {"index": 99, "name": "ghost"},
                {"index": 0, "name": "a"}
            ],
            "selection_reasoning": "coverage"
        })
        .to_string();
        let selected = parse_selection(&response, &tools, 3).unwrap();
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].name, "c");
        assert_eq!(selected[1].name, "a");
    }

    #[test]
    fn parse_selection_survives_wrapped_json() {
        let tools = vec![tool("a", "")];
        let response = "Here you go:\n```json\n{\"selected_tools\": [{\"index\": 0}]}\n```";
        let selected = parse_selection(response, &tools, 3).unwrap();
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn parse_selection_rejects_garbage() {
        let tools = vec![tool("a", "")];
        assert!(parse_selection("not-json", &tools, 3).is_none());
    }
}
