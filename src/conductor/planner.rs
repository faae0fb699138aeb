//! Sub-query planning.
//!
//! The planner asks the strategic LLM for `max_iterations` search queries
//! as a JSON array. Provider failures walk a ladder (retry with an
//! explicit token cap, then the smart LLM) and parse failures end in
//! `[query]`, so planning always yields at least the original query.

use tracing::{info, warn};

use crate::core::config::Config;
use crate::core::types::{ReportType, SearchHit};
use crate::llm::{parse, ChatMessage, ChatRequest, TrackedLlm};
use crate::prompts::PromptFamily;
use crate::retrievers::is_mcp_retriever;

pub struct PlanInput<'a> {
    pub query: &'a str,
    pub parent_query: Option<&'a str>,
    pub report_type: ReportType,
    /// Seed hits from the primary retriever, for planning context.
    pub search_results: &'a [SearchHit],
    pub retriever_names: &'a [String],
}

pub async fn plan_research_outline(
    llm: &TrackedLlm,
    config: &Config,
    prompts: &dyn PromptFamily,
    input: PlanInput<'_>,
) -> Vec<String> {
    // MCP-only tasks skip fan-out: the tool servers answer the query
    // directly and extra search iterations buy nothing.
    let mcp_only = !input.retriever_names.is_empty()
        && input.retriever_names.iter().all(|name| is_mcp_retriever(name));
    if mcp_only {
        info!("MCP is the only retriever; skipping sub-query generation");
        return vec![input.query.to_string()];
    }

    generate_sub_queries(llm, config, prompts, &input).await
}

async fn generate_sub_queries(
    llm: &TrackedLlm,
    config: &Config,
    prompts: &dyn PromptFamily,
    input: &PlanInput<'_>,
) -> Vec<String> {
    let prompt = prompts.search_queries_prompt(
        input.query,
        input.parent_query,
        input.report_type,
        config.max_iterations.max(1),
        input.search_results,
    );

    let strategic = ChatRequest {
        reasoning_effort: Some(config.reasoning_effort.as_str().to_string()),
        ..ChatRequest::new(
            &config.strategic_llm.model,
            vec![ChatMessage::user(prompt.clone())],
        )
    };

    let response = match llm.chat(strategic.clone()).await {
        Ok(response) => Some(response.content),
        Err(e) => {
            warn!(
                "strategic LLM failed ({e}); retrying with max_tokens={}",
                config.strategic_token_limit
            );
            let retry = ChatRequest {
                max_tokens: Some(config.strategic_token_limit),
                ..strategic
            };
            match llm.chat(retry).await {
                Ok(response) => Some(response.content),
                Err(e) => {
                    warn!("strategic retry failed ({e}); falling back to smart LLM");
                    let smart = ChatRequest {
                        temperature: config.temperature,
                        max_tokens: Some(config.smart_token_limit),
                        ..ChatRequest::new(
                            &config.smart_llm.model,
                            vec![ChatMessage::user(prompt)],
                        )
                    };
                    match llm.chat(smart).await {
                        Ok(response) => Some(response.content),
                        Err(e) => {
                            warn!("smart LLM fallback failed: {e}");
                            None
                        }
                    }
                }
            }
        }
    };

    let planned = response.as_deref().and_then(parse::parse_string_array);
    match planned {
        Some(queries) => {
            info!("planned {} sub-queries", queries.len());
            queries
        }
        None => {
            warn!("planner produced no parseable queries; researching the original query only");
            vec![input.query.to_string()]
        }
    }
}

/// Append the original query (all report types except subtopic reports)
/// and deduplicate by exact string, preserving first occurrence order.
pub fn finalize_sub_queries(
    mut queries: Vec<String>,
    original: &str,
    report_type: ReportType,
) -> Vec<String> {
    if report_type != ReportType::SubtopicReport {
        queries.push(original.to_string());
    }
    let mut seen = std::collections::HashSet::new();
    queries.retain(|q| seen.insert(q.clone()));
    queries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn original_query_appended_and_deduped() {
        let queries = vec!["a".to_string(), "orig".to_string(), "b".to_string()];
        let out = finalize_sub_queries(queries, "orig", ReportType::ResearchReport);
        assert_eq!(out, vec!["a", "orig", "b"]);

        let out = finalize_sub_queries(vec!["a".into()], "orig", ReportType::ResearchReport);
        assert_eq!(out, vec!["a", "orig"]);
    }

    #[test]
    fn subtopic_reports_do_not_append() {
        let out = finalize_sub_queries(vec!["a".into()], "orig", ReportType::SubtopicReport);
        assert_eq!(out, vec!["a"]);
    }
}
