//! Prompt family strategy.
//!
//! All prompts used by the planner, persona selection, MCP tool selection,
//! source curation and report generation live behind one trait so model
//! families that need different framing (notably document-grounded models)
//! can swap in their own wording. Output shapes are a contract: whatever a
//! family returns must stay parseable by the tolerant JSON parsers.

use std::sync::Arc;

use chrono::Utc;

use crate::core::types::{ReportType, SearchHit, Tone, ToolDescriptor};

pub trait PromptFamily: Send + Sync {
    /// Ask the strategic LLM for exactly `max_iterations` search queries,
    /// returned as a JSON array of strings.
    fn search_queries_prompt(
        &self,
        query: &str,
        parent_query: Option<&str>,
        report_type: ReportType,
        max_iterations: usize,
        context: &[SearchHit],
    ) -> String {
        let task = match (report_type, parent_query) {
            (ReportType::SubtopicReport, Some(parent)) => {
                format!("{parent} - {query}")
            }
            _ => query.to_string(),
        };
        let context_block = if context.is_empty() {
            String::new()
        } else {
            let hits = context
                .iter()
                .take(10)
                .map(|h| format!("- {}: {}", h.title, h.body))
                .collect::<Vec<_>>()
                .join("\n");
            format!("Initial search results for additional context:\n{hits}\n\n")
        };
        format!(
            "Write {max_iterations} google search queries to search online that form an \
             objective opinion from the following task: \"{task}\"\n\n\
             Assume the current date is {date} if required.\n\n\
             {context_block}\
             You must respond with a JSON array of strings only, in the following format: \
             [\"query 1\", \"query 2\", \"query 3\"].\n\
             The response should contain ONLY the array.",
            date = Utc::now().format("%B %d, %Y"),
        )
    }

    /// System instructions for the persona-selection call. The model must
    /// answer with `{"server": …, "agent_role_prompt": …}`.
    fn auto_agent_instructions(&self) -> String {
        r#"This task involves researching a given topic, regardless of its complexity or the availability of a definitive answer. The research is conducted by a specific server, defined by its type and role, with each server requiring distinct instructions.
Agent:
The server is determined by the field of the topic and the specific name of the server that could be utilized to research the topic provided. Agents are categorized by their area of expertise, and each server type is associated with a corresponding emoji.

examples:
task: "should I invest in apple stocks?"
response:
{
    "server": "💰 Finance Agent",
    "agent_role_prompt": "You are a seasoned finance analyst AI assistant. Your primary goal is to compose comprehensive, astute, impartial, and methodically arranged financial reports based on provided data and trends."
}
task: "what are the most interesting sites in Tel Aviv?"
response:
{
    "server": "🌍 Travel Agent",
    "agent_role_prompt": "You are a world-travelled AI tour guide assistant. Your main purpose is to draft engaging, insightful, unbiased, and well-structured travel reports on given locations, including history, attractions, and cultural insights."
}
Respond with JSON only."#
            .to_string()
    }

    /// Main research report prompt, dispatched by report type.
    fn report_prompt(
        &self,
        query: &str,
        context: &str,
        report_type: ReportType,
        total_words: usize,
        tone: Tone,
        language: &str,
        custom_prompt: Option<&str>,
    ) -> String {
        if let Some(custom) = custom_prompt.filter(|p| !p.trim().is_empty()) {
            return format!("{custom}\n\nResearch data:\n\"\"\"\n{context}\n\"\"\"");
        }
        match report_type {
            ReportType::ResourceReport => self.resource_report_prompt(query, context, language),
            ReportType::OutlineReport => self.outline_report_prompt(query, context, language),
            _ => self.research_report_prompt(query, context, total_words, tone, language),
        }
    }

    fn research_report_prompt(
        &self,
        query: &str,
        context: &str,
        total_words: usize,
        tone: Tone,
        language: &str,
    ) -> String {
        format!(
            "Information: \"\"\"{context}\"\"\"\n\n\
             Using the above information, answer the following query or task: \"{query}\" in a \
             detailed report. The report should focus on the answer to the query, should be well \
             structured, informative, in-depth, and comprehensive, with facts and numbers if \
             available and at least {total_words} words.\n\
             You should strive to write the report as long as you can using all relevant and \
             necessary information provided.\n\n\
             Please follow all of the following guidelines in your report:\n\
             - You MUST determine your own concrete and valid opinion based on the given \
               information. Do NOT defer to general and meaningless conclusions.\n\
             - You MUST write the report with markdown syntax and apa format, starting with a \
               top-level header.\n\
             - You MUST cite search results using inline notations such as \
               ([in-text citation](url)) at the end of the sentence or paragraph that \
               references them.\n\
             - Don't forget to add a reference list at the end of the report listing every \
               source url as a markdown hyperlink, without duplicates.\n\
             - You MUST write the report in a {tone} tone.\n\
             - You MUST write the report in the {language} language.\n\
             - Assume the current date is {date}.",
            tone = tone.describe(),
            date = Utc::now().format("%B %d, %Y"),
        )
    }

    fn resource_report_prompt(&self, query: &str, context: &str, language: &str) -> String {
        format!(
            "\"\"\"{context}\"\"\"\n\nBased on the above information, generate a bibliography \
             recommendation report for the following question or topic: \"{query}\". The report \
             should provide a detailed analysis of each recommended resource, explaining how each \
             source can contribute to finding answers to the research question. Focus on the \
             relevance, reliability, and significance of each source. Ensure that the report is \
             well-structured, informative, in-depth, and follows Markdown syntax. Include \
             relevant facts, figures, and numbers whenever available. Write the report in the \
             {language} language."
        )
    }

    fn outline_report_prompt(&self, query: &str, context: &str, language: &str) -> String {
        format!(
            "\"\"\"{context}\"\"\"\n\nUsing the above information, generate an outline for a \
             research report in Markdown syntax for the following question or topic: \"{query}\". \
             The outline should provide a well-structured framework, including main sections, \
             subsections, and key points to be covered. Use appropriate Markdown header syntax \
             and write the outline in the {language} language."
        )
    }

    fn subtopic_report_prompt(
        &self,
        current_subtopic: &str,
        main_topic: &str,
        existing_headers: &[String],
        context: &str,
        total_words: usize,
        tone: Tone,
        language: &str,
    ) -> String {
        let headers = if existing_headers.is_empty() {
            String::new()
        } else {
            format!(
                "Avoid duplicating content already covered under these existing headers:\n{}\n\n",
                existing_headers.join("\n")
            )
        };
        format!(
            "Context: \"\"\"{context}\"\"\"\n\n\
             Construct a detailed report section on the subtopic \"{current_subtopic}\" under the \
             main topic \"{main_topic}\".\n\
             {headers}\
             - The section must be at least {total_words} words, written in markdown starting \
               with a `##` header (never a top-level `#` header), in a {tone} tone and in the \
               {language} language.\n\
             - Cite sources inline as ([in-text citation](url)).\n\
             - Do NOT include a conclusion section or a reference list; those belong to the \
               parent report.",
            tone = tone.describe(),
        )
    }

    fn draft_titles_prompt(&self, current_subtopic: &str, main_topic: &str, context: &str) -> String {
        format!(
            "\"\"\"{context}\"\"\"\n\nUsing the above latest information, generate draft section \
             headers (as a markdown list of `### ` headers) for a report section on \
             \"{current_subtopic}\" under the main topic \"{main_topic}\". Keep them short, \
             relevant, and non-overlapping."
        )
    }

    fn report_introduction_prompt(&self, question: &str, research_summary: &str, language: &str) -> String {
        format!(
            "{research_summary}\n\nUsing the above latest information, prepare a detailed report \
             introduction on the topic -- {question}.\n\
             - The introduction should be succinct, well-structured, informative with markdown \
               syntax.\n\
             - As this introduction will be part of a larger report, do NOT include any other \
               sections.\n\
             - The introduction should be preceded by an H1 heading with a suitable topic for \
               the entire report.\n\
             - You must write the introduction in the {language} language.\n\
             - Assume the current date is {date}.",
            date = Utc::now().format("%B %d, %Y"),
        )
    }

    fn report_conclusion_prompt(&self, query: &str, report_content: &str, language: &str) -> String {
        format!(
            "Based on the research report below and research task, please write a concise \
             conclusion that summarizes the main findings and their implications:\n\n\
             Research task: {query}\n\nResearch report: {report_content}\n\n\
             Your conclusion should:\n\
             1. Recap the main points of the research.\n\
             2. Highlight the most important findings.\n\
             3. Discuss any implications or next steps.\n\
             4. Be around 2-3 paragraphs long.\n\
             If there is no \"## Conclusion\" section title written at the end of the report, \
             please add it at the top of your conclusion. You must write the conclusion in the \
             {language} language."
        )
    }

    fn subtopics_prompt(&self, task: &str, data: &str, max_subtopics: usize) -> String {
        format!(
            "Provided the main topic:\n\n{task}\n\nand research data:\n\n{data}\n\n\
             - Construct a list of at most {max_subtopics} subtopics which indicate the headers \
               of a report document to be generated on the task.\n\
             - These are a possible list of subtopics; use your best judgement and limit to the \
               most relevant ones.\n\
             - Respond ONLY with a JSON array of strings: [\"subtopic 1\", \"subtopic 2\"]."
        )
    }

    /// Curation prompt: the model must return JSON in the exact shape the
    /// sources were given in, keeping at most `max_results` of them with
    /// their content preserved, not rewritten.
    fn curate_sources_prompt(&self, query: &str, sources_json: &str, max_results: usize) -> String {
        format!(
            "Your goal is to evaluate and curate the provided scraped content for the research \
             task: \"{query}\" while prioritizing the inclusion of relevant and high-quality \
             information, especially sources containing statistics, numbers, or concrete data.\n\n\
             The final curated list will be used as context for creating a research report, so \
             prioritize:\n\
             - Retaining as much original information as possible, with extra emphasis on \
               sources featuring quantitative data or unique insights.\n\
             - Keeping a wide range of perspectives and insights.\n\
             - Filtering out only clearly irrelevant or unusable content.\n\n\
             EVALUATION GUIDELINES:\n\
             1. Assess each source based on relevance, credibility and currency.\n\
             2. Keep the source's \"raw_text\" EXACTLY as is — do not rewrite, summarize or \
                shorten it.\n\
             3. Select up to {max_results} of the best sources.\n\n\
             SOURCES LIST:\n{sources_json}\n\n\
             You MUST return your response in the EXACT sources JSON list format as the original \
             sources list. The response MUST not contain any markdown format or additional text \
             (like ```json), just the JSON list."
        )
    }

    /// MCP tool selection: respond with
    /// `{"selected_tools": [{"index", "name", "relevance_score", "reason"}],
    ///   "selection_reasoning": …}`.
    fn mcp_tool_selection_prompt(
        &self,
        query: &str,
        tools: &[ToolDescriptor],
        max_tools: usize,
    ) -> String {
        let tool_lines = tools
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let description = if t.description.is_empty() {
                    "No description available"
                } else {
                    t.description.as_str()
                };
                format!("{i}. {}: {description}", t.name)
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "You are a research assistant selecting the best tools for a query.\n\n\
             Research query: \"{query}\"\n\nAvailable tools:\n{tool_lines}\n\n\
             Select the {max_tools} most relevant tools for researching this query. Consider \
             what information each tool can retrieve and how directly it addresses the query.\n\n\
             Respond with ONLY a JSON object in this exact format:\n\
             {{\n  \"selected_tools\": [\n    {{\"index\": 0, \"name\": \"tool name\", \
             \"relevance_score\": 9, \"reason\": \"why this tool fits\"}}\n  ],\n  \
             \"selection_reasoning\": \"overall selection strategy\"\n}}"
        )
    }

    /// One user prompt handed to the tool-bound LLM to drive MCP research.
    fn mcp_research_prompt(&self, query: &str, tools: &[ToolDescriptor]) -> String {
        let names = tools
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "You are a research assistant with access to these tools: {names}.\n\n\
             Research this query thoroughly: \"{query}\"\n\n\
             Use the tools to gather relevant, up-to-date information. Call each tool with \
             focused arguments derived from the query. After gathering information, provide a \
             concise synthesis of what you found, including key facts and figures."
        )
    }

    /// Join a local-documents context with a web context (documents first).
    fn join_local_web_documents(&self, docs_context: &str, web_context: &str) -> String {
        format!(
            "Context from local documents: {docs_context}\n\n\
             Context from web sources: {web_context}"
        )
    }
}

/// The stock prompt family, suitable for most chat models.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPrompts;

impl PromptFamily for DefaultPrompts {}

/// Family for document-grounded Granite models, which expect their
/// document context wrapped in explicit document markers.
#[derive(Debug, Default, Clone, Copy)]
pub struct GranitePrompts;

impl PromptFamily for GranitePrompts {
    fn join_local_web_documents(&self, docs_context: &str, web_context: &str) -> String {
        format!(
            "<|start_of_role|>documents<|end_of_role|>\n\
             Document 1 (local)\n{docs_context}\n\n\
             Document 2 (web)\n{web_context}\n\
             <|end_of_text|>"
        )
    }
}

/// Pick a family based on the configured smart model identifier.
pub fn family_for_model(smart_model: &str) -> Arc<dyn PromptFamily> {
    if smart_model.to_ascii_lowercase().contains("granite") {
        Arc::new(GranitePrompts)
    } else {
        Arc::new(DefaultPrompts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_selection_by_model_id() {
        let family = family_for_model("ibm/granite-3.3-8b-instruct");
        assert!(family.join_local_web_documents("a", "b").contains("documents"));

        let family = family_for_model("gpt-4.1");
        let joined = family.join_local_web_documents("docs", "web");
        assert!(joined.starts_with("Context from local documents"));
    }

    #[test]
    fn search_queries_prompt_pins_count_and_shape() {
        let prompt = DefaultPrompts.search_queries_prompt(
            "rust async runtimes",
            None,
            ReportType::ResearchReport,
            3,
            &[],
        );
        assert!(prompt.contains("Write 3 google search queries"));
        assert!(prompt.contains("JSON array"));
    }

    #[test]
    fn subtopic_task_includes_parent() {
        let prompt = DefaultPrompts.search_queries_prompt(
            "tokio",
            Some("rust async"),
            ReportType::SubtopicReport,
            2,
            &[],
        );
        assert!(prompt.contains("rust async - tokio"));
    }

    #[test]
    fn custom_prompt_short_circuits_report_dispatch() {
        let prompt = DefaultPrompts.report_prompt(
            "q",
            "ctx",
            ReportType::ResearchReport,
            1000,
            Tone::Objective,
            "english",
            Some("Summarize in one paragraph"),
        );
        assert!(prompt.starts_with("Summarize in one paragraph"));
        assert!(prompt.contains("ctx"));
    }
}
