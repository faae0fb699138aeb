//! Report generation.
//!
//! Streams the final LLM calls that turn a research context into a
//! long-form markdown report. Prompt selection follows the report type;
//! tokens are forwarded to the streamer as they arrive; provider failure
//! drops from the system+user message shape to one concatenated user
//! message before giving up.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::conductor::Researcher;
use crate::core::errors::{LlmError, ResearchError};
use crate::core::types::ReportType;
use crate::llm::{parse, ChatMessage, ChatRequest, ChatResponse};

/// Options for `write_report`.
#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    /// Headers already written by sibling sections (subtopic mode).
    pub existing_headers: Vec<String>,
    /// User prompt override.
    pub custom_prompt: Option<String>,
    /// Use this context instead of the one retained by research.
    pub external_context: Option<String>,
}

pub struct ReportGenerator<'a> {
    researcher: &'a Researcher,
}

impl<'a> ReportGenerator<'a> {
    pub fn new(researcher: &'a Researcher) -> Self {
        Self { researcher }
    }

    fn context_for(&self, options: &ReportOptions) -> String {
        options
            .external_context
            .clone()
            .unwrap_or_else(|| self.researcher.context.lock().expect("context poisoned").clone())
    }

    /// Stream a chat call, retrying with a flattened single-message shape
    /// when the provider rejects the system+user form.
    async fn stream_with_shape_fallback(
        &self,
        request: ChatRequest,
    ) -> Result<ChatResponse, LlmError> {
        let (tx, mut rx) = mpsc::channel::<String>(64);
        let streamer = self.researcher.streamer.clone();
        let forward = tokio::spawn(async move {
            while let Some(token) = rx.recv().await {
                streamer.report_token(token).await;
            }
        });

        let result = match self.researcher.llm.chat_stream(request.clone(), tx.clone()).await {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!("report call failed ({e}); retrying with a flattened message shape");
                self.researcher.llm.chat_stream(request.flattened(), tx.clone()).await
            }
        };
        drop(tx);
        let _ = forward.await;
        result
    }

    /// Write the main report. An empty context never reaches the LLM: it
    /// yields an explicit error report instead.
    pub async fn write_report(&self, options: ReportOptions) -> Result<String, ResearchError> {
        let context = self.context_for(&options);
        if context.trim().is_empty() {
            warn!("report requested with an empty context");
            return Ok(format!(
                "# Report could not be generated\n\nNo research context was produced for \
                 \"{}\". Every configured retriever and MCP attempt returned nothing, so \
                 there is no source material to write from.",
                self.researcher.task.query
            ));
        }

        self.researcher.streamer.log(
            "generating_report",
            format!("✍️ Writing report for '{}'...", self.researcher.task.query),
        );

        let task = &self.researcher.task;
        let config = &self.researcher.config;
        let prompt = match task.report_type {
            ReportType::SubtopicReport => self.researcher.prompts.subtopic_report_prompt(
                &task.query,
                task.parent_query.as_deref().unwrap_or(&task.query),
                &options.existing_headers,
                &context,
                config.total_words,
                task.tone,
                &config.language,
            ),
            _ => self.researcher.prompts.report_prompt(
                &task.query,
                &context,
                task.report_type,
                config.total_words,
                task.tone,
                &config.language,
                options
                    .custom_prompt
                    .as_deref()
                    .or(task.custom_prompt.as_deref()),
            ),
        };

        let request = ChatRequest {
            temperature: 0.35,
            max_tokens: Some(config.smart_token_limit),
            ..ChatRequest::new(
                &config.smart_llm.model,
                vec![
                    ChatMessage::system(self.researcher.persona().role),
                    ChatMessage::user(prompt),
                ],
            )
        };

        let response = self
            .stream_with_shape_fallback(request)
            .await
            .map_err(ResearchError::Llm)?;
        info!("report generated ({} chars)", response.content.len());
        Ok(response.content)
    }

    pub async fn write_introduction(&self) -> Result<String, ResearchError> {
        let context = self.context_for(&ReportOptions::default());
        let prompt = self.researcher.prompts.report_introduction_prompt(
            &self.researcher.task.query,
            &context,
            &self.researcher.config.language,
        );
        let request = ChatRequest {
            temperature: 0.25,
            max_tokens: Some(self.researcher.config.smart_token_limit),
            ..ChatRequest::new(
                &self.researcher.config.smart_llm.model,
                vec![
                    ChatMessage::system(self.researcher.persona().role),
                    ChatMessage::user(prompt),
                ],
            )
        };
        let response = self
            .stream_with_shape_fallback(request)
            .await
            .map_err(ResearchError::Llm)?;
        Ok(response.content)
    }

    pub async fn write_conclusion(&self, report_content: &str) -> Result<String, ResearchError> {
        let prompt = self.researcher.prompts.report_conclusion_prompt(
            &self.researcher.task.query,
            report_content,
            &self.researcher.config.language,
        );
        let request = ChatRequest {
            temperature: 0.25,
            max_tokens: Some(self.researcher.config.smart_token_limit),
            ..ChatRequest::new(
                &self.researcher.config.smart_llm.model,
                vec![
                    ChatMessage::system(self.researcher.persona().role),
                    ChatMessage::user(prompt),
                ],
            )
        };
        let response = self
            .stream_with_shape_fallback(request)
            .await
            .map_err(ResearchError::Llm)?;
        Ok(response.content)
    }

    /// Subtopic headers for the detailed-report flow. Parse failures fall
    /// back to an empty list; callers treat that as "no subtopics".
    pub async fn get_subtopics(&self, max_subtopics: usize) -> Vec<String> {
        let context = self.context_for(&ReportOptions::default());
        let prompt = self.researcher.prompts.subtopics_prompt(
            &self.researcher.task.query,
            &context,
            max_subtopics,
        );
        let request = ChatRequest {
            temperature: self.researcher.config.temperature,
            ..ChatRequest::new(
                &self.researcher.config.smart_llm.model,
                vec![ChatMessage::user(prompt)],
            )
        };

        match self.researcher.llm.chat(request).await {
            Ok(response) => parse::parse_string_array(&response.content).unwrap_or_default(),
            Err(e) => {
                warn!("subtopic generation failed: {e}");
                Vec::new()
            }
        }
    }

    /// Draft section titles for a subtopic, returned as the raw markdown
    /// header list the model produced.
    pub async fn get_draft_section_titles(&self, subtopic: &str) -> Result<String, ResearchError> {
        let context = self.context_for(&ReportOptions::default());
        let prompt = self.researcher.prompts.draft_titles_prompt(
            subtopic,
            self.researcher
                .task
                .parent_query
                .as_deref()
                .unwrap_or(&self.researcher.task.query),
            &context,
        );
        let request = ChatRequest {
            temperature: self.researcher.config.temperature,
            max_tokens: Some(self.researcher.config.smart_token_limit),
            ..ChatRequest::new(
                &self.researcher.config.smart_llm.model,
                vec![
                    ChatMessage::system(self.researcher.persona().role),
                    ChatMessage::user(prompt),
                ],
            )
        };
        let response = self
            .stream_with_shape_fallback(request)
            .await
            .map_err(ResearchError::Llm)?;
        Ok(response.content)
    }
}
