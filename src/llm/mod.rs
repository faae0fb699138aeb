//! LLM provider interface.
//!
//! The engine talks to every provider through [`LlmClient`]; the shipped
//! implementation targets any OpenAI-compatible `/chat/completions`
//! endpoint (OpenAI, Azure, Ollama, LM Studio, vLLM, …) so local and
//! hosted models are interchangeable. Usage reported by providers feeds
//! the shared cost tracker through [`TrackedLlm`].

pub mod parse;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::costs::CostTracker;
use crate::core::errors::LlmError;
use crate::stream::Streamer;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// OpenAI-shaped tool definitions; empty for plain completions.
    pub tools: Vec<Value>,
    pub reasoning_effort: Option<String>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.0,
            ..Default::default()
        }
    }

    /// Collapse system+user messages into one user message. Some providers
    /// reject system prompts; this is the last rung of the fallback ladder.
    pub fn flattened(&self) -> ChatRequest {
        let combined = self
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        ChatRequest {
            messages: vec![ChatMessage::user(combined)],
            ..self.clone()
        }
    }
}

/// A tool call emitted by a tool-bound LLM.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<ChatUsage>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;

    /// Stream tokens into `tokens` as they arrive; resolves with the full
    /// response once the stream ends.
    async fn chat_stream(
        &self,
        request: ChatRequest,
        tokens: mpsc::Sender<String>,
    ) -> Result<ChatResponse, LlmError>;
}

// ───────────────────────────────────────────────────────────────────────────
// OpenAI-compatible implementation
// ───────────────────────────────────────────────────────────────────────────

pub struct OpenAiCompatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn request_body(request: &ChatRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.clone());
        }
        if let Some(effort) = &request.reasoning_effort {
            body["reasoning_effort"] = json!(effort);
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({"include_usage": true});
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self
            .http
            .post(&url)
            .json(body)
            .timeout(Duration::from_secs(180));
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::classify_http(status.as_u16(), body));
        }
        Ok(resp)
    }

    fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
        let Some(calls) = message.get("tool_calls").and_then(Value::as_array) else {
            return Vec::new();
        };
        calls
            .iter()
            .filter_map(|call| {
                let function = call.get("function")?;
                let name = function.get("name")?.as_str()?.to_string();
                let args = match function.get("arguments") {
                    Some(Value::String(raw)) => {
                        parse::parse_tolerant(raw).unwrap_or(Value::Object(Default::default()))
                    }
                    Some(value) => value.clone(),
                    None => Value::Object(Default::default()),
                };
                Some(ToolCall { name, args })
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let body = Self::request_body(&request, false);
        let resp = self.post(&body).await?;
        let payload: Value = resp
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let message = payload
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .ok_or(LlmError::EmptyResponse)?;

        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let tool_calls = Self::parse_tool_calls(message);
        let usage = payload
            .get("usage")
            .and_then(|u| serde_json::from_value::<ChatUsage>(u.clone()).ok());

        Ok(ChatResponse { content, tool_calls, usage })
    }

    async fn chat_stream(
        &self,
        request: ChatRequest,
        tokens: mpsc::Sender<String>,
    ) -> Result<ChatResponse, LlmError> {
        let body = Self::request_body(&request, true);
        let resp = self.post(&body).await?;

        let mut content = String::new();
        let mut usage: Option<ChatUsage> = None;
        let mut buffer = String::new();
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Transport(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // SSE frames are newline-delimited `data: {…}` lines.
            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);

                let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                    continue;
                };
                if data == "[DONE]" {
                    continue;
                }
                let Ok(event) = serde_json::from_str::<Value>(data) else {
                    debug!("unparseable stream frame skipped");
                    continue;
                };
                if let Some(u) = event.get("usage").filter(|u| !u.is_null()) {
                    usage = serde_json::from_value::<ChatUsage>(u.clone()).ok();
                }
                if let Some(delta) = event
                    .get("choices")
                    .and_then(|c| c.get(0))
                    .and_then(|c| c.get("delta"))
                    .and_then(|d| d.get("content"))
                    .and_then(Value::as_str)
                {
                    content.push_str(delta);
                    // A closed sink means the subscriber went away; keep
                    // accumulating so the caller still gets the full text.
                    let _ = tokens.send(delta.to_string()).await;
                }
            }
        }

        if content.is_empty() && usage.is_none() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(ChatResponse {
            content,
            tool_calls: Vec::new(),
            usage,
        })
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Cost-tracked wrapper
// ───────────────────────────────────────────────────────────────────────────

/// Wraps an [`LlmClient`] so every call reports usage into the shared
/// [`CostTracker`] and mirrors the running total to the streamer.
#[derive(Clone)]
pub struct TrackedLlm {
    client: Arc<dyn LlmClient>,
    costs: CostTracker,
    streamer: Streamer,
}

impl TrackedLlm {
    pub fn new(client: Arc<dyn LlmClient>, costs: CostTracker, streamer: Streamer) -> Self {
        Self { client, costs, streamer }
    }

    pub fn costs(&self) -> &CostTracker {
        &self.costs
    }

    async fn record(&self, model: &str, usage: Option<ChatUsage>) {
        if let Some(usage) = usage {
            let snapshot =
                self.costs
                    .on_usage(usage.prompt_tokens, usage.completion_tokens, model);
            self.streamer.cost(snapshot).await;
        }
    }

    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let model = request.model.clone();
        let response = self.client.chat(request).await?;
        self.record(&model, response.usage).await;
        Ok(response)
    }

    pub async fn chat_stream(
        &self,
        request: ChatRequest,
        tokens: mpsc::Sender<String>,
    ) -> Result<ChatResponse, LlmError> {
        let model = request.model.clone();
        let response = self.client.chat_stream(request, tokens).await?;
        self.record(&model, response.usage).await;
        Ok(response)
    }

    /// `chat` with the provider-overflow ladder: on overflow retry with
    /// `retry_max_tokens`, then fall back to `fallback_model`.
    pub async fn chat_with_overflow_fallback(
        &self,
        request: ChatRequest,
        retry_max_tokens: u32,
        fallback_model: &str,
    ) -> Result<ChatResponse, LlmError> {
        match self.chat(request.clone()).await {
            Ok(response) => Ok(response),
            Err(LlmError::Overflow(reason)) => {
                warn!(
                    "provider overflow ({reason}); retrying with max_tokens={retry_max_tokens}"
                );
                let retry = ChatRequest {
                    max_tokens: Some(retry_max_tokens),
                    ..request.clone()
                };
                match self.chat(retry).await {
                    Ok(response) => Ok(response),
                    Err(e) => {
                        warn!("retry failed ({e}); falling back to {fallback_model}");
                        let fallback = ChatRequest {
                            model: fallback_model.to_string(),
                            max_tokens: Some(retry_max_tokens),
                            ..request
                        };
                        self.chat(fallback).await
                    }
                }
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for TrackedLlm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedLlm").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattened_collapses_to_single_user_message() {
        let request = ChatRequest::new(
            "gpt-4o-mini",
            vec![ChatMessage::system("be terse"), ChatMessage::user("hello")],
        );
        let flat = request.flattened();
        assert_eq!(flat.messages.len(), 1);
        assert_eq!(flat.messages[0].role, "user");
        assert!(flat.messages[0].content.contains("be terse"));
        assert!(flat.messages[0].content.contains("hello"));
    }

    #[test]
    fn tool_calls_parse_from_openai_shape() {
        let message = json!({
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": {"name": "search", "arguments": "{\"query\": \"rust\"}"}
            }]
        });
        let calls = OpenAiCompatClient::parse_tool_calls(&message);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].args["query"], "rust");
    }

    #[test]
    fn malformed_tool_arguments_become_empty_object() {
        let message = json!({
            "tool_calls": [{
                "function": {"name": "search", "arguments": "not-json"}
            }]
        });
        let calls = OpenAiCompatClient::parse_tool_calls(&message);
        assert_eq!(calls[0].args, json!({}));
    }
}
