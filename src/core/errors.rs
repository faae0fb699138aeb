use thiserror::Error;

/// Task-level errors. Almost nothing in the pipeline is fatal to a task:
/// retriever, scraper and MCP failures are classified and skipped at their
/// unit of work. The variants here are the few conditions that surface to
/// the caller.
#[derive(Debug, Error)]
pub enum ResearchError {
    /// Sub-query generation failed after every fallback.
    #[error("research planning failed: {0}")]
    PlanFailed(String),

    /// Every retriever and MCP attempt yielded nothing.
    #[error("no sources found for query '{0}'")]
    NoSources(String),

    /// Report generation was asked to run with an empty context and no
    /// fallback corpus.
    #[error("cannot write a report from an empty context")]
    EmptyContext,

    /// Caller-initiated cancellation before composition started.
    #[error("research task was cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// LLM provider failures, classified so callers can pick a fallback.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Context too long / output token limit. Retried with a larger cap,
    /// then a different model, then a flattened message shape.
    #[error("provider overflow: {0}")]
    Overflow(String),

    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider response missing choices")]
    EmptyResponse,
}

impl LlmError {
    /// Overflow is detected from the provider error body since
    /// OpenAI-compatible backends disagree on status codes for it.
    pub fn classify_http(status: u16, body: String) -> LlmError {
        let lower = body.to_ascii_lowercase();
        if lower.contains("context_length")
            || lower.contains("context length")
            || lower.contains("maximum context")
            || lower.contains("max_tokens")
            || lower.contains("too many tokens")
        {
            LlmError::Overflow(body)
        } else {
            LlmError::Http { status, body }
        }
    }
}

/// MCP subsystem failures. All of these are soft: a failing server or tool
/// is logged and skipped, never aborting the task.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("no MCP server configurations provided")]
    NoServers,

    #[error("unsupported transport for '{url}': {reason}")]
    UnsupportedTransport { url: String, reason: String },

    #[error("failed to connect to MCP server '{server}': {source}")]
    Connect {
        server: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("tool '{tool}' failed: {source}")]
    ToolCall {
        tool: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_detected_from_body() {
        let err = LlmError::classify_http(
            400,
            "This model's maximum context length is 8192 tokens".into(),
        );
        assert!(matches!(err, LlmError::Overflow(_)));

        let err = LlmError::classify_http(429, "rate limit exceeded".into());
        assert!(matches!(err, LlmError::Http { status: 429, .. }));
    }
}
