pub mod conductor;
pub mod context;
pub mod core;
pub mod curator;
pub mod documents;
pub mod llm;
pub mod mcp;
pub mod prompts;
pub mod report;
pub mod retrievers;
pub mod scraper;
pub mod stream;

// --- Primary exports ---
pub use conductor::{combine_mcp_and_web_context, Researcher, ResearcherBuilder};
pub use core::config::Config;
pub use core::costs::CostTracker;
pub use core::errors::{LlmError, McpError, ResearchError};
pub use core::types;
pub use core::types::*;
pub use report::ReportOptions;
pub use stream::{StreamEvent, Streamer};
