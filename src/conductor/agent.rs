//! Agent persona selection.
//!
//! One strategic call classifies the query into a research persona whose
//! role prompt becomes the system message of later LLM calls. Selection
//! never fails hard: the parse ladder ends in a neutral default persona.

use tracing::{info, warn};

use crate::llm::{parse, ChatMessage, ChatRequest, TrackedLlm};
use crate::prompts::PromptFamily;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub server: String,
    pub role: String,
}

impl Persona {
    pub fn default_researcher() -> Persona {
        Persona {
            server: "Default Agent".to_string(),
            role: "You are an AI critical thinker research assistant. Your sole purpose is to \
                   write well written, critically acclaimed, objective and structured reports on \
                   given text."
                .to_string(),
        }
    }
}

pub async fn choose_agent(
    llm: &TrackedLlm,
    smart_model: &str,
    prompts: &dyn PromptFamily,
    query: &str,
    parent_query: Option<&str>,
) -> Persona {
    let task = match parent_query {
        Some(parent) => format!("{parent} - {query}"),
        None => query.to_string(),
    };

    let request = ChatRequest {
        temperature: 0.15,
        ..ChatRequest::new(
            smart_model,
            vec![
                ChatMessage::system(prompts.auto_agent_instructions()),
                ChatMessage::user(format!("task: {task}")),
            ],
        )
    };

    let response = match llm.chat(request).await {
        Ok(response) => response.content,
        Err(e) => {
            warn!("persona selection call failed ({e}); using default persona");
            return Persona::default_researcher();
        }
    };

    match parse_persona(&response) {
        Some(persona) => {
            info!("selected persona '{}'", persona.server);
            persona
        }
        None => {
            info!("no valid JSON in persona response; using default persona");
            Persona::default_researcher()
        }
    }
}

fn parse_persona(response: &str) -> Option<Persona> {
    let value = parse::parse_tolerant(response)?;
    let server = value.get("server")?.as_str()?.trim();
    let role = value.get("agent_role_prompt")?.as_str()?.trim();
    if server.is_empty() || role.is_empty() {
        return None;
    }
    Some(Persona {
        server: server.to_string(),
        role: role.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_persona() {
        let response = r#"{"server": "💰 Finance Agent", "agent_role_prompt": "You are a finance analyst."}"#;
        let persona = parse_persona(response).unwrap();
        assert_eq!(persona.server, "💰 Finance Agent");
    }

    #[test]
    fn parses_persona_wrapped_in_prose() {
        let response = "Sure thing:\n{\"server\": \"A\", \"agent_role_prompt\": \"B\"} hope that helps";
        assert!(parse_persona(response).is_some());
    }

    #[test]
    fn garbage_yields_none() {
        assert!(parse_persona("not-json").is_none());
        assert!(parse_persona(r#"{"server": "A"}"#).is_none());
        assert!(parse_persona(r#"{"server": "", "agent_role_prompt": ""}"#).is_none());
    }
}
