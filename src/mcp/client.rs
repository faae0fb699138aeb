//! MCP client lifecycle management.
//!
//! Translates task-level server configs into rmcp transports, connects
//! lazily under a lock, and reuses the connections for the task's
//! lifetime. Closing just releases the references; the transports shut
//! down when the last handle drops.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use rmcp::model::CallToolRequestParam;
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::{
    ConfigureCommandExt, StreamableHttpClientTransport, TokioChildProcess,
};
use rmcp::ServiceExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::errors::McpError;
use crate::core::types::{McpServerConfig, ToolDescriptor};

/// Transport resolved from one server config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpTransport {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    StreamableHttp {
        url: String,
        token: Option<String>,
    },
    /// Recognized per the config contract but not currently connectable:
    /// rmcp ships no websocket client transport. Servers configured this
    /// way are skipped with a warning.
    Websocket { url: String },
}

/// Transport selection: `wss://`/`ws://` → websocket, `https://`/`http://`
/// → streamable HTTP, otherwise (or explicit `connection_type`) → stdio.
pub fn resolve_transport(config: &McpServerConfig) -> Result<McpTransport, McpError> {
    if let Some(url) = config.connection_url.as_deref().filter(|u| !u.is_empty()) {
        if url.starts_with("wss://") || url.starts_with("ws://") {
            return Ok(McpTransport::Websocket { url: url.to_string() });
        }
        if url.starts_with("https://") || url.starts_with("http://") {
            return Ok(McpTransport::StreamableHttp {
                url: url.to_string(),
                token: config.connection_token.clone(),
            });
        }
        // Unrecognized scheme: honor an explicit connection_type, else stdio.
        if let Some(kind) = config.connection_type.as_deref() {
            if matches!(kind, "websocket" | "streamable_http" | "http") {
                return Ok(McpTransport::StreamableHttp {
                    url: url.to_string(),
                    token: config.connection_token.clone(),
                });
            }
        }
    }

    let command = config
        .command
        .clone()
        .ok_or_else(|| McpError::UnsupportedTransport {
            url: config.connection_url.clone().unwrap_or_default(),
            reason: "no connection_url and no stdio command".into(),
        })?;
    Ok(McpTransport::Stdio {
        command,
        args: config.args.clone(),
        env: config.env.clone(),
    })
}

type Connection = (String, Arc<RunningService<RoleClient, ()>>);

pub struct McpClientManager {
    configs: Vec<McpServerConfig>,
    /// Connected once per task, then reused. Guarded so concurrent
    /// sub-queries in deep mode share one connection set.
    connections: Mutex<Option<Arc<Vec<Connection>>>>,
}

impl McpClientManager {
    pub fn new(configs: Vec<McpServerConfig>) -> Self {
        Self {
            configs,
            connections: Mutex::new(None),
        }
    }

    pub fn server_config(&self, name: &str) -> Option<&McpServerConfig> {
        self.configs
            .iter()
            .find(|c| c.name.as_deref() == Some(name))
    }

    /// Tool names pinned by `tool_name` in any server config.
    pub fn pinned_tools(&self) -> Vec<String> {
        self.configs
            .iter()
            .filter_map(|c| c.tool_name.clone())
            .collect()
    }

    async fn get_or_connect(&self) -> Result<Arc<Vec<Connection>>> {
        let mut slot = self.connections.lock().await;
        if let Some(connections) = slot.as_ref() {
            return Ok(Arc::clone(connections));
        }
        if self.configs.is_empty() {
            return Err(McpError::NoServers.into());
        }

        let mut connections: Vec<Connection> = Vec::new();
        for (i, config) in self.configs.iter().enumerate() {
            let name = config
                .name
                .clone()
                .unwrap_or_else(|| format!("mcp_server_{}", i + 1));

            let transport = match resolve_transport(config) {
                Ok(transport) => transport,
                Err(e) => {
                    warn!("skipping MCP server '{}': {}", name, e);
                    continue;
                }
            };

            match Self::connect(&name, transport).await {
                Ok(service) => {
                    info!("connected to MCP server '{}'", name);
                    connections.push((name, Arc::new(service)));
                }
                Err(e) => {
                    // One bad server never blocks the others.
                    warn!("failed to connect MCP server '{}': {:#}", name, e);
                }
            }
        }

        if connections.is_empty() {
            return Err(anyhow!("no MCP server could be connected"));
        }
        let connections = Arc::new(connections);
        *slot = Some(Arc::clone(&connections));
        Ok(connections)
    }

    async fn connect(
        name: &str,
        transport: McpTransport,
    ) -> Result<RunningService<RoleClient, ()>> {
        match transport {
            McpTransport::Stdio { command, args, env } => {
                let child = TokioChildProcess::new(
                    tokio::process::Command::new(&command).configure(|cmd| {
                        for arg in &args {
                            cmd.arg(arg);
                        }
                        for (key, value) in &env {
                            cmd.env(key, value);
                        }
                    }),
                )
                .with_context(|| format!("spawning '{command}' for server '{name}'"))?;
                ().serve(child)
                    .await
                    .with_context(|| format!("stdio handshake with '{name}' failed"))
            }
            McpTransport::StreamableHttp { url, token } => {
                let transport = match token.filter(|t| !t.is_empty()) {
                    Some(token) => {
                        let mut headers = reqwest::header::HeaderMap::new();
                        headers.insert(
                            reqwest::header::AUTHORIZATION,
                            format!("Bearer {token}")
                                .parse()
                                .context("connection_token is not a valid header value")?,
                        );
                        let client = reqwest::Client::builder()
                            .default_headers(headers)
                            .build()
                            .context("building authorized HTTP client")?;
                        StreamableHttpClientTransport::with_client(
                            client,
                            rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig::with_uri(url),
                        )
                    }
                    None => StreamableHttpClientTransport::from_uri(url),
                };
                ().serve(transport)
                    .await
                    .with_context(|| format!("HTTP handshake with '{name}' failed"))
            }
            McpTransport::Websocket { url } => Err(McpError::UnsupportedTransport {
                url,
                reason: "websocket client transport is not available".into(),
            }
            .into()),
        }
    }

    /// Enumerate tools across every connected server.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let connections = self.get_or_connect().await?;
        let mut descriptors = Vec::new();
        for (server, service) in connections.iter() {
            match service.list_tools(Default::default()).await {
                Ok(result) => {
                    for tool in result.tools {
                        descriptors.push(ToolDescriptor {
                            name: tool.name.to_string(),
                            description: tool
                                .description
                                .map(|d| d.to_string())
                                .unwrap_or_default(),
                            input_schema: Value::Object((*tool.input_schema).clone()),
                            server: server.clone(),
                        });
                    }
                }
                Err(e) => {
                    warn!("list_tools on '{}' failed: {:#}", server, e);
                }
            }
        }
        info!("{} MCP tools discovered", descriptors.len());
        Ok(descriptors)
    }

    /// Call a tool on its server and reshape the rmcp result into the
    /// `{structured_content, content}` payload the normalizer consumes.
    pub async fn call_tool(&self, server: &str, tool: &str, args: Value) -> Result<Value> {
        let connections = self.get_or_connect().await?;
        let service = connections
            .iter()
            .find(|(name, _)| name == server)
            .map(|(_, service)| Arc::clone(service))
            .ok_or_else(|| anyhow!("no connection for MCP server '{server}'"))?;

        let arguments = match args {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => Some(
                serde_json::Map::from_iter([("input".to_string(), other)]),
            ),
        };

        let result = service
            .call_tool(CallToolRequestParam {
                name: tool.to_string().into(),
                arguments,
            })
            .await
            .map_err(|e| McpError::ToolCall {
                tool: tool.to_string(),
                source: anyhow!(e),
            })?;

        // rmcp serializes protocol-side camelCase; remap to the payload
        // keys the normalizer understands.
        let raw = serde_json::to_value(&result).context("serializing tool result")?;
        let mut payload = serde_json::Map::new();
        if let Some(structured) = raw
            .get("structuredContent")
            .or_else(|| raw.get("structured_content"))
            .filter(|v| !v.is_null())
        {
            payload.insert("structured_content".to_string(), structured.clone());
        }
        if let Some(content) = raw.get("content").filter(|v| !v.is_null()) {
            payload.insert("content".to_string(), content.clone());
        }
        Ok(Value::Object(payload))
    }

    /// Release the connection set. The underlying transports close when
    /// the final clone drops; no explicit teardown is required.
    pub async fn close(&self) {
        let mut slot = self.connections.lock().await;
        if slot.take().is_some() {
            info!("MCP client references released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: Option<&str>, command: Option<&str>) -> McpServerConfig {
        McpServerConfig {
            connection_url: url.map(str::to_string),
            command: command.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn url_scheme_selects_transport() {
        assert!(matches!(
            resolve_transport(&config(Some("wss://tools.example"), None)).unwrap(),
            McpTransport::Websocket { .. }
        ));
        assert!(matches!(
            resolve_transport(&config(Some("https://tools.example/mcp"), None)).unwrap(),
            McpTransport::StreamableHttp { .. }
        ));
        assert!(matches!(
            resolve_transport(&config(None, Some("npx"))).unwrap(),
            McpTransport::Stdio { .. }
        ));
    }

    #[test]
    fn token_rides_along_for_http() {
        let mut cfg = config(Some("https://tools.example/mcp"), None);
        cfg.connection_token = Some("secret".into());
        match resolve_transport(&cfg).unwrap() {
            McpTransport::StreamableHttp { token, .. } => {
                assert_eq!(token.as_deref(), Some("secret"))
            }
            other => panic!("unexpected transport {other:?}"),
        }
    }

    #[test]
    fn no_url_no_command_is_an_error() {
        assert!(resolve_transport(&config(None, None)).is_err());
    }

    #[tokio::test]
    async fn empty_config_list_cannot_connect() {
        let manager = McpClientManager::new(vec![]);
        assert!(manager.list_tools().await.is_err());
        manager.close().await;
    }
}
