//! Transport seam between the engine and remote tool servers.
//!
//! [`Connector`] opens a [`ToolSession`] for a [`TransportTarget`]. The
//! production connector speaks MCP through rmcp over stdio, SSE or
//! streamable HTTP. Endpoint resolution is kept as pure functions so it can
//! be tested without a network.

use std::{borrow::Cow, collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use rmcp::{
    model::{CallToolRequestParam, CallToolResult},
    service::RunningService,
    transport::{
        sse_client::SseClientConfig, streamable_http_client::StreamableHttpClientTransportConfig,
        ConfigureCommandExt, SseClientTransport, StreamableHttpClientTransport, TokioChildProcess,
    },
    RoleClient, ServiceExt,
};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{
    config::{CustomType, McpTransport, ProfileConfig, Provider, ProxyConfig, ServerConfig, Tool},
    proxy::apply_proxy_to_builder,
};
use crate::{
    error::{McpError, McpResult},
    inventory::CustomToolInfo,
};

pub const EXTERNAL_USER_ID_HEADER: &str = "X-External-User-Id";

/// Type alias for MCP client
type McpClient = RunningService<RoleClient, ()>;

/// A live protocol session with one remote server.
#[async_trait]
pub trait ToolSession: Send + Sync {
    async fn list_tools(&self) -> McpResult<Vec<Tool>>;

    async fn call_tool(&self, request: CallToolRequestParam) -> McpResult<CallToolResult>;

    /// Close the session. Calling it twice is a no-op.
    async fn close(&self) -> McpResult<()>;
}

/// Opens sessions. Opening includes the protocol handshake.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, target: &TransportTarget) -> McpResult<Arc<dyn ToolSession>>;
}

/// Fully resolved endpoint: nothing left to look up before connecting.
#[derive(Debug, Clone)]
pub struct TransportTarget {
    /// Connection or custom tool label, used in logs.
    pub name: String,
    pub transport: McpTransport,
}

impl TransportTarget {
    pub fn new(name: impl Into<String>, transport: McpTransport) -> Self {
        Self {
            name: name.into(),
            transport,
        }
    }

    /// Add a request header. Stdio targets ignore headers.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self.transport {
            McpTransport::Sse { headers, .. } | McpTransport::Streamable { headers, .. } => {
                headers.insert(name.into(), value.into());
            }
            McpTransport::Stdio { .. } => {}
        }
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        match &self.transport {
            McpTransport::Sse { headers, .. } | McpTransport::Streamable { headers, .. } => {
                headers.get(name).map(String::as_str)
            }
            McpTransport::Stdio { .. } => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match &self.transport {
            McpTransport::Sse { url, .. } | McpTransport::Streamable { url, .. } => {
                Some(url.as_str())
            }
            McpTransport::Stdio { .. } => None,
        }
    }
}

// ============================================================================
// Endpoint resolution
// ============================================================================

/// Resolve the endpoint of a standard connection.
///
/// `profile` must be supplied for the composio provider and is ignored
/// otherwise.
pub fn server_target(
    server: &ServerConfig,
    profile: Option<&ProfileConfig>,
) -> McpResult<TransportTarget> {
    let transport = match (server.provider, &server.transport) {
        (Provider::Composio, transport) => {
            let profile = profile.ok_or_else(|| {
                McpError::Provider(format!(
                    "server '{}': profile not resolved for composio provider",
                    server.name
                ))
            })?;
            broker_transport(transport, profile)
        }
        (_, transport) => transport.clone(),
    };

    let target = TransportTarget::new(server.name.clone(), transport);
    ensure_endpoint(&target)?;

    Ok(match &server.external_user_id {
        Some(user) => target.with_header(EXTERNAL_USER_ID_HEADER, user.clone()),
        None => target,
    })
}

/// Resolve the endpoint of a custom tool from its registration.
pub fn custom_target(
    info: &CustomToolInfo,
    profile: Option<&ProfileConfig>,
) -> McpResult<TransportTarget> {
    let cfg = &info.custom_config;
    let label = info.key();

    let transport = match info.custom_type {
        CustomType::Sse => McpTransport::Sse {
            url: cfg.url.clone().unwrap_or_default(),
            token: None,
            headers: cfg.headers.clone(),
        },
        CustomType::Http => McpTransport::Streamable {
            url: cfg.url.clone().unwrap_or_default(),
            token: None,
            headers: cfg.headers.clone(),
        },
        CustomType::Json => McpTransport::Stdio {
            command: cfg.command.clone().unwrap_or_default(),
            args: cfg.args.clone(),
            envs: cfg.env.clone(),
        },
        CustomType::Composio => {
            let profile = profile.ok_or_else(|| {
                McpError::Provider(format!("custom tool '{label}': profile not resolved"))
            })?;
            let mut headers = cfg.headers.clone();
            headers.extend(profile.headers.clone());
            McpTransport::Streamable {
                url: profile.url.clone(),
                token: None,
                headers,
            }
        }
    };

    let target = TransportTarget::new(label, transport);
    ensure_endpoint(&target)?;

    Ok(match &cfg.external_user_id {
        Some(user) => target.with_header(EXTERNAL_USER_ID_HEADER, user.clone()),
        None => target,
    })
}

/// Broker connections take their URL from the profile; headers are merged
/// with profile headers winning. SSE stays SSE, everything else is streamable.
fn broker_transport(configured: &McpTransport, profile: &ProfileConfig) -> McpTransport {
    let (token, mut headers) = match configured {
        McpTransport::Sse { token, headers, .. } | McpTransport::Streamable { token, headers, .. } => {
            (token.clone(), headers.clone())
        }
        McpTransport::Stdio { .. } => (None, HashMap::new()),
    };
    headers.extend(profile.headers.clone());

    match configured {
        McpTransport::Sse { .. } => McpTransport::Sse {
            url: profile.url.clone(),
            token,
            headers,
        },
        _ => McpTransport::Streamable {
            url: profile.url.clone(),
            token,
            headers,
        },
    }
}

fn ensure_endpoint(target: &TransportTarget) -> McpResult<()> {
    match &target.transport {
        McpTransport::Stdio { command, .. } if command.trim().is_empty() => Err(
            McpError::Provider(format!("'{}': missing command", target.name)),
        ),
        McpTransport::Sse { url, .. } | McpTransport::Streamable { url, .. }
            if url.trim().is_empty() =>
        {
            Err(McpError::Provider(format!("'{}': missing url", target.name)))
        }
        _ => Ok(()),
    }
}

// ============================================================================
// rmcp-backed connector
// ============================================================================

/// Build request headers from an optional bearer token and custom headers.
fn build_request_headers(
    token: &Option<String>,
    custom_headers: &HashMap<String, String>,
) -> McpResult<reqwest::header::HeaderMap> {
    let mut headers = reqwest::header::HeaderMap::new();

    if let Some(tok) = token {
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {}", tok)
                .parse()
                .map_err(|e| McpError::Config(format!("auth token: {}", e)))?,
        );
    }

    for (key, value) in custom_headers {
        headers.insert(
            reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| McpError::Config(format!("header name: {}", e)))?,
            value
                .parse()
                .map_err(|e| McpError::Config(format!("header value: {}", e)))?,
        );
    }

    Ok(headers)
}

/// Build HTTP client with proxy and default headers.
fn build_http_client(
    token: &Option<String>,
    custom_headers: &HashMap<String, String>,
    proxy: Option<&ProxyConfig>,
) -> McpResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(10));

    if let Some(proxy_cfg) = proxy {
        builder = apply_proxy_to_builder(builder, proxy_cfg)?;
    }

    let req_headers = build_request_headers(token, custom_headers)?;
    if !req_headers.is_empty() {
        builder = builder.default_headers(req_headers);
    }

    builder
        .build()
        .map_err(|e| McpError::Connection(format!("build HTTP client: {}", e)))
}

/// Production connector backed by rmcp client transports.
#[derive(Debug, Default, Clone)]
pub struct RmcpConnector {
    proxy: Option<ProxyConfig>,
}

impl RmcpConnector {
    pub fn new(proxy: Option<ProxyConfig>) -> Self {
        Self { proxy }
    }
}

#[async_trait]
impl Connector for RmcpConnector {
    async fn open(&self, target: &TransportTarget) -> McpResult<Arc<dyn ToolSession>> {
        debug!(target = %target.name, transport = ?target.transport, "Opening MCP session");

        let client = match &target.transport {
            McpTransport::Stdio {
                command,
                args,
                envs,
            } => {
                let transport = TokioChildProcess::new(
                    tokio::process::Command::new(command).configure(|cmd| {
                        cmd.args(args)
                            .envs(envs.iter())
                            .stderr(std::process::Stdio::inherit());
                    }),
                )
                .map_err(|e| McpError::Connection(format!("create stdio transport: {}", e)))?;

                ().serve(transport).await.map_err(|e| {
                    McpError::Connection(format!("initialize stdio client: {}", e))
                })?
            }

            McpTransport::Sse {
                url,
                token,
                headers,
            } => {
                let http_client = build_http_client(token, headers, self.proxy.as_ref())?;
                let sse_config = SseClientConfig {
                    sse_endpoint: url.clone().into(),
                    ..Default::default()
                };

                let transport = SseClientTransport::start_with_client(http_client, sse_config)
                    .await
                    .map_err(|e| McpError::Connection(format!("create SSE transport: {}", e)))?;

                ().serve(transport)
                    .await
                    .map_err(|e| McpError::Connection(format!("initialize SSE client: {}", e)))?
            }

            McpTransport::Streamable {
                url,
                token,
                headers,
            } => {
                let http_client = build_http_client(token, headers, self.proxy.as_ref())?;
                let cfg = StreamableHttpClientTransportConfig::with_uri(url.as_str());
                let transport = StreamableHttpClientTransport::with_client(http_client, cfg);

                ().serve(transport).await.map_err(|e| {
                    McpError::Connection(format!("initialize streamable client: {}", e))
                })?
            }
        };

        info!(target = %target.name, "MCP session established");
        Ok(Arc::new(RmcpSession {
            client: RwLock::new(Some(client)),
        }))
    }
}

/// rmcp client wrapped so calls share it and `close` can take it.
struct RmcpSession {
    client: RwLock<Option<McpClient>>,
}

#[async_trait]
impl ToolSession for RmcpSession {
    async fn list_tools(&self) -> McpResult<Vec<Tool>> {
        let guard = self.client.read().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| McpError::ToolExecution("session not established".to_string()))?;
        client
            .peer()
            .list_all_tools()
            .await
            .map_err(|e| McpError::Connection(format!("list tools: {}", e)))
    }

    async fn call_tool(&self, request: CallToolRequestParam) -> McpResult<CallToolResult> {
        let guard = self.client.read().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| McpError::ToolExecution("session not established".to_string()))?;
        client
            .call_tool(request)
            .await
            .map_err(|e| McpError::ToolExecution(format!("Failed to call tool: {}", e)))
    }

    async fn close(&self) -> McpResult<()> {
        let client = self.client.write().await.take();
        if let Some(client) = client {
            client
                .cancel()
                .await
                .map_err(|e| McpError::Connection(format!("close session: {}", e)))?;
        }
        Ok(())
    }
}

/// Build the protocol request for a tool call.
pub fn call_request(tool_name: &str, arguments: Map<String, Value>) -> CallToolRequestParam {
    CallToolRequestParam {
        name: Cow::Owned(tool_name.to_string()),
        arguments: Some(arguments),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::CustomToolInfo;

    fn server(yaml: &str) -> ServerConfig {
        serde_yaml::from_str(yaml).expect("server yaml")
    }

    fn profile() -> ProfileConfig {
        ProfileConfig {
            url: "https://broker.example.com/mcp/p1".to_string(),
            headers: HashMap::from([("X-Api-Key".to_string(), "broker".to_string())]),
        }
    }

    #[test]
    fn test_server_target_copies_config() {
        let s = server(
            r#"
name: github
protocol: streamable
url: "https://mcp.example.com"
headers: {X-Team: core}
external_user_id: "u-1"
"#,
        );
        let target = server_target(&s, None).unwrap();
        assert_eq!(target.url(), Some("https://mcp.example.com"));
        assert_eq!(target.header("X-Team"), Some("core"));
        assert_eq!(target.header(EXTERNAL_USER_ID_HEADER), Some("u-1"));
    }

    #[test]
    fn test_server_target_is_pure() {
        let s = server(
            r#"
name: files
protocol: stdio
command: mcp-files
"#,
        );
        let a = server_target(&s, None).unwrap();
        let b = server_target(&s, None).unwrap();
        assert_eq!(format!("{:?}", a), format!("{:?}", b));
        assert!(a.url().is_none());
    }

    #[test]
    fn test_server_target_composio_uses_profile() {
        let s = server(
            r#"
name: gmail
provider: composio
protocol: streamable
profile_id: p1
headers: {X-Api-Key: local, X-Extra: "1"}
"#,
        );
        assert!(matches!(server_target(&s, None), Err(McpError::Provider(_))));

        let target = server_target(&s, Some(&profile())).unwrap();
        assert_eq!(target.url(), Some("https://broker.example.com/mcp/p1"));
        assert_eq!(target.header("X-Api-Key"), Some("broker"));
        assert_eq!(target.header("X-Extra"), Some("1"));
    }

    #[test]
    fn test_custom_target_branches() {
        let http = CustomToolInfo::new("acme", "send-email", CustomType::Http)
            .with_url("https://acme.example.com/mcp")
            .with_header("X-Key", "k");
        let target = custom_target(&http, None).unwrap();
        assert!(matches!(target.transport, McpTransport::Streamable { .. }));
        assert_eq!(target.header("X-Key"), Some("k"));

        let sse = CustomToolInfo::new("acme", "watch", CustomType::Sse)
            .with_url("https://acme.example.com/sse");
        assert!(matches!(
            custom_target(&sse, None).unwrap().transport,
            McpTransport::Sse { .. }
        ));

        let json = CustomToolInfo::new("local", "grep", CustomType::Json)
            .with_command("mcp-grep", vec!["--stdio".to_string()]);
        assert!(matches!(
            custom_target(&json, None).unwrap().transport,
            McpTransport::Stdio { .. }
        ));

        let broker = CustomToolInfo::new("gmail", "send", CustomType::Composio).with_profile("p1");
        let target = custom_target(&broker, Some(&profile())).unwrap();
        assert_eq!(target.url(), Some("https://broker.example.com/mcp/p1"));
    }

    #[test]
    fn test_custom_target_missing_endpoint() {
        let no_url = CustomToolInfo::new("acme", "send-email", CustomType::Http);
        assert!(matches!(
            custom_target(&no_url, None),
            Err(McpError::Provider(_))
        ));

        let no_cmd = CustomToolInfo::new("local", "grep", CustomType::Json);
        assert!(matches!(
            custom_target(&no_cmd, None),
            Err(McpError::Provider(_))
        ));
    }

    #[test]
    fn test_build_request_headers() {
        let headers = build_request_headers(
            &Some("tok".to_string()),
            &HashMap::from([("X-Custom".to_string(), "v".to_string())]),
        )
        .unwrap();
        assert_eq!(headers.get("authorization").unwrap(), "Bearer tok");
        assert_eq!(headers.get("x-custom").unwrap(), "v");

        let bad = build_request_headers(
            &None,
            &HashMap::from([("bad header".to_string(), "v".to_string())]),
        );
        assert!(matches!(bad, Err(McpError::Config(_))));
    }

    #[test]
    fn test_call_request() {
        let mut args = Map::new();
        args.insert("a".to_string(), Value::from(1));
        let req = call_request("send-email", args);
        assert_eq!(req.name, "send-email");
        assert_eq!(req.arguments.unwrap().len(), 1);
    }
}
