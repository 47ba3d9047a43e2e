//! Engine configuration types and utilities.
//!
//! Defines configuration structures for standard server connections, custom
//! tool registrations, discovery caps, payload thresholds, timeouts, session
//! affinity, credential profiles and blob storage.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

pub use rmcp::model::{JsonObject, Tool};
use serde::{Deserialize, Serialize};

use crate::error::{McpError, McpResult};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Standard connections, connected at startup.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    /// Tools reached through ad-hoc channels (direct URL, subprocess, broker).
    #[serde(default)]
    pub custom_tools: Vec<CustomToolConfig>,

    #[serde(default)]
    pub discovery: DiscoveryLimits,

    #[serde(default)]
    pub payload: PayloadConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub session: SessionConfig,

    /// Credential profiles keyed by profile id.
    #[serde(default)]
    pub profiles: HashMap<String, ProfileConfig>,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Proxy for HTTP transports. Falls back to the environment when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
}

/// Who owns the credentials behind a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Custom,
    /// Credential broker: URL resolved through a profile, session header attached.
    Composio,
    Other,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Custom => f.write_str("custom"),
            Provider::Composio => f.write_str("composio"),
            Provider::Other => f.write_str("other"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Qualified name the connection is registered under.
    pub name: String,

    #[serde(default)]
    pub provider: Provider,

    #[serde(flatten)]
    pub transport: McpTransport,

    /// Sent as `X-External-User-Id` on HTTP transports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_user_id: Option<String>,

    /// Credential profile, required for the composio provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,

    /// Tools this connection may expose. `None` enables every discovered tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_tools: Option<Vec<String>>,
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum McpTransport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        envs: HashMap<String, String>,
    },
    Sse {
        #[serde(default)]
        url: String,
        /// Bearer token for Authorization header
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
    Streamable {
        #[serde(default)]
        url: String,
        /// Bearer token for Authorization header
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
}

impl McpTransport {
    pub fn kind(&self) -> TransportKind {
        match self {
            McpTransport::Stdio { .. } => TransportKind::Stdio,
            McpTransport::Sse { .. } => TransportKind::Sse,
            McpTransport::Streamable { .. } => TransportKind::Streamable,
        }
    }
}

impl fmt::Debug for McpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McpTransport::Stdio {
                command,
                args,
                envs,
            } => f
                .debug_struct("Stdio")
                .field("command", command)
                .field("args", args)
                .field("envs", &format!("{} vars", envs.len()))
                .finish(),
            McpTransport::Sse {
                url,
                token,
                headers,
            } => f
                .debug_struct("Sse")
                .field("url", url)
                .field("token", &token.as_ref().map(|_| "****"))
                .field("headers", &format!("{} headers", headers.len()))
                .finish(),
            McpTransport::Streamable {
                url,
                token,
                headers,
            } => f
                .debug_struct("Streamable")
                .field("url", url)
                .field("token", &token.as_ref().map(|_| "****"))
                .field("headers", &format!("{} headers", headers.len()))
                .finish(),
        }
    }
}

/// Wire-level transport family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Stdio,
    Sse,
    Streamable,
}

/// Channel used to reach a custom tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomType {
    Sse,
    /// Streamable HTTP.
    Http,
    /// Stdio subprocess described by command, args and env.
    Json,
    Composio,
}

impl fmt::Display for CustomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CustomType::Sse => f.write_str("sse"),
            CustomType::Http => f.write_str("http"),
            CustomType::Json => f.write_str("json"),
            CustomType::Composio => f.write_str("composio"),
        }
    }
}

/// Registration of a single custom tool.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CustomToolConfig {
    pub provider: String,
    /// Exact tool name understood by the remote server.
    pub original_name: String,
    pub custom_type: CustomType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Static schema; when absent the schema is fetched live before each call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<JsonObject>,
}

/// Caps applied to discovery output so catalogs stay LLM-context-safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct DiscoveryLimits {
    #[serde(default = "default_max_tools")]
    pub max_tools: usize,
    #[serde(default = "default_max_properties")]
    pub max_properties: usize,
    #[serde(default = "default_max_description_chars")]
    pub max_description_chars: usize,
}

/// Thresholds for the payload post-processor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PayloadConfig {
    /// Serialized size (bytes) at which a result is considered large.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    /// Structured list/object length above which a result is large.
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    /// Raw text newline count above which a result is large.
    #[serde(default = "default_max_newlines")]
    pub max_newlines: usize,
    #[serde(default = "default_preview_items")]
    pub preview_items: usize,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    #[serde(default = "default_sample_keys")]
    pub sample_keys: usize,
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

/// Deadlines (seconds) for every suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_timeout_secs")]
    pub connect_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub call_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub upload_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn call(&self) -> Duration {
        Duration::from_secs(self.call_secs)
    }

    pub fn upload(&self) -> Duration {
        Duration::from_secs(self.upload_secs)
    }
}

/// Session affinity settings for the composio path.
#[derive(Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Request header carrying the session id.
    #[serde(default = "default_session_header")]
    pub header: String,
    /// Endpoint of the session-issuing service. Without it no session header is sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_token: Option<String>,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("header", &self.header)
            .field("issuer_url", &self.issuer_url)
            .field("issuer_token", &self.issuer_token.as_ref().map(|_| "****"))
            .finish()
    }
}

/// Connection details a credential profile resolves to.
#[derive(Clone, Deserialize, Serialize)]
pub struct ProfileConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl fmt::Debug for ProfileConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileConfig")
            .field("url", &self.url)
            .field("headers", &format!("{} headers", self.headers.len()))
            .finish()
    }
}

/// Local blob storage for oversized results.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory blobs are written to. Without it, large results are not persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    /// Base URL the directory is served under; `file://` URLs otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,
}

/// HTTP proxy applied to SSE and streamable transports.
#[derive(Clone, Default, Deserialize, Serialize)]
pub struct ProxyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https: Option<String>,
    /// Comma-separated hosts that bypass the proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("http", &self.http)
            .field("https", &self.https)
            .field("no_proxy", &self.no_proxy)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .finish()
    }
}

impl ProxyConfig {
    /// Proxy from the environment: `MCP_*` names first, then the conventional
    /// upper- and lowercase names. Blank values are skipped. `None` when no
    /// HTTP or HTTPS proxy is set.
    pub fn from_env() -> Option<Self> {
        fn var(names: &[&str]) -> Option<String> {
            names.iter().find_map(|name| {
                std::env::var(name)
                    .ok()
                    .filter(|v| !v.trim().is_empty())
            })
        }

        let http = var(&["MCP_HTTP_PROXY", "HTTP_PROXY", "http_proxy"]);
        let https = var(&["MCP_HTTPS_PROXY", "HTTPS_PROXY", "https_proxy"]);
        if http.is_none() && https.is_none() {
            return None;
        }

        Some(Self {
            http,
            https,
            no_proxy: var(&["MCP_NO_PROXY", "NO_PROXY", "no_proxy"]),
            username: None,
            password: None,
        })
    }
}

// Default value functions
fn default_max_tools() -> usize {
    40
}

fn default_max_properties() -> usize {
    6
}

fn default_max_description_chars() -> usize {
    160
}

fn default_max_bytes() -> usize {
    4_000
}

fn default_max_items() -> usize {
    20
}

fn default_max_newlines() -> usize {
    20
}

fn default_preview_items() -> usize {
    10
}

fn default_preview_chars() -> usize {
    1_200
}

fn default_sample_keys() -> usize {
    15
}

fn default_bucket() -> String {
    "tool-results".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_session_header() -> String {
    "X-Session-Id".to_string()
}

// Default implementations
impl Default for DiscoveryLimits {
    fn default() -> Self {
        Self {
            max_tools: default_max_tools(),
            max_properties: default_max_properties(),
            max_description_chars: default_max_description_chars(),
        }
    }
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            max_items: default_max_items(),
            max_newlines: default_max_newlines(),
            preview_items: default_preview_items(),
            preview_chars: default_preview_chars(),
            sample_keys: default_sample_keys(),
            bucket: default_bucket(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_timeout_secs(),
            call_secs: default_timeout_secs(),
            upload_secs: default_timeout_secs(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            header: default_session_header(),
            issuer_url: None,
            issuer_token: None,
        }
    }
}

impl EngineConfig {
    /// Configured proxy, else the one described by the environment.
    pub fn effective_proxy(&self) -> Option<ProxyConfig> {
        self.proxy.clone().or_else(ProxyConfig::from_env)
    }

    /// Load configuration from a YAML file
    pub async fn from_file(path: impl AsRef<Path>) -> McpResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that can never produce a working connection.
    pub fn validate(&self) -> McpResult<()> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.name.as_str()) {
                return Err(McpError::Config(format!(
                    "duplicate server name '{}'",
                    server.name
                )));
            }
            server.validate()?;
        }

        for tool in &self.custom_tools {
            tool.validate()?;
        }

        Ok(())
    }
}

impl ServerConfig {
    fn validate(&self) -> McpResult<()> {
        if self.provider == Provider::Composio {
            if self.profile_id.is_none() {
                return Err(McpError::Config(format!(
                    "server '{}': composio provider requires profile_id",
                    self.name
                )));
            }
            return Ok(());
        }

        match &self.transport {
            McpTransport::Stdio { command, .. } if command.trim().is_empty() => Err(
                McpError::Config(format!("server '{}': empty stdio command", self.name)),
            ),
            McpTransport::Sse { url, .. } | McpTransport::Streamable { url, .. }
                if url.trim().is_empty() =>
            {
                Err(McpError::Config(format!(
                    "server '{}': url is required",
                    self.name
                )))
            }
            _ => Ok(()),
        }
    }
}

impl CustomToolConfig {
    fn validate(&self) -> McpResult<()> {
        let label = format!("custom tool '{}:{}'", self.provider, self.original_name);
        match self.custom_type {
            CustomType::Sse | CustomType::Http
                if self.url.as_deref().is_none_or(|u| u.trim().is_empty()) =>
            {
                Err(McpError::Config(format!("{label}: url is required")))
            }
            CustomType::Json if self.command.as_deref().is_none_or(|c| c.trim().is_empty()) => {
                Err(McpError::Config(format!("{label}: command is required")))
            }
            CustomType::Composio if self.profile_id.is_none() => {
                Err(McpError::Config(format!("{label}: profile_id is required")))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = DiscoveryLimits::default();
        assert_eq!(limits.max_tools, 40);
        assert_eq!(limits.max_properties, 6);
        assert_eq!(limits.max_description_chars, 160);

        let payload = PayloadConfig::default();
        assert_eq!(payload.max_bytes, 4_000);
        assert_eq!(payload.max_items, 20);
        assert_eq!(payload.preview_items, 10);
        assert_eq!(payload.preview_chars, 1_200);

        let timeouts = TimeoutConfig::default();
        assert_eq!(timeouts.call(), Duration::from_secs(30));
    }

    #[test]
    fn test_yaml_minimal_config() {
        let yaml = r#"
servers:
  - name: "github"
    protocol: streamable
    url: "https://mcp.example.com/github"
"#;

        let config: EngineConfig = serde_yaml::from_str(yaml).expect("Failed to parse YAML");
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].name, "github");
        assert_eq!(config.servers[0].provider, Provider::Custom);
        assert!(config.servers[0].enabled_tools.is_none());
        assert_eq!(config.discovery.max_tools, 40);
        assert_eq!(config.session.header, "X-Session-Id");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_full_config() {
        let yaml = r#"
servers:
  - name: "files"
    protocol: stdio
    command: "mcp-files"
    args: ["--root", "/tmp"]
    enabled_tools: ["read_file"]
  - name: "gmail"
    provider: composio
    protocol: streamable
    profile_id: "prof_1"

custom_tools:
  - provider: acme
    original_name: send-email
    custom_type: http
    url: "https://acme.example.com/mcp"
    headers:
      X-Api-Key: "k"
  - provider: local
    original_name: grep
    custom_type: json
    command: "mcp-grep"
    args: ["--stdio"]

discovery:
  max_tools: 10

payload:
  max_bytes: 8000
  bucket: "results"

timeouts:
  call_secs: 5

session:
  header: "X-Broker-Session"
  issuer_url: "https://broker.example.com/sessions"

profiles:
  prof_1:
    url: "https://broker.example.com/mcp/prof_1"
    headers:
      Authorization: "Bearer abc"

storage:
  directory: "/var/lib/tool-results"
"#;

        let config: EngineConfig = serde_yaml::from_str(yaml).expect("Failed to parse YAML");
        assert!(config.validate().is_ok());

        assert_eq!(config.servers.len(), 2);
        match &config.servers[0].transport {
            McpTransport::Stdio { command, args, .. } => {
                assert_eq!(command, "mcp-files");
                assert_eq!(args.len(), 2);
            }
            _ => panic!("Expected Stdio transport"),
        }
        assert_eq!(
            config.servers[0].enabled_tools.as_deref(),
            Some(&["read_file".to_string()][..])
        );
        assert_eq!(config.servers[1].provider, Provider::Composio);

        assert_eq!(config.custom_tools.len(), 2);
        assert_eq!(config.custom_tools[0].custom_type, CustomType::Http);
        assert_eq!(config.custom_tools[1].custom_type, CustomType::Json);

        assert_eq!(config.discovery.max_tools, 10);
        assert_eq!(config.discovery.max_properties, 6);
        assert_eq!(config.payload.max_bytes, 8000);
        assert_eq!(config.payload.max_items, 20);
        assert_eq!(config.payload.bucket, "results");
        assert_eq!(config.timeouts.call_secs, 5);
        assert_eq!(config.timeouts.connect_secs, 30);
        assert_eq!(config.session.header, "X-Broker-Session");
        assert_eq!(
            config.profiles.get("prof_1").unwrap().url,
            "https://broker.example.com/mcp/prof_1"
        );
        assert_eq!(
            config.storage.directory.as_deref(),
            Some(Path::new("/var/lib/tool-results"))
        );
    }

    #[test]
    fn test_validate_rejects_duplicate_servers() {
        let yaml = r#"
servers:
  - name: "dup"
    protocol: sse
    url: "http://localhost:3000/sse"
  - name: "dup"
    protocol: sse
    url: "http://localhost:3001/sse"
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(config.validate(), Err(McpError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_missing_url_and_profile() {
        let yaml = r#"
servers:
  - name: "nourl"
    protocol: streamable
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(config.validate(), Err(McpError::Config(_))));

        let yaml = r#"
servers:
  - name: "broker"
    provider: composio
    protocol: streamable
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(config.validate(), Err(McpError::Config(_))));

        let yaml = r#"
custom_tools:
  - provider: acme
    original_name: run
    custom_type: json
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(config.validate(), Err(McpError::Config(_))));
    }

    #[test]
    fn test_transport_debug_redacts_token() {
        let transport = McpTransport::Sse {
            url: "http://localhost:3000/sse".to_string(),
            token: Some("super-secret".to_string()),
            headers: HashMap::from([("X-Api-Key".to_string(), "k".to_string())]),
        };
        let rendered = format!("{:?}", transport);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("****"));
        assert!(rendered.contains("1 headers"));
    }

    #[test]
    fn test_custom_type_serde() {
        let types = vec![
            (CustomType::Sse, "\"sse\""),
            (CustomType::Http, "\"http\""),
            (CustomType::Json, "\"json\""),
            (CustomType::Composio, "\"composio\""),
        ];

        for (custom_type, expected) in types {
            let serialized = serde_json::to_string(&custom_type).unwrap();
            assert_eq!(serialized, expected);

            let deserialized: CustomType = serde_json::from_str(&serialized).unwrap();
            assert_eq!(deserialized, custom_type);
        }
    }

    const PROXY_VARS: &[&str] = &[
        "MCP_HTTP_PROXY",
        "HTTP_PROXY",
        "MCP_HTTPS_PROXY",
        "HTTPS_PROXY",
        "MCP_NO_PROXY",
        "NO_PROXY",
        "http_proxy",
        "https_proxy",
        "no_proxy",
    ];

    fn clear_proxy_env() {
        for var in PROXY_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_proxy_from_env_prefers_mcp_vars() {
        clear_proxy_env();
        assert!(ProxyConfig::from_env().is_none());

        std::env::set_var("HTTP_PROXY", "http://generic:3128");
        std::env::set_var("MCP_HTTP_PROXY", "http://mcp:3128");
        std::env::set_var("NO_PROXY", "localhost,127.0.0.1");

        let proxy = ProxyConfig::from_env().unwrap();
        assert_eq!(proxy.http.as_deref(), Some("http://mcp:3128"));
        assert!(proxy.https.is_none());
        assert_eq!(proxy.no_proxy.as_deref(), Some("localhost,127.0.0.1"));

        // a blank MCP name does not hide the generic one
        std::env::set_var("MCP_HTTP_PROXY", "  ");
        let proxy = ProxyConfig::from_env().unwrap();
        assert_eq!(proxy.http.as_deref(), Some("http://generic:3128"));

        clear_proxy_env();
    }

    #[test]
    #[serial]
    fn test_proxy_from_lowercase_env() {
        clear_proxy_env();
        std::env::set_var("https_proxy", "http://lower:8443");
        std::env::set_var("no_proxy", "internal.example.com");
        std::env::set_var("HTTPS_PROXY", "");

        let proxy = ProxyConfig::from_env().unwrap();
        assert!(proxy.http.is_none());
        assert_eq!(proxy.https.as_deref(), Some("http://lower:8443"));
        assert_eq!(proxy.no_proxy.as_deref(), Some("internal.example.com"));

        std::env::set_var("https_proxy", " ");
        assert!(ProxyConfig::from_env().is_none());

        clear_proxy_env();
    }

    #[test]
    #[serial]
    fn test_configured_proxy_wins_over_env() {
        clear_proxy_env();
        std::env::set_var("HTTPS_PROXY", "http://env:3128");

        let config: EngineConfig = serde_yaml::from_str(
            r#"
proxy:
  https: "http://configured:8080"
  username: ops
  password: hunter2
"#,
        )
        .unwrap();
        let proxy = config.effective_proxy().unwrap();
        assert_eq!(proxy.https.as_deref(), Some("http://configured:8080"));
        assert!(!format!("{:?}", proxy).contains("hunter2"));

        let fallback = EngineConfig::default().effective_proxy().unwrap();
        assert_eq!(fallback.https.as_deref(), Some("http://env:3128"));

        clear_proxy_env();
    }
}
