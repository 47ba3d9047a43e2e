//! Connection management for standard tool servers.
//!
//! Owns one live session per configured server, keyed by qualified name.
//! A connection is created by `connect` (handshake plus tool discovery under
//! one deadline), replaced wholesale on reconnect or refresh, and removed on
//! `disconnect`. Calls only read the registry.

use std::{collections::HashSet, sync::Arc, time::Duration};

use dashmap::DashMap;
use rmcp::model::CallToolResult;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use super::{
    config::{Provider, ServerConfig, TimeoutConfig, Tool, TransportKind},
    metrics::McpMetrics,
    profile::ProfileResolver,
    transport::{call_request, server_target, Connector, ToolSession},
};
use crate::{
    error::{McpError, McpResult},
    inventory::ToolLocator,
};

/// A live connection and the tools captured at handshake.
pub struct ServerConnection {
    pub name: String,
    pub provider: Provider,
    pub transport: TransportKind,
    pub config: ServerConfig,
    enabled_tools: Option<HashSet<String>>,
    tools: Vec<Tool>,
    session: Arc<dyn ToolSession>,
}

impl ServerConnection {
    /// Every tool captured from discovery, enabled or not.
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    /// Allow-list check. Without an explicit list, every discovered tool is enabled.
    pub fn is_enabled(&self, tool_name: &str) -> bool {
        match &self.enabled_tools {
            Some(allowed) => allowed.contains(tool_name),
            None => self.tools.iter().any(|t| t.name == tool_name),
        }
    }

    /// Discovered tools that pass the allow-list, in discovery order.
    pub fn enabled_tools(&self) -> impl Iterator<Item = &Tool> {
        self.tools.iter().filter(|t| self.is_enabled(&t.name))
    }

    pub fn tool(&self, tool_name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == tool_name)
    }

    fn with_tools(&self, tools: Vec<Tool>) -> Self {
        Self {
            name: self.name.clone(),
            provider: self.provider,
            transport: self.transport,
            config: self.config.clone(),
            enabled_tools: self.enabled_tools.clone(),
            tools,
            session: self.session.clone(),
        }
    }
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("transport", &self.transport)
            .field("tools", &self.tools.len())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub server_count: usize,
    pub tool_count: usize,
    pub enabled_tool_count: usize,
}

pub struct ConnectionManager {
    connections: DashMap<String, Arc<ServerConnection>>,
    connector: Arc<dyn Connector>,
    profiles: Arc<dyn ProfileResolver>,
    metrics: Arc<McpMetrics>,
    connect_timeout: Duration,
    call_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        profiles: Arc<dyn ProfileResolver>,
        metrics: Arc<McpMetrics>,
        timeouts: &TimeoutConfig,
    ) -> Self {
        Self {
            connections: DashMap::new(),
            connector,
            profiles,
            metrics,
            connect_timeout: timeouts.connect(),
            call_timeout: timeouts.call(),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open, handshake and discover tools, then register under `config.name`.
    ///
    /// Overwrites any existing entry; the replaced session is closed best-effort.
    pub async fn connect(&self, config: &ServerConfig) -> McpResult<Arc<ServerConnection>> {
        match self.connect_inner(config).await {
            Ok(conn) => Ok(conn),
            Err(e) => {
                self.metrics.record_connection_error();
                error!(server = %config.name, error = %e, "Failed to connect");
                Err(e)
            }
        }
    }

    async fn connect_inner(&self, config: &ServerConfig) -> McpResult<Arc<ServerConnection>> {
        let profile = match (config.provider, &config.profile_id) {
            (Provider::Composio, Some(id)) => Some(self.profiles.resolve(id).await?),
            (Provider::Composio, None) => {
                return Err(McpError::Provider(format!(
                    "server '{}': composio provider requires profile_id",
                    config.name
                )))
            }
            _ => None,
        };
        let target = server_target(config, profile.as_ref())?;

        info!(server = %config.name, transport = ?target.transport.kind(), "Connecting");

        let handshake = async {
            let session = self.connector.open(&target).await?;
            match session.list_tools().await {
                Ok(tools) => Ok((session, tools)),
                Err(e) => {
                    close_in_background(&config.name, session, self.connect_timeout);
                    Err(e)
                }
            }
        };
        let (session, tools) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| McpError::timeout())??;

        info!(server = %config.name, tools = tools.len(), "Connected");

        let conn = Arc::new(ServerConnection {
            name: config.name.clone(),
            provider: config.provider,
            transport: target.transport.kind(),
            config: config.clone(),
            enabled_tools: config
                .enabled_tools
                .as_ref()
                .map(|names| names.iter().cloned().collect()),
            tools,
            session,
        });

        self.metrics.record_connection_opened();
        if let Some(old) = self.connections.insert(config.name.clone(), conn.clone()) {
            debug!(server = %config.name, "Replaced existing connection");
            close_in_background(&old.name, old.session.clone(), self.connect_timeout);
            self.metrics.record_connection_closed();
        }

        Ok(conn)
    }

    /// Close and remove a connection. Close failures are logged only.
    pub async fn disconnect(&self, name: &str) {
        let Some((_, conn)) = self.connections.remove(name) else {
            debug!(server = %name, "Disconnect of unknown server ignored");
            return;
        };
        close_in_background(name, conn.session.clone(), self.connect_timeout);
        self.metrics.record_connection_closed();
        info!(server = %name, "Disconnected");
    }

    pub async fn disconnect_all(&self) {
        for name in self.server_names() {
            self.disconnect(&name).await;
        }
    }

    /// Re-run discovery on a live connection and replace its tool list.
    pub async fn refresh_tools(&self, name: &str) -> McpResult<usize> {
        let conn = self
            .get(name)
            .ok_or_else(|| McpError::Connection(format!("server '{}' is not connected", name)))?;

        let tools = tokio::time::timeout(self.connect_timeout, conn.session.list_tools())
            .await
            .map_err(|_| McpError::timeout())??;
        let count = tools.len();

        self.connections
            .insert(name.to_string(), Arc::new(conn.with_tools(tools)));
        info!(server = %name, tools = count, "Refreshed tools");
        Ok(count)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get(&self, name: &str) -> Option<Arc<ServerConnection>> {
        self.connections.get(name).map(|e| e.value().clone())
    }

    /// Connected server names, sorted.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Connections sorted by name.
    pub fn connections(&self) -> Vec<Arc<ServerConnection>> {
        self.server_names()
            .iter()
            .filter_map(|name| self.get(name))
            .collect()
    }

    /// Every enabled tool across connections, flattened into function schemas.
    pub fn list_tools_openapi(&self) -> Vec<Value> {
        self.connections()
            .iter()
            .flat_map(|conn| {
                conn.enabled_tools()
                    .map(|tool| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": tool.name,
                                "description": tool.description.as_deref().unwrap_or_default(),
                                "parameters": Value::Object((*tool.input_schema).clone()),
                            }
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Cached descriptor of an enabled tool.
    pub fn tool_descriptor(&self, server: &str, tool_name: &str) -> Option<Tool> {
        let conn = self.get(server)?;
        if !conn.is_enabled(tool_name) {
            return None;
        }
        conn.tool(tool_name).cloned()
    }

    pub fn stats(&self) -> ManagerStats {
        let mut stats = ManagerStats {
            server_count: 0,
            tool_count: 0,
            enabled_tool_count: 0,
        };
        for entry in self.connections.iter() {
            stats.server_count += 1;
            stats.tool_count += entry.tools.len();
            stats.enabled_tool_count += entry.enabled_tools().count();
        }
        stats
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Call a tool on a standard connection, bounded by the call deadline.
    pub async fn call(
        &self,
        server: &str,
        tool_name: &str,
        arguments: Map<String, Value>,
    ) -> McpResult<CallToolResult> {
        let conn = self.get(server).ok_or_else(|| {
            McpError::ToolExecution(format!("session not established for '{}'", server))
        })?;

        if !conn.is_enabled(tool_name) {
            return Err(McpError::ToolExecution(format!(
                "tool '{}' is not enabled on '{}'",
                tool_name, server
            )));
        }

        debug!(server = %server, tool = %tool_name, "Calling tool");
        tokio::time::timeout(
            self.call_timeout,
            conn.session.call_tool(call_request(tool_name, arguments)),
        )
        .await
        .map_err(|_| McpError::timeout())?
    }
}

impl ToolLocator for ConnectionManager {
    fn servers_exposing(&self, tool_name: &str) -> Vec<String> {
        self.connections()
            .iter()
            .filter(|conn| conn.tool(tool_name).is_some() && conn.is_enabled(tool_name))
            .map(|conn| conn.name.clone())
            .collect()
    }
}

/// Close `session` on a background task bounded by `deadline`.
///
/// Returns immediately. Failures and timeouts are logged, never returned.
pub(crate) fn close_in_background(name: &str, session: Arc<dyn ToolSession>, deadline: Duration) {
    let name = name.to_string();
    tokio::spawn(async move {
        match tokio::time::timeout(deadline, session.close()).await {
            Ok(Ok(())) => debug!(server = %name, "Session closed"),
            Ok(Err(e)) => warn!(server = %name, error = %e, "Error closing session"),
            Err(_) => warn!(server = %name, "Timed out closing session"),
        }
    });
}
