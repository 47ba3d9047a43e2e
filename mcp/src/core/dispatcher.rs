//! The engine and its dispatch state machine.
//!
//! One execution runs RESOLVE, LOCATE, NORMALIZE, CALL and EXTRACT, then
//! post-processes the payload. A failed call gets at most one more attempt:
//! with corrected arguments after a validation failure, or with a refreshed
//! session after an auth failure on the broker path. Every error ends up in
//! the returned [`ExecutionResult`]; `execute` never fails.

use std::{borrow::Cow, sync::Arc, time::Instant};

use futures::future::join_all;
use rmcp::model::CallToolResult;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::{
    catalog::{build_catalog, Catalog},
    config::{CustomType, DiscoveryLimits, EngineConfig, JsonObject, TimeoutConfig, Tool},
    manager::{close_in_background, ConnectionManager},
    metrics::McpMetrics,
    profile::{ProfileResolver, StaticProfileResolver},
    session::{HttpSessionIssuer, SessionAffinity, SessionIssuer, SessionToken},
    transport::{call_request, custom_target, Connector, RmcpConnector, TransportTarget},
};
use crate::{
    error::{classify_error, ErrorKind, McpError, McpResult},
    inventory::{
        corrected_arguments, normalize_arguments, registry::fold_separators, resolve, schema_hint,
        CustomToolInfo, CustomToolRegistry, QualifiedToolName, Resolution, ToolTarget,
    },
    storage::{BlobStore, LocalBlobStore},
    transform::{error_text, extract::is_error, extract_content, PayloadProcessor},
};

// ============================================================================
// Request / result types
// ============================================================================

/// A tool call as supplied by the caller.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionRequest {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ExecutionRequest {
    pub fn new(tool_name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// Per-call context supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Logical thread id keying the session cache. `None` disables caching.
    pub thread_id: Option<String>,
}

impl CallContext {
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Extracted content, possibly an envelope. `{"error": ...}` on failure.
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Remote call attempts: 0 when the tool was never called, else 1 or 2.
    pub attempts: u8,
    /// Resolved tool, when resolution succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<QualifiedToolName>,
}

// ============================================================================
// Collaborators
// ============================================================================

/// External collaborators the engine talks to.
pub struct EngineCollaborators {
    pub connector: Arc<dyn Connector>,
    pub profiles: Arc<dyn ProfileResolver>,
    pub session_issuer: Option<Arc<dyn SessionIssuer>>,
    pub blob_store: Option<Arc<dyn BlobStore>>,
}

impl EngineCollaborators {
    /// Collaborators around `connector` with no profiles, issuer or blob store.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            profiles: Arc::new(StaticProfileResolver::default()),
            session_issuer: None,
            blob_store: None,
        }
    }

    /// Production collaborators: rmcp transports, configured profiles, the
    /// HTTP session issuer and the local blob store when configured.
    pub fn from_config(config: &EngineConfig) -> McpResult<Self> {
        let session_issuer = HttpSessionIssuer::from_config(&config.session)?
            .map(|issuer| Arc::new(issuer) as Arc<dyn SessionIssuer>);
        let blob_store = LocalBlobStore::from_config(&config.storage)
            .map(|store| Arc::new(store) as Arc<dyn BlobStore>);

        Ok(Self {
            connector: Arc::new(RmcpConnector::new(config.effective_proxy())),
            profiles: Arc::new(StaticProfileResolver::new(config.profiles.clone())),
            session_issuer,
            blob_store,
        })
    }

    #[must_use]
    pub fn with_profiles(mut self, profiles: Arc<dyn ProfileResolver>) -> Self {
        self.profiles = profiles;
        self
    }

    #[must_use]
    pub fn with_session_issuer(mut self, issuer: Arc<dyn SessionIssuer>) -> Self {
        self.session_issuer = Some(issuer);
        self
    }

    #[must_use]
    pub fn with_blob_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(store);
        self
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Where the calls of one execution go, fixed after LOCATE.
enum Route {
    Standard {
        server: String,
        tool_name: String,
    },
    Custom {
        info: Arc<CustomToolInfo>,
        target: TransportTarget,
    },
}

impl Route {
    fn remote_name(&self) -> &str {
        match self {
            Route::Standard { tool_name, .. } => tool_name,
            Route::Custom { info, .. } => &info.original_name,
        }
    }

    /// Only the broker path carries a session header.
    fn uses_session(&self) -> bool {
        matches!(self, Route::Custom { info, .. } if info.custom_type == CustomType::Composio)
    }
}

/// Outcome of one call attempt after classification.
enum Attempt {
    Done(CallToolResult),
    Failed { kind: ErrorKind, error: McpError },
}

#[derive(Default)]
struct Trace {
    attempts: u8,
    tool: Option<QualifiedToolName>,
}

pub struct Engine {
    manager: ConnectionManager,
    registry: CustomToolRegistry,
    sessions: SessionAffinity,
    payload: PayloadProcessor,
    connector: Arc<dyn Connector>,
    profiles: Arc<dyn ProfileResolver>,
    metrics: Arc<McpMetrics>,
    discovery: DiscoveryLimits,
    timeouts: TimeoutConfig,
}

impl Engine {
    /// Build an engine with the configured custom tools registered and no
    /// standard connections yet.
    pub fn new(config: &EngineConfig, collaborators: EngineCollaborators) -> Self {
        let metrics = Arc::new(McpMetrics::new());
        let manager = ConnectionManager::new(
            collaborators.connector.clone(),
            collaborators.profiles.clone(),
            metrics.clone(),
            &config.timeouts,
        );

        let engine = Self {
            manager,
            registry: CustomToolRegistry::new(),
            sessions: SessionAffinity::new(collaborators.session_issuer, config.session.header.clone()),
            payload: PayloadProcessor::new(
                config.payload.clone(),
                collaborators.blob_store,
                config.timeouts.upload(),
            ),
            connector: collaborators.connector,
            profiles: collaborators.profiles,
            metrics,
            discovery: config.discovery,
            timeouts: config.timeouts,
        };

        for tool in &config.custom_tools {
            engine.register_custom_tool(CustomToolInfo::from(tool.clone()));
        }
        engine
    }

    /// Validate the configuration, register custom tools and connect every
    /// configured server. A server that fails to connect is skipped.
    pub async fn from_config(
        config: &EngineConfig,
        collaborators: EngineCollaborators,
    ) -> McpResult<Self> {
        config.validate()?;
        let engine = Self::new(config, collaborators);

        // failures are logged by the manager
        join_all(config.servers.iter().map(|server| engine.manager.connect(server))).await;

        info!(
            servers = engine.manager.server_names().len(),
            configured = config.servers.len(),
            custom_tools = engine.registry.len(),
            "Engine ready"
        );
        Ok(engine)
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn registry(&self) -> &CustomToolRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionAffinity {
        &self.sessions
    }

    pub fn metrics(&self) -> &McpMetrics {
        &self.metrics
    }

    pub fn register_custom_tool(&self, info: CustomToolInfo) -> Arc<CustomToolInfo> {
        self.registry.register(info)
    }

    /// Returns `true` if the tool was registered.
    pub fn unregister_custom_tool(&self, provider: &str, original_name: &str) -> bool {
        self.registry.unregister(provider, original_name).is_some()
    }

    /// Map a caller-supplied name onto a custom tool or a standard connection.
    pub fn resolve(&self, tool_name: &str) -> McpResult<Resolution> {
        resolve(tool_name, &self.registry, &self.manager)
    }

    /// Bounded catalog of every callable tool: enabled tools of standard
    /// connections, then custom tools that carry a static schema.
    pub fn list_tools(&self) -> Catalog {
        let mut entries: Vec<(String, Tool)> = Vec::new();
        for conn in self.manager.connections() {
            entries.extend(conn.enabled_tools().map(|tool| (conn.name.clone(), tool.clone())));
        }
        for info in self.registry.list() {
            if let Some(tool) = custom_descriptor(&info) {
                entries.push((info.qualified_name().server_key, tool));
            }
        }
        build_catalog(entries, &self.discovery)
    }

    /// Close every connection and forget every cached session.
    pub async fn shutdown(&self) {
        self.manager.disconnect_all().await;
        self.sessions.clear();
        info!("Engine shut down");
    }

    // ========================================================================
    // Execution
    // ========================================================================

    pub async fn execute(&self, tool_name: &str, arguments: Map<String, Value>) -> ExecutionResult {
        self.dispatch(ExecutionRequest::new(tool_name, arguments), &CallContext::default())
            .await
    }

    pub async fn dispatch(&self, request: ExecutionRequest, ctx: &CallContext) -> ExecutionResult {
        let started = Instant::now();
        self.metrics.record_execution_start();

        let mut trace = Trace::default();
        let outcome = self.run(&request, ctx, &mut trace).await;

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.metrics
            .record_execution_end(trace.tool.as_ref(), outcome.is_ok(), elapsed_ms);

        match outcome {
            Ok(content) => {
                debug!(
                    tool = %request.tool_name,
                    attempt = trace.attempts,
                    elapsed_ms,
                    "Tool call succeeded"
                );
                ExecutionResult {
                    success: true,
                    content,
                    error: None,
                    error_kind: None,
                    attempts: trace.attempts,
                    tool: trace.tool,
                }
            }
            Err(e) => {
                let message = e.to_string();
                warn!(
                    tool = %request.tool_name,
                    attempt = trace.attempts,
                    elapsed_ms,
                    error = %message,
                    "Tool call failed"
                );
                ExecutionResult {
                    success: false,
                    content: json!({ "error": &message }),
                    error: Some(message),
                    error_kind: Some(e.kind()),
                    attempts: trace.attempts,
                    tool: trace.tool,
                }
            }
        }
    }

    async fn run(
        &self,
        request: &ExecutionRequest,
        ctx: &CallContext,
        trace: &mut Trace,
    ) -> McpResult<Value> {
        let resolution = self.resolve(&request.tool_name)?;
        trace.tool = Some(resolution.qualified_name());

        let route = self.locate(&resolution.target).await?;
        let schema = self.schema_for(&route).await?;
        let arguments = normalize_arguments(&schema, &request.arguments);

        let thread = ctx.thread_id.as_deref();
        let mut session = if route.uses_session() {
            self.sessions.session_for(thread, false).await
        } else {
            None
        };

        trace.attempts = 1;
        let first = self
            .invoke(&route, arguments.clone(), session.as_ref())
            .await;
        let (kind, error) = match classify(first) {
            Attempt::Done(result) => return Ok(self.finish(&route, result).await),
            Attempt::Failed { kind, error } => (kind, error),
        };

        let retry_arguments = match kind {
            ErrorKind::Validation => {
                self.metrics.record_validation_retry();
                warn!(
                    tool = %route.remote_name(),
                    attempt = 2,
                    error = %error,
                    "Arguments rejected, retrying with corrected arguments"
                );
                corrected_arguments(&schema, &request.arguments, &detail(&error))
            }
            ErrorKind::Auth if route.uses_session() => {
                self.metrics.record_auth_retry();
                warn!(
                    tool = %route.remote_name(),
                    attempt = 2,
                    error = %error,
                    "Session rejected, retrying with a fresh session"
                );
                session = self.sessions.session_for(thread, true).await;
                arguments
            }
            _ => return Err(error),
        };

        trace.attempts = 2;
        let second = self
            .invoke(&route, retry_arguments, session.as_ref())
            .await;
        match classify(second) {
            Attempt::Done(result) => Ok(self.finish(&route, result).await),
            Attempt::Failed {
                kind: ErrorKind::Validation,
                error,
            } => Err(McpError::Validation(format!(
                "{} {}",
                detail(&error),
                schema_hint(&schema)
            ))),
            Attempt::Failed { error, .. } => Err(error),
        }
    }

    /// Turn a resolved target into a route. Broker tools resolve their
    /// profile here, right before use.
    async fn locate(&self, target: &ToolTarget) -> McpResult<Route> {
        match target {
            ToolTarget::Standard { server, tool_name } => Ok(Route::Standard {
                server: server.clone(),
                tool_name: tool_name.clone(),
            }),
            ToolTarget::Custom(info) => {
                let profile = match (info.custom_type, &info.custom_config.profile_id) {
                    (CustomType::Composio, Some(id)) => Some(self.profiles.resolve(id).await?),
                    (CustomType::Composio, None) => {
                        return Err(McpError::Provider(format!(
                            "custom tool '{}': composio requires profile_id",
                            info.key()
                        )))
                    }
                    _ => None,
                };
                Ok(Route::Custom {
                    info: info.clone(),
                    target: custom_target(info, profile.as_ref())?,
                })
            }
        }
    }

    /// Input schema for NORMALIZE: the cached descriptor of a standard tool,
    /// the static schema of a custom tool, or a live listing otherwise.
    async fn schema_for(&self, route: &Route) -> McpResult<Arc<JsonObject>> {
        match route {
            Route::Standard { server, tool_name } => self
                .manager
                .tool_descriptor(server, tool_name)
                .map(|tool| tool.input_schema)
                .ok_or_else(|| McpError::ToolNotFound(format!("{}:{}", server, tool_name))),
            Route::Custom { info, target } => {
                if let Some(schema) = &info.input_schema {
                    return Ok(schema.clone());
                }
                let tools = self.list_transient(target).await?;
                let wanted = fold_separators(&info.original_name);
                match tools
                    .into_iter()
                    .find(|t| t.name == info.original_name || fold_separators(&t.name) == wanted)
                {
                    Some(tool) => Ok(tool.input_schema),
                    None => {
                        warn!(tool = %info.key(), "Tool not listed by remote, calling without schema");
                        Ok(Arc::new(JsonObject::new()))
                    }
                }
            }
        }
    }

    async fn invoke(
        &self,
        route: &Route,
        arguments: Map<String, Value>,
        session: Option<&SessionToken>,
    ) -> McpResult<CallToolResult> {
        match route {
            Route::Standard { server, tool_name } => {
                self.manager.call(server, tool_name, arguments).await
            }
            Route::Custom { info, target } => {
                let target = match session {
                    Some(token) => target
                        .clone()
                        .with_header(self.sessions.header_name(), token.id.clone()),
                    None => target.clone(),
                };
                self.call_transient(&target, &info.original_name, arguments)
                    .await
            }
        }
    }

    /// Open a session, call once, close in the background. Open and call are
    /// bounded separately.
    async fn call_transient(
        &self,
        target: &TransportTarget,
        tool_name: &str,
        arguments: Map<String, Value>,
    ) -> McpResult<CallToolResult> {
        let session = tokio::time::timeout(self.timeouts.connect(), self.connector.open(target))
            .await
            .map_err(|_| McpError::timeout())??;

        debug!(target = %target.name, tool = %tool_name, "Calling custom tool");
        let result = tokio::time::timeout(
            self.timeouts.call(),
            session.call_tool(call_request(tool_name, arguments)),
        )
        .await
        .map_err(|_| McpError::timeout())
        .and_then(|r| r);

        close_in_background(&target.name, session, self.timeouts.connect());
        result
    }

    async fn list_transient(&self, target: &TransportTarget) -> McpResult<Vec<Tool>> {
        let session = tokio::time::timeout(self.timeouts.connect(), self.connector.open(target))
            .await
            .map_err(|_| McpError::timeout())??;

        let tools = tokio::time::timeout(self.timeouts.call(), session.list_tools())
            .await
            .map_err(|_| McpError::timeout())
            .and_then(|r| r);

        close_in_background(&target.name, session, self.timeouts.connect());
        tools
    }

    /// EXTRACT plus payload post-processing.
    async fn finish(&self, route: &Route, result: CallToolResult) -> Value {
        let content = extract_content(&result);
        let processed = self.payload.process(route.remote_name(), content).await;
        if processed.enveloped {
            self.metrics.record_envelope();
        }
        if processed.upload_failed {
            self.metrics.record_upload_failure();
        }
        processed.content
    }
}

fn classify(outcome: McpResult<CallToolResult>) -> Attempt {
    match outcome {
        Ok(result) if is_error(&result) => {
            let mut text = error_text(&result);
            if text.trim().is_empty() {
                text = "tool returned an error".to_string();
            }
            let error = match classify_error(&text) {
                ErrorKind::Validation => McpError::Validation(text),
                ErrorKind::Auth => McpError::Auth(text),
                _ => McpError::ToolExecution(text),
            };
            Attempt::Failed {
                kind: error.kind(),
                error,
            }
        }
        Ok(result) => Attempt::Done(result),
        Err(error) => {
            let kind = match &error {
                // broker handshakes report rejected sessions as transport failures
                McpError::Connection(msg) if classify_error(msg) == ErrorKind::Auth => {
                    ErrorKind::Auth
                }
                other => other.kind(),
            };
            Attempt::Failed { kind, error }
        }
    }
}

/// Error text without the variant prefix.
fn detail(error: &McpError) -> String {
    match error {
        McpError::Validation(text)
        | McpError::Auth(text)
        | McpError::ToolExecution(text)
        | McpError::Connection(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Catalog descriptor of a custom tool with a static schema.
fn custom_descriptor(info: &CustomToolInfo) -> Option<Tool> {
    let schema = info.input_schema.clone()?;
    Some(Tool {
        name: Cow::Owned(info.original_name.clone()),
        title: None,
        description: info.description.clone().map(Cow::Owned),
        input_schema: schema,
        output_schema: None,
        annotations: None,
        icons: None,
    })
}
