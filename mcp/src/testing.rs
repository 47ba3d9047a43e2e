//! In-memory transport for tests and dry runs.
//!
//! [`ScriptedConnector`] routes a [`TransportTarget`] to a [`ScriptedServer`]
//! by target name (server name, or `provider:original_name` for custom
//! tools). Servers answer calls from a reply queue, then from a fallback,
//! and record every call they receive.

use std::{
    borrow::Cow,
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rmcp::model::{CallToolRequestParam, CallToolResult, Content};
use serde_json::{Map, Value};

use crate::{
    core::{
        config::{McpTransport, Tool},
        transport::{Connector, ToolSession, TransportTarget},
    },
    error::{McpError, McpResult},
};

/// A call observed by a scripted server.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub target: String,
    pub tool: String,
    pub arguments: Map<String, Value>,
    pub headers: HashMap<String, String>,
}

#[derive(Default)]
pub struct ScriptedServer {
    tools: Mutex<Vec<Tool>>,
    replies: Mutex<VecDeque<McpResult<CallToolResult>>>,
    fallback: Mutex<Option<CallToolResult>>,
    calls: Mutex<Vec<RecordedCall>>,
    list_calls: AtomicUsize,
    connect_error: Mutex<Option<String>>,
    queued_connect_errors: Mutex<VecDeque<String>>,
    connect_delay: Mutex<Option<Duration>>,
    call_delay: Mutex<Option<Duration>>,
    close_hangs: AtomicBool,
}

impl ScriptedServer {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tools(self, tools: Vec<Tool>) -> Self {
        *self.tools.lock() = tools;
        self
    }

    #[must_use]
    pub fn with_fallback(self, result: CallToolResult) -> Self {
        *self.fallback.lock() = Some(result);
        self
    }

    #[must_use]
    pub fn failing_connect(self, message: impl Into<String>) -> Self {
        *self.connect_error.lock() = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        *self.connect_delay.lock() = Some(delay);
        self
    }

    #[must_use]
    pub fn with_call_delay(self, delay: Duration) -> Self {
        *self.call_delay.lock() = Some(delay);
        self
    }

    /// Sessions of this server never finish closing.
    #[must_use]
    pub fn with_hanging_close(self) -> Self {
        self.close_hangs.store(true, Ordering::Relaxed);
        self
    }

    /// Fail the next open with `message`; later opens are unaffected.
    pub fn push_connect_error(&self, message: impl Into<String>) {
        self.queued_connect_errors.lock().push_back(message.into());
    }

    /// Queue a reply for the next call.
    pub fn push_reply(&self, reply: McpResult<CallToolResult>) {
        self.replies.lock().push_back(reply);
    }

    pub fn set_tools(&self, tools: Vec<Tool>) {
        *self.tools.lock() = tools;
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn list_count(&self) -> usize {
        self.list_calls.load(Ordering::Relaxed)
    }
}

/// Connector over a fixed set of scripted servers.
#[derive(Default)]
pub struct ScriptedConnector {
    servers: DashMap<String, Arc<ScriptedServer>>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route targets named `name` to `server`.
    pub fn add(&self, name: impl Into<String>, server: ScriptedServer) -> Arc<ScriptedServer> {
        let server = Arc::new(server);
        self.servers.insert(name.into(), server.clone());
        server
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }

    /// Sessions whose close has started.
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::Relaxed)
    }

    /// Wait up to one second for `expected` closes, then report the count.
    /// Sessions are closed on background tasks.
    pub async fn wait_closed(&self, expected: usize) -> usize {
        for _ in 0..100 {
            if self.closed() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.closed()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(&self, target: &TransportTarget) -> McpResult<Arc<dyn ToolSession>> {
        let server = self
            .servers
            .get(&target.name)
            .map(|e| e.value().clone())
            .ok_or_else(|| McpError::Connection(format!("no route to '{}'", target.name)))?;

        let delay = *server.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let queued = server.queued_connect_errors.lock().pop_front();
        if let Some(message) = queued {
            return Err(McpError::Connection(message));
        }
        let connect_error = server.connect_error.lock().clone();
        if let Some(message) = connect_error {
            return Err(McpError::Connection(message));
        }

        self.opened.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(ScriptedSession {
            server,
            target: target.clone(),
            closed: AtomicBool::new(false),
            close_counter: self.closed.clone(),
        }))
    }
}

struct ScriptedSession {
    server: Arc<ScriptedServer>,
    target: TransportTarget,
    closed: AtomicBool,
    close_counter: Arc<AtomicUsize>,
}

#[async_trait]
impl ToolSession for ScriptedSession {
    async fn list_tools(&self) -> McpResult<Vec<Tool>> {
        self.server.list_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.server.tools.lock().clone())
    }

    async fn call_tool(&self, request: CallToolRequestParam) -> McpResult<CallToolResult> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(McpError::ToolExecution("session not established".to_string()));
        }

        let headers = match &self.target.transport {
            McpTransport::Sse { headers, .. } | McpTransport::Streamable { headers, .. } => {
                headers.clone()
            }
            McpTransport::Stdio { .. } => HashMap::new(),
        };
        self.server.calls.lock().push(RecordedCall {
            target: self.target.name.clone(),
            tool: request.name.to_string(),
            arguments: request.arguments.unwrap_or_default(),
            headers,
        });

        let delay = *self.server.call_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self.server.replies.lock().pop_front();
        match queued {
            Some(reply) => reply,
            None => self
                .server
                .fallback
                .lock()
                .clone()
                .ok_or_else(|| McpError::ToolExecution("no scripted reply".to_string())),
        }
    }

    async fn close(&self) -> McpResult<()> {
        if !self.closed.swap(true, Ordering::Relaxed) {
            self.close_counter.fetch_add(1, Ordering::Relaxed);
        }
        if self.server.close_hangs.load(Ordering::Relaxed) {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// Build a tool descriptor from a JSON schema object.
pub fn tool(name: &str, description: &str, schema: Value) -> Tool {
    let schema = match schema {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Tool {
        name: Cow::Owned(name.to_string()),
        title: None,
        description: Some(Cow::Owned(description.to_string())),
        input_schema: Arc::new(schema),
        output_schema: None,
        annotations: None,
        icons: None,
    }
}

pub fn text_result(text: impl Into<String>) -> CallToolResult {
    CallToolResult::success(vec![Content::text(text.into())])
}

pub fn error_result(text: impl Into<String>) -> CallToolResult {
    CallToolResult::error(vec![Content::text(text.into())])
}
