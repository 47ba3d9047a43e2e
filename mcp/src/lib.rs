//! Tool dispatch over the Model Context Protocol (MCP).
//!
//! ## Modules
//!
//! - [`core`]: configuration, transports, connection manager and the [`Engine`]
//! - [`inventory`]: custom tool registry, name resolution, argument shaping
//! - [`transform`]: result extraction and payload governance
//! - [`storage`]: blob storage for oversized results
//! - [`testing`]: scripted in-memory transport

pub mod core;
pub mod error;
pub mod inventory;
pub mod storage;
pub mod testing;
pub mod transform;

pub use crate::core::{
    config, Catalog, CallContext, ConnectionManager, CustomType, Engine, EngineCollaborators,
    EngineConfig, ExecutionRequest, ExecutionResult, McpMetrics, McpTransport, MetricsSnapshot,
    ServerConfig, Tool,
};

pub use error::{classify_error, ErrorKind, McpError, McpResult};
pub use inventory::{CustomToolInfo, CustomToolRegistry, QualifiedToolName, Resolution, ToolTarget};
pub use storage::{BlobStore, LocalBlobStore, MemoryBlobStore};
pub use transform::{PayloadEnvelope, PayloadProcessor};
