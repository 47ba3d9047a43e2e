//! Engine infrastructure: configuration, transports, connections, dispatch.

pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod manager;
pub mod metrics;
pub mod profile;
mod proxy;
pub mod session;
pub mod transport;

pub use catalog::{build_catalog, Catalog, CatalogEntry, PropertySummary, SchemaSummary};
pub use config::{
    CustomToolConfig, CustomType, DiscoveryLimits, EngineConfig, JsonObject, McpTransport,
    PayloadConfig, ProfileConfig, Provider, ProxyConfig, ServerConfig, SessionConfig, StorageConfig,
    TimeoutConfig, Tool, TransportKind,
};
pub use dispatcher::{
    CallContext, Engine, EngineCollaborators, ExecutionRequest, ExecutionResult,
};
pub use manager::{ConnectionManager, ManagerStats, ServerConnection};
pub use metrics::{LatencySnapshot, McpMetrics, MetricsSnapshot};
pub use profile::{ProfileResolver, StaticProfileResolver};
pub use session::{
    HttpSessionIssuer, SequentialSessionIssuer, SessionAffinity, SessionIssuer, SessionToken,
};
pub use transport::{Connector, RmcpConnector, ToolSession, TransportTarget};
