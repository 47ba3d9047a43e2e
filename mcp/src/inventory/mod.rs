//! Tool inventory and name handling.
//!
//! This module provides:
//! - Qualified tool names and custom tool registrations
//! - Caller-name resolution against custom and standard tools
//! - Schema-aware argument normalization

pub mod args;
pub mod registry;
pub mod resolver;
pub mod types;

pub use args::{corrected_arguments, normalize_arguments, schema_hint};
pub use registry::CustomToolRegistry;
pub use resolver::{resolve, NameCandidates, Resolution, ToolLocator};
pub use types::{CustomConfig, CustomToolInfo, QualifiedToolName, ToolTarget};
