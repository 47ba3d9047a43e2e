//! Core types for the tool inventory.

use std::{collections::HashMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::core::config::{CustomToolConfig, CustomType, JsonObject};

/// Unique tool identifier: `server_key:tool_name`.
///
/// Custom tools use `custom:<provider>` as their server key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedToolName {
    pub server_key: String,
    pub tool_name: String,
}

impl QualifiedToolName {
    pub fn new(server_key: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            server_key: server_key.into(),
            tool_name: tool_name.into(),
        }
    }

    pub fn custom(provider: &str, tool_name: impl Into<String>) -> Self {
        Self::new(format!("custom:{provider}"), tool_name)
    }

    /// Parse from "server:tool" format. The last colon separates the tool.
    pub fn parse(s: &str) -> Option<Self> {
        let (server, tool) = s.rsplit_once(':')?;
        if server.is_empty() || tool.is_empty() {
            return None;
        }
        Some(Self::new(server, tool))
    }
}

impl fmt::Display for QualifiedToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.server_key, self.tool_name)
    }
}

/// Channel settings of a custom tool.
#[derive(Clone, Default)]
pub struct CustomConfig {
    pub url: Option<String>,
    pub headers: HashMap<String, String>,
    pub profile_id: Option<String>,
    pub external_user_id: Option<String>,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl fmt::Debug for CustomConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomConfig")
            .field("url", &self.url)
            .field("headers", &format!("{} headers", self.headers.len()))
            .field("profile_id", &self.profile_id)
            .field("command", &self.command)
            .field("args", &self.args)
            .field("env", &format!("{} vars", self.env.len()))
            .finish()
    }
}

/// A tool reached through a non-standard channel, built once at registration.
#[derive(Debug, Clone)]
pub struct CustomToolInfo {
    pub provider: String,
    pub custom_type: CustomType,
    /// Remote-canonical tool name.
    pub original_name: String,
    pub custom_config: CustomConfig,
    pub description: Option<String>,
    /// Static schema. `None` means the schema is listed live before each call.
    pub input_schema: Option<Arc<JsonObject>>,
}

impl CustomToolInfo {
    pub fn new(
        provider: impl Into<String>,
        original_name: impl Into<String>,
        custom_type: CustomType,
    ) -> Self {
        Self {
            provider: provider.into(),
            custom_type,
            original_name: original_name.into(),
            custom_config: CustomConfig::default(),
            description: None,
            input_schema: None,
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.custom_config.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_config.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_profile(mut self, profile_id: impl Into<String>) -> Self {
        self.custom_config.profile_id = Some(profile_id.into());
        self
    }

    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>, args: Vec<String>) -> Self {
        self.custom_config.command = Some(command.into());
        self.custom_config.args = args;
        self
    }

    #[must_use]
    pub fn with_schema(mut self, schema: JsonObject) -> Self {
        self.input_schema = Some(Arc::new(schema));
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Registry key: `<provider>:<original_name>`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.provider, self.original_name)
    }

    pub fn qualified_name(&self) -> QualifiedToolName {
        QualifiedToolName::custom(&self.provider, self.original_name.clone())
    }
}

impl From<CustomToolConfig> for CustomToolInfo {
    fn from(config: CustomToolConfig) -> Self {
        Self {
            provider: config.provider,
            custom_type: config.custom_type,
            original_name: config.original_name,
            custom_config: CustomConfig {
                url: config.url,
                headers: config.headers,
                profile_id: config.profile_id,
                external_user_id: config.external_user_id,
                command: config.command,
                args: config.args,
                env: config.env,
            },
            description: config.description,
            input_schema: config.input_schema.map(Arc::new),
        }
    }
}

/// Where a resolved tool name lives.
#[derive(Debug, Clone)]
pub enum ToolTarget {
    /// A registered custom tool, called over a transient session.
    Custom(Arc<CustomToolInfo>),
    /// A tool on a standard connection held by the connection manager.
    Standard { server: String, tool_name: String },
}

impl ToolTarget {
    pub fn qualified_name(&self) -> QualifiedToolName {
        match self {
            ToolTarget::Custom(info) => info.qualified_name(),
            ToolTarget::Standard { server, tool_name } => {
                QualifiedToolName::new(server.clone(), tool_name.clone())
            }
        }
    }

    /// Name understood by the remote server.
    pub fn remote_name(&self) -> &str {
        match self {
            ToolTarget::Custom(info) => &info.original_name,
            ToolTarget::Standard { tool_name, .. } => tool_name,
        }
    }
}
