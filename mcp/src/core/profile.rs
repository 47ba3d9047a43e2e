//! Credential profile lookup.
//!
//! A profile id maps to a connection URL and the headers it needs. The
//! engine asks for it right before opening a broker connection and never
//! keeps the result beyond that connection.

use std::collections::HashMap;

use async_trait::async_trait;

use super::config::ProfileConfig;
use crate::error::{McpError, McpResult};

#[async_trait]
pub trait ProfileResolver: Send + Sync {
    async fn resolve(&self, profile_id: &str) -> McpResult<ProfileConfig>;
}

/// Profiles declared in configuration.
#[derive(Debug, Default, Clone)]
pub struct StaticProfileResolver {
    profiles: HashMap<String, ProfileConfig>,
}

impl StaticProfileResolver {
    pub fn new(profiles: HashMap<String, ProfileConfig>) -> Self {
        Self { profiles }
    }

    #[must_use]
    pub fn with_profile(mut self, id: impl Into<String>, profile: ProfileConfig) -> Self {
        self.profiles.insert(id.into(), profile);
        self
    }
}

#[async_trait]
impl ProfileResolver for StaticProfileResolver {
    async fn resolve(&self, profile_id: &str) -> McpResult<ProfileConfig> {
        let profile = self
            .profiles
            .get(profile_id)
            .ok_or_else(|| McpError::Provider(format!("unknown profile '{}'", profile_id)))?;
        if profile.url.trim().is_empty() {
            return Err(McpError::Provider(format!(
                "profile '{}' has no url",
                profile_id
            )));
        }
        Ok(profile.clone())
    }
}
