//! Caller-supplied tool name resolution.
//!
//! Names arrive as `provider:tool`, `mcp_provider_tool`, `custom_provider_tool`,
//! hyphenated or underscored. The resolver expands a name into an ordered
//! candidate list, matches it against registered custom tools, and falls back
//! to the tools exposed by standard connections. It never guesses between
//! two equally good matches.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use super::{
    registry::CustomToolRegistry,
    types::{QualifiedToolName, ToolTarget},
};
use crate::error::{McpError, McpResult};

static PREFIXED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:mcp|custom)_([^_]+)_(.+)$").unwrap());

/// Lookup of tools exposed by standard connections.
pub trait ToolLocator {
    /// Names of the connections whose enabled tool list contains `tool_name`,
    /// sorted.
    fn servers_exposing(&self, tool_name: &str) -> Vec<String>;
}

/// Expanded form of a caller-supplied name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameCandidates {
    /// Provider or server named by a routing prefix, if any.
    pub provider_hint: Option<String>,
    /// Candidate remote names, deduplicated, in first-seen order.
    pub names: Vec<String>,
}

impl NameCandidates {
    pub fn from_raw(raw: &str) -> Self {
        let raw = raw.trim();
        let mut provider_hint = None;
        let mut names = Vec::new();

        // provider:tool, or the qualified custom:provider:tool
        if let Some(qualified) = QualifiedToolName::parse(raw) {
            let provider = qualified
                .server_key
                .strip_prefix("custom:")
                .unwrap_or(&qualified.server_key);
            provider_hint = Some(provider.to_string());
            push_with_variants(&mut names, &qualified.tool_name);
        }

        // mcp_provider_tool / custom_provider_tool
        if let Some(caps) = PREFIXED_RE.captures(raw) {
            if provider_hint.is_none() {
                provider_hint = Some(caps[1].to_string());
            }
            push_with_variants(&mut names, &caps[2]);
        }

        push_with_variants(&mut names, raw);

        let mut seen = std::collections::HashSet::new();
        names.retain(|n| seen.insert(n.clone()));

        Self {
            provider_hint,
            names,
        }
    }

    /// Candidate most likely to be a remote name: the first containing a
    /// hyphen, else the first.
    pub fn remote_guess(&self) -> Option<&str> {
        self.names
            .iter()
            .find(|n| n.contains('-'))
            .or_else(|| self.names.first())
            .map(String::as_str)
    }
}

fn push_with_variants(names: &mut Vec<String>, name: &str) {
    names.push(name.to_string());
    if name.contains('-') {
        names.push(name.replace('-', "_"));
    }
    if name.contains('_') {
        names.push(name.replace('_', "-"));
    }
}

/// Result of resolving a caller-supplied name.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub requested: String,
    pub candidates: NameCandidates,
    pub target: ToolTarget,
}

impl Resolution {
    pub fn qualified_name(&self) -> QualifiedToolName {
        self.target.qualified_name()
    }
}

/// Resolve `raw` against the custom registry, then standard connections.
pub fn resolve(
    raw: &str,
    registry: &CustomToolRegistry,
    locator: &dyn ToolLocator,
) -> McpResult<Resolution> {
    let candidates = NameCandidates::from_raw(raw);
    debug!(
        tool = %raw,
        candidates = ?candidates.names,
        hint = ?candidates.provider_hint,
        "Resolving tool name"
    );

    if let Some(target) = resolve_custom(raw, &candidates, registry)? {
        return Ok(Resolution {
            requested: raw.to_string(),
            candidates,
            target,
        });
    }

    let target = resolve_standard(raw, &candidates, locator)?;
    Ok(Resolution {
        requested: raw.to_string(),
        candidates,
        target,
    })
}

fn resolve_custom(
    raw: &str,
    candidates: &NameCandidates,
    registry: &CustomToolRegistry,
) -> McpResult<Option<ToolTarget>> {
    for name in &candidates.names {
        let mut matches = registry.find_by_name(name);
        if matches.len() > 1 {
            if let Some(hint) = &candidates.provider_hint {
                matches.retain(|info| &info.provider == hint);
            }
        }
        match matches.len() {
            0 => continue,
            1 => {
                let info = matches.remove(0);
                debug!(tool = %raw, target = %info.key(), "Resolved to custom tool");
                return Ok(Some(ToolTarget::Custom(info)));
            }
            _ => {
                return Err(McpError::AmbiguousTool {
                    tool_name: raw.to_string(),
                    candidates: matches.iter().map(|i| i.key()).collect(),
                });
            }
        }
    }
    Ok(None)
}

fn resolve_standard(
    raw: &str,
    candidates: &NameCandidates,
    locator: &dyn ToolLocator,
) -> McpResult<ToolTarget> {
    let guess = candidates
        .remote_guess()
        .ok_or_else(|| McpError::ToolNotFound(raw.to_string()))?;

    let ordered = std::iter::once(guess).chain(
        candidates
            .names
            .iter()
            .map(String::as_str)
            .filter(|n| *n != guess),
    );

    for name in ordered {
        let mut servers = locator.servers_exposing(name);
        if servers.len() > 1 {
            if let Some(hint) = &candidates.provider_hint {
                if servers.iter().any(|s| s == hint) {
                    servers.retain(|s| s == hint);
                }
            }
        }
        match servers.len() {
            0 => continue,
            1 => {
                let server = servers.remove(0);
                debug!(tool = %raw, server = %server, remote = %name, "Resolved to standard tool");
                return Ok(ToolTarget::Standard {
                    server,
                    tool_name: name.to_string(),
                });
            }
            _ => {
                return Err(McpError::AmbiguousTool {
                    tool_name: raw.to_string(),
                    candidates: servers
                        .iter()
                        .map(|s| QualifiedToolName::new(s.clone(), name).to_string())
                        .collect(),
                });
            }
        }
    }

    Err(McpError::ToolNotFound(raw.to_string()))
}
