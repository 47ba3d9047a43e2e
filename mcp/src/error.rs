//! Dispatch error types.
//!
//! Defines the error taxonomy for connection, resolution, execution,
//! validation, session and configuration failures, plus the single
//! text-based classifier used to decide retry eligibility.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

pub type McpResult<T> = Result<T, McpError>;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Ambiguous tool name '{tool_name}': matches {candidates:?}")]
    AmbiguousTool {
        tool_name: String,
        candidates: Vec<String>,
    },

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Invalid arguments: {0}")]
    Validation(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl McpError {
    /// Shorthand for the deadline failure of any bounded step.
    pub fn timeout() -> Self {
        McpError::Connection("timeout".to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            McpError::Connection(_) => ErrorKind::Connection,
            McpError::ToolNotFound(_) | McpError::AmbiguousTool { .. } => ErrorKind::NotFound,
            McpError::ToolExecution(msg) => match classify_error(msg) {
                ErrorKind::Other => ErrorKind::Execution,
                kind => kind,
            },
            McpError::Validation(_) => ErrorKind::Validation,
            McpError::Auth(_) => ErrorKind::Auth,
            McpError::Provider(_) | McpError::Config(_) | McpError::Yaml(_) => {
                ErrorKind::Configuration
            }
            McpError::Storage(_) | McpError::Io(_) => ErrorKind::Other,
            McpError::Http(e) => classify_error(&e.to_string()),
        }
    }
}

/// Coarse error category driving retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    NotFound,
    Execution,
    /// Argument shape mismatch; eligible for one corrected retry.
    Validation,
    /// Expired or rejected session; eligible for one refreshed retry.
    Auth,
    Configuration,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Connection => "connection",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Execution => "execution",
            ErrorKind::Validation => "validation",
            ErrorKind::Auth => "auth",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

static AUTH_STATUS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(401|410)\b").unwrap());

const AUTH_MARKERS: &[&str] = &[
    "unauthorized",
    "forbidden",
    "session expired",
    "expired session",
    "invalid session",
    "session is invalid",
    "session not found",
];

const VALIDATION_MARKERS: &[&str] = &[
    "error parsing arguments",
    "invalid_type",
    "missing required",
    "invalid arguments",
    "validation error",
    "required",
];

/// Classify remote error text.
///
/// Only error payloads should be passed here; successful tool output is never
/// inspected. Auth signatures win over validation signatures.
pub fn classify_error(text: &str) -> ErrorKind {
    let lower = text.to_lowercase();

    if AUTH_STATUS_RE.is_match(&lower) || AUTH_MARKERS.iter().any(|m| lower.contains(m)) {
        return ErrorKind::Auth;
    }

    if VALIDATION_MARKERS.iter().any(|m| lower.contains(m)) {
        return ErrorKind::Validation;
    }

    ErrorKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_validation_markers() {
        assert_eq!(
            classify_error("Error parsing arguments for tool send_email"),
            ErrorKind::Validation
        );
        assert_eq!(
            classify_error(r#"[{"code":"invalid_type","path":["to"]}]"#),
            ErrorKind::Validation
        );
        assert_eq!(
            classify_error("Missing required parameter: subject"),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_classify_auth_markers() {
        assert_eq!(classify_error("HTTP 401 returned"), ErrorKind::Auth);
        assert_eq!(classify_error("status: 410 Gone"), ErrorKind::Auth);
        assert_eq!(classify_error("Session expired, please retry"), ErrorKind::Auth);
        assert_eq!(classify_error("Forbidden"), ErrorKind::Auth);
    }

    #[test]
    fn test_classify_auth_wins_over_validation() {
        assert_eq!(
            classify_error("401: authentication required"),
            ErrorKind::Auth
        );
    }

    #[test]
    fn test_classify_status_needs_word_boundary() {
        assert_eq!(classify_error("processed 4010 rows"), ErrorKind::Other);
        assert_eq!(classify_error("upstream returned 500"), ErrorKind::Other);
    }

    #[test]
    fn test_error_kind_from_execution_message() {
        let err = McpError::ToolExecution("invalid_type at path 'to'".to_string());
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = McpError::ToolExecution("boom".to_string());
        assert_eq!(err.kind(), ErrorKind::Execution);

        assert_eq!(McpError::timeout().kind(), ErrorKind::Connection);
        assert_eq!(
            McpError::Config("missing url".to_string()).kind(),
            ErrorKind::Configuration
        );
    }
}
