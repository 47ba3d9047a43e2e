//! Session affinity for credential-broker calls.
//!
//! Caches one short-lived session token per logical caller thread so that
//! otherwise stateless HTTP calls to the broker stay correlated. Tokens come
//! from a [`SessionIssuer`]; an issuance failure means the call proceeds
//! without a session header.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::config::SessionConfig;
use crate::error::{McpError, McpResult};

/// Short-lived session issued by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    pub id: String,
    /// Lifetime in seconds. `None` means valid until invalidated.
    #[serde(default)]
    pub ttl: Option<u64>,
    #[serde(skip, default = "Utc::now")]
    pub issued_at: DateTime<Utc>,
}

impl SessionToken {
    pub fn new(id: impl Into<String>, ttl: Option<u64>) -> Self {
        Self {
            id: id.into(),
            ttl,
            issued_at: Utc::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.ttl {
            Some(secs) => i64::try_from(secs)
                .ok()
                .and_then(ChronoDuration::try_seconds)
                .and_then(|ttl| self.issued_at.checked_add_signed(ttl))
                .is_some_and(|deadline| Utc::now() >= deadline),
            None => false,
        }
    }
}

/// External collaborator issuing sessions.
#[async_trait]
pub trait SessionIssuer: Send + Sync {
    async fn issue(&self, refresh: bool) -> McpResult<SessionToken>;
}

/// Issues sessions by POSTing to a broker endpoint that answers `{id, ttl}`.
pub struct HttpSessionIssuer {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpSessionIssuer {
    pub fn new(url: impl Into<String>, token: Option<String>) -> McpResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| McpError::Config(format!("build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            token,
        })
    }

    /// Issuer described by configuration, if an issuer URL is set.
    pub fn from_config(config: &SessionConfig) -> McpResult<Option<Self>> {
        config
            .issuer_url
            .as_ref()
            .map(|url| Self::new(url.clone(), config.issuer_token.clone()))
            .transpose()
    }
}

#[async_trait]
impl SessionIssuer for HttpSessionIssuer {
    async fn issue(&self, refresh: bool) -> McpResult<SessionToken> {
        let mut request = self.client.post(&self.url).json(&json!({ "refresh": refresh }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Auth(format!(
                "session issuer returned {}",
                status.as_u16()
            )));
        }

        let mut token: SessionToken = response.json().await?;
        token.issued_at = Utc::now();
        Ok(token)
    }
}

/// Per-thread session cache.
pub struct SessionAffinity {
    cache: DashMap<String, SessionToken>,
    issuer: Option<Arc<dyn SessionIssuer>>,
    header: String,
}

impl SessionAffinity {
    pub fn new(issuer: Option<Arc<dyn SessionIssuer>>, header: impl Into<String>) -> Self {
        Self {
            cache: DashMap::new(),
            issuer,
            header: header.into(),
        }
    }

    /// Request header the session id travels in.
    pub fn header_name(&self) -> &str {
        &self.header
    }

    /// Session to attach for `thread_id`.
    ///
    /// Reuses a live cached token unless `force_refresh`. Without a thread id
    /// a fresh token is issued and not cached. Returns `None` when no issuer
    /// is configured or issuance fails.
    pub async fn session_for(
        &self,
        thread_id: Option<&str>,
        force_refresh: bool,
    ) -> Option<SessionToken> {
        let issuer = self.issuer.as_ref()?;

        if let Some(thread) = thread_id {
            if force_refresh {
                self.invalidate(thread);
            } else if let Some(cached) = self.cached(thread) {
                debug!(thread = %thread, "Reusing cached session");
                return Some(cached);
            }
        }

        match issuer.issue(force_refresh).await {
            Ok(token) => {
                if let Some(thread) = thread_id {
                    self.cache.insert(thread.to_string(), token.clone());
                }
                debug!(thread = ?thread_id, refresh = force_refresh, "Issued session");
                Some(token)
            }
            Err(e) => {
                warn!(thread = ?thread_id, error = %e, "Session issuance failed, continuing without session");
                None
            }
        }
    }

    fn cached(&self, thread_id: &str) -> Option<SessionToken> {
        let token = self.cache.get(thread_id)?.value().clone();
        if token.is_expired() {
            self.cache.remove(thread_id);
            return None;
        }
        Some(token)
    }

    pub fn invalidate(&self, thread_id: &str) {
        if self.cache.remove(thread_id).is_some() {
            debug!(thread = %thread_id, "Invalidated session");
        }
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Issuer handing out sequential ids `<prefix>-1`, `<prefix>-2`, ...
///
/// Useful for tests and dry runs.
pub struct SequentialSessionIssuer {
    prefix: String,
    ttl: Option<u64>,
    issued: AtomicU64,
    fail: bool,
}

impl SequentialSessionIssuer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ttl: None,
            issued: AtomicU64::new(0),
            fail: false,
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Issuer whose every request fails.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SessionIssuer for SequentialSessionIssuer {
    async fn issue(&self, _refresh: bool) -> McpResult<SessionToken> {
        if self.fail {
            return Err(McpError::Auth("session issuer unavailable".to_string()));
        }
        let n = self.issued.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(SessionToken::new(format!("{}-{}", self.prefix, n), self.ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn affinity(issuer: Arc<SequentialSessionIssuer>) -> SessionAffinity {
        SessionAffinity::new(Some(issuer), "X-Session-Id")
    }

    #[tokio::test]
    async fn test_reuses_cached_session_per_thread() {
        let issuer = Arc::new(SequentialSessionIssuer::new("s"));
        let sessions = affinity(issuer.clone());

        let a1 = sessions.session_for(Some("thread-a"), false).await.unwrap();
        let a2 = sessions.session_for(Some("thread-a"), false).await.unwrap();
        let b1 = sessions.session_for(Some("thread-b"), false).await.unwrap();

        assert_eq!(a1.id, "s-1");
        assert_eq!(a2.id, "s-1");
        assert_eq!(b1.id, "s-2");
        assert_eq!(issuer.issued(), 2);
        assert_eq!(sessions.len(), 2);
    }

    #[tokio::test]
    async fn test_force_refresh_replaces_session() {
        let issuer = Arc::new(SequentialSessionIssuer::new("s"));
        let sessions = affinity(issuer.clone());

        sessions.session_for(Some("t"), false).await.unwrap();
        let refreshed = sessions.session_for(Some("t"), true).await.unwrap();
        assert_eq!(refreshed.id, "s-2");

        let again = sessions.session_for(Some("t"), false).await.unwrap();
        assert_eq!(again.id, "s-2");
    }

    #[tokio::test]
    async fn test_no_thread_disables_caching() {
        let issuer = Arc::new(SequentialSessionIssuer::new("s"));
        let sessions = affinity(issuer.clone());

        let first = sessions.session_for(None, false).await.unwrap();
        let second = sessions.session_for(None, false).await.unwrap();
        assert_ne!(first.id, second.id);
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn test_expired_session_is_reissued() {
        let issuer = Arc::new(SequentialSessionIssuer::new("s").with_ttl(0));
        let sessions = affinity(issuer.clone());

        sessions.session_for(Some("t"), false).await.unwrap();
        let next = sessions.session_for(Some("t"), false).await.unwrap();
        assert_eq!(next.id, "s-2");
    }

    #[tokio::test]
    async fn test_issuer_failure_yields_none() {
        let issuer = Arc::new(SequentialSessionIssuer::new("s").failing());
        let sessions = affinity(issuer);
        assert!(sessions.session_for(Some("t"), false).await.is_none());

        let without_issuer = SessionAffinity::new(None, "X-Session-Id");
        assert!(without_issuer.session_for(Some("t"), false).await.is_none());
    }

    #[test]
    fn test_token_deserialize() {
        let token: SessionToken = serde_json::from_str(r#"{"id": "abc", "ttl": 60}"#).unwrap();
        assert_eq!(token.id, "abc");
        assert_eq!(token.ttl, Some(60));
        assert!(!token.is_expired());

        let token: SessionToken = serde_json::from_str(r#"{"id": "abc"}"#).unwrap();
        assert!(token.ttl.is_none());
    }
}
