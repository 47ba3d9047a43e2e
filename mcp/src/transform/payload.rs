//! Payload post-processing for oversized results.
//!
//! Small results pass through. Large ones are replaced by an envelope with a
//! summary, a preview and, when a blob store is configured, a reference to
//! the full payload. Persistence is best-effort.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{core::config::PayloadConfig, storage::BlobStore};

/// Bounded stand-in for a large result.
#[derive(Debug, Clone, Serialize)]
pub struct PayloadEnvelope {
    pub tool_name: String,
    pub summary: PayloadSummary,
    pub preview: Value,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageRef {
    pub bucket: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    List,
    Object,
    Text,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayloadSummary {
    pub kind: PayloadKind,
    pub bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<usize>,
    /// Object keys, or the union of keys of list items (columns).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sample_keys: Vec<String>,
}

/// Outcome of post-processing one result.
#[derive(Debug, Clone)]
pub struct Processed {
    pub content: Value,
    pub enveloped: bool,
    pub upload_failed: bool,
}

/// Content coerced for inspection.
enum Shaped {
    Structured(Value),
    Text(String),
}

pub struct PayloadProcessor {
    config: PayloadConfig,
    store: Option<Arc<dyn BlobStore>>,
    upload_timeout: Duration,
}

impl PayloadProcessor {
    pub fn new(
        config: PayloadConfig,
        store: Option<Arc<dyn BlobStore>>,
        upload_timeout: Duration,
    ) -> Self {
        Self {
            config,
            store,
            upload_timeout,
        }
    }

    pub async fn process(&self, tool_name: &str, content: Value) -> Processed {
        let shaped = shape(content);
        let serialized = match &shaped {
            Shaped::Structured(v) => serde_json::to_string(v).unwrap_or_default(),
            Shaped::Text(s) => s.clone(),
        };

        if !self.is_large(&shaped, serialized.len()) {
            return Processed {
                content: match shaped {
                    Shaped::Structured(v) => v,
                    Shaped::Text(s) => Value::String(s),
                },
                enveloped: false,
                upload_failed: false,
            };
        }

        let summary = self.summarize(&shaped, serialized.len());
        let preview = self.preview(&shaped);
        debug!(
            tool = %tool_name,
            bytes = serialized.len(),
            kind = ?summary.kind,
            "Wrapping large result in envelope"
        );

        let content_type = match shaped {
            Shaped::Structured(_) => "application/json",
            Shaped::Text(_) => "text/plain; charset=utf-8",
        };
        let (storage, upload_failed) = self.persist(tool_name, serialized, content_type).await;

        let envelope = PayloadEnvelope {
            tool_name: tool_name.to_string(),
            summary,
            preview,
            truncated: true,
            storage,
        };

        Processed {
            content: serde_json::to_value(&envelope).unwrap_or(Value::Null),
            enveloped: true,
            upload_failed,
        }
    }

    fn is_large(&self, shaped: &Shaped, bytes: usize) -> bool {
        if bytes >= self.config.max_bytes {
            return true;
        }
        match shaped {
            Shaped::Structured(Value::Array(items)) => items.len() > self.config.max_items,
            Shaped::Structured(Value::Object(map)) => map.len() > self.config.max_items,
            Shaped::Structured(_) => false,
            Shaped::Text(s) => s.matches('\n').count() > self.config.max_newlines,
        }
    }

    fn summarize(&self, shaped: &Shaped, bytes: usize) -> PayloadSummary {
        let mut summary = PayloadSummary {
            kind: PayloadKind::Text,
            bytes,
            items: None,
            keys: None,
            chars: None,
            lines: None,
            sample_keys: Vec::new(),
        };
        match shaped {
            Shaped::Structured(Value::Array(items)) => {
                summary.kind = PayloadKind::List;
                summary.items = Some(items.len());
                summary.sample_keys = self.columns(items);
            }
            Shaped::Structured(Value::Object(map)) => {
                summary.kind = PayloadKind::Object;
                summary.keys = Some(map.len());
                summary.sample_keys = map.keys().take(self.config.sample_keys).cloned().collect();
            }
            Shaped::Structured(other) => {
                summary.chars = Some(other.to_string().chars().count());
            }
            Shaped::Text(s) => {
                summary.chars = Some(s.chars().count());
                summary.lines = Some(s.lines().count());
            }
        }
        summary
    }

    /// First-seen keys across object items, capped at `sample_keys`.
    fn columns(&self, items: &[Value]) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for item in items {
            let Value::Object(map) = item else { continue };
            for key in map.keys() {
                if columns.len() >= self.config.sample_keys {
                    return columns;
                }
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        columns
    }

    fn preview(&self, shaped: &Shaped) -> Value {
        match shaped {
            Shaped::Structured(Value::Array(items)) => Value::Array(
                items
                    .iter()
                    .take(self.config.preview_items)
                    .cloned()
                    .collect(),
            ),
            Shaped::Structured(Value::Object(map)) => Value::Object(
                map.iter()
                    .take(self.config.preview_items)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Map<String, Value>>(),
            ),
            Shaped::Structured(other) => {
                Value::String(other.to_string().chars().take(self.config.preview_chars).collect())
            }
            Shaped::Text(s) => Value::String(s.chars().take(self.config.preview_chars).collect()),
        }
    }

    async fn persist(
        &self,
        tool_name: &str,
        serialized: String,
        content_type: &str,
    ) -> (Option<StorageRef>, bool) {
        let Some(store) = &self.store else {
            return (None, false);
        };
        let bucket = self.config.bucket.clone();

        let upload = store.put(&bucket, serialized.into_bytes(), content_type);
        match tokio::time::timeout(self.upload_timeout, upload).await {
            Ok(Ok(url)) => (Some(StorageRef { bucket, url }), false),
            Ok(Err(e)) => {
                warn!(tool = %tool_name, error = %e, "Failed to persist large result");
                (None, true)
            }
            Err(_) => {
                warn!(tool = %tool_name, "Timed out persisting large result");
                (None, true)
            }
        }
    }
}

fn shape(content: Value) -> Shaped {
    match content {
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(parsed @ (Value::Array(_) | Value::Object(_))) => Shaped::Structured(parsed),
            _ => Shaped::Text(s),
        },
        Value::Array(_) | Value::Object(_) => Shaped::Structured(content),
        scalar => Shaped::Structured(scalar),
    }
}
