//! In-process counters for dispatch, retries, payload envelopes and connections.
//!
//! Nothing is exported; callers read a [`MetricsSnapshot`] or per-tool
//! [`LatencySnapshot`]s.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::inventory::QualifiedToolName;

#[derive(Default)]
struct Counter(AtomicU64);

impl Counter {
    fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero.
    fn decr(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn clear(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

#[derive(Default)]
pub struct McpMetrics {
    executions: Counter,
    succeeded: Counter,
    failed: Counter,
    in_flight: Counter,

    validation_retries: Counter,
    auth_retries: Counter,

    envelopes: Counter,
    upload_failures: Counter,

    connection_errors: Counter,
    open_connections: Counter,

    per_tool: DashMap<QualifiedToolName, Mutex<ToolLatency>>,
}

impl McpMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_execution_start(&self) {
        self.executions.incr();
        self.in_flight.incr();
    }

    /// `tool` is `None` when the name never resolved; such executions are
    /// counted but have no latency entry.
    pub fn record_execution_end(
        &self,
        tool: Option<&QualifiedToolName>,
        success: bool,
        duration_ms: u64,
    ) {
        self.in_flight.decr();
        if success {
            self.succeeded.incr();
        } else {
            self.failed.incr();
        }

        if let Some(tool) = tool {
            self.per_tool
                .entry(tool.clone())
                .or_default()
                .lock()
                .observe(duration_ms, success);
        }
    }

    pub fn record_validation_retry(&self) {
        self.validation_retries.incr();
    }

    pub fn record_auth_retry(&self) {
        self.auth_retries.incr();
    }

    pub fn record_envelope(&self) {
        self.envelopes.incr();
    }

    pub fn record_upload_failure(&self) {
        self.upload_failures.incr();
    }

    pub fn record_connection_error(&self) {
        self.connection_errors.incr();
    }

    pub fn record_connection_opened(&self) {
        self.open_connections.incr();
    }

    pub fn record_connection_closed(&self) {
        self.open_connections.decr();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_executions: self.executions.get(),
            successful_executions: self.succeeded.get(),
            failed_executions: self.failed.get(),
            active_executions: self.in_flight.get(),
            validation_retries: self.validation_retries.get(),
            auth_retries: self.auth_retries.get(),
            envelopes: self.envelopes.get(),
            upload_failures: self.upload_failures.get(),
            connection_errors: self.connection_errors.get(),
            active_connections: self.open_connections.get(),
        }
    }

    pub fn tool_latency(&self, tool: &QualifiedToolName) -> Option<LatencySnapshot> {
        self.per_tool.get(tool).map(|entry| entry.lock().snapshot())
    }

    /// Latency of every tool seen so far, ordered by qualified name.
    pub fn all_tool_latencies(&self) -> Vec<(QualifiedToolName, LatencySnapshot)> {
        let mut all: Vec<_> = self
            .per_tool
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().lock().snapshot()))
            .collect();
        all.sort_by_key(|(tool, _)| tool.to_string());
        all
    }

    /// Zero every counter. In-flight executions and open connections are
    /// gauges and survive.
    pub fn reset(&self) {
        for counter in [
            &self.executions,
            &self.succeeded,
            &self.failed,
            &self.validation_retries,
            &self.auth_retries,
            &self.envelopes,
            &self.upload_failures,
            &self.connection_errors,
        ] {
            counter.clear();
        }
        self.per_tool.clear();
    }
}

#[derive(Default)]
struct ToolLatency {
    calls: u64,
    failures: u64,
    total_ms: u64,
    fastest_ms: Option<u64>,
    slowest_ms: u64,
    last_ms: u64,
}

impl ToolLatency {
    fn observe(&mut self, ms: u64, success: bool) {
        self.calls += 1;
        if !success {
            self.failures += 1;
        }
        self.total_ms = self.total_ms.saturating_add(ms);
        self.fastest_ms = Some(self.fastest_ms.map_or(ms, |f| f.min(ms)));
        self.slowest_ms = self.slowest_ms.max(ms);
        self.last_ms = ms;
    }

    fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            count: self.calls,
            failures: self.failures,
            avg_ms: self.total_ms.checked_div(self.calls).unwrap_or(0),
            min_ms: self.fastest_ms.unwrap_or(0),
            max_ms: self.slowest_ms,
            last_ms: self.last_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub active_executions: u64,
    pub validation_retries: u64,
    pub auth_retries: u64,
    pub envelopes: u64,
    pub upload_failures: u64,
    pub connection_errors: u64,
    pub active_connections: u64,
}

impl MetricsSnapshot {
    /// Percentage of finished executions that succeeded; 100 before any finish.
    pub fn success_rate(&self) -> f64 {
        let finished = self.successful_executions + self.failed_executions;
        if finished == 0 {
            return 100.0;
        }
        self.successful_executions as f64 * 100.0 / finished as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LatencySnapshot {
    pub count: u64,
    /// Executions of this tool that ended in an error.
    pub failures: u64,
    pub avg_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub last_ms: u64,
}
