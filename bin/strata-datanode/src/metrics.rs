//! Per-operation metrics
//!
//! Every dispatched request is recorded under `"{cluster}_datanode_{OpName}"`.
//! Stream chunk reads are recorded separately under `"{cluster}_datanode_Read"`.

use dashmap::DashMap;
use std::fmt::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters for one metrics key
#[derive(Debug, Default)]
pub struct OpStats {
    pub requests_total: AtomicU64,
    pub requests_success: AtomicU64,
    pub requests_error: AtomicU64,
    pub latency_sum_us: AtomicU64,
}

impl OpStats {
    pub fn record(&self, elapsed: Duration, success: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.requests_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_error.fetch_add(1, Ordering::Relaxed);
        }
        self.latency_sum_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }
}

/// Point-in-time copy of one key's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpStatsSnapshot {
    pub total: u64,
    pub success: u64,
    pub error: u64,
    pub latency_sum_us: u64,
}

#[derive(Debug)]
pub struct OpMetrics {
    cluster_id: String,
    ops: DashMap<String, Arc<OpStats>>,
}

impl OpMetrics {
    #[must_use]
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            ops: DashMap::new(),
        }
    }

    /// Metrics key for an operation name
    #[must_use]
    pub fn key(&self, op_name: &str) -> String {
        format!("{}_datanode_{op_name}", self.cluster_id)
    }

    pub fn record(&self, key: &str, elapsed: Duration, success: bool) {
        if let Some(stats) = self.ops.get(key) {
            stats.record(elapsed, success);
            return;
        }
        let stats = Arc::clone(&self.ops.entry(key.to_string()).or_default());
        stats.record(elapsed, success);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<OpStatsSnapshot> {
        self.ops.get(key).map(|s| OpStatsSnapshot {
            total: s.requests_total.load(Ordering::Relaxed),
            success: s.requests_success.load(Ordering::Relaxed),
            error: s.requests_error.load(Ordering::Relaxed),
            latency_sum_us: s.latency_sum_us.load(Ordering::Relaxed),
        })
    }

    /// Export metrics in Prometheus text format
    #[must_use]
    pub fn export_prometheus(&self) -> String {
        let mut keys: Vec<String> = self.ops.iter().map(|e| e.key().clone()).collect();
        keys.sort();

        let mut output = String::with_capacity(256 * (keys.len() + 1));
        let _ = writeln!(
            output,
            "# HELP strata_datanode_requests_total Requests by operation key and status"
        );
        let _ = writeln!(output, "# TYPE strata_datanode_requests_total counter");
        for key in &keys {
            if let Some(s) = self.get(key) {
                let _ = writeln!(
                    output,
                    "strata_datanode_requests_total{{key=\"{key}\",status=\"success\"}} {}",
                    s.success
                );
                let _ = writeln!(
                    output,
                    "strata_datanode_requests_total{{key=\"{key}\",status=\"error\"}} {}",
                    s.error
                );
            }
        }

        let _ = writeln!(
            output,
            "# HELP strata_datanode_latency_seconds_sum Total request latency by operation key"
        );
        let _ = writeln!(output, "# TYPE strata_datanode_latency_seconds_sum counter");
        for key in &keys {
            if let Some(s) = self.get(key) {
                let _ = writeln!(
                    output,
                    "strata_datanode_latency_seconds_sum{{key=\"{key}\"}} {:.6}",
                    s.latency_sum_us as f64 / 1_000_000.0
                );
            }
        }
        output
    }
}
