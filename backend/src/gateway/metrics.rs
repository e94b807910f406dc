//! Per-model invocation metrics.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// How a request reached the model layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    Realtime,
    Batch,
    Stream,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Realtime => "realtime",
            Self::Batch => "batch",
            Self::Stream => "stream",
        }
    }
}

/// Outcome of one execution, as seen by the metrics reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    CacheHit,
    Success,
    Failure,
}

/// Counters for one (model, mode) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelStats {
    pub requests: u64,
    pub cache_hits: u64,
    pub invocations: u64,
    pub failures: u64,
    pub total_latency_ms: u64,
    pub max_latency_ms: u64,
}

impl ModelStats {
    /// Mean latency of actual model invocations.
    pub fn average_latency_ms(&self) -> u64 {
        if self.invocations == 0 {
            0
        } else {
            self.total_latency_ms / self.invocations
        }
    }
}

/// Snapshot row returned by [`Metrics::snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatsEntry {
    pub model: String,
    pub mode: DeliveryMode,
    #[serde(flatten)]
    pub stats: ModelStats,
}

/// Aggregates counts and latencies per model and delivery mode.
#[derive(Default)]
pub struct Metrics {
    stats: Mutex<BTreeMap<(String, DeliveryMode), ModelStats>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one execution.
    pub fn record(&self, model: &str, mode: DeliveryMode, outcome: Outcome, latency: Duration) {
        let latency_ms = latency.as_millis() as u64;
        let mut stats = match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = stats.entry((model.to_string(), mode)).or_default();
        entry.requests += 1;
        match outcome {
            Outcome::CacheHit => entry.cache_hits += 1,
            Outcome::Success | Outcome::Failure => {
                entry.invocations += 1;
                entry.total_latency_ms += latency_ms;
                entry.max_latency_ms = entry.max_latency_ms.max(latency_ms);
                if outcome == Outcome::Failure {
                    entry.failures += 1;
                }
            }
        }
    }

    /// Current counters, sorted by model then mode.
    pub fn snapshot(&self) -> Vec<ModelStatsEntry> {
        let stats = match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        stats
            .iter()
            .map(|((model, mode), stats)| ModelStatsEntry {
                model: model.clone(),
                mode: *mode,
                stats: stats.clone(),
            })
            .collect()
    }

    /// Counters for a single model and mode.
    pub fn get(&self, model: &str, mode: DeliveryMode) -> ModelStats {
        self.snapshot()
            .into_iter()
            .find(|e| e.model == model && e.mode == mode)
            .map(|e| e.stats)
            .unwrap_or_default()
    }

    /// Render the counters in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();

        let series: [(&str, &str, &str, fn(&ModelStats) -> u64); 6] = [
            ("gateway_requests_total", "counter", "Requests per model and mode", |s| s.requests),
            ("gateway_cache_hits_total", "counter", "Requests served from the cache", |s| s.cache_hits),
            ("gateway_invocations_total", "counter", "Model invocations", |s| s.invocations),
            ("gateway_failures_total", "counter", "Failed model invocations", |s| s.failures),
            ("gateway_latency_ms_sum", "counter", "Total model invocation latency", |s| s.total_latency_ms),
            ("gateway_latency_ms_max", "gauge", "Slowest model invocation", |s| s.max_latency_ms),
        ];

        for (name, kind, help, value) in series {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} {}", name, kind);
            for entry in &snapshot {
                let _ = writeln!(
                    out,
                    "{}{{model=\"{}\",mode=\"{}\"}} {}",
                    name,
                    entry.model,
                    entry.mode.as_str(),
                    value(&entry.stats)
                );
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_by_outcome() {
        let metrics = Metrics::new();
        metrics.record("job-matching", DeliveryMode::Realtime, Outcome::Success, Duration::from_millis(40));
        metrics.record("job-matching", DeliveryMode::Realtime, Outcome::CacheHit, Duration::ZERO);
        metrics.record("job-matching", DeliveryMode::Realtime, Outcome::Failure, Duration::from_millis(100));

        let stats = metrics.get("job-matching", DeliveryMode::Realtime);
        assert_eq!(stats.requests, 3);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.invocations, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.max_latency_ms, 100);
        assert_eq!(stats.average_latency_ms(), 70);
    }

    #[test]
    fn test_modes_are_tracked_separately() {
        let metrics = Metrics::new();
        metrics.record("skills-extraction", DeliveryMode::Batch, Outcome::Success, Duration::from_millis(5));
        metrics.record("skills-extraction", DeliveryMode::Stream, Outcome::Success, Duration::from_millis(5));

        assert_eq!(metrics.get("skills-extraction", DeliveryMode::Batch).requests, 1);
        assert_eq!(metrics.get("skills-extraction", DeliveryMode::Stream).requests, 1);
        assert_eq!(metrics.get("skills-extraction", DeliveryMode::Realtime).requests, 0);
        assert_eq!(metrics.snapshot().len(), 2);
    }

    #[test]
    fn test_render_prometheus() {
        let metrics = Metrics::new();
        metrics.record("semantic-similarity", DeliveryMode::Realtime, Outcome::Success, Duration::from_millis(12));

        let text = metrics.render_prometheus();
        assert!(text.contains("# TYPE gateway_requests_total counter"));
        assert!(text.contains(r#"gateway_requests_total{model="semantic-similarity",mode="realtime"} 1"#));
        assert!(text.contains(r#"gateway_latency_ms_max{model="semantic-similarity",mode="realtime"} 12"#));
    }
}
