//! # Health & Cost Trackers (C7)
//!
//! Append-only newest-first logs with retention pruning on insert (spec.md
//! §4.7). Grounded on the teacher's `ProviderMetrics` aggregation style, but
//! specified as explicit rolling records rather than an exponential moving
//! average, per spec.md §3/§4.7/§6.

use crate::pricing;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const HEALTH_RECORD_CAP: usize = 100;
const COST_RECORD_CAP: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub provider: String,
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: Option<u64>,
    pub details: String,
}

/// Newest-first log of [`HealthRecord`]s, capped at 100 and pruned by
/// retention on every insert (spec.md §3).
pub struct HealthTracker {
    records: Vec<HealthRecord>,
    retention: Duration,
}

impl HealthTracker {
    pub fn new(retention: Duration) -> Self {
        Self {
            records: Vec::new(),
            retention,
        }
    }

    pub fn record_success(&mut self, provider: &str, latency_ms: u64) {
        self.push(HealthRecord {
            provider: provider.to_string(),
            status: HealthStatus::Healthy,
            timestamp: Utc::now(),
            latency_ms: Some(latency_ms),
            details: String::new(),
        });
    }

    pub fn record_failure(&mut self, provider: &str, details: impl Into<String>) {
        self.push(HealthRecord {
            provider: provider.to_string(),
            status: HealthStatus::Unhealthy,
            timestamp: Utc::now(),
            latency_ms: None,
            details: details.into(),
        });
    }

    fn push(&mut self, record: HealthRecord) {
        self.records.insert(0, record);
        self.records.truncate(HEALTH_RECORD_CAP);
        let cutoff = Utc::now() - chrono::Duration::from_std(self.retention).unwrap_or_default();
        self.records.retain(|r| r.timestamp >= cutoff);
    }

    /// Aggregate over a provider's records: uptime %, mean latency, recent
    /// error count (spec.md §4.7, surfaced via `health_status()`).
    pub fn summary(&self, provider: &str) -> ProviderHealthSummary {
        let records: Vec<&HealthRecord> =
            self.records.iter().filter(|r| r.provider == provider).collect();

        if records.is_empty() {
            return ProviderHealthSummary {
                status: HealthStatus::Unknown,
                last_check: None,
                uptime_pct: 100.0,
                avg_latency_ms: 0.0,
                recent_errors: 0,
            };
        }

        let healthy = records
            .iter()
            .filter(|r| r.status == HealthStatus::Healthy)
            .count();
        let uptime_pct = 100.0 * healthy as f64 / records.len() as f64;

        let latencies: Vec<u64> = records.iter().filter_map(|r| r.latency_ms).collect();
        let avg_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
        };

        let recent_errors = records
            .iter()
            .filter(|r| r.status != HealthStatus::Healthy)
            .count();

        let status = if records[0].status == HealthStatus::Healthy {
            HealthStatus::Healthy
        } else if uptime_pct >= 50.0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        ProviderHealthSummary {
            status,
            last_check: Some(records[0].timestamp),
            uptime_pct,
            avg_latency_ms,
            recent_errors,
        }
    }

    pub fn all_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .records
            .iter()
            .map(|r| r.provider.clone())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        names.sort();
        names
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealthSummary {
    pub status: HealthStatus,
    pub last_check: Option<DateTime<Utc>>,
    pub uptime_pct: f64,
    pub avg_latency_ms: f64,
    pub recent_errors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CostFilter {
    pub since: Option<DateTime<Utc>>,
    pub provider: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostSummary {
    pub total_cost: f64,
    pub record_count: usize,
    pub by_provider: HashMap<String, f64>,
    pub by_model: HashMap<String, f64>,
    pub token_usage: u64,
    pub avg_cost_per_request: f64,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

/// Newest-first log of [`CostRecord`]s, capped at 1000 (spec.md §3).
pub struct CostTracker {
    records: Vec<CostRecord>,
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CostTracker {
    pub fn new() -> Self {
        Self { records: Vec::new() }
    }

    pub fn record(&mut self, provider: &str, model: &str, prompt_tokens: u32, completion_tokens: u32) {
        let cost = pricing::cost_for(provider, model, prompt_tokens, completion_tokens);
        self.records.insert(
            0,
            CostRecord {
                provider: provider.to_string(),
                model: model.to_string(),
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
                cost,
                timestamp: Utc::now(),
            },
        );
        self.records.truncate(COST_RECORD_CAP);
    }

    pub fn summary(&self, filter: &CostFilter) -> CostSummary {
        let filtered: Vec<&CostRecord> = self
            .records
            .iter()
            .filter(|r| filter.since.map_or(true, |since| r.timestamp >= since))
            .filter(|r| filter.provider.as_deref().map_or(true, |p| r.provider == p))
            .filter(|r| filter.model.as_deref().map_or(true, |m| r.model == m))
            .collect();

        let mut by_provider: HashMap<String, f64> = HashMap::new();
        let mut by_model: HashMap<String, f64> = HashMap::new();
        let mut total_cost = 0.0;
        let mut token_usage = 0u64;

        for r in &filtered {
            total_cost += r.cost;
            token_usage += r.total_tokens as u64;
            *by_provider.entry(r.provider.clone()).or_insert(0.0) += r.cost;
            *by_model.entry(r.model.clone()).or_insert(0.0) += r.cost;
        }

        let time_range = match (filtered.last(), filtered.first()) {
            (Some(oldest), Some(newest)) => Some((oldest.timestamp, newest.timestamp)),
            _ => None,
        };

        CostSummary {
            total_cost,
            record_count: filtered.len(),
            by_provider,
            by_model,
            token_usage,
            avg_cost_per_request: if filtered.is_empty() {
                0.0
            } else {
                total_cost / filtered.len() as f64
            },
            time_range,
        }
    }

    /// CSV export per spec.md §6: header
    /// `Timestamp,Provider,Model,Prompt Tokens,Completion Tokens,Total Tokens,Cost`,
    /// rows oldest-first, cost rounded to 4 decimal places.
    pub fn to_csv(&self) -> String {
        let mut out = String::from(
            "Timestamp,Provider,Model,Prompt Tokens,Completion Tokens,Total Tokens,Cost\n",
        );
        for r in self.records.iter().rev() {
            out.push_str(&format!(
                "{},{},{},{},{},{},{:.4}\n",
                r.timestamp.to_rfc3339(),
                r.provider,
                r.model,
                r.prompt_tokens,
                r.completion_tokens,
                r.total_tokens,
                r.cost
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_summary_unknown_with_no_records() {
        let tracker = HealthTracker::new(Duration::from_secs(3600));
        let summary = tracker.summary("openai");
        assert_eq!(summary.status, HealthStatus::Unknown);
    }

    #[test]
    fn three_failures_mark_unhealthy_summary() {
        let mut tracker = HealthTracker::new(Duration::from_secs(3600));
        for _ in 0..3 {
            tracker.record_failure("openai", "boom");
        }
        let summary = tracker.summary("openai");
        assert_eq!(summary.status, HealthStatus::Unhealthy);
        assert_eq!(summary.recent_errors, 3);
    }

    #[test]
    fn cost_tracker_scenario_1() {
        let mut tracker = CostTracker::new();
        tracker.record("openai", "gpt-4", 1, 1);
        let summary = tracker.summary(&CostFilter::default());
        assert_eq!(summary.record_count, 1);
        assert!((summary.total_cost - 0.00009).abs() < 1e-9);
    }

    #[test]
    fn csv_export_has_expected_header_and_rounding() {
        let mut tracker = CostTracker::new();
        tracker.record("openai", "gpt-4", 1000, 1000);
        let csv = tracker.to_csv();
        assert!(csv.starts_with(
            "Timestamp,Provider,Model,Prompt Tokens,Completion Tokens,Total Tokens,Cost\n"
        ));
        assert!(csv.contains("0.0900"));
    }

    #[test]
    fn summary_filters_by_provider() {
        let mut tracker = CostTracker::new();
        tracker.record("openai", "gpt-4", 1, 1);
        tracker.record("anthropic", "claude-3-haiku", 1, 1);
        let filter = CostFilter {
            provider: Some("openai".to_string()),
            ..Default::default()
        };
        let summary = tracker.summary(&filter);
        assert_eq!(summary.record_count, 1);
    }
}
