/// Per-source counters for update jobs and challenge attempts
///
/// Tracks success rates, challenge outcomes and timing for each source

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetrics {
    pub source_id: String,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_skipped: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub average_job_time_ms: f64,
    pub total_job_time_ms: u64,
    /// Sessions reused after a successful probe
    pub session_reuses: u64,
    pub challenges_started: u64,
    pub challenges_solved: u64,
    pub challenges_failed: u64,
}

impl SourceMetrics {
    pub fn new(source_id: String) -> Self {
        Self {
            source_id,
            jobs_succeeded: 0,
            jobs_failed: 0,
            jobs_skipped: 0,
            last_success: None,
            last_failure: None,
            last_error: None,
            average_job_time_ms: 0.0,
            total_job_time_ms: 0,
            session_reuses: 0,
            challenges_started: 0,
            challenges_solved: 0,
            challenges_failed: 0,
        }
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.jobs_succeeded + self.jobs_failed;
        if total == 0 {
            0.0
        } else {
            (self.jobs_succeeded as f64 / total as f64) * 100.0
        }
    }

    pub fn record_success(&mut self, elapsed: Duration) {
        self.jobs_succeeded += 1;
        self.last_success = Some(Utc::now());

        self.total_job_time_ms += elapsed.as_millis() as u64;
        self.average_job_time_ms = self.total_job_time_ms as f64 / self.jobs_succeeded as f64;
    }

    pub fn record_failure(&mut self, error: String) {
        self.jobs_failed += 1;
        self.last_failure = Some(Utc::now());
        self.last_error = Some(error);
    }
}

/// Metrics shared by the queues and the challenge bridge
#[derive(Default)]
pub struct MetricsTracker {
    metrics: Mutex<HashMap<String, SourceMetrics>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, source_id: &str, f: impl FnOnce(&mut SourceMetrics) -> R) -> R {
        let mut metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        let source_metrics = metrics
            .entry(source_id.to_string())
            .or_insert_with(|| SourceMetrics::new(source_id.to_string()));
        f(source_metrics)
    }

    pub fn record_success(&self, source_id: &str, elapsed: Duration) {
        let rate = self.with(source_id, |m| {
            m.record_success(elapsed);
            m.success_rate()
        });
        log::debug!(
            "[{}] Job done in {}ms - Success rate: {:.2}%",
            source_id,
            elapsed.as_millis(),
            rate
        );
    }

    pub fn record_failure(&self, source_id: &str, error: String) {
        log::warn!("[{}] Job failed: {}", source_id, error);
        self.with(source_id, |m| m.record_failure(error));
    }

    pub fn record_skip(&self, source_id: &str) {
        self.with(source_id, |m| m.jobs_skipped += 1);
    }

    pub fn record_session_reuse(&self, source_id: &str) {
        self.with(source_id, |m| m.session_reuses += 1);
    }

    pub fn record_challenge_started(&self, source_id: &str) {
        self.with(source_id, |m| m.challenges_started += 1);
    }

    pub fn record_challenge_result(&self, source_id: &str, solved: bool) {
        self.with(source_id, |m| {
            if solved {
                m.challenges_solved += 1;
            } else {
                m.challenges_failed += 1;
            }
        });
    }

    pub fn get_metrics(&self, source_id: &str) -> Option<SourceMetrics> {
        let metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        metrics.get(source_id).cloned()
    }

    pub fn get_all_metrics(&self) -> Vec<SourceMetrics> {
        let metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<SourceMetrics> = metrics.values().cloned().collect();
        all.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        all
    }

    pub fn export_json(&self) -> String {
        serde_json::to_string_pretty(&self.get_all_metrics()).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = SourceMetrics::new("test_source".to_string());
        assert_eq!(metrics.source_id, "test_source");
        assert_eq!(metrics.jobs_succeeded, 0);
        assert_eq!(metrics.success_rate(), 0.0);
    }

    #[test]
    fn test_success_rate_calculation() {
        let mut metrics = SourceMetrics::new("test_source".to_string());

        metrics.record_success(Duration::from_millis(100));
        metrics.record_success(Duration::from_millis(200));
        metrics.record_failure("Error".to_string());

        assert_eq!(metrics.jobs_succeeded, 2);
        assert_eq!(metrics.jobs_failed, 1);
        assert_eq!(metrics.average_job_time_ms, 150.0);
        assert!((metrics.success_rate() - 66.66).abs() < 0.1);
    }

    #[test]
    fn test_tracker() {
        let tracker = MetricsTracker::new();

        tracker.record_success("source1", Duration::from_millis(100));
        tracker.record_failure("source2", "Error".to_string());
        tracker.record_challenge_started("source2");
        tracker.record_challenge_result("source2", false);

        let metrics1 = tracker.get_metrics("source1").unwrap();
        let metrics2 = tracker.get_metrics("source2").unwrap();

        assert_eq!(metrics1.success_rate(), 100.0);
        assert_eq!(metrics2.success_rate(), 0.0);
        assert_eq!(metrics2.challenges_started, 1);
        assert_eq!(metrics2.challenges_failed, 1);
        assert_eq!(metrics2.last_error.as_deref(), Some("Error"));

        assert_eq!(tracker.get_all_metrics().len(), 2);
    }
}
