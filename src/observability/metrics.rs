//! Thread-safe metrics collection
//!
//! Atomic counters for high-frequency events and mutex-protected collections
//! for duration samples and per-stage statistics.

use crate::agents::AgentType;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Samples kept per duration series
const MAX_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    tasks_submitted: AtomicU64,
    submissions_rejected: AtomicU64,
    tasks_running: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_timed_out: AtomicU64,
    tasks_canceled: AtomicU64,

    config_writes: AtomicU64,
    concurrency_conflicts: AtomicU64,

    // Task durations in milliseconds, terminal tasks only
    task_durations: Mutex<Vec<u64>>,
    stage_stats: Mutex<HashMap<AgentType, StageStats>>,

    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            tasks_submitted: AtomicU64::new(0),
            submissions_rejected: AtomicU64::new(0),
            tasks_running: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            tasks_timed_out: AtomicU64::new(0),
            tasks_canceled: AtomicU64::new(0),
            config_writes: AtomicU64::new(0),
            concurrency_conflicts: AtomicU64::new(0),
            task_durations: Mutex::new(Vec::new()),
            stage_stats: Mutex::new(HashMap::new()),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Task metrics
    pub fn task_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
        self.tasks_running.fetch_add(1, Ordering::Relaxed);
    }

    pub fn submission_rejected(&self) {
        self.submissions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_completed(&self, duration: Duration) {
        self.task_finished(&self.tasks_completed, duration);
    }

    pub fn task_failed(&self, duration: Duration) {
        self.task_finished(&self.tasks_failed, duration);
    }

    pub fn task_timed_out(&self, duration: Duration) {
        self.task_finished(&self.tasks_timed_out, duration);
    }

    pub fn task_canceled(&self, duration: Duration) {
        self.task_finished(&self.tasks_canceled, duration);
    }

    fn task_finished(&self, counter: &AtomicU64, duration: Duration) {
        counter.fetch_add(1, Ordering::Relaxed);
        // Saturating: reset() may zero the gauge while tasks are still running
        let _ = self
            .tasks_running
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
        if let Ok(mut durations) = self.task_durations.lock() {
            push_sample(&mut durations, duration);
        }
    }

    // Stage metrics
    pub fn stage_executed(&self, stage: AgentType, duration: Duration, success: bool) {
        if let Ok(mut stats) = self.stage_stats.lock() {
            let entry = stats.entry(stage).or_default();
            entry.executions += 1;
            if !success {
                entry.failures += 1;
            }
            push_sample(&mut entry.execution_times, duration);
        }
    }

    pub fn stage_timed_out(&self, stage: AgentType) {
        if let Ok(mut stats) = self.stage_stats.lock() {
            stats.entry(stage).or_default().timeouts += 1;
        }
    }

    // Config metrics
    pub fn config_written(&self) {
        self.config_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn concurrency_conflict(&self) {
        self.concurrency_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.tasks_submitted,
            &self.submissions_rejected,
            &self.tasks_running,
            &self.tasks_completed,
            &self.tasks_failed,
            &self.tasks_timed_out,
            &self.tasks_canceled,
            &self.config_writes,
            &self.concurrency_conflicts,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        if let Ok(mut durations) = self.task_durations.lock() {
            durations.clear();
        }
        if let Ok(mut stats) = self.stage_stats.lock() {
            stats.clear();
        }
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
    }

    fn duration_statistics(&self) -> (f64, f64, f64, f64) {
        let Ok(durations) = self.task_durations.lock() else {
            return (0.0, 0.0, 0.0, 0.0);
        };
        if durations.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }
        let mut sorted = durations.clone();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (
            avg,
            percentile(&sorted, 50.0),
            percentile(&sorted, 95.0),
            percentile(&sorted, 99.0),
        )
    }

    fn stage_snapshots(&self) -> HashMap<String, StageStatsSnapshot> {
        let Ok(stats) = self.stage_stats.lock() else {
            return HashMap::new();
        };
        stats
            .iter()
            .map(|(stage, stats)| (stage.to_string(), stats.snapshot()))
            .collect()
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg, p50, p95, p99) = self.duration_statistics();

        MetricsSnapshot {
            tasks: TaskMetrics {
                submitted: self.tasks_submitted.load(Ordering::Relaxed),
                rejected: self.submissions_rejected.load(Ordering::Relaxed),
                running: self.tasks_running.load(Ordering::Relaxed),
                completed: self.tasks_completed.load(Ordering::Relaxed),
                failed: self.tasks_failed.load(Ordering::Relaxed),
                timed_out: self.tasks_timed_out.load(Ordering::Relaxed),
                canceled: self.tasks_canceled.load(Ordering::Relaxed),
                avg_duration_ms: avg,
                duration_p50_ms: p50,
                duration_p95_ms: p95,
                duration_p99_ms: p99,
            },
            stages: self.stage_snapshots(),
            configs: ConfigMetrics {
                writes: self.config_writes.load(Ordering::Relaxed),
                concurrency_conflicts: self.concurrency_conflicts.load(Ordering::Relaxed),
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct StageStats {
    executions: u64,
    failures: u64,
    timeouts: u64,
    execution_times: Vec<u64>, // milliseconds
}

impl StageStats {
    fn snapshot(&self) -> StageStatsSnapshot {
        let avg_execution_time_ms = if self.execution_times.is_empty() {
            0.0
        } else {
            self.execution_times.iter().sum::<u64>() as f64 / self.execution_times.len() as f64
        };
        let success_rate = if self.executions == 0 {
            0.0
        } else {
            (self.executions - self.failures) as f64 / self.executions as f64
        };
        StageStatsSnapshot {
            executions: self.executions,
            failures: self.failures,
            timeouts: self.timeouts,
            avg_execution_time_ms,
            success_rate,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub tasks: TaskMetrics,
    pub stages: HashMap<String, StageStatsSnapshot>,
    pub configs: ConfigMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct TaskMetrics {
    pub submitted: u64,
    pub rejected: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub canceled: u64,
    pub avg_duration_ms: f64,
    pub duration_p50_ms: f64,
    pub duration_p95_ms: f64,
    pub duration_p99_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct StageStatsSnapshot {
    pub executions: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub avg_execution_time_ms: f64,
    pub success_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct ConfigMetrics {
    pub writes: u64,
    pub concurrency_conflicts: u64,
}

fn push_sample(samples: &mut Vec<u64>, duration: Duration) {
    samples.push(duration.as_millis() as u64);
    if samples.len() > MAX_SAMPLES {
        samples.remove(0);
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }
    let index = (percentile / 100.0 * (sorted_data.len() - 1) as f64).round() as usize;
    sorted_data[index.min(sorted_data.len() - 1)] as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_lifecycle_counters() {
        let collector = MetricsCollector::new();

        collector.task_submitted();
        collector.task_submitted();
        collector.task_submitted();
        collector.submission_rejected();
        collector.task_completed(Duration::from_millis(100));
        collector.task_failed(Duration::from_millis(300));

        let snapshot = collector.get_metrics();
        assert_eq!(snapshot.tasks.submitted, 3);
        assert_eq!(snapshot.tasks.rejected, 1);
        assert_eq!(snapshot.tasks.running, 1);
        assert_eq!(snapshot.tasks.completed, 1);
        assert_eq!(snapshot.tasks.failed, 1);
        assert_eq!(snapshot.tasks.avg_duration_ms, 200.0);
    }

    #[test]
    fn test_stage_statistics() {
        let collector = MetricsCollector::new();

        collector.stage_executed(AgentType::Research, Duration::from_millis(10), true);
        collector.stage_executed(AgentType::Research, Duration::from_millis(30), false);
        collector.stage_timed_out(AgentType::Editor);

        let snapshot = collector.get_metrics();
        let research = &snapshot.stages["research"];
        assert_eq!(research.executions, 2);
        assert_eq!(research.failures, 1);
        assert_eq!(research.avg_execution_time_ms, 20.0);
        assert_eq!(research.success_rate, 0.5);
        assert_eq!(snapshot.stages["editor"].timeouts, 1);
    }

    #[test]
    fn test_reset_clears_everything() {
        let collector = MetricsCollector::new();
        collector.task_submitted();
        collector.config_written();
        collector.concurrency_conflict();
        collector.stage_executed(AgentType::Ideation, Duration::from_millis(5), true);

        collector.reset();
        let snapshot = collector.get_metrics();

        assert_eq!(snapshot.tasks.submitted, 0);
        assert_eq!(snapshot.configs.writes, 0);
        assert_eq!(snapshot.configs.concurrency_conflicts, 0);
        assert!(snapshot.stages.is_empty());
    }

    #[test]
    fn test_running_gauge_never_underflows() {
        let collector = MetricsCollector::new();
        collector.task_canceled(Duration::ZERO);
        assert_eq!(collector.get_metrics().tasks.running, 0);
    }

    #[test]
    fn test_percentile() {
        let data = vec![10, 20, 30, 40, 50];
        assert_eq!(percentile(&data, 50.0), 30.0);
        assert_eq!(percentile(&data, 100.0), 50.0);
        assert_eq!(percentile(&[], 95.0), 0.0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let collector = MetricsCollector::new();
        collector.stage_executed(AgentType::Content, Duration::from_millis(1), true);
        let json = serde_json::to_value(collector.get_metrics()).unwrap();
        assert!(json["tasks"]["submitted"].is_u64());
        assert!(json["stages"]["content"].is_object());
    }
}
