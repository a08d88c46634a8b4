// src/tasks/metrics.rs

//! Counters for background work: function runs, cron ticks, image provisioning

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicUsize,
    errors: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskSnapshot {
    pub completed: usize,
    pub errors: usize,
    pub last_duration: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct TaskMetrics {
    counters: RwLock<HashMap<String, Counters>>,
    durations: RwLock<HashMap<String, Duration>>,
}

impl TaskMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self, task: &str, pick: impl Fn(&Counters) -> &AtomicUsize) {
        {
            let map = self.counters.read();
            if let Some(counters) = map.get(task) {
                pick(counters).fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        let mut map = self.counters.write();
        pick(map.entry(task.to_string()).or_default()).fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, task: &str) {
        self.bump(task, |c| &c.completed);
    }

    pub fn record_error(&self, task: &str) {
        self.bump(task, |c| &c.errors);
    }

    pub fn record_task_duration(&self, task: &str, duration: Duration) {
        let mut map = self.durations.write();
        map.insert(task.to_string(), duration);
    }

    pub fn snapshot(&self, task: &str) -> TaskSnapshot {
        let counters = self.counters.read();
        let durations = self.durations.read();
        let (completed, errors) = counters
            .get(task)
            .map(|c| (c.completed.load(Ordering::Relaxed), c.errors.load(Ordering::Relaxed)))
            .unwrap_or((0, 0));

        TaskSnapshot {
            completed,
            errors,
            last_duration: durations.get(task).copied(),
        }
    }

    pub fn report(&self) {
        let counters = self.counters.read();
        let mut tasks: Vec<_> = counters.keys().cloned().collect();
        drop(counters);
        tasks.sort();

        for task in tasks {
            let snap = self.snapshot(&task);
            info!(
                "Task '{}': completed={}, errors={}, last_duration={:?}",
                task, snap.completed, snap.errors, snap.last_duration
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_per_task() {
        let metrics = TaskMetrics::new();
        metrics.record_success("run");
        metrics.record_success("run");
        metrics.record_error("run");
        metrics.record_error("provision");

        assert_eq!(metrics.snapshot("run").completed, 2);
        assert_eq!(metrics.snapshot("run").errors, 1);
        assert_eq!(metrics.snapshot("provision").completed, 0);
        assert_eq!(metrics.snapshot("missing"), TaskSnapshot::default());
    }

    #[test]
    fn test_keeps_last_duration() {
        let metrics = TaskMetrics::new();
        metrics.record_task_duration("run", Duration::from_millis(5));
        metrics.record_task_duration("run", Duration::from_millis(7));
        assert_eq!(metrics.snapshot("run").last_duration, Some(Duration::from_millis(7)));
    }
}
