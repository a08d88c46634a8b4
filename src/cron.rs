// src/cron.rs
// Scheduled function runs for persisted cron jobs

use chrono::Utc;
use cron::Schedule;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::metadata::MetaStore;
use crate::runner::FunctionRunner;
use crate::tasks::metrics::TaskMetrics;
use crate::types::{CronJob, ScheduleHandle};

/// Five-field (minute resolution) expressions get a leading seconds field
pub fn normalize_expression(expr: &str) -> String {
    let expr = expr.trim();
    if expr.split_whitespace().count() == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    }
}

pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    Schedule::from_str(&normalize_expression(expr))
        .map_err(|e| RelayError::Schedule(format!("invalid cron expression '{}': {}", expr, e)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronState {
    Stopped,
    Running,
}

struct Entry {
    job_id: Uuid,
    function_id: Uuid,
    schedule: Schedule,
    task: Option<JoinHandle<()>>,
}

struct Registry {
    state: CronState,
    entries: HashMap<ScheduleHandle, Entry>,
}

pub struct CronTrigger {
    meta: MetaStore,
    runner: FunctionRunner,
    metrics: Arc<TaskMetrics>,
    page_size: i64,
    next_handle: AtomicI64,
    registry: Mutex<Registry>,
}

impl CronTrigger {
    pub fn new(meta: MetaStore, runner: FunctionRunner, metrics: Arc<TaskMetrics>, page_size: i64) -> Self {
        Self {
            meta,
            runner,
            metrics,
            page_size: page_size.max(1),
            next_handle: AtomicI64::new(1),
            registry: Mutex::new(Registry {
                state: CronState::Stopped,
                entries: HashMap::new(),
            }),
        }
    }

    pub async fn state(&self) -> CronState {
        self.registry.lock().await.state
    }

    pub async fn registered(&self) -> usize {
        self.registry.lock().await.entries.len()
    }

    /// Load every persisted job page by page, register it, and begin dispatching
    pub async fn start(&self) -> Result<()> {
        if self.state().await == CronState::Running {
            return Ok(());
        }

        let mut offset = 0;
        let mut loaded = 0;
        loop {
            let page = self.meta.list_jobs(self.page_size, offset).await?;
            let page_len = page.len() as i64;

            for job in page {
                if self.is_registered(job.id).await {
                    continue;
                }
                match self.register(&job).await {
                    Ok(_) => loaded += 1,
                    Err(e) => {
                        error!(job_id = %job.id, "Failed to register cron job: {}", e);
                        // A handle left by an earlier process may now belong to another job
                        if job.schedule_handle.is_some() {
                            if let Err(e) = self.meta.set_schedule_handle(job.id, None).await {
                                warn!(job_id = %job.id, "Failed to clear stale schedule handle: {}", e);
                            }
                        }
                    }
                }
            }

            if page_len < self.page_size {
                break;
            }
            offset += self.page_size;
        }

        let mut registry = self.registry.lock().await;
        for (handle, entry) in registry.entries.iter_mut() {
            if entry.task.is_none() {
                entry.task = Some(self.spawn_ticker(*handle, entry));
            }
        }
        registry.state = CronState::Running;

        info!(loaded, total = registry.entries.len(), "Cron trigger started");
        Ok(())
    }

    /// Stop dispatching; registrations are kept for the next start
    pub async fn stop(&self) {
        let mut registry = self.registry.lock().await;
        for entry in registry.entries.values_mut() {
            if let Some(task) = entry.task.take() {
                task.abort();
            }
        }
        registry.state = CronState::Stopped;
        info!("Cron trigger stopped");
    }

    async fn is_registered(&self, job_id: Uuid) -> bool {
        self.registry
            .lock()
            .await
            .entries
            .values()
            .any(|e| e.job_id == job_id)
    }

    /// Register a job; the handle is persisted on the job row only once registration succeeded
    pub async fn register(&self, job: &CronJob) -> Result<ScheduleHandle> {
        let schedule = parse_schedule(&job.schedule)?;
        let handle = ScheduleHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));

        {
            let mut registry = self.registry.lock().await;
            let mut entry = Entry {
                job_id: job.id,
                function_id: job.function_id,
                schedule,
                task: None,
            };
            if registry.state == CronState::Running {
                entry.task = Some(self.spawn_ticker(handle, &entry));
            }
            registry.entries.insert(handle, entry);
        }

        if let Err(e) = self.meta.set_schedule_handle(job.id, Some(handle)).await {
            self.remove(handle).await;
            return Err(e);
        }

        info!(job_id = %job.id, handle = %handle, schedule = %job.schedule, "Cron job registered");
        Ok(handle)
    }

    /// Drop the job's current registration, then register it again with its new settings
    ///
    /// Only entries owned by `job.id` are removed; a stored handle that now names
    /// another job's entry is ignored.
    pub async fn replace(&self, job: &CronJob) -> Result<ScheduleHandle> {
        let stale: Vec<ScheduleHandle> = {
            let registry = self.registry.lock().await;
            registry
                .entries
                .iter()
                .filter(|(_, e)| e.job_id == job.id)
                .map(|(h, _)| *h)
                .collect()
        };
        for handle in stale {
            self.remove(handle).await;
        }

        self.register(job).await
    }

    pub async fn remove(&self, handle: ScheduleHandle) -> bool {
        let mut registry = self.registry.lock().await;
        match registry.entries.remove(&handle) {
            Some(entry) => {
                if let Some(task) = entry.task {
                    task.abort();
                }
                debug!(handle = %handle, job_id = %entry.job_id, "Cron job removed");
                true
            }
            None => false,
        }
    }

    fn spawn_ticker(&self, handle: ScheduleHandle, entry: &Entry) -> JoinHandle<()> {
        let schedule = entry.schedule.clone();
        let function_id = entry.function_id;
        let job_id = entry.job_id;
        let runner = self.runner.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    info!(handle = %handle, job_id = %job_id, "Schedule has no further occurrences");
                    break;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or_default();
                time::sleep(wait).await;

                metrics.record_success("cron_tick");
                let run_id = Uuid::new_v4();
                let runner = runner.clone();
                debug!(job_id = %job_id, function_id = %function_id, run_id = %run_id, "Cron tick");

                // Each tick runs detached so a slow container never delays the next one
                tokio::spawn(async move {
                    if let Err(e) = runner.run_by_id(function_id, run_id).await {
                        warn!(job_id = %job_id, run_id = %run_id, "Scheduled run failed: {}", e);
                    }
                });
            }
        })
    }
}
