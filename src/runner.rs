// src/runner.rs
// One invocation of a function: container, output, routing, run log

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::container::Orchestrator;
use crate::error::{RelayError, Result};
use crate::metadata::MetaStore;
use crate::normalize::normalize;
use crate::pipeline::{PipelineRouter, RouteOutcome};
use crate::tasks::metrics::TaskMetrics;
use crate::types::{Function, InputKind, RunLog};

#[derive(Clone)]
pub struct FunctionRunner {
    meta: MetaStore,
    orchestrator: Orchestrator,
    router: PipelineRouter,
    metrics: Arc<TaskMetrics>,
}

impl FunctionRunner {
    pub fn new(
        meta: MetaStore,
        orchestrator: Orchestrator,
        router: PipelineRouter,
        metrics: Arc<TaskMetrics>,
    ) -> Self {
        Self {
            meta,
            orchestrator,
            router,
            metrics,
        }
    }

    /// Run `function` to completion and record the outcome under `run_id`.
    ///
    /// Every path writes exactly one run log: the normalized output on success,
    /// `"error <message>"` at the first failing step. Routing failures are logged
    /// and do not change the run's result. The returned error only covers
    /// persisting the log itself.
    pub async fn run(&self, function: &Function, run_id: Uuid) -> Result<RunLog> {
        let started = Instant::now();
        info!(function_id = %function.id, run_id = %run_id, "Run started");

        let result = match self.execute(function).await {
            Ok(output) => {
                self.forward(function, &output).await;
                self.metrics.record_success("run");
                output
            }
            Err(e) => {
                error!(function_id = %function.id, run_id = %run_id, "Run failed: {}", e);
                self.metrics.record_error("run");
                e.run_log_text()
            }
        };

        let log = RunLog {
            id: run_id,
            function_id: function.id,
            run_at: Utc::now(),
            result,
        };
        self.meta.insert_run_log(&log).await?;
        self.metrics.record_task_duration("run", started.elapsed());

        debug!(function_id = %function.id, run_id = %run_id, "Run log stored");
        Ok(log)
    }

    async fn execute(&self, function: &Function) -> Result<String> {
        let container_id = self.orchestrator.ensure_container(function).await?;
        let raw = self.orchestrator.run(&container_id).await?;
        Ok(normalize(&raw))
    }

    async fn forward(&self, function: &Function, output: &str) {
        let data = Value::String(output.to_string());
        match self.router.route(InputKind::Function, function.id, data).await {
            Ok(RouteOutcome::Delivered { pipeline_id, .. }) => {
                debug!(function_id = %function.id, pipeline_id = %pipeline_id, "Result delivered")
            }
            Ok(RouteOutcome::Miss) => {}
            Err(e) => warn!(function_id = %function.id, "Routing failed: {}", e),
        }
    }

    /// Load a function by id and run it; a missing function is logged and skipped
    pub async fn run_by_id(&self, function_id: Uuid, run_id: Uuid) -> Result<Option<RunLog>> {
        match self.meta.get_function(function_id).await? {
            Some(function) => self.run(&function, run_id).await.map(Some),
            None => {
                warn!(function_id = %function_id, run_id = %run_id, "Function not found, run skipped");
                Ok(None)
            }
        }
    }

    /// Start a detached run and return its id right away.
    ///
    /// Only an unknown function is rejected; the outcome is read later from the run log.
    pub async fn trigger(&self, function_id: Uuid) -> Result<Uuid> {
        let function = self
            .meta
            .get_function(function_id)
            .await?
            .ok_or_else(|| RelayError::NotFound(format!("function {}", function_id)))?;

        let run_id = Uuid::new_v4();
        let runner = self.clone();
        tokio::spawn(async move {
            if let Err(e) = runner.run(&function, run_id).await {
                error!(function_id = %function.id, run_id = %run_id, "Failed to store run log: {}", e);
            }
        });

        Ok(run_id)
    }
}
