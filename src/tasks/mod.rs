// src/tasks/mod.rs

//! Detached background work whose outcome is always reported.
//! Image provisioning from admin mutations and the periodic metrics reporter live here.

use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{error, info};

use crate::container::{ImageReference, Orchestrator};
use crate::error::Result;
use crate::types::Function;

pub mod metrics;

use metrics::TaskMetrics;

/// Spawn `fut` on the runtime; success or failure is logged and counted under `name`.
///
/// The handle still yields the result for callers that want to await it.
pub fn spawn_reported<F>(name: &'static str, metrics: Arc<TaskMetrics>, fut: F) -> JoinHandle<Result<()>>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let started = Instant::now();
        let result = fut.await;
        metrics.record_task_duration(name, started.elapsed());

        match &result {
            Ok(()) => {
                metrics.record_success(name);
                info!(task = name, "Background task finished");
            }
            Err(e) => {
                metrics.record_error(name);
                error!(task = name, "Background task failed: {}", e);
            }
        }
        result
    })
}

/// Builds or pulls a function's image after it is created or updated
#[derive(Clone)]
pub struct ImageProvisioner {
    orchestrator: Orchestrator,
    metrics: Arc<TaskMetrics>,
}

impl ImageProvisioner {
    pub fn new(orchestrator: Orchestrator, metrics: Arc<TaskMetrics>) -> Self {
        Self { orchestrator, metrics }
    }

    /// Build from `context` (a tar archive holding a Dockerfile) when given, pull otherwise
    pub fn provision(&self, function: &Function, context: Option<Bytes>) -> JoinHandle<Result<()>> {
        let orchestrator = self.orchestrator.clone();
        let image = function.image.clone();

        spawn_reported("provision", self.metrics.clone(), async move {
            let reference = ImageReference::parse(&image)?;
            match context {
                Some(context) => {
                    let mut tags = vec![reference.runtime_tag()];
                    if reference.version.is_some() {
                        tags.push(reference.repository());
                    }
                    orchestrator.build_image(context, &tags).await
                }
                None => {
                    orchestrator.pull_image(&reference.runtime_tag()).await;
                    Ok(())
                }
            }
        })
    }
}

/// Log task counters on a fixed interval until the process exits
pub fn spawn_metrics_reporter(metrics: Arc<TaskMetrics>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        // first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics.report();
        }
    })
}
