// src/container/mod.rs
// Container orchestration: image references, the runtime seam, and per-function container binding

pub mod docker;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::metadata::MetaStore;
use crate::types::Function;

pub use docker::DockerRuntime;

/// Parsed `host/vendor/image[:version]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub host: String,
    pub vendor: String,
    pub image: String,
    pub version: Option<String>,
}

impl ImageReference {
    pub fn parse(reference: &str) -> Result<Self> {
        debug!("Parse image reference {}", reference);

        // A colon before the last slash belongs to the registry host (host:port)
        let last_slash = reference.rfind('/').unwrap_or(0);
        let (path, version) = match reference.rfind(':') {
            Some(idx) if idx > last_slash => {
                (&reference[..idx], Some(reference[idx + 1..].to_string()))
            }
            _ => (reference, None),
        };

        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() < 3 || parts[..3].iter().any(|p| p.is_empty()) {
            return Err(RelayError::InvalidReference(reference.to_string()));
        }

        Ok(Self {
            host: parts[0].to_string(),
            vendor: parts[1].to_string(),
            image: parts[2].to_string(),
            version: version.filter(|v| !v.is_empty()),
        })
    }

    /// `vendor/image`, the tag images are built and pulled under
    pub fn repository(&self) -> String {
        format!("{}/{}", self.vendor, self.image)
    }

    /// Image name handed to the runtime when creating a container
    pub fn runtime_tag(&self) -> String {
        match &self.version {
            Some(version) => format!("{}:{}", self.repository(), version),
            None => self.repository(),
        }
    }
}

/// Split raw params on a literal backslash; each segment is trimmed
pub fn split_params(raw: &str) -> Vec<String> {
    raw.split('\\').map(|p| p.trim().to_string()).collect()
}

/// Newline separated env; blank lines are dropped
pub fn split_env(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// What the runtime needs to create a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub args: Vec<String>,
    pub env: Vec<String>,
}

impl ContainerSpec {
    pub fn for_function(function: &Function) -> Result<Self> {
        let reference = ImageReference::parse(&function.image)?;
        Ok(Self {
            image: reference.runtime_tag(),
            args: split_params(&function.params),
            env: split_env(&function.env),
        })
    }
}

/// Container runtime operations used by the orchestrator
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container, returning its id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Block until the container is no longer running; returns the exit code
    async fn wait_container(&self, container_id: &str) -> Result<i64>;

    /// Full log stream produced since `since`, read into memory
    async fn container_logs(&self, container_id: &str, since: DateTime<Utc>) -> Result<Vec<u8>>;

    /// Submit a build context; returns every failure message the runtime reported
    async fn build_image(&self, context: Bytes, tags: &[String]) -> Result<Vec<String>>;

    async fn pull_image(&self, reference: &str) -> Result<()>;
}

/// Per-key async mutexes; entries live as long as the process
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn lock_for(&self, key: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        locks.entry(key).or_default().clone()
    }
}

/// Binds functions to containers and drives container runs
#[derive(Clone)]
pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    meta: MetaStore,
    binding_locks: Arc<KeyedLocks>,
}

impl Orchestrator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, meta: MetaStore) -> Self {
        Self {
            runtime,
            meta,
            binding_locks: Arc::new(KeyedLocks::default()),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Return the function's container, creating and persisting one on first use.
    ///
    /// Serialized per function id: concurrent first runs share one container.
    pub async fn ensure_container(&self, function: &Function) -> Result<String> {
        if let Some(id) = function.container_id.as_deref().filter(|id| !id.is_empty()) {
            return Ok(id.to_string());
        }

        let lock = self.binding_locks.lock_for(function.id);
        let _guard = lock.lock().await;

        // Another invocation may have bound a container while we waited
        if let Some(current) = self.meta.get_function(function.id).await? {
            if let Some(id) = current.container_id.filter(|id| !id.is_empty()) {
                debug!(function_id = %function.id, container_id = %id, "Reusing bound container");
                return Ok(id);
            }
        }

        let spec = ContainerSpec::for_function(function)?;
        let container_id = self.runtime.create_container(&spec).await?;
        self.meta.set_container_id(function.id, &container_id).await?;

        info!(function_id = %function.id, container_id = %container_id, image = %spec.image, "Created container");
        Ok(container_id)
    }

    /// Start the container, wait for it to stop, then read its output
    pub async fn run(&self, container_id: &str) -> Result<Vec<u8>> {
        let started_at = Utc::now();
        self.runtime.start_container(container_id).await?;

        let exit_code = self.runtime.wait_container(container_id).await?;
        if exit_code != 0 {
            warn!(container_id = %container_id, exit_code, "Container exited with non-zero status");
        }

        self.runtime.container_logs(container_id, started_at).await
    }

    /// Build an image from a tar context; any reported message fails the build
    pub async fn build_image(&self, context: Bytes, tags: &[String]) -> Result<()> {
        let messages = self.runtime.build_image(context, tags).await?;
        if messages.is_empty() {
            info!(tags = ?tags, "Image built");
            Ok(())
        } else {
            Err(RelayError::Build(messages.join("\n")))
        }
    }

    /// Best-effort pull; failures are logged only
    pub async fn pull_image(&self, reference: &str) {
        match self.runtime.pull_image(reference).await {
            Ok(()) => debug!(reference = %reference, "Image pulled"),
            Err(e) => warn!(reference = %reference, "Image pull failed: {}", e),
        }
    }
}
