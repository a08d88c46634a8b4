// src/container/docker.rs
// Docker Engine runtime backed by bollard

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::{BuildImageOptions, CreateImageOptions, TagImageOptions};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tracing::{debug, info};

use super::{ContainerRuntime, ContainerSpec};
use crate::error::{RelayError, Result};

#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using DOCKER_HOST or the platform default socket
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RelayError::Runtime(format!("Failed to connect to Docker: {}", e)))?;

        info!("Docker runtime initialized");
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.args.clone()),
            env: Some(spec.env.clone()),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await?;

        for warning in &response.warnings {
            debug!(container_id = %response.id, "Create warning: {}", warning);
        }

        Ok(response.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn wait_container(&self, container_id: &str) -> Result<i64> {
        let mut stream = self.docker.wait_container(
            container_id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );

        let mut exit_code = 0;
        while let Some(item) = stream.next().await {
            match item {
                Ok(response) => exit_code = response.status_code,
                // A non-zero exit is reported as an error by bollard; it is still a finished run
                Err(bollard::errors::Error::DockerContainerWaitError { code, .. }) => {
                    exit_code = code
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(exit_code)
    }

    async fn container_logs(&self, container_id: &str, since: DateTime<Utc>) -> Result<Vec<u8>> {
        let mut stream = self.docker.logs(
            container_id,
            Some(LogsOptions::<String> {
                stdout: true,
                since: since.timestamp(),
                timestamps: true,
                ..Default::default()
            }),
        );

        // `since` is whole seconds, so lines are filtered again on their own timestamps
        let mut output = Vec::new();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk?.into_bytes();
            if let Some(line) = line_since(&bytes, since) {
                output.extend_from_slice(line);
            }
        }

        Ok(output)
    }

    async fn build_image(&self, context: Bytes, tags: &[String]) -> Result<Vec<String>> {
        let Some((primary, extra)) = tags.split_first() else {
            return Err(RelayError::InvalidInput("image build needs a tag".to_string()));
        };

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: primary.clone(),
            rm: true,
            ..Default::default()
        };

        let mut failures = Vec::new();
        let mut stream = self.docker.build_image(options, None, Some(context));
        while let Some(item) = stream.next().await {
            match item {
                Ok(info) => {
                    if let Some(line) = info.stream.as_deref() {
                        debug!("build: {}", line.trim_end());
                    }
                    if let Some(error) = info.error {
                        failures.push(error);
                    }
                }
                Err(e) => failures.push(e.to_string()),
            }
        }

        if failures.is_empty() {
            for tag in extra {
                let (repo, version) = tag.split_once(':').unwrap_or((tag.as_str(), "latest"));
                self.docker
                    .tag_image(
                        primary,
                        Some(TagImageOptions {
                            repo: repo.to_string(),
                            tag: version.to_string(),
                        }),
                    )
                    .await?;
            }
        }

        Ok(failures)
    }

    async fn pull_image(&self, reference: &str) -> Result<()> {
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: reference,
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(item) = stream.next().await {
            let info = item?;
            if let Some(status) = info.status.as_deref() {
                debug!(reference = %reference, "pull: {}", status);
            }
        }

        Ok(())
    }
}

/// Strip the RFC 3339 prefix Docker adds to a timestamped log line.
///
/// Returns `None` for lines written before `since`; lines without a readable
/// timestamp are kept whole.
fn line_since(line: &[u8], since: DateTime<Utc>) -> Option<&[u8]> {
    let Some(split) = line.iter().position(|b| *b == b' ') else {
        return Some(line);
    };
    let stamp = std::str::from_utf8(&line[..split])
        .ok()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok());

    match stamp {
        Some(at) if at.with_timezone(&Utc) < since => None,
        Some(_) => Some(&line[split + 1..]),
        None => Some(line),
    }
}
