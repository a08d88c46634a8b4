// src/api/access.rs
// Origin allow-list and shared key check in front of the topic store

use axum::http::HeaderMap;
use tracing::debug;

use super::error::{ApiError, ApiResult};
use crate::metadata::MetaStore;
use crate::types::Project;

pub const KEY_HEADER: &str = "db-key";

#[derive(Clone)]
pub struct AccessPolicy {
    meta: MetaStore,
}

impl AccessPolicy {
    pub fn new(meta: MetaStore) -> Self {
        Self { meta }
    }

    async fn owner(&self, topic: &str) -> ApiResult<Project> {
        self.meta
            .project_for_collection(topic)
            .await?
            .ok_or_else(|| ApiError::forbidden(format!("topic '{}' is not bound to a project", topic)))
    }

    /// The project owning `topic` must list `origin` and hold `key`.
    ///
    /// A topic with no binding is denied. A missing origin only passes a `*` allow-list.
    pub async fn check(&self, topic: &str, origin: Option<&str>, key: Option<&str>) -> ApiResult<Project> {
        let project = self.owner(topic).await?;

        if !project.allows_origin(origin.unwrap_or_default()) {
            debug!(topic = %topic, origin = ?origin, "Origin rejected");
            return Err(ApiError::forbidden("origin not allowed"));
        }

        if key != Some(project.key.as_str()) {
            debug!(topic = %topic, "Key rejected");
            return Err(ApiError::forbidden("invalid key"));
        }

        Ok(project)
    }

    /// Key-only check used by socket subscriptions, which carry the key in the path
    pub async fn check_key(&self, topic: &str, key: &str) -> ApiResult<Project> {
        let project = self.owner(topic).await?;

        if project.key != key {
            return Err(ApiError::forbidden("db-key not valid"));
        }
        Ok(project)
    }

    pub async fn check_headers(&self, topic: &str, headers: &HeaderMap) -> ApiResult<Project> {
        let origin = header_str(headers, "origin");
        let key = header_str(headers, KEY_HEADER);
        self.check(topic, origin, key).await
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
