// src/pipeline.rs
// Routes a source's result to the sink its pipeline names

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::metadata::MetaStore;
use crate::topics::{Document, TopicStore};
use crate::types::{InputKind, OutputKind, Pipeline};

/// Destination for routed results, selected by output kind
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn deliver(&self, output_id: Uuid, data: Value) -> Result<Document>;
}

/// Writes into the topic a binding points at
pub struct TopicSink {
    meta: MetaStore,
    topics: TopicStore,
}

impl TopicSink {
    pub fn new(meta: MetaStore, topics: TopicStore) -> Self {
        Self { meta, topics }
    }
}

#[async_trait]
impl OutputSink for TopicSink {
    async fn deliver(&self, output_id: Uuid, data: Value) -> Result<Document> {
        let binding = self
            .meta
            .get_binding(output_id)
            .await?
            .ok_or_else(|| RelayError::NotFound(format!("topic binding {}", output_id)))?;

        self.topics.insert(&binding.collection, data).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Delivered { pipeline_id: Uuid, document: Document },
    /// No pipeline for this source; a valid terminal state
    Miss,
}

#[derive(Clone)]
pub struct PipelineRouter {
    meta: MetaStore,
    sinks: HashMap<String, Arc<dyn OutputSink>>,
}

impl PipelineRouter {
    pub fn new(meta: MetaStore) -> Self {
        Self {
            meta,
            sinks: HashMap::new(),
        }
    }

    /// Router with the topic sink registered
    pub fn with_topics(meta: MetaStore, topics: TopicStore) -> Self {
        let sink = TopicSink::new(meta.clone(), topics);
        Self::new(meta).with_sink(OutputKind::topic(), Arc::new(sink))
    }

    pub fn with_sink(mut self, kind: OutputKind, sink: Arc<dyn OutputSink>) -> Self {
        self.sinks.insert(kind.0, sink);
        self
    }

    pub async fn route(&self, input_kind: InputKind, input_id: Uuid, data: Value) -> Result<RouteOutcome> {
        let Some(pipeline) = self.meta.find_pipeline(input_kind.as_str(), input_id).await? else {
            debug!(input_kind = %input_kind, input_id = %input_id, "No pipeline, nothing to route");
            return Ok(RouteOutcome::Miss);
        };

        self.dispatch(&pipeline, data).await
    }

    async fn dispatch(&self, pipeline: &Pipeline, data: Value) -> Result<RouteOutcome> {
        let Some(sink) = self.sinks.get(pipeline.output_kind.as_str()) else {
            warn!(pipeline_id = %pipeline.id, output_kind = %pipeline.output_kind, "Unsupported output kind");
            return Err(RelayError::InvalidInput(format!(
                "unsupported output kind: {}",
                pipeline.output_kind
            )));
        };

        let document = sink.deliver(pipeline.output_id, data).await?;
        info!(pipeline_id = %pipeline.id, output_kind = %pipeline.output_kind, "Result routed");

        Ok(RouteOutcome::Delivered {
            pipeline_id: pipeline.id,
            document,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::events::Broadcaster;
    use crate::topics::Filter;
    use crate::types::{Project, TopicBinding};
    use serde_json::json;

    struct Fixture {
        meta: MetaStore,
        topics: TopicStore,
        router: PipelineRouter,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::in_memory());
        let meta = MetaStore::new(db.clone());
        let topics = TopicStore::new(db, Arc::new(Broadcaster::new("topics")));
        let router = PipelineRouter::with_topics(meta.clone(), topics.clone());
        Fixture { meta, topics, router }
    }

    async fn bind(meta: &MetaStore, collection: &str) -> TopicBinding {
        let project = Project::new("demo", "secret", "*");
        meta.create_project(&project).await.unwrap();
        let binding = TopicBinding::new(project.id, collection);
        meta.create_binding(&binding).await.unwrap();
        binding
    }

    #[tokio::test]
    async fn test_route_into_topic() {
        let f = fixture();
        let function_id = Uuid::new_v4();
        let binding = bind(&f.meta, "results").await;
        f.meta
            .create_pipeline(&Pipeline::function_to_topic(function_id, binding.id))
            .await
            .unwrap();

        let outcome = f
            .router
            .route(InputKind::Function, function_id, json!("hello"))
            .await
            .unwrap();
        assert!(matches!(outcome, RouteOutcome::Delivered { .. }));

        let docs = f.topics.find("results", &Filter::new(), None, 0).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["content"], "hello");
    }

    #[tokio::test]
    async fn test_route_miss_writes_nothing() {
        let f = fixture();
        let outcome = f
            .router
            .route(InputKind::Function, Uuid::new_v4(), json!("hello"))
            .await
            .unwrap();
        assert_eq!(outcome, RouteOutcome::Miss);
        assert!(f.topics.topics().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_matching_pipeline_wins() {
        let f = fixture();
        let function_id = Uuid::new_v4();
        let first = bind(&f.meta, "first").await;
        let second = bind(&f.meta, "second").await;
        f.meta.create_pipeline(&Pipeline::function_to_topic(function_id, first.id)).await.unwrap();
        f.meta.create_pipeline(&Pipeline::function_to_topic(function_id, second.id)).await.unwrap();

        f.router.route(InputKind::Function, function_id, json!(1)).await.unwrap();

        assert_eq!(f.topics.topics().await.unwrap(), vec!["first".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_output_kind_is_an_error() {
        let f = fixture();
        let function_id = Uuid::new_v4();
        let mut pipeline = Pipeline::function_to_topic(function_id, Uuid::new_v4());
        pipeline.output_kind = OutputKind("plugin".to_string());
        f.meta.create_pipeline(&pipeline).await.unwrap();

        let result = f.router.route(InputKind::Function, function_id, json!(1)).await;
        assert!(matches!(result, Err(RelayError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_missing_binding_is_not_found() {
        let f = fixture();
        let function_id = Uuid::new_v4();
        f.meta
            .create_pipeline(&Pipeline::function_to_topic(function_id, Uuid::new_v4()))
            .await
            .unwrap();

        let result = f.router.route(InputKind::Function, function_id, json!(1)).await;
        assert!(matches!(result, Err(RelayError::NotFound(_))));
    }
}
