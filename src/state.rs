// src/state.rs
// Shared handles passed to every HTTP and WebSocket handler

use std::sync::Arc;

use crate::{
    api::access::AccessPolicy,
    config::Config,
    container::{ContainerRuntime, Orchestrator},
    cron::CronTrigger,
    db::Database,
    events::Broadcaster,
    metadata::MetaStore,
    pipeline::PipelineRouter,
    runner::FunctionRunner,
    tasks::{ImageProvisioner, metrics::TaskMetrics},
    topics::TopicStore,
};

#[derive(Clone)]
pub struct AppState {
    // -------- Storage --------
    pub meta: MetaStore,
    pub topics: TopicStore,

    // -------- Live delivery --------
    pub topic_hub: Arc<Broadcaster<String>>,
    pub device_hub: Arc<Broadcaster<String>>,

    // -------- Execution --------
    pub orchestrator: Orchestrator,
    pub runner: FunctionRunner,
    pub provisioner: ImageProvisioner,
    pub cron: Arc<CronTrigger>,
    pub metrics: Arc<TaskMetrics>,

    pub access: AccessPolicy,
}

impl AppState {
    /// Wire every component from its stores and a container runtime.
    ///
    /// Nothing connects here; databases open on first use.
    pub fn assemble(
        meta_db: Arc<Database>,
        document_db: Arc<Database>,
        runtime: Arc<dyn ContainerRuntime>,
        cron_page_size: i64,
    ) -> Self {
        let meta = MetaStore::new(meta_db);
        let topic_hub = Arc::new(Broadcaster::new("topics"));
        let device_hub = Arc::new(Broadcaster::new("devices"));
        let topics = TopicStore::new(document_db, topic_hub.clone());
        let metrics = Arc::new(TaskMetrics::new());

        let orchestrator = Orchestrator::new(runtime, meta.clone());
        let router = PipelineRouter::with_topics(meta.clone(), topics.clone());
        let runner = FunctionRunner::new(meta.clone(), orchestrator.clone(), router, metrics.clone());
        let provisioner = ImageProvisioner::new(orchestrator.clone(), metrics.clone());
        let cron = Arc::new(CronTrigger::new(
            meta.clone(),
            runner.clone(),
            metrics.clone(),
            cron_page_size,
        ));
        let access = AccessPolicy::new(meta.clone());

        Self {
            meta,
            topics,
            topic_hub,
            device_hub,
            orchestrator,
            runner,
            provisioner,
            cron,
            metrics,
            access,
        }
    }

    pub fn from_config(config: &Config, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let meta_db = Arc::new(Database::new(
            config.database_url.clone(),
            config.database_max_connections,
        ));
        let document_db = if config.document_database_url == config.database_url {
            meta_db.clone()
        } else {
            Arc::new(Database::new(
                config.document_database_url.clone(),
                config.database_max_connections,
            ))
        };

        Self::assemble(meta_db, document_db, runtime, config.cron_page_size)
    }
}
