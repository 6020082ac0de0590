//! # Worker Bootstrap
//!
//! Builds the store, messaging provider, executor registry and background
//! loops from a [`WorkerConfig`], and returns a handle that stops them.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::collaborators::RestCollaborators;
use crate::config::{MessagingBackend, WorkerConfig};
use crate::error::Result;
use crate::events::EventPublisher;
use crate::logging::log_error;
use crate::messaging::{
    InMemoryMessagingService, MessagingError, MessagingProvider, MessagingService,
    PgmqMessagingService,
};
use crate::models::TaskKind;
use crate::state_machine::{ExecutorRegistry, TaskExecutor};
use crate::store::{InMemoryTaskStore, PgTaskStore, TaskStore};
use crate::tables::{
    ChecklistBackend, ChecklistTable, InfraBackend, InfraTable, ReportBackend, ReportTable,
};
use crate::worker::{QueueConsumer, TaskScheduler, WaitStatePoller};

/// Collaborator implementations handed to the three tables
#[derive(Clone)]
pub struct TableBackends {
    pub checklist: Arc<dyn ChecklistBackend>,
    pub report: Arc<dyn ReportBackend>,
    pub infra: Arc<dyn InfraBackend>,
}

impl TableBackends {
    /// Same implementation behind every table
    pub fn shared<B>(backend: Arc<B>) -> Self
    where
        B: ChecklistBackend + ReportBackend + InfraBackend,
    {
        Self {
            checklist: backend.clone(),
            report: backend.clone(),
            infra: backend,
        }
    }
}

/// One executor per table kind, configured from `config`
pub fn build_registry(
    store: Arc<dyn TaskStore>,
    backends: TableBackends,
    config: &WorkerConfig,
    events: &EventPublisher,
) -> ExecutorRegistry {
    let checklist = TaskExecutor::new(
        store.clone(),
        Arc::new(ChecklistTable::new(backends.checklist)),
        config.retry.checklist.clone(),
    )
    .with_config(&config.executor)
    .with_events(events.clone());

    let report = TaskExecutor::new(
        store.clone(),
        Arc::new(ReportTable::new(backends.report)),
        config.retry.report.clone(),
    )
    .with_config(&config.executor)
    .with_events(events.clone());

    let infra = TaskExecutor::new(
        store,
        Arc::new(InfraTable::new(backends.infra)),
        config.retry.infra.clone(),
    )
    .with_config(&config.executor)
    .with_events(events.clone());

    ExecutorRegistry::new()
        .register(Arc::new(checklist))
        .register(Arc::new(report))
        .register(Arc::new(infra))
}

/// Running worker: background loops plus the scheduler that feeds them
pub struct WorkerHandle<M: MessagingService> {
    scheduler: Arc<TaskScheduler<M>>,
    events: EventPublisher,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl<M: MessagingService> WorkerHandle<M> {
    pub fn scheduler(&self) -> &Arc<TaskScheduler<M>> {
        &self.scheduler
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    /// Signal every loop to stop and wait for them to finish their batch
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                log_error("worker", "shutdown", &e.to_string(), None);
            }
        }
        info!("✅ Worker loops stopped");
    }
}

/// Spawn one consumer per kind queue and, when enabled, the wait-state poller.
/// Fails before spawning anything when the broker is unhealthy or a kind
/// queue is still missing after `ensure_queues`.
pub async fn start_worker<M: MessagingService + 'static>(
    store: Arc<dyn TaskStore>,
    messaging: Arc<M>,
    backends: TableBackends,
    config: &WorkerConfig,
) -> Result<WorkerHandle<M>> {
    let queues: Vec<String> = TaskKind::ALL
        .iter()
        .map(|kind| config.consumer.queues.for_kind(*kind).to_string())
        .collect();
    messaging.ensure_queues(&queues).await?;
    verify_messaging(messaging.as_ref(), &queues).await?;

    let events = EventPublisher::default();
    let registry = Arc::new(build_registry(store.clone(), backends, config, &events));
    let scheduler = Arc::new(TaskScheduler::new(
        store.clone(),
        messaging.clone(),
        registry.clone(),
        config.consumer.queues.clone(),
    ));

    let (shutdown, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    for kind in TaskKind::ALL {
        let consumer = QueueConsumer::new(
            messaging.clone(),
            registry.clone(),
            kind,
            &config.consumer,
        );
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { consumer.run(rx).await }));
    }

    if config.poller.enabled {
        let poller = WaitStatePoller::new(store, scheduler.clone(), registry, &config.poller);
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { poller.run(rx).await }));
    }

    info!(
        consumers = TaskKind::ALL.len(),
        poller = config.poller.enabled,
        provider = messaging.provider_name(),
        "🚀 Worker started"
    );

    Ok(WorkerHandle {
        scheduler,
        events,
        shutdown,
        tasks,
    })
}

async fn verify_messaging<M: MessagingService>(messaging: &M, queues: &[String]) -> Result<()> {
    if !messaging.health_check().await? {
        error!(provider = messaging.provider_name(), "Messaging health check failed");
        return Err(MessagingError::internal(format!(
            "{} health check failed",
            messaging.provider_name()
        ))
        .into());
    }

    let report = messaging.verify_queues(queues).await?;
    if !report.is_healthy() {
        error!(missing = ?report.missing, "Kind queues missing after creation");
        return Err(MessagingError::queue_not_found(report.missing.join(", ")).into());
    }
    info!(queues = report.healthy.len(), "Kind queues verified");
    Ok(())
}

/// Build store, messaging and REST collaborators from `config` and start the worker
pub async fn bootstrap(config: &WorkerConfig) -> Result<WorkerHandle<MessagingProvider>> {
    let backends = TableBackends::shared(Arc::new(RestCollaborators::from_config(
        &config.collaborators,
    )?));

    let (store, pool) = if config.database.is_configured() {
        let pg_store = PgTaskStore::connect(&config.database).await?;
        pg_store.ensure_schema().await?;
        let pool = pg_store.pool().clone();
        let store: Arc<dyn TaskStore> = Arc::new(pg_store);
        (store, Some(pool))
    } else {
        info!("No database configured; using in-memory task store");
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        (store, None)
    };

    let messaging = match (config.messaging.provider, pool) {
        (MessagingBackend::Pgmq, Some(pool)) => {
            MessagingProvider::Pgmq(PgmqMessagingService::new_with_pool(pool))
        }
        _ => MessagingProvider::InMemory(InMemoryMessagingService::new()),
    };

    start_worker(store, Arc::new(messaging), backends, config).await
}
