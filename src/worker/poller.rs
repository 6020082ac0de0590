//! # Wait-State Poller
//!
//! Tasks parked in a wait state have no message in flight. The poller scans
//! the store for waiting tasks that have not been touched for
//! `recheck_interval` and enqueues them again so their handler re-polls.
//!
//! A healthy poll makes no write, so the store alone cannot tell a task that
//! was just enqueued from one that was never enqueued. The poller remembers
//! when it last enqueued each task and skips it until `recheck_interval`
//! has passed again.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::scheduler::TaskScheduler;
use crate::config::PollerConfig;
use crate::error::Result;
use crate::messaging::MessagingService;
use crate::models::TaskId;
use crate::state_machine::ExecutorRegistry;
use crate::store::TaskStore;

pub struct WaitStatePoller<M: MessagingService> {
    store: Arc<dyn TaskStore>,
    scheduler: Arc<TaskScheduler<M>>,
    registry: Arc<ExecutorRegistry>,
    interval: Duration,
    recheck_interval: Duration,
    batch_limit: usize,
    last_enqueued: DashMap<TaskId, DateTime<Utc>>,
}

impl<M: MessagingService> std::fmt::Debug for WaitStatePoller<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitStatePoller")
            .field("interval", &self.interval)
            .field("recheck_interval", &self.recheck_interval)
            .field("batch_limit", &self.batch_limit)
            .finish()
    }
}

impl<M: MessagingService> WaitStatePoller<M> {
    pub fn new(
        store: Arc<dyn TaskStore>,
        scheduler: Arc<TaskScheduler<M>>,
        registry: Arc<ExecutorRegistry>,
        config: &PollerConfig,
    ) -> Self {
        Self {
            store,
            scheduler,
            registry,
            interval: config.interval(),
            recheck_interval: config.recheck_interval(),
            batch_limit: config.batch_limit,
            last_enqueued: DashMap::new(),
        }
    }

    /// One scan over every registered kind; returns how many tasks were enqueued
    pub async fn poll_once(&self) -> Result<usize> {
        let recheck = chrono::Duration::from_std(self.recheck_interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));
        let now = Utc::now();
        let cutoff = now - recheck;
        let mut enqueued = 0;
        let mut seen = HashSet::new();

        for kind in self.registry.kinds() {
            let wait_states = self.registry.get(kind)?.wait_states();
            if wait_states.is_empty() {
                continue;
            }

            let stale = self
                .store
                .find_stale_in_states(kind, &wait_states, cutoff, self.batch_limit)
                .await?;

            for task_id in stale {
                seen.insert(task_id);
                let recently_enqueued = self
                    .last_enqueued
                    .get(&task_id)
                    .is_some_and(|at| now - *at < recheck);
                if recently_enqueued {
                    continue;
                }
                self.scheduler.enqueue(task_id, kind).await?;
                self.last_enqueued.insert(task_id, now);
                enqueued += 1;
            }
        }

        // Tasks that left their wait state no longer need a timestamp
        self.last_enqueued.retain(|task_id, _| seen.contains(task_id));

        if enqueued > 0 {
            debug!(enqueued, "Re-enqueued waiting tasks");
        }
        Ok(enqueued)
    }

    /// Scan every `interval` until `shutdown` flips to `true`
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_seconds = self.interval.as_secs(),
            recheck_interval_seconds = self.recheck_interval.as_secs(),
            "🚀 Wait-state poller started"
        );

        while !*shutdown.borrow() {
            if let Err(e) = self.poll_once().await {
                error!(error = %e, "Wait-state scan failed");
            }

            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Wait-state poller stopped");
    }
}
