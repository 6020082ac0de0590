//! # Worker Configuration
//!
//! Typed configuration for the executor, queue consumers, wait-state poller
//! and collaborator clients. Every section has serde defaults so an empty
//! TOML file (or none at all) yields a runnable development setup.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fsm_worker::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load()?;
//! let max_chain = config.executor.max_chain_length;
//! let checklist_queue = config.consumer.queues.checklist.clone();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::constants;
use crate::models::TaskKind;
use crate::state_machine::RetryPolicy;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub database: DatabaseConfig,
    pub messaging: MessagingConfig,
    pub executor: ExecutorConfig,
    pub consumer: ConsumerConfig,
    pub poller: PollerConfig,
    pub retry: RetryPolicies,
    pub collaborators: CollaboratorsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Empty means "use the in-memory store"
    pub url: String,
    pub pool_size: u32,
    pub connect_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            pool_size: 10,
            connect_timeout_seconds: 10,
        }
    }
}

impl DatabaseConfig {
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagingBackend {
    #[default]
    InMemory,
    Pgmq,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    pub provider: MessagingBackend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound on self-advancing transitions chained in one `advance` call
    pub max_chain_length: u32,
    pub handler_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_chain_length: constants::DEFAULT_MAX_CHAIN_LENGTH,
            handler_timeout_ms: constants::DEFAULT_HANDLER_TIMEOUT_MS,
        }
    }
}

impl ExecutorConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

/// Queue names, one per table kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueNames {
    pub checklist: String,
    pub report: String,
    pub infra: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            checklist: constants::queues::CHECKLIST.to_string(),
            report: constants::queues::REPORT.to_string(),
            infra: constants::queues::INFRA.to_string(),
        }
    }
}

impl QueueNames {
    pub fn for_kind(&self, kind: TaskKind) -> &str {
        match kind {
            TaskKind::Checklist => &self.checklist,
            TaskKind::Report => &self.report,
            TaskKind::Infra => &self.infra,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub queues: QueueNames,
    pub batch_size: usize,
    pub visibility_timeout_seconds: u64,
    /// Sleep between empty polls
    pub poll_interval_ms: u64,
    /// Deliveries after which a failing message is dead-lettered
    pub max_receive_count: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            queues: QueueNames::default(),
            batch_size: 10,
            visibility_timeout_seconds: 300,
            poll_interval_ms: 1000,
            max_receive_count: 5,
        }
    }
}

impl ConsumerConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub enabled: bool,
    /// How often the poller scans for waiting tasks
    pub interval_seconds: u64,
    /// Minimum time since the last write before a waiting task is re-enqueued
    pub recheck_interval_seconds: u64,
    pub batch_limit: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 30,
            recheck_interval_seconds: 60,
            batch_limit: 100,
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn recheck_interval(&self) -> Duration {
        Duration::from_secs(self.recheck_interval_seconds)
    }
}

/// Named retry policy per table kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicies {
    pub checklist: RetryPolicy,
    pub report: RetryPolicy,
    pub infra: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            checklist: RetryPolicy::checklist_default(),
            report: RetryPolicy::report_default(),
            infra: RetryPolicy::infra_default(),
        }
    }
}

impl RetryPolicies {
    pub fn for_kind(&self, kind: TaskKind) -> &RetryPolicy {
        match kind {
            TaskKind::Checklist => &self.checklist,
            TaskKind::Report => &self.report,
            TaskKind::Infra => &self.infra,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorsConfig {
    /// Base URL of the REST API the handlers call
    pub rest_api_url: String,
    /// Base URL of the report delivery service
    pub herald_url: String,
    pub request_timeout_ms: u64,
    /// Shared secret sent as `Secret` header; never logged
    pub cluster_secret: Option<String>,
}

impl Default for CollaboratorsConfig {
    fn default() -> Self {
        Self {
            rest_api_url: "http://localhost:8999".to_string(),
            herald_url: "http://localhost:8906".to_string(),
            request_timeout_ms: 15_000,
            cluster_secret: None,
        }
    }
}

impl CollaboratorsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl WorkerConfig {
    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> ConfigResult<()> {
        if self.executor.max_chain_length == 0 {
            return Err(ConfigurationError::invalid_value(
                "executor.max_chain_length",
                "0",
                "must allow at least one transition per advance",
            ));
        }
        if self.executor.handler_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "executor.handler_timeout_ms",
                "0",
                "handler timeout must be positive",
            ));
        }
        if self.consumer.batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "consumer.batch_size",
                "0",
                "batch size must be positive",
            ));
        }
        if self.consumer.visibility_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "consumer.visibility_timeout_seconds",
                "0",
                "messages must stay invisible while being processed",
            ));
        }
        if self.consumer.max_receive_count == 0 {
            return Err(ConfigurationError::invalid_value(
                "consumer.max_receive_count",
                "0",
                "every message must be delivered at least once",
            ));
        }

        let mut seen = HashSet::new();
        for kind in TaskKind::ALL {
            let queue = self.consumer.queues.for_kind(kind);
            if queue.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    format!("consumer.queues.{kind}"),
                    "consumer configuration",
                ));
            }
            if !seen.insert(queue) {
                return Err(ConfigurationError::invalid_value(
                    format!("consumer.queues.{kind}"),
                    queue,
                    "queue names must be unique per kind",
                ));
            }

            self.retry
                .for_kind(kind)
                .validate()
                .map_err(|e| ConfigurationError::validation_error(format!("retry.{kind}: {e}")))?;
        }

        if self.messaging.provider == MessagingBackend::Pgmq && !self.database.is_configured() {
            return Err(ConfigurationError::missing_required_field(
                "database.url",
                "pgmq messaging provider",
            ));
        }
        if self.database.is_configured() && self.database.pool_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.pool_size",
                "0",
                "pool must hold at least one connection",
            ));
        }

        Ok(())
    }
}
