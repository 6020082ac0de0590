//! # System Constants
//!
//! Default queue names, environment variable names and operational limits
//! shared by the executor, consumers and binary.

/// Default queue names, one queue per table kind
pub mod queues {
    pub const CHECKLIST: &str = "fsm_checklist_tasks";
    pub const REPORT: &str = "fsm_report_tasks";
    pub const INFRA: &str = "fsm_infra_tasks";
}

/// Environment variables read outside the `FSM_WORKER__` config namespace
pub mod env_vars {
    pub const CONFIG_PATH: &str = "FSM_WORKER_CONFIG";
    pub const ENVIRONMENT: &str = "FSM_WORKER_ENV";
    pub const APP_ENVIRONMENT: &str = "APP_ENV";
    pub const LOG_FORMAT: &str = "FSM_WORKER_LOG_FORMAT";
}

/// Transition events published on the event bus
pub mod events {
    pub const TASK_TRANSITIONED: &str = "task.transitioned";
    pub const TASK_RETRY_SCHEDULED: &str = "task.retry_scheduled";
    pub const TASK_RECOVERED: &str = "task.recovered";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
}

/// Error detail recorded for a handler that asked for an edge the table forbids
pub const INVALID_TRANSITION_DETAIL: &str = "invalid transition";

/// Error detail recorded when a handler does not return within its timeout
pub const HANDLER_TIMEOUT_DETAIL: &str = "handler timed out";

pub const DEFAULT_MAX_CHAIN_LENGTH: u32 = 16;
pub const DEFAULT_HANDLER_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Error detail recorded when a handler stops on the cancellation flag
pub const CANCELLED_DETAIL: &str = "task cancelled";

/// How long a checklist run may stay in `working` before the task fails
pub const DEFAULT_CHECKLIST_RUN_TIMEOUT_SECONDS: i64 = 6 * 3600;

/// How long runset instances may take to come up in `started`
pub const DEFAULT_INFRA_START_TIMEOUT_SECONDS: i64 = 3600;
