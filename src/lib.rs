#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, PGMQ in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # FSM Worker Core
//!
//! Persisted task state-machine executor for broker-driven workers.
//!
//! ## Overview
//!
//! A task is one unit of work (a checklist run, a report generation, an
//! infrastructure job) walked through a closed set of named states. Each
//! broker message asks the executor to advance one task: it loads the
//! record, resolves the handler for the current state, runs it, and
//! persists the outcome with a compare-and-swap. Self-advancing states are
//! chained in the same call, wait states return and are re-polled later,
//! terminal states stay in the store for inspection.
//!
//! ## Module Organization
//!
//! - [`models`] - Task records, ids, kinds and payload deltas
//! - [`store`] - `TaskStore` contract with in-memory and PostgreSQL implementations
//! - [`state_machine`] - States, handlers, tables, retry policy and the executor
//! - [`tables`] - The checklist, report and infra transition tables
//! - [`collaborators`] - Typed errors and HTTP clients for sibling services
//! - [`messaging`] - Broker contract with in-memory and PGMQ providers
//! - [`worker`] - Queue consumers, scheduler and wait-state poller
//! - [`config`] - Layered TOML/environment configuration
//! - [`events`] - Broadcast of persisted transitions
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fsm_worker::bootstrap::bootstrap;
//! use fsm_worker::config::ConfigLoader;
//! use fsm_worker::models::TaskKind;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load()?;
//! let worker = bootstrap(&config).await?;
//!
//! let task_id = worker
//!     .scheduler()
//!     .schedule(TaskKind::Checklist, json!({"organization_id": "org-1"}))
//!     .await?;
//! println!("scheduled {task_id}");
//!
//! worker.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test                                  # unit and in-memory integration tests
//! DATABASE_URL=postgresql://... cargo test -- --ignored   # PostgreSQL store tests
//! ```

#[macro_use]
pub mod macros;

pub mod bootstrap;
pub mod collaborators;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod state_machine;
pub mod store;
pub mod tables;
pub mod worker;

pub use config::{ConfigLoader, WorkerConfig};
pub use error::{Result, WorkerError};
pub use models::{NewTask, PayloadDelta, TaskId, TaskKind, TaskRecord};
pub use state_machine::{
    AdvanceOutcome, AdvanceReport, ExecutorRegistry, HandlerOutcome, TaskExecutor, TaskSnapshot,
    TransitionHandler, TransitionTable, WorkflowState,
};
pub use store::{InMemoryTaskStore, PgTaskStore, TaskStore};
