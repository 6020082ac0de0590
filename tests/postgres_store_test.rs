//! PostgreSQL task store tests
//!
//! Run against a scratch database:
//!
//! ```bash
//! DATABASE_URL=postgresql://localhost/fsm_worker_test cargo test --test postgres_store_test -- --ignored
//! ```

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use fsm_worker::config::DatabaseConfig;
use fsm_worker::models::{NewTask, PayloadDelta, TaskId, TaskKind};
use fsm_worker::store::{PgTaskStore, StoreError, TaskStore};

async fn connect() -> PgTaskStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for postgres tests");
    let config = DatabaseConfig {
        url,
        pool_size: 2,
        ..DatabaseConfig::default()
    };
    let store = PgTaskStore::connect(&config).await.unwrap();
    store.ensure_schema().await.unwrap();
    store
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_create_load_and_duplicate() {
    let store = connect().await;
    let id = TaskId::new();
    let new_task = NewTask::new(TaskKind::Checklist, "created", json!({"organization_id": "org-1"}))
        .with_task_id(id);

    assert_eq!(store.create(new_task.clone()).await.unwrap(), id);
    let record = store.load(id).await.unwrap();
    assert_eq!(record.state, "created");
    assert_eq!(record.payload["organization_id"], "org-1");
    assert_eq!(record.version, 0);

    assert!(matches!(
        store.create(new_task).await.unwrap_err(),
        StoreError::AlreadyExists { .. }
    ));
    assert!(matches!(
        store.load(TaskId::new()).await.unwrap_err(),
        StoreError::NotFound { .. }
    ));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_compare_and_swap_matches_state_and_version() {
    let store = connect().await;
    let id = store
        .create(NewTask::new(TaskKind::Report, "created", json!({"schedule_id": "s-1"})))
        .await
        .unwrap();
    let read = store.load(id).await.unwrap();

    let delta = PayloadDelta::new().with("report_id", "r-1");
    let next = read.advanced_to("started", Some(&delta), 1);
    assert!(store
        .compare_and_swap(id, &read.state, read.version, &next)
        .await
        .unwrap());

    // Same read again: the version moved on underneath it
    let stale = read.advanced_to("getting_scopes", None, 1);
    assert!(!store
        .compare_and_swap(id, &read.state, read.version, &stale)
        .await
        .unwrap());

    let current = store.load(id).await.unwrap();
    assert_eq!(current.state, "started");
    assert_eq!(current.version, read.version + 1);
    assert_eq!(current.payload["report_id"], "r-1");
    assert_eq!(current.attempts_for("created"), 1);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_cancel_flag_and_stale_scan() {
    let store = connect().await;
    let id = store
        .create(NewTask::new(TaskKind::Infra, "created", json!({"runset_id": "rs-1"})))
        .await
        .unwrap();
    let read = store.load(id).await.unwrap();
    let parked = read.advanced_to("started", None, 1);
    assert!(store
        .compare_and_swap(id, &read.state, read.version, &parked)
        .await
        .unwrap());

    let later = Utc::now() + ChronoDuration::seconds(5);
    let stale = store
        .find_stale_in_states(TaskKind::Infra, &["started"], later, 1000)
        .await
        .unwrap();
    assert!(stale.contains(&id));

    let earlier = Utc::now() - ChronoDuration::hours(1);
    let fresh = store
        .find_stale_in_states(TaskKind::Infra, &["started"], earlier, 1000)
        .await
        .unwrap();
    assert!(!fresh.contains(&id));

    assert!(store.request_cancel(id).await.unwrap());
    assert!(!store.request_cancel(id).await.unwrap());
    let flagged = store.load(id).await.unwrap();
    assert!(flagged.cancel_requested);
    assert_eq!(flagged.version, parked.version + 1);
}
