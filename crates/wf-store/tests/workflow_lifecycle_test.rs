//! Multi-operation scenarios against a real (in-memory) SQLite-backed
//! `SqliteStateManager`: save/load round trips, stale-version rejection,
//! the lock/heartbeat/zombie lifecycle, and the active-workflow pointer.

use chrono::Duration;
use uuid::Uuid;

use wf_store::config::StoreConfig;
use wf_store::models::{Blueprint, Workflow, WorkflowState, WorkflowStatus};
use wf_store::state_manager::{LockHolder, SqliteStateManager};

async fn store() -> SqliteStateManager {
    SqliteStateManager::connect(&StoreConfig::in_memory()).await.expect("connect in-memory store")
}

#[tokio::test]
async fn save_and_load_round_trips_a_workflow() {
    let store = store().await;
    let workflow = Workflow::new("write a test suite", Blueprint::default());
    let id = workflow.id;

    store.save(&WorkflowState::from_workflow(&workflow)).await.unwrap();

    let loaded = store.load(id).await.unwrap().expect("workflow should exist");
    assert_eq!(loaded.to_workflow().prompt, "write a test suite");
    assert!(loaded.checksum_is_valid());

    assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn stale_version_save_is_rejected() {
    let store = store().await;
    let workflow = Workflow::new("racy update", Blueprint::default());
    let id = workflow.id;
    let initial = WorkflowState::from_workflow(&workflow);
    store.save(&initial).await.unwrap();

    // Advance it once -- simulates one writer's in-flight update.
    let mut advanced = initial.clone();
    advanced.version += 1;
    advanced.checksum = advanced.compute_checksum();
    store.save(&advanced).await.unwrap();

    // A second writer still holding the original (now-stale) version number
    // must be rejected rather than silently clobbering the advanced save.
    let result = store.save(&initial).await;
    assert!(result.is_err(), "save with a stale version should be rejected");

    let current = store.load(id).await.unwrap().unwrap();
    assert_eq!(current.version, advanced.version);
}

#[tokio::test]
async fn list_reflects_every_saved_workflow() {
    let store = store().await;
    let a = Workflow::new("first", Blueprint::default());
    let b = Workflow::new("second", Blueprint::default());
    store.save(&WorkflowState::from_workflow(&a)).await.unwrap();
    store.save(&WorkflowState::from_workflow(&b)).await.unwrap();

    let summaries = store.list().await.unwrap();
    assert_eq!(summaries.len(), 2);
    let prompts: Vec<&str> = summaries.iter().map(|s| s.prompt.as_str()).collect();
    assert!(prompts.contains(&"first"));
    assert!(prompts.contains(&"second"));
}

#[tokio::test]
async fn active_workflow_pointer_set_load_and_deactivate() {
    let store = store().await;
    let workflow = Workflow::new("the active one", Blueprint::default());
    let id = workflow.id;
    store.save(&WorkflowState::from_workflow(&workflow)).await.unwrap();

    assert!(store.load_active().await.unwrap().is_none());

    store.set_active(id).await.unwrap();
    let active = store.load_active().await.unwrap().expect("should have an active workflow");
    assert_eq!(active.to_workflow().id, id);

    store.deactivate().await.unwrap();
    assert!(store.load_active().await.unwrap().is_none());
}

#[tokio::test]
async fn lock_is_exclusive_until_released() {
    let store = store().await;
    let workflow = Workflow::new("locked workflow", Blueprint::default());
    let id = workflow.id;
    store.save(&WorkflowState::from_workflow(&workflow)).await.unwrap();

    let holder_a = LockHolder { pid: 111, host: "host-a".to_string() };
    let holder_b = LockHolder { pid: 222, host: "host-b".to_string() };
    let ttl = Duration::seconds(60);

    assert!(store.acquire_lock(id, &holder_a, ttl).await.unwrap());
    // A second holder cannot acquire the same lease while it's live.
    assert!(!store.acquire_lock(id, &holder_b, ttl).await.unwrap());

    store.release_lock(id, holder_a.pid).await.unwrap();
    assert!(store.acquire_lock(id, &holder_b, ttl).await.unwrap());
}

#[tokio::test]
async fn running_workflows_are_tracked_and_heartbeat_keeps_them_fresh() {
    let store = store().await;
    let mut workflow = Workflow::new("running workflow", Blueprint::default());
    workflow.status = WorkflowStatus::Running;
    let id = workflow.id;
    store.save(&WorkflowState::from_workflow(&workflow)).await.unwrap();

    let holder = LockHolder { pid: 333, host: "host-c".to_string() };
    store.mark_running(id, &holder).await.unwrap();
    assert!(store.is_running(id).await.unwrap());

    let running = store.list_running().await.unwrap();
    assert!(running.iter().any(|r| r.workflow_id == id));

    store.heartbeat(id).await.unwrap();

    // A zero-second stale threshold should immediately flag it; a
    // day-long one should not.
    let zombies_now = store.find_zombies(Duration::seconds(0)).await.unwrap();
    assert!(zombies_now.contains(&id));
    let zombies_later = store.find_zombies(Duration::days(1)).await.unwrap();
    assert!(!zombies_later.contains(&id));

    store.mark_stopped(id).await.unwrap();
    assert!(!store.is_running(id).await.unwrap());
}

#[tokio::test]
async fn claim_and_mark_running_round_trips_through_a_transaction() {
    let store = store().await;
    let workflow = Workflow::new("claimed workflow", Blueprint::default());
    let id = workflow.id;
    store.save(&WorkflowState::from_workflow(&workflow)).await.unwrap();

    let holder = LockHolder { pid: 444, host: "host-d".to_string() };
    let claimed = store.claim_and_mark_running(id, &holder).await.unwrap();
    assert_eq!(claimed.to_workflow().id, id);
    assert!(store.is_running(id).await.unwrap());
}

#[tokio::test]
async fn archive_finished_only_touches_terminal_workflows() {
    let store = store().await;
    let mut finished = Workflow::new("done", Blueprint::default());
    finished.status = WorkflowStatus::Completed;
    finished.completed_at = Some(chrono::Utc::now());
    let finished_id = finished.id;

    let in_progress = Workflow::new("still going", Blueprint::default());
    let in_progress_id = in_progress.id;

    store.save(&WorkflowState::from_workflow(&finished)).await.unwrap();
    store.save(&WorkflowState::from_workflow(&in_progress)).await.unwrap();

    let archived_count = store.archive_finished().await.unwrap();
    assert_eq!(archived_count, 1);

    let summaries = store.list().await.unwrap();
    let ids: Vec<Uuid> = summaries.iter().map(|s| s.id).collect();
    assert!(!ids.contains(&finished_id), "archived workflows drop out of the active list");
    assert!(ids.contains(&in_progress_id));
}

#[tokio::test]
async fn find_duplicates_matches_on_prompt_text() {
    let store = store().await;
    let a = Workflow::new("build a rate limiter", Blueprint::default());
    let b = Workflow::new("build a rate limiter", Blueprint::default());
    let c = Workflow::new("write documentation", Blueprint::default());
    store.save(&WorkflowState::from_workflow(&a)).await.unwrap();
    store.save(&WorkflowState::from_workflow(&b)).await.unwrap();
    store.save(&WorkflowState::from_workflow(&c)).await.unwrap();

    let duplicates = store.find_duplicates("build a rate limiter").await.unwrap();
    assert_eq!(duplicates.len(), 2);
    assert!(duplicates.contains(&a.id));
    assert!(duplicates.contains(&b.id));
}

#[tokio::test]
async fn delete_removes_a_workflow_entirely() {
    let store = store().await;
    let workflow = Workflow::new("throwaway", Blueprint::default());
    let id = workflow.id;
    store.save(&WorkflowState::from_workflow(&workflow)).await.unwrap();

    store.delete(id).await.unwrap();
    assert!(store.load(id).await.unwrap().is_none());
}
