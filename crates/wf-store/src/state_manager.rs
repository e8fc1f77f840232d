//! `SqliteStateManager`: the single entry point the rest of the workspace
//! uses to read and write workflow state. Wraps the raw `queries::workflows`
//! functions, converting `anyhow::Error` into `DomainError` at this boundary
//! so callers above the store never see a bare SQL error string.

use std::future::Future;
use std::pin::Pin;

use chrono::Duration;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::DomainError;
use crate::models::{RunningWorkflowRecord, WorkflowState, WorkflowSummary};
use crate::pool::{create_pool, default_migrations_path, run_migrations};
use crate::queries::workflows as queries;

/// Identifies the process holding a lock or running-set entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    pub pid: i64,
    pub host: String,
}

impl LockHolder {
    pub fn current() -> Self {
        Self {
            pid: std::process::id() as i64,
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_owned()),
        }
    }
}

pub struct SqliteStateManager {
    pool: SqlitePool,
}

impl SqliteStateManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) and migrate the store at `config`'s URL.
    pub async fn connect(config: &StoreConfig) -> Result<Self, DomainError> {
        let pool = create_pool(config)
            .await
            .map_err(|e| DomainError::internal("STORE_CONNECT_FAILED", e.to_string()))?;
        run_migrations(&pool, default_migrations_path())
            .await
            .map_err(|e| DomainError::internal("STORE_MIGRATE_FAILED", e.to_string()))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn save(&self, state: &WorkflowState) -> Result<(), DomainError> {
        queries::save_workflow(&self.pool, state)
            .await
            .map_err(map_save_error)
    }

    pub async fn load(&self, id: Uuid) -> Result<Option<WorkflowState>, DomainError> {
        queries::load_by_id(&self.pool, id).await.map_err(to_store_error)
    }

    pub async fn load_active(&self) -> Result<Option<WorkflowState>, DomainError> {
        queries::load_active(&self.pool).await.map_err(to_store_error)
    }

    pub async fn list(&self) -> Result<Vec<WorkflowSummary>, DomainError> {
        queries::list_workflows(&self.pool).await.map_err(to_store_error)
    }

    pub async fn set_active(&self, id: Uuid) -> Result<(), DomainError> {
        queries::set_active_workflow_id(&self.pool, id)
            .await
            .map_err(to_store_error)
    }

    pub async fn deactivate(&self) -> Result<(), DomainError> {
        queries::deactivate_workflow(&self.pool).await.map_err(to_store_error)
    }

    /// Try to acquire the exclusive lease. `false` means another holder's
    /// lease is still live -- not an error, a normal contention outcome.
    pub async fn acquire_lock(
        &self,
        id: Uuid,
        holder: &LockHolder,
        ttl: Duration,
    ) -> Result<bool, DomainError> {
        queries::acquire_workflow_lock(&self.pool, id, holder.pid, &holder.host, ttl.num_seconds())
            .await
            .map_err(to_store_error)
    }

    pub async fn release_lock(&self, id: Uuid, pid: i64) -> Result<(), DomainError> {
        queries::release_workflow_lock(&self.pool, id, pid)
            .await
            .map_err(to_store_error)
    }

    pub async fn refresh_lock(&self, id: Uuid, pid: i64) -> Result<bool, DomainError> {
        queries::refresh_workflow_lock(&self.pool, id, pid)
            .await
            .map_err(to_store_error)
    }

    pub async fn mark_running(&self, id: Uuid, holder: &LockHolder) -> Result<(), DomainError> {
        queries::set_workflow_running(&self.pool, id, holder.pid, &holder.host)
            .await
            .map_err(to_store_error)
    }

    pub async fn mark_stopped(&self, id: Uuid) -> Result<(), DomainError> {
        queries::clear_workflow_running(&self.pool, id)
            .await
            .map_err(to_store_error)
    }

    pub async fn is_running(&self, id: Uuid) -> Result<bool, DomainError> {
        queries::is_workflow_running(&self.pool, id)
            .await
            .map_err(to_store_error)
    }

    pub async fn list_running(&self) -> Result<Vec<RunningWorkflowRecord>, DomainError> {
        queries::list_running_workflows(&self.pool)
            .await
            .map_err(to_store_error)
    }

    pub async fn heartbeat(&self, id: Uuid) -> Result<(), DomainError> {
        queries::update_heartbeat(&self.pool, id).await.map_err(to_store_error)?;
        queries::update_workflow_heartbeat(&self.pool, id)
            .await
            .map_err(to_store_error)
    }

    pub async fn find_zombies(&self, stale_threshold: Duration) -> Result<Vec<Uuid>, DomainError> {
        queries::find_zombie_workflows(&self.pool, stale_threshold.num_seconds())
            .await
            .map_err(to_store_error)
    }

    pub async fn find_duplicates(&self, prompt: &str) -> Result<Vec<Uuid>, DomainError> {
        queries::find_workflows_by_prompt(&self.pool, prompt)
            .await
            .map_err(to_store_error)
    }

    pub async fn archive_finished(&self) -> Result<u64, DomainError> {
        queries::archive_workflows(&self.pool).await.map_err(to_store_error)
    }

    pub async fn purge_all(&self) -> Result<(), DomainError> {
        queries::purge_all_workflows(&self.pool).await.map_err(to_store_error)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), DomainError> {
        queries::delete_workflow(&self.pool, id).await.map_err(to_store_error)
    }

    /// Run `f` inside a single SQLite transaction, committing on `Ok` and
    /// rolling back on `Err`. `f` receives the open connection and composes
    /// reads/writes from `queries::workflows::*_tx` against it.
    pub async fn execute_atomically<F, T>(&self, f: F) -> Result<T, DomainError>
    where
        F: for<'c> FnOnce(&'c mut sqlx::SqliteConnection) -> AtomicFut<'c, T>,
        T: Send,
    {
        let mut tx = self.pool.begin().await.map_err(to_store_error_sqlx)?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await.map_err(to_store_error_sqlx)?;
                Ok(value)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    /// Atomically verify the caller still holds `id`'s lease (by pid) and,
    /// if so, flip it into the running set. Used by the phase driver at the
    /// top of a phase so a lease that expired mid-check can never race a
    /// stale "yes I'm still running" result.
    pub async fn claim_and_mark_running(
        &self,
        id: Uuid,
        holder: &LockHolder,
    ) -> Result<WorkflowState, DomainError> {
        self.execute_atomically(move |conn| {
            let holder = holder.clone();
            Box::pin(async move {
                let state = queries::load_by_id_tx(conn, id)
                    .await
                    .map_err(to_store_error)?
                    .ok_or_else(|| DomainError::not_found("WORKFLOW_NOT_FOUND", id.to_string()))?;
                queries::set_workflow_running_tx(conn, id, holder.pid, &holder.host)
                    .await
                    .map_err(to_store_error)?;
                Ok(state)
            })
        })
        .await
    }
}

pub type AtomicFut<'c, T> =
    Pin<Box<dyn Future<Output = Result<T, DomainError>> + Send + 'c>>;

fn to_store_error(e: anyhow::Error) -> DomainError {
    DomainError::internal("STORE_ERROR", e.to_string())
}

fn to_store_error_sqlx(e: sqlx::Error) -> DomainError {
    DomainError::from(e)
}

fn map_save_error(e: anyhow::Error) -> DomainError {
    if e.to_string().contains("stale save rejected") {
        DomainError::conflict("STALE_VERSION", e.to_string())
    } else {
        to_store_error(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Blueprint, Workflow};

    async fn test_manager() -> SqliteStateManager {
        SqliteStateManager::connect(&StoreConfig::in_memory())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn save_load_roundtrip() {
        let mgr = test_manager().await;
        let wf = Workflow::new("hi", Blueprint::default());
        let state = WorkflowState::from_workflow(&wf);
        mgr.save(&state).await.unwrap();
        let loaded = mgr.load(wf.id).await.unwrap().unwrap();
        assert_eq!(loaded.definition.id, wf.id);
    }

    #[tokio::test]
    async fn stale_save_reported_as_conflict() {
        let mgr = test_manager().await;
        let wf = Workflow::new("hi", Blueprint::default());
        let mut state = WorkflowState::from_workflow(&wf);
        state.version = 3;
        mgr.save(&state).await.unwrap();

        state.version = 1;
        state.checksum = state.compute_checksum();
        let err = mgr.save(&state).await.unwrap_err();
        assert_eq!(err.category, crate::error::ErrorCategory::Conflict);
    }

    #[tokio::test]
    async fn claim_and_mark_running_atomically() {
        let mgr = test_manager().await;
        let wf = Workflow::new("hi", Blueprint::default());
        let state = WorkflowState::from_workflow(&wf);
        mgr.save(&state).await.unwrap();

        let holder = LockHolder { pid: 42, host: "h".into() };
        let claimed = mgr.claim_and_mark_running(wf.id, &holder).await.unwrap();
        assert_eq!(claimed.definition.id, wf.id);
        assert!(mgr.is_running(wf.id).await.unwrap());
    }

    #[tokio::test]
    async fn claim_missing_workflow_fails_without_side_effects() {
        let mgr = test_manager().await;
        let holder = LockHolder { pid: 1, host: "h".into() };
        let missing = Uuid::new_v4();
        let err = mgr.claim_and_mark_running(missing, &holder).await.unwrap_err();
        assert_eq!(err.category, crate::error::ErrorCategory::NotFound);
        assert!(!mgr.is_running(missing).await.unwrap());
    }
}
