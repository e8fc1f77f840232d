//! Query functions against the `workflows` / `workflow_locks` /
//! `running_workflows` / `active_workflow` tables.
//!
//! Plain functions over a pool handle, bind-chains, `anyhow::Context` on
//! every fallible step. `StateManager` (in `crate::state_manager`) is the
//! public-facing wrapper that turns these into `DomainError`s.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{RunningWorkflowRecord, WorkflowState, WorkflowSummary};

pub async fn save_workflow(pool: &SqlitePool, state: &WorkflowState) -> Result<()> {
    let id_str = state.definition.id.to_string();

    let existing_version: Option<(i64,)> =
        sqlx::query_as("SELECT version FROM workflows WHERE id = ?")
            .bind(&id_str)
            .fetch_optional(pool)
            .await
            .context("check existing workflow version")?;

    if let Some((existing,)) = existing_version {
        if state.version < existing {
            anyhow::bail!(
                "stale save rejected: version {} < stored version {}",
                state.version,
                existing
            );
        }
    }

    let payload = serde_json::to_string(state).context("serialize workflow state")?;
    let prompt_hash = crate::checksum::hex_digest(state.definition.prompt.as_bytes());
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO workflows
            (id, version, checksum, status, current_phase, prompt, prompt_hash, payload, active, archived, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, 0, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            version = excluded.version,
            checksum = excluded.checksum,
            status = excluded.status,
            current_phase = excluded.current_phase,
            prompt = excluded.prompt,
            prompt_hash = excluded.prompt_hash,
            payload = excluded.payload,
            active = 1,
            updated_at = excluded.updated_at",
    )
    .bind(&id_str)
    .bind(state.version)
    .bind(&state.checksum)
    .bind(state.run.status.to_string())
    .bind(state.run.current_phase.to_string())
    .bind(&state.definition.prompt)
    .bind(&prompt_hash)
    .bind(&payload)
    .bind(now.as_str())
    .bind(now.as_str())
    .execute(pool)
    .await
    .context("insert/update workflow row")?;

    Ok(())
}

pub async fn load_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<WorkflowState>> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT payload FROM workflows WHERE id = ? AND archived = 0")
            .bind(id.to_string())
            .fetch_optional(pool)
            .await
            .context("load_by_id")?;

    row.map(|(payload,)| {
        serde_json::from_str(&payload).context("deserialize workflow state")
    })
    .transpose()
}

pub async fn load_active(pool: &SqlitePool) -> Result<Option<WorkflowState>> {
    match get_active_workflow_id(pool).await? {
        Some(id) => load_by_id(pool, id).await,
        None => Ok(None),
    }
}

pub async fn list_workflows(pool: &SqlitePool) -> Result<Vec<WorkflowSummary>> {
    let rows: Vec<(String, String, String, String, String, String)> = sqlx::query_as(
        "SELECT id, prompt, status, current_phase, created_at, updated_at
         FROM workflows WHERE archived = 0 ORDER BY updated_at DESC",
    )
    .fetch_all(pool)
    .await
    .context("list_workflows")?;

    rows.into_iter()
        .map(|(id, prompt, status, phase, created_at, updated_at)| {
            Ok(WorkflowSummary {
                id: Uuid::parse_str(&id)?,
                prompt,
                status: status.parse()?,
                current_phase: phase.parse()?,
                created_at: parse_timestamp(&created_at)?,
                updated_at: parse_timestamp(&updated_at)?,
            })
        })
        .collect()
}

pub async fn get_active_workflow_id(pool: &SqlitePool) -> Result<Option<Uuid>> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("SELECT workflow_id FROM active_workflow WHERE id = 1")
            .fetch_optional(pool)
            .await
            .context("get_active_workflow_id")?;

    match row.and_then(|(id,)| id) {
        Some(id) => Ok(Some(Uuid::parse_str(&id)?)),
        None => Ok(None),
    }
}

pub async fn set_active_workflow_id(pool: &SqlitePool, id: Uuid) -> Result<()> {
    sqlx::query(
        "INSERT INTO active_workflow (id, workflow_id) VALUES (1, ?)
         ON CONFLICT(id) DO UPDATE SET workflow_id = excluded.workflow_id",
    )
    .bind(id.to_string())
    .execute(pool)
    .await
    .context("set_active_workflow_id")?;
    Ok(())
}

pub async fn deactivate_workflow(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "INSERT INTO active_workflow (id, workflow_id) VALUES (1, NULL)
         ON CONFLICT(id) DO UPDATE SET workflow_id = NULL",
    )
    .execute(pool)
    .await
    .context("deactivate_workflow")?;
    Ok(())
}

/// Acquire the exclusive lease for `workflow_id`. Returns `false` (no error)
/// if another holder's lease has not yet expired -- "fails fast" without
/// forcing callers to match on an error variant for the common case.
pub async fn acquire_workflow_lock(
    pool: &SqlitePool,
    workflow_id: Uuid,
    pid: i64,
    host: &str,
    ttl_secs: i64,
) -> Result<bool> {
    let mut tx = pool.begin().await.context("begin lock tx")?;
    let now = Utc::now();

    let existing: Option<(String, i64)> = sqlx::query_as(
        "SELECT heartbeat_at, ttl_secs FROM workflow_locks WHERE workflow_id = ?",
    )
    .bind(workflow_id.to_string())
    .fetch_optional(&mut *tx)
    .await
    .context("check existing lock")?;

    if let Some((heartbeat_at, ttl)) = existing {
        let heartbeat = parse_timestamp(&heartbeat_at)?;
        if heartbeat + chrono::Duration::seconds(ttl) > now {
            return Ok(false);
        }
    }

    sqlx::query(
        "INSERT INTO workflow_locks (workflow_id, holder_pid, holder_host, acquired_at, heartbeat_at, ttl_secs)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(workflow_id) DO UPDATE SET
            holder_pid = excluded.holder_pid,
            holder_host = excluded.holder_host,
            acquired_at = excluded.acquired_at,
            heartbeat_at = excluded.heartbeat_at,
            ttl_secs = excluded.ttl_secs",
    )
    .bind(workflow_id.to_string())
    .bind(pid)
    .bind(host)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .bind(ttl_secs)
    .execute(&mut *tx)
    .await
    .context("write lock row")?;

    tx.commit().await.context("commit lock tx")?;
    Ok(true)
}

pub async fn release_workflow_lock(pool: &SqlitePool, workflow_id: Uuid, pid: i64) -> Result<()> {
    sqlx::query("DELETE FROM workflow_locks WHERE workflow_id = ? AND holder_pid = ?")
        .bind(workflow_id.to_string())
        .bind(pid)
        .execute(pool)
        .await
        .context("release_workflow_lock")?;
    Ok(())
}

/// Returns `false` (no error) if `pid` is not the current holder.
pub async fn refresh_workflow_lock(pool: &SqlitePool, workflow_id: Uuid, pid: i64) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let result = sqlx::query(
        "UPDATE workflow_locks SET heartbeat_at = ? WHERE workflow_id = ? AND holder_pid = ?",
    )
    .bind(&now)
    .bind(workflow_id.to_string())
    .bind(pid)
    .execute(pool)
    .await
    .context("refresh_workflow_lock")?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_workflow_running(
    pool: &SqlitePool,
    workflow_id: Uuid,
    pid: i64,
    host: &str,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO running_workflows (workflow_id, started_at, lock_holder_pid, lock_holder_host, heartbeat_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(workflow_id) DO UPDATE SET
            lock_holder_pid = excluded.lock_holder_pid,
            lock_holder_host = excluded.lock_holder_host,
            heartbeat_at = excluded.heartbeat_at",
    )
    .bind(workflow_id.to_string())
    .bind(&now)
    .bind(pid)
    .bind(host)
    .bind(&now)
    .execute(pool)
    .await
    .context("set_workflow_running")?;
    Ok(())
}

pub async fn clear_workflow_running(pool: &SqlitePool, workflow_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM running_workflows WHERE workflow_id = ?")
        .bind(workflow_id.to_string())
        .execute(pool)
        .await
        .context("clear_workflow_running")?;
    Ok(())
}

pub async fn is_workflow_running(pool: &SqlitePool, workflow_id: Uuid) -> Result<bool> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM running_workflows WHERE workflow_id = ?")
            .bind(workflow_id.to_string())
            .fetch_optional(pool)
            .await
            .context("is_workflow_running")?;
    Ok(row.is_some())
}

pub async fn list_running_workflows(pool: &SqlitePool) -> Result<Vec<RunningWorkflowRecord>> {
    let rows: Vec<(String, String, i64, String, String)> = sqlx::query_as(
        "SELECT workflow_id, started_at, lock_holder_pid, lock_holder_host, heartbeat_at
         FROM running_workflows",
    )
    .fetch_all(pool)
    .await
    .context("list_running_workflows")?;

    rows.into_iter()
        .map(|(workflow_id, started_at, lock_holder_pid, lock_holder_host, heartbeat_at)| {
            Ok(RunningWorkflowRecord {
                workflow_id: Uuid::parse_str(&workflow_id)?,
                started_at: parse_timestamp(&started_at)?,
                lock_holder_pid,
                lock_holder_host,
                heartbeat_at: parse_timestamp(&heartbeat_at)?,
            })
        })
        .collect()
}

pub async fn update_heartbeat(pool: &SqlitePool, workflow_id: Uuid) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query("UPDATE running_workflows SET heartbeat_at = ? WHERE workflow_id = ?")
        .bind(&now)
        .bind(workflow_id.to_string())
        .execute(pool)
        .await
        .context("update_heartbeat")?;
    Ok(())
}

pub async fn update_workflow_heartbeat(pool: &SqlitePool, workflow_id: Uuid) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query("UPDATE workflow_locks SET heartbeat_at = ? WHERE workflow_id = ?")
        .bind(&now)
        .bind(workflow_id.to_string())
        .execute(pool)
        .await
        .context("update_workflow_heartbeat")?;
    Ok(())
}

/// Workflows whose status is `running` but whose heartbeat is older than
/// `stale_threshold_secs`.
pub async fn find_zombie_workflows(
    pool: &SqlitePool,
    stale_threshold_secs: i64,
) -> Result<Vec<Uuid>> {
    let cutoff = (Utc::now() - chrono::Duration::seconds(stale_threshold_secs)).to_rfc3339();
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT r.workflow_id FROM running_workflows r
         JOIN workflows w ON w.id = r.workflow_id
         WHERE w.status = 'running' AND r.heartbeat_at < ?",
    )
    .bind(&cutoff)
    .fetch_all(pool)
    .await
    .context("find_zombie_workflows")?;

    rows.into_iter()
        .map(|(id,)| Ok(Uuid::parse_str(&id)?))
        .collect()
}

pub async fn find_workflows_by_prompt(pool: &SqlitePool, prompt: &str) -> Result<Vec<Uuid>> {
    let hash = crate::checksum::hex_digest(prompt.as_bytes());
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT id FROM workflows WHERE prompt_hash = ? AND archived = 0")
            .bind(&hash)
            .fetch_all(pool)
            .await
            .context("find_workflows_by_prompt")?;

    rows.into_iter()
        .map(|(id,)| Ok(Uuid::parse_str(&id)?))
        .collect()
}

pub async fn archive_workflows(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE workflows SET archived = 1
         WHERE status IN ('completed', 'failed', 'aborted') AND archived = 0",
    )
    .execute(pool)
    .await
    .context("archive_workflows")?;
    Ok(result.rows_affected())
}

pub async fn purge_all_workflows(pool: &SqlitePool) -> Result<()> {
    sqlx::query("DELETE FROM workflows").execute(pool).await?;
    sqlx::query("DELETE FROM workflow_locks").execute(pool).await?;
    sqlx::query("DELETE FROM running_workflows").execute(pool).await?;
    sqlx::query("DELETE FROM active_workflow").execute(pool).await?;
    Ok(())
}

pub async fn delete_workflow(pool: &SqlitePool, workflow_id: Uuid) -> Result<()> {
    let id = workflow_id.to_string();
    sqlx::query("DELETE FROM workflows WHERE id = ?")
        .bind(&id)
        .execute(pool)
        .await
        .context("delete_workflow")?;
    sqlx::query("DELETE FROM workflow_locks WHERE workflow_id = ?")
        .bind(&id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM running_workflows WHERE workflow_id = ?")
        .bind(&id)
        .execute(pool)
        .await?;
    sqlx::query("UPDATE active_workflow SET workflow_id = NULL WHERE workflow_id = ?")
        .bind(&id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Transaction-scoped variant of [`load_by_id`], for callers composing
/// several reads/writes under one commit (see `state_manager::execute_atomically`).
pub async fn load_by_id_tx(
    conn: &mut sqlx::SqliteConnection,
    id: Uuid,
) -> Result<Option<WorkflowState>> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT payload FROM workflows WHERE id = ? AND archived = 0")
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await
            .context("load_by_id_tx")?;

    row.map(|(payload,)| {
        serde_json::from_str(&payload).context("deserialize workflow state")
    })
    .transpose()
}

/// Transaction-scoped variant of [`save_workflow`].
pub async fn save_workflow_tx(
    conn: &mut sqlx::SqliteConnection,
    state: &WorkflowState,
) -> Result<()> {
    let id_str = state.definition.id.to_string();

    let existing_version: Option<(i64,)> =
        sqlx::query_as("SELECT version FROM workflows WHERE id = ?")
            .bind(&id_str)
            .fetch_optional(&mut *conn)
            .await
            .context("check existing workflow version")?;

    if let Some((existing,)) = existing_version {
        if state.version < existing {
            anyhow::bail!(
                "stale save rejected: version {} < stored version {}",
                state.version,
                existing
            );
        }
    }

    let payload = serde_json::to_string(state).context("serialize workflow state")?;
    let prompt_hash = crate::checksum::hex_digest(state.definition.prompt.as_bytes());
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO workflows
            (id, version, checksum, status, current_phase, prompt, prompt_hash, payload, active, archived, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, 0, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            version = excluded.version,
            checksum = excluded.checksum,
            status = excluded.status,
            current_phase = excluded.current_phase,
            prompt = excluded.prompt,
            prompt_hash = excluded.prompt_hash,
            payload = excluded.payload,
            active = 1,
            updated_at = excluded.updated_at",
    )
    .bind(&id_str)
    .bind(state.version)
    .bind(&state.checksum)
    .bind(state.run.status.to_string())
    .bind(state.run.current_phase.to_string())
    .bind(&state.definition.prompt)
    .bind(&prompt_hash)
    .bind(&payload)
    .bind(now.as_str())
    .bind(now.as_str())
    .execute(&mut *conn)
    .await
    .context("insert/update workflow row")?;

    Ok(())
}

/// Transaction-scoped variant of [`set_workflow_running`].
pub async fn set_workflow_running_tx(
    conn: &mut sqlx::SqliteConnection,
    workflow_id: Uuid,
    pid: i64,
    host: &str,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO running_workflows (workflow_id, started_at, lock_holder_pid, lock_holder_host, heartbeat_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(workflow_id) DO UPDATE SET
            lock_holder_pid = excluded.lock_holder_pid,
            lock_holder_host = excluded.lock_holder_host,
            heartbeat_at = excluded.heartbeat_at",
    )
    .bind(workflow_id.to_string())
    .bind(&now)
    .bind(pid)
    .bind(host)
    .bind(&now)
    .execute(&mut *conn)
    .await
    .context("set_workflow_running_tx")?;
    Ok(())
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid timestamp: {s:?}"))?
        .with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Blueprint, Workflow};
    use crate::pool::{create_pool, run_migrations};
    use crate::config::StoreConfig;

    async fn test_pool() -> SqlitePool {
        let pool = create_pool(&StoreConfig::in_memory()).await.unwrap();
        run_migrations(&pool, crate::pool::default_migrations_path())
            .await
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let pool = test_pool().await;
        let wf = Workflow::new("hello", Blueprint::default());
        let state = WorkflowState::from_workflow(&wf);

        save_workflow(&pool, &state).await.unwrap();
        let loaded = load_by_id(&pool, wf.id).await.unwrap().unwrap();
        assert_eq!(loaded.definition.id, wf.id);
        assert_eq!(loaded.checksum, state.checksum);
    }

    #[tokio::test]
    async fn save_rejects_stale_version() {
        let pool = test_pool().await;
        let wf = Workflow::new("hello", Blueprint::default());
        let mut state = WorkflowState::from_workflow(&wf);
        state.version = 5;
        save_workflow(&pool, &state).await.unwrap();

        state.version = 4;
        state.checksum = state.compute_checksum();
        let err = save_workflow(&pool, &state).await.unwrap_err();
        assert!(err.to_string().contains("stale save rejected"));
    }

    #[tokio::test]
    async fn active_workflow_pointer() {
        let pool = test_pool().await;
        let wf = Workflow::new("hello", Blueprint::default());
        assert_eq!(get_active_workflow_id(&pool).await.unwrap(), None);
        set_active_workflow_id(&pool, wf.id).await.unwrap();
        assert_eq!(get_active_workflow_id(&pool).await.unwrap(), Some(wf.id));
        deactivate_workflow(&pool).await.unwrap();
        assert_eq!(get_active_workflow_id(&pool).await.unwrap(), None);
    }

    #[tokio::test]
    async fn lock_lifecycle() {
        let pool = test_pool().await;
        let id = Uuid::new_v4();

        assert!(acquire_workflow_lock(&pool, id, 100, "host-a", 30).await.unwrap());
        // Second holder fails fast while the lease is live.
        assert!(!acquire_workflow_lock(&pool, id, 200, "host-b", 30).await.unwrap());

        assert!(refresh_workflow_lock(&pool, id, 100).await.unwrap());
        assert!(!refresh_workflow_lock(&pool, id, 200).await.unwrap());

        release_workflow_lock(&pool, id, 100).await.unwrap();
        assert!(acquire_workflow_lock(&pool, id, 200, "host-b", 30).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lease_is_forcibly_takeable() {
        let pool = test_pool().await;
        let id = Uuid::new_v4();
        assert!(acquire_workflow_lock(&pool, id, 100, "host-a", 0).await.unwrap());
        // ttl_secs=0: the lease is immediately stale for the next acquirer.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(acquire_workflow_lock(&pool, id, 200, "host-b", 30).await.unwrap());
        assert!(!refresh_workflow_lock(&pool, id, 100).await.unwrap());
    }

    #[tokio::test]
    async fn running_set_and_zombie_detection() {
        let pool = test_pool().await;
        let wf = Workflow::new("hello", Blueprint::default());
        let mut state = WorkflowState::from_workflow(&wf);
        state.run.status = crate::models::WorkflowStatus::Running;
        state.checksum = state.compute_checksum();
        save_workflow(&pool, &state).await.unwrap();

        set_workflow_running(&pool, wf.id, 1, "host").await.unwrap();
        assert!(is_workflow_running(&pool, wf.id).await.unwrap());

        let zombies = find_zombie_workflows(&pool, 0).await.unwrap();
        assert!(zombies.contains(&wf.id));

        update_heartbeat(&pool, wf.id).await.unwrap();
        clear_workflow_running(&pool, wf.id).await.unwrap();
        assert!(!is_workflow_running(&pool, wf.id).await.unwrap());
    }

    #[tokio::test]
    async fn find_by_prompt_and_archive() {
        let pool = test_pool().await;
        let wf = Workflow::new("find me", Blueprint::default());
        let mut state = WorkflowState::from_workflow(&wf);
        state.run.status = crate::models::WorkflowStatus::Completed;
        state.checksum = state.compute_checksum();
        save_workflow(&pool, &state).await.unwrap();

        let found = find_workflows_by_prompt(&pool, "find me").await.unwrap();
        assert_eq!(found, vec![wf.id]);

        let archived = archive_workflows(&pool).await.unwrap();
        assert_eq!(archived, 1);
        assert!(load_by_id(&pool, wf.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_and_purge() {
        let pool = test_pool().await;
        let wf = Workflow::new("hello", Blueprint::default());
        let state = WorkflowState::from_workflow(&wf);
        save_workflow(&pool, &state).await.unwrap();

        delete_workflow(&pool, wf.id).await.unwrap();
        assert!(load_by_id(&pool, wf.id).await.unwrap().is_none());

        save_workflow(&pool, &state).await.unwrap();
        purge_all_workflows(&pool).await.unwrap();
        assert!(list_workflows(&pool).await.unwrap().is_empty());
    }
}
