//! Pool construction and migration runner for the SQLite-backed store.
//!
//! A single file, not a network connection: there is no
//! `ensure_database_exists` step, since SQLite creates the file on first
//! connect when `create_if_missing` is set.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::config::StoreConfig;

pub async fn create_pool(config: &StoreConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.database_url)
        .with_context(|| format!("invalid database url: {}", config.database_url))?
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to connect to {}", config.database_url))
}

/// Run migrations from `migrations_dir` against `pool`.
///
/// Uses the runtime-loaded migrator (`Migrator::new(dir)`), not the
/// compile-time `sqlx::migrate!()` macro, so this crate never needs a live
/// database at compile time.
pub async fn run_migrations(pool: &SqlitePool, migrations_dir: &Path) -> Result<()> {
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .with_context(|| format!("failed to load migrations from {}", migrations_dir.display()))?;
    migrator
        .run(pool)
        .await
        .context("failed to run migrations")?;
    Ok(())
}

pub fn default_migrations_path() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations"))
}
