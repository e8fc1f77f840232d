//! SQLite-backed persistence for workflow state: models, the query layer,
//! and `SqliteStateManager`, the entry point everything above this crate
//! talks to.

pub mod checksum;
pub mod config;
pub mod error;
pub mod models;
pub mod pool;
pub mod queries;
pub mod state_manager;

pub use config::StoreConfig;
pub use error::{DomainError, ErrorCategory};
pub use state_manager::{AtomicFut, LockHolder, SqliteStateManager};
