//! Store configuration: where the single-file SQLite database lives.

use std::fmt;

/// Default store location, relative to the process's working directory.
pub const DEFAULT_URL: &str = "sqlite://wf-state.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database_url: String,
}

impl StoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// Read `WF_DATABASE_URL`, falling back to [`DEFAULT_URL`].
    pub fn from_env() -> Self {
        let database_url =
            std::env::var("WF_DATABASE_URL").unwrap_or_else(|_| DEFAULT_URL.to_owned());
        Self { database_url }
    }

    /// In-memory database, useful for tests.
    pub fn in_memory() -> Self {
        Self::new("sqlite::memory:")
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

impl fmt::Display for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.database_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_uses_default_url() {
        assert_eq!(StoreConfig::default().database_url, DEFAULT_URL);
    }

    #[test]
    fn new_sets_url() {
        let cfg = StoreConfig::new("sqlite:///tmp/x.db");
        assert_eq!(cfg.database_url, "sqlite:///tmp/x.db");
    }

    #[test]
    fn in_memory_url() {
        assert_eq!(StoreConfig::in_memory().database_url, "sqlite::memory:");
    }
}
