//! Configuration (SPEC_FULL.md §B.3): the recognised config surface from
//! spec.md §6, plus the operator-support pruning knob from §C.

use crate::error::{Result, StoreError};
use crate::query;
use crate::update;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct Config {
    pub master_index_key: String,
    pub lock_timeout_ms: u64,
    pub process_mutex_timeout_ms: u64,
    pub version: u32,
    pub max_history_entries: usize,
    pub file_io_max_attempts: u32,
    pub file_io_backoff_ms: u64,
    pub supported_query_operators: HashSet<&'static str>,
    pub supported_update_operators: HashSet<&'static str>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            master_index_key: "GASDB_MASTER_INDEX".to_string(),
            lock_timeout_ms: 30_000,
            process_mutex_timeout_ms: 10_000,
            version: 1,
            max_history_entries: 50,
            file_io_max_attempts: 3,
            file_io_backoff_ms: 200,
            supported_query_operators: query::default_supported_operators(),
            supported_update_operators: update::default_supported_operators(),
        }
    }
}

impl Config {
    /// Enable the full supplemental operator set from SPEC_FULL.md §C
    /// (`$ne`/`$in`/`$nin`/`$exists` and `$pull`/`$pop`) on top of the
    /// always-on defaults.
    pub fn with_all_operators_enabled(mut self) -> Self {
        self.supported_query_operators = query::all_known_operators();
        self.supported_update_operators = update::all_known_operators();
        self
    }

    /// Rejects config values that can never produce correct behaviour
    /// (a zero timeout can never be acquired, a zero retry count can never
    /// attempt an I/O operation). Called by `Database::open` so a bad
    /// config fails fast instead of surfacing as a confusing `LockTimeout`
    /// or `FileIo` error much later.
    pub fn validate(&self) -> Result<()> {
        if self.master_index_key.is_empty() {
            return Err(StoreError::ConfigurationError("master_index_key must not be empty".into()));
        }
        if self.lock_timeout_ms == 0 {
            return Err(StoreError::ConfigurationError("lock_timeout_ms must be greater than zero".into()));
        }
        if self.process_mutex_timeout_ms == 0 {
            return Err(StoreError::ConfigurationError(
                "process_mutex_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.file_io_max_attempts == 0 {
            return Err(StoreError::ConfigurationError(
                "file_io_max_attempts must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.master_index_key, "GASDB_MASTER_INDEX");
        assert_eq!(c.lock_timeout_ms, 30_000);
        assert_eq!(c.process_mutex_timeout_ms, 10_000);
        assert_eq!(c.version, 1);
        assert_eq!(c.max_history_entries, 50);
        assert_eq!(c.file_io_max_attempts, 3);
        assert_eq!(c.file_io_backoff_ms, 200);
    }

    #[test]
    fn validate_accepts_defaults_and_rejects_zero_timeout() {
        assert!(Config::default().validate().is_ok());
        let mut bad = Config::default();
        bad.lock_timeout_ms = 0;
        assert!(matches!(bad.validate().unwrap_err(), StoreError::ConfigurationError(_)));
    }
}
