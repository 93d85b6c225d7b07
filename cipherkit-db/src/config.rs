//! Connection configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::database::{CorruptionHandler, LogCorruption};

/// Default number of retries when a step reports `SQLITE_BUSY`/`SQLITE_LOCKED`.
pub const DEFAULT_BUSY_RETRY_LIMIT: u32 = 50;

/// Default sleep between busy retries.
pub const DEFAULT_BUSY_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Options applied when opening a [`Database`](crate::Database).
#[derive(Clone)]
pub struct DatabaseConfig {
    /// Open the database read-only.
    pub read_only: bool,
    /// Busy/locked retries per step during a window fill.
    pub busy_retry_limit: u32,
    /// Sleep between busy retries.
    pub busy_retry_delay: Duration,
    /// Include SQL text in fill logs.
    pub log_sql_statements: bool,
    /// Fills slower than this are logged at `warn` level.
    pub slow_fill_threshold: Option<Duration>,
    /// Invoked once per corruption report.
    pub corruption_handler: Arc<dyn CorruptionHandler>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            busy_retry_limit: DEFAULT_BUSY_RETRY_LIMIT,
            busy_retry_delay: DEFAULT_BUSY_RETRY_DELAY,
            log_sql_statements: false,
            slow_fill_threshold: None,
            corruption_handler: Arc::new(LogCorruption),
        }
    }
}

impl DatabaseConfig {
    /// Opens the database read-only.
    #[must_use]
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Sets the busy retry policy.
    #[must_use]
    pub fn with_busy_retry(mut self, limit: u32, delay: Duration) -> Self {
        self.busy_retry_limit = limit;
        self.busy_retry_delay = delay;
        self
    }

    /// Logs SQL text on each fill.
    #[must_use]
    pub fn with_sql_logging(mut self, enabled: bool) -> Self {
        self.log_sql_statements = enabled;
        self
    }

    /// Warns about fills slower than `threshold`.
    #[must_use]
    pub fn with_slow_fill_threshold(mut self, threshold: Duration) -> Self {
        self.slow_fill_threshold = Some(threshold);
        self
    }

    /// Replaces the corruption handler.
    #[must_use]
    pub fn with_corruption_handler(mut self, handler: Arc<dyn CorruptionHandler>) -> Self {
        self.corruption_handler = handler;
        self
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("read_only", &self.read_only)
            .field("busy_retry_limit", &self.busy_retry_limit)
            .field("busy_retry_delay", &self.busy_retry_delay)
            .field("log_sql_statements", &self.log_sql_statements)
            .field("slow_fill_threshold", &self.slow_fill_threshold)
            .finish_non_exhaustive()
    }
}
