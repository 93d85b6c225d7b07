//! The native engine boundary.
//!
//! [`Database`](crate::Database) talks to its storage engine only through
//! these traits. [`SqliteEngine`](crate::SqliteEngine) is the production
//! implementation; tests plug in instrumented engines to inject races and
//! corruption.
//!
//! Implementations may assume that every call happens while the owning
//! connection's lock is held, so no two calls on statements of the same
//! connection ever overlap.

use std::time::Duration;

use crate::error::DbResult;
use crate::window::WindowBuffer;

/// A native database handle.
pub trait Engine: Send + Sync {
    /// Compiles a single SQL statement.
    ///
    /// # Errors
    ///
    /// Returns the engine's error for invalid SQL.
    fn prepare(&self, sql: &str) -> DbResult<Box<dyn NativeStatement>>;

    /// Runs one or more statements without result rows.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by the engine.
    fn execute_batch(&self, sql: &str) -> DbResult<()>;

    /// Like [`execute_batch`](Self::execute_batch) for SQL carrying secrets
    /// (`PRAGMA key`). Implementations should wipe their copies of `sql`.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by the engine.
    fn execute_batch_zeroized(&self, sql: &str) -> DbResult<()> {
        self.execute_batch(sql)
    }

    /// Number of rows changed by the most recent statement.
    fn changes(&self) -> usize;

    /// Rowid of the most recent successful INSERT.
    fn last_insert_rowid(&self) -> i64;
}

/// One compiled statement owned by the engine.
///
/// Parameter indices are 1-based; column indices are 0-based. Binding an
/// index outside `1..=parameter_count()` must fail with a misuse error.
pub trait NativeStatement: Send {
    /// Number of declared parameters.
    fn parameter_count(&self) -> usize;

    /// Binds SQL NULL.
    ///
    /// # Errors
    ///
    /// Returns a misuse error for an out-of-range index.
    fn bind_null(&mut self, index: usize) -> DbResult<()>;

    /// Binds a 64-bit integer.
    ///
    /// # Errors
    ///
    /// Returns a misuse error for an out-of-range index.
    fn bind_i64(&mut self, index: usize, value: i64) -> DbResult<()>;

    /// Binds a 64-bit float.
    ///
    /// # Errors
    ///
    /// Returns a misuse error for an out-of-range index.
    fn bind_f64(&mut self, index: usize, value: f64) -> DbResult<()>;

    /// Binds text.
    ///
    /// # Errors
    ///
    /// Returns a misuse error for an out-of-range index.
    fn bind_text(&mut self, index: usize, value: &str) -> DbResult<()>;

    /// Binds a blob.
    ///
    /// # Errors
    ///
    /// Returns a misuse error for an out-of-range index.
    fn bind_blob(&mut self, index: usize, value: &[u8]) -> DbResult<()>;

    /// Resets every parameter to NULL.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    fn clear_bindings(&mut self) -> DbResult<()>;

    /// Number of result columns.
    fn column_count(&self) -> usize;

    /// Name of result column `index`.
    ///
    /// # Errors
    ///
    /// Returns a misuse error for an out-of-range index.
    fn column_name(&self, index: usize) -> DbResult<String>;

    /// Runs the statement to completion (for statements without rows).
    /// Returns the number of rows produced, if any.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    fn execute(&mut self) -> DbResult<usize>;

    /// Materializes rows into `window` according to `request` and returns
    /// the number of rows in the result set as far as it was counted.
    ///
    /// # Errors
    ///
    /// An invalid-state error means the statement or window was torn down
    /// (or cannot accept these rows); a corruption error means the store is
    /// damaged. Anything else is an ordinary engine failure.
    fn fill_window(&mut self, window: &mut WindowBuffer, request: &FillRequest)
        -> DbResult<usize>;
}

/// Parameters of one window fill, captured from the window and the query
/// when the fill starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillRequest {
    /// Window start position when the fill began.
    pub start_position: usize,
    /// Row the consumer needs to see.
    pub required_position: usize,
    /// 1-based index of the OFFSET parameter, if the statement has one.
    pub offset_param: Option<usize>,
    /// Row limit for this fill. `None` means "fill until the window is full".
    pub max_rows: Option<usize>,
    /// Row count the caller already knows (0 when unknown).
    pub last_position: usize,
    /// How often a busy/locked step is retried before giving up.
    pub busy_retry_limit: u32,
    /// Sleep between busy retries.
    pub busy_retry_delay: Duration,
}
