//! Database connection: the native engine handle plus its connection lock.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::DatabaseConfig;
use crate::engine::{Engine, NativeStatement};
use crate::error::{DbError, DbResult};
use crate::lock::{ConnectionGuard, ConnectionLock};
use crate::sqlite::SqliteEngine;
use crate::statement::{Bind, CompiledStatement};
use crate::value::BindValue;

/// Receives corruption reports from a [`Database`].
pub trait CorruptionHandler: Send + Sync {
    /// Called once per corruption report. `path` is `None` for in-memory
    /// databases.
    fn on_corruption(&self, path: Option<&Path>);

    /// Whether the handler removes the database files. The database is
    /// closed before such a handler runs.
    fn deletes_files(&self) -> bool {
        false
    }
}

/// Default handler: logs the report and leaves the file alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCorruption;

impl CorruptionHandler for LogCorruption {
    fn on_corruption(&self, path: Option<&Path>) {
        tracing::error!(path = ?path, "database reported corruption");
    }
}

/// Deletes the database file and its `-journal`, `-wal` and `-shm` side
/// files so the next open starts from an empty database.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOnCorruption;

impl DeleteOnCorruption {
    fn side_file(path: &Path, suffix: &str) -> PathBuf {
        let mut name = OsString::from(path.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    }
}

impl CorruptionHandler for DeleteOnCorruption {
    fn deletes_files(&self) -> bool {
        true
    }

    fn on_corruption(&self, path: Option<&Path>) {
        let Some(path) = path else {
            return;
        };
        tracing::error!(path = %path.display(), "removing corrupt database");
        let files = [
            path.to_path_buf(),
            Self::side_file(path, "-journal"),
            Self::side_file(path, "-wal"),
            Self::side_file(path, "-shm"),
        ];
        for file in &files {
            match std::fs::remove_file(file) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(file = %file.display(), error = %err, "could not delete file");
                }
            }
        }
    }
}

/// A database connection.
///
/// Shared as `Arc<Database>`: every compiled statement keeps the connection
/// alive, so a [`Query`](crate::Query) never outlives its connection. All
/// native calls made through this type or its statements happen while the
/// connection lock is held.
pub struct Database {
    engine: Box<dyn Engine>,
    lock: ConnectionLock,
    path: Option<PathBuf>,
    config: DatabaseConfig,
    open: AtomicBool,
    corruption_reports: AtomicUsize,
}

impl Database {
    /// Opens (or creates) the database at `path` using the bundled `SQLite`
    /// engine.
    ///
    /// # Errors
    ///
    /// Returns the engine's error if the file cannot be opened.
    pub fn open(path: &Path, config: DatabaseConfig) -> DbResult<Arc<Self>> {
        let engine = SqliteEngine::open(path, config.read_only)?;
        tracing::debug!(path = %path.display(), read_only = config.read_only, "opened database");
        Ok(Self::with_engine(
            Box::new(engine),
            Some(path.to_path_buf()),
            config,
        ))
    }

    /// Opens a private in-memory database (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns the engine's error if `SQLite` cannot allocate the database.
    pub fn open_in_memory() -> DbResult<Arc<Self>> {
        let engine = SqliteEngine::open_in_memory()?;
        Ok(Self::with_engine(
            Box::new(engine),
            None,
            DatabaseConfig::default(),
        ))
    }

    /// Wraps an arbitrary engine, e.g. an instrumented one.
    #[must_use]
    pub fn with_engine(
        engine: Box<dyn Engine>,
        path: Option<PathBuf>,
        config: DatabaseConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            lock: ConnectionLock::new(),
            path,
            config,
            open: AtomicBool::new(true),
            corruption_reports: AtomicUsize::new(0),
        })
    }

    /// Acquires the connection lock, blocking until it is held.
    pub fn lock(&self) -> ConnectionGuard<'_> {
        self.lock.lock()
    }

    /// Attempts to acquire the connection lock without blocking.
    pub fn try_lock(&self) -> Option<ConnectionGuard<'_>> {
        self.lock.try_lock()
    }

    /// The connection lock itself.
    #[must_use]
    pub const fn connection_lock(&self) -> &ConnectionLock {
        &self.lock
    }

    /// File backing the database (`None` when in memory).
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Configuration the database was opened with.
    #[must_use]
    pub const fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Returns `false` once [`close`](Self::close) was called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Closes the database for new work. Statements compiled earlier keep
    /// the native handle alive until they are closed.
    pub fn close(&self) {
        let _guard = self.lock();
        if self.open.swap(false, Ordering::AcqRel) {
            tracing::debug!(path = ?self.path, "closed database");
        }
    }

    pub(crate) fn ensure_open(&self) -> DbResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DbError::illegal_state(format!(
                "database {} already closed",
                self.label()
            )))
        }
    }

    fn label(&self) -> String {
        self.path
            .as_ref()
            .map_or_else(|| ":memory:".to_string(), |p| p.display().to_string())
    }

    /// Reports store corruption: logs it and calls the configured
    /// [`CorruptionHandler`]. A handler that deletes the files runs on a
    /// closed database.
    pub fn on_corruption(&self) {
        self.corruption_reports.fetch_add(1, Ordering::AcqRel);
        tracing::error!(database = %self.label(), "calling error handler for corrupt database");
        let handler = &self.config.corruption_handler;
        if handler.deletes_files() {
            self.close();
        }
        handler.on_corruption(self.path());
    }

    /// How often corruption was reported on this connection.
    #[must_use]
    pub fn corruption_count(&self) -> usize {
        self.corruption_reports.load(Ordering::Acquire)
    }

    /// Compiles `sql` on the native engine under the connection lock.
    pub(crate) fn prepare_native(&self, sql: &str) -> DbResult<Box<dyn NativeStatement>> {
        let _guard = self.lock();
        self.ensure_open()?;
        self.engine.prepare(sql)
    }

    // ── execute_batch ───────────────────────────────────────────────────

    /// Executes one or more SQL statements separated by semicolons.
    ///
    /// No result rows are returned. Suitable for DDL, PRAGMAs, and
    /// multi-statement scripts.
    ///
    /// # Errors
    ///
    /// Returns the engine's error, or [`DbError::IllegalState`] if the
    /// database is closed.
    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        let _guard = self.lock();
        self.ensure_open()?;
        self.engine.execute_batch(sql)
    }

    /// Like [`execute_batch`](Self::execute_batch) but the engine wipes its
    /// copy of `sql` afterwards. Use for SQL containing key material.
    ///
    /// # Errors
    ///
    /// Same as [`execute_batch`](Self::execute_batch).
    pub fn execute_batch_zeroized(&self, sql: &str) -> DbResult<()> {
        let _guard = self.lock();
        self.ensure_open()?;
        self.engine.execute_batch_zeroized(sql)
    }

    // ── execute (single statement) ──────────────────────────────────────

    /// Compiles and runs a single statement with the given arguments.
    ///
    /// Returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// Returns the engine's error for invalid SQL or arguments.
    pub fn execute(self: &Arc<Self>, sql: &str, args: &[BindValue]) -> DbResult<usize> {
        let _guard = self.lock();
        let statement = CompiledStatement::new(self, sql)?;
        for (i, value) in args.iter().enumerate() {
            statement.bind_value(i + 1, value)?;
        }
        statement.execute()?;
        let changes = self.engine.changes();
        statement.close();
        Ok(changes)
    }

    /// Number of rows changed by the most recent statement.
    #[must_use]
    pub fn changes(&self) -> usize {
        let _guard = self.lock();
        self.engine.changes()
    }

    /// Rowid of the most recent successful INSERT.
    #[must_use]
    pub fn last_insert_rowid(&self) -> i64 {
        let _guard = self.lock();
        self.engine.last_insert_rowid()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
