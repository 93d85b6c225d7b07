//! [`Engine`] implementation backed by the bundled `SQLite` library.
//!
//! This file contains **no `unsafe` code**. All FFI interaction is delegated
//! to [`ffi::RawDb`] and [`ffi::RawStmt`].

use std::os::raw::c_int;
use std::path::Path;

use crate::engine::{Engine, FillRequest, NativeStatement};
use crate::error::{DbError, DbResult};
use crate::ffi::{self, RawDb, RawStmt};
use crate::value::FieldValue;
use crate::window::WindowBuffer;

/// A native `SQLite` connection.
pub struct SqliteEngine {
    db: RawDb,
}

impl SqliteEngine {
    /// Opens (or creates) a database at `path`.
    ///
    /// Pass `read_only = true` for read-only access.
    ///
    /// # Errors
    ///
    /// Returns the engine's error if the file cannot be opened.
    pub fn open(path: &Path, read_only: bool) -> DbResult<Self> {
        let path_str = path.to_string_lossy();
        let flags = if read_only {
            ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_FULLMUTEX
        } else {
            ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE | ffi::SQLITE_OPEN_FULLMUTEX
        };
        let db = RawDb::open(&path_str, flags)?;
        Ok(Self { db })
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns the engine's error if `SQLite` cannot allocate the database.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::open(Path::new(":memory:"), false)
    }
}

impl Engine for SqliteEngine {
    fn prepare(&self, sql: &str) -> DbResult<Box<dyn NativeStatement>> {
        let raw = self.db.prepare(sql)?;
        Ok(Box::new(SqliteStatement { raw }))
    }

    fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.db.exec(sql)
    }

    fn execute_batch_zeroized(&self, sql: &str) -> DbResult<()> {
        self.db.exec_zeroized(sql)
    }

    fn changes(&self) -> usize {
        self.db.changes()
    }

    fn last_insert_rowid(&self) -> i64 {
        self.db.last_insert_rowid()
    }
}

impl std::fmt::Debug for SqliteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEngine").finish_non_exhaustive()
    }
}

/// A compiled `SQLite` statement.
struct SqliteStatement {
    raw: RawStmt,
}

fn to_c_index(index: usize) -> DbResult<c_int> {
    c_int::try_from(index)
        .map_err(|_| DbError::new(ffi::SQLITE_RANGE, format!("index {index} out of range")))
}

fn to_i64(value: usize, what: &str) -> DbResult<i64> {
    i64::try_from(value)
        .map_err(|_| DbError::new(ffi::SQLITE_RANGE, format!("{what} {value} out of range")))
}

impl SqliteStatement {
    /// Steps once, retrying busy/locked results according to `request`.
    /// Returns `true` when a row is available.
    fn step_with_retry(&mut self, request: &FillRequest) -> DbResult<bool> {
        let mut retries = 0;
        loop {
            let rc = self.raw.step();
            match rc {
                ffi::SQLITE_ROW => return Ok(true),
                ffi::SQLITE_DONE => return Ok(false),
                _ if matches!(rc & 0xff, ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED)
                    && retries < request.busy_retry_limit =>
                {
                    retries += 1;
                    std::thread::sleep(request.busy_retry_delay);
                }
                _ => return Err(self.raw.error(rc)),
            }
        }
    }

    fn read_row(&self, columns: usize) -> DbResult<Vec<FieldValue>> {
        (0..columns)
            .map(|column| {
                let idx = to_c_index(column)?;
                Ok(match self.raw.column_type(idx) {
                    ffi::SQLITE_INTEGER => FieldValue::Integer(self.raw.column_i64(idx)),
                    ffi::SQLITE_FLOAT => FieldValue::Float(self.raw.column_f64(idx)),
                    ffi::SQLITE_BLOB => FieldValue::Blob(self.raw.column_blob(idx)),
                    ffi::SQLITE_NULL => FieldValue::Null,
                    _ => FieldValue::Text(self.raw.column_text(idx)),
                })
            })
            .collect()
    }

    /// The fill proper; the caller resets the statement afterwards.
    fn fill_rows(&mut self, window: &mut WindowBuffer, request: &FillRequest) -> DbResult<usize> {
        let start = request.start_position;

        // Logical position of the next row the statement will produce.
        let mut position = 0;
        if let Some(offset_param) = request.offset_param {
            // The engine skips the rows itself.
            self.raw
                .bind_i64(to_c_index(offset_param)?, to_i64(start, "start position")?)?;
            position = start;
        }

        let columns = self.column_count();
        window.clear();
        if !window.set_column_count(columns) {
            return Err(DbError::illegal_state("window column count mismatch"));
        }

        while position < start {
            if !self.step_with_retry(request)? {
                tracing::debug!(start, rows = position, "start position past the end of the result set");
                return Ok(position);
            }
            position += 1;
        }

        let mut added = 0;
        let mut window_full = false;
        loop {
            if window_full {
                if request.last_position > 0 && position >= request.last_position {
                    // Count already known to the caller.
                    break;
                }
            } else if request.max_rows.is_some_and(|max| added >= max) {
                break;
            }

            if !self.step_with_retry(request)? {
                break;
            }
            if window_full {
                position += 1;
                continue;
            }

            let row = self.read_row(columns)?;
            if WindowBuffer::row_size(&row) > window.capacity() {
                return Err(DbError::new(
                    ffi::SQLITE_TOOBIG,
                    format!("row {position} does not fit into an empty window"),
                ));
            }
            match window.push_row(row)? {
                None => added += 1,
                Some(row) if position <= request.required_position => {
                    // The required row is not in this window yet: slide the
                    // window forward so it starts at the current row.
                    tracing::trace!(from = window.start_position(), to = position, "sliding window");
                    window.clear();
                    window.set_column_count(columns);
                    window.set_start_position(position);
                    window.push_row(row)?;
                    added = 1;
                }
                Some(_) => window_full = true,
            }
            position += 1;
        }
        Ok(position)
    }
}

impl NativeStatement for SqliteStatement {
    fn parameter_count(&self) -> usize {
        usize::try_from(self.raw.bind_parameter_count()).unwrap_or(0)
    }

    fn bind_null(&mut self, index: usize) -> DbResult<()> {
        self.raw.bind_null(to_c_index(index)?)
    }

    fn bind_i64(&mut self, index: usize, value: i64) -> DbResult<()> {
        self.raw.bind_i64(to_c_index(index)?, value)
    }

    fn bind_f64(&mut self, index: usize, value: f64) -> DbResult<()> {
        self.raw.bind_f64(to_c_index(index)?, value)
    }

    fn bind_text(&mut self, index: usize, value: &str) -> DbResult<()> {
        self.raw.bind_text(to_c_index(index)?, value)
    }

    fn bind_blob(&mut self, index: usize, value: &[u8]) -> DbResult<()> {
        self.raw.bind_blob(to_c_index(index)?, value)
    }

    fn clear_bindings(&mut self) -> DbResult<()> {
        self.raw.clear_bindings()
    }

    fn column_count(&self) -> usize {
        usize::try_from(self.raw.column_count()).unwrap_or(0)
    }

    fn column_name(&self, index: usize) -> DbResult<String> {
        if index >= self.column_count() {
            return Err(DbError::new(
                ffi::SQLITE_RANGE,
                format!("column index {index} out of range"),
            ));
        }
        self.raw
            .column_name(to_c_index(index)?)
            .ok_or_else(|| DbError::new(ffi::SQLITE_ERROR, "out of memory reading column name"))
    }

    fn execute(&mut self) -> DbResult<usize> {
        let mut rows = 0;
        let result = loop {
            match self.raw.step() {
                ffi::SQLITE_ROW => rows += 1,
                ffi::SQLITE_DONE => break Ok(rows),
                rc => break Err(self.raw.error(rc)),
            }
        };
        self.raw.reset();
        result
    }

    fn fill_window(
        &mut self,
        window: &mut WindowBuffer,
        request: &FillRequest,
    ) -> DbResult<usize> {
        let result = self.fill_rows(window, request);
        // Bindings survive the reset so the statement can be filled again.
        self.raw.reset();
        result
    }
}
