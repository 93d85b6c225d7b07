//! A compiled statement bound to one [`Database`].
//!
//! Every native call made here happens under the connection lock and while
//! holding a reference on the statement, so a concurrent [`close`] from
//! another owner cannot finalize the handle mid-call.
//!
//! [`close`]: CompiledStatement::close

use std::sync::Arc;

use crate::database::Database;
use crate::engine::NativeStatement;
use crate::error::DbResult;
use crate::refcount::{RefCounted, ReferenceGuard};
use crate::value::BindValue;

/// The typed bind family shared by [`CompiledStatement`] and
/// [`Query`](crate::Query).
///
/// [`bind_value`](Self::bind_value) dispatches a [`BindValue`] to the typed
/// methods in a fixed order: floating point (`f32` widened), integers (`i32`
/// widened), booleans as `1`/`0`, blobs, and text for everything else.
pub trait Bind {
    /// Binds SQL NULL at the 1-based `index`.
    ///
    /// # Errors
    ///
    /// Misuse for an out-of-range index; illegal state once closed.
    fn bind_null(&self, index: usize) -> DbResult<()>;

    /// Binds a 64-bit integer.
    ///
    /// # Errors
    ///
    /// See [`bind_null`](Self::bind_null).
    fn bind_long(&self, index: usize, value: i64) -> DbResult<()>;

    /// Binds a 64-bit float.
    ///
    /// # Errors
    ///
    /// See [`bind_null`](Self::bind_null).
    fn bind_double(&self, index: usize, value: f64) -> DbResult<()>;

    /// Binds text.
    ///
    /// # Errors
    ///
    /// See [`bind_null`](Self::bind_null).
    fn bind_string(&self, index: usize, value: &str) -> DbResult<()>;

    /// Binds a blob.
    ///
    /// # Errors
    ///
    /// See [`bind_null`](Self::bind_null).
    fn bind_blob(&self, index: usize, value: &[u8]) -> DbResult<()>;

    /// Binds a typed value through the matching typed method.
    ///
    /// # Errors
    ///
    /// See [`bind_null`](Self::bind_null).
    fn bind_value(&self, index: usize, value: &BindValue) -> DbResult<()> {
        match value {
            BindValue::Null => self.bind_null(index),
            BindValue::Double(v) => self.bind_double(index, *v),
            BindValue::Float(v) => self.bind_double(index, f64::from(*v)),
            BindValue::Long(v) => self.bind_long(index, *v),
            BindValue::Int(v) => self.bind_long(index, i64::from(*v)),
            BindValue::Bool(v) => self.bind_long(index, i64::from(*v)),
            BindValue::Blob(v) => self.bind_blob(index, v),
            BindValue::Text(v) => self.bind_string(index, v),
        }
    }
}

/// One compiled native statement.
///
/// Finalized when the last reference is released: either on
/// [`close`](Self::close) or, if an operation is in flight at that moment,
/// when that operation finishes. Dropping the statement closes it.
pub struct CompiledStatement {
    database: Arc<Database>,
    sql: String,
    handle: RefCounted<Box<dyn NativeStatement>>,
    parameter_count: usize,
}

impl CompiledStatement {
    /// Compiles `sql` against `database`.
    ///
    /// # Errors
    ///
    /// Returns the engine's error for invalid SQL, or illegal state if the
    /// database is closed.
    pub fn new(database: &Arc<Database>, sql: &str) -> DbResult<Self> {
        let native = database.prepare_native(sql)?;
        let parameter_count = native.parameter_count();
        if database.config().log_sql_statements {
            tracing::debug!(sql, parameter_count, "compiled statement");
        } else {
            tracing::debug!(parameter_count, "compiled statement");
        }
        Ok(Self {
            database: Arc::clone(database),
            sql: sql.to_string(),
            handle: RefCounted::new("statement", native),
            parameter_count,
        })
    }

    /// SQL text the statement was compiled from.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The database the statement belongs to.
    #[must_use]
    pub const fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// Number of declared parameters (including an OFFSET placeholder).
    #[must_use]
    pub const fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    /// Takes a reference on the native handle for the guard's lifetime.
    ///
    /// # Errors
    ///
    /// Illegal state if the statement is closed.
    pub fn acquire_reference(&self) -> DbResult<ReferenceGuard<'_, Box<dyn NativeStatement>>> {
        self.handle.acquire()
    }

    /// Runs `f` on the native statement with the connection lock and a
    /// reference held.
    fn with_native<R>(
        &self,
        f: impl FnOnce(&mut dyn NativeStatement) -> DbResult<R>,
    ) -> DbResult<R> {
        let _lock = self.database.lock();
        let reference = self.acquire_reference()?;
        reference.with(|native| f(native.as_mut()))?
    }

    /// Resets every parameter to NULL.
    ///
    /// # Errors
    ///
    /// Illegal state if the statement is closed.
    pub fn clear_bindings(&self) -> DbResult<()> {
        self.with_native(|s| s.clear_bindings())
    }

    /// Runs the statement to completion, discarding any rows.
    ///
    /// # Errors
    ///
    /// Returns the engine's error, or illegal state if closed.
    pub fn execute(&self) -> DbResult<usize> {
        self.with_native(|s| s.execute())
    }

    /// Releases the owner reference. Idempotent. The native statement is
    /// finalized under the connection lock as soon as no operation holds it.
    pub fn close(&self) {
        let _lock = self.database.lock();
        if !self.handle.is_closed() {
            self.handle.close();
            tracing::debug!(references = self.handle.reference_count(), "closed statement");
        }
    }

    /// Returns `true` once [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Current reference count, including the owner's.
    #[must_use]
    pub fn reference_count(&self) -> usize {
        self.handle.reference_count()
    }
}

impl Bind for CompiledStatement {
    fn bind_null(&self, index: usize) -> DbResult<()> {
        self.with_native(|s| s.bind_null(index))
    }

    fn bind_long(&self, index: usize, value: i64) -> DbResult<()> {
        self.with_native(|s| s.bind_i64(index, value))
    }

    fn bind_double(&self, index: usize, value: f64) -> DbResult<()> {
        self.with_native(|s| s.bind_f64(index, value))
    }

    fn bind_string(&self, index: usize, value: &str) -> DbResult<()> {
        self.with_native(|s| s.bind_text(index, value))
    }

    fn bind_blob(&self, index: usize, value: &[u8]) -> DbResult<()> {
        self.with_native(|s| s.bind_blob(index, value))
    }
}

impl Drop for CompiledStatement {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for CompiledStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledStatement")
            .field("sql", &self.sql)
            .field("parameter_count", &self.parameter_count)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn db() -> Arc<Database> {
        let db = Database::open_in_memory().expect("open in-memory db");
        db.execute_batch("CREATE TABLE t (a INTEGER, b TEXT);")
            .expect("create table");
        db
    }

    #[test]
    fn test_bind_out_of_range_is_misuse() {
        let db = db();
        let stmt = CompiledStatement::new(&db, "SELECT * FROM t WHERE a = ?1").expect("prepare");
        assert_eq!(stmt.parameter_count(), 1);
        let err = stmt.bind_long(2, 7).expect_err("index 2 out of range");
        assert_eq!(err.kind(), ErrorKind::Misuse);
        let err = stmt.bind_null(0).expect_err("index 0 out of range");
        assert_eq!(err.kind(), ErrorKind::Misuse);
    }

    #[test]
    fn test_bind_after_close_is_illegal_state() {
        let db = db();
        let stmt = CompiledStatement::new(&db, "SELECT * FROM t WHERE a = ?1").expect("prepare");
        stmt.close();
        stmt.close();
        assert!(stmt.is_closed());
        assert_eq!(stmt.reference_count(), 0);
        let err = stmt.bind_long(1, 7).expect_err("closed");
        assert_eq!(err.kind(), ErrorKind::IllegalState);
    }

    #[test]
    fn test_close_while_referenced_defers_finalize() {
        let db = db();
        let stmt = CompiledStatement::new(&db, "SELECT 1").expect("prepare");
        let guard = stmt.acquire_reference().expect("acquire");
        stmt.close();
        assert_eq!(stmt.reference_count(), 1);
        assert_eq!(guard.with(|s| s.column_count()).expect("still alive"), 1);
        drop(guard);
        assert_eq!(stmt.reference_count(), 0);
    }

    #[test]
    fn test_bind_value_dispatch_and_execute() {
        let db = db();
        let stmt =
            CompiledStatement::new(&db, "INSERT INTO t (a, b) VALUES (?1, ?2)").expect("prepare");
        stmt.bind_value(1, &BindValue::Bool(true)).expect("bind bool");
        stmt.bind_value(2, &BindValue::Int(5)).expect("bind int");
        assert_eq!(stmt.execute().expect("insert"), 0);
        assert_eq!(db.changes(), 1);
        stmt.clear_bindings().expect("clear");
        stmt.execute().expect("insert nulls");
        assert_eq!(db.last_insert_rowid(), 2);
    }

    #[test]
    fn test_invalid_sql_fails_to_compile() {
        let db = db();
        let err = CompiledStatement::new(&db, "SELEKT nothing").expect_err("syntax error");
        assert_eq!(err.kind(), ErrorKind::Other);
    }

    #[test]
    fn test_compile_on_closed_database_is_illegal_state() {
        let db = db();
        db.close();
        let err = CompiledStatement::new(&db, "SELECT 1").expect_err("closed db");
        assert_eq!(err.kind(), ErrorKind::IllegalState);
    }
}
