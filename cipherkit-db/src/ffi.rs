//! Raw `SQLite` bindings.
//!
//! The symbols come from `libsqlite3-sys`, which compiles the bundled
//! amalgamation (plain `SQLite`, or `SQLCipher` with the `sqlcipher` feature).
//! This is the **only** module that contains `unsafe` code or C types: the
//! rest of the crate talks to [`RawDb`] and [`RawStmt`].

#![allow(dead_code)]

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;

use libsqlite3_sys as sys;
use zeroize::Zeroizing;

use crate::error::{DbError, DbResult};

// ── SQLite constants ────────────────────────────────────────────────────

pub const SQLITE_OK: c_int = 0;
pub const SQLITE_ERROR: c_int = 1;
pub const SQLITE_BUSY: c_int = 5;
pub const SQLITE_LOCKED: c_int = 6;
pub const SQLITE_CORRUPT: c_int = 11;
pub const SQLITE_TOOBIG: c_int = 18;
pub const SQLITE_MISUSE: c_int = 21;
pub const SQLITE_RANGE: c_int = 25;
pub const SQLITE_NOTADB: c_int = 26;
pub const SQLITE_ROW: c_int = 100;
pub const SQLITE_DONE: c_int = 101;

// Column type constants
pub const SQLITE_INTEGER: c_int = 1;
pub const SQLITE_FLOAT: c_int = 2;
pub const SQLITE_TEXT: c_int = 3;
pub const SQLITE_BLOB: c_int = 4;
pub const SQLITE_NULL: c_int = 5;

// Open flags
pub const SQLITE_OPEN_READONLY: c_int = 0x0000_0001;
pub const SQLITE_OPEN_READWRITE: c_int = 0x0000_0002;
pub const SQLITE_OPEN_CREATE: c_int = 0x0000_0004;
pub const SQLITE_OPEN_FULLMUTEX: c_int = 0x0001_0000;

fn to_c_len(len: usize) -> DbResult<c_int> {
    c_int::try_from(len)
        .map_err(|_| DbError::new(SQLITE_TOOBIG, format!("value of {len} bytes is too large")))
}

fn to_c_string(s: &str, what: &str) -> DbResult<CString> {
    CString::new(s).map_err(|e| DbError::new(SQLITE_ERROR, format!("nul in {what}: {e}")))
}

fn errmsg_raw(db: *mut sys::sqlite3) -> String {
    unsafe {
        let ptr = sys::sqlite3_errmsg(db);
        if ptr.is_null() {
            "unknown error".to_string()
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }
}

// ── Connection handle ───────────────────────────────────────────────────

/// Owned `sqlite3*` handle. Closed when dropped.
pub struct RawDb {
    db: *mut sys::sqlite3,
}

// Safety: connections are opened with SQLITE_OPEN_FULLMUTEX (serialized
// threading mode), so the engine itself tolerates calls from any thread.
// The crate additionally serializes all calls behind the connection lock.
unsafe impl Send for RawDb {}
unsafe impl Sync for RawDb {}

impl RawDb {
    /// Opens (or creates) the database at `path` with the given open flags.
    pub fn open(path: &str, flags: c_int) -> DbResult<Self> {
        let c_path = to_c_string(path, "path")?;
        let mut db: *mut sys::sqlite3 = ptr::null_mut();
        let rc = unsafe { sys::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };
        if rc != SQLITE_OK {
            // If open failed but we got a handle, extract the error and close.
            let msg = if db.is_null() {
                format!("sqlite3_open_v2 returned {rc}")
            } else {
                let m = errmsg_raw(db);
                unsafe {
                    sys::sqlite3_close(db);
                }
                m
            };
            return Err(DbError::new(rc, msg));
        }
        Ok(Self { db })
    }

    /// Runs one or more semicolon-separated statements without results.
    pub fn exec(&self, sql: &str) -> DbResult<()> {
        let c_sql = to_c_string(sql, "SQL")?;
        self.exec_c(c_sql.as_ptr())
    }

    /// Like [`exec`](Self::exec) but the NUL-terminated copy of `sql` is
    /// zeroized once the call returns. Used for `PRAGMA key`.
    pub fn exec_zeroized(&self, sql: &str) -> DbResult<()> {
        if sql.as_bytes().contains(&0) {
            return Err(DbError::new(SQLITE_ERROR, "nul in SQL"));
        }
        let mut buf = Zeroizing::new(Vec::with_capacity(sql.len() + 1));
        buf.extend_from_slice(sql.as_bytes());
        buf.push(0);
        self.exec_c(buf.as_ptr().cast::<c_char>())
    }

    fn exec_c(&self, sql: *const c_char) -> DbResult<()> {
        let mut errmsg: *mut c_char = ptr::null_mut();
        let rc = unsafe { sys::sqlite3_exec(self.db, sql, None, ptr::null_mut(), &mut errmsg) };
        if rc != SQLITE_OK {
            let msg = if errmsg.is_null() {
                errmsg_raw(self.db)
            } else {
                let s = unsafe { CStr::from_ptr(errmsg) }
                    .to_string_lossy()
                    .into_owned();
                unsafe {
                    sys::sqlite3_free(errmsg.cast());
                }
                s
            };
            return Err(DbError::new(rc, msg));
        }
        Ok(())
    }

    /// Compiles a single statement.
    pub fn prepare(&self, sql: &str) -> DbResult<RawStmt> {
        let c_sql = to_c_string(sql, "SQL")?;
        let mut stmt: *mut sys::sqlite3_stmt = ptr::null_mut();
        let rc = unsafe {
            sys::sqlite3_prepare_v2(self.db, c_sql.as_ptr(), -1, &mut stmt, ptr::null_mut())
        };
        if rc != SQLITE_OK {
            return Err(DbError::new(rc, errmsg_raw(self.db)));
        }
        if stmt.is_null() {
            // Empty SQL or a comment-only string.
            return Err(DbError::new(SQLITE_MISUSE, "SQL contains no statement"));
        }
        Ok(RawStmt { stmt, db: self.db })
    }

    /// Number of rows changed by the most recent statement.
    pub fn changes(&self) -> usize {
        let n = unsafe { sys::sqlite3_changes(self.db) };
        usize::try_from(n).unwrap_or(0)
    }

    /// Rowid of the most recent successful INSERT.
    pub fn last_insert_rowid(&self) -> i64 {
        unsafe { sys::sqlite3_last_insert_rowid(self.db) }
    }
}

impl Drop for RawDb {
    fn drop(&mut self) {
        if !self.db.is_null() {
            // Every statement holds an `Arc<Database>` and finalizes before
            // releasing it, so no statement is open here.
            unsafe {
                sys::sqlite3_close(self.db);
            }
            self.db = ptr::null_mut();
        }
    }
}

// ── Statement handle ────────────────────────────────────────────────────

/// Owned `sqlite3_stmt*` handle. Finalized when dropped.
pub struct RawStmt {
    stmt: *mut sys::sqlite3_stmt,
    /// Owning `sqlite3*`, kept for error messages.
    db: *mut sys::sqlite3,
}

// Safety: a statement has a single owner and is only touched while the
// connection lock is held; the engine runs in serialized mode.
unsafe impl Send for RawStmt {}

impl RawStmt {
    fn check(&self, rc: c_int) -> DbResult<()> {
        if rc == SQLITE_OK {
            Ok(())
        } else {
            Err(self.error(rc))
        }
    }

    /// Builds an error for `code` using the connection's last message.
    pub fn error(&self, code: c_int) -> DbError {
        DbError::new(code, errmsg_raw(self.db))
    }

    // ── Binding ─────────────────────────────────────────────────────────

    pub fn bind_parameter_count(&self) -> c_int {
        unsafe { sys::sqlite3_bind_parameter_count(self.stmt) }
    }

    pub fn bind_null(&mut self, idx: c_int) -> DbResult<()> {
        let rc = unsafe { sys::sqlite3_bind_null(self.stmt, idx) };
        self.check(rc)
    }

    pub fn bind_i64(&mut self, idx: c_int, value: i64) -> DbResult<()> {
        let rc = unsafe { sys::sqlite3_bind_int64(self.stmt, idx, value) };
        self.check(rc)
    }

    pub fn bind_f64(&mut self, idx: c_int, value: f64) -> DbResult<()> {
        let rc = unsafe { sys::sqlite3_bind_double(self.stmt, idx, value) };
        self.check(rc)
    }

    pub fn bind_text(&mut self, idx: c_int, value: &str) -> DbResult<()> {
        let len = to_c_len(value.len())?;
        let rc = unsafe {
            sys::sqlite3_bind_text(
                self.stmt,
                idx,
                value.as_ptr().cast::<c_char>(),
                len,
                sys::SQLITE_TRANSIENT(),
            )
        };
        self.check(rc)
    }

    pub fn bind_blob(&mut self, idx: c_int, value: &[u8]) -> DbResult<()> {
        let len = to_c_len(value.len())?;
        let rc = unsafe {
            sys::sqlite3_bind_blob(
                self.stmt,
                idx,
                value.as_ptr().cast(),
                len,
                sys::SQLITE_TRANSIENT(),
            )
        };
        self.check(rc)
    }

    pub fn clear_bindings(&mut self) -> DbResult<()> {
        let rc = unsafe { sys::sqlite3_clear_bindings(self.stmt) };
        self.check(rc)
    }

    // ── Stepping ────────────────────────────────────────────────────────

    /// Steps once and returns the raw result code (`SQLITE_ROW`,
    /// `SQLITE_DONE`, or an error code).
    pub fn step(&mut self) -> c_int {
        unsafe { sys::sqlite3_step(self.stmt) }
    }

    /// Resets the statement; bindings are kept.
    pub fn reset(&mut self) -> c_int {
        unsafe { sys::sqlite3_reset(self.stmt) }
    }

    // ── Column reading ──────────────────────────────────────────────────

    pub fn column_count(&self) -> c_int {
        unsafe { sys::sqlite3_column_count(self.stmt) }
    }

    pub fn column_name(&self, idx: c_int) -> Option<String> {
        unsafe {
            let ptr = sys::sqlite3_column_name(self.stmt, idx);
            if ptr.is_null() {
                None
            } else {
                Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
            }
        }
    }

    pub fn column_type(&self, idx: c_int) -> c_int {
        unsafe { sys::sqlite3_column_type(self.stmt, idx) }
    }

    pub fn column_i64(&self, idx: c_int) -> i64 {
        unsafe { sys::sqlite3_column_int64(self.stmt, idx) }
    }

    pub fn column_f64(&self, idx: c_int) -> f64 {
        unsafe { sys::sqlite3_column_double(self.stmt, idx) }
    }

    /// Reads a column as text. Returns an empty string for NULL.
    pub fn column_text(&self, idx: c_int) -> String {
        unsafe {
            // column_text must be called before column_bytes so the length
            // refers to the UTF-8 conversion.
            let ptr = sys::sqlite3_column_text(self.stmt, idx);
            let len = sys::sqlite3_column_bytes(self.stmt, idx);
            if ptr.is_null() || len <= 0 {
                return String::new();
            }
            let bytes = std::slice::from_raw_parts(ptr, usize::try_from(len).unwrap_or(0));
            String::from_utf8_lossy(bytes).into_owned()
        }
    }

    /// Reads a column as a blob. Returns an empty `Vec` for NULL.
    pub fn column_blob(&self, idx: c_int) -> Vec<u8> {
        unsafe {
            let ptr = sys::sqlite3_column_blob(self.stmt, idx);
            let len = sys::sqlite3_column_bytes(self.stmt, idx);
            if ptr.is_null() || len <= 0 {
                return Vec::new();
            }
            std::slice::from_raw_parts(ptr.cast::<u8>(), usize::try_from(len).unwrap_or(0))
                .to_vec()
        }
    }
}

impl Drop for RawStmt {
    fn drop(&mut self) {
        if !self.stmt.is_null() {
            unsafe {
                sys::sqlite3_finalize(self.stmt);
            }
            self.stmt = ptr::null_mut();
        }
    }
}
