//! Windowed query execution over an embedded, optionally encrypted `SQLite`
//! engine.
//!
//! The crate pages the results of compiled, parameterized queries into
//! fixed-capacity [`ResultWindow`]s. A cursor layer built on top reads rows
//! at random positions and asks the [`Query`] to refill the window as it
//! scrolls:
//!
//! ```no_run
//! use cipherkit_db::{args, Database, Query, QueryArgs, ResultWindow};
//!
//! # fn main() -> Result<(), cipherkit_db::DbError> {
//! let db = Database::open_in_memory()?;
//! db.execute_batch("CREATE TABLE t (a INTEGER); INSERT INTO t VALUES (42);")?;
//! let query = Query::new(
//!     &db,
//!     "SELECT a FROM t WHERE a = ?1 LIMIT -1 OFFSET ?2",
//!     Some(2),
//!     QueryArgs::Typed(args![42]),
//! )?;
//! let window = ResultWindow::new(64 * 1024);
//! let rows = query.fill_window(&window, 100, 0)?.row_count();
//! assert_eq!(rows, 1);
//! # Ok(())
//! # }
//! ```
//!
//! All native calls on a connection happen under its [`ConnectionLock`].
//! Statements and windows are reference counted ([`RefCounted`]) so a
//! concurrent close never frees a handle mid-operation. The `ffi` module is
//! the **only** file that contains `unsafe` code or C types.

mod ffi;

pub mod cipher;
mod config;
mod database;
mod engine;
pub mod error;
mod lock;
mod query;
mod refcount;
mod sqlite;
mod statement;
pub mod value;
mod window;

pub use config::{DatabaseConfig, DEFAULT_BUSY_RETRY_DELAY, DEFAULT_BUSY_RETRY_LIMIT};
pub use database::{CorruptionHandler, Database, DeleteOnCorruption, LogCorruption};
pub use engine::{Engine, FillRequest, NativeStatement};
pub use error::{DbError, DbErrorCode, DbResult, ErrorKind};
pub use lock::{ConnectionGuard, ConnectionLock};
pub use query::{FillOutcome, Query, QueryArgs, RaceKind};
pub use refcount::{RefCounted, ReferenceGuard};
pub use sqlite::SqliteEngine;
pub use statement::{Bind, CompiledStatement};
pub use value::{BindValue, FieldValue};
pub use window::{ResultWindow, WindowBuffer, FIELD_SLOT_SIZE, ROW_SLOT_SIZE};

#[cfg(test)]
mod tests;
