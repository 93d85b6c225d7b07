//! Encrypted databases.
//!
//! # Encryption flow
//!
//! With the `sqlcipher` feature the bundled engine is `SQLCipher`, which
//! encrypts every page at rest. Encryption is transparent to SQL: once a
//! database is opened and keyed, reads and writes are decrypted and encrypted
//! by the pager.
//!
//! 1. **Open** -- the file is opened like any other database. Its pages are
//!    opaque until a key is applied.
//!
//! 2. **Key** -- `PRAGMA key = "x'<hex>'"` passes the 32-byte key as a raw
//!    key (the `x'...'` form skips the passphrase KDF).
//!
//! 3. **Verify** -- a read from `sqlite_master` confirms the key. A wrong key
//!    fails with `SQLITE_NOTADB` because the decrypted header does not carry
//!    the `SQLite` magic bytes.
//!
//! 4. **Configure** -- WAL journal mode, `synchronous=FULL`, foreign keys and
//!    secure deletion.
//!
//! Without the feature, [`open_encrypted`] fails with
//! [`DbError::CipherUnavailable`] instead of silently writing plaintext.

use std::path::Path;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretBox};
use zeroize::Zeroizing;

use crate::config::DatabaseConfig;
use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::query::{FillOutcome, Query, QueryArgs};
use crate::value::FieldValue;
use crate::window::ResultWindow;

/// Window size for the single-row pragmas run here.
const PRAGMA_WINDOW_BYTES: usize = 4096;

/// Returns `true` if the engine was built with encryption support.
#[must_use]
pub const fn cipher_compiled_in() -> bool {
    cfg!(feature = "sqlcipher")
}

/// Opens a database, applies the encryption key, and configures the
/// connection: open -> key -> verify -> configure.
///
/// See the [module-level documentation](self) for the full flow.
///
/// # Errors
///
/// [`DbError::CipherUnavailable`] without the `sqlcipher` feature; the
/// engine's error (typically `SQLITE_NOTADB`) for a wrong key.
pub fn open_encrypted(
    path: &Path,
    key: &SecretBox<[u8; 32]>,
    config: DatabaseConfig,
) -> DbResult<Arc<Database>> {
    if !cipher_compiled_in() {
        return Err(DbError::CipherUnavailable);
    }
    let db = Database::open(path, config)?;
    apply_key(&db, key)?;
    configure_connection(&db)?;
    Ok(db)
}

/// Keys an open database and verifies the key with a page read.
///
/// # Errors
///
/// Returns the engine's error if the key does not decrypt the database.
pub fn apply_key(db: &Database, key: &SecretBox<[u8; 32]>) -> DbResult<()> {
    // Both buffers are wiped on drop.
    let key_hex = Zeroizing::new(hex::encode(key.expose_secret()));
    let pragma = Zeroizing::new(format!("PRAGMA key = \"x'{}'\";", key_hex.as_str()));
    db.execute_batch_zeroized(&pragma)?;

    db.execute_batch("SELECT count(*) FROM sqlite_master;")
        .map_err(|err| match err {
            DbError::Sqlite { code, message } => DbError::new(
                code.0,
                format!("encryption key verification failed (is the key correct?): {message}"),
            ),
            other => other,
        })
}

/// Durable WAL settings, foreign keys and secure deletion.
fn configure_connection(db: &Database) -> DbResult<()> {
    db.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = FULL;
         PRAGMA secure_delete = ON;",
    )
}

/// Version string reported by `PRAGMA cipher_version`, or `None` when the
/// engine has no cipher.
///
/// # Errors
///
/// Returns the engine's error if the pragma cannot run.
pub fn cipher_version(db: &Arc<Database>) -> DbResult<Option<String>> {
    first_text(db, "PRAGMA cipher_version;")
}

/// Runs `PRAGMA integrity_check` and returns whether the database is healthy.
///
/// # Errors
///
/// Returns the engine's error; corruption is also reported to the database.
pub fn integrity_check(db: &Arc<Database>) -> DbResult<bool> {
    let result = first_text(db, "PRAGMA integrity_check;")?;
    Ok(result.is_some_and(|text| text.trim() == "ok"))
}

/// First column of the first row, read through a one-row window.
fn first_text(db: &Arc<Database>, sql: &str) -> DbResult<Option<String>> {
    let query = Query::new(db, sql, None, QueryArgs::default())?;
    let window = ResultWindow::new(PRAGMA_WINDOW_BYTES);
    let outcome = query.fill_window(&window, 1, 0)?;
    query.close();
    match outcome {
        FillOutcome::Filled { .. } => Ok(window.value(0, 0)?.as_ref().and_then(FieldValue::as_text)),
        FillOutcome::Raced(kind) => Err(DbError::illegal_state(format!(
            "pragma read raced with teardown: {kind:?}"
        ))),
    }
}
