//! Database error types.
//!
//! Native failures keep the `SQLite` result code next to the message so that
//! callers (and [`Query::fill_window`](crate::Query::fill_window)) can tell a
//! corrupted store apart from an ordinary programming error.

use std::fmt;

use thiserror::Error;

use crate::ffi;

/// Error code returned by `SQLite` operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbErrorCode(pub i32);

impl DbErrorCode {
    /// `SQLITE_BUSY`.
    pub const BUSY: Self = Self(ffi::SQLITE_BUSY);
    /// `SQLITE_CORRUPT`.
    pub const CORRUPT: Self = Self(ffi::SQLITE_CORRUPT);
    /// `SQLITE_MISUSE`.
    pub const MISUSE: Self = Self(ffi::SQLITE_MISUSE);
    /// `SQLITE_RANGE`.
    pub const RANGE: Self = Self(ffi::SQLITE_RANGE);

    /// Primary result code (the low byte of an extended code).
    #[must_use]
    pub const fn primary(self) -> i32 {
        self.0 & 0xff
    }
}

impl fmt::Display for DbErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse classification of a [`DbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The store reported corruption (`SQLITE_CORRUPT`, `SQLITE_NOTADB`).
    Corrupt,
    /// The engine reported a programming error such as a parameter index out
    /// of range (`SQLITE_MISUSE`, `SQLITE_RANGE`).
    Misuse,
    /// The database was busy or locked by another connection.
    Busy,
    /// The object was used after being closed or torn down.
    IllegalState,
    /// A caller bug detected while replaying cached bind arguments.
    Programming,
    /// Anything else.
    Other,
}

/// Error returned by database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failure reported by the native engine.
    #[error("sqlite error {code}: {message}")]
    Sqlite {
        /// `SQLite` result code.
        code: DbErrorCode,
        /// Human-readable message (from `sqlite3_errmsg` when available).
        message: String,
    },

    /// The statement, window, or database was used in a state that does not
    /// allow the operation (typically: already closed).
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Replaying cached bind arguments on requery failed. The statement was
    /// most likely leaked or used after its arguments went stale.
    #[error("requery failed for `{sql}` with arguments [{}]: {source}", join_args(.args))]
    LeakedProgram {
        /// SQL text of the statement.
        sql: String,
        /// The full cached argument list, in parameter order.
        args: Vec<Option<String>>,
        /// The misuse error raised by the engine.
        #[source]
        source: Box<DbError>,
    },

    /// The engine was built without encryption support.
    #[error("encryption is not available in this build")]
    CipherUnavailable,

    /// Filesystem error (database side files, corruption cleanup).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// Creates a native error from a result code and message. Custom
    /// [`Engine`](crate::Engine) implementations use this to report failures.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self::Sqlite {
            code: DbErrorCode(code),
            message: message.into(),
        }
    }

    /// Creates an illegal-state error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    /// Creates a misuse error (`SQLITE_MISUSE`) raised on the Rust side of the
    /// boundary, e.g. for a bind index outside the declared parameters.
    pub fn misuse(message: impl Into<String>) -> Self {
        Self::new(ffi::SQLITE_MISUSE, message)
    }

    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Sqlite { code, .. } => match code.primary() {
                ffi::SQLITE_CORRUPT | ffi::SQLITE_NOTADB => ErrorKind::Corrupt,
                ffi::SQLITE_MISUSE | ffi::SQLITE_RANGE => ErrorKind::Misuse,
                ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => ErrorKind::Busy,
                _ => ErrorKind::Other,
            },
            Self::IllegalState(_) => ErrorKind::IllegalState,
            Self::LeakedProgram { .. } => ErrorKind::Programming,
            Self::CipherUnavailable | Self::Io(_) => ErrorKind::Other,
        }
    }

    /// Returns `true` if the store reported corruption.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self.kind(), ErrorKind::Corrupt)
    }

    /// Returns `true` for engine-reported programming errors.
    #[must_use]
    pub const fn is_misuse(&self) -> bool {
        matches!(self.kind(), ErrorKind::Misuse)
    }

    /// Returns the native result code, if this error came from the engine.
    #[must_use]
    pub const fn code(&self) -> Option<DbErrorCode> {
        match self {
            Self::Sqlite { code, .. } => Some(*code),
            _ => None,
        }
    }
}

fn join_args(args: &[Option<String>]) -> String {
    args.iter()
        .map(|arg| arg.as_deref().unwrap_or("NULL"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_code() {
        assert_eq!(DbError::new(11, "malformed").kind(), ErrorKind::Corrupt);
        assert_eq!(DbError::new(26, "not a db").kind(), ErrorKind::Corrupt);
        assert_eq!(DbError::new(25, "range").kind(), ErrorKind::Misuse);
        assert_eq!(DbError::new(5, "busy").kind(), ErrorKind::Busy);
        assert_eq!(DbError::new(1, "generic").kind(), ErrorKind::Other);
        // Extended codes classify by their primary code.
        assert_eq!(DbError::new(11 | (1 << 8), "vtab").kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn test_leaked_program_message_lists_arguments() {
        let err = DbError::LeakedProgram {
            sql: "SELECT ?1, ?2".to_string(),
            args: vec![Some("7".to_string()), None],
            source: Box::new(DbError::misuse("bad index")),
        };
        let msg = err.to_string();
        assert!(msg.contains("SELECT ?1, ?2"));
        assert!(msg.contains("7, NULL"));
        assert_eq!(err.kind(), ErrorKind::Programming);
    }
}
