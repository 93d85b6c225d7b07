//! Row-producing statements and the window fill protocol.
//!
//! A [`Query`] is a [`CompiledStatement`] that remembers its bind arguments
//! so it can be requeried without the caller supplying them again, and that
//! knows how to page its results into a [`ResultWindow`].
//!
//! # Fill protocol
//!
//! [`Query::fill_window`] takes the connection lock, then a reference on the
//! statement, then a reference on the window. They are released in reverse
//! order on every exit path. A statement or window torn down by another
//! caller is a benign race reported as [`FillOutcome::Raced`]; corruption is
//! reported to the database once and returned as an error.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::database::Database;
use crate::engine::FillRequest;
use crate::error::{DbError, DbResult, ErrorKind};
use crate::lock::ConnectionGuard;
use crate::statement::{Bind, CompiledStatement};
use crate::value::{blob_text, double_text, BindValue};
use crate::window::{ResultWindow, WindowBuffer};

/// Initial bind arguments of a [`Query`], fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryArgs {
    /// Pre-stringified values; `None` binds NULL. Requery replays them
    /// through the text bind path.
    Text(Vec<Option<String>>),
    /// Typed values. Requery replays them through
    /// [`Query::bind_arguments`].
    Typed(Vec<BindValue>),
}

impl Default for QueryArgs {
    fn default() -> Self {
        Self::Text(Vec::new())
    }
}

impl From<Vec<BindValue>> for QueryArgs {
    fn from(values: Vec<BindValue>) -> Self {
        Self::Typed(values)
    }
}

/// Which object was found torn down during a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceKind {
    /// The query's statement was closed before the fill took its reference.
    StatementClosed,
    /// The window was closed before the fill took its reference.
    WindowClosed,
    /// The engine reported an invalid-state condition mid-fill.
    Native,
}

/// Result of [`Query::fill_window`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum FillOutcome {
    /// The engine ran; `rows` is the number of rows in the result set as far
    /// as the engine counted.
    Filled {
        /// Rows counted.
        rows: usize,
    },
    /// Another caller tore something down. Nothing was read.
    Raced(RaceKind),
}

impl FillOutcome {
    /// Row count, with races reported as zero rows.
    #[must_use]
    pub const fn row_count(self) -> usize {
        match self {
            Self::Filled { rows } => rows,
            Self::Raced(_) => 0,
        }
    }

    /// Returns `true` for a benign race.
    #[must_use]
    pub const fn is_race(self) -> bool {
        matches!(self, Self::Raced(_))
    }
}

/// Maps 1-based statement parameters to 0-based user argument slots,
/// leaving out the OFFSET placeholder.
#[derive(Debug, Clone, Copy)]
struct ParameterMap {
    offset_index: Option<usize>,
    user_parameters: usize,
}

impl ParameterMap {
    /// Slot of parameter `index`, or `None` for the OFFSET placeholder and
    /// out-of-range indices.
    fn slot(self, index: usize) -> Option<usize> {
        let slot = match self.offset_index {
            Some(offset) if index == offset => return None,
            Some(offset) if index > offset => index - 2,
            _ => index.checked_sub(1)?,
        };
        (slot < self.user_parameters).then_some(slot)
    }

    /// Parameter index that user argument `slot` binds to.
    fn parameter(self, slot: usize) -> usize {
        match self.offset_index {
            Some(offset) if slot + 1 >= offset => slot + 2,
            _ => slot + 1,
        }
    }
}

/// Cached bind arguments, one slot per user parameter.
#[derive(Debug)]
struct BindCache {
    text: Vec<Option<String>>,
    /// Present only when the query was built from typed arguments.
    typed: Option<Vec<BindValue>>,
}

impl BindCache {
    fn record(&mut self, slot: Option<usize>, text: Option<String>, typed: impl FnOnce() -> BindValue) {
        // The OFFSET placeholder and out-of-range indices are not cached; the
        // native bind reports the latter.
        let Some(slot) = slot else {
            return;
        };
        self.text[slot] = text;
        if let Some(values) = self.typed.as_mut() {
            if values.len() <= slot {
                values.resize(slot + 1, BindValue::Null);
            }
            values[slot] = typed();
        }
    }
}

/// A compiled, parameterized, row-producing statement.
pub struct Query {
    statement: CompiledStatement,
    parameters: ParameterMap,
    cache: Mutex<BindCache>,
}

impl Query {
    /// Compiles `sql` and binds the initial arguments.
    ///
    /// `offset_index` is the 1-based index of the OFFSET placeholder used for
    /// paging, or `None`. The arguments in `args` bind, in order, to the
    /// remaining parameters.
    ///
    /// # Errors
    ///
    /// Returns the engine's error for invalid SQL, misuse for a bad OFFSET
    /// index or too many arguments.
    pub fn new(
        database: &Arc<Database>,
        sql: &str,
        offset_index: Option<usize>,
        args: QueryArgs,
    ) -> DbResult<Self> {
        let statement = CompiledStatement::new(database, sql)?;
        let parameter_count = statement.parameter_count();
        let user_parameters = match offset_index {
            None => parameter_count,
            Some(index) if (1..=parameter_count).contains(&index) => parameter_count - 1,
            Some(index) => {
                return Err(DbError::misuse(format!(
                    "OFFSET parameter {index} is not one of the {parameter_count} parameters"
                )));
            }
        };

        let query = Self {
            statement,
            parameters: ParameterMap {
                offset_index,
                user_parameters,
            },
            cache: Mutex::new(BindCache {
                text: vec![None; user_parameters],
                typed: matches!(args, QueryArgs::Typed(_)).then(Vec::new),
            }),
        };

        match args {
            QueryArgs::Text(values) => {
                for (slot, value) in values.iter().enumerate() {
                    let index = query.parameters.parameter(slot);
                    match value {
                        Some(text) => query.bind_string(index, text)?,
                        None => query.bind_null(index)?,
                    }
                }
            }
            QueryArgs::Typed(values) => query.bind_arguments(&values)?,
        }
        Ok(query)
    }

    /// SQL text of the query.
    #[must_use]
    pub fn sql(&self) -> &str {
        self.statement.sql()
    }

    /// The underlying compiled statement.
    #[must_use]
    pub const fn statement(&self) -> &CompiledStatement {
        &self.statement
    }

    /// Index of the OFFSET placeholder, if any.
    #[must_use]
    pub const fn offset_index(&self) -> Option<usize> {
        self.parameters.offset_index
    }

    /// Textual form of the cached arguments, index-aligned with the user
    /// parameters.
    #[must_use]
    pub fn bound_arguments_as_text(&self) -> Vec<Option<String>> {
        self.cache.lock().text.clone()
    }

    /// Typed cached arguments, if the query was built from typed values.
    #[must_use]
    pub fn bound_arguments_typed(&self) -> Option<Vec<BindValue>> {
        self.cache.lock().typed.clone()
    }

    /// Binds `args` in order to the parameters other than the OFFSET
    /// placeholder, dispatching each value to the matching typed bind.
    ///
    /// # Errors
    ///
    /// Stops at the first failing bind and returns its error.
    pub fn bind_arguments(&self, args: &[BindValue]) -> DbResult<()> {
        args.iter()
            .enumerate()
            .try_for_each(|(slot, value)| self.bind_value(self.parameters.parameter(slot), value))
    }

    /// Rebinds the cached arguments on the statement.
    ///
    /// # Errors
    ///
    /// A misuse error during replay is wrapped in
    /// [`DbError::LeakedProgram`] together with the SQL and the cached
    /// arguments. Other errors propagate unchanged.
    pub fn requery(&self) -> DbResult<()> {
        let (typed, text) = {
            let cache = self.cache.lock();
            (cache.typed.clone(), cache.text.clone())
        };
        tracing::debug!(arguments = text.len(), typed = typed.is_some(), "requery");
        let replayed = match typed {
            Some(values) => self.bind_arguments(&values),
            None => text.iter().enumerate().try_for_each(|(slot, value)| {
                let index = self.parameters.parameter(slot);
                match value {
                    Some(value) => self.statement.bind_string(index, value),
                    None => self.statement.bind_null(index),
                }
            }),
        };
        replayed.map_err(|source| {
            if source.is_misuse() {
                DbError::LeakedProgram {
                    sql: self.sql().to_string(),
                    args: self.bound_arguments_as_text(),
                    source: Box::new(source),
                }
            } else {
                source
            }
        })
    }

    /// Fills `window` with rows, starting at the window's start position.
    ///
    /// `max_rows` limits the rows read, but only while the window starts at
    /// position 0: a window further down the result set is filled until it
    /// is full. `last_position` is the row count already known to the caller
    /// (0 if unknown); counting stops there once the window is full.
    ///
    /// # Errors
    ///
    /// Corruption (after notifying the database once) and every other
    /// engine failure that is not an invalid-state race.
    pub fn fill_window(
        &self,
        window: &ResultWindow,
        max_rows: usize,
        last_position: usize,
    ) -> DbResult<FillOutcome> {
        let started = Instant::now();
        let database = self.statement.database();
        let config = database.config();

        let _lock = database.lock();
        let Ok(statement) = self.statement.acquire_reference() else {
            tracing::debug!("fill skipped: statement already closed");
            return Ok(FillOutcome::Raced(RaceKind::StatementClosed));
        };
        let Ok(buffer) = window.acquire_reference() else {
            tracing::debug!("fill skipped: window already closed");
            return Ok(FillOutcome::Raced(RaceKind::WindowClosed));
        };

        let filled = buffer
            .with(|buf| {
                let start_position = buf.start_position();
                let request = FillRequest {
                    start_position,
                    required_position: buf.required_position(),
                    offset_param: self.parameters.offset_index,
                    // Mid-scroll windows ignore the limit.
                    max_rows: (start_position == 0).then_some(max_rows),
                    last_position,
                    busy_retry_limit: config.busy_retry_limit,
                    busy_retry_delay: config.busy_retry_delay,
                };
                statement.with(|native| native.fill_window(buf, &request))
            })
            .and_then(std::convert::identity)
            .and_then(std::convert::identity);

        let elapsed = started.elapsed();
        match filled {
            Ok(rows) => {
                if config.log_sql_statements {
                    tracing::debug!(sql = self.sql(), rows, ?elapsed, "filled window");
                } else {
                    tracing::debug!(rows, ?elapsed, "filled window");
                }
                if config.slow_fill_threshold.is_some_and(|limit| elapsed > limit) {
                    tracing::warn!(sql = self.sql(), rows, ?elapsed, "slow window fill");
                }
                Ok(FillOutcome::Filled { rows })
            }
            Err(err) if err.kind() == ErrorKind::IllegalState => {
                tracing::debug!(error = %err, "fill raced with teardown");
                Ok(FillOutcome::Raced(RaceKind::Native))
            }
            Err(err) if err.is_corruption() => {
                if let Err(clear_err) = buffer.with(WindowBuffer::clear) {
                    tracing::warn!(error = %clear_err, "could not clear window");
                }
                database.on_corruption();
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Number of result columns. The caller must hold the connection lock
    /// and proves it with `guard`.
    ///
    /// # Errors
    ///
    /// Illegal state if `guard` belongs to another database or the statement
    /// is closed.
    pub fn column_count_locked(&self, guard: &ConnectionGuard<'_>) -> DbResult<usize> {
        self.check_guard(guard)?;
        let statement = self.statement.acquire_reference()?;
        statement.with(|native| native.column_count())
    }

    /// Name of result column `index` (0-based). The caller must hold the
    /// connection lock.
    ///
    /// # Errors
    ///
    /// Misuse for an out-of-range index, illegal state as for
    /// [`column_count_locked`](Self::column_count_locked).
    pub fn column_name_locked(&self, guard: &ConnectionGuard<'_>, index: usize) -> DbResult<String> {
        self.check_guard(guard)?;
        let statement = self.statement.acquire_reference()?;
        statement.with(|native| native.column_name(index))?
    }

    fn check_guard(&self, guard: &ConnectionGuard<'_>) -> DbResult<()> {
        if guard.holds(self.statement.database().connection_lock()) {
            Ok(())
        } else {
            Err(DbError::illegal_state(
                "connection guard belongs to a different database",
            ))
        }
    }

    /// Closes the statement. Idempotent.
    pub fn close(&self) {
        self.statement.close();
    }

    /// Returns `true` once the query was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.statement.is_closed()
    }

    /// Current reference count of the statement, including the owner's.
    #[must_use]
    pub fn reference_count(&self) -> usize {
        self.statement.reference_count()
    }

    /// Updates the cache, then binds natively unless the statement is closed.
    fn bind_cached(
        &self,
        index: usize,
        text: Option<String>,
        typed: impl FnOnce() -> BindValue,
        native: impl FnOnce(&CompiledStatement) -> DbResult<()>,
    ) -> DbResult<()> {
        self.cache
            .lock()
            .record(self.parameters.slot(index), text, typed);
        if self.statement.is_closed() {
            return Ok(());
        }
        native(&self.statement)
    }
}

impl Bind for Query {
    fn bind_null(&self, index: usize) -> DbResult<()> {
        self.bind_cached(index, None, || BindValue::Null, |s| s.bind_null(index))
    }

    fn bind_long(&self, index: usize, value: i64) -> DbResult<()> {
        self.bind_cached(
            index,
            Some(value.to_string()),
            || BindValue::Long(value),
            |s| s.bind_long(index, value),
        )
    }

    fn bind_double(&self, index: usize, value: f64) -> DbResult<()> {
        self.bind_cached(
            index,
            Some(double_text(value)),
            || BindValue::Double(value),
            |s| s.bind_double(index, value),
        )
    }

    fn bind_string(&self, index: usize, value: &str) -> DbResult<()> {
        self.bind_cached(
            index,
            Some(value.to_string()),
            || BindValue::Text(value.to_string()),
            |s| s.bind_string(index, value),
        )
    }

    fn bind_blob(&self, index: usize, value: &[u8]) -> DbResult<()> {
        self.bind_cached(
            index,
            Some(blob_text(value)),
            || BindValue::Blob(value.to_vec()),
            |s| s.bind_blob(index, value),
        )
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Query: {}", self.sql())
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("sql", &self.sql())
            .field("offset_index", &self.parameters.offset_index)
            .field("cache", &*self.cache.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;

    fn db() -> Arc<Database> {
        let db = Database::open_in_memory().expect("open in-memory db");
        db.execute_batch(
            "CREATE TABLE t (a INTEGER, b TEXT);
             INSERT INTO t VALUES (42, 'x'), (42, 'y'), (7, 'z');",
        )
        .expect("seed table");
        db
    }

    #[test]
    fn test_typed_args_with_offset_cache_user_parameters() {
        let db = db();
        let query = Query::new(
            &db,
            "SELECT * FROM t WHERE a = ?1 LIMIT -1 OFFSET ?2",
            Some(2),
            QueryArgs::Typed(args![42]),
        )
        .expect("query");
        assert_eq!(query.bound_arguments_as_text(), vec![Some("42".to_string())]);
        query.requery().expect("requery");
        assert_eq!(query.bound_arguments_as_text(), vec![Some("42".to_string())]);
    }

    #[test]
    fn test_offset_index_out_of_range() {
        let db = db();
        for index in [0, 3] {
            let err = Query::new(
                &db,
                "SELECT * FROM t WHERE a = ?1 LIMIT -1 OFFSET ?2",
                Some(index),
                QueryArgs::default(),
            )
            .expect_err("no such parameter");
            assert_eq!(err.kind(), ErrorKind::Misuse);
        }
    }

    #[test]
    fn test_offset_before_user_parameters() {
        let db = db();
        let query = Query::new(
            &db,
            "SELECT b FROM t WHERE a = ?2 ORDER BY b LIMIT -1 OFFSET ?1",
            Some(1),
            QueryArgs::Typed(args![42]),
        )
        .expect("query");
        assert_eq!(query.bound_arguments_as_text(), vec![Some("42".to_string())]);

        // Binding the OFFSET placeholder directly leaves the cache alone.
        query.bind_long(1, 5).expect("bind offset");
        query.bind_long(2, 7).expect("bind user parameter");
        assert_eq!(query.bound_arguments_as_text(), vec![Some("7".to_string())]);
        assert_eq!(query.bound_arguments_typed(), Some(vec![BindValue::Long(7)]));

        query.bind_long(2, 42).expect("rebind");
        query.requery().expect("requery");
        let window = ResultWindow::new(4096);
        window.set_start_position(1).expect("window open");
        window.set_required_position(1).expect("window open");
        let outcome = query.fill_window(&window, 10, 0).expect("fill");
        // OFFSET skips the first row; the count includes it.
        assert_eq!(outcome.row_count(), 2);
        assert_eq!(window.row_count().expect("window open"), 1);
        assert_eq!(
            window.value(1, 0).expect("window open"),
            Some(crate::FieldValue::Text("y".to_string()))
        );
    }

    #[test]
    fn test_offset_between_user_parameters_text_replay() {
        let db = db();
        let query = Query::new(
            &db,
            "SELECT b FROM t WHERE a = ?1 AND b <> ?3 ORDER BY b LIMIT -1 OFFSET ?2",
            Some(2),
            QueryArgs::Text(vec![Some("42".to_string()), Some("x".to_string())]),
        )
        .expect("query");
        query.bind_string(3, "z").expect("bind");
        assert_eq!(
            query.bound_arguments_as_text(),
            vec![Some("42".to_string()), Some("z".to_string())]
        );
        query.requery().expect("requery");
        let window = ResultWindow::new(4096);
        assert_eq!(query.fill_window(&window, 10, 0).expect("fill").row_count(), 2);
    }

    #[test]
    fn test_cache_tracks_binds_after_close() {
        let db = db();
        let query =
            Query::new(&db, "SELECT * FROM t WHERE a = ?1", None, QueryArgs::default())
                .expect("query");
        query.bind_double(1, 0.5).expect("bind");
        assert_eq!(query.bound_arguments_as_text(), vec![Some("0.5".to_string())]);
        query.close();
        query.bind_long(1, 9).expect("closed statement skips the native bind");
        assert_eq!(query.bound_arguments_as_text(), vec![Some("9".to_string())]);
    }

    #[test]
    fn test_typed_dispatch_text_forms() {
        let db = db();
        let query = Query::new(
            &db,
            "SELECT ?1, ?2, ?3, ?4, ?5, ?6",
            None,
            QueryArgs::Typed(args![1.5_f32, 3_i32, true, vec![0xAB_u8, 0x01], "s", None::<i64>]),
        )
        .expect("query");
        assert_eq!(
            query.bound_arguments_as_text(),
            vec![
                Some("1.5".to_string()),
                Some("3".to_string()),
                Some("1".to_string()),
                Some("AB01".to_string()),
                Some("s".to_string()),
                None,
            ]
        );
        assert_eq!(
            query.bound_arguments_typed().expect("typed cache"),
            vec![
                BindValue::Double(1.5),
                BindValue::Long(3),
                BindValue::Long(1),
                BindValue::Blob(vec![0xAB, 0x01]),
                BindValue::Text("s".to_string()),
                BindValue::Null,
            ]
        );
    }

    #[test]
    fn test_text_args_bound_at_construction() {
        let db = db();
        let query = Query::new(
            &db,
            "SELECT b FROM t WHERE a = ?1 ORDER BY b",
            None,
            QueryArgs::Text(vec![Some("42".to_string())]),
        )
        .expect("query");
        assert!(query.bound_arguments_typed().is_none());
        let window = ResultWindow::new(4096);
        let outcome = query.fill_window(&window, 10, 0).expect("fill");
        assert_eq!(outcome, FillOutcome::Filled { rows: 2 });
        assert_eq!(window.row_count().expect("window open"), 2);
    }

    #[test]
    fn test_display() {
        let db = db();
        let query = Query::new(&db, "SELECT 1", None, QueryArgs::default()).expect("query");
        assert_eq!(query.to_string(), "Query: SELECT 1");
    }

    #[test]
    fn test_column_metadata_requires_own_guard() {
        let db = db();
        let other = Database::open_in_memory().expect("second db");
        let query =
            Query::new(&db, "SELECT a, b FROM t", None, QueryArgs::default()).expect("query");
        {
            let guard = db.lock();
            assert_eq!(query.column_count_locked(&guard).expect("count"), 2);
            assert_eq!(query.column_name_locked(&guard, 1).expect("name"), "b");
            let err = query.column_name_locked(&guard, 2).expect_err("out of range");
            assert_eq!(err.kind(), ErrorKind::Misuse);
        }
        let foreign = other.lock();
        let err = query.column_count_locked(&foreign).expect_err("foreign guard");
        assert_eq!(err.kind(), ErrorKind::IllegalState);
        assert_eq!(query.reference_count(), 1);
    }

    #[test]
    fn test_fill_after_close_is_race() {
        let db = db();
        let query = Query::new(&db, "SELECT * FROM t", None, QueryArgs::default()).expect("query");
        let window = ResultWindow::new(4096);
        query.close();
        let outcome = query.fill_window(&window, 10, 0).expect("race is not an error");
        assert_eq!(outcome, FillOutcome::Raced(RaceKind::StatementClosed));
        assert_eq!(outcome.row_count(), 0);

        let query = Query::new(&db, "SELECT * FROM t", None, QueryArgs::default()).expect("query");
        window.close();
        let outcome = query.fill_window(&window, 10, 0).expect("race is not an error");
        assert_eq!(outcome, FillOutcome::Raced(RaceKind::WindowClosed));
        assert_eq!(query.reference_count(), 1);
    }
}
