//! Fixed-capacity result windows.
//!
//! A [`ResultWindow`] holds a contiguous slice of result rows starting at an
//! arbitrary logical row position. The native fill is the only writer; it
//! runs while holding a window reference and the buffer's mutex, so a reader
//! on another thread blocks instead of observing a half-filled window.

use std::sync::Arc;

use crate::error::{DbError, DbResult};
use crate::refcount::{RefCounted, ReferenceGuard};
use crate::value::FieldValue;

/// Bytes charged per row for the row directory entry.
pub const ROW_SLOT_SIZE: usize = 16;
/// Bytes charged per field for its slot (type tag plus inline number or
/// payload offset/length).
pub const FIELD_SLOT_SIZE: usize = 16;

/// The rows of a window and their position metadata.
#[derive(Debug)]
pub struct WindowBuffer {
    capacity: usize,
    used: usize,
    start_position: usize,
    required_position: usize,
    column_count: usize,
    rows: Vec<Vec<FieldValue>>,
}

impl WindowBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: 0,
            start_position: 0,
            required_position: 0,
            column_count: 0,
            rows: Vec::new(),
        }
    }

    /// Capacity in bytes.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently in use.
    #[must_use]
    pub const fn used_bytes(&self) -> usize {
        self.used
    }

    /// Logical position of the first row held by the window.
    #[must_use]
    pub const fn start_position(&self) -> usize {
        self.start_position
    }

    /// Moves the window to `position`. Does not touch the rows.
    pub fn set_start_position(&mut self, position: usize) {
        self.start_position = position;
    }

    /// The row the consumer actually wants visible after a fill.
    #[must_use]
    pub const fn required_position(&self) -> usize {
        self.required_position
    }

    /// Sets the row the consumer wants visible.
    pub fn set_required_position(&mut self, position: usize) {
        self.required_position = position;
    }

    /// Number of columns per row (0 until the first fill).
    #[must_use]
    pub const fn column_count(&self) -> usize {
        self.column_count
    }

    /// Sets the column count. Fails (returns `false`) if the window already
    /// holds rows with a different column count.
    pub fn set_column_count(&mut self, columns: usize) -> bool {
        if !self.rows.is_empty() && self.column_count != columns {
            return false;
        }
        self.column_count = columns;
        true
    }

    /// Number of rows held.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if `position` falls inside the rows held.
    #[must_use]
    pub fn contains(&self, position: usize) -> bool {
        position >= self.start_position && position < self.start_position + self.rows.len()
    }

    /// Bytes a row would occupy.
    #[must_use]
    pub fn row_size(row: &[FieldValue]) -> usize {
        ROW_SLOT_SIZE
            + row
                .iter()
                .map(|field| FIELD_SLOT_SIZE + field.payload_len())
                .sum::<usize>()
    }

    /// Appends a row if it fits. A row that does not fit is handed back
    /// as `Ok(Some(row))` and the window is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::IllegalState`] if the row width differs from the
    /// window's column count.
    pub fn push_row(&mut self, row: Vec<FieldValue>) -> DbResult<Option<Vec<FieldValue>>> {
        if row.len() != self.column_count {
            return Err(DbError::illegal_state(format!(
                "row has {} fields but the window has {} columns",
                row.len(),
                self.column_count
            )));
        }
        let size = Self::row_size(&row);
        if self.used + size > self.capacity {
            return Ok(Some(row));
        }
        self.used += size;
        self.rows.push(row);
        Ok(None)
    }

    /// Drops all rows and the column count. Position metadata is kept.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.used = 0;
        self.column_count = 0;
    }

    /// Field at logical row `position`, column `column`.
    #[must_use]
    pub fn value(&self, position: usize, column: usize) -> Option<&FieldValue> {
        self.row(position).and_then(|row| row.get(column))
    }

    /// Row at logical position `position`.
    #[must_use]
    pub fn row(&self, position: usize) -> Option<&[FieldValue]> {
        position
            .checked_sub(self.start_position)
            .and_then(|offset| self.rows.get(offset))
            .map(Vec::as_slice)
    }
}

/// Shared, reference-counted handle to a [`WindowBuffer`].
///
/// Clones refer to the same buffer. The buffer is released when the window
/// is closed and no fill holds a reference anymore.
#[derive(Debug, Clone)]
pub struct ResultWindow {
    inner: Arc<RefCounted<WindowBuffer>>,
}

impl ResultWindow {
    /// Creates an empty window holding at most `capacity_bytes` of row data.
    #[must_use]
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            inner: Arc::new(RefCounted::new(
                "result window",
                WindowBuffer::new(capacity_bytes),
            )),
        }
    }

    /// Takes a reference to the window for the duration of an operation.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::IllegalState`] if the window was closed.
    pub fn acquire_reference(&self) -> DbResult<ReferenceGuard<'_, WindowBuffer>> {
        self.inner.acquire()
    }

    /// Runs `f` with read access to the buffer. Blocks while a fill is in
    /// progress.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::IllegalState`] if the window was closed.
    pub fn read<R>(&self, f: impl FnOnce(&WindowBuffer) -> R) -> DbResult<R> {
        let guard = self.inner.acquire()?;
        guard.with(|buffer| f(&*buffer))
    }

    /// Runs `f` with write access to the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::IllegalState`] if the window was closed.
    pub fn write<R>(&self, f: impl FnOnce(&mut WindowBuffer) -> R) -> DbResult<R> {
        let guard = self.inner.acquire()?;
        guard.with(f)
    }

    /// Capacity in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::IllegalState`] if the window was closed.
    pub fn capacity(&self) -> DbResult<usize> {
        self.read(WindowBuffer::capacity)
    }

    /// See [`WindowBuffer::start_position`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::IllegalState`] if the window was closed.
    pub fn start_position(&self) -> DbResult<usize> {
        self.read(WindowBuffer::start_position)
    }

    /// See [`WindowBuffer::set_start_position`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::IllegalState`] if the window was closed.
    pub fn set_start_position(&self, position: usize) -> DbResult<()> {
        self.write(|buffer| buffer.set_start_position(position))
    }

    /// See [`WindowBuffer::required_position`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::IllegalState`] if the window was closed.
    pub fn required_position(&self) -> DbResult<usize> {
        self.read(WindowBuffer::required_position)
    }

    /// See [`WindowBuffer::set_required_position`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::IllegalState`] if the window was closed.
    pub fn set_required_position(&self, position: usize) -> DbResult<()> {
        self.write(|buffer| buffer.set_required_position(position))
    }

    /// Number of rows held.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::IllegalState`] if the window was closed.
    pub fn row_count(&self) -> DbResult<usize> {
        self.read(WindowBuffer::row_count)
    }

    /// Number of columns per row.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::IllegalState`] if the window was closed.
    pub fn column_count(&self) -> DbResult<usize> {
        self.read(WindowBuffer::column_count)
    }

    /// Returns `true` if the row at `position` is held by the window.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::IllegalState`] if the window was closed.
    pub fn contains(&self, position: usize) -> DbResult<bool> {
        self.read(|buffer| buffer.contains(position))
    }

    /// Copy of the field at (`position`, `column`).
    ///
    /// # Errors
    ///
    /// Returns [`DbError::IllegalState`] if the window was closed.
    pub fn value(&self, position: usize, column: usize) -> DbResult<Option<FieldValue>> {
        self.read(|buffer| buffer.value(position, column).cloned())
    }

    /// Copy of the row at `position`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::IllegalState`] if the window was closed.
    pub fn row(&self, position: usize) -> DbResult<Option<Vec<FieldValue>>> {
        self.read(|buffer| buffer.row(position).map(<[FieldValue]>::to_vec))
    }

    /// Drops all rows, keeping the position metadata.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::IllegalState`] if the window was closed.
    pub fn clear(&self) -> DbResult<()> {
        self.write(WindowBuffer::clear)
    }

    /// Releases the owner reference; the buffer is freed once no fill holds it.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Returns `true` once [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Current number of references, including the owner's.
    #[must_use]
    pub fn reference_count(&self) -> usize {
        self.inner.reference_count()
    }
}
