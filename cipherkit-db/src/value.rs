//! Bind argument and column value types.

use std::fmt;

/// A typed value bound to a statement parameter.
///
/// The variants mirror the runtime types a caller may hand to
/// [`Query::bind_arguments`](crate::Query::bind_arguments). Dispatch to the
/// native bind calls follows a fixed order: floating point (32-bit widened to
/// 64-bit), integers (32-bit widened to 64-bit), booleans as `0`/`1`, byte
/// sequences as blobs, and everything else as text.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    /// SQL NULL.
    Null,
    /// 64-bit float.
    Double(f64),
    /// 32-bit float, widened to 64 bits when bound.
    Float(f32),
    /// 64-bit signed integer.
    Long(i64),
    /// 32-bit signed integer, widened to 64 bits when bound.
    Int(i32),
    /// Boolean, bound as integer `1` or `0`.
    Bool(bool),
    /// Binary blob.
    Blob(Vec<u8>),
    /// Text. Any other value is bound through its textual representation.
    Text(String),
}

impl BindValue {
    /// Binds any displayable value through its textual representation.
    pub fn display(value: impl fmt::Display) -> Self {
        Self::Text(value.to_string())
    }

    /// Canonical textual form of the value, as kept in the bind cache.
    ///
    /// `None` for NULL.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Double(v) => Some(double_text(*v)),
            Self::Float(v) => Some(double_text(f64::from(*v))),
            Self::Long(v) => Some(v.to_string()),
            Self::Int(v) => Some(i64::from(*v).to_string()),
            Self::Bool(v) => Some(if *v { "1" } else { "0" }.to_string()),
            Self::Blob(v) => Some(blob_text(v)),
            Self::Text(v) => Some(v.clone()),
        }
    }
}

/// Textual form of a double: always carries a fractional part (`1.0`, `0.5`).
pub(crate) fn double_text(value: f64) -> String {
    format!("{value:?}")
}

/// Textual form of a blob: upper-case hex.
pub(crate) fn blob_text(value: &[u8]) -> String {
    hex::encode_upper(value)
}

impl From<f64> for BindValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<f32> for BindValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for BindValue {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<i32> for BindValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for BindValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec<u8>> for BindValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl From<&[u8]> for BindValue {
    fn from(v: &[u8]) -> Self {
        Self::Blob(v.to_vec())
    }
}

impl From<String> for BindValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for BindValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl<T: Into<Self>> From<Option<T>> for BindValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Convenience macro for building typed argument lists.
///
/// Usage: `args![42, 1.5_f32, "text", None::<i64>]`
#[macro_export]
macro_rules! args {
    ($($val:expr),* $(,)?) => {
        vec![$($crate::BindValue::from($val)),*]
    };
}

/// A value stored in a [`ResultWindow`](crate::ResultWindow) field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// SQL NULL.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Binary blob.
    Blob(Vec<u8>),
}

impl FieldValue {
    /// Number of payload bytes the field occupies in a window, on top of the
    /// fixed field slot. Text is stored NUL-terminated.
    pub(crate) fn payload_len(&self) -> usize {
        match self {
            Self::Null | Self::Integer(_) | Self::Float(_) => 0,
            Self::Text(s) => s.len() + 1,
            Self::Blob(b) => b.len(),
        }
    }

    /// Returns `true` for SQL NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Reads the field as `i64`, converting floats and numeric text the way
    /// `SQLite` would. NULL and blobs read as `0`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Integer(v) => *v,
            Self::Float(v) => *v as i64,
            Self::Text(s) => s.trim().parse().unwrap_or(0),
            Self::Null | Self::Blob(_) => 0,
        }
    }

    /// Reads the field as text. NULL reads as `None`; blobs as upper-case hex.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Integer(v) => Some(v.to_string()),
            Self::Float(v) => Some(double_text(*v)),
            Self::Text(s) => Some(s.clone()),
            Self::Blob(b) => Some(blob_text(b)),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("NULL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_text_forms() {
        assert_eq!(BindValue::Long(42).to_text().as_deref(), Some("42"));
        assert_eq!(BindValue::Int(-7).to_text().as_deref(), Some("-7"));
        assert_eq!(BindValue::Double(1.0).to_text().as_deref(), Some("1.0"));
        assert_eq!(BindValue::Float(0.5).to_text().as_deref(), Some("0.5"));
        assert_eq!(BindValue::Bool(true).to_text().as_deref(), Some("1"));
        assert_eq!(BindValue::Bool(false).to_text().as_deref(), Some("0"));
        assert_eq!(
            BindValue::Blob(vec![0xde, 0xad]).to_text().as_deref(),
            Some("DEAD")
        );
        assert_eq!(BindValue::Null.to_text(), None);
        assert_eq!(BindValue::display('x').to_text().as_deref(), Some("x"));
    }

    #[test]
    fn test_args_macro_converts_options_to_null() {
        let values = args![42, "a", None::<i64>, 2.5_f32];
        assert_eq!(
            values,
            vec![
                BindValue::Int(42),
                BindValue::Text("a".to_string()),
                BindValue::Null,
                BindValue::Float(2.5),
            ]
        );
    }

    #[test]
    fn test_field_value_conversions() {
        assert_eq!(FieldValue::Text(" 12 ".to_string()).as_i64(), 12);
        assert_eq!(FieldValue::Float(3.9).as_i64(), 3);
        assert_eq!(FieldValue::Null.as_text(), None);
        assert_eq!(FieldValue::Blob(vec![1, 2]).to_string(), "0102");
        assert_eq!(FieldValue::Text("ab".to_string()).payload_len(), 3);
    }
}
