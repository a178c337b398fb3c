//! Operand values carried by domain-filter predicates.
//!
//! Values serialize to the JSON shapes the external data service expects:
//! dates as `YYYY-MM-DD`, timestamps as `YYYY-MM-DD HH:MM:SS`.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Timestamp format used by the data service.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Date format used by the data service.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A predicate operand.
///
/// # Examples
///
/// ```
/// use groundql::Value;
///
/// let state = Value::from("sale");
/// assert_eq!(state.to_json(), serde_json::json!("sale"));
///
/// let states = Value::list(["sale", "done"]);
/// assert_eq!(states.to_json(), serde_json::json!(["sale", "done"]));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// A boolean, as used for flags like `is_company`.
    Bool(bool),
    /// An integer, including record ids.
    Int(i64),
    /// A floating-point number.
    Float(f64),
    /// Text.
    String(String),
    /// A calendar date.
    Date(NaiveDate),
    /// A timestamp without zone.
    DateTime(NaiveDateTime),
    /// Operand of `in` and `not in`.
    List(Vec<Value>),
    /// Absent value; Odoo's `False`.
    Null,
}

impl Value {
    /// Builds a list of string values.
    #[must_use]
    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(items.into_iter().map(|s| Self::String(s.into())).collect())
    }

    /// True for [`Value::List`].
    pub const fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    /// True for [`Value::Null`].
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The text, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the value, if it has one.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Converts to the wire representation used in data-service domains.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Self::Bool(b) => J::Bool(*b),
            Self::Int(i) => J::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or(J::Null, J::Number),
            Self::String(s) => J::String(s.clone()),
            Self::Date(d) => J::String(d.format(DATE_FORMAT).to_string()),
            Self::DateTime(dt) => J::String(dt.format(DATETIME_FORMAT).to_string()),
            Self::List(items) => J::Array(items.iter().map(Self::to_json).collect()),
            Self::Null => J::Bool(false),
        }
    }

    /// Writes a canonical, whitespace-normalized text form used for cache keys.
    pub(crate) fn write_canonical(&self, out: &mut String) {
        match self {
            Self::String(s) => out.push_str(&crate::filter::normalize_text(s)),
            Self::List(items) => {
                out.push('[');
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        out.push(',');
                    }
                    item.write_canonical(out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "'{s}'"),
            Self::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Self::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            Self::List(items) => {
                write!(f, "(")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Self::Null => write!(f, "null"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Self::Date(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_wire_format() {
        let d = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(Value::Date(d).to_json(), serde_json::json!("2024-05-01"));

        let dt = d.and_hms_opt(23, 59, 59).unwrap();
        assert_eq!(
            Value::DateTime(dt).to_json(),
            serde_json::json!("2024-05-01 23:59:59")
        );
    }

    #[test]
    fn test_null_is_false_on_the_wire() {
        assert_eq!(Value::Null.to_json(), serde_json::json!(false));
    }

    #[test]
    fn test_canonical_form_collapses_text() {
        let mut a = String::new();
        Value::from("  Posted   Invoice ").write_canonical(&mut a);
        let mut b = String::new();
        Value::from("posted invoice").write_canonical(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_display_list() {
        let v = Value::list(["sale", "done"]);
        assert_eq!(v.to_string(), "('sale', 'done')");
    }

    #[test]
    fn test_numeric_view() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Float(2.5).as_f64(), Some(2.5));
        assert_eq!(Value::from("x").as_f64(), None);
    }
}
