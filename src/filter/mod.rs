//! Domain filters and the natural-language filter translator.
//!
//! A [`DomainFilter`] is an ordered, immutable list of `(field, operator,
//! value)` predicates, equivalent to a WHERE clause on the external data
//! service. Filters are built once by the [`FilterTranslator`] and never
//! mutated; operations that need a variant (the comparison engine swapping
//! the date window) produce a new filter.

pub(crate) mod dates;
mod translate;

use std::fmt;

use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::schema::DateKind;
use crate::time::DateWindow;
use crate::value::Value;

pub use translate::{FilterTranslator, Translation, WindowSource};

/// Lower-cases, strips diacritics and collapses runs of whitespace.
///
/// ```
/// assert_eq!(groundql::filter::normalize_text("  Facturas   VENCIDAS "), "facturas vencidas");
/// assert_eq!(groundql::filter::normalize_text("Año"), "ano");
/// ```
#[must_use]
pub fn normalize_text(text: &str) -> String {
    let folded: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True if `needle` occurs in `haystack` on word boundaries.
///
/// Both arguments are expected to be normalized already.
pub(crate) fn contains_phrase(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let bytes = haystack.as_bytes();
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(needle) {
        let start = from + pos;
        let end = start + needle.len();
        let left_ok = start == 0 || !is_word_byte(bytes[start - 1]);
        let right_ok = end == bytes.len() || !is_word_byte(bytes[end]);
        if left_ok && right_ok {
            return true;
        }
        from = start + 1;
        while from < haystack.len() && !haystack.is_char_boundary(from) {
            from += 1;
        }
    }
    false
}

const fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// Comparison operators understood by the data service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// Equal.
    #[serde(rename = "=")]
    Eq,
    /// Not equal.
    #[serde(rename = "!=")]
    Ne,
    /// Greater than.
    #[serde(rename = ">")]
    Gt,
    /// Greater than or equal.
    #[serde(rename = ">=")]
    Ge,
    /// Less than.
    #[serde(rename = "<")]
    Lt,
    /// Less than or equal.
    #[serde(rename = "<=")]
    Le,
    /// Member of a list.
    #[serde(rename = "in")]
    In,
    /// Not a member of a list.
    #[serde(rename = "not in")]
    NotIn,
    /// Case-insensitive substring match.
    #[serde(rename = "ilike")]
    ILike,
}

impl Operator {
    /// Wire symbol.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::ILike => "ilike",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `(field, operator, value)` predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// Field name on the entity's model.
    pub field: String,
    /// Comparison operator.
    pub operator: Operator,
    /// Operand.
    pub value: Value,
}

impl Predicate {
    /// Creates a predicate.
    #[must_use]
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Wire form: `[field, operator, value]`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!([self.field, self.operator.as_str(), self.value.to_json()])
    }
}

impl Serialize for Predicate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(3))?;
        seq.serialize_element(&self.field)?;
        seq.serialize_element(self.operator.as_str())?;
        seq.serialize_element(&self.value.to_json())?;
        seq.end()
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "('{}', '{}', {})", self.field, self.operator, self.value)
    }
}

/// An ordered, immutable predicate list. An empty filter matches all records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DomainFilter {
    predicates: Vec<Predicate>,
}

impl DomainFilter {
    /// Creates a filter from predicates in order.
    #[must_use]
    pub fn new(predicates: Vec<Predicate>) -> Self {
        Self { predicates }
    }

    /// The filter matching every record.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Predicates in insertion order.
    #[must_use]
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// True for the match-all filter.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Number of predicates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// True if any predicate constrains `field`.
    #[must_use]
    pub fn touches_field(&self, field: &str) -> bool {
        self.predicates.iter().any(|p| p.field == field)
    }

    /// A new filter with every predicate on `field` removed.
    #[must_use]
    pub fn without_field(&self, field: &str) -> Self {
        Self::new(
            self.predicates
                .iter()
                .filter(|p| p.field != field)
                .cloned()
                .collect(),
        )
    }

    /// A new filter with `extra` appended.
    #[must_use]
    pub fn and(&self, extra: Predicate) -> Self {
        let mut predicates = self.predicates.clone();
        predicates.push(extra);
        Self::new(predicates)
    }

    /// A new filter whose predicates on `field` are replaced by the closed
    /// interval `window`. Non-date predicates keep their relative order.
    #[must_use]
    pub fn with_window(&self, field: &str, kind: DateKind, window: &DateWindow) -> Self {
        let mut predicates: Vec<Predicate> = Vec::with_capacity(self.predicates.len() + 2);
        let mut inserted = false;
        for p in &self.predicates {
            if p.field == field {
                if !inserted {
                    predicates.extend(window_predicates(field, kind, window));
                    inserted = true;
                }
            } else {
                predicates.push(p.clone());
            }
        }
        if !inserted {
            predicates.extend(window_predicates(field, kind, window));
        }
        Self::new(predicates)
    }

    /// Wire form: a JSON list of `[field, operator, value]` triples.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.predicates.iter().map(Predicate::to_json).collect())
    }

    /// Canonical text used for cache keys. Text operands are normalized so
    /// near-duplicate phrasing yields the same key.
    #[must_use]
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        for p in &self.predicates {
            out.push_str(&normalize_text(&p.field));
            out.push(' ');
            out.push_str(p.operator.as_str());
            out.push(' ');
            p.value.write_canonical(&mut out);
            out.push(';');
        }
        out
    }
}

impl fmt::Display for DomainFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (idx, p) in self.predicates.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, "]")
    }
}

/// The closed-interval predicates for `window` on a date or datetime field.
#[must_use]
pub fn window_predicates(field: &str, kind: DateKind, window: &DateWindow) -> [Predicate; 2] {
    match kind {
        DateKind::Date => [
            Predicate::new(field, Operator::Ge, Value::Date(window.start)),
            Predicate::new(field, Operator::Le, Value::Date(window.end)),
        ],
        DateKind::DateTime => {
            let start = window.start.and_hms_opt(0, 0, 0).map_or(Value::Date(window.start), Value::DateTime);
            let end = window.end.and_hms_opt(23, 59, 59).map_or(Value::Date(window.end), Value::DateTime);
            [
                Predicate::new(field, Operator::Ge, start),
                Predicate::new(field, Operator::Le, end),
            ]
        }
    }
}
