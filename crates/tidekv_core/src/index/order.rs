//! Value orderings for secondary indexes.

use crate::store::compare_ascii_case_insensitive;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// A caller-supplied value comparison.
pub type CompareFn = Arc<dyn Fn(&str, &str) -> Ordering + Send + Sync>;

/// How an index orders the values it holds.
///
/// Numeric orders treat values that fail to parse as zero. Equal values are
/// tie-broken on key byte order by the index itself.
#[derive(Clone)]
pub enum ValueOrder {
    /// ASCII case-insensitive string order.
    String,
    /// Byte order.
    Binary,
    /// Signed 64-bit integers.
    Int,
    /// Unsigned 64-bit integers.
    Uint,
    /// 64-bit floats, using IEEE total order.
    Float,
    /// A field of a JSON document, addressed by a dotted path such as
    /// `name.last` or `tags.0`.
    Json(String),
    /// Caller-supplied comparison.
    Custom(CompareFn),
    /// The wrapped order, reversed.
    Desc(Box<ValueOrder>),
}

impl ValueOrder {
    /// Orders by a JSON field.
    #[must_use]
    pub fn json(path: impl Into<String>) -> Self {
        Self::Json(path.into())
    }

    /// Orders with a custom comparison.
    #[must_use]
    pub fn custom<F>(compare: F) -> Self
    where
        F: Fn(&str, &str) -> Ordering + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(compare))
    }

    /// Reverses this order.
    #[must_use]
    pub fn desc(self) -> Self {
        Self::Desc(Box::new(self))
    }

    /// Compares two values.
    #[must_use]
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        match self {
            Self::String => compare_ascii_case_insensitive(a, b),
            Self::Binary => a.as_bytes().cmp(b.as_bytes()),
            Self::Int => parse_or_zero::<i64>(a).cmp(&parse_or_zero::<i64>(b)),
            Self::Uint => parse_or_zero::<u64>(a).cmp(&parse_or_zero::<u64>(b)),
            Self::Float => parse_or_zero::<f64>(a).total_cmp(&parse_or_zero::<f64>(b)),
            Self::Json(path) => compare_json(json_field(a, path).as_ref(), json_field(b, path).as_ref()),
            Self::Custom(compare) => compare(a, b),
            Self::Desc(inner) => inner.compare(b, a),
        }
    }
}

impl fmt::Debug for ValueOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("String"),
            Self::Binary => f.write_str("Binary"),
            Self::Int => f.write_str("Int"),
            Self::Uint => f.write_str("Uint"),
            Self::Float => f.write_str("Float"),
            Self::Json(path) => f.debug_tuple("Json").field(path).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
            Self::Desc(inner) => f.debug_tuple("Desc").field(inner).finish(),
        }
    }
}

fn parse_or_zero<T: std::str::FromStr + Default>(value: &str) -> T {
    value.trim().parse().unwrap_or_default()
}

/// Extracts the field at a dotted path, or `None` if the document does not
/// parse or the path is absent.
fn json_field(document: &str, path: &str) -> Option<Value> {
    let mut value: Value = serde_json::from_str(document).ok()?;
    if path.is_empty() {
        return Some(value);
    }
    for segment in path.split('.') {
        value = match value {
            Value::Object(mut map) => map.remove(segment)?,
            Value::Array(mut items) => {
                let idx: usize = segment.parse().ok()?;
                if idx >= items.len() {
                    return None;
                }
                items.swap_remove(idx)
            }
            _ => return None,
        };
    }
    Some(value)
}

/// Missing < null < false < true < numbers < strings < arrays/objects.
fn json_rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(false)) => 2,
        Some(Value::Bool(true)) => 3,
        Some(Value::Number(_)) => 4,
        Some(Value::String(_)) => 5,
        Some(Value::Array(_) | Value::Object(_)) => 6,
    }
}

fn compare_json(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    json_rank(a).cmp(&json_rank(b)).then_with(|| match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.total_cmp(&y)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => compare_ascii_case_insensitive(x, y),
        (Some(x @ (Value::Array(_) | Value::Object(_))), Some(y)) => {
            x.to_string().cmp(&y.to_string())
        }
        _ => Ordering::Equal,
    })
}
