//! Universal value type for properties and query results.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Edge, Node, Path};

/// Runtime value.
///
/// Covers every type the query pipeline can produce:
/// - Scalars: Bool, Int, Double, String
/// - Containers: Array (homogeneous or mixed)
/// - Spatial: Point (2-D geographic coordinate)
/// - Graph: Node, Edge, Path — these flow through the pipeline only and are
///   never persisted as property values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Array(Vec<Value>),
    Point { latitude: f64, longitude: f64 },

    // Graph types
    Node(Box<Node>),
    Edge(Box<Edge>),
    Path(Box<Path>),
}

// ============================================================================
// Type checking
// ============================================================================

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "INTEGER",
            Value::Double(_) => "DOUBLE",
            Value::String(_) => "STRING",
            Value::Array(_) => "ARRAY",
            Value::Point { .. } => "POINT",
            Value::Node(_) => "NODE",
            Value::Edge(_) => "EDGE",
            Value::Path(_) => "PATH",
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }
    pub fn is_numeric(&self) -> bool { matches!(self, Value::Int(_) | Value::Double(_)) }

    /// A property value is anything that can live on a node or edge.
    /// Graph sub-entities are pipeline-only.
    pub fn is_storable(&self) -> bool {
        match self {
            Value::Node(_) | Value::Edge(_) | Value::Path(_) => false,
            Value::Array(items) => items.iter().all(Value::is_storable),
            _ => true,
        }
    }

    /// Cypher truthiness: NULL and false are falsy, everything else truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            _ => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Double(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

// ============================================================================
// Conversions (From impls)
// ============================================================================

impl From<bool> for Value { fn from(v: bool) -> Self { Value::Bool(v) } }
impl From<i32> for Value { fn from(v: i32) -> Self { Value::Int(v as i64) } }
impl From<i64> for Value { fn from(v: i64) -> Self { Value::Int(v) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Value::Double(v) } }
impl From<String> for Value { fn from(v: String) -> Self { Value::String(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Value::String(v.to_owned()) } }
impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self { Value::Array(v.into_iter().map(Into::into).collect()) }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self { v.map(Into::into).unwrap_or(Value::Null) }
}

// ============================================================================
// Comparison
// ============================================================================

impl Value {
    /// Cypher comparison. Returns None when either side is NULL or the types
    /// are incomparable (the result of the comparison is then NULL).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
            (Value::Double(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    /// Total order used by ORDER BY and index keys. Values of different
    /// types sort by a fixed type rank; NULL sorts last.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        let ra = self.type_rank();
        let rb = other.type_rank();
        if ra != rb {
            return ra.cmp(&rb);
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Point { latitude: a1, longitude: a2 }, Value::Point { latitude: b1, longitude: b2 }) => {
                a1.total_cmp(b1).then(a2.total_cmp(b2))
            }
            (Value::Node(a), Value::Node(b)) => a.id.0.cmp(&b.id.0),
            (Value::Edge(a), Value::Edge(b)) => a.id.0.cmp(&b.id.0),
            // Int and Double share a rank and compare numerically.
            (a, b) => {
                let fa = a.as_double().unwrap_or(f64::NAN);
                let fb = b.as_double().unwrap_or(f64::NAN);
                fa.total_cmp(&fb)
            }
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int(_) | Value::Double(_) => 1,
            Value::String(_) => 2,
            Value::Array(_) => 3,
            Value::Point { .. } => 4,
            Value::Node(_) => 5,
            Value::Edge(_) => 6,
            Value::Path(_) => 7,
            Value::Null => 8,
        }
    }
}

// ============================================================================
// Display
// ============================================================================

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
            Value::Array(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Point { latitude, longitude } => {
                write!(f, "point({{latitude: {latitude}, longitude: {longitude}}})")
            }
            Value::Node(n) => write!(f, "{n}"),
            Value::Edge(e) => write!(f, "{e}"),
            Value::Path(p) => write!(f, "{p:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_from() {
        assert_eq!(Value::from("hello"), Value::String("hello".into()));
        assert_eq!(Value::from(42), Value::Int(42));
        assert_eq!(Value::from(2.5), Value::Double(2.5));
        assert_eq!(Value::from(true), Value::Bool(true));
    }

    #[test]
    fn test_null_comparison() {
        assert_eq!(Value::Null.compare(&Value::Null), None);
        assert_eq!(Value::Null.compare(&Value::Int(1)), None);
    }

    #[test]
    fn test_numeric_comparison() {
        assert_eq!(
            Value::Int(1).compare(&Value::Double(1.5)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_total_order_ranks_types() {
        // numbers < strings < null
        assert_eq!(Value::Int(99).total_cmp(&Value::String("a".into())), Ordering::Less);
        assert_eq!(Value::String("z".into()).total_cmp(&Value::Null), Ordering::Less);
    }

    #[test]
    fn test_storable() {
        assert!(Value::Int(1).is_storable());
        assert!(Value::Array(vec![Value::Int(1), Value::String("x".into())]).is_storable());
        assert!(!Value::Node(Box::new(crate::model::Node::detached(crate::model::NodeId(1)))).is_storable());
    }
}
