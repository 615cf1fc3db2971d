//! Criteria value types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A value carried by a criterion and bound into the generated query.
///
/// Untagged, so JSON criteria read naturally: `1` is an integer, `"a"` a
/// string, `[1, 2]` a list. UUID values only arise from the programmatic
/// constructors; JSON strings stay strings even when they look like UUIDs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CriteriaValue {
    /// SQL NULL.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// String value.
    Str(String),
    /// UUID value.
    Uuid(Uuid),
    /// List of values (for `in`/`not_in`/`between` operators).
    List(Vec<CriteriaValue>),
}

impl CriteriaValue {
    /// Build from a JSON value. Returns `None` for JSON objects, which have
    /// no criterion-value meaning.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => Some(match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            }),
            serde_json::Value::String(s) => Some(Self::Str(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(Self::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Self::List),
            serde_json::Value::Object(_) => None,
        }
    }

    /// Convert to a list, auto-wrapping a scalar in a single-element list.
    pub fn as_list(&self) -> Vec<Self> {
        match self {
            Self::List(items) => items.clone(),
            other => vec![other.clone()],
        }
    }

    /// String rendering of a scalar value, if it has one.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Str(s) => Some(s.clone()),
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Uuid(u) => Some(u.to_string()),
            Self::Null | Self::List(_) => None,
        }
    }

    /// Convert to a bindable sea-query value. `None` for lists, which must
    /// be expanded by the operator that accepts them.
    pub fn to_sea_value(&self) -> Option<sea_query::Value> {
        match self {
            Self::Null => Some(sea_query::Value::Bool(None)),
            Self::Bool(b) => Some((*b).into()),
            Self::Int(i) => Some((*i).into()),
            Self::Float(f) => Some((*f).into()),
            Self::Str(s) => Some(s.clone().into()),
            Self::Uuid(u) => Some((*u).into()),
            Self::List(_) => None,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for CriteriaValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for CriteriaValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for CriteriaValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for CriteriaValue {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for CriteriaValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for CriteriaValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Uuid> for CriteriaValue {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

impl<T: Into<CriteriaValue>> From<Vec<T>> for CriteriaValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn from_json_scalars() {
        assert_eq!(
            CriteriaValue::from_json(&serde_json::json!(42)),
            Some(CriteriaValue::Int(42))
        );
        assert_eq!(
            CriteriaValue::from_json(&serde_json::json!(1.5)),
            Some(CriteriaValue::Float(1.5))
        );
        assert_eq!(
            CriteriaValue::from_json(&serde_json::json!("hello")),
            Some(CriteriaValue::Str("hello".to_string()))
        );
        assert_eq!(
            CriteriaValue::from_json(&serde_json::Value::Null),
            Some(CriteriaValue::Null)
        );
    }

    #[test]
    fn from_json_rejects_objects() {
        assert!(CriteriaValue::from_json(&serde_json::json!({"a": 1})).is_none());
    }

    #[test]
    fn as_list_wraps_scalars() {
        assert_eq!(
            CriteriaValue::Int(5).as_list(),
            vec![CriteriaValue::Int(5)]
        );
        assert_eq!(
            CriteriaValue::List(vec![CriteriaValue::Int(1), CriteriaValue::Int(2)])
                .as_list()
                .len(),
            2
        );
    }

    #[test]
    fn untagged_serde() {
        let v: CriteriaValue = serde_json::from_str("5").unwrap();
        assert_eq!(v, CriteriaValue::Int(5));

        let v: CriteriaValue = serde_json::from_str("[1, \"two\"]").unwrap();
        assert_eq!(
            v,
            CriteriaValue::List(vec![
                CriteriaValue::Int(1),
                CriteriaValue::Str("two".to_string())
            ])
        );

        let v: CriteriaValue = serde_json::from_str("null").unwrap();
        assert!(v.is_null());
    }

    #[test]
    fn as_text_conversions() {
        assert_eq!(CriteriaValue::Int(3).as_text(), Some("3".to_string()));
        assert_eq!(
            CriteriaValue::Str("x".to_string()).as_text(),
            Some("x".to_string())
        );
        assert!(CriteriaValue::Null.as_text().is_none());
        assert!(CriteriaValue::List(vec![]).as_text().is_none());
    }
}
