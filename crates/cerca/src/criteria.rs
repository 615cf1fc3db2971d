//! Criteria trees: the caller-facing filter specification.
//!
//! A criteria tree is either a single field condition or a logical group.
//! Sibling conditions combine with AND by default; `or`/`and`/`not` groups
//! are explicit and nest arbitrarily. Trees can be built programmatically
//! or parsed from the JSON array shapes accepted by [`Criteria::from_value`].

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};
use crate::value::CriteriaValue;

/// A recursive filter specification.
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    /// AND group: all children must hold. The default sibling combination.
    All(Vec<Criteria>),
    /// OR group: at least one child must hold.
    Any(Vec<Criteria>),
    /// Negation of the composed child expression.
    Not(Box<Criteria>),
    /// A single field condition. `operator` is a registry name such as
    /// `eq`, `gte`, `contains`, `in`, `between`.
    Field {
        field: String,
        operator: String,
        value: CriteriaValue,
    },
}

impl Criteria {
    /// Empty criteria: matches everything.
    #[must_use]
    pub const fn none() -> Self {
        Self::All(Vec::new())
    }

    /// Equality shorthand.
    pub fn eq(field: impl Into<String>, value: impl Into<CriteriaValue>) -> Self {
        Self::cmp(field, "eq", value)
    }

    /// A single condition with an explicit operator name.
    pub fn cmp(
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<CriteriaValue>,
    ) -> Self {
        Self::Field {
            field: field.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }

    /// Explicit AND group.
    #[must_use]
    pub fn all(children: Vec<Self>) -> Self {
        Self::All(children)
    }

    /// OR group.
    #[must_use]
    pub fn any(children: Vec<Self>) -> Self {
        Self::Any(children)
    }

    /// Negated group.
    #[must_use]
    pub fn not(child: Self) -> Self {
        Self::Not(Box::new(child))
    }

    /// Whether this tree filters nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::All(children) | Self::Any(children) => children.iter().all(Self::is_empty),
            Self::Not(child) => child.is_empty(),
            Self::Field { .. } => false,
        }
    }

    /// Parse the array criteria shapes:
    ///
    /// - a map `{field: value}` becomes equality criteria; the keys `or`,
    ///   `and` and `not` introduce nested groups instead;
    /// - a list entry `[field, operator, value]` is a full criterion;
    /// - a list entry `[field, value]` is equality shorthand;
    /// - a list entry `["or", [...]]` (or `"and"`/`"not"`) is a group;
    /// - `null` or an empty map/list yields no filtering.
    pub fn from_value(value: &serde_json::Value) -> QueryResult<Self> {
        match value {
            serde_json::Value::Null => Ok(Self::none()),
            serde_json::Value::Object(map) => {
                let mut children = Vec::with_capacity(map.len());
                for (key, entry) in map {
                    children.push(Self::from_entry(key, entry)?);
                }
                Ok(Self::flatten(children))
            }
            serde_json::Value::Array(items) => {
                // An array may itself be one criterion shape, e.g.
                // `["age", "gte", 18]` or `["or", [...]]`.
                if let Ok(single) = Self::from_item(value) {
                    return Ok(single);
                }
                let mut children = Vec::with_capacity(items.len());
                for item in items {
                    children.push(Self::from_item(item)?);
                }
                Ok(Self::flatten(children))
            }
            other => Err(QueryError::InvalidCriterion {
                field: "criteria".to_string(),
                message: format!("expected object or array, got {other}"),
            }),
        }
    }

    fn from_entry(key: &str, value: &serde_json::Value) -> QueryResult<Self> {
        match key {
            "or" => Ok(Self::Any(Self::group_children(key, value)?)),
            "and" => Ok(Self::All(Self::group_children(key, value)?)),
            "not" => Ok(Self::Not(Box::new(Self::from_value(value)?))),
            _ => {
                let v = CriteriaValue::from_json(value).ok_or_else(|| {
                    QueryError::InvalidCriterion {
                        field: key.to_string(),
                        message: "unsupported value shape".to_string(),
                    }
                })?;
                Ok(Self::Field {
                    field: key.to_string(),
                    operator: "eq".to_string(),
                    value: v,
                })
            }
        }
    }

    fn group_children(key: &str, value: &serde_json::Value) -> QueryResult<Vec<Self>> {
        match value {
            serde_json::Value::Array(items) => items.iter().map(Self::from_item).collect(),
            serde_json::Value::Object(_) => Ok(vec![Self::from_value(value)?]),
            _ => Err(QueryError::InvalidCriterion {
                field: key.to_string(),
                message: "group value must be an array or object".to_string(),
            }),
        }
    }

    fn from_item(item: &serde_json::Value) -> QueryResult<Self> {
        match item {
            serde_json::Value::Object(_) => Self::from_value(item),
            serde_json::Value::Array(parts) => match parts.as_slice() {
                [serde_json::Value::String(field), serde_json::Value::String(op), value] => {
                    let v = CriteriaValue::from_json(value).ok_or_else(|| {
                        QueryError::InvalidCriterion {
                            field: field.clone(),
                            message: "unsupported value shape".to_string(),
                        }
                    })?;
                    Ok(Self::Field {
                        field: field.clone(),
                        operator: op.clone(),
                        value: v,
                    })
                }
                [serde_json::Value::String(key), value] if is_group_key(key) => {
                    Self::from_entry(key, value)
                }
                [serde_json::Value::String(field), value] => {
                    let v = CriteriaValue::from_json(value).ok_or_else(|| {
                        QueryError::InvalidCriterion {
                            field: field.clone(),
                            message: "unsupported value shape".to_string(),
                        }
                    })?;
                    Ok(Self::Field {
                        field: field.clone(),
                        operator: "eq".to_string(),
                        value: v,
                    })
                }
                _ => Err(QueryError::InvalidCriterion {
                    field: "criteria".to_string(),
                    message: "expected [field, value], [field, operator, value], or a group"
                        .to_string(),
                }),
            },
            other => Err(QueryError::InvalidCriterion {
                field: "criteria".to_string(),
                message: format!("expected object or array entry, got {other}"),
            }),
        }
    }

    fn flatten(mut children: Vec<Self>) -> Self {
        if children.len() == 1 {
            children.remove(0)
        } else {
            Self::All(children)
        }
    }

    /// JSON rendering, used for error diagnostics.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Self::All(children) => serde_json::json!({
                "and": children.iter().map(Self::to_value).collect::<Vec<_>>()
            }),
            Self::Any(children) => serde_json::json!({
                "or": children.iter().map(Self::to_value).collect::<Vec<_>>()
            }),
            Self::Not(child) => serde_json::json!({ "not": child.to_value() }),
            Self::Field {
                field,
                operator,
                value,
            } => {
                let v = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
                serde_json::json!([field, operator, v])
            }
        }
    }

    /// Compact rendering for error messages.
    #[must_use]
    pub fn repr(&self) -> String {
        self.to_value().to_string()
    }
}

fn is_group_key(key: &str) -> bool {
    matches!(key, "or" | "and" | "not")
}

impl Default for Criteria {
    fn default() -> Self {
        Self::none()
    }
}

impl Serialize for Criteria {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Criteria {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn map_becomes_equality_criteria() {
        let parsed = Criteria::from_value(&serde_json::json!({"status": "active"})).unwrap();
        assert_eq!(parsed, Criteria::eq("status", "active"));
    }

    #[test]
    fn map_with_multiple_keys_ands_siblings() {
        let parsed =
            Criteria::from_value(&serde_json::json!({"a": 1, "b": 2})).unwrap();
        let Criteria::All(children) = parsed else {
            panic!("expected All group");
        };
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn triple_entry_carries_operator() {
        let parsed = Criteria::from_value(&serde_json::json!([["age", "gte", 18]])).unwrap();
        assert_eq!(parsed, Criteria::cmp("age", "gte", 18));
    }

    #[test]
    fn pair_entry_is_equality() {
        let parsed = Criteria::from_value(&serde_json::json!([["name", "bob"]])).unwrap();
        assert_eq!(parsed, Criteria::eq("name", "bob"));
    }

    #[test]
    fn or_tuple_group() {
        let parsed = Criteria::from_value(&serde_json::json!([
            ["or", [{"urgent": true}, {"priority": 10}]]
        ]))
        .unwrap();
        assert_eq!(
            parsed,
            Criteria::any(vec![
                Criteria::eq("urgent", true),
                Criteria::eq("priority", 10),
            ])
        );
    }

    #[test]
    fn nested_not_group() {
        let parsed =
            Criteria::from_value(&serde_json::json!({"not": {"status": "archived"}})).unwrap();
        assert_eq!(
            parsed,
            Criteria::not(Criteria::eq("status", "archived"))
        );
    }

    #[test]
    fn groups_nest_arbitrarily() {
        let parsed = Criteria::from_value(&serde_json::json!({
            "or": [
                {"and": [{"a": 1}, {"b": 2}]},
                {"not": {"c": 3}}
            ]
        }))
        .unwrap();
        assert_eq!(
            parsed,
            Criteria::any(vec![
                Criteria::all(vec![Criteria::eq("a", 1), Criteria::eq("b", 2)]),
                Criteria::not(Criteria::eq("c", 3)),
            ])
        );
    }

    #[test]
    fn empty_input_matches_everything() {
        assert!(Criteria::from_value(&serde_json::Value::Null)
            .unwrap()
            .is_empty());
        assert!(Criteria::from_value(&serde_json::json!({}))
            .unwrap()
            .is_empty());
        assert!(Criteria::from_value(&serde_json::json!([]))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn scalar_input_is_rejected() {
        let err = Criteria::from_value(&serde_json::json!(42)).unwrap_err();
        assert!(matches!(err, QueryError::InvalidCriterion { .. }));
    }

    #[test]
    fn malformed_tuple_is_rejected() {
        let err = Criteria::from_value(&serde_json::json!([[1, 2, 3, 4]])).unwrap_err();
        assert!(matches!(err, QueryError::InvalidCriterion { .. }));
    }

    #[test]
    fn deserialize_from_request_body() {
        let criteria: Criteria = serde_json::from_str(
            r#"[["status", "active"], ["age", "gte", 18]]"#,
        )
        .unwrap();
        let Criteria::All(children) = criteria else {
            panic!("expected All group");
        };
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn list_values_survive_parsing() {
        let parsed =
            Criteria::from_value(&serde_json::json!([["role", "in", ["admin", "editor"]]]))
                .unwrap();
        assert_eq!(
            parsed,
            Criteria::cmp("role", "in", vec!["admin", "editor"])
        );
    }
}
