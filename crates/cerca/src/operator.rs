//! Condition operators and their registry.
//!
//! Each operator turns one `(field, value)` pair into a boolean SQL
//! fragment, binding its values into the shared parameter table. The
//! registry maps operator names (case-insensitive, symbols and words
//! both accepted) to handlers; callers can register their own to add
//! backend-specific matching.

use std::collections::HashMap;

use crate::error::{QueryError, QueryResult};
use crate::params::ParamBinder;
use crate::query::FieldRef;
use crate::value::CriteriaValue;

/// Renders one criterion into a SQL condition fragment.
///
/// Fragments reference bound values as `:name` placeholders obtained
/// from the binder; they must never interpolate values directly.
pub trait Operator: Send + Sync {
    fn render(
        &self,
        field: &FieldRef,
        value: &CriteriaValue,
        params: &mut ParamBinder,
    ) -> QueryResult<String>;
}

/// Registry of known operators.
pub struct OperatorRegistry {
    operators: HashMap<String, Box<dyn Operator>>,
}

impl OperatorRegistry {
    /// A registry with the built-in operator set.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_defaults();
        registry
    }

    /// A registry with no operators at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            operators: HashMap::new(),
        }
    }

    /// Register an operator under a name. Names are case-insensitive;
    /// registering an existing name replaces the previous handler.
    pub fn register(&mut self, name: &str, operator: Box<dyn Operator>) {
        self.operators.insert(name.to_lowercase(), operator);
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.operators.contains_key(&name.to_lowercase())
    }

    /// Render a criterion through the named operator. Returns `Ok(None)`
    /// when the name is unknown so the caller decides how to fail.
    pub fn apply(
        &self,
        name: &str,
        field: &FieldRef,
        value: &CriteriaValue,
        params: &mut ParamBinder,
    ) -> QueryResult<Option<String>> {
        match self.operators.get(&name.to_lowercase()) {
            Some(operator) => operator.render(field, value, params).map(Some),
            None => Ok(None),
        }
    }

    /// The registered operator names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn register_defaults(&mut self) {
        for (names, sql) in [
            (&["=", "eq"][..], "="),
            (&["!=", "neq", "not_eq"][..], "<>"),
            (&["<", "lt"][..], "<"),
            (&["<=", "lte"][..], "<="),
            (&[">", "gt"][..], ">"),
            (&[">=", "gte"][..], ">="),
        ] {
            for name in names {
                self.register(name, Box::new(Comparison { sql }));
            }
        }
        self.register("like", Box::new(TextMatch::new(MatchKind::Like)));
        self.register("not_like", Box::new(TextMatch::new(MatchKind::NotLike)));
        self.register("contains", Box::new(TextMatch::new(MatchKind::Contains)));
        self.register(
            "starts_with",
            Box::new(TextMatch::new(MatchKind::StartsWith)),
        );
        self.register("ends_with", Box::new(TextMatch::new(MatchKind::EndsWith)));
        self.register("in", Box::new(InList { negated: false }));
        self.register("not_in", Box::new(InList { negated: true }));
        self.register("between", Box::new(Between { negated: false }));
        self.register("not_between", Box::new(Between { negated: true }));
        self.register("is_null", Box::new(NullCheck { negated: false }));
        self.register("is_not_null", Box::new(NullCheck { negated: true }));
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Escape LIKE wildcards so user input matches literally.
pub fn escape_like_wildcards(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Binary comparison (`=`, `<>`, `<`, `<=`, `>`, `>=`).
///
/// An equality or inequality against a null value degrades to the
/// matching null check rather than producing `= NULL`.
struct Comparison {
    sql: &'static str,
}

impl Operator for Comparison {
    fn render(
        &self,
        field: &FieldRef,
        value: &CriteriaValue,
        params: &mut ParamBinder,
    ) -> QueryResult<String> {
        if value.is_null() {
            return match self.sql {
                "=" => Ok(format!("{} IS NULL", field.sql())),
                "<>" => Ok(format!("{} IS NOT NULL", field.sql())),
                _ => Err(QueryError::InvalidCriterion {
                    field: field.column().to_string(),
                    message: format!("operator `{}` cannot compare against null", self.sql),
                }),
            };
        }
        let Some(bound) = value.to_sea_value() else {
            return Err(QueryError::InvalidCriterion {
                field: field.column().to_string(),
                message: format!("operator `{}` expects a scalar value", self.sql),
            });
        };
        let name = params.bind(field.param_stem(), bound);
        Ok(format!("{} {} :{name}", field.sql(), self.sql))
    }
}

enum MatchKind {
    Like,
    NotLike,
    Contains,
    StartsWith,
    EndsWith,
}

/// LIKE-family matching. `like`/`not_like` take the pattern as given;
/// `contains`/`starts_with`/`ends_with` escape wildcards in the input
/// and wrap it themselves.
struct TextMatch {
    kind: MatchKind,
}

impl TextMatch {
    fn new(kind: MatchKind) -> Self {
        Self { kind }
    }
}

impl Operator for TextMatch {
    fn render(
        &self,
        field: &FieldRef,
        value: &CriteriaValue,
        params: &mut ParamBinder,
    ) -> QueryResult<String> {
        let Some(text) = value.as_text() else {
            return Err(QueryError::InvalidCriterion {
                field: field.column().to_string(),
                message: "text match operators expect a string value".to_string(),
            });
        };
        let (sql_op, pattern) = match &self.kind {
            MatchKind::Like => ("LIKE", text),
            MatchKind::NotLike => ("NOT LIKE", text),
            MatchKind::Contains => ("LIKE", format!("%{}%", escape_like_wildcards(&text))),
            MatchKind::StartsWith => ("LIKE", format!("{}%", escape_like_wildcards(&text))),
            MatchKind::EndsWith => ("LIKE", format!("%{}", escape_like_wildcards(&text))),
        };
        let name = params.bind(field.param_stem(), pattern.into());
        Ok(format!("{} {sql_op} :{name}", field.sql()))
    }
}

/// Null test. A boolean value flips the polarity: `is_null: false`
/// means "is not null" and vice versa.
struct NullCheck {
    negated: bool,
}

impl Operator for NullCheck {
    fn render(
        &self,
        field: &FieldRef,
        value: &CriteriaValue,
        _params: &mut ParamBinder,
    ) -> QueryResult<String> {
        let negated = match value {
            CriteriaValue::Bool(flag) => {
                if *flag {
                    self.negated
                } else {
                    !self.negated
                }
            }
            _ => self.negated,
        };
        if negated {
            Ok(format!("{} IS NOT NULL", field.sql()))
        } else {
            Ok(format!("{} IS NULL", field.sql()))
        }
    }
}

/// Membership test. Scalars are treated as one-element lists. An empty
/// list matches nothing for `in` and everything for `not_in`.
struct InList {
    negated: bool,
}

impl Operator for InList {
    fn render(
        &self,
        field: &FieldRef,
        value: &CriteriaValue,
        params: &mut ParamBinder,
    ) -> QueryResult<String> {
        let elements = value.as_list();
        if elements.is_empty() {
            return Ok(if self.negated { "1 = 1" } else { "1 = 0" }.to_string());
        }
        let mut names = Vec::with_capacity(elements.len());
        for element in &elements {
            let Some(bound) = element.to_sea_value() else {
                return Err(QueryError::InvalidCriterion {
                    field: field.column().to_string(),
                    message: "list membership values must be scalars".to_string(),
                });
            };
            names.push(format!(":{}", params.bind(field.param_stem(), bound)));
        }
        let sql_op = if self.negated { "NOT IN" } else { "IN" };
        Ok(format!("{} {sql_op} ({})", field.sql(), names.join(", ")))
    }
}

/// Range test; requires a two-element list `[low, high]`.
struct Between {
    negated: bool,
}

impl Operator for Between {
    fn render(
        &self,
        field: &FieldRef,
        value: &CriteriaValue,
        params: &mut ParamBinder,
    ) -> QueryResult<String> {
        let elements = value.as_list();
        let [low, high] = elements.as_slice() else {
            return Err(QueryError::InvalidCriterion {
                field: field.column().to_string(),
                message: format!(
                    "between expects exactly 2 values, got {}",
                    elements.len()
                ),
            });
        };
        let (Some(low), Some(high)) = (low.to_sea_value(), high.to_sea_value()) else {
            return Err(QueryError::InvalidCriterion {
                field: field.column().to_string(),
                message: "between bounds must be scalars".to_string(),
            });
        };
        let (low_name, high_name) = params.bind_pair(field.param_stem(), low, high);
        let sql_op = if self.negated { "NOT BETWEEN" } else { "BETWEEN" };
        Ok(format!(
            "{} {sql_op} :{low_name} AND :{high_name}",
            field.sql()
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn field() -> FieldRef {
        FieldRef::new("u", "status").unwrap()
    }

    fn apply(name: &str, value: CriteriaValue) -> (String, ParamBinder) {
        let registry = OperatorRegistry::new();
        let mut params = ParamBinder::new();
        let fragment = registry
            .apply(name, &field(), &value, &mut params)
            .unwrap()
            .unwrap();
        (fragment, params)
    }

    #[test]
    fn symbol_and_word_names_share_handlers() {
        let (a, _) = apply("=", "active".into());
        let (b, _) = apply("eq", "active".into());
        assert_eq!(a, b);
        assert_eq!(a, "\"u\".\"status\" = :status_0");
    }

    #[test]
    fn names_are_case_insensitive() {
        let (fragment, _) = apply("GTE", 18_i64.into());
        assert_eq!(fragment, "\"u\".\"status\" >= :status_0");
    }

    #[test]
    fn neq_renders_sql_inequality() {
        let (fragment, _) = apply("neq", "x".into());
        assert_eq!(fragment, "\"u\".\"status\" <> :status_0");
    }

    #[test]
    fn equality_against_null_becomes_null_check() {
        let (fragment, params) = apply("eq", CriteriaValue::Null);
        assert_eq!(fragment, "\"u\".\"status\" IS NULL");
        assert!(params.entries().is_empty());
        let (fragment, _) = apply("neq", CriteriaValue::Null);
        assert_eq!(fragment, "\"u\".\"status\" IS NOT NULL");
    }

    #[test]
    fn ordering_against_null_is_an_error() {
        let registry = OperatorRegistry::new();
        let mut params = ParamBinder::new();
        let result = registry.apply("lt", &field(), &CriteriaValue::Null, &mut params);
        assert!(matches!(result, Err(QueryError::InvalidCriterion { .. })));
    }

    #[test]
    fn contains_escapes_wildcards() {
        let (fragment, params) = apply("contains", "50%_off".into());
        assert_eq!(fragment, "\"u\".\"status\" LIKE :status_0");
        assert_eq!(
            params.entries()[0].1,
            sea_query::Value::from("%50\\%\\_off%")
        );
    }

    #[test]
    fn like_keeps_pattern_as_given() {
        let (_, params) = apply("like", "act%".into());
        assert_eq!(params.entries()[0].1, sea_query::Value::from("act%"));
    }

    #[test]
    fn in_list_binds_each_element() {
        let (fragment, params) = apply("in", vec!["a", "b"].into());
        assert_eq!(fragment, "\"u\".\"status\" IN (:status_0, :status_1)");
        assert_eq!(params.entries().len(), 2);
    }

    #[test]
    fn in_scalar_wraps_to_single_element() {
        let (fragment, _) = apply("in", "a".into());
        assert_eq!(fragment, "\"u\".\"status\" IN (:status_0)");
    }

    #[test]
    fn empty_lists_short_circuit() {
        let (fragment, _) = apply("in", CriteriaValue::List(Vec::new()));
        assert_eq!(fragment, "1 = 0");
        let (fragment, _) = apply("not_in", CriteriaValue::List(Vec::new()));
        assert_eq!(fragment, "1 = 1");
    }

    #[test]
    fn between_binds_both_bounds() {
        let (fragment, params) = apply("between", vec![18_i64, 65].into());
        assert_eq!(
            fragment,
            "\"u\".\"status\" BETWEEN :status_0_1 AND :status_0_2"
        );
        assert_eq!(params.entries().len(), 2);
    }

    #[test]
    fn between_rejects_wrong_arity() {
        let registry = OperatorRegistry::new();
        let mut params = ParamBinder::new();
        let result = registry.apply(
            "between",
            &field(),
            &CriteriaValue::List(vec![1_i64.into()]),
            &mut params,
        );
        assert!(matches!(result, Err(QueryError::InvalidCriterion { .. })));
    }

    #[test]
    fn null_check_polarity_flips_on_false() {
        let (fragment, _) = apply("is_null", CriteriaValue::Bool(false));
        assert_eq!(fragment, "\"u\".\"status\" IS NOT NULL");
        let (fragment, _) = apply("is_not_null", CriteriaValue::Bool(false));
        assert_eq!(fragment, "\"u\".\"status\" IS NULL");
        let (fragment, _) = apply("is_null", CriteriaValue::Null);
        assert_eq!(fragment, "\"u\".\"status\" IS NULL");
    }

    #[test]
    fn every_registered_name_resolves_and_renders() {
        let registry = OperatorRegistry::new();
        for name in registry.names() {
            assert!(registry.has(name), "{name}");
            let value: CriteriaValue = if name.contains("between") {
                vec![1_i64, 2].into()
            } else {
                "1".into()
            };
            let mut params = ParamBinder::new();
            let fragment = registry
                .apply(name, &field(), &value, &mut params)
                .unwrap();
            assert!(fragment.is_some(), "{name}");
        }
    }

    #[test]
    fn unknown_operator_returns_none() {
        let registry = OperatorRegistry::new();
        let mut params = ParamBinder::new();
        let result = registry
            .apply("soundex", &field(), &"x".into(), &mut params)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn custom_operators_can_be_registered() {
        struct AlwaysTrue;
        impl Operator for AlwaysTrue {
            fn render(
                &self,
                _field: &FieldRef,
                _value: &CriteriaValue,
                _params: &mut ParamBinder,
            ) -> QueryResult<String> {
                Ok("1 = 1".to_string())
            }
        }
        let mut registry = OperatorRegistry::new();
        registry.register("always", Box::new(AlwaysTrue));
        assert!(registry.has("ALWAYS"));
    }
}
