//! Criteria-to-SQL translation.
//!
//! Walks a [`Criteria`] tree and attaches the resulting condition
//! fragments to a [`SelectQuery`]. Dotted field paths are resolved
//! against the query's relation map, joining on demand; group nodes
//! compose child fragments with AND/OR, parenthesizing wherever SQL
//! precedence would otherwise change the meaning.

use crate::criteria::Criteria;
use crate::error::{QueryError, QueryResult};
use crate::operator::OperatorRegistry;
use crate::query::{FieldRef, SelectQuery};

/// Translate a criteria tree and attach it to the query.
///
/// An empty tree attaches nothing. Unknown operators and unresolvable
/// join paths are hard errors; no criterion is ever silently dropped.
pub fn apply_criteria(
    query: &mut SelectQuery,
    criteria: &Criteria,
    registry: &OperatorRegistry,
) -> QueryResult<()> {
    if let Some(fragment) = render(query, criteria, registry)? {
        query.and_where(fragment);
    }
    Ok(())
}

/// Render a node to a fragment, or `None` when the node is empty.
fn render(
    query: &mut SelectQuery,
    criteria: &Criteria,
    registry: &OperatorRegistry,
) -> QueryResult<Option<String>> {
    match criteria {
        Criteria::All(children) => {
            let parts = render_children(query, children, registry)?;
            Ok(match parts.len() {
                0 => None,
                // AND binds tighter than OR, so bare joining is safe in
                // any surrounding context.
                _ => Some(parts.join(" AND ")),
            })
        }
        Criteria::Any(children) => {
            let mut parts = render_children(query, children, registry)?;
            Ok(match parts.len() {
                0 => None,
                1 => parts.pop(),
                _ => Some(format!("({})", parts.join(" OR "))),
            })
        }
        Criteria::Not(child) => match render(query, child, registry)? {
            Some(fragment) => Ok(Some(format!("NOT ({fragment})"))),
            None => Ok(None),
        },
        Criteria::Field {
            field,
            operator,
            value,
        } => render_leaf(query, field, operator, value, registry).map(Some),
    }
}

fn render_children(
    query: &mut SelectQuery,
    children: &[Criteria],
    registry: &OperatorRegistry,
) -> QueryResult<Vec<String>> {
    let mut parts = Vec::with_capacity(children.len());
    for child in children {
        if let Some(fragment) = render(query, child, registry)? {
            parts.push(fragment);
        }
    }
    Ok(parts)
}

fn render_leaf(
    query: &mut SelectQuery,
    field: &str,
    operator: &str,
    value: &crate::value::CriteriaValue,
    registry: &OperatorRegistry,
) -> QueryResult<String> {
    let field_ref = resolve_field(query, field)?;
    match registry.apply(operator, &field_ref, value, query.params_mut())? {
        Some(fragment) => Ok(fragment),
        None => Err(QueryError::UnsupportedOperator {
            operator: operator.to_string(),
            field: field.to_string(),
        }),
    }
}

/// Resolve a field name to an alias-qualified reference.
///
/// A bare name targets the query root. A dotted name is first checked
/// against aliases already in play (`alias.column`); otherwise it is
/// treated as a relation path whose terminal segment is the column,
/// joining any missing hops. An optional leading segment equal to the
/// root alias is stripped, so `u.profile.country` and `profile.country`
/// resolve identically.
fn resolve_field(query: &mut SelectQuery, field: &str) -> QueryResult<FieldRef> {
    let segments: Vec<&str> = field.split('.').collect();
    match segments.as_slice() {
        [column] => query.root_field(column),
        [alias, column] if query.has_join(alias) => FieldRef::new(alias, column),
        _ => {
            let mut segments = segments.as_slice();
            if segments.len() > 2 && segments[0] == query.alias() {
                segments = &segments[1..];
            }
            let (column, path) = segments.split_last().ok_or_else(|| {
                QueryError::InvalidCriterion {
                    field: field.to_string(),
                    message: "empty field path".to_string(),
                }
            })?;
            let alias = query.ensure_joined(&path.join("."))?;
            FieldRef::new(&alias, column)
        }
    }
}
