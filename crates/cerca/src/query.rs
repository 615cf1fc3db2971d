//! Native query wrapper: accumulates statement parts and renders SQL.
//!
//! A [`SelectQuery`] owns everything one build produces — root table and
//! alias, applied joins, condition fragments, parameter bindings, ordering
//! and windowing — and renders it through sea-query's Postgres builder.
//! Conditions reference their bindings as `:name` placeholders until
//! render time, so the bound parameter table stays inspectable.

use std::collections::HashMap;

use sea_query::{
    Alias, Asterisk, Expr, Order, PostgresQueryBuilder, Query, SelectStatement, Value,
};
use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};
use crate::join::{JoinDeclaration, JoinKind, JoinManager, Relation};
use crate::params::ParamBinder;

/// Validate a SQL identifier name (table/column/alias names).
/// Allows only `[a-zA-Z_][a-zA-Z0-9_]*` with max 63 chars (PostgreSQL limit).
pub(crate) fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
}

/// Validate a dotted path: every segment must be a safe identifier.
pub(crate) fn is_safe_path(path: &str) -> bool {
    !path.is_empty() && path.split('.').all(is_safe_identifier)
}

/// An alias-qualified column reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    alias: String,
    column: String,
}

impl FieldRef {
    pub fn new(alias: &str, column: &str) -> QueryResult<Self> {
        if !is_safe_identifier(alias) {
            return Err(QueryError::UnsafeIdentifier {
                name: alias.to_string(),
            });
        }
        if !is_safe_identifier(column) {
            return Err(QueryError::UnsafeIdentifier {
                name: column.to_string(),
            });
        }
        Ok(Self {
            alias: alias.to_string(),
            column: column.to_string(),
        })
    }

    /// Quoted SQL rendering, e.g. `"u"."status"`.
    #[must_use]
    pub fn sql(&self) -> String {
        format!("\"{}\".\"{}\"", self.alias, self.column)
    }

    /// Stem used for generated parameter names.
    #[must_use]
    pub fn param_stem(&self) -> &str {
        &self.column
    }

    #[must_use]
    pub fn column(&self) -> &str {
        &self.column
    }

    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Ordering specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone)]
enum OrderTarget {
    Column { alias: String, column: String },
    /// Pre-quoted passthrough for already-qualified names.
    Raw(String),
    Random,
}

/// The in-progress native query for one build.
#[derive(Debug)]
pub struct SelectQuery {
    table: String,
    alias: String,
    joins: JoinManager,
    conditions: Vec<String>,
    orders: Vec<(OrderTarget, SortDirection)>,
    limit: Option<u64>,
    offset: Option<u64>,
    params: ParamBinder,
}

impl SelectQuery {
    pub(crate) fn new(
        table: &str,
        alias: &str,
        relations: HashMap<String, Relation>,
    ) -> QueryResult<Self> {
        if !is_safe_identifier(table) {
            return Err(QueryError::UnsafeIdentifier {
                name: table.to_string(),
            });
        }
        if !is_safe_identifier(alias) {
            return Err(QueryError::UnsafeIdentifier {
                name: alias.to_string(),
            });
        }
        Ok(Self {
            table: table.to_string(),
            alias: alias.to_string(),
            joins: JoinManager::new(relations, alias),
            conditions: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            params: ParamBinder::new(),
        })
    }

    /// The root alias this query is scoped to.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// A field reference on the query root.
    pub fn root_field(&self, column: &str) -> QueryResult<FieldRef> {
        FieldRef::new(&self.alias, column)
    }

    /// Attach a boolean fragment; fragments are AND-combined at build time.
    pub fn and_where(&mut self, fragment: impl Into<String>) {
        self.conditions.push(fragment.into());
    }

    /// Bind a value under a generated collision-free name; returns the name
    /// to reference as `:name` in a fragment.
    pub fn bind(&mut self, stem: &str, value: Value) -> String {
        self.params.bind(stem, value)
    }

    /// Bind a value under an explicit name (replaces an existing binding).
    pub fn set_parameter(&mut self, name: &str, value: Value) {
        self.params.insert(name, value);
    }

    /// The bound parameter table, in binding order.
    #[must_use]
    pub fn parameters(&self) -> &[(String, Value)] {
        self.params.entries()
    }

    pub(crate) fn params_mut(&mut self) -> &mut ParamBinder {
        &mut self.params
    }

    /// Join a dotted relation path (reusing existing aliases) and return
    /// the terminal alias.
    pub fn ensure_joined(&mut self, path: &str) -> QueryResult<String> {
        self.joins.ensure_path(path)
    }

    pub(crate) fn apply_declared_joins(
        &mut self,
        declarations: &[JoinDeclaration],
    ) -> QueryResult<()> {
        self.joins.apply_declared(declarations)
    }

    /// Whether an alias is in use (root alias included).
    #[must_use]
    pub fn has_join(&self, alias: &str) -> bool {
        self.joins.has_alias(alias)
    }

    /// Require rows to have at least one related row on `path`: the
    /// relation is inner-joined, and counting stays distinct on the root.
    pub fn ensure_exists(&mut self, path: &str) -> QueryResult<()> {
        self.joins
            .ensure_path_with(path, Some(JoinKind::Inner), None)?;
        Ok(())
    }

    /// Require rows to have no related row on `path`: left join plus an
    /// IS NULL check on the joined key.
    pub fn ensure_not_exists(&mut self, path: &str) -> QueryResult<()> {
        let (alias, foreign_field) = self
            .joins
            .ensure_path_with(path, Some(JoinKind::Left), None)?;
        let field = FieldRef::new(&alias, &foreign_field)?;
        self.and_where(format!("{} IS NULL", field.sql()));
        Ok(())
    }

    /// Add an ORDER BY clause. Bare field names are qualified with the
    /// root alias; already-qualified or dotted names pass through.
    pub fn add_order_by(&mut self, field: &str, direction: SortDirection) -> QueryResult<()> {
        if field.contains('.') {
            if !is_safe_path(field) {
                return Err(QueryError::UnsafeIdentifier {
                    name: field.to_string(),
                });
            }
            let quoted = field
                .split('.')
                .map(|segment| format!("\"{segment}\""))
                .collect::<Vec<_>>()
                .join(".");
            self.orders.push((OrderTarget::Raw(quoted), direction));
        } else {
            if !is_safe_identifier(field) {
                return Err(QueryError::UnsafeIdentifier {
                    name: field.to_string(),
                });
            }
            self.orders.push((
                OrderTarget::Column {
                    alias: self.alias.clone(),
                    column: field.to_string(),
                },
                direction,
            ));
        }
        Ok(())
    }

    /// Order by RANDOM(), for sampling.
    pub fn order_by_random(&mut self) {
        self.orders.push((OrderTarget::Random, SortDirection::Asc));
    }

    pub fn set_limit(&mut self, limit: u64) {
        self.limit = Some(limit);
    }

    pub fn set_offset(&mut self, offset: u64) {
        self.offset = Some(offset);
    }

    /// The composed condition in positional form, for statements that
    /// reuse the parsed criteria outside a SELECT (bulk update/delete).
    pub(crate) fn positional_condition(&self) -> QueryResult<Option<(String, Vec<Value>)>> {
        if self.conditions.is_empty() {
            return Ok(None);
        }
        let fragment = self.conditions.join(" AND ");
        self.params.to_positional(&fragment).map(Some)
    }

    fn base_statement(&self) -> QueryResult<SelectStatement> {
        let mut stmt = Query::select();
        stmt.from_as(Alias::new(&self.table), Alias::new(&self.alias));
        for join in self.joins.applied() {
            stmt.join_as(
                join.kind.to_sea(),
                Alias::new(&join.table),
                Alias::new(&join.alias),
                Expr::col((Alias::new(&join.parent_alias), Alias::new(&join.local_field)))
                    .equals((Alias::new(&join.alias), Alias::new(&join.foreign_field))),
            );
        }
        if let Some((sql, values)) = self.positional_condition()? {
            stmt.and_where(Expr::cust_with_values(sql, values));
        }
        Ok(stmt)
    }

    /// Render the SELECT statement.
    pub fn build_select(&self) -> QueryResult<String> {
        let mut stmt = self.base_statement()?;
        stmt.column((Alias::new(&self.alias), Asterisk));
        for (target, direction) in &self.orders {
            let order = match direction {
                SortDirection::Asc => Order::Asc,
                SortDirection::Desc => Order::Desc,
            };
            match target {
                OrderTarget::Column { alias, column } => {
                    stmt.order_by((Alias::new(alias), Alias::new(column)), order);
                }
                OrderTarget::Raw(sql) => {
                    stmt.order_by_expr(Expr::cust(sql.clone()), order);
                }
                OrderTarget::Random => {
                    stmt.order_by_expr(Expr::cust("RANDOM()"), Order::Asc);
                }
            }
        }
        if let Some(limit) = self.limit {
            stmt.limit(limit);
        }
        if let Some(offset) = self.offset {
            stmt.offset(offset);
        }
        Ok(stmt.to_string(PostgresQueryBuilder))
    }

    /// Render the COUNT statement. Joins can multiply rows, so counting is
    /// always distinct on the root id; ordering and windowing are dropped.
    pub fn build_count(&self) -> QueryResult<String> {
        let mut stmt = self.base_statement()?;
        stmt.expr(Expr::cust(format!(
            "COUNT(DISTINCT \"{}\".\"id\")",
            self.alias
        )));
        Ok(stmt.to_string(PostgresQueryBuilder))
    }
}
