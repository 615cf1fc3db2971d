//! Query orchestration and execution.
//!
//! A [`QueryEngine`] holds everything needed to turn criteria into SQL
//! for one source: the source description (table, alias, declared joins,
//! relation map), the operator registry, registered persistent filter
//! handlers and macros, and any filters queued on this instance. Rows
//! come back as JSON documents via `row_to_json`, so callers deserialize
//! into their own types without the engine knowing the schema.

use std::collections::HashMap;
use std::sync::Arc;

use sea_query::{Alias, Expr, PostgresQueryBuilder, Query};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};

use crate::builder::QueryBuilder;
use crate::criteria::Criteria;
use crate::error::{QueryError, QueryResult};
use crate::join::{JoinDeclaration, Relation};
use crate::operator::OperatorRegistry;
use crate::parser;
use crate::query::{SelectQuery, SortDirection};
use crate::value::CriteriaValue;

/// Description of a queryable source: its table, root alias, always-on
/// joins, and the relations reachable from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub table: String,
    pub alias: String,
    #[serde(default)]
    pub joins: Vec<JoinDeclaration>,
    #[serde(default)]
    pub relations: HashMap<String, Relation>,
}

impl Source {
    pub fn new(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: alias.into(),
            joins: Vec::new(),
            relations: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_join(mut self, declaration: JoinDeclaration) -> Self {
        self.joins.push(declaration);
        self
    }

    #[must_use]
    pub fn with_relation(mut self, name: impl Into<String>, relation: Relation) -> Self {
        self.relations.insert(name.into(), relation);
        self
    }
}

/// A named, reusable filter registered on an engine.
///
/// Handlers receive the queued value and mutate the query directly, so a
/// filter can add conditions, joins, or ordering as it sees fit.
pub trait PersistentFilter: Send + Sync {
    fn apply(&self, query: &mut SelectQuery, value: &CriteriaValue) -> anyhow::Result<()>;
}

impl<F> PersistentFilter for F
where
    F: Fn(&mut SelectQuery, &CriteriaValue) -> anyhow::Result<()> + Send + Sync,
{
    fn apply(&self, query: &mut SelectQuery, value: &CriteriaValue) -> anyhow::Result<()> {
        self(query, value)
    }
}

/// One-shot query mutation, consumed by the next build.
type FilterFn = Box<dyn FnOnce(&mut SelectQuery) -> anyhow::Result<()> + Send>;

/// Named query mutation applied on request from the builder.
type MacroFn = dyn Fn(&mut SelectQuery) -> anyhow::Result<()> + Send + Sync;

/// Builds and runs queries against one source.
pub struct QueryEngine {
    source: Source,
    registry: Arc<OperatorRegistry>,
    filter_handlers: HashMap<String, Arc<dyn PersistentFilter>>,
    macros: HashMap<String, Arc<MacroFn>>,
    /// Queued persistent filters, applied in queue order on every build.
    filters: Vec<(String, CriteriaValue)>,
    /// Queued one-shot callbacks, drained by the next build.
    filter_fns: Vec<FilterFn>,
}

impl QueryEngine {
    #[must_use]
    pub fn new(source: Source) -> Self {
        Self {
            source,
            registry: Arc::new(OperatorRegistry::new()),
            filter_handlers: HashMap::new(),
            macros: HashMap::new(),
            filters: Vec::new(),
            filter_fns: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: OperatorRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    #[must_use]
    pub fn source(&self) -> &Source {
        &self.source
    }

    #[must_use]
    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    /// Register a named persistent filter handler.
    pub fn register_filter(&mut self, name: &str, filter: Arc<dyn PersistentFilter>) {
        self.filter_handlers.insert(name.to_string(), filter);
    }

    /// Register a named macro for use from the builder.
    pub fn register_macro<F>(&mut self, name: &str, body: F)
    where
        F: Fn(&mut SelectQuery) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.macros.insert(name.to_string(), Arc::new(body));
    }

    pub(crate) fn macro_fn(&self, name: &str) -> Option<Arc<MacroFn>> {
        self.macros.get(name).cloned()
    }

    /// A copy of this engine with a persistent filter queued. The copy
    /// carries registered handlers and already-queued filters; one-shot
    /// callbacks never survive duplication.
    #[must_use]
    pub fn with_filter(&self, name: &str, value: impl Into<CriteriaValue>) -> Self {
        let mut copy = self.clone();
        copy.filters.push((name.to_string(), value.into()));
        copy
    }

    /// Queue a one-shot callback; it runs on the next build only and is
    /// discarded afterwards whether or not the build succeeds.
    pub fn add_filter_fn<F>(&mut self, f: F)
    where
        F: FnOnce(&mut SelectQuery) -> anyhow::Result<()> + Send + 'static,
    {
        self.filter_fns.push(Box::new(f));
    }

    /// Start a fluent query against this engine.
    pub fn query(&mut self) -> QueryBuilder<'_> {
        QueryBuilder::new(self)
    }

    /// Build a [`SelectQuery`] from a criteria tree and ordering, running
    /// declared joins, criteria translation, queued persistent filters,
    /// and queued one-shot callbacks in that order.
    pub fn build_query(
        &mut self,
        criteria: &Criteria,
        order: &[(String, SortDirection)],
    ) -> QueryResult<SelectQuery> {
        // Drained up front: one-shot callbacks never outlive a build
        // attempt, even a failing one.
        let callbacks = std::mem::take(&mut self.filter_fns);
        let queued = callbacks.len();

        let result = self.build_query_with(criteria, order, callbacks);
        if result.is_err() && queued > 0 {
            tracing::warn!(
                discarded = queued,
                table = %self.source.table,
                "one-shot filters discarded by failed build"
            );
        }
        result
    }

    fn build_query_with(
        &mut self,
        criteria: &Criteria,
        order: &[(String, SortDirection)],
        callbacks: Vec<FilterFn>,
    ) -> QueryResult<SelectQuery> {
        let mut query = SelectQuery::new(
            &self.source.table,
            &self.source.alias,
            self.source.relations.clone(),
        )?;
        query.apply_declared_joins(&self.source.joins)?;
        parser::apply_criteria(&mut query, criteria, &self.registry)?;

        for (name, value) in &self.filters {
            let handler =
                self.filter_handlers
                    .get(name)
                    .ok_or_else(|| QueryError::UnknownFilter {
                        name: name.clone(),
                    })?;
            handler
                .apply(&mut query, value)
                .map_err(QueryError::Callback)?;
        }
        for callback in callbacks {
            callback(&mut query).map_err(QueryError::Callback)?;
        }

        for (field, direction) in order {
            query.add_order_by(field, *direction)?;
        }

        tracing::debug!(
            table = %self.source.table,
            alias = %self.source.alias,
            params = query.parameters().len(),
            "built query"
        );
        Ok(query)
    }

    /// Fetch all rows matching the criteria, deserialized from JSON.
    pub async fn fetch<T>(
        &mut self,
        pool: &PgPool,
        criteria: &Criteria,
        order: &[(String, SortDirection)],
    ) -> QueryResult<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let query = self.build_query(criteria, order)?;
        fetch_json(pool, &query.build_select()?).await
    }

    /// Fetch the first matching row, or `None`.
    pub async fn fetch_optional<T>(
        &mut self,
        pool: &PgPool,
        criteria: &Criteria,
    ) -> QueryResult<Option<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut query = self.build_query(criteria, &[])?;
        query.set_limit(1);
        let mut rows: Vec<T> = fetch_json(pool, &query.build_select()?).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    /// Fetch exactly one matching row. Zero matches and multiple matches
    /// are distinct errors; the multiple case reports the full count.
    pub async fn fetch_one<T>(&mut self, pool: &PgPool, criteria: &Criteria) -> QueryResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let repr = criteria.repr();
        let mut query = self.build_query(criteria, &[])?;
        query.set_limit(2);
        let mut rows: Vec<T> = fetch_json(pool, &query.build_select()?).await?;
        match rows.len() {
            0 => Err(QueryError::NotFound { criteria: repr }),
            1 => Ok(rows.swap_remove(0)),
            _ => {
                let count = fetch_count(pool, &query.build_count()?).await?;
                Err(QueryError::MultipleFound {
                    criteria: repr,
                    count,
                })
            }
        }
    }

    /// Count rows matching the criteria, distinct on the root id.
    pub async fn count(&mut self, pool: &PgPool, criteria: &Criteria) -> QueryResult<u64> {
        let query = self.build_query(criteria, &[])?;
        fetch_count(pool, &query.build_count()?).await
    }

    /// Whether any row matches the criteria.
    pub async fn exists(&mut self, pool: &PgPool, criteria: &Criteria) -> QueryResult<bool> {
        let mut query = self.build_query(criteria, &[])?;
        query.set_limit(1);
        let rows: Vec<serde_json::Value> = fetch_json(pool, &query.build_select()?).await?;
        Ok(!rows.is_empty())
    }

    /// Fetch up to `limit` matching rows in random order.
    pub async fn fetch_random<T>(
        &mut self,
        pool: &PgPool,
        criteria: &Criteria,
        limit: u64,
    ) -> QueryResult<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut query = self.build_query(criteria, &[])?;
        query.order_by_random();
        query.set_limit(limit);
        fetch_json(pool, &query.build_select()?).await
    }

    /// Stream matching rows to a callback in fixed-size chunks. The query
    /// is built once; only the window moves between rounds, so filters and
    /// one-shot callbacks run exactly once.
    pub async fn for_each_chunk<T, F>(
        &mut self,
        pool: &PgPool,
        criteria: &Criteria,
        order: &[(String, SortDirection)],
        chunk_size: u64,
        mut f: F,
    ) -> QueryResult<u64>
    where
        T: serde::de::DeserializeOwned,
        F: FnMut(Vec<T>) -> anyhow::Result<()>,
    {
        let mut query = self.build_query(criteria, order)?;
        query.set_limit(chunk_size.max(1));
        let mut offset = 0u64;
        let mut seen = 0u64;
        loop {
            query.set_offset(offset);
            let rows: Vec<T> = fetch_json(pool, &query.build_select()?).await?;
            let got = rows.len() as u64;
            if got == 0 {
                break;
            }
            seen += got;
            f(rows).map_err(QueryError::Callback)?;
            if got < chunk_size.max(1) {
                break;
            }
            offset += got;
        }
        Ok(seen)
    }

    /// Update matching rows, setting each `(column, value)` pair. Returns
    /// the number of rows affected. Criteria referencing joined fields are
    /// rejected; bulk statements run on the bare table.
    pub async fn update_where(
        &mut self,
        pool: &PgPool,
        criteria: &Criteria,
        values: &[(String, CriteriaValue)],
    ) -> QueryResult<u64> {
        let condition = self.bulk_condition(criteria)?;
        let mut stmt = Query::update();
        stmt.table(Alias::new(&self.source.table));
        for (column, value) in values {
            if !crate::query::is_safe_identifier(column) {
                return Err(QueryError::UnsafeIdentifier {
                    name: column.clone(),
                });
            }
            let bound = value.to_sea_value().ok_or_else(|| {
                QueryError::InvalidCriterion {
                    field: column.clone(),
                    message: "bulk updates take scalar values".to_string(),
                }
            })?;
            stmt.value(Alias::new(column), bound);
        }
        if let Some((sql, params)) = condition {
            stmt.cond_where(Expr::cust_with_values(sql, params));
        }
        let sql = stmt.to_string(PostgresQueryBuilder);
        tracing::debug!(table = %self.source.table, "bulk update");
        let result = sqlx::query(&sql).execute(pool).await?;
        Ok(result.rows_affected())
    }

    /// Delete matching rows; returns the number of rows affected. Joined
    /// fields in the criteria are rejected.
    pub async fn delete_where(&mut self, pool: &PgPool, criteria: &Criteria) -> QueryResult<u64> {
        let condition = self.bulk_condition(criteria)?;
        let mut stmt = Query::delete();
        stmt.from_table(Alias::new(&self.source.table));
        if let Some((sql, params)) = condition {
            stmt.cond_where(Expr::cust_with_values(sql, params));
        }
        let sql = stmt.to_string(PostgresQueryBuilder);
        tracing::debug!(table = %self.source.table, "bulk delete");
        let result = sqlx::query(&sql).execute(pool).await?;
        Ok(result.rows_affected())
    }

    /// Translate criteria for a bulk statement: no joins, conditions
    /// qualified by the table name itself.
    fn bulk_condition(
        &self,
        criteria: &Criteria,
    ) -> QueryResult<Option<(String, Vec<sea_query::Value>)>> {
        reject_joined_fields(criteria)?;
        let mut query = SelectQuery::new(&self.source.table, &self.source.table, HashMap::new())?;
        parser::apply_criteria(&mut query, criteria, &self.registry)?;
        query.positional_condition()
    }
}

impl Clone for QueryEngine {
    /// One-shot callbacks are `FnOnce` and tied to the build they were
    /// queued for; a duplicated engine starts with an empty queue.
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            registry: Arc::clone(&self.registry),
            filter_handlers: self.filter_handlers.clone(),
            macros: self.macros.clone(),
            filters: self.filters.clone(),
            filter_fns: Vec::new(),
        }
    }
}

fn reject_joined_fields(criteria: &Criteria) -> QueryResult<()> {
    match criteria {
        Criteria::All(children) | Criteria::Any(children) => {
            children.iter().try_for_each(reject_joined_fields)
        }
        Criteria::Not(child) => reject_joined_fields(child),
        Criteria::Field { field, .. } => {
            if field.contains('.') {
                Err(QueryError::InvalidCriterion {
                    field: field.clone(),
                    message: "joined fields are not supported in bulk operations".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }
}

/// Run a SELECT and deserialize each row from its JSON form.
pub(crate) async fn fetch_json<T>(pool: &PgPool, sql: &str) -> QueryResult<Vec<T>>
where
    T: serde::de::DeserializeOwned,
{
    let wrapped = format!("SELECT row_to_json(t) AS data FROM ({sql}) t");
    let rows = sqlx::query(&wrapped).fetch_all(pool).await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let json: serde_json::Value = row.try_get("data")?;
        let item = serde_json::from_value(json).map_err(|e| {
            tracing::error!(error = %e, "row deserialization failed");
            QueryError::Callback(e.into())
        })?;
        out.push(item);
    }
    Ok(out)
}

/// Run a COUNT statement and return the count.
pub(crate) async fn fetch_count(pool: &PgPool, sql: &str) -> QueryResult<u64> {
    let row = sqlx::query(sql).fetch_one(pool).await?;
    let count: i64 = row.try_get(0)?;
    Ok(u64::try_from(count).unwrap_or(0))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::join::JoinKind;

    fn engine() -> QueryEngine {
        let source = Source::new("users", "u").with_relation(
            "profile",
            Relation::new("profiles", "profile_id", "id"),
        );
        QueryEngine::new(source)
    }

    #[test]
    fn build_applies_criteria_and_order() {
        let mut engine = engine();
        let query = engine
            .build_query(
                &Criteria::eq("status", "active"),
                &[("name".to_string(), SortDirection::Asc)],
            )
            .unwrap();
        let sql = query.build_select().unwrap();
        assert!(sql.contains("\"u\".\"status\" = 'active'"), "{sql}");
        assert!(sql.contains("ORDER BY \"u\".\"name\" ASC"), "{sql}");
    }

    #[test]
    fn declared_joins_apply_on_every_build() {
        let source = Source::new("users", "u")
            .with_relation("profile", Relation::new("profiles", "profile_id", "id"))
            .with_join(JoinDeclaration::new(JoinKind::Left, "profile", "p"));
        let mut engine = QueryEngine::new(source);
        let query = engine.build_query(&Criteria::none(), &[]).unwrap();
        let sql = query.build_select().unwrap();
        assert!(sql.contains("LEFT JOIN \"profiles\" AS \"p\""), "{sql}");
    }

    #[test]
    fn persistent_filters_apply_in_queue_order() {
        let mut base = engine();
        base.register_filter(
            "tenant",
            Arc::new(|query: &mut SelectQuery, value: &CriteriaValue| -> anyhow::Result<()> {
                let bound = value.to_sea_value().unwrap();
                let name = query.bind("tenant", bound);
                let field = query.root_field("tenant_id")?.sql();
                query.and_where(format!("{field} = :{name}"));
                Ok(())
            }),
        );
        let mut scoped = base.with_filter("tenant", 7_i64);
        let sql = scoped
            .build_query(&Criteria::none(), &[])
            .unwrap()
            .build_select()
            .unwrap();
        assert!(sql.contains("\"u\".\"tenant_id\" = 7"), "{sql}");

        // The original engine stays unscoped.
        let sql = base
            .build_query(&Criteria::none(), &[])
            .unwrap()
            .build_select()
            .unwrap();
        assert!(!sql.contains("tenant_id"), "{sql}");
    }

    #[test]
    fn unknown_persistent_filter_is_an_error() {
        let mut scoped = engine().with_filter("tenant", 7_i64);
        let err = scoped.build_query(&Criteria::none(), &[]).unwrap_err();
        assert!(matches!(err, QueryError::UnknownFilter { name } if name == "tenant"));
    }

    #[test]
    fn one_shot_callbacks_drain_after_build() {
        let mut engine = engine();
        engine.add_filter_fn(|query| {
            query.and_where("1 = 1");
            Ok(())
        });
        let sql = engine
            .build_query(&Criteria::none(), &[])
            .unwrap()
            .build_select()
            .unwrap();
        assert!(sql.contains("1 = 1"), "{sql}");

        let sql = engine
            .build_query(&Criteria::none(), &[])
            .unwrap()
            .build_select()
            .unwrap();
        assert!(!sql.contains("1 = 1"), "{sql}");
    }

    #[test]
    fn one_shot_callbacks_drain_even_when_build_fails() {
        let mut engine = engine();
        engine.add_filter_fn(|query| {
            query.and_where("1 = 1");
            Ok(())
        });
        let err = engine
            .build_query(&Criteria::eq("missing.path", "x"), &[])
            .unwrap_err();
        assert!(matches!(err, QueryError::UnresolvedJoinPath { .. }));

        let sql = engine
            .build_query(&Criteria::none(), &[])
            .unwrap()
            .build_select()
            .unwrap();
        assert!(!sql.contains("1 = 1"), "{sql}");
    }

    #[test]
    fn cloned_engine_drops_one_shot_queue() {
        let mut engine = engine();
        engine.add_filter_fn(|query| {
            query.and_where("1 = 1");
            Ok(())
        });
        let mut copy = engine.clone();
        let sql = copy
            .build_query(&Criteria::none(), &[])
            .unwrap()
            .build_select()
            .unwrap();
        assert!(!sql.contains("1 = 1"), "{sql}");
    }

    fn lazy_pool() -> PgPool {
        sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap()
    }

    #[tokio::test]
    async fn fetch_surfaces_parse_errors_before_touching_the_pool() {
        let mut engine = engine();
        let err = engine
            .fetch::<serde_json::Value>(&lazy_pool(), &Criteria::eq("missing.path", "x"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::UnresolvedJoinPath { .. }));
    }

    #[tokio::test]
    async fn update_where_rejects_joined_fields_before_touching_the_pool() {
        let mut engine = engine();
        let err = engine
            .update_where(
                &lazy_pool(),
                &Criteria::eq("profile.bio", "x"),
                &[("status".to_string(), "archived".into())],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidCriterion { .. }));
    }

    #[test]
    fn bulk_condition_qualifies_by_table_name() {
        let engine = engine();
        let (sql, values) = engine
            .bulk_condition(&Criteria::eq("status", "active"))
            .unwrap()
            .unwrap();
        assert_eq!(sql, "\"users\".\"status\" = ?");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn bulk_condition_rejects_joined_fields() {
        let engine = engine();
        let err = engine
            .bulk_condition(&Criteria::eq("profile.bio", "x"))
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidCriterion { .. }));
    }
}
