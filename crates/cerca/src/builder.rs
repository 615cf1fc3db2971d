//! Fluent query interface over a [`QueryEngine`].
//!
//! Collects criteria, ordering, windowing, macros, and existence checks
//! through chained calls, then builds once and runs a terminal method.
//! Criteria added through separate calls are AND-combined.

use sqlx::PgPool;

use crate::criteria::Criteria;
use crate::engine::{self, QueryEngine};
use crate::error::{QueryError, QueryResult};
use crate::page::{self, Page};
use crate::query::{OrderBy, SelectQuery, SortDirection};
use crate::value::CriteriaValue;

/// One fluent query in progress. Obtained from [`QueryEngine::query`].
pub struct QueryBuilder<'e> {
    engine: &'e mut QueryEngine,
    criteria: Vec<Criteria>,
    order: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    macros: Vec<String>,
    /// Relation paths to require present (`true`) or absent (`false`).
    existence: Vec<(String, bool)>,
    random: bool,
}

impl<'e> QueryBuilder<'e> {
    pub(crate) fn new(engine: &'e mut QueryEngine) -> Self {
        Self {
            engine,
            criteria: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            macros: Vec::new(),
            existence: Vec::new(),
            random: false,
        }
    }

    /// Add a criterion with an explicit operator.
    #[must_use]
    pub fn filter(
        mut self,
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<CriteriaValue>,
    ) -> Self {
        self.criteria.push(Criteria::cmp(field, operator, value));
        self
    }

    /// Add an equality criterion.
    #[must_use]
    pub fn filter_eq(
        self,
        field: impl Into<String>,
        value: impl Into<CriteriaValue>,
    ) -> Self {
        self.filter(field, "eq", value)
    }

    /// Add a full criteria tree.
    #[must_use]
    pub fn criteria(mut self, criteria: Criteria) -> Self {
        self.criteria.push(criteria);
        self
    }

    /// Add an OR group of criteria.
    #[must_use]
    pub fn any(mut self, children: Vec<Criteria>) -> Self {
        self.criteria.push(Criteria::any(children));
        self
    }

    /// Add a negated criteria tree.
    #[must_use]
    pub fn exclude(mut self, criteria: Criteria) -> Self {
        self.criteria.push(Criteria::not(criteria));
        self
    }

    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Apply a macro registered on the engine at build time.
    #[must_use]
    pub fn with_macro(mut self, name: impl Into<String>) -> Self {
        self.macros.push(name.into());
        self
    }

    /// Keep only rows that have at least one related row on `path`.
    #[must_use]
    pub fn exists(mut self, path: impl Into<String>) -> Self {
        self.existence.push((path.into(), true));
        self
    }

    /// Keep only rows that have no related row on `path`.
    #[must_use]
    pub fn not_exists(mut self, path: impl Into<String>) -> Self {
        self.existence.push((path.into(), false));
        self
    }

    /// Return results in random order.
    #[must_use]
    pub fn random(mut self) -> Self {
        self.random = true;
        self
    }

    fn collected_criteria(&self) -> Criteria {
        Criteria::all(self.criteria.clone())
    }

    /// Build the final [`SelectQuery`] without running it.
    pub fn build(self) -> QueryResult<SelectQuery> {
        let Self {
            engine,
            criteria,
            order,
            limit,
            offset,
            macros,
            existence,
            random,
        } = self;

        let tree = Criteria::all(criteria);
        let order: Vec<(String, SortDirection)> = order
            .into_iter()
            .map(|o| (o.field, o.direction))
            .collect();
        let mut query = engine.build_query(&tree, &order)?;

        for (path, wanted) in &existence {
            if *wanted {
                query.ensure_exists(path)?;
            } else {
                query.ensure_not_exists(path)?;
            }
        }
        for name in &macros {
            let body = engine
                .macro_fn(name)
                .ok_or_else(|| QueryError::UnknownMacro { name: name.clone() })?;
            body(&mut query).map_err(QueryError::Callback)?;
        }
        if random {
            query.order_by_random();
        }
        if let Some(limit) = limit {
            query.set_limit(limit);
        }
        if let Some(offset) = offset {
            query.set_offset(offset);
        }
        Ok(query)
    }

    /// Fetch all matching rows.
    pub async fn fetch<T>(self, pool: &PgPool) -> QueryResult<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let query = self.build()?;
        engine::fetch_json(pool, &query.build_select()?).await
    }

    /// Fetch exactly one matching row.
    pub async fn fetch_one<T>(self, pool: &PgPool) -> QueryResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let repr = self.collected_criteria().repr();
        let mut query = self.build()?;
        query.set_limit(2);
        let mut rows: Vec<T> = engine::fetch_json(pool, &query.build_select()?).await?;
        match rows.len() {
            0 => Err(QueryError::NotFound { criteria: repr }),
            1 => Ok(rows.swap_remove(0)),
            _ => {
                let count = engine::fetch_count(pool, &query.build_count()?).await?;
                Err(QueryError::MultipleFound {
                    criteria: repr,
                    count,
                })
            }
        }
    }

    /// Fetch the first matching row, or `None`.
    pub async fn fetch_optional<T>(self, pool: &PgPool) -> QueryResult<Option<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut query = self.build()?;
        query.set_limit(1);
        let mut rows: Vec<T> = engine::fetch_json(pool, &query.build_select()?).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    /// Count matching rows, distinct on the root id.
    pub async fn count(self, pool: &PgPool) -> QueryResult<u64> {
        let query = self.build()?;
        engine::fetch_count(pool, &query.build_count()?).await
    }

    /// Fetch one page of results plus pagination numbers. `page` is
    /// 1-based; `per_page` is clamped to [`page::MAX_PER_PAGE`].
    pub async fn paginate<T>(
        self,
        pool: &PgPool,
        page: u64,
        per_page: u64,
    ) -> QueryResult<Page<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let page = page.max(1);
        let per_page = page::cap_per_page(per_page);
        let mut query = self.build()?;

        let total = engine::fetch_count(pool, &query.build_count()?).await?;
        if total == 0 {
            return Ok(Page::empty(page, per_page));
        }

        query.set_limit(per_page);
        query.set_offset(page::page_offset(page, per_page));
        let items = engine::fetch_json(pool, &query.build_select()?).await?;
        Ok(Page::new(items, total, page, per_page))
    }

    /// Fetch up to `limit` matching rows in random order.
    pub async fn fetch_random<T>(self, pool: &PgPool, limit: u64) -> QueryResult<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        self.random().limit(limit).fetch(pool).await
    }
}
