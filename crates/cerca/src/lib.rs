//! Criteria-to-SQL query pipeline for Postgres.
//!
//! Callers describe what they want as [`Criteria`] trees (or JSON in the
//! equivalent shapes), and the pipeline translates them into parameterized
//! SQL: operators come from a pluggable [`OperatorRegistry`], dotted field
//! paths join related tables on demand through declared [`Relation`] maps,
//! and a [`QueryEngine`] per source runs fetches, counts, pagination, and
//! bulk mutations over sqlx.
//!
//! ```no_run
//! use cerca::{QueryEngine, Relation, SortDirection, Source};
//!
//! # async fn demo(pool: sqlx::PgPool) -> Result<(), cerca::QueryError> {
//! let source = Source::new("users", "u")
//!     .with_relation("profile", Relation::new("profiles", "profile_id", "id"));
//! let mut users = QueryEngine::new(source);
//!
//! let active: Vec<serde_json::Value> = users
//!     .query()
//!     .filter_eq("status", "active")
//!     .filter("profile.country", "in", vec!["IT", "FR"])
//!     .order_by("created", SortDirection::Desc)
//!     .limit(20)
//!     .fetch(&pool)
//!     .await?;
//! # let _ = active;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod criteria;
pub mod engine;
pub mod error;
pub mod join;
pub mod operator;
pub mod page;
pub mod params;
pub mod parser;
pub mod query;
pub mod value;

pub use builder::QueryBuilder;
pub use criteria::Criteria;
pub use engine::{PersistentFilter, QueryEngine, Source};
pub use error::{QueryError, QueryResult};
pub use join::{JoinDeclaration, JoinKind, Relation};
pub use operator::{Operator, OperatorRegistry};
pub use page::{Page, MAX_PER_PAGE};
pub use params::ParamBinder;
pub use parser::apply_criteria;
pub use query::{FieldRef, OrderBy, SelectQuery, SortDirection};
pub use value::CriteriaValue;
