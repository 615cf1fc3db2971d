//! Relation maps, join declarations, and idempotent join application.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};
use crate::query::is_safe_identifier;

/// SQL join kinds supported by the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
}

impl JoinKind {
    pub(crate) const fn to_sea(self) -> sea_query::JoinType {
        match self {
            Self::Inner => sea_query::JoinType::InnerJoin,
            Self::Left => sea_query::JoinType::LeftJoin,
        }
    }
}

/// A relation reachable from a query root (or from another relation).
///
/// `local_field` lives on the parent side, `foreign_field` on the joined
/// table. Nested `relations` let dotted paths traverse more than one hop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    /// Target table to join.
    pub table: String,

    /// Join kind used when this relation is inferred from a field path.
    #[serde(default)]
    pub kind: JoinKind,

    /// Field on the parent used in the ON condition.
    pub local_field: String,

    /// Field on the joined table used in the ON condition.
    pub foreign_field: String,

    /// Relations reachable from this one.
    #[serde(default)]
    pub relations: HashMap<String, Relation>,
}

impl Relation {
    pub fn new(
        table: impl Into<String>,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            kind: JoinKind::default(),
            local_field: local_field.into(),
            foreign_field: foreign_field.into(),
            relations: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn left(mut self) -> Self {
        self.kind = JoinKind::Left;
        self
    }

    #[must_use]
    pub fn with_relation(mut self, name: impl Into<String>, relation: Relation) -> Self {
        self.relations.insert(name.into(), relation);
        self
    }
}

/// An explicitly configured join: kind, relation path, and alias.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinDeclaration {
    #[serde(default)]
    pub kind: JoinKind,
    pub path: String,
    pub alias: String,
}

impl JoinDeclaration {
    pub fn new(kind: JoinKind, path: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            alias: alias.into(),
        }
    }
}

/// A join already applied to a query.
#[derive(Debug, Clone)]
pub struct AppliedJoin {
    pub kind: JoinKind,
    pub table: String,
    pub alias: String,
    pub parent_alias: String,
    pub local_field: String,
    pub foreign_field: String,
}

/// Applies joins to a query exactly once per alias.
///
/// Used both for explicitly declared joins and for joins inferred by the
/// criteria parser from dotted field paths. A repeated relation path
/// reuses the existing alias instead of duplicating the join.
#[derive(Debug, Clone)]
pub struct JoinManager {
    relations: HashMap<String, Relation>,
    /// Relation path -> alias, for reuse.
    aliases: HashMap<String, String>,
    applied: Vec<AppliedJoin>,
    root_alias: String,
}

impl JoinManager {
    pub(crate) fn new(relations: HashMap<String, Relation>, root_alias: &str) -> Self {
        Self {
            relations,
            aliases: HashMap::new(),
            applied: Vec::new(),
            root_alias: root_alias.to_string(),
        }
    }

    /// Joins applied so far, in application order.
    #[must_use]
    pub fn applied(&self) -> &[AppliedJoin] {
        &self.applied
    }

    /// Whether an alias is already taken (including the root alias).
    #[must_use]
    pub fn has_alias(&self, alias: &str) -> bool {
        alias == self.root_alias || self.applied.iter().any(|j| j.alias == alias)
    }

    /// The alias a relation path resolved to, if it was joined.
    #[must_use]
    pub fn alias_for(&self, path: &str) -> Option<&str> {
        self.aliases.get(path).map(String::as_str)
    }

    /// Resolve a dotted relation path, joining each not-yet-joined segment,
    /// and return the terminal alias.
    pub fn ensure_path(&mut self, path: &str) -> QueryResult<String> {
        self.ensure_path_with(path, None, None).map(|(alias, _)| alias)
    }

    /// Apply explicitly declared joins. Re-declaring an already-applied
    /// alias is a no-op.
    pub fn apply_declared(&mut self, declarations: &[JoinDeclaration]) -> QueryResult<()> {
        for decl in declarations {
            self.ensure_path_with(&decl.path, Some(decl.kind), Some(&decl.alias))?;
        }
        Ok(())
    }

    /// Like [`ensure_path`](Self::ensure_path), with kind and alias
    /// overrides for the terminal segment. Returns the terminal alias and
    /// the terminal relation's foreign field.
    pub(crate) fn ensure_path_with(
        &mut self,
        path: &str,
        kind_override: Option<JoinKind>,
        alias_override: Option<&str>,
    ) -> QueryResult<(String, String)> {
        if path.is_empty() {
            return Err(QueryError::UnresolvedJoinPath {
                path: path.to_string(),
                segment: path.to_string(),
            });
        }

        // Resolve the relation chain first; joins are only applied once the
        // whole path is known to be valid.
        let mut chain: Vec<(String, Relation)> = Vec::new();
        {
            let mut current = &self.relations;
            for segment in path.split('.') {
                let relation = current.get(segment).ok_or_else(|| {
                    QueryError::UnresolvedJoinPath {
                        path: path.to_string(),
                        segment: segment.to_string(),
                    }
                })?;
                chain.push((segment.to_string(), relation.clone()));
                current = &relation.relations;
            }
        }

        let last = chain.len() - 1;
        let mut parent = self.root_alias.clone();
        let mut walked = String::new();
        let mut terminal_foreign = String::new();

        for (i, (segment, relation)) in chain.into_iter().enumerate() {
            if walked.is_empty() {
                walked = segment.clone();
            } else {
                walked = format!("{walked}.{segment}");
            }
            terminal_foreign = relation.foreign_field.clone();

            if let Some(existing) = self.aliases.get(&walked) {
                parent = existing.clone();
                continue;
            }

            let alias = match (i == last, alias_override) {
                (true, Some(alias)) => alias.to_string(),
                _ => self.pick_alias(&segment),
            };
            if !is_safe_identifier(&alias) {
                return Err(QueryError::UnsafeIdentifier { name: alias });
            }
            if !is_safe_identifier(&relation.table) {
                return Err(QueryError::UnsafeIdentifier {
                    name: relation.table,
                });
            }

            // Keyed by target alias: a second request for an occupied alias
            // is a no-op rather than a duplicate join.
            if !self.has_alias(&alias) {
                let mut kind = relation.kind;
                if i == last
                    && let Some(k) = kind_override
                {
                    kind = k;
                }
                self.applied.push(AppliedJoin {
                    kind,
                    table: relation.table,
                    alias: alias.clone(),
                    parent_alias: parent.clone(),
                    local_field: relation.local_field,
                    foreign_field: relation.foreign_field,
                });
            }
            self.aliases.insert(walked.clone(), alias.clone());
            parent = alias;
        }

        Ok((parent, terminal_foreign))
    }

    fn pick_alias(&self, segment: &str) -> String {
        if !self.has_alias(segment) {
            return segment.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{segment}_{n}");
            if !self.has_alias(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}
