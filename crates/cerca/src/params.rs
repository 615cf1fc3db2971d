//! Named-parameter binding for generated conditions.

use sea_query::Value;

use crate::error::{QueryError, QueryResult};

/// Collision-free parameter table for one query build.
///
/// Names are derived from the field that produced the binding plus a
/// monotonically increasing counter, so two conditions on the same field
/// never collide within a build. Condition fragments reference bindings as
/// `:name`; [`ParamBinder::to_positional`] converts them to sea-query's
/// `?` markers just before rendering, leaving quoting and escaping to the
/// query builder.
#[derive(Debug, Default)]
pub struct ParamBinder {
    params: Vec<(String, Value)>,
    counter: usize,
}

impl ParamBinder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value under a generated name and return that name.
    pub fn bind(&mut self, stem: &str, value: Value) -> String {
        let stem = sanitize(stem);
        let name = loop {
            let candidate = format!("{}_{}", stem, self.counter);
            self.counter += 1;
            if !self.taken(&candidate) {
                break candidate;
            }
        };
        self.params.push((name.clone(), value));
        name
    }

    /// Bind two values under one counter slot, suffixed `_1`/`_2`.
    pub fn bind_pair(&mut self, stem: &str, first: Value, second: Value) -> (String, String) {
        let stem = sanitize(stem);
        let (a, b) = loop {
            let base = format!("{}_{}", stem, self.counter);
            self.counter += 1;
            let a = format!("{base}_1");
            let b = format!("{base}_2");
            if !self.taken(&a) && !self.taken(&b) {
                break (a, b);
            }
        };
        self.params.push((a.clone(), first));
        self.params.push((b.clone(), second));
        (a, b)
    }

    /// Generated names must stay unique even when a field name itself ends
    /// in a counter-like suffix, e.g. a column literally named `age_0`.
    fn taken(&self, name: &str) -> bool {
        self.params.iter().any(|(n, _)| n == name)
    }

    /// Bind a value under an explicit name, replacing any previous binding
    /// with the same name.
    pub fn insert(&mut self, name: &str, value: Value) {
        if let Some(slot) = self.params.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            self.params.push((name.to_string(), value));
        }
    }

    /// The bound name/value table, in binding order.
    #[must_use]
    pub fn entries(&self) -> &[(String, Value)] {
        &self.params
    }

    fn get(&self, name: &str) -> Option<&Value> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Convert a fragment with `:name` placeholders into `?` marker form
    /// plus the values in order of appearance.
    pub fn to_positional(&self, fragment: &str) -> QueryResult<(String, Vec<Value>)> {
        let mut sql = String::with_capacity(fragment.len());
        let mut values = Vec::new();
        let mut chars = fragment.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == ':'
                && matches!(chars.peek(), Some((_, n)) if n.is_ascii_alphanumeric() || *n == '_')
            {
                let start = i + 1;
                let mut end = start;
                while let Some((j, n)) = chars.peek().copied() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        end = j + n.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let name = &fragment[start..end];
                let value = self
                    .get(name)
                    .ok_or_else(|| QueryError::UnboundParameter {
                        name: name.to_string(),
                    })?;
                values.push(value.clone());
                sql.push('?');
            } else if c == '?' {
                // Literal question mark; sea-query treats `??` as escaped.
                sql.push_str("??");
            } else {
                sql.push(c);
            }
        }
        Ok((sql, values))
    }
}

fn sanitize(stem: &str) -> String {
    stem.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
