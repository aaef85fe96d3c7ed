//! At-most-one lookup tables for left joins.
//!
//! Every right-hand table of a lag join is indexed here first. Indexing fails
//! with [`Error::JoinCardinality`] as soon as two rows share a key, so a left
//! row can never silently pick one of several matches.

use std::collections::BTreeMap;
use std::fmt::Debug;

use lp_core::{Error, Result};

/// Right-hand side of a many-to-one join.
#[derive(Debug, Clone)]
pub struct UniqueIndex<K, V> {
    table: String,
    map: BTreeMap<K, V>,
}

impl<K: Ord + Debug, V> UniqueIndex<K, V> {
    /// Index `(key, value)` pairs, failing on the first repeated key.
    pub fn build<I>(table: &str, items: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut map = BTreeMap::new();
        for (k, v) in items {
            if map.contains_key(&k) {
                return Err(Error::JoinCardinality { table: table.to_string(), key: format!("{:?}", k) });
            }
            map.insert(k, v);
        }
        Ok(Self { table: table.to_string(), map })
    }

    /// Matching row, if any.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    /// Table name used in diagnostics.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Number of indexed rows.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// `true` if nothing was indexed.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
