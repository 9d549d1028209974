//! Client-side cache of loaded data sets, keyed by scope.

use grid_protocol::{DataSet, ScopeKey};

/// Outcome of storing a data set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    /// An entry with the same scope was wholesale replaced.
    Replaced,
}

/// Insertion-ordered data sets, at most one per [`ScopeKey`].
#[derive(Debug, Clone, Default)]
pub struct DataSetCache {
    sets: Vec<DataSet>,
}

impl DataSetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `set`, replacing any entry with the same scope. No field-level merge.
    pub fn upsert(&mut self, set: DataSet) -> Upsert {
        let scope = set.scope();
        match self.sets.iter().position(|s| s.scope() == scope) {
            Some(index) => {
                self.sets[index] = set;
                Upsert::Replaced
            }
            None => {
                self.sets.push(set);
                Upsert::Inserted
            }
        }
    }

    pub fn get(&self, scope: &ScopeKey) -> Option<&DataSet> {
        self.sets.iter().find(|s| &s.scope() == scope)
    }

    pub fn get_mut(&mut self, scope: &ScopeKey) -> Option<&mut DataSet> {
        self.sets.iter_mut().find(|s| &s.scope() == scope)
    }

    /// First cached set of `grid_id`, whatever its row or filter scope.
    pub fn find_grid(&self, grid_id: &str) -> Option<&DataSet> {
        self.sets.iter().find(|s| s.scope().grid_id == grid_id)
    }

    pub fn remove(&mut self, scope: &ScopeKey) -> Option<DataSet> {
        let index = self.sets.iter().position(|s| &s.scope() == scope)?;
        Some(self.sets.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataSet> {
        self.sets.iter()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn clear(&mut self) {
        self.sets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::data_set;
    use grid_protocol::Filter;

    #[test]
    fn same_scope_is_replaced_wholesale() {
        let mut cache = DataSetCache::new();
        assert_eq!(cache.upsert(data_set("g1", None, 2)), Upsert::Inserted);
        assert_eq!(cache.upsert(data_set("g1", None, 5)), Upsert::Replaced);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&ScopeKey::grid("g1")).unwrap().rows.len(), 5);
    }

    #[test]
    fn row_and_filter_scopes_are_distinct() {
        let mut cache = DataSetCache::new();
        cache.upsert(data_set("g1", None, 1));
        cache.upsert(data_set("g1", Some("r1"), 1));
        let mut filtered = data_set("g1", None, 1);
        filtered.filter = Some(Filter {
            column_name: "relationship1".to_string(),
            ..Default::default()
        });
        cache.upsert(filtered);
        assert_eq!(cache.len(), 3);
        assert!(cache.get(&ScopeKey::row("g1", "r1")).is_some());
        assert_eq!(cache.find_grid("g1").unwrap().scope(), ScopeKey::grid("g1"));
    }

    #[test]
    fn remove_and_clear() {
        let mut cache = DataSetCache::new();
        cache.upsert(data_set("g1", None, 1));
        cache.upsert(data_set("g2", None, 1));
        assert!(cache.remove(&ScopeKey::grid("g1")).is_some());
        assert!(cache.remove(&ScopeKey::grid("g1")).is_none());
        cache.clear();
        assert!(cache.is_empty());
    }
}
