//! Dependency graph between queries.

use std::collections::{BTreeSet, HashMap};

use crate::path::Path;

/// Which queries a query depends on, and the inverse.
///
/// Entries are added when a query is created and never removed: the graph
/// records possible influence, not whether the data still exists.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    dependencies: HashMap<String, BTreeSet<String>>,
    dependents: HashMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `path`, inheriting the dependencies of its parent and of every
    /// explicit dependency of its last op.
    ///
    /// Parents and explicit dependencies are always registered first, since a
    /// query can only be built from existing queries.
    pub fn register(&mut self, path: &Path) {
        let key = path.key().to_string();
        if self.dependencies.contains_key(&key) {
            return;
        }

        let search = path
            .parent_key()
            .into_iter()
            .chain(path.dependencies().iter().map(|d| d.key().to_string()));

        let mut dependencies = BTreeSet::new();
        for direct in search {
            if let Some(inherited) = self.dependencies.get(&direct) {
                dependencies.extend(inherited.iter().cloned());
            }
            dependencies.insert(direct);
        }

        self.dependents.entry(key.clone()).or_default();
        for dependency in &dependencies {
            self.dependents
                .entry(dependency.clone())
                .or_default()
                .insert(key.clone());
        }
        self.dependencies.insert(key, dependencies);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.dependencies.contains_key(key)
    }

    pub fn dependencies_of(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.dependencies.get(key)
    }

    pub fn dependents_of(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.dependents.get(key)
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}
