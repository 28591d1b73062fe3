//! Query handles.
//!
//! A `Query` addresses zero or more locations in the state tree. Handles are
//! memoized per store by canonical key: building the same query twice
//! yields the same handle, and `==` compares that identity.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::engine::Engine;
use crate::error::Result;
use crate::path::{Op, Path, Predicate, Projection};
use crate::store::Store;

/// Memoized node behind every handle with the same key.
pub(crate) struct QueryNode {
    path: Arc<Path>,
    /// Queries built directly on top of this one, in creation order.
    children: Mutex<Vec<Arc<Path>>>,
}

impl QueryNode {
    pub fn new(path: Arc<Path>) -> Self {
        Self {
            path,
            children: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Arc<Path> {
        &self.path
    }

    pub fn adopt(&self, child: Arc<Path>) {
        self.children.lock().push(child);
    }

    pub fn children(&self) -> Vec<Arc<Path>> {
        self.children.lock().clone()
    }
}

/// Handle to a query on a store.
///
/// Reads go through the store's value cache; writes go to the live tree, or
/// to the transaction's buffer when the handle belongs to a transaction
/// store.
#[derive(Clone)]
pub struct Query {
    engine: Arc<Engine>,
    node: Arc<QueryNode>,
}

impl Query {
    pub(crate) fn new(engine: Arc<Engine>, node: Arc<QueryNode>) -> Self {
        Self { engine, node }
    }

    pub fn key(&self) -> &str {
        self.node.path().key()
    }

    pub fn path(&self) -> &Arc<Path> {
        self.node.path()
    }

    /// Store this handle belongs to.
    pub fn store(&self) -> Store {
        Store::from_engine(Arc::clone(&self.engine))
    }

    fn extend(&self, op: Op) -> Query {
        let node = self.engine.extend(&self.node, op);
        Query::new(Arc::clone(&self.engine), node)
    }

    // --- Navigation ---

    /// Property access. Numeric keys index into lists.
    pub fn get(&self, key: impl Into<String>) -> Query {
        self.extend(Op::Property(key.into()))
    }

    /// List index access.
    pub fn at(&self, index: usize) -> Query {
        self.extend(Op::Property(index.to_string()))
    }

    /// Every element of the focused lists.
    pub fn values(&self) -> Query {
        self.extend(Op::Traverse)
    }

    /// Focused values for which `predicate` holds.
    ///
    /// `name` identifies the predicate: two filters with the same name and
    /// dependencies are the same query, and the first predicate registered
    /// under that key is the one used. While any dependency is absent the
    /// filter yields nothing and the predicate is not called.
    pub fn filter<F>(&self, name: &str, dependencies: &[Query], predicate: F) -> Query
    where
        F: Fn(&Value, &[Value]) -> bool + Send + Sync + 'static,
    {
        let predicate: Predicate = Arc::new(predicate);
        self.extend(Op::filter(name, predicate, paths_of(dependencies)))
    }

    /// Read-only projection of every focused value. See [`Query::filter`]
    /// for how `name` and `dependencies` are used.
    pub fn map<F>(&self, name: &str, dependencies: &[Query], projection: F) -> Query
    where
        F: Fn(&Value, &[Value]) -> Value + Send + Sync + 'static,
    {
        let projection: Projection = Arc::new(projection);
        self.extend(Op::transform(name, projection, paths_of(dependencies)))
    }

    /// Handles built directly on top of this one.
    pub fn children(&self) -> Vec<Query> {
        self.node
            .children()
            .into_iter()
            .map(|path| Query::new(Arc::clone(&self.engine), self.engine.node(path).0))
            .collect()
    }

    // --- Reads ---

    /// First focused value, `None` when nothing is focused.
    pub fn read(&self) -> Option<Value> {
        self.engine.read_first(self.path())
    }

    pub fn read_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.read() {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Every focused value.
    pub fn all(&self) -> Vec<Value> {
        self.engine.read_all(self.path())
    }

    pub fn or_default(&self, fallback: impl Into<Value>) -> Value {
        self.read().unwrap_or_else(|| fallback.into())
    }

    pub fn iter(&self) -> std::vec::IntoIter<Value> {
        self.all().into_iter()
    }

    pub fn exists(&self) -> bool {
        self.read().is_some()
    }

    // --- Writes ---

    /// Write `value` to every focused slot. Returns whether anything changed.
    pub fn write(&self, value: impl Into<Value>) -> bool {
        let value = value.into();
        self.engine
            .write(self.path(), Arc::new(move |_| value.clone()))
    }

    /// Replace every focused slot with `updater(current)`.
    ///
    /// The updater runs while the state tree is locked for writing and must
    /// not access the store.
    pub fn update<F>(&self, updater: F) -> bool
    where
        F: Fn(Option<&Value>) -> Value + Send + Sync + 'static,
    {
        self.engine.write(self.path(), Arc::new(updater))
    }

    /// `self.get(key).write(value)`.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> bool {
        self.get(key).write(value)
    }

    /// Delete every focused value from its container. Returns false when
    /// the query cannot be removed through, e.g. it contains a `map`.
    pub fn remove(&self) -> bool {
        self.engine.remove(self.path())
    }

    /// `self.get(key).remove()`.
    pub fn delete(&self, key: impl Into<String>) -> bool {
        self.get(key).remove()
    }
}

fn paths_of(queries: &[Query]) -> Vec<Arc<Path>> {
    queries.iter().map(|q| Arc::clone(q.path())).collect()
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

impl Eq for Query {}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query").field("key", &self.key()).finish()
    }
}

impl<'a> IntoIterator for &'a Query {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_handles_are_memoized() {
        let store = Store::new(json!({}));
        let a = store.state().get("a").get("b");
        let b = store.state().get("a").get("b");
        assert_eq!(a, b);
        assert_ne!(a, store.state().get("a"));
        assert_eq!(a.key(), "a.b");
        assert_eq!(store.state().at(3).key(), "3");
    }

    #[test]
    fn test_children_lists_extensions() {
        let store = Store::new(json!({}));
        let root = store.state();
        let a = root.get("a");
        let b = root.get("b");
        root.get("a");

        let children = root.children();
        assert_eq!(children, vec![a, b]);
    }

    #[test]
    fn test_literal_property_names_do_not_alias_other_queries() {
        let store = Store::new(json!({"$values": "lit", "a.b": 1, "a": {"b": 2}}));
        let root = store.state();

        let literal = root.get("$values");
        assert_ne!(literal, root.values());
        assert_eq!(literal.read(), Some(json!("lit")));

        let dotted = root.get("a.b");
        let nested = root.get("a").get("b");
        assert_ne!(dotted, nested);
        assert_eq!(dotted.read(), Some(json!(1)));
        assert_eq!(nested.read(), Some(json!(2)));

        assert!(dotted.write(3));
        assert_eq!(nested.read(), Some(json!(2)));
    }

    #[test]
    fn test_typed_reads() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct User {
            id: u32,
            name: String,
        }

        let store = Store::new(json!({"user": {"id": 7, "name": "ada"}, "n": "x"}));
        let user: Option<User> = store.state().get("user").read_as().unwrap();
        assert_eq!(
            user,
            Some(User {
                id: 7,
                name: "ada".into()
            })
        );
        assert!(store.state().get("missing").read_as::<User>().unwrap().is_none());
        assert!(store.state().get("n").read_as::<u32>().is_err());
    }

    #[test]
    fn test_iteration_and_fallback() {
        let store = Store::new(json!({"xs": [1, 2, 3]}));
        let xs = store.state().get("xs").values();
        let total: i64 = (&xs).into_iter().filter_map(|v| v.as_i64()).sum();
        assert_eq!(total, 6);
        assert_eq!(store.state().get("nope").or_default(5), json!(5));
        assert!(!store.state().get("nope").exists());
    }
}
