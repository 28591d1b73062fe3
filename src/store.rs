//! Main Store struct tying all components together.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use crate::engine::Engine;
use crate::error::Result;
use crate::query::Query;
use crate::subscriptions::{ChangeEvent, Effect, Service, Watch};
use crate::transaction::Context;
use crate::types::{ListenerId, Resolve, StoreStats};

/// Store configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of query results kept in the value cache.
    /// Default: 1024
    pub cache_capacity: usize,

    /// Policy used by `Store::service`.
    pub default_resolve: Resolve,

    /// Events buffered per `Watch` before new ones are dropped.
    /// Default: 1000
    pub watch_buffer_size: usize,

    /// Replay a committed transaction on a scratch copy and swap it in only
    /// if every mutation applied. When false, mutations applied before a
    /// failing one stay applied.
    pub atomic_replay: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1024,
            default_resolve: Resolve::Latest,
            watch_buffer_size: 1000,
            atomic_replay: true,
        }
    }
}

/// A reactive state store.
///
/// Provides a unified interface for:
/// - Building memoized queries over the state tree (`state()`)
/// - Registering services that re-run when their dependencies change
/// - Listening to committed changes, synchronously or through a channel
///
/// Cloning a `Store` yields another handle to the same state.
#[derive(Clone)]
pub struct Store {
    engine: Arc<Engine>,
}

impl Store {
    /// Create a store holding `initial`.
    pub fn new(initial: Value) -> Self {
        Self::with_config(initial, StoreConfig::default())
    }

    pub fn with_config(initial: Value, config: StoreConfig) -> Self {
        Self {
            engine: Engine::live(initial, config),
        }
    }

    pub(crate) fn from_engine(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub(crate) fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn config(&self) -> &StoreConfig {
        self.engine.config()
    }

    /// Root query handle.
    pub fn state(&self) -> Query {
        Query::new(Arc::clone(&self.engine), self.engine.root())
    }

    /// Copy of the current state tree.
    pub fn snapshot(&self) -> Value {
        self.engine.snapshot()
    }

    /// Whether this is a transaction's store.
    pub fn is_transaction(&self) -> bool {
        self.engine.is_transaction()
    }

    /// For a transaction store, the store it commits into.
    pub fn parent(&self) -> Option<Store> {
        self.engine.backing().map(|e| Store::from_engine(Arc::clone(e)))
    }

    // --- Services ---

    /// Register a service with the configured default policy.
    ///
    /// The effect runs in a fresh transaction each time one of
    /// `dependencies` changes, once all of them have a value. It also runs
    /// right away if they already do. Needs a tokio runtime to run effects.
    pub fn service<F, Fut>(&self, name: &str, dependencies: &[Query], effect: F) -> Result<Arc<Service>>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let resolve = self.config().default_resolve;
        self.service_with(name, dependencies, resolve, effect)
    }

    /// Register a service with an explicit resolution policy.
    ///
    /// Registering the same name with the same dependencies again returns
    /// the existing service, leaving its effect and policy unchanged.
    pub fn service_with<F, Fut>(
        &self,
        name: &str,
        dependencies: &[Query],
        resolve: Resolve,
        effect: F,
    ) -> Result<Arc<Service>>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let effect: Effect = Arc::new(move |context| effect(context).boxed());
        let dependencies = dependencies.iter().map(|q| Arc::clone(q.path())).collect();
        self.engine
            .register_service(Service::new(name, dependencies, effect, resolve))
    }

    /// Look up a registered service by key.
    pub fn find_service(&self, key: &str) -> Option<Arc<Service>> {
        self.engine.service(key)
    }

    // --- Listeners ---

    /// Call `visitor` with the dependency values after every committed
    /// change affecting any of them.
    pub fn on<F>(&self, dependencies: &[Query], visitor: F) -> ListenerId
    where
        F: Fn(&[Option<Value>]) + Send + Sync + 'static,
    {
        let dependencies = dependencies.iter().map(|q| Arc::clone(q.path())).collect();
        self.engine.add_listener(dependencies, Arc::new(visitor))
    }

    /// Unregister a listener. Returns false if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        self.engine.remove_listener(id)
    }

    /// Receive `ChangeEvent`s for `dependencies` through a bounded channel.
    pub fn watch(&self, dependencies: &[Query]) -> Watch {
        let (sender, receiver) = crossbeam_channel::bounded(self.config().watch_buffer_size);
        let keys: Vec<String> = dependencies.iter().map(|q| q.key().to_string()).collect();

        let id = self.on(dependencies, move |values| {
            let event = ChangeEvent {
                keys: keys.clone(),
                values: values.to_vec(),
            };
            match sender.try_send(event) {
                Ok(()) => {}
                Err(crossbeam_channel::TrySendError::Full(_)) => {
                    warn!(keys = ?keys, "watch buffer full, dropping change");
                }
                Err(crossbeam_channel::TrySendError::Disconnected(_)) => {}
            }
        });

        Watch {
            id,
            receiver,
            store: self.clone(),
        }
    }

    // --- Lifecycle ---

    /// Wait for every running transaction, and the ones they trigger, to
    /// finish.
    pub async fn drain(&self) {
        self.engine.drain().await
    }

    /// Drop every cached value. Reads recompute on next access.
    pub fn invalidate(&self) {
        self.engine.invalidate()
    }

    pub fn stats(&self) -> StoreStats {
        self.engine.stats()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("transaction", &self.is_transaction())
            .field("revision", &self.engine.revision())
            .finish()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(Value::Object(Default::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_defaults_and_serde() {
        let config = StoreConfig::default();
        assert_eq!(config.cache_capacity, 1024);
        assert_eq!(config.watch_buffer_size, 1000);
        assert!(config.atomic_replay);

        let parsed: StoreConfig =
            serde_json::from_value(json!({"default_resolve": {"debounce": {"ms": 20}}})).unwrap();
        assert_eq!(parsed.default_resolve, Resolve::debounce(20));
        assert_eq!(parsed.cache_capacity, 1024);
    }

    #[test]
    fn test_snapshot_tracks_writes() {
        let store = Store::new(json!({"a": 1}));
        assert!(store.state().set("b", 2));
        assert_eq!(store.snapshot(), json!({"a": 1, "b": 2}));
        assert!(!store.is_transaction());
        assert!(store.parent().is_none());
    }

    #[test]
    fn test_stats() {
        let store = Store::new(json!({"a": 1}));
        let a = store.state().get("a");
        a.read();
        a.read();

        let stats = store.stats();
        assert_eq!(stats.queries, 2);
        assert_eq!(stats.services, 0);
        assert_eq!(stats.cache.hits, 1);
        assert_eq!(stats.revision, 0);

        a.write(2);
        assert_eq!(store.stats().revision, 1);
    }

    #[test]
    fn test_listeners() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let store = Store::new(json!({"a": 1}));
        let a = store.state().get("a");
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let id = store.on(&[a.clone()], move |values| {
            assert_eq!(values.len(), 1);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        a.write(2);
        a.write(2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(store.off(id));
        a.write(3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
