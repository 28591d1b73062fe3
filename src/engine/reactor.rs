//! The engine behind a `Store`: roots, memoized queries, dependency graph,
//! value cache and notification dispatch.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Result, StoreError};
use crate::path::{Bindings, Op, Path, PathInterner, Updater};
use crate::query::QueryNode;
use crate::store::StoreConfig;
use crate::subscriptions::{Listener, ListenerFn, Notifications, Service, SubscriptionManager};
use crate::transaction::{scheduler, Mutation, MutationLog};
use crate::types::{ListenerId, StoreStats, TransactionId};

use super::backing::{Overlay, Source};
use super::cache::ValueCache;
use super::graph::DependencyGraph;

pub(crate) struct Engine {
    config: StoreConfig,
    interner: Arc<PathInterner>,
    source: Source,
    nodes: Mutex<HashMap<String, Arc<QueryNode>>>,
    graph: RwLock<DependencyGraph>,
    cache: Mutex<ValueCache>,
    subscriptions: SubscriptionManager,
    /// Bumped on every change to the live roots.
    revision: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    next_transaction: AtomicU64,
}

impl Engine {
    /// An engine owning `initial` as its single root.
    pub fn live(initial: Value, config: StoreConfig) -> Arc<Self> {
        Self::build(
            config,
            Arc::new(PathInterner::new()),
            Source::Live(RwLock::new(vec![initial])),
        )
    }

    /// An engine buffering its writes over `backing`.
    pub fn layered(backing: &Arc<Engine>) -> Arc<Self> {
        Self::build(
            backing.config.clone(),
            Arc::clone(&backing.interner),
            Source::Layered(Overlay::new(Arc::clone(backing))),
        )
    }

    fn build(config: StoreConfig, interner: Arc<PathInterner>, source: Source) -> Arc<Self> {
        let cache = ValueCache::new(config.cache_capacity);
        let engine = Arc::new(Self {
            config,
            interner,
            source,
            nodes: Mutex::new(HashMap::new()),
            graph: RwLock::new(DependencyGraph::new()),
            cache: Mutex::new(cache),
            subscriptions: SubscriptionManager::new(),
            revision: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
            next_transaction: AtomicU64::new(1),
        });
        engine.root();
        engine
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn is_transaction(&self) -> bool {
        matches!(self.source, Source::Layered(_))
    }

    /// Revision of the roots this engine reads from.
    pub fn revision(&self) -> u64 {
        match &self.source {
            Source::Live(_) => self.revision.load(Ordering::SeqCst),
            Source::Layered(overlay) => overlay.revision(),
        }
    }

    pub fn next_transaction_id(&self) -> TransactionId {
        TransactionId(self.next_transaction.fetch_add(1, Ordering::SeqCst))
    }

    pub fn with_roots<R>(&self, f: impl FnOnce(&[Value]) -> R) -> R {
        match &self.source {
            Source::Live(roots) => f(roots.read_recursive().as_slice()),
            Source::Layered(overlay) => f(overlay.view().as_slice()),
        }
    }

    // --- Query nodes ---

    pub fn root(&self) -> Arc<QueryNode> {
        self.node(self.interner.root()).0
    }

    /// The memoized node for `path`, creating and registering it on first
    /// use. The flag is true when the node was created by this call.
    pub fn node(&self, path: Arc<Path>) -> (Arc<QueryNode>, bool) {
        let mut nodes = self.nodes.lock();
        if let Some(node) = nodes.get(path.key()) {
            return (Arc::clone(node), false);
        }
        let node = Arc::new(QueryNode::new(Arc::clone(&path)));
        nodes.insert(path.key().to_string(), Arc::clone(&node));
        drop(nodes);

        self.graph.write().register(&path);
        self.cache.lock().clear();
        self.subscriptions.clear_cache();
        trace!(key = path.key(), "query created");
        (node, true)
    }

    /// `parent` followed by `op`.
    pub fn extend(&self, parent: &QueryNode, op: Op) -> Arc<QueryNode> {
        let path = self.interner.extend(parent.path(), op);
        let (node, created) = self.node(path);
        if created {
            parent.adopt(Arc::clone(node.path()));
        }
        node
    }

    /// Make sure `path`, its prefixes and their dependencies have nodes.
    pub fn ensure_registered(&self, path: &Path) {
        if self.nodes.lock().contains_key(path.key()) {
            return;
        }
        for len in 1..=path.len() {
            let prefix = self.interner.prefix(path, len);
            for dependency in prefix.last().dependencies() {
                self.ensure_registered(dependency);
            }
            let (node, created) = self.node(Arc::clone(&prefix));
            if created && len > 1 {
                let parent = self.interner.prefix(path, len - 1);
                if let Some(parent) = self.nodes.lock().get(parent.key()) {
                    parent.adopt(Arc::clone(node.path()));
                }
            }
        }
    }

    // --- Reads ---

    fn bindings(&self, path: &Path) -> Bindings {
        Bindings::resolve(path, |dependency| self.read_first(dependency))
    }

    /// Every value `path` focuses, served from the cache when possible.
    pub fn read_all(&self, path: &Path) -> Vec<Value> {
        let revision = self.revision();
        {
            let mut cache = self.cache.lock();
            cache.sync(revision);
            if let Some(values) = cache.get(path.key()) {
                trace!(key = path.key(), "cache hit");
                return values;
            }
        }
        trace!(key = path.key(), "cache miss");

        let bindings = self.bindings(path);
        let values = self.with_roots(|roots| path.get(roots, &bindings));
        self.cache.lock().put(path.key(), values.clone());
        values
    }

    pub fn read_first(&self, path: &Path) -> Option<Value> {
        self.read_all(path).into_iter().next()
    }

    /// Whether every dependency currently has a value.
    pub fn is_ready(&self, dependencies: &[Arc<Path>]) -> bool {
        dependencies.iter().all(|d| self.read_first(d).is_some())
    }

    /// First root state.
    pub fn snapshot(&self) -> Value {
        self.with_roots(|roots| roots.first().cloned().unwrap_or(Value::Null))
    }

    // --- Writes ---

    /// Apply `updater` to every slot `path` focuses. Returns whether
    /// anything changed.
    pub fn write(self: &Arc<Self>, path: &Arc<Path>, updater: Updater) -> bool {
        let bindings = self.bindings(path);
        match &self.source {
            Source::Live(roots) => {
                let outcome = {
                    let mut roots = roots.write();
                    path.set(roots.as_mut_slice(), &bindings, updater.as_ref())
                };
                if !outcome.updated {
                    trace!(key = path.key(), resolved = outcome.resolved, "write changed nothing");
                    return false;
                }
                debug!(key = path.key(), slots = outcome.states.len(), "state written");
                self.invalidate();
                self.notify(std::slice::from_ref(path));
                true
            }
            Source::Layered(overlay) => {
                let mut roots = overlay.view().to_vec();
                let outcome = path.set(&mut roots, &bindings, updater.as_ref());
                if !outcome.updated {
                    return false;
                }
                let mutation = Mutation::Set {
                    path: Arc::clone(path),
                    updater,
                };
                overlay.record(mutation, roots);
                self.cache.lock().clear();
                trace!(key = path.key(), buffered = overlay.len(), "write buffered");
                true
            }
        }
    }

    /// Delete every slot `path` focuses. Returns false when the removal
    /// cannot pass through the path.
    pub fn remove(self: &Arc<Self>, path: &Arc<Path>) -> bool {
        let bindings = self.bindings(path);
        match &self.source {
            Source::Live(roots) => {
                let outcome = {
                    let mut roots = roots.write();
                    path.remove(roots.as_mut_slice(), &bindings)
                };
                if outcome.removed > 0 {
                    debug!(key = path.key(), removed = outcome.removed, "state removed");
                    self.invalidate();
                    self.notify(std::slice::from_ref(path));
                }
                outcome.resolved
            }
            Source::Layered(overlay) => {
                let mut roots = overlay.view().to_vec();
                let outcome = path.remove(&mut roots, &bindings);
                if outcome.removed > 0 {
                    overlay.record(Mutation::Remove { path: Arc::clone(path) }, roots);
                    self.cache.lock().clear();
                    trace!(key = path.key(), buffered = overlay.len(), "removal buffered");
                }
                outcome.resolved
            }
        }
    }

    /// Drop every cached value and notification list.
    pub fn invalidate(&self) {
        if matches!(self.source, Source::Live(_)) {
            self.revision.fetch_add(1, Ordering::SeqCst);
        }
        self.cache.lock().clear();
        self.subscriptions.clear_cache();
    }

    /// Apply a transaction's buffered mutations onto the live roots.
    ///
    /// With `atomic_replay` the batch runs against a scratch copy that only
    /// replaces the roots once every mutation applied.
    pub fn replay(&self, log: &MutationLog) -> Result<Vec<Arc<Path>>> {
        let Source::Live(roots) = &self.source else {
            return Err(StoreError::InvalidOperation(
                "mutations can only be replayed onto a live store".to_string(),
            ));
        };
        for mutation in log.iter() {
            self.ensure_registered(mutation.path());
        }

        let result = {
            let mut roots = roots.write();
            if self.config.atomic_replay {
                let mut scratch = roots.clone();
                log.replay(&mut scratch).map(|changed| {
                    *roots = scratch;
                    changed
                })
            } else {
                log.replay(roots.as_mut_slice())
            }
        };
        if result.is_ok() || !self.config.atomic_replay {
            self.invalidate();
        }
        result
    }

    /// Drain the buffered mutations of a transaction engine.
    pub fn take_overlay(&self) -> MutationLog {
        match &self.source {
            Source::Layered(overlay) => overlay.take(),
            Source::Live(_) => MutationLog::new(),
        }
    }

    // --- Notification ---

    fn notifications(&self, key: &str) -> Arc<Notifications> {
        let dependents: Vec<String> = {
            let graph = self.graph.read();
            match graph.dependents_of(key) {
                Some(dependents) => dependents.iter().cloned().collect(),
                None => return Arc::new(Notifications::default()),
            }
        };
        self.subscriptions
            .notifications(key, &dependents, |service| self.is_ready(service.dependencies()))
    }

    /// Dispatch every service and listener affected by `changed`.
    ///
    /// Transaction engines never notify; their writes surface when the
    /// transaction commits.
    pub fn notify(self: &Arc<Self>, changed: &[Arc<Path>]) {
        if self.is_transaction() || changed.is_empty() {
            return;
        }

        let mut services: Vec<Arc<Service>> = Vec::new();
        let mut listeners: Vec<Arc<Listener>> = Vec::new();
        let mut seen_services = HashSet::new();
        let mut seen_listeners = HashSet::new();
        for path in changed {
            let found = self.notifications(path.key());
            for service in &found.services {
                if seen_services.insert(service.key().to_string()) {
                    services.push(Arc::clone(service));
                }
            }
            for listener in &found.listeners {
                if seen_listeners.insert(listener.id) {
                    listeners.push(Arc::clone(listener));
                }
            }
        }

        debug!(
            changed = changed.len(),
            services = services.len(),
            listeners = listeners.len(),
            "dispatching notifications"
        );
        for service in &services {
            scheduler::dispatch(self, service);
        }
        for listener in &listeners {
            let values: Vec<Option<Value>> = listener
                .dependencies
                .iter()
                .map(|d| self.read_first(d))
                .collect();
            listener.call(&values);
        }
    }

    // --- Subscriptions ---

    pub fn register_service(self: &Arc<Self>, service: Service) -> Result<Arc<Service>> {
        if self.is_transaction() {
            return Err(StoreError::InvalidOperation(
                "services cannot be registered on a transaction store".to_string(),
            ));
        }
        for dependency in service.dependencies() {
            self.ensure_registered(dependency);
        }

        let (service, created) = self.subscriptions.register_service(service);
        if created {
            debug!(service = service.key(), resolve = ?service.resolve(), "service registered");
            if self.is_ready(service.dependencies()) {
                scheduler::start(self, &service);
            }
        }
        Ok(service)
    }

    pub fn service(&self, key: &str) -> Option<Arc<Service>> {
        self.subscriptions.service(key)
    }

    pub fn add_listener(&self, dependencies: Vec<Arc<Path>>, visitor: ListenerFn) -> ListenerId {
        for dependency in &dependencies {
            self.ensure_registered(dependency);
        }
        self.subscriptions.add_listener(dependencies, visitor)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.subscriptions.remove_listener(id)
    }

    // --- Tasks ---

    pub fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Wait until every spawned transaction and debounce timer, including
    /// the ones started while waiting, has finished.
    pub async fn drain(&self) {
        loop {
            let pending = std::mem::take(&mut *self.tasks.lock());
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                match handle.await {
                    Err(e) if !e.is_cancelled() => warn!(error = %e, "transaction task failed"),
                    _ => {}
                }
            }
        }
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            queries: self.nodes.lock().len(),
            services: self.subscriptions.service_count(),
            listeners: self.subscriptions.listener_count(),
            running_transactions: self
                .subscriptions
                .services()
                .iter()
                .filter(|s| s.is_running())
                .count(),
            revision: self.revision(),
            cache: self.cache.lock().stats(),
        }
    }

    pub fn backing(&self) -> Option<&Arc<Engine>> {
        match &self.source {
            Source::Layered(overlay) => Some(overlay.backing()),
            Source::Live(_) => None,
        }
    }
}
