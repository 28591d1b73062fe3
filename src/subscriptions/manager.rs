//! Subscription registry and notification lookup.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::path::Path;
use crate::types::ListenerId;

use super::service::Service;
use super::types::{Listener, ListenerFn};

/// Something to notify when a key changes.
#[derive(Clone)]
enum Subscriber {
    Service(Arc<Service>),
    Listener(Arc<Listener>),
}

/// Everything to notify for one changed key.
#[derive(Default)]
pub(crate) struct Notifications {
    /// Ready services, deduplicated by key.
    pub services: Vec<Arc<Service>>,
    /// Listeners, deduplicated by id. Not gated on readiness.
    pub listeners: Vec<Arc<Listener>>,
}

/// Registry of services and listeners, indexed by dependency key.
pub(crate) struct SubscriptionManager {
    services: RwLock<HashMap<String, Arc<Service>>>,
    listeners: RwLock<HashMap<ListenerId, Arc<Listener>>>,
    /// Subscribers per dependency key, in registration order.
    by_dependency: RwLock<HashMap<String, Vec<Subscriber>>>,
    /// Resolved notifications per changed key.
    cached: Mutex<HashMap<String, Arc<Notifications>>>,
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            by_dependency: RwLock::new(HashMap::new()),
            cached: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a service. Returns the existing service and `false` when
    /// one with the same key is already registered.
    pub fn register_service(&self, service: Service) -> (Arc<Service>, bool) {
        let mut services = self.services.write();
        if let Some(existing) = services.get(service.key()) {
            return (Arc::clone(existing), false);
        }

        let service = Arc::new(service);
        services.insert(service.key().to_string(), Arc::clone(&service));
        drop(services);

        self.index(
            service.dependencies(),
            Subscriber::Service(Arc::clone(&service)),
        );
        (service, true)
    }

    pub fn add_listener(&self, dependencies: Vec<Arc<Path>>, visitor: ListenerFn) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let listener = Arc::new(Listener {
            id,
            dependencies,
            visitor,
        });

        self.listeners.write().insert(id, Arc::clone(&listener));
        self.index(
            &listener.dependencies,
            Subscriber::Listener(Arc::clone(&listener)),
        );
        id
    }

    /// Unregister a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let Some(listener) = self.listeners.write().remove(&id) else {
            return false;
        };

        let mut index = self.by_dependency.write();
        for dependency in &listener.dependencies {
            if let Some(subscribers) = index.get_mut(dependency.key()) {
                subscribers.retain(|s| !matches!(s, Subscriber::Listener(l) if l.id == id));
            }
        }
        drop(index);

        self.clear_cache();
        true
    }

    fn index(&self, dependencies: &[Arc<Path>], subscriber: Subscriber) {
        let mut index = self.by_dependency.write();
        for dependency in dependencies {
            index
                .entry(dependency.key().to_string())
                .or_default()
                .push(subscriber.clone());
        }
        drop(index);
        self.clear_cache();
    }

    /// Subscribers of `key` and of each of its `dependents`.
    ///
    /// Services are kept only if `ready` accepts them. The result is cached
    /// per key until the next write or registration.
    pub fn notifications<F>(&self, key: &str, dependents: &[String], ready: F) -> Arc<Notifications>
    where
        F: Fn(&Service) -> bool,
    {
        if let Some(hit) = self.cached.lock().get(key) {
            return Arc::clone(hit);
        }

        let mut services = Vec::new();
        let mut listeners = Vec::new();
        let mut seen_services = HashSet::new();
        let mut seen_listeners = HashSet::new();
        {
            let index = self.by_dependency.read();
            let keys = std::iter::once(key).chain(dependents.iter().map(String::as_str));
            for subscriber in keys.filter_map(|k| index.get(k)).flatten() {
                match subscriber {
                    Subscriber::Service(service) => {
                        if seen_services.insert(service.key().to_string()) {
                            services.push(Arc::clone(service));
                        }
                    }
                    Subscriber::Listener(listener) => {
                        if seen_listeners.insert(listener.id) {
                            listeners.push(Arc::clone(listener));
                        }
                    }
                }
            }
        }

        // Readiness reads the store, so the index lock is released first.
        services.retain(|s| ready(s));

        let notifications = Arc::new(Notifications {
            services,
            listeners,
        });
        self.cached
            .lock()
            .insert(key.to_string(), Arc::clone(&notifications));
        notifications
    }

    pub fn clear_cache(&self) {
        self.cached.lock().clear();
    }

    pub fn service(&self, key: &str) -> Option<Arc<Service>> {
        self.services.read().get(key).cloned()
    }

    pub fn services(&self) -> Vec<Arc<Service>> {
        self.services.read().values().cloned().collect()
    }

    pub fn service_count(&self) -> usize {
        self.services.read().len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
