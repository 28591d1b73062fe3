//! Services: effects bound to a set of dependency queries.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::task::AbortHandle;

use crate::error::Result;
use crate::path::Path;
use crate::transaction::{Context, Transaction};
use crate::types::{Resolve, TransactionState};

/// Asynchronous effect run by a service inside a transaction.
pub type Effect = Arc<dyn Fn(Context) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Per-service run counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub started: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub aborted: u64,
    /// Terminal state of the most recent run.
    pub last: Option<TransactionState>,
}

/// Scheduling state owned by the resolution policy.
#[derive(Default)]
pub(crate) struct ServiceRuntime {
    /// Most recently started transaction.
    pub current: Option<Arc<Transaction>>,
    /// A change arrived while an `Earliest` run was in flight.
    pub rerun: bool,
    /// Pending debounce timer.
    pub timer: Option<AbortHandle>,
    /// Bumped whenever a debounce timer is armed; a timer only fires while
    /// it still matches.
    pub timer_epoch: u64,
}

/// An effect registered with `Store::service`.
///
/// Services are memoized by key: registering the same name with the same
/// dependencies returns the existing service.
pub struct Service {
    key: String,
    name: String,
    dependencies: Vec<Arc<Path>>,
    effect: Effect,
    resolve: Resolve,
    pub(crate) runtime: Mutex<ServiceRuntime>,
    stats: Mutex<ServiceStats>,
}

impl Service {
    pub(crate) fn new(
        name: &str,
        dependencies: Vec<Arc<Path>>,
        effect: Effect,
        resolve: Resolve,
    ) -> Self {
        Self {
            key: Self::key_of(name, &dependencies),
            name: name.to_string(),
            dependencies,
            effect,
            resolve,
            runtime: Mutex::new(ServiceRuntime::default()),
            stats: Mutex::new(ServiceStats::default()),
        }
    }

    /// `service([dep1,dep2], name)`
    pub fn key_of(name: &str, dependencies: &[Arc<Path>]) -> String {
        let deps: Vec<&str> = dependencies.iter().map(|d| d.key()).collect();
        format!("service([{}], {})", deps.join(","), name)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[Arc<Path>] {
        &self.dependencies
    }

    pub fn resolve(&self) -> Resolve {
        self.resolve
    }

    pub(crate) fn effect(&self) -> &Effect {
        &self.effect
    }

    /// Whether a run is currently in flight.
    pub fn is_running(&self) -> bool {
        self.runtime
            .lock()
            .current
            .as_ref()
            .map_or(false, |t| !t.state().is_ended())
    }

    /// Whether a debounced run is waiting for its quiescence window.
    pub fn is_pending(&self) -> bool {
        self.runtime.lock().timer.is_some()
    }

    pub fn stats(&self) -> ServiceStats {
        self.stats.lock().clone()
    }

    pub(crate) fn record_start(&self) {
        self.stats.lock().started += 1;
    }

    pub(crate) fn record_outcome(&self, state: TransactionState) {
        let mut stats = self.stats.lock();
        match state {
            TransactionState::Committed => stats.committed += 1,
            TransactionState::RolledBack => stats.rolled_back += 1,
            TransactionState::Aborted => stats.aborted += 1,
            _ => return,
        }
        stats.last = Some(state);
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("key", &self.key)
            .field("resolve", &self.resolve)
            .finish()
    }
}
