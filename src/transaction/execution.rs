//! A single run of a service's effect.

use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::StoreError;
use crate::store::Store;
use crate::subscriptions::Service;
use crate::types::{TransactionId, TransactionState};

use super::context::{Cancellation, Context};
use super::scheduler;

/// Isolated, buffered execution of an effect.
///
/// The effect runs against a transaction store layered over the live store.
/// Its writes are buffered in that store's overlay; when the effect returns
/// `Ok` the buffer is replayed onto the live store and the services affected
/// by the replayed keys are dispatched in turn. Errors and cancellation
/// discard the buffer.
pub struct Transaction {
    id: TransactionId,
    service: Arc<Service>,
    parent: Arc<Engine>,
    store: Store,
    state: Mutex<TransactionState>,
    cancellation: Cancellation,
    /// Dependency values captured when the run was triggered.
    dependencies: Vec<Option<Value>>,
}

impl Transaction {
    pub(crate) fn new(parent: &Arc<Engine>, service: Arc<Service>) -> Arc<Self> {
        let dependencies = service
            .dependencies()
            .iter()
            .map(|dependency| parent.read_first(dependency))
            .collect();
        Arc::new(Self {
            id: parent.next_transaction_id(),
            service,
            parent: Arc::clone(parent),
            store: Store::from_engine(Engine::layered(parent)),
            state: Mutex::new(TransactionState::Pending),
            cancellation: Cancellation::new(),
            dependencies,
        })
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// The transaction's own store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Signal the effect to stop. Its buffered writes will not be replayed.
    pub(crate) fn cancel(&self) {
        if !self.state().is_ended() && !self.is_cancelled() {
            debug!(transaction = %self.id, service = self.service.key(), "cancelling transaction");
            self.cancellation.cancel();
        }
    }

    fn transition(&self, next: TransactionState) {
        let previous = std::mem::replace(&mut *self.state.lock(), next);
        debug!(transaction = %self.id, from = ?previous, to = ?next, "transaction state");
    }

    /// Spawn the effect on the current runtime.
    pub(crate) fn start(self: &Arc<Self>) {
        let transaction = Arc::clone(self);
        match scheduler::spawn(async move { transaction.execute().await }) {
            Some(handle) => self.parent.track(handle),
            None => {
                self.transition(TransactionState::Aborted);
                self.service.record_outcome(TransactionState::Aborted);
                scheduler::finished(&self.parent, &self.service, self);
            }
        }
    }

    async fn execute(self: Arc<Self>) {
        self.transition(TransactionState::Running);
        self.service.record_start();

        let context = Context::new(
            self.store.clone(),
            self.cancellation.signal(),
            self.id,
            self.dependencies.clone(),
        );
        let result = AssertUnwindSafe((self.service.effect())(context))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(StoreError::effect(panic_message(&*panic))));

        // A superseded run never commits, whatever the effect returned.
        let result = result.and_then(|()| {
            if self.is_cancelled() {
                Err(StoreError::Cancelled)
            } else {
                Ok(())
            }
        });

        let outcome = match result {
            Ok(()) => self.commit(),
            Err(StoreError::Cancelled) => {
                self.transition(TransactionState::Aborted);
                TransactionState::Aborted
            }
            Err(e) => {
                warn!(
                    transaction = %self.id,
                    service = self.service.key(),
                    error = %e,
                    "effect failed, discarding buffered writes"
                );
                self.transition(TransactionState::RolledBack);
                TransactionState::RolledBack
            }
        };

        self.service.record_outcome(outcome);
        scheduler::finished(&self.parent, &self.service, &self);
    }

    fn commit(&self) -> TransactionState {
        self.transition(TransactionState::Replaying);
        let log = self.store.engine().take_overlay();
        match self.parent.replay(&log) {
            Ok(changed) => {
                debug!(
                    transaction = %self.id,
                    mutations = log.len(),
                    changed = changed.len(),
                    "transaction committed"
                );
                self.transition(TransactionState::Committed);
                self.parent.notify(&changed);
                TransactionState::Committed
            }
            Err(e) => {
                warn!(transaction = %self.id, service = self.service.key(), error = %e, "replay failed");
                self.transition(TransactionState::RolledBack);
                TransactionState::RolledBack
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("effect panicked: {}", detail)
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("service", &self.service.key())
            .field("state", &self.state())
            .finish()
    }
}
