//! Listener and watch types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::path::Path;
use crate::store::Store;
use crate::types::ListenerId;

/// Callback registered with `Store::on`. Receives the current value of each
/// dependency, `None` where a dependency is absent.
pub type ListenerFn = Arc<dyn Fn(&[Option<Value>]) + Send + Sync>;

/// Synchronous callback fired after every committed change to one of its
/// dependencies. Unlike services, listeners are not gated on readiness.
pub(crate) struct Listener {
    pub id: ListenerId,
    pub dependencies: Vec<Arc<Path>>,
    pub visitor: ListenerFn,
}

impl Listener {
    pub fn call(&self, values: &[Option<Value>]) {
        (self.visitor)(values)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// A change delivered through a `Watch`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Keys of the watched queries, in registration order.
    pub keys: Vec<String>,
    /// Value of each watched query after the change.
    pub values: Vec<Option<Value>>,
}

impl ChangeEvent {
    /// Value of the watched query with `key`.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.keys
            .iter()
            .position(|k| k == key)
            .and_then(|i| self.values.get(i))
            .and_then(Option::as_ref)
    }
}

/// Channel-backed listener.
///
/// Events are buffered up to `StoreConfig::watch_buffer_size`; when the
/// buffer is full new events are dropped. The listener is removed when the
/// watch is dropped.
pub struct Watch {
    pub id: ListenerId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<ChangeEvent>,
    pub(crate) store: Store,
}

impl Watch {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<ChangeEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<ChangeEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<ChangeEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything buffered so far.
    pub fn drain(&self) -> Vec<ChangeEvent> {
        self.receiver.try_iter().collect()
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.store.off(self.id);
    }
}

impl fmt::Debug for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch")
            .field("id", &self.id)
            .field("pending", &self.receiver.len())
            .finish()
    }
}
