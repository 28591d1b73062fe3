//! Execution context handed to effects.

use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{Result, StoreError};
use crate::query::Query;
use crate::store::Store;
use crate::types::TransactionId;

/// Owner side of a transaction's cancellation flag.
pub(crate) struct Cancellation {
    sender: watch::Sender<bool>,
}

impl Cancellation {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Observer side of a cancellation flag.
#[derive(Clone)]
pub(crate) struct CancelSignal {
    receiver: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the transaction is cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        let closed = receiver.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            // The owning transaction is gone without cancelling.
            std::future::pending::<()>().await;
        }
    }
}

/// What an effect sees while it runs.
///
/// All reads and writes go through `store()`, the transaction's isolated
/// store; writes are buffered and only reach the live store when the effect
/// returns `Ok` and the transaction commits. Cancellation is cooperative:
/// await through [`Context::wait`] (or poll [`Context::check`]) to observe it.
#[derive(Clone)]
pub struct Context {
    store: Store,
    cancel: CancelSignal,
    transaction: TransactionId,
    dependencies: Vec<Option<Value>>,
}

impl Context {
    pub(crate) fn new(
        store: Store,
        cancel: CancelSignal,
        transaction: TransactionId,
        dependencies: Vec<Option<Value>>,
    ) -> Self {
        Self {
            store,
            cancel,
            transaction,
            dependencies,
        }
    }

    /// The transaction's store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Root handle of the transaction's store.
    pub fn state(&self) -> Query {
        self.store.state()
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction
    }

    /// Values of the service's dependencies at the change that started this
    /// transaction. Later changes start a new transaction instead.
    pub fn dependencies(&self) -> &[Option<Value>] {
        &self.dependencies
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// `Err(StoreError::Cancelled)` once the transaction has been superseded.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(StoreError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Await `future` unless the transaction is cancelled first.
    pub async fn wait<F>(&self, future: F) -> Result<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StoreError::Cancelled),
            output = future => Ok(output),
        }
    }

    /// Cancellable sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.wait(tokio::time::sleep(duration)).await
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("transaction", &self.transaction)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
