//! Resolution policies: when a notified service actually runs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::subscriptions::Service;
use crate::types::Resolve;

use super::execution::Transaction;

/// Spawn onto the ambient tokio runtime, if there is one.
pub(crate) fn spawn<F>(future: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => Some(handle.spawn(future)),
        Err(_) => {
            warn!("no tokio runtime available, effect not scheduled");
            None
        }
    }
}

/// React to a change in one of `service`'s dependencies.
pub(crate) fn dispatch(engine: &Arc<Engine>, service: &Arc<Service>) {
    match service.resolve() {
        Resolve::Latest => start(engine, service),
        Resolve::Earliest => {
            let mut runtime = service.runtime.lock();
            let busy = runtime
                .current
                .as_ref()
                .map_or(false, |t| !t.state().is_ended());
            if busy {
                debug!(service = service.key(), "run in flight, deferring");
                runtime.rerun = true;
                return;
            }
            drop(runtime);
            start(engine, service);
        }
        Resolve::Debounce { ms } => {
            let mut runtime = service.runtime.lock();
            if let Some(current) = &runtime.current {
                current.cancel();
            }
            if let Some(timer) = runtime.timer.take() {
                timer.abort();
            }

            runtime.timer_epoch += 1;
            let epoch = runtime.timer_epoch;
            let owner = Arc::clone(engine);
            let waiting = Arc::clone(service);
            let timer = spawn(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                elapsed(&owner, &waiting, epoch);
            });
            if let Some(timer) = timer {
                runtime.timer = Some(timer.abort_handle());
                engine.track(timer);
            }
            debug!(service = service.key(), ms, "debounce window restarted");
        }
    }
}

/// A debounce window armed at `epoch` ran out. Starts the service unless a
/// newer window replaced it meanwhile.
pub(crate) fn elapsed(engine: &Arc<Engine>, service: &Arc<Service>, epoch: u64) {
    {
        let mut runtime = service.runtime.lock();
        if runtime.timer_epoch != epoch {
            debug!(service = service.key(), epoch, "stale debounce timer");
            return;
        }
        runtime.timer = None;
    }
    if engine.is_ready(service.dependencies()) {
        start(engine, service);
    }
}

/// Start a fresh run, cancelling the previous one.
pub(crate) fn start(engine: &Arc<Engine>, service: &Arc<Service>) {
    let transaction = Transaction::new(engine, Arc::clone(service));
    let previous = service
        .runtime
        .lock()
        .current
        .replace(Arc::clone(&transaction));
    if let Some(previous) = previous {
        previous.cancel();
    }
    debug!(service = service.key(), transaction = %transaction.id(), "starting transaction");
    transaction.start();
}

/// Called by a transaction once it reached a terminal state.
pub(crate) fn finished(engine: &Arc<Engine>, service: &Arc<Service>, transaction: &Arc<Transaction>) {
    let rerun = {
        let mut runtime = service.runtime.lock();
        let is_current = runtime
            .current
            .as_ref()
            .map_or(false, |c| Arc::ptr_eq(c, transaction));
        if !is_current {
            return;
        }
        runtime.current = None;
        std::mem::take(&mut runtime.rerun)
    };

    if rerun && engine.is_ready(service.dependencies()) {
        debug!(service = service.key(), "re-running after deferred change");
        start(engine, service);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::path::Op;
    use crate::store::StoreConfig;
    use crate::subscriptions::Effect;
    use crate::transaction::Context;
    use futures::FutureExt;
    use serde_json::json;

    fn debounced(engine: &Arc<Engine>, ms: u64) -> Arc<Service> {
        let a = engine.extend(&engine.root(), Op::property("a"));
        let effect: Effect = Arc::new(|_ctx: Context| async { Ok::<(), StoreError>(()) }.boxed());
        Arc::new(Service::new(
            "debounced",
            vec![Arc::clone(a.path())],
            effect,
            Resolve::debounce(ms),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_does_not_start_or_clear() {
        let engine = Engine::live(json!({"a": 1}), StoreConfig::default());
        let service = debounced(&engine, 50);

        dispatch(&engine, &service);
        dispatch(&engine, &service);
        assert_eq!(service.runtime.lock().timer_epoch, 2);

        // The first window fires after it has been replaced.
        elapsed(&engine, &service, 1);
        assert!(service.runtime.lock().timer.is_some());
        assert_eq!(service.stats().started, 0);
        assert!(service.runtime.lock().current.is_none());

        engine.drain().await;
        assert!(service.runtime.lock().timer.is_none());
        assert_eq!(service.stats().started, 1);
        assert_eq!(service.stats().committed, 1);
    }
}
