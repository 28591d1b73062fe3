//! Where an engine's root states come from.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;

use crate::transaction::{Mutation, MutationLog};

use super::reactor::Engine;

pub(crate) enum Source {
    /// The engine owns its roots.
    Live(RwLock<Vec<Value>>),
    /// A transaction store: the backing engine's roots with buffered
    /// mutations layered on top.
    Layered(Overlay),
}

/// Mutations buffered over a backing engine.
///
/// Reads see the backing roots with the log applied. The materialized view
/// is rebuilt whenever the backing engine moves to a new revision, so
/// writes committed elsewhere stay visible under the buffered ones.
pub(crate) struct Overlay {
    backing: Arc<Engine>,
    log: Mutex<MutationLog>,
    view: Mutex<Option<View>>,
}

struct View {
    revision: u64,
    roots: Arc<Vec<Value>>,
}

impl Overlay {
    pub fn new(backing: Arc<Engine>) -> Self {
        Self {
            backing,
            log: Mutex::new(MutationLog::new()),
            view: Mutex::new(None),
        }
    }

    pub fn backing(&self) -> &Arc<Engine> {
        &self.backing
    }

    pub fn revision(&self) -> u64 {
        self.backing.revision()
    }

    /// Backing roots with every buffered mutation applied.
    pub fn view(&self) -> Arc<Vec<Value>> {
        let revision = self.revision();
        let mut view = self.view.lock();
        if let Some(current) = view.as_ref() {
            if current.revision == revision {
                return Arc::clone(&current.roots);
            }
        }

        let mut roots = self.backing.with_roots(|roots| roots.to_vec());
        self.log.lock().overlay(&mut roots);
        let roots = Arc::new(roots);
        *view = Some(View {
            revision,
            roots: Arc::clone(&roots),
        });
        roots
    }

    /// Buffer `mutation`; `roots` is the view with it already applied.
    pub fn record(&self, mutation: Mutation, roots: Vec<Value>) {
        self.log.lock().record(mutation);
        *self.view.lock() = Some(View {
            revision: self.revision(),
            roots: Arc::new(roots),
        });
    }

    /// Hand over the buffered mutations, leaving the overlay empty.
    pub fn take(&self) -> MutationLog {
        let log = std::mem::take(&mut *self.log.lock());
        *self.view.lock() = None;
        log
    }

    pub fn len(&self) -> usize {
        self.log.lock().len()
    }
}
