//! Path interning.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::chain::Path;
use super::op::Op;

/// Interns paths by key so structurally identical queries share one `Path`.
///
/// A store and the transaction stores created from it share one interner.
/// Paths are never evicted.
#[derive(Default)]
pub struct PathInterner {
    paths: Mutex<HashMap<String, Arc<Path>>>,
}

impl PathInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the interned path for `ops`, creating it on first use.
    ///
    /// When a path with the same key already exists it is returned as is,
    /// so the visitors of the first registration win.
    pub fn of(&self, ops: Vec<Op>) -> Arc<Path> {
        let path = Path::new(ops);
        let mut paths = self.paths.lock();
        Arc::clone(
            paths
                .entry(path.key().to_string())
                .or_insert_with(|| Arc::new(path)),
        )
    }

    /// The root path.
    pub fn root(&self) -> Arc<Path> {
        self.of(vec![Op::Root])
    }

    /// `parent` followed by `op`.
    pub fn extend(&self, parent: &Path, op: Op) -> Arc<Path> {
        let mut ops = parent.ops().to_vec();
        ops.push(op);
        self.of(ops)
    }

    /// The first `len` ops of `path`.
    pub fn prefix(&self, path: &Path, len: usize) -> Arc<Path> {
        self.of(path.ops()[..len.min(path.len())].to_vec())
    }

    pub fn len(&self) -> usize {
        self.paths.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.lock().is_empty()
    }
}
