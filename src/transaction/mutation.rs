//! Buffered writes of a transaction.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::error::{Result, StoreError};
use crate::path::{evaluate, Bindings, Path, Updater};

/// A write intercepted inside a transaction.
#[derive(Clone)]
pub enum Mutation {
    Set { path: Arc<Path>, updater: Updater },
    Remove { path: Arc<Path> },
}

/// What applying a mutation did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Applied {
    pub resolved: bool,
    pub changed: bool,
}

impl Mutation {
    pub fn path(&self) -> &Arc<Path> {
        match self {
            Mutation::Set { path, .. } | Mutation::Remove { path } => path,
        }
    }

    /// Apply against `roots`, resolving dependencies against the same roots.
    pub(crate) fn apply(&self, roots: &mut [Value]) -> Applied {
        let path = self.path();
        let bindings = {
            let roots: &[Value] = roots;
            Bindings::resolve(path, |dep| evaluate(dep, roots).into_iter().next())
        };
        match self {
            Mutation::Set { updater, .. } => {
                let outcome = path.set(roots, &bindings, updater.as_ref());
                Applied {
                    resolved: outcome.resolved,
                    changed: outcome.updated,
                }
            }
            Mutation::Remove { .. } => {
                let outcome = path.remove(roots, &bindings);
                Applied {
                    resolved: outcome.resolved,
                    changed: outcome.removed > 0,
                }
            }
        }
    }
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::Set { path, .. } => write!(f, "Set({})", path.key()),
            Mutation::Remove { path } => write!(f, "Remove({})", path.key()),
        }
    }
}

/// Ordered log of the mutations buffered by one transaction.
#[derive(Clone, Debug, Default)]
pub struct MutationLog {
    entries: Vec<Mutation>,
}

impl MutationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `mutation`, folding it into the previous entry when both
    /// target the same key.
    pub fn record(&mut self, mutation: Mutation) {
        if let Some(last) = self.entries.last_mut() {
            if last.path().key() == mutation.path().key() {
                *last = match (&*last, mutation) {
                    (Mutation::Set { path, updater: earlier }, Mutation::Set { updater: later, .. }) => {
                        let earlier = Arc::clone(earlier);
                        Mutation::Set {
                            path: Arc::clone(path),
                            updater: Arc::new(move |current| later(Some(&earlier(current)))),
                        }
                    }
                    (_, superseding) => superseding,
                };
                return;
            }
        }
        self.entries.push(mutation);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutation> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply every mutation in order. Fails at the first mutation that
    /// cannot be carried through; earlier ones stay applied.
    ///
    /// Returns the paths that changed, without duplicates.
    pub fn replay(&self, roots: &mut [Value]) -> Result<Vec<Arc<Path>>> {
        let mut changed: Vec<Arc<Path>> = Vec::new();
        for mutation in &self.entries {
            let applied = mutation.apply(roots);
            if !applied.resolved {
                return Err(StoreError::ReplayFailed {
                    key: mutation.path().key().to_string(),
                });
            }
            if applied.changed && !changed.iter().any(|p| p.key() == mutation.path().key()) {
                changed.push(Arc::clone(mutation.path()));
            }
        }
        Ok(changed)
    }

    /// Apply every mutation, skipping the ones that no longer resolve.
    pub(crate) fn overlay(&self, roots: &mut [Value]) {
        for mutation in &self.entries {
            if !mutation.apply(roots).resolved {
                trace!(key = mutation.path().key(), "overlay entry no longer applies");
            }
        }
    }
}
