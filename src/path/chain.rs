//! Immutable chains of ops.
//!
//! Every query has a key formed by joining the keys of its ops with `.`.
//! Paths are interned by that key (see `PathInterner`) so two structurally
//! identical queries share one `Path`.

use std::fmt;
use std::sync::Arc;

use super::op::Op;

/// An ordered chain of ops plus cached metadata.
pub struct Path {
    ops: Vec<Op>,
    key: String,
    rank: u8,
    dynamic: bool,
}

impl Path {
    /// Build a path; the chain always starts at `Op::Root`.
    pub(crate) fn new(mut ops: Vec<Op>) -> Self {
        if !matches!(ops.first(), Some(Op::Root)) {
            ops.insert(0, Op::Root);
        }
        let key = Self::key_of(&ops);
        let rank = ops.iter().map(Op::rank).max().unwrap_or(0);
        let dynamic = ops.iter().any(|op| !op.is_static());
        Self {
            ops,
            key,
            rank,
            dynamic,
        }
    }

    /// Canonical key for a chain of ops. The root contributes nothing.
    pub fn key_of(ops: &[Op]) -> String {
        ops.iter()
            .map(Op::key)
            .filter(|k| !k.is_empty())
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Paths always contain at least the root.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn last(&self) -> &Op {
        // `new` guarantees a root op.
        &self.ops[self.ops.len() - 1]
    }

    pub fn prev(&self) -> Option<&Op> {
        self.ops.len().checked_sub(2).map(|i| &self.ops[i])
    }

    pub fn is_root(&self) -> bool {
        self.ops.len() == 1
    }

    /// Highest rank of any op.
    pub fn rank(&self) -> u8 {
        self.rank
    }

    pub fn is_static(&self) -> bool {
        !self.dynamic
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// False when a transform sits anywhere in the chain.
    pub fn is_writable(&self) -> bool {
        self.ops.iter().all(Op::is_writable)
    }

    /// Explicit dependencies declared by the last op.
    pub fn dependencies(&self) -> &[Arc<Path>] {
        self.last().dependencies()
    }

    /// Key of the path without its last op, if there is one.
    pub fn parent_key(&self) -> Option<String> {
        if self.is_root() {
            None
        } else {
            Some(Self::key_of(&self.ops[..self.ops.len() - 1]))
        }
    }

    /// True when every op after `index` is a static property step.
    pub(crate) fn static_after(&self, index: usize) -> bool {
        self.ops[index + 1..].iter().all(Op::is_static)
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Path")
            .field("key", &self.key)
            .field("rank", &self.rank)
            .field("dynamic", &self.dynamic)
            .finish()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}
