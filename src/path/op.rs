//! Path operations.
//!
//! An `Op` is one step of a query: accessing a property, lifting a list into
//! the result set, filtering or projecting it. Every op knows how to take
//! part in `get`, `set` and `remove`; `Transform` is read-only.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::chain::Path;

/// Predicate used by `Filter`. Receives the focused value and the current
/// values of the op's dependencies, in declaration order.
pub type Predicate = Arc<dyn Fn(&Value, &[Value]) -> bool + Send + Sync>;

/// Projection used by `Transform`.
pub type Projection = Arc<dyn Fn(&Value, &[Value]) -> Value + Send + Sync>;

/// Updater applied by the final step of a write. `None` means the slot is
/// currently absent.
pub type Updater = Arc<dyn Fn(Option<&Value>) -> Value + Send + Sync>;

/// Evaluation tier of an op.
pub const RANK_STATIC: u8 = 1;
pub const RANK_TRANSFORM: u8 = 2;
pub const RANK_FILTER: u8 = 3;
pub const RANK_TRAVERSE: u8 = 4;

/// A single step of a `Path`.
#[derive(Clone)]
pub enum Op {
    /// Identity step focusing the root states.
    Root,
    /// Focuses `state[key]`; numeric keys index into lists.
    Property(String),
    /// Read-only 1:1 projection.
    Transform {
        name: String,
        visitor: Projection,
        dependencies: Vec<Arc<Path>>,
    },
    /// Keeps focused values matching the predicate.
    Filter {
        name: String,
        visitor: Predicate,
        dependencies: Vec<Arc<Path>>,
    },
    /// Lifts every element of a focused list into the result set.
    Traverse,
}

impl Op {
    pub fn property(key: impl Into<String>) -> Self {
        Op::Property(key.into())
    }

    pub fn filter(name: impl Into<String>, visitor: Predicate, dependencies: Vec<Arc<Path>>) -> Self {
        Op::Filter {
            name: name.into(),
            visitor,
            dependencies,
        }
    }

    pub fn transform(
        name: impl Into<String>,
        visitor: Projection,
        dependencies: Vec<Arc<Path>>,
    ) -> Self {
        Op::Transform {
            name: name.into(),
            visitor,
            dependencies,
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Op::Root | Op::Property(_) => RANK_STATIC,
            Op::Transform { .. } => RANK_TRANSFORM,
            Op::Filter { .. } => RANK_FILTER,
            Op::Traverse => RANK_TRAVERSE,
        }
    }

    /// Only roots and properties can be evaluated without running user code.
    pub fn is_static(&self) -> bool {
        matches!(self, Op::Root | Op::Property(_))
    }

    /// Whether `set`/`remove` can pass through this op.
    pub fn is_writable(&self) -> bool {
        !matches!(self, Op::Transform { .. })
    }

    pub fn dependencies(&self) -> &[Arc<Path>] {
        match self {
            Op::Transform { dependencies, .. } | Op::Filter { dependencies, .. } => dependencies,
            _ => &[],
        }
    }

    /// Stable identity of this step, used to build path keys.
    pub fn key(&self) -> String {
        match self {
            Op::Root => String::new(),
            Op::Property(key) => property_key(key),
            Op::Transform {
                name, dependencies, ..
            } => format!("$map({}, [{}])", name, dependency_keys(dependencies)),
            Op::Filter {
                name, dependencies, ..
            } => format!("$filter({}, [{}])", name, dependency_keys(dependencies)),
            Op::Traverse => "$values".to_string(),
        }
    }
}

/// Property names that could be mistaken for another op, a path separator
/// or the root are quoted.
fn property_key(key: &str) -> String {
    let plain = !key.is_empty()
        && !key.contains('.')
        && !key.starts_with('$')
        && !key.starts_with('"');
    if plain {
        key.to_string()
    } else {
        format!("{:?}", key)
    }
}

fn dependency_keys(dependencies: &[Arc<Path>]) -> String {
    dependencies
        .iter()
        .map(|d| d.key())
        .collect::<Vec<_>>()
        .join(",")
}

impl fmt::Debug for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Root => write!(f, "Root"),
            Op::Property(key) => write!(f, "Property({})", key),
            Op::Traverse => write!(f, "Traverse"),
            other => write!(f, "{}", other.key()),
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
