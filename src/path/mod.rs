//! Path algebra: chains of navigation and query steps.
//!
//! A `Path` is pure data. Evaluating it against a set of root states reads,
//! writes or deletes the focused values; it never caches and never notifies.

mod chain;
mod eval;
mod interner;
mod op;

pub use chain::Path;
pub use eval::{evaluate, Bindings, RemoveOutcome, SetOutcome};
pub use interner::PathInterner;
pub use op::{
    Op, Predicate, Projection, Updater, RANK_FILTER, RANK_STATIC, RANK_TRANSFORM, RANK_TRAVERSE,
};
