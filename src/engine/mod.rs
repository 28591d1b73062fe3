//! Query memoization, dependency tracking and value caching.
//!
//! Every query handle is backed by one node per canonical path key. Creating
//! a node records which other queries it depends on; a committed write to a
//! key invalidates the value cache and notifies the subscribers of the key
//! and of all its dependents.

mod backing;
mod cache;
mod graph;
mod reactor;

pub(crate) use reactor::Engine;
pub use graph::DependencyGraph;
