//! Transactions: isolated runs of service effects.
//!
//! A transaction is created per dispatch of a service. Its effect sees a
//! store layered over the live one; every write lands in that layer's
//! mutation log. Committing replays the log onto the live store and
//! dispatches the services affected by the replayed keys, each through its
//! own resolution policy.

mod context;
mod execution;
mod mutation;
pub(crate) mod scheduler;

pub use context::Context;
pub use execution::Transaction;
pub use mutation::{Mutation, MutationLog};
