//! # zstate
//!
//! An in-process reactive state store. A tree of JSON state is addressed
//! through memoized queries; writes through a query invalidate cached reads
//! and re-run the services that depend on the written data.
//!
//! ## Core Concepts
//!
//! - **Queries**: Memoized handles built by navigation (`get`, `at`), list
//!   flattening (`values`), filtering (`filter`) and projection (`map`)
//! - **Dependencies**: Every query knows which other queries can change its
//!   result; writes notify the subscribers of the whole dependent set
//! - **Services**: Async effects that re-run inside a transaction when their
//!   dependencies change, scheduled by a resolution policy
//!   (`latest`, `earliest`, `debounce`)
//! - **Transactions**: Effects write to an isolated layer over the live
//!   state; the buffered writes are replayed on success and discarded on
//!   failure or cancellation
//!
//! ## Example
//!
//! ```ignore
//! use serde_json::json;
//! use zstate::Store;
//!
//! let store = Store::new(json!({"users": [{"id": 1}, {"id": 2}]}));
//! let users = store.state().get("users").values();
//! let big = users.filter("id>1", &[], |user, _| user["id"].as_i64() > Some(1));
//!
//! assert_eq!(big.all(), vec![json!({"id": 2})]);
//!
//! // Re-run whenever the selected user changes.
//! store.service("audit", &[big.clone()], |ctx| async move {
//!     let seen = ctx.dependencies();
//!     ctx.state().set("audited", seen[0].clone().unwrap_or_default());
//!     Ok(())
//! })?;
//!
//! big.remove();
//! store.drain().await;
//! ```

pub mod engine;
pub mod error;
pub mod path;
pub mod query;
pub mod store;
pub mod subscriptions;
pub mod transaction;
pub mod types;

// Re-exports
pub use error::{Result, StoreError};
pub use path::{evaluate, Op, Path};
pub use query::Query;
pub use store::{Store, StoreConfig};
pub use subscriptions::{ChangeEvent, Service, ServiceStats, Watch};
pub use transaction::{Context, Mutation, MutationLog, Transaction};
pub use types::{CacheStats, ListenerId, Resolve, StoreStats, TransactionId, TransactionState};
