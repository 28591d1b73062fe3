//! Services and listeners reacting to committed changes.
//!
//! A change to a key notifies every subscriber of that key and of every
//! query that depends on it:
//! - services run their effect inside a transaction, scheduled by their
//!   resolution policy, and only when all their dependencies are present;
//! - listeners are called synchronously with the current dependency values;
//! - watches are listeners that push `ChangeEvent`s into a bounded channel.

mod manager;
mod service;
mod types;

pub(crate) use manager::{Notifications, SubscriptionManager};
pub use service::{Effect, Service, ServiceStats};
pub(crate) use types::Listener;
pub use types::{ChangeEvent, ListenerFn, Watch};
