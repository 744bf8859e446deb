//! Subscription state and listeners.
//!
//! - [`listener`]: the [`SubscriptionListener`] trait and its closure-based
//!   implementation [`SubscriptionHandlers`]
//! - `registry`: the registry the connection engine keeps per connection

pub mod listener;
pub(crate) mod registry;

pub use listener::{SubscriptionHandlers, SubscriptionListener};
pub(crate) use registry::{Delivery, SubscriptionRegistry};
