//! Keeps a locally mutable followed-shows list in sync with an authoritative remote list.
//!
//! The crate is built from three layers:
//!
//! - [`concurrency::single_flight`] collapses concurrent calls for the same logical operation
//!   into one shared execution.
//! - [`concurrency::fan_out`] runs per-item work over a collection under a concurrency ceiling.
//! - [`reconcile::FollowedShowsReconciler`] composes both into an outbox-style merge between
//!   local pending mutations and the remote list.
//!
//! Persistence, the remote API, the subject registry and authentication are collaborators
//! behind the traits in [`store`], [`remote`], [`subject`] and [`auth`]. In-memory
//! implementations of each are provided for tests and embedding applications.

pub mod auth;
pub mod concurrency;
pub mod error;
pub mod failpoints;
mod macros;
pub mod metrics;
pub mod reconcile;
pub mod remote;
pub mod store;
pub mod subject;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
