//! Concurrency primitives used by the reconciler.
//!
//! - [`single_flight`] collapses concurrent calls for the same key into one execution whose
//!   result, or failure, is shared by every caller. The value-producing [`SingleFlight`] and the
//!   completion-only [`SingleFlightAction`] keep separate key spaces.
//! - [`fan_out`] runs per-item work over a collection with a ceiling on simultaneously active
//!   items, enforced by a counting semaphore whose permits are released on every exit path.
//!
//! Both primitives spawn their work on the ambient tokio runtime. Cancellation is cooperative
//! and threaded through [`tokio_util::sync::CancellationToken`]s.
//!
//! [`SingleFlight`]: single_flight::SingleFlight
//! [`SingleFlightAction`]: single_flight::SingleFlightAction

pub mod fan_out;
pub mod single_flight;
