//! Remote list abstractions.
//!
//! The [`RemoteSource`] trait is the boundary to the authoritative remote list. The wire format
//! and authentication of the remote API live behind it.

mod base;
pub mod memory;

pub use base::RemoteSource;
