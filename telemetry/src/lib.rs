//! Tracing setup shared by binaries and tests embedding the followed-shows sync core.

pub mod tracing;

pub use crate::tracing::{init_test_tracing, init_tracing};
