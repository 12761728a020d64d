//! Local persistence interfaces and their in-memory implementation.

pub mod both;
pub mod entry;
pub mod staleness;
