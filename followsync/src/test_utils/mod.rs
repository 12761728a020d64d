//! Test doubles and fixtures for exercising the reconciler.
//!
//! - [`remote`] wraps a [`crate::remote::RemoteSource`] to inject faults or hold calls open.
//! - [`fixtures`] builds reconcilers and seeds in-memory collaborators.
//! - `failpoints` configures `fail` scenarios, available with the `failpoints` feature.

#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod fixtures;
pub mod remote;
