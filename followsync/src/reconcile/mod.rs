//! Outbox-style reconciliation of the followed-shows list.
//!
//! Local mutations only flip the [`crate::types::PendingAction`] marker of an entry. A
//! reconciliation pass later flushes pending additions and deletions to the remote list, pulls
//! the authoritative membership back and refreshes the data of the pulled subjects.

mod reconciler;

pub use reconciler::FollowedShowsReconciler;
