use std::future::Future;

use crate::error::SyncResult;
use crate::types::{ItemId, Subject};

/// Trait for the local registry of subjects referenced by followed entries.
///
/// The reconciler creates placeholders for subjects it learns about from the remote list and
/// asks the repository to fill in metadata and images later. Refresh operations for an unknown
/// [`ItemId`] fail with [`crate::error::ErrorKind::SubjectNotFound`].
pub trait SubjectRepository {
    /// Returns the local identity of `subject`, creating a placeholder when it is unknown.
    fn resolve_or_create_placeholder(
        &self,
        subject: Subject,
    ) -> impl Future<Output = SyncResult<ItemId>> + Send;

    /// Returns the subject stored under `item_id`.
    fn get_subject(
        &self,
        item_id: ItemId,
    ) -> impl Future<Output = SyncResult<Option<Subject>>> + Send;

    /// Returns `true` when the metadata of the subject was never fetched.
    fn needs_metadata_refresh(
        &self,
        item_id: ItemId,
    ) -> impl Future<Output = SyncResult<bool>> + Send;

    fn refresh_metadata(&self, item_id: ItemId) -> impl Future<Output = SyncResult<()>> + Send;

    /// Returns `true` when the images of the subject were never fetched.
    fn needs_image_refresh(&self, item_id: ItemId)
    -> impl Future<Output = SyncResult<bool>> + Send;

    fn refresh_images(&self, item_id: ItemId) -> impl Future<Output = SyncResult<()>> + Send;
}
