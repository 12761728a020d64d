//! Core data model of the followed-shows list.

use std::fmt;

use chrono::{DateTime, Utc};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub const fn into_inner(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// Local identity of a [`FollowedEntry`], assigned by the entry store on first insert.
    EntryId
);

id_type!(
    /// Local identity of a tracked subject, e.g. a show.
    ItemId
);

id_type!(
    /// Identity of the authoritative remote list.
    ListId
);

/// Mutation a locally tracked entry still owes the remote system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PendingAction {
    /// In sync with the remote list.
    #[default]
    None,
    /// Followed locally, not yet pushed.
    Upload,
    /// Unfollowed locally, removal not yet confirmed remotely.
    Delete,
}

impl PendingAction {
    pub fn is_pending(&self) -> bool {
        !matches!(self, PendingAction::None)
    }
}

impl fmt::Display for PendingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingAction::None => f.write_str("none"),
            PendingAction::Upload => f.write_str("upload"),
            PendingAction::Delete => f.write_str("delete"),
        }
    }
}

/// One locally tracked followed item.
///
/// At most one entry per `item_id` is active at a time. An entry with
/// [`PendingAction::Delete`] is logically removed but kept until the remote removal is confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowedEntry {
    /// `None` until the entry store assigned an identity.
    pub id: Option<EntryId>,
    pub item_id: ItemId,
    /// Time of the first local follow, preserved across re-uploads.
    pub followed_at: DateTime<Utc>,
    pub pending_action: PendingAction,
}

impl FollowedEntry {
    /// Creates a new, not yet stored entry waiting to be uploaded.
    pub fn new_upload(item_id: ItemId, followed_at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            item_id,
            followed_at,
            pending_action: PendingAction::Upload,
        }
    }

    /// Returns a copy of the entry with a different pending action.
    pub fn with_pending_action(mut self, pending_action: PendingAction) -> Self {
        self.pending_action = pending_action;
        self
    }

    /// Returns `true` when the entry is still considered followed by the user.
    pub fn is_active(&self) -> bool {
        self.pending_action != PendingAction::Delete
    }
}

/// Remote description of a tracked subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject {
    /// Identity of the subject in the remote system.
    pub remote_id: u64,
    pub title: String,
}

impl Subject {
    pub fn new(remote_id: u64, title: impl Into<String>) -> Self {
        Self {
            remote_id,
            title: title.into(),
        }
    }
}

/// Remote description of a list membership, paired with its [`Subject`] on pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub followed_at: DateTime<Utc>,
}

/// Authentication status of the caller, polled once per reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    Authenticated,
    /// Local-only mode, pending mutations are settled without the remote system.
    #[default]
    Unauthenticated,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated)
    }
}

/// Key of a last-request record used for staleness checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKey {
    /// The followed-shows list as a whole.
    FollowedShows,
    /// A single subject's metadata and images.
    Subject(ItemId),
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKey::FollowedShows => f.write_str("followed_shows"),
            RequestKey::Subject(item_id) => write!(f, "subject_{item_id}"),
        }
    }
}

/// Kind of work deduplicated by the single-flight coordinators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    FollowedShowsSync,
    ListIdentity,
    SubjectMetadata,
    SubjectImages,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::FollowedShowsSync => "followed_shows_sync",
            ResourceKind::ListIdentity => "list_identity",
            ResourceKind::SubjectMetadata => "subject_metadata",
            ResourceKind::SubjectImages => "subject_images",
        }
    }
}

/// Tagged key identifying one deduplicated operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlightKey {
    pub kind: ResourceKind,
    pub id: u64,
}

impl FlightKey {
    pub const fn new(kind: ResourceKind, id: u64) -> Self {
        Self { kind, id }
    }

    pub const fn followed_shows_sync() -> Self {
        Self::new(ResourceKind::FollowedShowsSync, 0)
    }

    pub const fn list_identity() -> Self {
        Self::new(ResourceKind::ListIdentity, 0)
    }

    pub const fn subject_metadata(item_id: ItemId) -> Self {
        Self::new(ResourceKind::SubjectMetadata, item_id.0)
    }

    pub const fn subject_images(item_id: ItemId) -> Self {
        Self::new(ResourceKind::SubjectImages, item_id.0)
    }
}

impl fmt::Display for FlightKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.kind.as_str(), self.id)
    }
}

/// Outcome of one reconciliation pass, shared with every caller that joined it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub authenticated: bool,
    pub list_id: Option<ListId>,
    /// Entries whose upload was confirmed or settled locally.
    pub uploaded: usize,
    /// Entries purged after their removal was confirmed or settled locally.
    pub deleted: usize,
    /// Size of the pulled remote list, `None` when the pull was skipped.
    pub pulled: Option<usize>,
    /// Pulled subjects for which at least one metadata or image refresh was started.
    pub refreshes_started: usize,
    /// Pulled subjects whose refresh failed or was cancelled.
    pub refresh_failures: usize,
}
