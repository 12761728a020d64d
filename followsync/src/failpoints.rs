use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};

pub const RECONCILE_BEFORE_PUSH_ADDITIONS: &str = "reconcile.before_push_additions";
pub const RECONCILE_BEFORE_PUSH_DELETIONS: &str = "reconcile.before_push_deletions";
pub const RECONCILE_BEFORE_PULL: &str = "reconcile.before_pull";

/// Returns an error when the fail point `name` is configured with `return`.
///
/// The optional parameter selects the error kind: `remote_failure` (the default) or
/// `injected`.
pub fn sync_fail_point(name: &str) -> SyncResult<()> {
    fail_point!(name, |parameter| {
        let mut error_kind = ErrorKind::RemoteFailure;
        if let Some(parameter) = parameter {
            error_kind = match parameter.as_str() {
                "injected" => ErrorKind::FailpointInjected,
                _ => ErrorKind::RemoteFailure,
            }
        }

        bail!(
            error_kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
