use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use metrics::{counter, gauge};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::metrics::{
    ERROR_KIND_LABEL, FOLLOWSYNC_FAN_OUT_ACTIVE_ITEMS, FOLLOWSYNC_FAN_OUT_ITEM_FAILURES_TOTAL,
};
use crate::{bail, sync_error};

pub use config::shared::default_fan_out_concurrency;

/// What happened to a single item of a fan-out.
enum ItemOutcome<T> {
    /// The item never acquired a permit because the fan-out was halted or cancelled.
    NotStarted,
    Finished(SyncResult<T>),
}

/// Per-item results of [`parallel_for_each_outcomes`], in input order.
#[derive(Debug, Clone)]
pub struct ForEachReport {
    outcomes: Vec<SyncResult<()>>,
}

impl ForEachReport {
    pub fn outcomes(&self) -> &[SyncResult<()>] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Number of items that failed, including items cancelled before they ran.
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_err()).count()
    }

    /// Folds the outcomes into one result, aggregating every failure.
    pub fn into_result(self) -> SyncResult<()> {
        let errors: Vec<SyncError> = self
            .outcomes
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}

/// Decrements the active items gauge when an item stops holding its permit.
struct ActiveItemGuard;

impl ActiveItemGuard {
    fn acquire() -> Self {
        gauge!(FOLLOWSYNC_FAN_OUT_ACTIVE_ITEMS).increment(1.0);
        Self
    }
}

impl Drop for ActiveItemGuard {
    fn drop(&mut self) {
        gauge!(FOLLOWSYNC_FAN_OUT_ACTIVE_ITEMS).decrement(1.0);
    }
}

/// Runs `operation` for every item with at most `concurrency` invocations active, returning the
/// values in input order.
///
/// Fails with the first failure observed. Items that have not acquired a permit by then are
/// never started, items already running are detached and allowed to finish. Cancelling `cancel`
/// stops scheduling and drops running items at their next suspension point.
pub async fn parallel_map<I, T, F, Fut>(
    items: I,
    concurrency: usize,
    cancel: &CancellationToken,
    mut operation: F,
) -> SyncResult<Vec<T>>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = SyncResult<T>> + Send + 'static,
    T: Send + 'static,
{
    ensure_concurrency(concurrency)?;

    let semaphore = Arc::new(Semaphore::new(concurrency));
    let halt = cancel.child_token();
    let mut join_set = JoinSet::new();

    let mut len = 0;
    for (index, item) in items.into_iter().enumerate() {
        join_set.spawn(run_item(
            index,
            operation(item),
            semaphore.clone(),
            halt.clone(),
            cancel.clone(),
        ));
        len += 1;
    }

    let mut results: Vec<Option<T>> = std::iter::repeat_with(|| None).take(len).collect();

    while let Some(joined) = join_set.join_next().await {
        let failure = match joined {
            Ok((index, ItemOutcome::Finished(Ok(value)))) => {
                results[index] = Some(value);
                continue;
            }
            Ok((_, ItemOutcome::NotStarted)) => continue,
            Ok((index, ItemOutcome::Finished(Err(err)))) => {
                debug!(index, error = %err, "fan-out item failed, halting scheduling");
                err
            }
            Err(join_err) => SyncError::from(join_err),
        };

        halt.cancel();
        join_set.detach_all();

        return Err(failure);
    }

    let mut values = Vec::with_capacity(len);
    for value in results {
        let Some(value) = value else {
            bail!(
                ErrorKind::Cancelled,
                "Fan-out was cancelled before all items ran"
            );
        };
        values.push(value);
    }

    Ok(values)
}

/// Runs `operation` for every item with at most `concurrency` invocations active and returns the
/// outcome of each item in input order.
///
/// Failures are isolated: every item is attempted regardless of its siblings. Items that never
/// ran because `cancel` fired report [`ErrorKind::Cancelled`].
pub async fn parallel_for_each_outcomes<I, F, Fut>(
    items: I,
    concurrency: usize,
    cancel: &CancellationToken,
    mut operation: F,
) -> SyncResult<ForEachReport>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = SyncResult<()>> + Send + 'static,
{
    ensure_concurrency(concurrency)?;

    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut join_set = JoinSet::new();

    let mut len = 0;
    for (index, item) in items.into_iter().enumerate() {
        join_set.spawn(run_item(
            index,
            operation(item),
            semaphore.clone(),
            cancel.clone(),
            cancel.clone(),
        ));
        len += 1;
    }

    let mut outcomes: Vec<Option<SyncResult<()>>> =
        std::iter::repeat_with(|| None).take(len).collect();

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, ItemOutcome::Finished(result))) => outcomes[index] = Some(result),
            Ok((_, ItemOutcome::NotStarted)) => {}
            Err(join_err) => {
                // Only possible when the runtime shuts down, the slot is filled as cancelled.
                warn!(error = %join_err, "fan-out task did not complete");
            }
        }
    }

    let outcomes = outcomes
        .into_iter()
        .map(|outcome| {
            outcome.unwrap_or_else(|| {
                Err(sync_error!(
                    ErrorKind::Cancelled,
                    "Fan-out item was cancelled before it ran"
                ))
            })
        })
        .collect();

    Ok(ForEachReport { outcomes })
}

/// Runs `operation` for every item with at most `concurrency` invocations active.
///
/// Completes after every item was attempted and fails with the aggregation of all item
/// failures, if any.
pub async fn parallel_for_each<I, F, Fut>(
    items: I,
    concurrency: usize,
    cancel: &CancellationToken,
    operation: F,
) -> SyncResult<()>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = SyncResult<()>> + Send + 'static,
{
    parallel_for_each_outcomes(items, concurrency, cancel, operation)
        .await?
        .into_result()
}

/// Acquires a permit, runs the item and releases the permit on every exit path.
///
/// `halt` only prevents scheduling, `cancel` also interrupts a running item.
async fn run_item<T, Fut>(
    index: usize,
    future: Fut,
    semaphore: Arc<Semaphore>,
    halt: CancellationToken,
    cancel: CancellationToken,
) -> (usize, ItemOutcome<T>)
where
    Fut: Future<Output = SyncResult<T>> + Send + 'static,
{
    let permit = tokio::select! {
        biased;
        _ = halt.cancelled() => return (index, ItemOutcome::NotStarted),
        permit = semaphore.acquire_owned() => permit,
    };
    let Ok(_permit) = permit else {
        return (
            index,
            ItemOutcome::Finished(Err(sync_error!(
                ErrorKind::InvalidState,
                "Fan-out semaphore was closed"
            ))),
        );
    };
    if halt.is_cancelled() {
        return (index, ItemOutcome::NotStarted);
    }

    let _active = ActiveItemGuard::acquire();
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(sync_error!(ErrorKind::Cancelled, "Fan-out item was cancelled while running")),
        result = AssertUnwindSafe(future).catch_unwind() => result.unwrap_or_else(|panic| Err(panic_error(panic))),
    };

    if let Err(err) = &result {
        counter!(FOLLOWSYNC_FAN_OUT_ITEM_FAILURES_TOTAL, ERROR_KIND_LABEL => format!("{:?}", err.kind()))
            .increment(1);
    }

    (index, ItemOutcome::Finished(result))
}

fn panic_error(panic: Box<dyn Any + Send>) -> SyncError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());

    sync_error!(ErrorKind::TaskPanicked, "Fan-out item panicked", message)
}

fn ensure_concurrency(concurrency: usize) -> SyncResult<()> {
    if concurrency == 0 {
        bail!(
            ErrorKind::InvalidConfiguration,
            "Fan-out concurrency must be greater than zero"
        );
    }

    Ok(())
}
