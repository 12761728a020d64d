use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use metrics::counter;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::metrics::{
    FOLLOWSYNC_SINGLE_FLIGHT_JOINED_TOTAL, FOLLOWSYNC_SINGLE_FLIGHT_STARTED_TOTAL,
    RESOURCE_KIND_LABEL,
};
use crate::types::FlightKey;

/// Key of a deduplicated operation.
pub trait FlightLabel {
    /// Returns the resource kind used to label the coordinator metrics.
    fn resource_kind(&self) -> &'static str;
}

impl FlightLabel for FlightKey {
    fn resource_kind(&self) -> &'static str {
        self.kind.as_str()
    }
}

/// Result handle shared by every caller of one execution.
type SharedResult<T> = Shared<BoxFuture<'static, SyncResult<T>>>;

/// Handle of one execution ("generation") of a keyed operation.
struct Flight<T> {
    generation: u64,
    result: SharedResult<T>,
    abort_handle: AbortHandle,
    waiters: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl<T> Flight<T> {
    fn is_finished(&self) -> bool {
        self.abort_handle.is_finished()
    }

    fn register_waiter(&self) -> WaiterGuard {
        self.waiters.fetch_add(1, Ordering::AcqRel);

        WaiterGuard {
            waiters: self.waiters.clone(),
            cancel: self.cancel.clone(),
            settled: false,
        }
    }
}

/// Accounts for one caller waiting on a flight.
///
/// When the last waiter stops waiting before the flight settled, the flight's token is
/// cancelled.
struct WaiterGuard {
    waiters: Arc<AtomicUsize>,
    cancel: CancellationToken,
    settled: bool,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        let remaining = self.waiters.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 && !self.settled {
            debug!("every waiter abandoned the flight, cancelling it");
            self.cancel.cancel();
        }
    }
}

struct Inner<K, T> {
    flights: HashMap<K, Flight<T>>,
    next_generation: u64,
}

/// Snapshot of the started/joined counters of a [`SingleFlight`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SingleFlightStats {
    /// Calls that started a new execution.
    pub started: u64,
    /// Calls that joined an execution already in flight.
    pub joined: u64,
}

/// Keyed coordinator collapsing concurrent calls for the same key into one execution.
///
/// The first call for a key spawns the operation on the tokio runtime and records a shared
/// handle to its result. Calls made while that execution is active receive the same handle, so
/// every caller observes the same value or the same failure. Once the execution settles its
/// entry is removed and the next call starts a new generation, which means failures never
/// poison a key.
///
/// The operation keeps running when the caller that started it stops waiting. Every execution
/// owns a child of the coordinator's token which is cancelled once no caller waits for it
/// anymore, operations started with [`SingleFlight::run_cancellable`] can stop cooperatively.
pub struct SingleFlight<K, T> {
    name: &'static str,
    inner: Arc<Mutex<Inner<K, T>>>,
    started: Arc<AtomicU64>,
    joined: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl<K, T> SingleFlight<K, T>
where
    K: FlightLabel + Hash + Eq + Clone + fmt::Display + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Creates an empty coordinator. `name` labels its logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(Inner {
                flights: HashMap::new(),
                next_generation: 0,
            })),
            started: Arc::new(AtomicU64::new(0)),
            joined: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
        }
    }

    /// Derives the token of every execution from `parent`, so cancelling `parent` cancels
    /// them all.
    pub fn with_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.clone();
        self
    }

    /// Runs `operation` for `key`, or joins the execution already in flight for it.
    ///
    /// `operation` is only invoked when a new execution starts.
    pub async fn run<F, Fut>(&self, key: K, operation: F) -> SyncResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
    {
        self.run_cancellable(key, |_| operation()).await
    }

    /// Like [`SingleFlight::run`], but hands the execution's token to `operation`.
    ///
    /// The token is cancelled when every caller stopped waiting before the execution settled,
    /// or when the parent token is cancelled.
    pub async fn run_cancellable<F, Fut>(&self, key: K, operation: F) -> SyncResult<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
    {
        let (result, mut waiter) = {
            let mut inner = self.inner.lock().await;

            match inner.flights.get(&key) {
                Some(flight) if !flight.is_finished() => {
                    self.joined.fetch_add(1, Ordering::Relaxed);
                    counter!(FOLLOWSYNC_SINGLE_FLIGHT_JOINED_TOTAL, RESOURCE_KIND_LABEL => key.resource_kind())
                        .increment(1);
                    debug!(flight = self.name, %key, generation = flight.generation, "joined in-flight operation");

                    (flight.result.clone(), flight.register_waiter())
                }
                _ => {
                    let generation = inner.next_generation;
                    inner.next_generation += 1;

                    let cancel = self.cancel.child_token();
                    let future = operation(cancel.clone());
                    let flight = self.spawn_flight(key.clone(), generation, cancel, future);
                    let entry = (flight.result.clone(), flight.register_waiter());
                    inner.flights.insert(key.clone(), flight);

                    self.started.fetch_add(1, Ordering::Relaxed);
                    counter!(FOLLOWSYNC_SINGLE_FLIGHT_STARTED_TOTAL, RESOURCE_KIND_LABEL => key.resource_kind())
                        .increment(1);
                    debug!(flight = self.name, %key, generation, "started new operation");

                    entry
                }
            }
        };

        let result = result.await;
        waiter.settled = true;

        result
    }

    /// Spawns the operation. Must be called with the map lock held so the settled task can only
    /// remove its entry after the entry was inserted.
    fn spawn_flight<Fut>(
        &self,
        key: K,
        generation: u64,
        cancel: CancellationToken,
        future: Fut,
    ) -> Flight<T>
    where
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
    {
        let inner = self.inner.clone();
        let name = self.name;

        let join_handle = tokio::spawn(async move {
            let result = future.await;

            let mut inner = inner.lock().await;
            // A newer generation may already own the key if this one was observed as finished.
            if inner
                .flights
                .get(&key)
                .is_some_and(|flight| flight.generation == generation)
            {
                inner.flights.remove(&key);
            }
            debug!(flight = name, %key, generation, ok = result.is_ok(), "operation settled");

            result
        });
        let abort_handle = join_handle.abort_handle();

        let result = async move {
            match join_handle.await {
                Ok(result) => result,
                Err(err) => Err(SyncError::from(err)),
            }
        }
        .boxed()
        .shared();

        Flight {
            generation,
            result,
            abort_handle,
            waiters: Arc::new(AtomicUsize::new(0)),
            cancel,
        }
    }

    /// Returns the number of keys with an execution still in flight.
    pub async fn in_flight(&self) -> usize {
        let inner = self.inner.lock().await;
        inner
            .flights
            .values()
            .filter(|flight| !flight.is_finished())
            .count()
    }

    /// Returns the started/joined counters.
    pub fn stats(&self) -> SingleFlightStats {
        SingleFlightStats {
            started: self.started.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
        }
    }
}

impl<K, T> Clone for SingleFlight<K, T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inner: self.inner.clone(),
            started: self.started.clone(),
            joined: self.joined.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<K, T> fmt::Debug for SingleFlight<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlight")
            .field("name", &self.name)
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("joined", &self.joined.load(Ordering::Relaxed))
            .finish()
    }
}

/// Single-flight coordinator for operations that produce no value.
///
/// Waiters only observe completion or the shared failure. It owns its own key space, so an
/// action never joins a value-producing execution even when their keys are equal.
pub struct SingleFlightAction<K> {
    flights: SingleFlight<K, ()>,
}

impl<K> SingleFlightAction<K>
where
    K: FlightLabel + Hash + Eq + Clone + fmt::Display + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            flights: SingleFlight::new(name),
        }
    }

    /// See [`SingleFlight::with_cancellation`].
    pub fn with_cancellation(self, parent: &CancellationToken) -> Self {
        Self {
            flights: self.flights.with_cancellation(parent),
        }
    }

    /// Runs `operation` for `key`, or waits for the execution already in flight for it.
    pub async fn run<F, Fut>(&self, key: K, operation: F) -> SyncResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<()>> + Send + 'static,
    {
        self.flights.run(key, operation).await
    }

    /// Like [`SingleFlightAction::run`], but hands the execution's token to `operation`.
    pub async fn run_cancellable<F, Fut>(&self, key: K, operation: F) -> SyncResult<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = SyncResult<()>> + Send + 'static,
    {
        self.flights.run_cancellable(key, operation).await
    }

    pub async fn in_flight(&self) -> usize {
        self.flights.in_flight().await
    }

    pub fn stats(&self) -> SingleFlightStats {
        self.flights.stats()
    }
}

impl<K> Clone for SingleFlightAction<K> {
    fn clone(&self) -> Self {
        Self {
            flights: self.flights.clone(),
        }
    }
}

impl<K> fmt::Debug for SingleFlightAction<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlightAction")
            .field("flights", &self.flights)
            .finish()
    }
}
