use std::sync::Arc;

use tokio::sync::{Notify, RwLock};

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::remote::RemoteSource;
use crate::types::{ListId, RemoteEntry, Subject};

/// Fault raised by a [`FaultInjectingRemote`] instead of forwarding a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
    /// Fails the call with [`ErrorKind::RemoteFailure`].
    Error,
    Panic,
}

/// Faults to inject, per remote operation.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    pub fetch_list_items: Option<FaultType>,
    pub push_items: Option<FaultType>,
    pub remove_items: Option<FaultType>,
    pub resolve_list_id: Option<FaultType>,
}

fn trigger_fault(fault: Option<FaultType>, operation: &'static str) -> SyncResult<()> {
    match fault {
        None => Ok(()),
        Some(FaultType::Error) => bail!(
            ErrorKind::RemoteFailure,
            "Injected remote failure",
            format!("the remote operation '{operation}' was configured to fail")
        ),
        Some(FaultType::Panic) => panic!("injected panic in remote operation '{operation}'"),
    }
}

/// [`RemoteSource`] wrapper failing the configured operations before they reach the wrapped
/// remote.
///
/// Faults can be changed while a test runs, e.g. to let a later pass recover.
#[derive(Debug, Clone)]
pub struct FaultInjectingRemote<R> {
    inner: R,
    config: Arc<RwLock<FaultConfig>>,
}

impl<R> FaultInjectingRemote<R> {
    pub fn wrap(inner: R, config: FaultConfig) -> Self {
        Self {
            inner,
            config: Arc::new(RwLock::new(config)),
        }
    }

    pub fn get_inner(&self) -> &R {
        &self.inner
    }

    pub async fn set_faults(&self, config: FaultConfig) {
        *self.config.write().await = config;
    }

    /// Removes every configured fault.
    pub async fn clear_faults(&self) {
        self.set_faults(FaultConfig::default()).await;
    }
}

impl<R> RemoteSource for FaultInjectingRemote<R>
where
    R: RemoteSource + Send + Sync,
{
    async fn fetch_list_items(&self, list_id: ListId) -> SyncResult<Vec<(RemoteEntry, Subject)>> {
        let fault = self.config.read().await.fetch_list_items;
        trigger_fault(fault, "fetch_list_items")?;

        self.inner.fetch_list_items(list_id).await
    }

    async fn push_items(&self, list_id: ListId, subjects: Vec<Subject>) -> SyncResult<()> {
        let fault = self.config.read().await.push_items;
        trigger_fault(fault, "push_items")?;

        self.inner.push_items(list_id, subjects).await
    }

    async fn remove_items(&self, list_id: ListId, subjects: Vec<Subject>) -> SyncResult<()> {
        let fault = self.config.read().await.remove_items;
        trigger_fault(fault, "remove_items")?;

        self.inner.remove_items(list_id, subjects).await
    }

    async fn resolve_list_id(&self) -> SyncResult<Option<ListId>> {
        let fault = self.config.read().await.resolve_list_id;
        trigger_fault(fault, "resolve_list_id")?;

        self.inner.resolve_list_id().await
    }
}

/// [`RemoteSource`] wrapper holding every [`RemoteSource::fetch_list_items`] call open until the
/// test releases it.
///
/// Tests use it to observe the reconciler while a pass is suspended in its pull phase.
#[derive(Debug, Clone)]
pub struct GatedRemote<R> {
    inner: R,
    entered: Arc<Notify>,
    gate: Arc<Notify>,
}

impl<R> GatedRemote<R> {
    pub fn wrap(inner: R) -> Self {
        Self {
            inner,
            entered: Arc::new(Notify::new()),
            gate: Arc::new(Notify::new()),
        }
    }

    pub fn get_inner(&self) -> &R {
        &self.inner
    }

    /// Waits until a fetch reached the gate.
    pub async fn wait_until_entered(&self) {
        self.entered.notified().await;
    }

    /// Lets one fetch held at the gate, or the next one to arrive, proceed.
    pub fn release(&self) {
        self.gate.notify_one();
    }
}

impl<R> RemoteSource for GatedRemote<R>
where
    R: RemoteSource + Send + Sync,
{
    async fn fetch_list_items(&self, list_id: ListId) -> SyncResult<Vec<(RemoteEntry, Subject)>> {
        self.entered.notify_one();
        self.gate.notified().await;

        self.inner.fetch_list_items(list_id).await
    }

    async fn push_items(&self, list_id: ListId, subjects: Vec<Subject>) -> SyncResult<()> {
        self.inner.push_items(list_id, subjects).await
    }

    async fn remove_items(&self, list_id: ListId, subjects: Vec<Subject>) -> SyncResult<()> {
        self.inner.remove_items(list_id, subjects).await
    }

    async fn resolve_list_id(&self) -> SyncResult<Option<ListId>> {
        self.inner.resolve_list_id().await
    }
}
