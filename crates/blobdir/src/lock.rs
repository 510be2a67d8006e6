//! Cross-process mutual exclusion backed by a remote lease.
//!
//! A lock named `write.lock` is a lease on the remote object of the same
//! name. The object is created on first use. While the lease is held a
//! background task renews it every `renew_interval`; the task stops when
//! the lock is released, broken or dropped.

use std::sync::Arc;
use std::time::Duration;

use blob_store::{LeaseId, RemoteBlobStore, StoreError};
use bytes::Bytes;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::LeaseConfig;
use crate::error::{DirectoryError, Result};

/// Periodic lease renewal, aborted on drop.
#[derive(Debug)]
struct RenewalTask {
    shutdown: watch::Sender<()>,
    handle: JoinHandle<()>,
}

impl RenewalTask {
    fn spawn(
        store: Arc<dyn RemoteBlobStore>,
        container: String,
        name: String,
        lease: LeaseId,
        every: Duration,
    ) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(());
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match store.renew_lease(&container, &name, &lease).await {
                            Ok(()) => debug!(name = %name, "lease renewed"),
                            Err(e) => warn!(name = %name, error = %e, "lease renewal failed"),
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        Self { shutdown, handle }
    }
}

impl Drop for RenewalTask {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        self.handle.abort();
    }
}

#[derive(Debug, Default)]
struct LockState {
    lease: Option<LeaseId>,
    renewal: Option<RenewalTask>,
}

impl LockState {
    /// Forget the lease and stop renewing it.
    fn clear(&mut self) -> Option<LeaseId> {
        self.renewal = None;
        self.lease.take()
    }
}

/// Transport-level failures are surfaced; everything else just means
/// the lease was not obtained.
fn is_transport_failure(err: &StoreError) -> bool {
    matches!(
        err,
        StoreError::Database(_)
            | StoreError::ObjectStore(_)
            | StoreError::Io(_)
            | StoreError::Migration(_)
    ) && !err.is_not_found()
}

/// A named lock shared by every process using the same container.
///
/// One instance exists per name per directory; see
/// [`VirtualDirectory::make_lock`](crate::VirtualDirectory::make_lock).
#[derive(Debug)]
pub struct DistributedLock {
    name: String,
    container: String,
    store: Arc<dyn RemoteBlobStore>,
    lease: LeaseConfig,
    poll_interval: Duration,
    state: AsyncMutex<LockState>,
}

impl DistributedLock {
    pub fn new(
        name: impl Into<String>,
        container: impl Into<String>,
        store: Arc<dyn RemoteBlobStore>,
        lease: LeaseConfig,
        poll_interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            container: container.into(),
            store,
            lease,
            poll_interval,
            state: AsyncMutex::new(LockState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this instance currently holds the lease.
    pub async fn is_held(&self) -> bool {
        self.state.lock().await.lease.is_some()
    }

    async fn acquire_lease(&self) -> std::result::Result<LeaseId, StoreError> {
        self.store
            .acquire_lease(&self.container, &self.name, self.lease.duration, None)
            .await
    }

    async fn create_lock_object(&self) -> Result<()> {
        self.store
            .create_container(&self.container)
            .await
            .map_err(|e| DirectoryError::remote("create_container", &self.name, e))?;
        self.store
            .upload(
                &self.container,
                &self.name,
                Bytes::copy_from_slice(self.name.as_bytes()),
            )
            .await
            .map_err(|e| DirectoryError::remote("upload", &self.name, e))?;
        debug!(name = %self.name, "lock object created");
        Ok(())
    }

    /// Try once to take the lock.
    ///
    /// Returns `false` when someone else holds it, or when this instance
    /// already does. Only transport failures are errors.
    pub async fn try_acquire(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.lease.is_some() {
            debug!(name = %self.name, "lock already held by this instance");
            return Ok(false);
        }

        let attempt = match self.acquire_lease().await {
            Err(e) if e.is_not_found() => {
                self.create_lock_object().await?;
                self.acquire_lease().await
            }
            other => other,
        };

        match attempt {
            Ok(lease) => {
                state.renewal = Some(RenewalTask::spawn(
                    self.store.clone(),
                    self.container.clone(),
                    self.name.clone(),
                    lease.clone(),
                    self.lease.renew_interval,
                ));
                state.lease = Some(lease);
                info!(name = %self.name, "lock acquired");
                Ok(true)
            }
            Err(e) if is_transport_failure(&e) => {
                Err(DirectoryError::remote("acquire_lease", &self.name, e))
            }
            Err(e) => {
                debug!(name = %self.name, reason = %e, "lock not acquired");
                Ok(false)
            }
        }
    }

    /// Poll [`try_acquire`](Self::try_acquire) until it succeeds or `wait` elapses.
    pub async fn obtain(&self, wait: Duration) -> Result<()> {
        let started = Instant::now();
        loop {
            if self.try_acquire().await? {
                return Ok(());
            }
            let waited = started.elapsed();
            if waited >= wait {
                return Err(DirectoryError::LockObtainTimeout {
                    name: self.name.clone(),
                    waited,
                });
            }
            tokio::time::sleep(self.poll_interval.min(wait - waited)).await;
        }
    }

    /// Whether anyone holds the lock.
    ///
    /// Without a local lease this probes by acquiring and immediately
    /// releasing a lease, so the answer can be stale by the time it
    /// returns. Treat it as advisory.
    pub async fn is_locked(&self) -> Result<bool> {
        let state = self.state.lock().await;
        if state.lease.is_some() {
            return Ok(true);
        }

        match self.acquire_lease().await {
            Ok(probe) => {
                if let Err(e) = self
                    .store
                    .release_lease(&self.container, &self.name, &probe)
                    .await
                {
                    debug!(name = %self.name, error = %e, "probe lease release failed");
                }
                Ok(false)
            }
            Err(e) if e.is_lease_conflict() => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(DirectoryError::remote("probe_lease", &self.name, e)),
        }
    }

    /// Renew the held lease once. Returns `false` if no lease is held.
    pub async fn renew(&self) -> Result<bool> {
        let state = self.state.lock().await;
        let Some(lease) = state.lease.as_ref() else {
            return Ok(false);
        };
        self.store
            .renew_lease(&self.container, &self.name, lease)
            .await
            .map_err(|e| DirectoryError::remote("renew_lease", &self.name, e))?;
        Ok(true)
    }

    /// Give up the lock. Local state is cleared even if the remote call fails.
    pub async fn release(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(lease) = state.clear() else {
            return Ok(());
        };

        match self
            .store
            .release_lease(&self.container, &self.name, &lease)
            .await
        {
            Ok(()) => {
                info!(name = %self.name, "lock released");
                Ok(())
            }
            Err(e) if e.is_lease_conflict() || e.is_not_found() => {
                warn!(name = %self.name, error = %e, "lease was lost before release");
                Ok(())
            }
            Err(e) => Err(DirectoryError::remote("release_lease", &self.name, e)),
        }
    }

    /// End whatever lease exists on the lock, whoever holds it.
    ///
    /// Failures are ignored.
    pub async fn force_break(&self) {
        let mut state = self.state.lock().await;
        state.clear();

        match self.store.break_lease(&self.container, &self.name).await {
            Ok(()) => info!(name = %self.name, "lock broken"),
            Err(e) => debug!(name = %self.name, error = %e, "break lease ignored"),
        }
    }
}
