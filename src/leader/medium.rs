//! Pluggable storage mediums for the leader lease.
//!
//! The election only needs a shared slot with change notification: load,
//! store, owner-checked clear, and a revision watch peers can subscribe to.
//! None of the implementations provide atomic compare-and-swap; the election
//! protocol tolerates the resulting brief dual-holder windows.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::watch;
use tracing::warn;
use uuid::Uuid;

use crate::leader::lease::LeaderLease;
use crate::state::timer::ScheduledTask;

/// Result alias for lease-medium operations.
pub type LeaseResult<T> = Result<T, LeaseError>;

/// Error raised by lease mediums regardless of the backing storage.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// The medium could not be read or written.
    #[error("lease medium unavailable: {message}")]
    Unavailable {
        /// Human-readable description of the failing operation.
        message: String,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl LeaseError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        LeaseError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}

/// Shared key-value slot holding the [`LeaderLease`], with change
/// notification to peers.
pub trait LeaseMedium: Send + Sync {
    /// Read the current lease, if one is stored.
    fn load(&self) -> BoxFuture<'static, LeaseResult<Option<LeaderLease>>>;
    /// Overwrite the stored lease.
    fn store(&self, lease: LeaderLease) -> BoxFuture<'static, LeaseResult<()>>;
    /// Remove the stored lease only when `tab_id` still owns it.
    fn clear_if_owner(&self, tab_id: Uuid) -> BoxFuture<'static, LeaseResult<()>>;
    /// Subscribe to revision bumps; every store or clear advances the value.
    fn changes(&self) -> watch::Receiver<u64>;
}

// ── In-process medium ───────────────────────────────────────────────

struct MemoryInner {
    slot: std::sync::RwLock<Option<LeaderLease>>,
    revision: watch::Sender<u64>,
    counter: AtomicU64,
}

/// Lease medium shared between tabs of one process. Used by tests and by
/// embedded multi-tab simulations.
#[derive(Clone)]
pub struct MemoryLeaseMedium {
    inner: Arc<MemoryInner>,
}

impl MemoryLeaseMedium {
    /// Empty shared slot.
    pub fn new() -> Self {
        let (revision, _rx) = watch::channel(0);
        Self {
            inner: Arc::new(MemoryInner {
                slot: std::sync::RwLock::new(None),
                revision,
                counter: AtomicU64::new(0),
            }),
        }
    }

    fn bump(&self) {
        let next = self.inner.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.inner.revision.send(next);
    }

    fn read_slot(&self) -> Option<LeaderLease> {
        *self.inner.slot.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_slot(&self, value: Option<LeaderLease>) {
        *self
            .inner
            .slot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = value;
        self.bump();
    }
}

impl Default for MemoryLeaseMedium {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaseMedium for MemoryLeaseMedium {
    fn load(&self) -> BoxFuture<'static, LeaseResult<Option<LeaderLease>>> {
        let medium = self.clone();
        Box::pin(async move { Ok(medium.read_slot()) })
    }

    fn store(&self, lease: LeaderLease) -> BoxFuture<'static, LeaseResult<()>> {
        let medium = self.clone();
        Box::pin(async move {
            medium.write_slot(Some(lease));
            Ok(())
        })
    }

    fn clear_if_owner(&self, tab_id: Uuid) -> BoxFuture<'static, LeaseResult<()>> {
        let medium = self.clone();
        Box::pin(async move {
            let owned = medium.read_slot().is_some_and(|lease| lease.tab_id == tab_id);
            if owned {
                medium.write_slot(None);
            }
            Ok(())
        })
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }
}

// ── File-backed medium ──────────────────────────────────────────────

const FILE_POLL_INTERVAL: Duration = Duration::from_millis(500);

struct FileInner {
    path: PathBuf,
    revision: watch::Sender<u64>,
    counter: AtomicU64,
    // Keeps the content poller alive for as long as any clone of the medium.
    _poller: ScheduledTask,
}

/// Lease medium persisting the lease as a JSON file under the shared storage
/// key. A content poller feeds the revision watch so peers in other
/// processes are noticed within [`FILE_POLL_INTERVAL`].
#[derive(Clone)]
pub struct FileLeaseMedium {
    inner: Arc<FileInner>,
}

impl FileLeaseMedium {
    /// Medium backed by the given file path.
    pub fn new(path: PathBuf) -> Self {
        let (revision, _rx) = watch::channel(0);
        let poller_path = path.clone();
        let poller_revision = revision.clone();
        let poller = ScheduledTask::spawn(async move {
            let mut last: Option<String> = None;
            let mut revision_value = 0u64;
            let mut ticks = tokio::time::interval(FILE_POLL_INTERVAL);
            loop {
                ticks.tick().await;
                let current = tokio::fs::read_to_string(&poller_path).await.ok();
                if current != last {
                    last = current;
                    revision_value += 1;
                    let _ = poller_revision.send(revision_value);
                }
            }
        });
        Self {
            inner: Arc::new(FileInner {
                path,
                revision,
                counter: AtomicU64::new(0),
                _poller: poller,
            }),
        }
    }

    fn bump(&self) {
        let next = self.inner.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.inner.revision.send(next);
    }
}

impl LeaseMedium for FileLeaseMedium {
    fn load(&self) -> BoxFuture<'static, LeaseResult<Option<LeaderLease>>> {
        let medium = self.clone();
        Box::pin(async move {
            let contents = match tokio::fs::read_to_string(&medium.inner.path).await {
                Ok(contents) => contents,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(err) => {
                    return Err(LeaseError::unavailable(
                        format!("reading lease file {}", medium.inner.path.display()),
                        err,
                    ));
                }
            };
            match serde_json::from_str::<LeaderLease>(&contents) {
                Ok(lease) => Ok(Some(lease)),
                Err(err) => {
                    // A corrupt lease is treated as absent so a healthy tab
                    // can take over.
                    warn!(error = %err, "discarding unparseable leader lease");
                    Ok(None)
                }
            }
        })
    }

    fn store(&self, lease: LeaderLease) -> BoxFuture<'static, LeaseResult<()>> {
        let medium = self.clone();
        Box::pin(async move {
            let payload = serde_json::to_string(&lease).map_err(|err| {
                LeaseError::unavailable("serializing leader lease".into(), err)
            })?;
            tokio::fs::write(&medium.inner.path, payload)
                .await
                .map_err(|err| {
                    LeaseError::unavailable(
                        format!("writing lease file {}", medium.inner.path.display()),
                        err,
                    )
                })?;
            medium.bump();
            Ok(())
        })
    }

    fn clear_if_owner(&self, tab_id: Uuid) -> BoxFuture<'static, LeaseResult<()>> {
        let medium = self.clone();
        Box::pin(async move {
            let current = medium.load().await?;
            if current.is_some_and(|lease| lease.tab_id == tab_id) {
                match tokio::fs::remove_file(&medium.inner.path).await {
                    Ok(()) => medium.bump(),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => {
                        return Err(LeaseError::unavailable(
                            format!("removing lease file {}", medium.inner.path.display()),
                            err,
                        ));
                    }
                }
            }
            Ok(())
        })
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_medium_round_trips_and_bumps_revision() {
        let medium = MemoryLeaseMedium::new();
        let mut changes = medium.changes();
        let lease = LeaderLease::claim(Uuid::new_v4(), 0, 3_000);

        assert_eq!(medium.load().await.unwrap(), None);
        medium.store(lease).await.unwrap();
        assert_eq!(medium.load().await.unwrap(), Some(lease));
        changes.changed().await.unwrap();

        // Clearing under the wrong owner is a no-op.
        medium.clear_if_owner(Uuid::new_v4()).await.unwrap();
        assert_eq!(medium.load().await.unwrap(), Some(lease));

        medium.clear_if_owner(lease.tab_id).await.unwrap();
        assert_eq!(medium.load().await.unwrap(), None);
    }
}
