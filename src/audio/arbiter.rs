//! Microphone arbitration
//!
//! The physical capture resource is shared by one-shot capture and realtime
//! streaming. The arbiter grants exclusive [`CaptureLease`]s so the two can
//! never overlap; frames reach the current lease holder through a tap slot
//! that the frame pump publishes into.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::audio::AudioFrame;
use crate::{Error, Result};

/// Shared slot the frame pump delivers into; holds the active lease's tap.
pub type TapSlot = Arc<Mutex<Option<mpsc::UnboundedSender<AudioFrame>>>>;

struct Inner {
    semaphore: Arc<Semaphore>,
    next_id: AtomicU64,
    tap: TapSlot,
}

/// Grants exclusive leases on the single audio capture resource.
///
/// At most one [`CaptureLease`] is outstanding at any instant; a lease is
/// released explicitly, or by drop on error and cancellation paths.
#[derive(Clone)]
pub struct MicrophoneArbiter {
    inner: Arc<Inner>,
}

impl Default for MicrophoneArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl MicrophoneArbiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                semaphore: Arc::new(Semaphore::new(1)),
                next_id: AtomicU64::new(1),
                tap: Arc::new(Mutex::new(None)),
            }),
        }
    }

    /// The slot the frame pump publishes frames into
    #[must_use]
    pub fn tap_slot(&self) -> TapSlot {
        Arc::clone(&self.inner.tap)
    }

    /// Wait for the capture resource, up to `timeout`.
    ///
    /// Suspends cooperatively until the previous lease is released.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceBusy`] if the lease is not released within
    /// the timeout; the caller holds nothing in that case.
    pub async fn acquire(&self, timeout: Duration) -> Result<CaptureLease> {
        let semaphore = Arc::clone(&self.inner.semaphore);
        match tokio::time::timeout(timeout, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(self.lease(permit)),
            Ok(Err(_)) => Err(Error::ResourceBusy(
                "capture resource closed".to_string(),
            )),
            Err(_) => Err(Error::ResourceBusy(format!(
                "microphone lease not released within {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Take the capture resource immediately, or fail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceBusy`] if another operation holds the lease.
    pub fn try_acquire(&self) -> Result<CaptureLease> {
        let semaphore = Arc::clone(&self.inner.semaphore);
        semaphore.try_acquire_owned().map_or_else(
            |_| {
                Err(Error::ResourceBusy(
                    "microphone lease held by another operation".to_string(),
                ))
            },
            |permit| Ok(self.lease(permit)),
        )
    }

    fn lease(&self, permit: OwnedSemaphorePermit) -> CaptureLease {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(lease = id, "capture lease granted");
        CaptureLease {
            id,
            inner: Arc::clone(&self.inner),
            permit: Some(permit),
        }
    }
}

/// Exclusive ownership of the capture resource for the lease's lifetime.
///
/// Dropping an unreleased lease releases it; explicit [`release`] exists so
/// callers can surface contract violations instead of masking them.
///
/// [`release`]: CaptureLease::release
pub struct CaptureLease {
    id: u64,
    inner: Arc<Inner>,
    permit: Option<OwnedSemaphorePermit>,
}

impl CaptureLease {
    /// Lease identifier, for log correlation
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Install this lease's tap and return the frame receiver.
    ///
    /// Frames arrive in source production order. The previous tap, if any,
    /// is replaced; only one lease can exist so this only re-subscribes the
    /// same holder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLeaseState`] if the lease was already
    /// released.
    pub fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<AudioFrame>> {
        if self.permit.is_none() {
            return Err(Error::InvalidLeaseState(format!(
                "subscribe on released lease {}",
                self.id
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.tap.lock().expect("tap slot poisoned") = Some(tx);
        Ok(rx)
    }

    /// Release the capture resource.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLeaseState`] on double release; this is a
    /// programming-contract error, fatal to the holding operation.
    pub fn release(&mut self) -> Result<()> {
        let permit = self.permit.take().ok_or_else(|| {
            Error::InvalidLeaseState(format!("double release of lease {}", self.id))
        })?;
        self.clear_tap();
        drop(permit);
        tracing::debug!(lease = self.id, "capture lease released");
        Ok(())
    }

    fn clear_tap(&self) {
        self.inner.tap.lock().expect("tap slot poisoned").take();
    }
}

impl Drop for CaptureLease {
    fn drop(&mut self) {
        if self.permit.is_some() {
            self.clear_tap();
            tracing::debug!(lease = self.id, "capture lease released on drop");
        }
    }
}
