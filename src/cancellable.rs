//! Stop flag shared between a service and its background task.
//!
//! The volume monitor and the periodic scheduler each own one and race
//! [`Cancellable::cancelled`] against their tick in a `select!`. Closing the
//! service flips the flag, which ends the loop at its next await point.
//! Backends take an optional reference and poll [`Cancellable::check`]
//! between the steps of a volume enumeration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::{ErrorKind, SdiskError, SdiskResult};

/// Clones share the same flag. A flag never resets; a reopened monitor
/// makes a fresh one.
#[derive(Clone, Debug, Default)]
pub struct Cancellable {
    stopped: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl Cancellable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops every task waiting on this flag. Later calls do nothing.
    pub fn cancel(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("stop requested");
        self.wake.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the flag is set. Used between blocking steps
    /// that cannot await [`cancelled`](Self::cancelled).
    pub fn check(&self) -> SdiskResult<()> {
        if self.is_cancelled() {
            return Err(SdiskError::new(ErrorKind::Cancelled, "stopped before completion"));
        }
        Ok(())
    }

    /// Resolves once [`cancel`](Self::cancel) has been called, including
    /// before this future was created.
    pub async fn cancelled(&self) {
        // Register before reading the flag so a concurrent cancel is not missed.
        let woken = self.wake.notified();
        if self.is_cancelled() {
            return;
        }
        woken.await;
    }
}
