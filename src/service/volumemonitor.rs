//! Volume monitor
//!
//! Turns changes of the mounted volume set into [`DiskEvent`]s. The monitor
//! rescans the backend on a fixed interval and, where the backend exposes
//! volume roots, as soon as a root directory changes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cancellable::Cancellable;
use crate::disk::{DiskId, LiveDisk};
use crate::error::{ErrorKind, SdiskError, SdiskResult};
use crate::event::{events_between, DiskEventSink};
use crate::volume::VolumeBackend;

/// Connection to the OS disk notification facility.
///
/// Opening delivers the currently mounted disks through
/// [`DiskEventSink::seed`] and every later change through
/// [`DiskEventSink::submit`]. Closing stops all callbacks.
#[async_trait]
pub trait DiskSession: Send {
    async fn open(&mut self, sink: Arc<dyn DiskEventSink>) -> SdiskResult<()>;

    async fn close(&mut self);
}

/// Polling [`DiskSession`] over a [`VolumeBackend`].
pub struct VolumeMonitor {
    backend: Arc<dyn VolumeBackend>,
    poll_interval: Duration,
    cancellable: Cancellable,
    watcher: Option<RecommendedWatcher>,
    handle: Option<JoinHandle<()>>,
}

impl VolumeMonitor {
    pub fn new(backend: Arc<dyn VolumeBackend>, poll_interval: Duration) -> Self {
        Self {
            backend,
            poll_interval,
            cancellable: Cancellable::new(),
            watcher: None,
            handle: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Watches the backend's volume roots. Any change only wakes the scanner,
    /// the scan itself decides what happened.
    fn watch_roots(&self, wake: mpsc::Sender<()>) -> Option<RecommendedWatcher> {
        let roots = self.backend.watch_roots();
        if roots.is_empty() {
            return None;
        }

        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) if matches!(event.kind, EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(_)) => {
                    // A full channel already holds a pending wakeup.
                    let _ = wake.try_send(());
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("volume root watch error: {e}"),
            }
        });
        let mut watcher = match watcher {
            Ok(watcher) => watcher,
            Err(e) => {
                tracing::warn!("cannot watch volume roots, polling only: {e}");
                return None;
            }
        };

        let mut watched = 0;
        for root in roots {
            match watcher.watch(root, RecursiveMode::NonRecursive) {
                Ok(()) => watched += 1,
                Err(e) => tracing::warn!(root = %root.display(), "cannot watch volume root: {e}"),
            }
        }
        (watched > 0).then_some(watcher)
    }
}

#[async_trait]
impl DiskSession for VolumeMonitor {
    async fn open(&mut self, sink: Arc<dyn DiskEventSink>) -> SdiskResult<()> {
        if self.is_open() {
            return Ok(());
        }
        self.cancellable = Cancellable::new();

        let initial = self.backend.enumerate(Some(&self.cancellable)).await.map_err(|e| {
            SdiskError::with_source(
                ErrorKind::SessionInit,
                "cannot list mounted volumes",
                Box::new(e),
            )
        })?;
        if !initial.complete {
            tracing::warn!("some mounted volumes could not be resolved");
        }
        let mut known: HashMap<DiskId, LiveDisk> = initial
            .disks
            .iter()
            .map(|disk| (disk.id.clone(), disk.clone()))
            .collect();
        tracing::info!(disks = known.len(), "volume monitor opened");
        sink.seed(initial.disks);

        let (wake_tx, mut wake) = mpsc::channel(1);
        self.watcher = self.watch_roots(wake_tx);

        let backend = self.backend.clone();
        let cancellable = self.cancellable.clone();
        let poll_interval = self.poll_interval;
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancellable.cancelled() => break,
                    _ = ticker.tick() => {}
                    Some(()) = wake.recv() => {}
                }

                let scan = match backend.enumerate(Some(&cancellable)).await {
                    Ok(scan) => scan,
                    Err(e) if e.kind() == ErrorKind::Cancelled => break,
                    Err(e) => {
                        tracing::warn!("volume scan failed: {e}");
                        continue;
                    }
                };

                let events = events_between(&known, &scan.disks, scan.complete, |disk| {
                    backend.device_present(disk)
                });
                if scan.complete {
                    known.clear();
                }
                known.extend(scan.disks.into_iter().map(|disk| (disk.id.clone(), disk)));
                for event in events {
                    sink.submit(event);
                }
            }
            tracing::debug!("volume monitor stopped");
        }));
        Ok(())
    }

    async fn close(&mut self) {
        self.cancellable.cancel();
        self.watcher = None;
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!("volume monitor task failed: {e}");
            }
        }
    }
}

impl Drop for VolumeMonitor {
    fn drop(&mut self) {
        self.cancellable.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
