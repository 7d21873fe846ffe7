//! Bulk eject
//!
//! Unmounts every visible external disk and reports once all of them have
//! either unmounted or failed. While a batch is active the engine keeps
//! unmount notifications for its members to itself.

use std::collections::HashSet;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::oneshot;

use crate::disk::DiskId;
use crate::error::{ErrorKind, SdiskError, SdiskResult};
use crate::event::{DiskEvent, DiskEventSink, DiskStateKind};
use crate::service::engine::EngineHandle;

/// Final outcome of a bulk eject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EjectReport {
    /// True when every disk unmounted.
    pub all_complete: bool,
    pub ejected: Vec<DiskId>,
    pub failed: Vec<(DiskId, String)>,
}

/// Counter state of the batch in progress.
#[derive(Debug, Default)]
pub struct PendingUnmountBatch {
    pub outstanding: usize,
    pub active: bool,
    members: HashSet<DiskId>,
    report: EjectReport,
    done: Option<oneshot::Sender<EjectReport>>,
}

/// What completing a member did to the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    NotMember,
    Counted,
    Finished,
}

impl PendingUnmountBatch {
    pub fn is_member(&self, id: &DiskId) -> bool {
        self.active && self.members.contains(id)
    }

    fn begin(&mut self) -> SdiskResult<()> {
        if self.active {
            return Err(SdiskError::new(
                ErrorKind::Failed,
                "a bulk eject is already in progress",
            ));
        }
        *self = Self {
            active: true,
            ..Self::default()
        };
        Ok(())
    }

    fn arm(&mut self, ids: impl IntoIterator<Item = DiskId>, done: oneshot::Sender<EjectReport>) {
        self.members = ids.into_iter().collect();
        self.outstanding = self.members.len();
        self.done = Some(done);
    }

    fn abort(&mut self) {
        *self = Self::default();
    }

    /// Counts one member as finished, successfully or with `failure`.
    /// The last member resets the batch and delivers the report.
    pub fn complete(&mut self, id: &DiskId, failure: Option<String>) -> Completion {
        if !self.active || !self.members.remove(id) {
            return Completion::NotMember;
        }
        self.outstanding -= 1;
        match failure {
            None => self.report.ejected.push(id.clone()),
            Some(reason) => self.report.failed.push((id.clone(), reason)),
        }
        if self.outstanding > 0 {
            return Completion::Counted;
        }

        self.active = false;
        let mut report = std::mem::take(&mut self.report);
        report.all_complete = report.failed.is_empty();
        if let Some(done) = self.done.take() {
            let _ = done.send(report);
        }
        Completion::Finished
    }

    /// Ends the batch early, marking every remaining member as failed.
    fn expire(&mut self, reason: &str) -> Option<EjectReport> {
        if !self.active {
            return None;
        }
        let mut report = std::mem::take(&mut self.report);
        report
            .failed
            .extend(self.members.drain().map(|id| (id, reason.to_string())));
        report.all_complete = false;
        *self = Self::default();
        Some(report)
    }
}

/// Holds the engine's batch for the duration of one `eject_all` call.
/// Dropping it while still held resets the batch and reports
/// `EjectFinished`, so a cancelled eject does not block later ones.
struct HeldBatch<'a> {
    engine: &'a EngineHandle,
    held: bool,
}

impl<'a> HeldBatch<'a> {
    fn begin(engine: &'a EngineHandle) -> SdiskResult<Self> {
        engine.with_batch(|batch| batch.begin())?;
        engine.notify(DiskStateKind::EjectStarted, None);
        Ok(Self { engine, held: true })
    }

    /// The batch was reset by its last member or by the timeout.
    fn finished(mut self) {
        self.held = false;
    }
}

impl Drop for HeldBatch<'_> {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        self.engine.with_batch(PendingUnmountBatch::abort);
        self.engine.notify(DiskStateKind::EjectFinished, None);
    }
}

pub(crate) async fn eject_all(engine: &EngineHandle) -> SdiskResult<EjectReport> {
    let held = HeldBatch::begin(engine)?;

    let enumeration = match engine.backend().enumerate(None).await {
        Ok(enumeration) => enumeration,
        Err(e) => {
            tracing::warn!("bulk eject aborted: {e}");
            return Err(e);
        }
    };
    if !enumeration.complete {
        tracing::warn!(
            resolved = enumeration.disks.len(),
            "bulk eject aborted: volume enumeration was incomplete"
        );
        return Err(SdiskError::new(
            ErrorKind::Enumeration,
            "could not enumerate every mounted volume",
        ));
    }

    if enumeration.disks.is_empty() {
        tracing::info!("bulk eject: no disks to eject");
        return Ok(EjectReport {
            all_complete: true,
            ..EjectReport::default()
        });
    }

    let (done, finished) = oneshot::channel();
    let disks = enumeration.disks;
    engine.with_batch(|batch| batch.arm(disks.iter().map(|disk| disk.id.clone()), done));
    tracing::info!(count = disks.len(), "bulk eject started");

    let backend = engine.backend();
    let mut unmounts: FuturesUnordered<_> = disks
        .iter()
        .map(|disk| {
            let backend = backend.clone();
            async move { (disk, backend.unmount(disk).await) }
        })
        .collect();

    let drive = async {
        while let Some((disk, result)) = unmounts.next().await {
            match result {
                // The engine counts the member when it handles the event.
                Ok(()) => engine.submit(DiskEvent::UnmountRequested(disk.clone())),
                Err(e) => {
                    tracing::warn!(disk = %disk.id, "eject failed: {e}");
                    let completion = engine.with_batch(|batch| batch.complete(&disk.id, Some(e.to_string())));
                    if completion == Completion::Finished {
                        engine.notify(DiskStateKind::EjectFinished, None);
                    }
                }
            }
        }
        finished.await.ok()
    };

    let report = match engine.options().eject_timeout {
        Some(limit) => match tokio::time::timeout(limit, drive).await {
            Ok(report) => report,
            Err(_) => {
                let report = engine.with_batch(|batch| batch.expire("timed out"));
                if report.is_some() {
                    engine.notify(DiskStateKind::EjectFinished, None);
                }
                report
            }
        },
        None => drive.await,
    };
    held.finished();

    let report = report.ok_or_else(|| {
        SdiskError::new(ErrorKind::Failed, "bulk eject ended without a report")
    })?;
    tracing::info!(
        ejected = report.ejected.len(),
        failed = report.failed.len(),
        "bulk eject finished"
    );
    Ok(report)
}
