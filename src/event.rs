//! Disk events
//!
//! [`DiskEvent`]s flow from a disk session into the engine; [`DiskStateChange`]
//! notifications flow from the engine out to subscribers.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::disk::{DiskId, LiveDisk};

/// Normalized OS disk arbitration callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskEvent {
    /// A volume is about to mount.
    MountRequested(LiveDisk),
    /// A volume is about to unmount cooperatively.
    UnmountRequested(LiveDisk),
    /// Name, capacity or icon of a mounted volume changed.
    DescriptionChanged(LiveDisk),
    /// The device vanished without an unmount (e.g. cable pulled).
    Disappeared(LiveDisk),
}

impl DiskEvent {
    pub fn disk(&self) -> &LiveDisk {
        match self {
            DiskEvent::MountRequested(disk)
            | DiskEvent::UnmountRequested(disk)
            | DiskEvent::DescriptionChanged(disk)
            | DiskEvent::Disappeared(disk) => disk,
        }
    }

    pub fn kind(&self) -> DiskStateKind {
        match self {
            DiskEvent::MountRequested(_) => DiskStateKind::Mounted,
            DiskEvent::UnmountRequested(_) => DiskStateKind::Unmounted,
            DiskEvent::DescriptionChanged(_) => DiskStateKind::Changed,
            DiskEvent::Disappeared(_) => DiskStateKind::Disappeared,
        }
    }
}

/// Kind of state change reported to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiskStateKind {
    Mounted,
    Unmounted,
    Changed,
    Disappeared,
    /// Configured set edited by the user (add, remove, clear).
    Configured,
    /// A bulk eject began.
    EjectStarted,
    /// A bulk eject finished.
    EjectFinished,
}

impl DiskStateKind {
    pub(crate) fn flag(self) -> PendingKinds {
        match self {
            DiskStateKind::Mounted => PendingKinds::MOUNTED,
            DiskStateKind::Unmounted => PendingKinds::UNMOUNTED,
            DiskStateKind::Changed => PendingKinds::CHANGED,
            DiskStateKind::Disappeared => PendingKinds::DISAPPEARED,
            DiskStateKind::Configured => PendingKinds::CONFIGURED,
            DiskStateKind::EjectStarted => PendingKinds::EJECT_STARTED,
            DiskStateKind::EjectFinished => PendingKinds::EJECT_FINISHED,
        }
    }
}

bitflags! {
    /// Notification kinds with a delivery scheduled.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub(crate) struct PendingKinds: u8 {
        const MOUNTED = 1;
        const UNMOUNTED = 1 << 1;
        const CHANGED = 1 << 2;
        const DISAPPEARED = 1 << 3;
        const CONFIGURED = 1 << 4;
        const EJECT_STARTED = 1 << 5;
        const EJECT_FINISHED = 1 << 6;
    }
}

/// Notification delivered to subscribers.
///
/// Events of one kind that arrive within the coalescing window fold into a
/// single notification. Subscribers should re-read engine state rather than
/// rely on the ids carried here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskStateChange {
    pub kind: DiskStateKind,
    /// Disk of the most recent folded event. The ids of earlier events in
    /// the same window are dropped, so this is not the set of changed disks.
    pub disk: Option<DiskId>,
    /// Number of events this notification stands for.
    pub coalesced: usize,
}

/// Receiver of normalized disk events. Implemented by the engine handle so a
/// session, or a test, can feed it events through ordinary method calls.
pub trait DiskEventSink: Send + Sync {
    /// Queues `event`. Must not block: callers may be OS callbacks.
    fn submit(&self, event: DiskEvent);

    /// Reports the disks already mounted when a session opens. These are not
    /// lifecycle transitions and run no tasks.
    fn seed(&self, disks: Vec<LiveDisk>);
}

/// Events that turn the `previous` set of mounted disks into `current`.
///
/// Disks missing from a partial enumeration are kept rather than reported
/// as gone. `present` tells a cooperative unmount from a vanished device.
pub fn events_between(
    previous: &HashMap<DiskId, LiveDisk>,
    current: &[LiveDisk],
    complete: bool,
    present: impl Fn(&LiveDisk) -> bool,
) -> Vec<DiskEvent> {
    let mut events = Vec::new();

    if complete {
        let mut gone: Vec<&LiveDisk> = previous
            .values()
            .filter(|old| !current.iter().any(|disk| disk.id == old.id))
            .collect();
        gone.sort_by(|a, b| a.id.cmp(&b.id));
        events.extend(gone.into_iter().map(|disk| {
            if present(disk) {
                DiskEvent::UnmountRequested(disk.clone())
            } else {
                DiskEvent::Disappeared(disk.clone())
            }
        }));
    }

    for disk in current {
        match previous.get(&disk.id) {
            None => events.push(DiskEvent::MountRequested(disk.clone())),
            Some(old) if old.description_differs(disk) => {
                events.push(DiskEvent::DescriptionChanged(disk.clone()))
            }
            Some(_) => {}
        }
    }
    events
}
