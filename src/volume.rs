use std::path::Path;

use async_trait::async_trait;

use crate::cancellable::Cancellable;
use crate::disk::LiveDisk;
use crate::error::SdiskResult;

/// Outcome of one enumeration pass.
///
/// `complete` is false when at least one external volume could not be
/// resolved and was skipped. The resolved disks are still valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enumeration {
    pub disks: Vec<LiveDisk>,
    pub complete: bool,
}

impl Enumeration {
    pub fn complete(disks: Vec<LiveDisk>) -> Self {
        Self {
            disks,
            complete: true,
        }
    }

    pub fn partial(disks: Vec<LiveDisk>) -> Self {
        Self {
            disks,
            complete: false,
        }
    }
}

/// Source of mounted external volumes.
#[async_trait]
pub trait VolumeBackend: Send + Sync {
    /// Lists mounted external volumes. Internal and system volumes are
    /// filtered out. Errors only when the OS cannot be queried at all.
    async fn enumerate(&self, cancellable: Option<&Cancellable>) -> SdiskResult<Enumeration>;

    /// Requests a forced unmount of `disk`.
    async fn unmount(&self, disk: &LiveDisk) -> SdiskResult<()>;

    /// Directories whose entries change when volumes come and go, if any.
    fn watch_roots(&self) -> Vec<&Path> {
        Vec::new()
    }

    /// Whether the device node backing `disk` still exists.
    fn device_present(&self, disk: &LiveDisk) -> bool {
        disk.device.as_deref().map_or(true, Path::exists)
    }
}
