//! Disk records
//!
//! A [`LiveDisk`] is what the operating system reports right now; a
//! [`ConfiguredDisk`] is what the user registered for automation. The two are
//! joined only through their [`DiskId`], the volume UUID.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Stable volume identifier (volume UUID).
///
/// Display names and mount paths change and collide; this does not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiskId(String);

impl DiskId {
    /// Normalizes to upper case so UUIDs from different tools compare equal.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DiskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DiskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A currently mounted external volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveDisk {
    pub id: DiskId,
    pub name: String,
    pub available_bytes: u64,
    pub total_bytes: u64,
    /// Icon reference (bundle icon path or themed icon name).
    pub icon: Option<String>,
    pub mount_path: PathBuf,
    /// Backing device node, when known. Used to tell a cooperative unmount
    /// from a device that vanished.
    pub device: Option<PathBuf>,
}

impl LiveDisk {
    /// True when any field the user can see differs from `other`.
    pub fn description_differs(&self, other: &LiveDisk) -> bool {
        self.name != other.name
            || self.available_bytes != other.available_bytes
            || self.total_bytes != other.total_bytes
            || self.icon != other.icon
            || self.mount_path != other.mount_path
    }
}

/// A user-registered automation target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfiguredDisk {
    pub id: DiskId,
    /// Last known name, shown while the disk is unmounted.
    pub name: String,
    pub available_bytes: u64,
    pub total_bytes: u64,
    pub icon: Option<String>,
}

impl ConfiguredDisk {
    pub fn from_live(live: &LiveDisk) -> Self {
        Self {
            id: live.id.clone(),
            name: live.name.clone(),
            available_bytes: live.available_bytes,
            total_bytes: live.total_bytes,
            icon: live.icon.clone(),
        }
    }

    /// Copies the displayable description of `live` into this record.
    /// Returns whether anything changed.
    pub fn update_from(&mut self, live: &LiveDisk) -> bool {
        if self.id != live.id {
            return false;
        }
        let updated = Self::from_live(live);
        if *self == updated {
            return false;
        }
        *self = updated;
        true
    }
}

/// Reconciled state of one stable id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskState {
    Unmounted(ConfiguredDisk),
    MountedUnconfigured(LiveDisk),
    MountedConfigured {
        live: LiveDisk,
        configured: ConfiguredDisk,
    },
}

impl DiskState {
    pub fn id(&self) -> &DiskId {
        match self {
            DiskState::Unmounted(configured) => &configured.id,
            DiskState::MountedUnconfigured(live) => &live.id,
            DiskState::MountedConfigured { live, .. } => &live.id,
        }
    }

    pub fn is_mounted(&self) -> bool {
        !matches!(self, DiskState::Unmounted(_))
    }

    pub fn is_configured(&self) -> bool {
        !matches!(self, DiskState::MountedUnconfigured(_))
    }
}

const TIERS: [&str; 6] = ["bytes", "KB", "MB", "GB", "TB", "PB"];

fn scale(bytes: u64) -> (f64, &'static str) {
    let mut value = bytes as f64;
    let mut tier = 0;
    while value > 999.0 && tier < TIERS.len() - 1 {
        value /= 1000.0;
        tier += 1;
    }
    (value, TIERS[tier])
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Human readable free-space summary, e.g. `"400.0 bytes of 1.0 KB free"` or
/// `"1.5 of 2.0 TB free"` when both values share a unit.
pub fn capacity_string(available: u64, total: u64) -> String {
    let (avail, avail_unit) = scale(available);
    let (total, total_unit) = scale(total);
    if avail_unit == total_unit {
        format!("{:.1} of {:.1} {} free", round_tenth(avail), round_tenth(total), total_unit)
    } else {
        format!(
            "{:.1} {} of {:.1} {} free",
            round_tenth(avail),
            avail_unit,
            round_tenth(total),
            total_unit
        )
    }
}
