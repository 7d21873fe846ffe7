//! Mount-table volume backend
//!
//! Reads the system mount table, keeps the mounts that live below one of the
//! configured volume roots, and resolves each one into a [`LiveDisk`].
//! On macOS the table comes from `getfsstat(2)` and volume UUIDs from
//! `diskutil`; elsewhere from `/proc/self/mountinfo` and `/dev/disk/by-uuid`.

use std::ffi::CString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::cancellable::Cancellable;
use crate::disk::{DiskId, LiveDisk};
use crate::error::{ErrorKind, SdiskError, SdiskResult};
use crate::volume::{Enumeration, VolumeBackend};

/// One row of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
}

pub struct MountBackend {
    roots: Vec<PathBuf>,
}

impl MountBackend {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

#[async_trait]
impl VolumeBackend for MountBackend {
    async fn enumerate(&self, cancellable: Option<&Cancellable>) -> SdiskResult<Enumeration> {
        if let Some(c) = cancellable {
            c.check()?;
        }

        let roots = self.roots.clone();
        let enumeration = tokio::task::spawn_blocking(move || scan(&roots))
            .await
            .map_err(|e| SdiskError::new(ErrorKind::Failed, format!("Join error: {}", e)))??;

        if let Some(c) = cancellable {
            c.check()?;
        }
        Ok(enumeration)
    }

    async fn unmount(&self, disk: &LiveDisk) -> SdiskResult<()> {
        let mut command = unmount_command(&disk.mount_path);
        let output = command.output().await.map_err(|e| {
            SdiskError::with_source(
                ErrorKind::Failed,
                format!("could not run unmount for {}", disk.mount_path.display()),
                Box::new(e),
            )
        })?;

        if output.status.success() {
            tracing::info!(disk = %disk.id, path = %disk.mount_path.display(), "unmounted");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(SdiskError::new(
                ErrorKind::Failed,
                format!("unmount of {} failed: {}", disk.mount_path.display(), stderr),
            ))
        }
    }

    fn watch_roots(&self) -> Vec<&Path> {
        self.roots
            .iter()
            .filter(|root| root.is_dir())
            .map(PathBuf::as_path)
            .collect()
    }
}

#[cfg(target_os = "macos")]
fn unmount_command(path: &Path) -> Command {
    let mut command = Command::new("diskutil");
    command.arg("unmount").arg("force").arg(path);
    command
}

#[cfg(not(target_os = "macos"))]
fn unmount_command(path: &Path) -> Command {
    let mut command = Command::new("umount");
    command.arg(path);
    command
}

/// True when `mount_point` sits strictly below one of `roots`.
pub fn is_external(mount_point: &Path, roots: &[PathBuf]) -> bool {
    roots
        .iter()
        .any(|root| mount_point != root && mount_point.starts_with(root))
}

fn scan(roots: &[PathBuf]) -> SdiskResult<Enumeration> {
    let entries = read_mounts().map_err(|e| {
        SdiskError::with_source(ErrorKind::Enumeration, "could not read mount table", Box::new(e))
    })?;

    let mut disks = Vec::new();
    let mut complete = true;
    for entry in entries {
        if !is_external(&entry.mount_point, roots) {
            continue;
        }
        match resolve(&entry) {
            Ok(disk) => disks.push(disk),
            Err(e) => {
                tracing::warn!(path = %entry.mount_point.display(), "skipping volume: {e}");
                complete = false;
            }
        }
    }

    Ok(Enumeration { disks, complete })
}

fn resolve(entry: &MountEntry) -> SdiskResult<LiveDisk> {
    let name = entry
        .mount_point
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| SdiskError::new(ErrorKind::Enumeration, "volume has no name"))?;
    let uuid = volume_uuid(entry).ok_or_else(|| {
        SdiskError::new(ErrorKind::Enumeration, format!("no volume UUID for {}", entry.device))
    })?;
    let (available_bytes, total_bytes) = capacity(&entry.mount_point)?;

    Ok(LiveDisk {
        id: DiskId::new(uuid),
        name,
        available_bytes,
        total_bytes,
        icon: volume_icon(&entry.mount_point),
        mount_path: entry.mount_point.clone(),
        device: entry
            .device
            .starts_with("/dev/")
            .then(|| PathBuf::from(&entry.device)),
    })
}

fn capacity(path: &Path) -> SdiskResult<(u64, u64)> {
    let c_path = CString::new(path.as_os_str().to_string_lossy().as_bytes()).map_err(|_| {
        SdiskError::new(ErrorKind::Enumeration, format!("invalid path {}", path.display()))
    })?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(SdiskError::with_source(
            ErrorKind::Enumeration,
            format!("statvfs failed for {}", path.display()),
            Box::new(std::io::Error::last_os_error()),
        ));
    }
    let fragment = stat.f_frsize as u64;
    let available = (stat.f_bavail as u64).saturating_mul(fragment);
    let total = (stat.f_blocks as u64).saturating_mul(fragment);
    Ok((available, total))
}

#[cfg(target_os = "macos")]
fn volume_icon(mount_point: &Path) -> Option<String> {
    let custom = mount_point.join(".VolumeIcon.icns");
    if custom.exists() {
        Some(custom.to_string_lossy().into_owned())
    } else {
        Some("com.apple.disk-image".to_string())
    }
}

#[cfg(not(target_os = "macos"))]
fn volume_icon(_mount_point: &Path) -> Option<String> {
    Some("drive-removable-media".to_string())
}

#[cfg(target_os = "macos")]
fn read_mounts() -> std::io::Result<Vec<MountEntry>> {
    use libc::{getfsstat, statfs, MNT_NOWAIT};
    use std::ffi::CStr;
    use std::mem::size_of;
    use std::ptr;

    let count = unsafe { getfsstat(ptr::null_mut(), 0, MNT_NOWAIT) };
    if count < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let mut buf = vec![unsafe { std::mem::zeroed::<statfs>() }; count as usize];
    let res = unsafe {
        getfsstat(
            buf.as_mut_ptr(),
            (buf.len() * size_of::<statfs>()) as i32,
            MNT_NOWAIT,
        )
    };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let entries = buf
        .into_iter()
        .take(res as usize)
        .map(|entry| {
            let text = |raw: &[libc::c_char]| {
                unsafe { CStr::from_ptr(raw.as_ptr()) }
                    .to_string_lossy()
                    .into_owned()
            };
            MountEntry {
                device: text(&entry.f_mntfromname),
                mount_point: PathBuf::from(text(&entry.f_mntonname)),
                fs_type: text(&entry.f_fstypename),
            }
        })
        .collect();
    Ok(entries)
}

#[cfg(not(target_os = "macos"))]
fn read_mounts() -> std::io::Result<Vec<MountEntry>> {
    let data = std::fs::read_to_string("/proc/self/mountinfo")?;
    Ok(parse_mountinfo(&data))
}

/// Parses `/proc/self/mountinfo`. Malformed lines are skipped.
pub fn parse_mountinfo(data: &str) -> Vec<MountEntry> {
    data.lines()
        .filter_map(|line| {
            let (left, right) = line.split_once(" - ")?;
            let mount_point = left.split_whitespace().nth(4)?;
            let mut right = right.split_whitespace();
            let fs_type = right.next()?;
            let device = right.next()?;
            Some(MountEntry {
                device: unescape_octal(device),
                mount_point: PathBuf::from(unescape_octal(mount_point)),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}

/// Decodes the `\040`-style escapes the kernel uses for spaces and tabs.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 8).ok());
            if let Some(value) = decoded {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(target_os = "macos")]
fn volume_uuid(entry: &MountEntry) -> Option<String> {
    let output = std::process::Command::new("diskutil")
        .arg("info")
        .arg(&entry.mount_point)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_diskutil_uuid(&String::from_utf8_lossy(&output.stdout))
}

#[cfg(not(target_os = "macos"))]
fn volume_uuid(entry: &MountEntry) -> Option<String> {
    let device = std::fs::canonicalize(&entry.device).ok()?;
    std::fs::read_dir("/dev/disk/by-uuid")
        .ok()?
        .filter_map(Result::ok)
        .find(|link| std::fs::canonicalize(link.path()).ok().as_deref() == Some(device.as_path()))
        .map(|link| link.file_name().to_string_lossy().into_owned())
}

/// Extracts the `Volume UUID:` value from `diskutil info` output.
pub fn parse_diskutil_uuid(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (key, value) = line.trim().split_once(':')?;
        (key.trim() == "Volume UUID")
            .then(|| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_means_strictly_below_a_root() {
        let roots = vec![PathBuf::from("/Volumes")];
        assert!(is_external(Path::new("/Volumes/Backup"), &roots));
        assert!(!is_external(Path::new("/Volumes"), &roots));
        assert!(!is_external(Path::new("/"), &roots));
        assert!(!is_external(Path::new("/VolumesX/Backup"), &roots));
    }

    #[test]
    fn mountinfo_lines_are_parsed() {
        let data = "\
36 35 98:0 / / rw,noatime master:1 - ext4 /dev/root rw,errors=continue
97 36 8:17 / /media/user/My\\040Disk rw,nosuid shared:50 - vfat /dev/sdb1 rw
garbage line
";
        let entries = parse_mountinfo(data);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].mount_point, PathBuf::from("/media/user/My Disk"));
        assert_eq!(entries[1].device, "/dev/sdb1");
        assert_eq!(entries[1].fs_type, "vfat");
    }

    #[test]
    fn diskutil_uuid_is_extracted() {
        let output = "   Device Identifier:         disk4s1\n   Volume Name:               Backup\n   Volume UUID:               0A81F3B1-51D9-3335-B3E3-169C3640360D\n";
        assert_eq!(
            parse_diskutil_uuid(output).as_deref(),
            Some("0A81F3B1-51D9-3335-B3E3-169C3640360D")
        );
        assert_eq!(parse_diskutil_uuid("Volume Name: X"), None);
    }
}
