//! Disk identity registry
//!
//! Tracks the live disks reported by the OS, the configured disks loaded from
//! the durable store, and the identity mapping between the two.

use std::collections::{BTreeMap, HashMap};

use crate::bimap::{BiMap, Conflict};
use crate::disk::{ConfiguredDisk, DiskId, DiskState, LiveDisk};
use crate::error::{ErrorKind, SdiskError, SdiskResult};

/// Live/configured disk bookkeeping.
///
/// A mapping entry exists iff a live disk and a configured disk with the same
/// id are both present. Removing either side removes the mapping with it.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    live: HashMap<DiskId, LiveDisk>,
    configured: BTreeMap<DiskId, ConfiguredDisk>,
    /// live id -> configured id
    mapping: BiMap<DiskId, DiskId>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a stored configuration. No live disks yet.
    pub fn with_configured(disks: impl IntoIterator<Item = ConfiguredDisk>) -> Self {
        let mut registry = Self::new();
        for disk in disks {
            registry.configured.entry(disk.id.clone()).or_insert(disk);
        }
        registry
    }

    /// Configured counterpart of a live disk, if bound.
    pub fn lookup_configured(&self, live_id: &DiskId) -> Option<&ConfiguredDisk> {
        let configured_id = self.mapping.get_by_left(live_id)?;
        self.configured.get(configured_id)
    }

    /// Live counterpart of a configured disk, if bound.
    pub fn lookup_live(&self, configured_id: &DiskId) -> Option<&LiveDisk> {
        let live_id = self.mapping.get_by_right(configured_id)?;
        self.live.get(live_id)
    }

    pub fn is_bound(&self, id: &DiskId) -> bool {
        self.mapping.contains_left(id) || self.mapping.contains_right(id)
    }

    /// Establishes the mapping between a live and a configured disk.
    ///
    /// Both records must be present and carry the same id. Conflicting binds
    /// leave the registry unchanged and report [`ErrorKind::BindConflict`].
    pub fn bind(&mut self, live_id: &DiskId, configured_id: &DiskId) -> SdiskResult<()> {
        if live_id != configured_id {
            return Err(SdiskError::new(
                ErrorKind::InvalidArg,
                format!("cannot bind live disk {live_id} to configured disk {configured_id}"),
            ));
        }
        if !self.live.contains_key(live_id) {
            return Err(SdiskError::new(
                ErrorKind::NotFound,
                format!("no live disk {live_id}"),
            ));
        }
        if !self.configured.contains_key(configured_id) {
            return Err(SdiskError::new(
                ErrorKind::NotFound,
                format!("no configured disk {configured_id}"),
            ));
        }

        self.mapping
            .insert(live_id.clone(), configured_id.clone())
            .map_err(|conflict| {
                let message = match conflict {
                    Conflict::Left(other) => {
                        format!("live disk {live_id} is already bound to {other}")
                    }
                    Conflict::Right(other) => {
                        format!("configured disk {configured_id} is already bound to {other}")
                    }
                };
                tracing::warn!("{message}");
                SdiskError::new(ErrorKind::BindConflict, message)
            })
    }

    /// Removes the mapping touching `id` on either side. Absent mappings are
    /// not an error.
    pub fn unbind(&mut self, id: &DiskId) -> bool {
        self.mapping.remove_by_left(id).is_some() || self.mapping.remove_by_right(id).is_some()
    }

    /// Inserts or replaces a live disk, returning the previous record.
    pub fn insert_live(&mut self, disk: LiveDisk) -> Option<LiveDisk> {
        self.live.insert(disk.id.clone(), disk)
    }

    /// Removes a live disk together with its mapping.
    pub fn remove_live(&mut self, id: &DiskId) -> Option<LiveDisk> {
        self.mapping.remove_by_left(id);
        self.live.remove(id)
    }

    pub fn live(&self, id: &DiskId) -> Option<&LiveDisk> {
        self.live.get(id)
    }

    pub fn live_disks(&self) -> Vec<LiveDisk> {
        let mut disks: Vec<_> = self.live.values().cloned().collect();
        disks.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        disks
    }

    /// Mounted disks that are not yet configured.
    pub fn unbound_live(&self) -> Vec<LiveDisk> {
        let mut disks: Vec<_> = self
            .live
            .values()
            .filter(|disk| !self.mapping.contains_left(&disk.id))
            .cloned()
            .collect();
        disks.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        disks
    }

    pub fn insert_configured(&mut self, disk: ConfiguredDisk) -> SdiskResult<()> {
        if self.configured.contains_key(&disk.id) {
            return Err(SdiskError::new(
                ErrorKind::Exists,
                format!("disk {} is already configured", disk.id),
            ));
        }
        self.configured.insert(disk.id.clone(), disk);
        Ok(())
    }

    /// Removes a configured disk together with its mapping.
    pub fn remove_configured(&mut self, id: &DiskId) -> Option<ConfiguredDisk> {
        self.mapping.remove_by_right(id);
        self.configured.remove(id)
    }

    pub fn clear_configured(&mut self) -> Vec<ConfiguredDisk> {
        self.mapping.clear();
        std::mem::take(&mut self.configured).into_values().collect()
    }

    pub fn configured(&self, id: &DiskId) -> Option<&ConfiguredDisk> {
        self.configured.get(id)
    }

    pub fn is_configured(&self, id: &DiskId) -> bool {
        self.configured.contains_key(id)
    }

    pub fn configured_disks(&self) -> Vec<ConfiguredDisk> {
        self.configured.values().cloned().collect()
    }

    /// Copies the live description into the bound configured record.
    /// Returns whether the configured record changed.
    pub fn refresh_configured(&mut self, live_id: &DiskId) -> bool {
        let Some(configured_id) = self.mapping.get_by_left(live_id) else {
            return false;
        };
        let (Some(live), Some(configured)) =
            (self.live.get(live_id), self.configured.get_mut(configured_id))
        else {
            return false;
        };
        configured.update_from(live)
    }

    /// Binds every live disk that has a configured counterpart.
    pub fn bind_all_matching(&mut self) -> usize {
        let matching: Vec<DiskId> = self
            .live
            .keys()
            .filter(|id| self.configured.contains_key(*id) && !self.mapping.contains_left(*id))
            .cloned()
            .collect();
        matching
            .iter()
            .filter(|id| self.bind(id, id).is_ok())
            .count()
    }

    pub fn state(&self, id: &DiskId) -> Option<DiskState> {
        match (self.live.get(id), self.configured.get(id)) {
            (Some(live), Some(configured)) if self.mapping.contains_left(id) => {
                Some(DiskState::MountedConfigured {
                    live: live.clone(),
                    configured: configured.clone(),
                })
            }
            (Some(live), _) => Some(DiskState::MountedUnconfigured(live.clone())),
            (None, Some(configured)) => Some(DiskState::Unmounted(configured.clone())),
            (None, None) => None,
        }
    }

    /// Ids that are both mounted and configured.
    pub fn bound_ids(&self) -> Vec<DiskId> {
        self.mapping.iter().map(|(_, configured)| configured.clone()).collect()
    }

    /// Verifies the mapping invariant against the live and configured sets.
    pub fn is_consistent(&self) -> bool {
        if !self.mapping.is_consistent() {
            return false;
        }
        let mapped_ok = self.mapping.iter().all(|(live, configured)| {
            live == configured && self.live.contains_key(live) && self.configured.contains_key(configured)
        });
        let complete = self
            .live
            .keys()
            .filter(|id| self.configured.contains_key(*id))
            .all(|id| self.mapping.contains_left(id));
        mapped_ok && complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn live(id: &str, name: &str) -> LiveDisk {
        LiveDisk {
            id: DiskId::new(id),
            name: name.into(),
            available_bytes: 400,
            total_bytes: 1000,
            icon: None,
            mount_path: PathBuf::from(format!("/Volumes/{name}")),
            device: None,
        }
    }

    #[test]
    fn unconfigured_disk_is_unbound() {
        let mut registry = IdentityRegistry::new();
        registry.insert_live(live("U1", "Backup"));
        assert_eq!(registry.unbound_live().len(), 1);
        assert!(registry.configured_disks().is_empty());
        assert!(registry.is_consistent());
    }

    #[test]
    fn bind_requires_both_sides() {
        let mut registry = IdentityRegistry::new();
        let id = DiskId::new("U1");
        assert_eq!(registry.bind(&id, &id).unwrap_err().kind(), ErrorKind::NotFound);
        registry.insert_live(live("U1", "Backup"));
        assert_eq!(registry.bind(&id, &id).unwrap_err().kind(), ErrorKind::NotFound);
        registry
            .insert_configured(ConfiguredDisk::from_live(&live("U1", "Backup")))
            .unwrap();
        registry.bind(&id, &id).unwrap();
        assert!(registry.unbound_live().is_empty());
        assert_eq!(registry.lookup_live(&id).map(|d| d.name.as_str()), Some("Backup"));
        assert!(registry.is_consistent());
    }

    #[test]
    fn mismatched_ids_cannot_bind() {
        let mut registry = IdentityRegistry::new();
        registry.insert_live(live("U1", "A"));
        registry
            .insert_configured(ConfiguredDisk::from_live(&live("U2", "B")))
            .unwrap();
        let err = registry.bind(&DiskId::new("U1"), &DiskId::new("U2")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArg);
        assert!(!registry.is_bound(&DiskId::new("U1")));
    }

    #[test]
    fn removing_live_disk_drops_mapping_only() {
        let mut registry = IdentityRegistry::new();
        let id = DiskId::new("U1");
        registry.insert_live(live("U1", "Backup"));
        registry
            .insert_configured(ConfiguredDisk::from_live(&live("U1", "Backup")))
            .unwrap();
        registry.bind(&id, &id).unwrap();

        registry.remove_live(&id);
        assert!(!registry.is_bound(&id));
        let configured = registry.configured(&id).unwrap();
        assert_eq!(configured.available_bytes, 400);
        assert_eq!(configured.total_bytes, 1000);
        assert!(matches!(registry.state(&id), Some(DiskState::Unmounted(_))));
        assert!(registry.is_consistent());
    }

    #[test]
    fn refresh_copies_live_description() {
        let mut registry = IdentityRegistry::new();
        let id = DiskId::new("U1");
        registry.insert_live(live("U1", "Backup"));
        registry
            .insert_configured(ConfiguredDisk::from_live(&live("U1", "Backup")))
            .unwrap();
        registry.bind(&id, &id).unwrap();

        let mut renamed = live("U1", "Archive");
        renamed.available_bytes = 10;
        registry.insert_live(renamed);
        assert!(registry.refresh_configured(&id));
        let configured = registry.configured(&id).unwrap();
        assert_eq!(configured.name, "Archive");
        assert_eq!(configured.available_bytes, 10);
    }

    #[test]
    fn bind_all_matching_binds_only_configured() {
        let mut registry =
            IdentityRegistry::with_configured([ConfiguredDisk::from_live(&live("U1", "A"))]);
        registry.insert_live(live("U1", "A"));
        registry.insert_live(live("U2", "B"));
        assert_eq!(registry.bind_all_matching(), 1);
        assert_eq!(registry.unbound_live().len(), 1);
        assert_eq!(registry.bound_ids(), vec![DiskId::new("U1")]);
        assert!(registry.is_consistent());
    }

    #[test]
    fn unbind_is_idempotent() {
        let mut registry = IdentityRegistry::new();
        assert!(!registry.unbind(&DiskId::new("missing")));
    }
}
