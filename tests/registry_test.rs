use std::path::PathBuf;

use sdisk::{ConfiguredDisk, DiskId, DiskState, ErrorKind, IdentityRegistry, LiveDisk};

fn live(id: &str) -> LiveDisk {
    LiveDisk {
        id: DiskId::new(id),
        name: format!("Volume {id}"),
        available_bytes: 400,
        total_bytes: 1000,
        icon: None,
        mount_path: PathBuf::from(format!("/Volumes/{id}")),
        device: Some(PathBuf::from(format!("/dev/disk-{id}"))),
    }
}

#[test]
fn test_registry_stays_consistent_under_random_operations() {
    let ids: Vec<String> = (0..8).map(|i| format!("U{i}")).collect();
    let mut registry = IdentityRegistry::new();
    let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;

    for _ in 0..4000 {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        let id = &ids[(seed % ids.len() as u64) as usize];
        let disk_id = DiskId::new(id);

        match (seed >> 8) % 6 {
            0 => {
                registry.insert_live(live(id));
                if registry.is_configured(&disk_id) {
                    let _ = registry.bind(&disk_id, &disk_id);
                }
            }
            1 => {
                registry.remove_live(&disk_id);
            }
            2 => {
                if registry.insert_configured(ConfiguredDisk::from_live(&live(id))).is_ok()
                    && registry.live(&disk_id).is_some()
                {
                    registry.bind(&disk_id, &disk_id).unwrap();
                }
            }
            3 => {
                registry.remove_configured(&disk_id);
            }
            4 => {
                registry.unbind(&disk_id);
                let _ = registry.bind(&disk_id, &disk_id);
            }
            _ => {
                let other = DiskId::new(&ids[((seed >> 16) % ids.len() as u64) as usize]);
                if other != disk_id {
                    let err = registry.bind(&disk_id, &other).unwrap_err();
                    assert_eq!(err.kind(), ErrorKind::InvalidArg);
                }
            }
        }

        assert!(registry.is_consistent());
        for bound in registry.bound_ids() {
            assert_eq!(registry.lookup_live(&bound).map(|d| &d.id), Some(&bound));
            assert_eq!(registry.lookup_configured(&bound).map(|d| &d.id), Some(&bound));
        }
    }
}

#[test]
fn test_rebinding_same_pair_is_accepted() {
    let mut registry = IdentityRegistry::new();
    let id = DiskId::new("U1");
    registry.insert_live(live("U1"));
    registry.insert_configured(ConfiguredDisk::from_live(&live("U1"))).unwrap();
    registry.bind(&id, &id).unwrap();
    registry.bind(&id, &id).unwrap();
    assert_eq!(registry.bound_ids().len(), 1);
}

#[test]
fn test_state_follows_lifecycle() {
    let mut registry = IdentityRegistry::new();
    let id = DiskId::new("U1");
    assert!(registry.state(&id).is_none());

    registry.insert_live(live("U1"));
    assert!(matches!(registry.state(&id), Some(DiskState::MountedUnconfigured(_))));

    registry.insert_configured(ConfiguredDisk::from_live(&live("U1"))).unwrap();
    registry.bind(&id, &id).unwrap();
    let state = registry.state(&id).unwrap();
    assert!(state.is_mounted() && state.is_configured());

    registry.remove_live(&id);
    assert!(matches!(registry.state(&id), Some(DiskState::Unmounted(_))));

    registry.remove_configured(&id);
    assert!(registry.state(&id).is_none());
}
