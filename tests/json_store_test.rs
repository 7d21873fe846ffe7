use sdisk::backend::json::JsonStore;
use sdisk::{ConfiguredDisk, DiskId, DurableStore, ErrorKind, ScriptLanguage, Task, Trigger};

fn store_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("sdisk_json_{name}_{}", std::process::id()));
    if dir.exists() {
        std::fs::remove_dir_all(&dir).ok();
    }
    dir
}

fn disk(id: &str, name: &str) -> ConfiguredDisk {
    ConfiguredDisk {
        id: DiskId::new(id),
        name: name.into(),
        available_bytes: 400,
        total_bytes: 1000,
        icon: Some("drive-removable-media".into()),
    }
}

#[tokio::test]
async fn test_missing_store_loads_empty() {
    let store = JsonStore::new(store_dir("missing"));
    assert!(store.load_disks().await.unwrap().is_empty());
    assert!(store.load_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_store_keeps_disks_and_tasks() {
    let dir = store_dir("keep");
    let store = JsonStore::new(&dir);
    let disks = vec![disk("U1", "Backup"), disk("U2", "Photos")];
    let task = Task::new(DiskId::new("U1"), Trigger::Periodic, "rsync -a ~/Documents /Volumes/Backup", ScriptLanguage::Shell);

    store.save_disks(&disks).await.unwrap();
    store.save_tasks(std::slice::from_ref(&task)).await.unwrap();

    let reopened = JsonStore::new(&dir);
    assert_eq!(reopened.load_disks().await.unwrap(), disks);
    let tasks = reopened.load_tasks().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, task.id);
    assert_eq!(tasks[0].trigger, Trigger::Periodic);
    assert!(!dir.join(".disks.json.tmp").exists());

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_corrupt_store_is_a_persistence_error() {
    let dir = store_dir("corrupt");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("disks.json"), b"{ not json").unwrap();

    let err = JsonStore::new(&dir).load_disks().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Persistence);

    std::fs::remove_dir_all(&dir).ok();
}
