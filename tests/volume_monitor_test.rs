use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sdisk::service::volumemonitor::{DiskSession, VolumeMonitor};
use sdisk::{
    Cancellable, DiskEvent, DiskEventSink, DiskId, Enumeration, ErrorKind, LiveDisk, SdiskError,
    SdiskResult, VolumeBackend,
};

#[derive(Default)]
struct MockBackend {
    disks: Mutex<Vec<LiveDisk>>,
    unavailable: Mutex<bool>,
    gone_devices: Mutex<Vec<DiskId>>,
}

#[async_trait]
impl VolumeBackend for MockBackend {
    async fn enumerate(&self, _cancellable: Option<&Cancellable>) -> SdiskResult<Enumeration> {
        if *self.unavailable.lock().unwrap() {
            return Err(SdiskError::new(ErrorKind::Enumeration, "no mount table"));
        }
        Ok(Enumeration::complete(self.disks.lock().unwrap().clone()))
    }

    async fn unmount(&self, _disk: &LiveDisk) -> SdiskResult<()> {
        Ok(())
    }

    fn device_present(&self, disk: &LiveDisk) -> bool {
        !self.gone_devices.lock().unwrap().contains(&disk.id)
    }
}

#[derive(Default)]
struct CollectingSink {
    seeded: Mutex<Vec<LiveDisk>>,
    events: Mutex<Vec<DiskEvent>>,
}

impl DiskEventSink for CollectingSink {
    fn submit(&self, event: DiskEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn seed(&self, disks: Vec<LiveDisk>) {
        self.seeded.lock().unwrap().extend(disks);
    }
}

fn live(id: &str, free: u64) -> LiveDisk {
    LiveDisk {
        id: DiskId::new(id),
        name: id.to_string(),
        available_bytes: free,
        total_bytes: 1000,
        icon: None,
        mount_path: PathBuf::from(format!("/Volumes/{id}")),
        device: None,
    }
}

async fn wait_for_events(sink: &CollectingSink, count: usize) -> Vec<DiskEvent> {
    for _ in 0..100 {
        {
            let events = sink.events.lock().unwrap();
            if events.len() >= count {
                return events.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    sink.events.lock().unwrap().clone()
}

#[tokio::test]
async fn test_monitor_seeds_then_reports_changes() {
    let backend = Arc::new(MockBackend::default());
    backend.disks.lock().unwrap().extend([live("A", 1), live("B", 1)]);
    let sink = Arc::new(CollectingSink::default());

    let mut monitor = VolumeMonitor::new(backend.clone(), Duration::from_millis(20));
    monitor.open(sink.clone()).await.unwrap();
    assert!(monitor.is_open());
    assert_eq!(sink.seeded.lock().unwrap().len(), 2);

    {
        let mut disks = backend.disks.lock().unwrap();
        disks.retain(|d| d.id != DiskId::new("A"));
        disks[0].available_bytes = 5;
        disks.push(live("C", 1));
    }
    backend.gone_devices.lock().unwrap().push(DiskId::new("A"));

    let events = wait_for_events(&sink, 3).await;
    monitor.close().await;
    assert!(!monitor.is_open());

    assert_eq!(
        events,
        vec![
            DiskEvent::Disappeared(live("A", 1)),
            DiskEvent::DescriptionChanged(live("B", 5)),
            DiskEvent::MountRequested(live("C", 1)),
        ]
    );
}

#[tokio::test]
async fn test_monitor_open_fails_without_backend() {
    let backend = Arc::new(MockBackend::default());
    *backend.unavailable.lock().unwrap() = true;
    let sink = Arc::new(CollectingSink::default());

    let mut monitor = VolumeMonitor::new(backend, Duration::from_millis(20));
    let err = monitor.open(sink).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionInit);
    assert!(!monitor.is_open());
}

#[tokio::test]
async fn test_closed_monitor_stops_reporting() {
    let backend = Arc::new(MockBackend::default());
    let sink = Arc::new(CollectingSink::default());
    let mut monitor = VolumeMonitor::new(backend.clone(), Duration::from_millis(10));
    monitor.open(sink.clone()).await.unwrap();
    monitor.close().await;

    backend.disks.lock().unwrap().push(live("A", 1));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sink.events.lock().unwrap().is_empty());
}
