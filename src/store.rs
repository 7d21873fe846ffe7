//! Durable store
//!
//! Configured disks and tasks are persisted through a [`DurableStore`].
//! Commits are funnelled through a single [`StoreWriter`] task so snapshots
//! reach the store in the order they were taken.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::disk::ConfiguredDisk;
use crate::error::{ErrorKind, SdiskError, SdiskResult};
use crate::task::Task;

#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn load_disks(&self) -> SdiskResult<Vec<ConfiguredDisk>>;

    async fn load_tasks(&self) -> SdiskResult<Vec<Task>>;

    async fn save_disks(&self, disks: &[ConfiguredDisk]) -> SdiskResult<()>;

    async fn save_tasks(&self, tasks: &[Task]) -> SdiskResult<()>;
}

/// In-memory store. Commits can be made to fail on demand.
#[derive(Debug, Default)]
pub struct MemoryStore {
    disks: Mutex<Vec<ConfiguredDisk>>,
    tasks: Mutex<Vec<Task>>,
    failing: AtomicBool,
    commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(disks: Vec<ConfiguredDisk>, tasks: Vec<Task>) -> Self {
        Self {
            disks: Mutex::new(disks),
            tasks: Mutex::new(tasks),
            ..Self::default()
        }
    }

    /// Makes every following commit fail with [`ErrorKind::Persistence`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful commits so far.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn disks(&self) -> Vec<ConfiguredDisk> {
        self.disks.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn check(&self) -> SdiskResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(SdiskError::new(ErrorKind::Persistence, "store is failing"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn load_disks(&self) -> SdiskResult<Vec<ConfiguredDisk>> {
        Ok(self.disks())
    }

    async fn load_tasks(&self) -> SdiskResult<Vec<Task>> {
        Ok(self.tasks())
    }

    async fn save_disks(&self, disks: &[ConfiguredDisk]) -> SdiskResult<()> {
        self.check()?;
        *self.disks.lock().unwrap_or_else(|e| e.into_inner()) = disks.to_vec();
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn save_tasks(&self, tasks: &[Task]) -> SdiskResult<()> {
        self.check()?;
        *self.tasks.lock().unwrap_or_else(|e| e.into_inner()) = tasks.to_vec();
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

enum Commit {
    Disks(Vec<ConfiguredDisk>),
    Tasks(Vec<Task>),
}

struct Request {
    commit: Commit,
    ack: Option<oneshot::Sender<SdiskResult<()>>>,
}

/// Handle onto the serial commit task.
#[derive(Clone)]
pub struct StoreWriter {
    sender: mpsc::UnboundedSender<Request>,
}

impl StoreWriter {
    /// Spawns the commit task on the current runtime.
    pub fn spawn(store: Arc<dyn DurableStore>) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Request>();
        let handle = tokio::spawn(async move {
            while let Some(request) = receiver.recv().await {
                let result = match &request.commit {
                    Commit::Disks(disks) => store.save_disks(disks).await,
                    Commit::Tasks(tasks) => store.save_tasks(tasks).await,
                };
                if let Err(e) = &result {
                    tracing::warn!("could not save configuration: {e}");
                }
                if let Some(ack) = request.ack {
                    let _ = ack.send(result);
                }
            }
            tracing::debug!("store writer stopped");
        });
        (Self { sender }, handle)
    }

    /// Queues a disk snapshot without waiting for the commit.
    pub fn queue_disks(&self, disks: Vec<ConfiguredDisk>) {
        self.send(Commit::Disks(disks), None);
    }

    /// Queues a task snapshot without waiting for the commit.
    pub fn queue_tasks(&self, tasks: Vec<Task>) {
        self.send(Commit::Tasks(tasks), None);
    }

    /// Queues a disk snapshot; the returned receiver resolves with the result.
    pub fn commit_disks(&self, disks: Vec<ConfiguredDisk>) -> PendingCommit {
        let (ack, receiver) = oneshot::channel();
        self.send(Commit::Disks(disks), Some(ack));
        PendingCommit(receiver)
    }

    /// Queues a task snapshot; the returned receiver resolves with the result.
    pub fn commit_tasks(&self, tasks: Vec<Task>) -> PendingCommit {
        let (ack, receiver) = oneshot::channel();
        self.send(Commit::Tasks(tasks), Some(ack));
        PendingCommit(receiver)
    }

    fn send(&self, commit: Commit, ack: Option<oneshot::Sender<SdiskResult<()>>>) {
        if self.sender.send(Request { commit, ack }).is_err() {
            tracing::warn!("store writer is gone; dropping commit");
        }
    }
}

/// Commit queued with an acknowledgement.
pub struct PendingCommit(oneshot::Receiver<SdiskResult<()>>);

impl PendingCommit {
    pub async fn wait(self) -> SdiskResult<()> {
        self.0.await.unwrap_or_else(|_| {
            Err(SdiskError::new(ErrorKind::Persistence, "store writer stopped before committing"))
        })
    }
}
