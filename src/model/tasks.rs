//! Task store
//!
//! In-memory view of the configured tasks. Every mutation takes a snapshot
//! under the write lock and hands it to the [`StoreWriter`], so commits are
//! ordered the same way the mutations were.
//!
//! Inserting a task and cascading the tasks of a removed disk are only done
//! from the engine actor, which owns the configured-disk set. A task can
//! therefore never be added for a disk whose removal is in flight.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::disk::DiskId;
use crate::error::{ErrorKind, SdiskError, SdiskResult};
use crate::store::{PendingCommit, StoreWriter};
use crate::task::{LogEntry, Task, TaskId, Trigger};

pub struct TaskStore {
    tasks: RwLock<Vec<Task>>,
    writer: StoreWriter,
    log_limit: usize,
}

impl TaskStore {
    pub fn new(tasks: Vec<Task>, writer: StoreWriter, log_limit: usize) -> Self {
        Self {
            tasks: RwLock::new(tasks),
            writer,
            log_limit,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Task>> {
        self.tasks.read().unwrap_or_else(|e| {
            tracing::warn!("task store lock was poisoned; recovering");
            e.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Task>> {
        self.tasks.write().unwrap_or_else(|e| {
            tracing::warn!("task store lock was poisoned; recovering");
            e.into_inner()
        })
    }

    /// Appends a task. The caller has checked that its disk is configured.
    pub fn insert(&self, task: Task) -> PendingCommit {
        let mut tasks = self.write();
        tasks.push(task);
        self.writer.commit_tasks(tasks.clone())
    }

    pub async fn remove_task(&self, id: TaskId) -> SdiskResult<Task> {
        let (removed, pending) = {
            let mut tasks = self.write();
            let position = tasks.iter().position(|task| task.id == id).ok_or_else(|| {
                SdiskError::new(ErrorKind::NotFound, format!("no task {id}"))
            })?;
            let removed = tasks.remove(position);
            (removed, self.writer.commit_tasks(tasks.clone()))
        };
        pending.wait().await?;
        Ok(removed)
    }

    /// Deletes every task owned by `disk`. Nothing is committed when the
    /// disk had no tasks.
    pub fn remove_for_disk(&self, disk: &DiskId) -> (usize, Option<PendingCommit>) {
        let mut tasks = self.write();
        let before = tasks.len();
        tasks.retain(|task| task.disk != *disk);
        let count = before - tasks.len();
        if count == 0 {
            return (0, None);
        }
        (count, Some(self.writer.commit_tasks(tasks.clone())))
    }

    pub fn clear(&self) -> (usize, PendingCommit) {
        let mut tasks = self.write();
        let count = tasks.len();
        tasks.clear();
        (count, self.writer.commit_tasks(Vec::new()))
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.read().clone()
    }

    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.read().iter().find(|task| task.id == id).cloned()
    }

    pub fn tasks_for(&self, disk: &DiskId) -> Vec<Task> {
        self.read().iter().filter(|task| task.disk == *disk).cloned().collect()
    }

    /// Tasks selected for `disk` at `trigger`.
    pub fn matching(&self, disk: &DiskId, trigger: Trigger) -> Vec<Task> {
        self.read()
            .iter()
            .filter(|task| task.matches(disk, trigger))
            .cloned()
            .collect()
    }

    /// Records a run. The commit is queued, not awaited. Returns false when
    /// the task has been removed in the meantime.
    pub fn append_log(&self, id: TaskId, entry: LogEntry) -> bool {
        let mut tasks = self.write();
        let Some(task) = tasks.iter_mut().find(|task| task.id == id) else {
            return false;
        };
        task.log.push(entry, self.log_limit);
        self.writer.queue_tasks(tasks.clone());
        true
    }

    /// Commits the current task list and waits for every earlier commit.
    pub async fn flush(&self) -> SdiskResult<()> {
        let pending = self.writer.commit_tasks(self.read().clone());
        pending.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::task::ScriptLanguage;
    use chrono::Local;
    use std::sync::Arc;

    fn store() -> (TaskStore, Arc<MemoryStore>) {
        let memory = Arc::new(MemoryStore::new());
        let (writer, _) = StoreWriter::spawn(memory.clone());
        (TaskStore::new(Vec::new(), writer, 2), memory)
    }

    fn task(disk: &str, trigger: Trigger) -> Task {
        Task::new(DiskId::new(disk), trigger, "true", ScriptLanguage::Shell)
    }

    #[tokio::test]
    async fn insert_and_remove_persist() {
        let (tasks, memory) = store();
        let task = task("U1", Trigger::OnMount);
        tasks.insert(task.clone()).wait().await.unwrap();
        assert_eq!(memory.tasks().len(), 1);
        assert_eq!(tasks.matching(&DiskId::new("U1"), Trigger::OnMount).len(), 1);
        assert!(tasks.matching(&DiskId::new("U1"), Trigger::OnUnmount).is_empty());

        tasks.remove_task(task.id).await.unwrap();
        assert!(memory.tasks().is_empty());
        assert_eq!(tasks.remove_task(task.id).await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn remove_for_disk_cascades() {
        let (tasks, memory) = store();
        for disk in ["U1", "U1", "U2"] {
            let _ = tasks.insert(task(disk, Trigger::Periodic));
        }
        let (count, pending) = tasks.remove_for_disk(&DiskId::new("U1"));
        assert_eq!(count, 2);
        pending.unwrap().wait().await.unwrap();
        assert_eq!(tasks.tasks().len(), 1);
        assert_eq!(memory.tasks().len(), 1);

        let (count, pending) = tasks.remove_for_disk(&DiskId::new("U1"));
        assert_eq!(count, 0);
        assert!(pending.is_none());
    }

    #[tokio::test]
    async fn clear_commits_empty_list() {
        let (tasks, memory) = store();
        tasks.insert(task("U1", Trigger::OnMount)).wait().await.unwrap();
        let (count, pending) = tasks.clear();
        pending.wait().await.unwrap();
        assert_eq!(count, 1);
        assert!(memory.tasks().is_empty());
    }

    #[tokio::test]
    async fn append_log_respects_limit() {
        let (tasks, _) = store();
        let task = task("U1", Trigger::OnMount);
        tasks.insert(task.clone()).wait().await.unwrap();
        for i in 0..3 {
            assert!(tasks.append_log(
                task.id,
                LogEntry {
                    timestamp: Local::now(),
                    output: Some(i.to_string()),
                    error: None,
                },
            ));
        }
        let log = tasks.task(task.id).unwrap().log;
        assert_eq!(log.len(), 2);
        assert_eq!(log.latest().and_then(|e| e.output.as_deref()), Some("2"));
        assert!(!tasks.append_log(TaskId::new(), LogEntry {
            timestamp: Local::now(),
            output: None,
            error: None,
        }));
    }
}
