//! Reconciliation engine
//!
//! One actor task owns every write to the [`IdentityRegistry`]. Disk events,
//! user edits and scheduler ticks reach it through a single FIFO queue, so
//! transitions for a disk are applied in the order they were submitted.
//! [`EngineHandle`] is the cloneable front end: it feeds the queue and serves
//! snapshot reads straight from the registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::config::Config;
use crate::disk::{ConfiguredDisk, DiskId, DiskState, LiveDisk};
use crate::error::{ErrorKind, SdiskError, SdiskResult};
use crate::event::{events_between, DiskEvent, DiskEventSink, DiskStateChange, DiskStateKind, PendingKinds};
use crate::gateway::ScriptGateway;
use crate::model::registry::IdentityRegistry;
use crate::model::tasks::TaskStore;
use crate::service::dispatcher::TaskDispatcher;
use crate::service::eject::{self, Completion, EjectReport, PendingUnmountBatch};
use crate::store::{DurableStore, PendingCommit, StoreWriter};
use crate::task::{ScriptLanguage, Task, TaskId, Trigger};
use crate::volume::{Enumeration, VolumeBackend};

const NOTIFICATION_CAPACITY: usize = 64;

/// Collaborators the engine drives.
#[derive(Clone)]
pub struct EngineParts {
    pub backend: Arc<dyn VolumeBackend>,
    pub gateway: Arc<dyn ScriptGateway>,
    pub store: Arc<dyn DurableStore>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub coalesce_window: Duration,
    pub max_concurrent_scripts: usize,
    pub log_limit: usize,
    pub eject_timeout: Option<Duration>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            coalesce_window: Duration::from_millis(50),
            max_concurrent_scripts: 4,
            log_limit: 100,
            eject_timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl From<&Config> for EngineOptions {
    fn from(config: &Config) -> Self {
        Self {
            coalesce_window: config.coalesce_window(),
            max_concurrent_scripts: config.max_concurrent_scripts,
            log_limit: config.log_limit,
            eject_timeout: config.eject_timeout(),
        }
    }
}

/// Summary line for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub configured: usize,
    pub mounted: usize,
    pub bound: usize,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.configured == 0 {
            f.write_str("Volumes Configured: None")
        } else {
            write!(f, "Volumes Configured: {}", self.configured)
        }
    }
}

type Reply<T> = oneshot::Sender<SdiskResult<T>>;

enum Command {
    Event(DiskEvent),
    Seed(Vec<LiveDisk>),
    Reconcile(Enumeration),
    AddConfigured(DiskId, Reply<(ConfiguredDisk, PendingCommit)>),
    RemoveConfigured(DiskId, Reply<(ConfiguredDisk, Commits)>),
    RemoveAll(Reply<(usize, Commits)>),
    AddTask(Task, Reply<PendingCommit>),
    Flush(Reply<PendingCommit>),
    RunPeriodic,
    Notify(DiskStateKind, Option<DiskId>),
    Sync(oneshot::Sender<()>),
    Shutdown,
}

/// Commits queued by one configuration edit.
struct Commits {
    disks: PendingCommit,
    tasks: Option<PendingCommit>,
}

impl Commits {
    async fn wait(self) -> SdiskResult<()> {
        let disks = self.disks.wait().await;
        if let Some(tasks) = self.tasks {
            tasks.wait().await?;
        }
        disks
    }
}

struct Shared {
    registry: RwLock<IdentityRegistry>,
    batch: Mutex<PendingUnmountBatch>,
    notifications: broadcast::Sender<DiskStateChange>,
    dispatcher: TaskDispatcher,
    writer: StoreWriter,
    backend: Arc<dyn VolumeBackend>,
    options: EngineOptions,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, IdentityRegistry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, IdentityRegistry> {
        self.registry.write().unwrap_or_else(|e| {
            tracing::warn!("registry lock was poisoned; recovering");
            e.into_inner()
        })
    }

    fn with_batch<T>(&self, f: impl FnOnce(&mut PendingUnmountBatch) -> T) -> T {
        let mut batch = self.batch.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut batch)
    }
}

/// Per-kind notification coalescing.
///
/// The first change of a kind opens a window; later changes of the same kind
/// inside it are folded into the one pending notification.
struct Coalescer {
    window: Duration,
    deadline: Option<Instant>,
    pending: PendingKinds,
    slots: Vec<DiskStateChange>,
}

impl Coalescer {
    fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
            pending: PendingKinds::empty(),
            slots: Vec::new(),
        }
    }

    fn record(&mut self, kind: DiskStateKind, disk: Option<DiskId>) {
        if self.pending.contains(kind.flag()) {
            if let Some(slot) = self.slots.iter_mut().find(|slot| slot.kind == kind) {
                slot.disk = disk;
                slot.coalesced += 1;
            }
            return;
        }
        self.pending.insert(kind.flag());
        self.slots.push(DiskStateChange {
            kind,
            disk,
            coalesced: 1,
        });
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.window);
        }
    }

    fn flush(&mut self, notifications: &broadcast::Sender<DiskStateChange>) {
        for change in self.slots.drain(..) {
            tracing::debug!(kind = ?change.kind, coalesced = change.coalesced, "disk state changed");
            // No subscribers is fine.
            let _ = notifications.send(change);
        }
        self.pending = PendingKinds::empty();
        self.deadline = None;
    }
}

struct Engine {
    shared: Arc<Shared>,
    coalescer: Coalescer,
}

impl Engine {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let deadline = self.coalescer.deadline;
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.coalescer.flush(&self.shared.notifications);
                }
            }
        }
        self.coalescer.flush(&self.shared.notifications);
        tracing::debug!("engine stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Event(event) => self.apply(event),
            Command::Seed(disks) => self.seed(disks),
            Command::Reconcile(enumeration) => self.reconcile(enumeration),
            Command::AddConfigured(id, reply) => {
                let _ = reply.send(self.add_configured(id));
            }
            Command::RemoveConfigured(id, reply) => {
                let _ = reply.send(self.remove_configured(id));
            }
            Command::RemoveAll(reply) => {
                let _ = reply.send(Ok(self.remove_all()));
            }
            Command::AddTask(task, reply) => {
                let _ = reply.send(self.add_task(task));
            }
            Command::Flush(reply) => {
                let disks = self.shared.read().configured_disks();
                let _ = reply.send(Ok(self.shared.writer.commit_disks(disks)));
            }
            Command::RunPeriodic => {
                let bound = self.shared.read().bound_ids();
                for id in &bound {
                    self.shared.dispatcher.dispatch(id, Trigger::Periodic);
                }
            }
            Command::Notify(kind, disk) => self.coalescer.record(kind, disk),
            Command::Sync(reply) => {
                let _ = reply.send(());
            }
            Command::Shutdown => {}
        }
    }

    fn apply(&mut self, event: DiskEvent) {
        match event {
            DiskEvent::MountRequested(disk) => self.mounted(disk),
            DiskEvent::UnmountRequested(disk) => self.removed(disk, DiskStateKind::Unmounted),
            DiskEvent::DescriptionChanged(disk) => self.changed(disk),
            DiskEvent::Disappeared(disk) => self.removed(disk, DiskStateKind::Disappeared),
        }
    }

    fn mounted(&mut self, disk: LiveDisk) {
        let id = disk.id.clone();
        let mut registry = self.shared.write();
        if registry.live(&id).is_some() {
            drop(registry);
            tracing::debug!(disk = %id, "mount reported for a mounted disk");
            self.changed(disk);
            return;
        }

        registry.insert_live(disk);
        let configured = registry.is_configured(&id);
        if configured {
            if let Err(e) = registry.bind(&id, &id) {
                tracing::warn!(disk = %id, "could not bind mounted disk: {e}");
            }
            if registry.refresh_configured(&id) {
                self.shared.writer.queue_disks(registry.configured_disks());
            }
        }
        drop(registry);

        tracing::info!(disk = %id, configured, "disk mounted");
        if configured {
            self.shared.dispatcher.dispatch(&id, Trigger::OnMount);
        }
        self.coalescer.record(DiskStateKind::Mounted, Some(id));
    }

    fn removed(&mut self, disk: LiveDisk, kind: DiskStateKind) {
        let id = disk.id;
        let mut registry = self.shared.write();
        let known = registry.live(&id).is_some();
        if known {
            if registry.is_bound(&id) {
                self.shared.dispatcher.dispatch(&id, Trigger::OnUnmount);
            }
            registry.unbind(&id);
            registry.remove_live(&id);
        }
        drop(registry);

        let in_batch = self.shared.with_batch(|batch| batch.is_member(&id));
        if in_batch
            && self.shared.with_batch(|batch| batch.complete(&id, None)) == Completion::Finished
        {
            self.coalescer.record(DiskStateKind::EjectFinished, None);
        }

        if !known && kind == DiskStateKind::Unmounted {
            tracing::debug!(disk = %id, "unmount reported for a disk that is not mounted");
            return;
        }
        tracing::info!(disk = %id, kind = ?kind, "disk removed");
        if kind == DiskStateKind::Unmounted && in_batch {
            return;
        }
        self.coalescer.record(kind, Some(id));
    }

    fn changed(&mut self, disk: LiveDisk) {
        let id = disk.id.clone();
        let mut registry = self.shared.write();
        if registry.live(&id).is_none() {
            tracing::debug!(disk = %id, "description change for a disk that is not mounted");
            return;
        }
        registry.insert_live(disk);
        if registry.refresh_configured(&id) {
            self.shared.writer.queue_disks(registry.configured_disks());
        }
        drop(registry);
        self.coalescer.record(DiskStateKind::Changed, Some(id));
    }

    fn seed(&mut self, disks: Vec<LiveDisk>) {
        let mut registry = self.shared.write();
        let mut last = None;
        for disk in disks {
            last = Some(disk.id.clone());
            registry.insert_live(disk);
        }
        let bound = registry.bind_all_matching();
        let refreshed = registry
            .bound_ids()
            .iter()
            .filter(|id| registry.refresh_configured(id))
            .count();
        if refreshed > 0 {
            self.shared.writer.queue_disks(registry.configured_disks());
        }
        drop(registry);

        tracing::info!(bound, "mounted disks loaded");
        if last.is_some() {
            self.coalescer.record(DiskStateKind::Mounted, last);
        }
    }

    fn reconcile(&mut self, enumeration: Enumeration) {
        let previous: HashMap<DiskId, LiveDisk> = self
            .shared
            .read()
            .live_disks()
            .into_iter()
            .map(|disk| (disk.id.clone(), disk))
            .collect();
        let backend = self.shared.backend.clone();
        let events = events_between(&previous, &enumeration.disks, enumeration.complete, |disk| {
            backend.device_present(disk)
        });
        if !events.is_empty() {
            tracing::info!(count = events.len(), "refresh found missed disk events");
        }
        for event in events {
            self.apply(event);
        }
    }

    fn add_configured(&mut self, id: DiskId) -> SdiskResult<(ConfiguredDisk, PendingCommit)> {
        let mut registry = self.shared.write();
        let live = registry.live(&id).cloned().ok_or_else(|| {
            SdiskError::new(ErrorKind::NotFound, format!("disk {id} is not mounted"))
        })?;
        let configured = ConfiguredDisk::from_live(&live);
        registry.insert_configured(configured.clone())?;
        registry.bind(&id, &id)?;
        let pending = self.shared.writer.commit_disks(registry.configured_disks());
        drop(registry);

        tracing::info!(disk = %id, name = %configured.name, "disk configured");
        self.coalescer.record(DiskStateKind::Configured, Some(id));
        Ok((configured, pending))
    }

    fn remove_configured(&mut self, id: DiskId) -> SdiskResult<(ConfiguredDisk, Commits)> {
        let mut registry = self.shared.write();
        let removed = registry.remove_configured(&id).ok_or_else(|| {
            SdiskError::new(ErrorKind::NotFound, format!("disk {id} is not configured"))
        })?;
        let disks = self.shared.writer.commit_disks(registry.configured_disks());
        drop(registry);

        let (cascaded, tasks) = self.shared.dispatcher.tasks().remove_for_disk(&id);
        tracing::info!(disk = %id, tasks = cascaded, "disk removed from configuration");
        self.coalescer.record(DiskStateKind::Configured, Some(id));
        Ok((removed, Commits { disks, tasks }))
    }

    fn remove_all(&mut self) -> (usize, Commits) {
        let removed = self.shared.write().clear_configured();
        let disks = self.shared.writer.commit_disks(Vec::new());
        let (cleared, tasks) = self.shared.dispatcher.tasks().clear();
        tracing::info!(count = removed.len(), tasks = cleared, "configuration cleared");
        self.coalescer.record(DiskStateKind::Configured, None);
        (
            removed.len(),
            Commits {
                disks,
                tasks: Some(tasks),
            },
        )
    }

    fn add_task(&mut self, task: Task) -> SdiskResult<PendingCommit> {
        if !self.shared.read().is_configured(&task.disk) {
            return Err(SdiskError::new(
                ErrorKind::NotFound,
                format!("disk {} is not configured", task.disk),
            ));
        }
        tracing::info!(task = %task.id, disk = %task.disk, trigger = %task.trigger, "task added");
        Ok(self.shared.dispatcher.tasks().insert(task))
    }
}

/// Front end of a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl EngineHandle {
    /// Loads the stored configuration and starts the engine actor.
    pub async fn start(
        parts: EngineParts,
        options: EngineOptions,
    ) -> SdiskResult<(Self, JoinHandle<()>)> {
        let disks = parts.store.load_disks().await?;
        let tasks = parts.store.load_tasks().await?;
        tracing::info!(disks = disks.len(), tasks = tasks.len(), "configuration loaded");

        let (writer, _) = StoreWriter::spawn(parts.store);
        let task_store = Arc::new(TaskStore::new(tasks, writer.clone(), options.log_limit));
        let dispatcher =
            TaskDispatcher::new(task_store, parts.gateway, options.max_concurrent_scripts);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        let shared = Arc::new(Shared {
            registry: RwLock::new(IdentityRegistry::with_configured(disks)),
            batch: Mutex::new(PendingUnmountBatch::default()),
            notifications,
            dispatcher,
            writer,
            backend: parts.backend,
            options,
        });
        let (commands, receiver) = mpsc::unbounded_channel();
        let engine = Engine {
            shared: shared.clone(),
            coalescer: Coalescer::new(shared.options.coalesce_window),
        };
        let join = tokio::spawn(engine.run(receiver));
        Ok((Self { commands, shared }, join))
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("engine is stopped; request dropped");
        }
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> SdiskResult<T> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply));
        response
            .await
            .map_err(|_| SdiskError::new(ErrorKind::Failed, "engine is stopped"))?
    }

    pub(crate) fn backend(&self) -> Arc<dyn VolumeBackend> {
        self.shared.backend.clone()
    }

    pub(crate) fn options(&self) -> &EngineOptions {
        &self.shared.options
    }

    pub(crate) fn with_batch<T>(&self, f: impl FnOnce(&mut PendingUnmountBatch) -> T) -> T {
        self.shared.with_batch(f)
    }

    pub(crate) fn notify(&self, kind: DiskStateKind, disk: Option<DiskId>) {
        self.send(Command::Notify(kind, disk));
    }

    /// Receives coalesced state change notifications from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DiskStateChange> {
        self.shared.notifications.subscribe()
    }

    pub fn dispatcher(&self) -> &TaskDispatcher {
        &self.shared.dispatcher
    }

    /// Resolves once every command queued before this call was applied.
    pub async fn sync(&self) {
        let (reply, done) = oneshot::channel();
        self.send(Command::Sync(reply));
        let _ = done.await;
    }

    /// Stops the actor after the commands already queued.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    /// Waits until every queued store commit has landed.
    pub async fn flush(&self) -> SdiskResult<()> {
        let disks = self.request(Command::Flush).await?;
        let tasks = self.shared.dispatcher.tasks().flush().await;
        disks.wait().await?;
        tasks
    }

    /// Enumerates the backend and loads the result as the disks mounted at
    /// startup. No tasks run.
    pub async fn scan(&self) -> SdiskResult<Enumeration> {
        let enumeration = self.shared.backend.enumerate(None).await?;
        self.seed(enumeration.disks.clone());
        self.sync().await;
        Ok(enumeration)
    }

    /// Enumerates the backend and applies whatever events the session
    /// missed, running tasks as for live events.
    pub async fn refresh(&self) -> SdiskResult<Enumeration> {
        let enumeration = self.shared.backend.enumerate(None).await?;
        self.send(Command::Reconcile(enumeration.clone()));
        self.sync().await;
        Ok(enumeration)
    }

    /// Queues a run of every Periodic task of the mounted configured disks.
    pub fn run_periodic(&self) {
        self.send(Command::RunPeriodic);
    }

    /// Registers a mounted disk for automation and waits for the commit.
    pub async fn add_configured_disk(&self, id: &DiskId) -> SdiskResult<ConfiguredDisk> {
        let (disk, pending) = self
            .request(|reply| Command::AddConfigured(id.clone(), reply))
            .await?;
        pending.wait().await?;
        Ok(disk)
    }

    /// Unregisters a disk and deletes its tasks.
    pub async fn remove_configured_disk(&self, id: &DiskId) -> SdiskResult<ConfiguredDisk> {
        let (disk, commits) = self
            .request(|reply| Command::RemoveConfigured(id.clone(), reply))
            .await?;
        commits.wait().await?;
        Ok(disk)
    }

    /// Unregisters every disk and deletes every task.
    pub async fn remove_all_configured_disks(&self) -> SdiskResult<usize> {
        let (count, commits) = self.request(Command::RemoveAll).await?;
        commits.wait().await?;
        Ok(count)
    }

    /// Creates a task for a configured disk and waits for it to be committed.
    pub async fn add_task(
        &self,
        disk: DiskId,
        trigger: Trigger,
        script: impl Into<String>,
        language: ScriptLanguage,
    ) -> SdiskResult<Task> {
        let task = Task::new(disk, trigger, script, language);
        let pending = self
            .request(|reply| Command::AddTask(task.clone(), reply))
            .await?;
        pending.wait().await?;
        Ok(task)
    }

    pub async fn remove_task(&self, id: TaskId) -> SdiskResult<Task> {
        self.shared.dispatcher.tasks().remove_task(id).await
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.shared.dispatcher.tasks().tasks()
    }

    pub fn tasks_for(&self, disk: &DiskId) -> Vec<Task> {
        self.shared.dispatcher.tasks().tasks_for(disk)
    }

    /// Unmounts every visible external disk.
    pub async fn eject_all(&self) -> SdiskResult<EjectReport> {
        eject::eject_all(self).await
    }

    pub fn configured_disks(&self) -> Vec<ConfiguredDisk> {
        self.shared.read().configured_disks()
    }

    /// Mounted disks that can still be configured.
    pub fn unbound_live_disks(&self) -> Vec<LiveDisk> {
        self.shared.read().unbound_live()
    }

    pub fn live_disks(&self) -> Vec<LiveDisk> {
        self.shared.read().live_disks()
    }

    pub fn state(&self, id: &DiskId) -> Option<DiskState> {
        self.shared.read().state(id)
    }

    pub fn bound_ids(&self) -> Vec<DiskId> {
        self.shared.read().bound_ids()
    }

    pub fn status(&self) -> Status {
        let registry = self.shared.read();
        Status {
            configured: registry.configured_disks().len(),
            mounted: registry.live_disks().len(),
            bound: registry.bound_ids().len(),
        }
    }

    /// Checks the registry's mapping invariant.
    pub fn is_consistent(&self) -> bool {
        self.shared.read().is_consistent()
    }
}

impl DiskEventSink for EngineHandle {
    fn submit(&self, event: DiskEvent) {
        tracing::trace!(event = ?event.kind(), disk = %event.disk().id, "disk event");
        self.send(Command::Event(event));
    }

    fn seed(&self, disks: Vec<LiveDisk>) {
        self.send(Command::Seed(disks));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line() {
        let mut status = Status {
            configured: 0,
            mounted: 1,
            bound: 0,
        };
        assert_eq!(status.to_string(), "Volumes Configured: None");
        status.configured = 2;
        assert_eq!(status.to_string(), "Volumes Configured: 2");
    }

    #[tokio::test]
    async fn coalescer_folds_same_kind() {
        let (tx, mut rx) = broadcast::channel(8);
        let mut coalescer = Coalescer::new(Duration::from_millis(50));
        coalescer.record(DiskStateKind::Mounted, Some(DiskId::new("A")));
        coalescer.record(DiskStateKind::Changed, Some(DiskId::new("A")));
        coalescer.record(DiskStateKind::Mounted, Some(DiskId::new("B")));
        assert!(coalescer.deadline.is_some());

        coalescer.flush(&tx);
        assert!(coalescer.deadline.is_none());
        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind, DiskStateKind::Mounted);
        assert_eq!(first.disk, Some(DiskId::new("B")));
        assert_eq!(first.coalesced, 2);
        assert_eq!(rx.try_recv().unwrap().kind, DiskStateKind::Changed);
        assert!(rx.try_recv().is_err());
    }
}
