//! Task dispatcher
//!
//! Selects the tasks for a disk and trigger, runs each one on the worker
//! pool, and records the outcome in the task's log. Dispatching never waits
//! for the scripts themselves.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Local;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;

use crate::disk::DiskId;
use crate::gateway::ScriptGateway;
use crate::model::tasks::TaskStore;
use crate::task::{LogEntry, Task, Trigger};

#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(self.clone())
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Scripts started by one dispatch.
pub struct Dispatch {
    handles: Vec<JoinHandle<()>>,
}

impl Dispatch {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits until every script of this dispatch has been logged.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!("task worker failed: {e}");
            }
        }
    }
}

#[derive(Clone)]
pub struct TaskDispatcher {
    tasks: Arc<TaskStore>,
    gateway: Arc<dyn ScriptGateway>,
    workers: Arc<Semaphore>,
    in_flight: Arc<InFlight>,
}

impl TaskDispatcher {
    pub fn new(tasks: Arc<TaskStore>, gateway: Arc<dyn ScriptGateway>, max_concurrent: usize) -> Self {
        Self {
            tasks,
            gateway,
            workers: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn tasks(&self) -> &Arc<TaskStore> {
        &self.tasks
    }

    /// Starts every task bound to `disk` at `trigger`. With no matching
    /// task nothing is spawned and nothing is logged.
    pub fn dispatch(&self, disk: &DiskId, trigger: Trigger) -> Dispatch {
        let selected = self.tasks.matching(disk, trigger);
        if !selected.is_empty() {
            tracing::info!(%disk, %trigger, count = selected.len(), "dispatching tasks");
        }
        let handles = selected.into_iter().map(|task| self.spawn(task)).collect();
        Dispatch { handles }
    }

    fn spawn(&self, task: Task) -> JoinHandle<()> {
        let guard = self.in_flight.enter();
        let tasks = self.tasks.clone();
        let gateway = self.gateway.clone();
        let workers = self.workers.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let _permit = match workers.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::warn!(task = %task.id, "worker pool closed; task not run");
                    return;
                }
            };

            let outcome = gateway.execute(&task.script, task.language).await;
            match &outcome.error {
                None => tracing::info!(task = %task.id, disk = %task.disk, "task finished"),
                Some(error) => {
                    tracing::warn!(task = %task.id, disk = %task.disk, "task failed: {error}")
                }
            }

            let entry = LogEntry {
                timestamp: Local::now(),
                output: outcome.output,
                error: outcome.error.map(|e| e.to_string()),
            };
            if !tasks.append_log(task.id, entry) {
                tracing::debug!(task = %task.id, "task removed before its run was logged");
            }
        })
    }

    /// Number of dispatched scripts not yet logged.
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Resolves once no dispatched script is outstanding.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.in_flight.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            idle.await;
        }
    }
}
