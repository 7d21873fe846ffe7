use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sdisk::model::tasks::TaskStore;
use sdisk::service::dispatcher::TaskDispatcher;
use sdisk::store::StoreWriter;
use sdisk::{DiskId, MemoryStore, ScriptGateway, ScriptLanguage, ScriptOutcome, Task, Trigger};

/// Sleeps briefly and tracks the highest number of concurrent runs.
#[derive(Default)]
struct SlowGateway {
    running: AtomicUsize,
    peak: AtomicUsize,
    runs: AtomicUsize,
}

#[async_trait]
impl ScriptGateway for SlowGateway {
    async fn execute(&self, script: &str, _language: ScriptLanguage) -> ScriptOutcome {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
        ScriptOutcome::success(script)
    }

    fn execute_blocking(&self, script: &str, _language: ScriptLanguage) -> ScriptOutcome {
        self.runs.fetch_add(1, Ordering::SeqCst);
        ScriptOutcome::success(script)
    }
}

fn tasks(count: usize, trigger: Trigger) -> Vec<Task> {
    (0..count)
        .map(|i| Task::new(DiskId::new("U1"), trigger, format!("job {i}"), ScriptLanguage::Shell))
        .collect()
}

fn dispatcher(tasks: Vec<Task>, gateway: Arc<SlowGateway>, workers: usize) -> (TaskDispatcher, Arc<MemoryStore>) {
    let memory = Arc::new(MemoryStore::new());
    let (writer, _) = StoreWriter::spawn(memory.clone());
    let store = Arc::new(TaskStore::new(tasks, writer, 10));
    (TaskDispatcher::new(store, gateway, workers), memory)
}

#[tokio::test]
async fn test_worker_pool_bounds_concurrency() {
    let gateway = Arc::new(SlowGateway::default());
    let (dispatcher, _) = dispatcher(tasks(6, Trigger::OnMount), gateway.clone(), 2);

    let dispatch = dispatcher.dispatch(&DiskId::new("U1"), Trigger::OnMount);
    assert_eq!(dispatch.len(), 6);
    dispatch.join().await;

    assert_eq!(gateway.runs.load(Ordering::SeqCst), 6);
    assert!(gateway.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(dispatcher.in_flight(), 0);
    assert!(dispatcher.tasks().tasks().iter().all(|t| t.log.len() == 1));
}

#[tokio::test]
async fn test_dispatch_selects_by_disk_and_trigger() {
    let gateway = Arc::new(SlowGateway::default());
    let mut all = tasks(2, Trigger::OnMount);
    all.extend(tasks(1, Trigger::OnUnmount));
    all.push(Task::new(DiskId::new("U2"), Trigger::OnMount, "other", ScriptLanguage::Shell));
    let (dispatcher, _) = dispatcher(all, gateway.clone(), 4);

    dispatcher.dispatch(&DiskId::new("U1"), Trigger::OnMount).join().await;
    assert_eq!(gateway.runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_empty_dispatch_writes_nothing() {
    let gateway = Arc::new(SlowGateway::default());
    let (dispatcher, memory) = dispatcher(tasks(1, Trigger::OnMount), gateway.clone(), 4);

    let dispatch = dispatcher.dispatch(&DiskId::new("U1"), Trigger::Periodic);
    assert!(dispatch.is_empty());
    dispatcher.wait_idle().await;
    assert_eq!(gateway.runs.load(Ordering::SeqCst), 0);
    assert_eq!(memory.commits(), 0);
}

#[tokio::test]
async fn test_wait_idle_outlasts_detached_runs() {
    let gateway = Arc::new(SlowGateway::default());
    let (dispatcher, _) = dispatcher(tasks(3, Trigger::Periodic), gateway.clone(), 1);

    drop(dispatcher.dispatch(&DiskId::new("U1"), Trigger::Periodic));
    assert!(dispatcher.in_flight() > 0);
    dispatcher.wait_idle().await;
    assert_eq!(gateway.runs.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_added_task_is_dispatched() {
    let gateway = Arc::new(SlowGateway::default());
    let (dispatcher, memory) = dispatcher(Vec::new(), gateway.clone(), 1);
    let task = Task::new(DiskId::new("U1"), Trigger::OnMount, "backup", ScriptLanguage::AppleScript);
    dispatcher.tasks().insert(task).wait().await.unwrap();
    assert_eq!(memory.tasks().len(), 1);

    dispatcher.dispatch(&DiskId::new("U1"), Trigger::OnMount).join().await;
    assert_eq!(gateway.runs.load(Ordering::SeqCst), 1);
}
