//! Periodic scheduler
//!
//! Asks the engine to run the Periodic tasks of every mounted configured
//! disk once per interval. The first run happens one full interval after
//! start.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cancellable::Cancellable;
use crate::service::engine::EngineHandle;

pub struct PeriodicScheduler {
    cancellable: Cancellable,
    handle: JoinHandle<()>,
}

impl PeriodicScheduler {
    pub fn spawn(engine: EngineHandle, interval: Duration) -> Self {
        let cancellable = Cancellable::new();
        let stop = cancellable.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        tracing::debug!("periodic tick");
                        engine.run_periodic();
                    }
                }
            }
        });
        Self {
            cancellable,
            handle,
        }
    }

    pub async fn stop(self) {
        self.cancellable.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("periodic scheduler failed: {e}");
        }
    }
}
