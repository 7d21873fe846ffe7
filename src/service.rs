//! Long-running services
//!
//! - [`engine::EngineHandle`]: reconciliation of disk events against the configuration
//! - [`dispatcher::TaskDispatcher`]: task selection and the script worker pool
//! - [`eject`]: bulk eject of every external disk
//! - [`periodic::PeriodicScheduler`]: interval runs of Periodic tasks
//! - [`volumemonitor::VolumeMonitor`]: disk session over a volume backend

pub mod dispatcher;
pub mod eject;
pub mod engine;
pub mod periodic;
pub mod volumemonitor;
