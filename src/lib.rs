//! # sdisk - external disk automation
//!
//! Watches external volumes come and go, reconciles them against the set of
//! disks the user configured, and runs the user's shell or AppleScript tasks
//! when a configured disk mounts, unmounts, or periodically while it stays
//! mounted.
//!
//! ## Core Concepts
//!
//! - **DiskId**: the volume UUID, the only identity shared by live and configured disks
//! - **IdentityRegistry**: live disks, configured disks and the mapping between them
//! - **Engine**: single actor applying disk events, user edits and scheduler ticks in order
//! - **TaskDispatcher**: runs the tasks of a disk and trigger on a bounded worker pool
//! - **Backends**: volume enumeration, script execution and the JSON store
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sdisk::backend::{json::JsonStore, mount::MountBackend, script::ProcessGateway};
//! use sdisk::service::engine::{EngineHandle, EngineOptions, EngineParts};
//! use sdisk::service::volumemonitor::{DiskSession, VolumeMonitor};
//! use sdisk::{Config, DiskEventSink};
//!
//! # async fn example() -> sdisk::SdiskResult<()> {
//! let config = Config::default();
//! let backend = Arc::new(MountBackend::new(config.volume_roots.clone()));
//! let parts = EngineParts {
//!     backend: backend.clone(),
//!     gateway: Arc::new(ProcessGateway::new(config.script_timeout())),
//!     store: Arc::new(JsonStore::new(&config.data_dir)),
//! };
//! let (engine, _actor) = EngineHandle::start(parts, EngineOptions::from(&config)).await?;
//!
//! let mut monitor = VolumeMonitor::new(backend, config.poll_interval());
//! let sink: Arc<dyn DiskEventSink> = Arc::new(engine.clone());
//! monitor.open(sink).await?;
//!
//! println!("{}", engine.status());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod bimap;
pub mod cancellable;
pub mod config;
pub mod disk;
pub mod error;
pub mod event;
pub mod gateway;
pub mod model;
pub mod service;
pub mod store;
pub mod task;
pub mod volume;

pub use cancellable::Cancellable;
pub use config::Config;
pub use disk::{capacity_string, ConfiguredDisk, DiskId, DiskState, LiveDisk};
pub use error::{ErrorKind, SdiskError, SdiskResult};
pub use event::{DiskEvent, DiskEventSink, DiskStateChange, DiskStateKind};
pub use gateway::{ScriptError, ScriptGateway, ScriptOutcome};
pub use model::registry::IdentityRegistry;
pub use service::eject::EjectReport;
pub use service::engine::{EngineHandle, EngineOptions, EngineParts, Status};
pub use store::{DurableStore, MemoryStore};
pub use task::{ExecutionLog, LogEntry, ScriptLanguage, Task, TaskId, Trigger};
pub use volume::{Enumeration, VolumeBackend};
