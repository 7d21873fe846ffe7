use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sdisk::backend::json::JsonStore;
use sdisk::backend::mount::MountBackend;
use sdisk::backend::script::ProcessGateway;
use sdisk::service::periodic::PeriodicScheduler;
use sdisk::service::volumemonitor::{DiskSession, VolumeMonitor};
use sdisk::{
    capacity_string, Config, DiskEventSink, DiskId, EngineHandle, EngineOptions, EngineParts,
    ScriptLanguage, TaskId, Trigger,
};

#[derive(Debug, Clone, Parser)]
#[command(about, version, subcommand_help_heading = "Commands")]
struct Cli {
    /// Configuration file. Defaults to the per-user config directory.
    #[arg(short, long, value_name = "path", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Watch volumes and run tasks until interrupted.
    Run,

    /// Show configured disks and mounted disks that can be configured.
    List,

    /// Configure a mounted disk for automation.
    Add {
        #[arg(value_name = "disk_id")]
        disk: String,
    },

    /// Remove a configured disk and its tasks.
    Remove {
        #[arg(value_name = "disk_id", required_unless_present = "all")]
        disk: Option<String>,

        /// Remove every configured disk.
        #[arg(long, conflicts_with = "disk")]
        all: bool,
    },

    /// Manage the tasks of configured disks.
    #[command(subcommand)]
    Task(TaskCommand),

    /// Unmount every external disk.
    EjectAll,
}

#[derive(Debug, Clone, Subcommand)]
enum TaskCommand {
    /// Add a task to a configured disk.
    Add {
        #[arg(value_name = "disk_id")]
        disk: String,

        /// on-mount, periodic or on-unmount.
        #[arg(value_name = "trigger")]
        trigger: String,

        #[arg(value_name = "script")]
        script: String,

        /// shell or applescript.
        #[arg(short, long, default_value = "shell")]
        language: String,
    },

    /// List tasks, optionally of one disk only.
    List {
        #[arg(value_name = "disk_id")]
        disk: Option<String>,
    },

    /// Remove a task.
    Remove {
        #[arg(value_name = "task_id")]
        task: String,
    },

    /// Print the execution log of a task.
    Log {
        #[arg(value_name = "task_id")]
        task: String,
    },
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer().compact().with_target(false);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(layer).with(filter).init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let config = Config::load(&path).with_context(|| format!("cannot load {}", path.display()))?;

    let backend = Arc::new(MountBackend::new(config.volume_roots.clone()));
    let parts = EngineParts {
        backend: backend.clone(),
        gateway: Arc::new(ProcessGateway::new(config.script_timeout())),
        store: Arc::new(JsonStore::new(&config.data_dir)),
    };
    let (engine, actor) = EngineHandle::start(parts, EngineOptions::from(&config)).await?;

    if !matches!(cli.command, Command::Run) {
        engine.scan().await?;
    }
    run_command(&engine, backend, &config, cli.command).await?;
    engine.dispatcher().wait_idle().await;

    engine.flush().await?;
    engine.shutdown();
    actor.await?;
    Ok(())
}

async fn run_daemon(engine: &EngineHandle, backend: Arc<MountBackend>, config: &Config) -> Result<()> {
    let mut changes = engine.subscribe();
    let watcher = engine.clone();
    let reporter = tokio::spawn(async move {
        while let Ok(change) = changes.recv().await {
            info!(kind = ?change.kind, disk = ?change.disk, "{}", watcher.status());
        }
    });

    let mut monitor = VolumeMonitor::new(backend, config.poll_interval());
    let sink: Arc<dyn DiskEventSink> = Arc::new(engine.clone());
    if let Err(e) = monitor.open(sink).await {
        warn!("disk session unavailable; no disk events will be seen: {e}");
    }
    let periodic = PeriodicScheduler::spawn(engine.clone(), config.periodic_interval());
    info!("{}", engine.status());

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    periodic.stop().await;
    monitor.close().await;
    reporter.abort();
    Ok(())
}

async fn run_command(
    engine: &EngineHandle,
    backend: Arc<MountBackend>,
    config: &Config,
    command: Command,
) -> Result<()> {
    match command {
        Command::Run => run_daemon(engine, backend, config).await?,
        Command::List => {
            println!("{}", engine.status());
            for disk in engine.configured_disks() {
                let mounted = if engine.bound_ids().contains(&disk.id) {
                    "mounted"
                } else {
                    "not mounted"
                };
                println!(
                    "  {}  {}  ({}, {})",
                    disk.id,
                    disk.name,
                    capacity_string(disk.available_bytes, disk.total_bytes),
                    mounted
                );
            }
            let unbound = engine.unbound_live_disks();
            if !unbound.is_empty() {
                println!("Available:");
                for disk in unbound {
                    println!(
                        "  {}  {}  ({})",
                        disk.id,
                        disk.name,
                        capacity_string(disk.available_bytes, disk.total_bytes)
                    );
                }
            }
        }
        Command::Add { disk } => {
            let disk = engine.add_configured_disk(&DiskId::new(disk)).await?;
            println!("Configured {} ({})", disk.name, disk.id);
        }
        Command::Remove { all: true, .. } => {
            let count = engine.remove_all_configured_disks().await?;
            println!("Removed {count} disk(s)");
        }
        Command::Remove { disk: Some(disk), .. } => {
            let disk = engine.remove_configured_disk(&DiskId::new(disk)).await?;
            println!("Removed {} ({})", disk.name, disk.id);
        }
        Command::Remove { disk: None, .. } => bail!("no disk given"),
        Command::Task(TaskCommand::Add {
            disk,
            trigger,
            script,
            language,
        }) => {
            let trigger: Trigger = trigger.parse()?;
            let language: ScriptLanguage = language.parse()?;
            let task = engine
                .add_task(DiskId::new(disk), trigger, script, language)
                .await?;
            println!("{}", task.id);
        }
        Command::Task(TaskCommand::List { disk }) => {
            let tasks = match disk {
                Some(disk) => engine.tasks_for(&DiskId::new(disk)),
                None => engine.tasks(),
            };
            for task in tasks {
                println!(
                    "{}  {}  {}  {}  {}",
                    task.id, task.disk, task.trigger, task.language, task.script
                );
            }
        }
        Command::Task(TaskCommand::Remove { task }) => {
            let id: TaskId = task.parse()?;
            engine.remove_task(id).await?;
        }
        Command::Task(TaskCommand::Log { task }) => {
            let id: TaskId = task.parse()?;
            let Some(task) = engine.tasks().into_iter().find(|t| t.id == id) else {
                bail!("no task {id}");
            };
            print!("{}", task.log);
        }
        Command::EjectAll => {
            let report = engine.eject_all().await?;
            for id in &report.ejected {
                println!("Ejected {id}");
            }
            for (id, reason) in &report.failed {
                println!("Failed {id}: {reason}");
            }
            if !report.all_complete {
                bail!("not every disk could be ejected");
            }
        }
    }
    Ok(())
}
