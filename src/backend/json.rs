//! JSON file store
//!
//! Keeps `disks.json` and `tasks.json` in one directory. Writes go to a
//! temporary file first and are renamed into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;

use crate::disk::ConfiguredDisk;
use crate::error::{ErrorKind, SdiskError, SdiskResult};
use crate::store::DurableStore;
use crate::task::Task;

const DISKS_FILE: &str = "disks.json";
const TASKS_FILE: &str = "tasks.json";

pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read<T: DeserializeOwned>(&self, name: &str) -> SdiskResult<Vec<T>> {
        let path = self.dir.join(name);
        match fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data).map_err(|e| {
                SdiskError::with_source(
                    ErrorKind::Persistence,
                    format!("corrupt store file {}", path.display()),
                    Box::new(e),
                )
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(persistence(&path, e)),
        }
    }

    async fn write<T: Serialize>(&self, name: &str, records: &[T]) -> SdiskResult<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| persistence(&self.dir, e))?;

        let path = self.dir.join(name);
        let tmp = self.dir.join(format!(".{name}.tmp"));
        let data = serde_json::to_vec_pretty(records)?;
        fs::write(&tmp, &data).await.map_err(|e| persistence(&tmp, e))?;
        fs::rename(&tmp, &path).await.map_err(|e| persistence(&path, e))?;
        tracing::debug!(path = %path.display(), records = records.len(), "store committed");
        Ok(())
    }
}

fn persistence(path: &Path, err: std::io::Error) -> SdiskError {
    SdiskError::with_source(
        ErrorKind::Persistence,
        format!("cannot access {}", path.display()),
        Box::new(err),
    )
}

#[async_trait]
impl DurableStore for JsonStore {
    async fn load_disks(&self) -> SdiskResult<Vec<ConfiguredDisk>> {
        self.read(DISKS_FILE).await
    }

    async fn load_tasks(&self) -> SdiskResult<Vec<Task>> {
        self.read(TASKS_FILE).await
    }

    async fn save_disks(&self, disks: &[ConfiguredDisk]) -> SdiskResult<()> {
        self.write(DISKS_FILE, disks).await
    }

    async fn save_tasks(&self, tasks: &[Task]) -> SdiskResult<()> {
        self.write(TASKS_FILE, tasks).await
    }
}
