//! Runtime configuration.
//!
//! Read from `config.toml` in the platform configuration directory. Every key
//! is optional; missing keys fall back to [`Config::default`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, SdiskError, SdiskResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the JSON store.
    pub data_dir: PathBuf,
    /// Mount points below these roots count as external volumes.
    pub volume_roots: Vec<PathBuf>,
    pub poll_interval_ms: u64,
    pub coalesce_window_ms: u64,
    pub periodic_interval_secs: u64,
    /// Zero disables the bound.
    pub script_timeout_secs: u64,
    pub max_concurrent_scripts: usize,
    /// Zero keeps every log entry.
    pub log_limit: usize,
    /// Zero disables the bound.
    pub eject_timeout_secs: u64,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "sdisk")
}

fn default_volume_roots() -> Vec<PathBuf> {
    if cfg!(target_os = "macos") {
        vec![PathBuf::from("/Volumes")]
    } else {
        vec![
            PathBuf::from("/media"),
            PathBuf::from("/run/media"),
            PathBuf::from("/mnt"),
        ]
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| std::env::temp_dir().join("sdisk"));
        Self {
            data_dir,
            volume_roots: default_volume_roots(),
            poll_interval_ms: 2_000,
            coalesce_window_ms: 50,
            periodic_interval_secs: 300,
            script_timeout_secs: 600,
            max_concurrent_scripts: 4,
            log_limit: 100,
            eject_timeout_secs: 60,
        }
    }
}

impl Config {
    /// Default location of the configuration file.
    pub fn default_path() -> SdiskResult<PathBuf> {
        project_dirs()
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or_else(|| {
                SdiskError::new(ErrorKind::NotFound, "could not determine configuration directory")
            })
    }

    /// Loads `path`, or the defaults if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> SdiskResult<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(data) => {
                let config = Self::parse(&data)?;
                tracing::debug!(path = %path.display(), "loaded configuration");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no configuration file; using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(data: &str) -> SdiskResult<Self> {
        let config: Config = toml::from_str(data)?;
        if config.max_concurrent_scripts == 0 {
            return Err(SdiskError::new(
                ErrorKind::InvalidArg,
                "max_concurrent_scripts must be at least 1",
            ));
        }
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }

    pub fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_interval_secs.max(1))
    }

    pub fn script_timeout(&self) -> Option<Duration> {
        (self.script_timeout_secs > 0).then(|| Duration::from_secs(self.script_timeout_secs))
    }

    pub fn eject_timeout(&self) -> Option<Duration> {
        (self.eject_timeout_secs > 0).then(|| Duration::from_secs(self.eject_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::parse("log_limit = 5\nscript_timeout_secs = 0\n").unwrap();
        assert_eq!(config.log_limit, 5);
        assert_eq!(config.script_timeout(), None);
        assert_eq!(config.max_concurrent_scripts, Config::default().max_concurrent_scripts);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = Config::parse("max_concurrent_scripts = 0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArg);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("sdisk_config_test_missing.toml");
        let _ = std::fs::remove_file(&path);
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }
}
