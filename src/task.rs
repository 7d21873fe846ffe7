//! Automation tasks
//!
//! A [`Task`] binds a script to one configured disk and one lifecycle
//! [`Trigger`]. Every run leaves a [`LogEntry`] in the task's execution log.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::disk::DiskId;
use crate::error::{ErrorKind, SdiskError};

/// Lifecycle point at which a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trigger {
    OnMount,
    Periodic,
    OnUnmount,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::OnMount => write!(f, "on-mount"),
            Trigger::Periodic => write!(f, "periodic"),
            Trigger::OnUnmount => write!(f, "on-unmount"),
        }
    }
}

impl FromStr for Trigger {
    type Err = SdiskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "on-mount" | "mount" => Ok(Trigger::OnMount),
            "periodic" => Ok(Trigger::Periodic),
            "on-unmount" | "unmount" => Ok(Trigger::OnUnmount),
            other => Err(SdiskError::new(
                ErrorKind::InvalidArg,
                format!("unknown trigger: {other}"),
            )),
        }
    }
}

/// Interpreter for a task's script body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScriptLanguage {
    Shell,
    AppleScript,
}

impl fmt::Display for ScriptLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptLanguage::Shell => write!(f, "shell"),
            ScriptLanguage::AppleScript => write!(f, "applescript"),
        }
    }
}

impl FromStr for ScriptLanguage {
    type Err = SdiskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "shell" | "sh" | "bash" => Ok(ScriptLanguage::Shell),
            "applescript" | "apple-script" | "osascript" => Ok(ScriptLanguage::AppleScript),
            other => Err(SdiskError::new(
                ErrorKind::InvalidArg,
                format!("unknown script language: {other}"),
            )),
        }
    }
}

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = SdiskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SdiskError::new(ErrorKind::InvalidArg, format!("invalid task id {s}: {e}")))
    }
}

/// One recorded script run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}]", self.timestamp.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "Output: {}", self.output.as_deref().unwrap_or("None"))?;
        write!(f, "Error: {}", self.error.as_deref().unwrap_or("None"))
    }
}

/// Execution history, oldest entry first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionLog(VecDeque<LogEntry>);

impl ExecutionLog {
    /// Appends `entry`, dropping the oldest entries beyond `limit`.
    /// A limit of zero keeps everything.
    pub fn push(&mut self, entry: LogEntry, limit: usize) {
        self.0.push_back(entry);
        if limit > 0 {
            while self.0.len() > limit {
                self.0.pop_front();
            }
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.0.iter()
    }

    pub fn latest(&self) -> Option<&LogEntry> {
        self.0.back()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ExecutionLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, entry) in self.0.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
                writeln!(f)?;
            }
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}

/// Durable automation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub disk: DiskId,
    pub trigger: Trigger,
    pub script: String,
    pub language: ScriptLanguage,
    #[serde(default)]
    pub log: ExecutionLog,
}

impl Task {
    pub fn new(disk: DiskId, trigger: Trigger, script: impl Into<String>, language: ScriptLanguage) -> Self {
        Self {
            id: TaskId::new(),
            disk,
            trigger,
            script: script.into(),
            language,
            log: ExecutionLog::default(),
        }
    }

    pub fn matches(&self, disk: &DiskId, trigger: Trigger) -> bool {
        self.disk == *disk && self.trigger == trigger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(output: &str) -> LogEntry {
        LogEntry {
            timestamp: Local::now(),
            output: Some(output.into()),
            error: None,
        }
    }

    #[test]
    fn log_drops_oldest_past_limit() {
        let mut log = ExecutionLog::default();
        for i in 0..5 {
            log.push(entry(&i.to_string()), 3);
        }
        let outputs: Vec<_> = log.entries().filter_map(|e| e.output.clone()).collect();
        assert_eq!(outputs, vec!["2", "3", "4"]);
    }

    #[test]
    fn zero_limit_is_unbounded() {
        let mut log = ExecutionLog::default();
        for i in 0..20 {
            log.push(entry(&i.to_string()), 0);
        }
        assert_eq!(log.len(), 20);
    }

    #[test]
    fn entry_renders_none_for_missing_fields() {
        let rendered = LogEntry {
            timestamp: Local::now(),
            output: Some("hi".into()),
            error: None,
        }
        .to_string();
        assert!(rendered.contains("Output: hi"));
        assert!(rendered.contains("Error: None"));
    }

    #[test]
    fn trigger_parses_cli_spellings() {
        assert_eq!("on-mount".parse::<Trigger>().unwrap(), Trigger::OnMount);
        assert_eq!("ON_UNMOUNT".parse::<Trigger>().unwrap(), Trigger::OnUnmount);
        assert!("hourly".parse::<Trigger>().is_err());
    }
}
