//! Subprocess script gateway
//!
//! Shell scripts run through `/bin/sh -c`, AppleScript through
//! `osascript -e`. A non-zero exit status is reported as an execution error
//! carrying the exit code and standard error.

use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::gateway::{ScriptGateway, ScriptOutcome};
use crate::task::ScriptLanguage;

/// Code used when the interpreter could not be started.
pub const SPAWN_FAILED: i32 = -1;
/// Code used when the script exceeded its time bound.
pub const TIMED_OUT: i32 = -2;
/// Code used when the process was terminated by a signal.
pub const KILLED: i32 = -3;

pub struct ProcessGateway {
    timeout: Option<Duration>,
}

impl ProcessGateway {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    fn program(language: ScriptLanguage) -> (&'static str, &'static str) {
        match language {
            ScriptLanguage::Shell => ("/bin/sh", "-c"),
            ScriptLanguage::AppleScript => ("osascript", "-e"),
        }
    }
}

impl Default for ProcessGateway {
    fn default() -> Self {
        Self::new(None)
    }
}

fn outcome(output: Output) -> ScriptOutcome {
    let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
    if output.status.success() {
        return ScriptOutcome::success(stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
    let code = output.status.code().unwrap_or(KILLED);
    let message = if stderr.is_empty() {
        format!("script exited with status {code}")
    } else {
        stderr
    };
    ScriptOutcome {
        output: (!stdout.is_empty()).then_some(stdout),
        ..ScriptOutcome::failure(code, message)
    }
}

#[async_trait]
impl ScriptGateway for ProcessGateway {
    async fn execute(&self, script: &str, language: ScriptLanguage) -> ScriptOutcome {
        let (program, flag) = Self::program(language);
        let mut command = Command::new(program);
        command.arg(flag).arg(script).kill_on_drop(true);

        let run = command.output();
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(?limit, "script timed out");
                    return ScriptOutcome::failure(
                        TIMED_OUT,
                        format!("script timed out after {}s", limit.as_secs()),
                    );
                }
            },
            None => run.await,
        };

        match result {
            Ok(output) => outcome(output),
            Err(e) => ScriptOutcome::failure(SPAWN_FAILED, format!("could not start {program}: {e}")),
        }
    }

    fn execute_blocking(&self, script: &str, language: ScriptLanguage) -> ScriptOutcome {
        let (program, flag) = Self::program(language);
        match std::process::Command::new(program).arg(flag).arg(script).output() {
            Ok(output) => outcome(output),
            Err(e) => ScriptOutcome::failure(SPAWN_FAILED, format!("could not start {program}: {e}")),
        }
    }
}
