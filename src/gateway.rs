//! Script execution gateway
//!
//! The engine never interprets script bodies. It hands them to a
//! [`ScriptGateway`] and records whatever comes back.

use std::fmt;

use async_trait::async_trait;

use crate::task::ScriptLanguage;

/// Failure reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub code: i32,
    pub message: String,
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) {}", self.code, self.message)
    }
}

/// Result of one script run. Both parts may be present: a script can print
/// output and still fail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutcome {
    pub output: Option<String>,
    pub error: Option<ScriptError>,
}

impl ScriptOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        let output = output.into();
        Self {
            output: (!output.is_empty()).then_some(output),
            error: None,
        }
    }

    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        Self {
            output: None,
            error: Some(ScriptError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[async_trait]
pub trait ScriptGateway: Send + Sync {
    /// Runs `script` to completion.
    async fn execute(&self, script: &str, language: ScriptLanguage) -> ScriptOutcome;

    /// Blocking variant for callers outside the async runtime.
    fn execute_blocking(&self, script: &str, language: ScriptLanguage) -> ScriptOutcome;
}
