use std::io;

/// Failure categories surfaced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A volume's properties could not be read.
    Enumeration,
    /// A live/configured pair conflicts with an existing mapping.
    BindConflict,
    /// The script gateway reported a failure.
    ScriptExecution,
    /// The durable store could not commit.
    Persistence,
    /// The disk arbitration session could not be opened.
    SessionInit,
    NotFound,
    Exists,
    InvalidArg,
    PermissionDenied,
    Cancelled,
    TimedOut,
    Failed,
}

#[derive(Debug, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct SdiskError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SdiskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for SdiskError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            io::ErrorKind::AlreadyExists => ErrorKind::Exists,
            io::ErrorKind::InvalidInput => ErrorKind::InvalidArg,
            io::ErrorKind::InvalidData => ErrorKind::InvalidArg,
            io::ErrorKind::TimedOut => ErrorKind::TimedOut,
            io::ErrorKind::Interrupted => ErrorKind::Cancelled,
            _ => ErrorKind::Failed,
        };

        Self::with_source(kind, err.to_string(), Box::new(err))
    }
}

impl From<serde_json::Error> for SdiskError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(ErrorKind::Persistence, err.to_string(), Box::new(err))
    }
}

impl From<toml::de::Error> for SdiskError {
    fn from(err: toml::de::Error) -> Self {
        Self::with_source(ErrorKind::InvalidArg, err.to_string(), Box::new(err))
    }
}

pub type SdiskResult<T> = Result<T, SdiskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err: SdiskError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = SdiskError::new(ErrorKind::BindConflict, "U1 already bound");
        assert_eq!(err.to_string(), "BindConflict: U1 already bound");
    }
}
