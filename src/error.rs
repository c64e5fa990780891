use std::fmt::{Display, Formatter};
use std::process::ExitStatus;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Which side of a diff failed to parse.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DocumentSide {
    Before,
    After,
}

impl Display for DocumentSide {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Before => f.write_str("before"),
            Self::After => f.write_str("after"),
        }
    }
}

#[derive(Debug, Error)]
pub enum KronoformError {
    #[error("invalid filename {path} ({reason})")]
    InvalidPath { path: String, reason: &'static str },

    #[error("manifest file {path} does not exist")]
    NotFound { path: String },

    #[error("failed to read manifest file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Kubernetes client unavailable: {reason}")]
    ClientUnavailable { reason: String },

    #[error("failed to write {kind} {name}")]
    StoreWrite {
        kind: &'static str,
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to read {kind} records in namespace {namespace}")]
    StoreRead {
        kind: &'static str,
        namespace: String,
        #[source]
        source: BoxError,
    },

    #[error("{program} {verb} failed: {status}")]
    SubprocessFailed {
        program: String,
        verb: String,
        status: ExitStatus,
    },

    #[error("failed to run {program}")]
    SubprocessIo {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {side} YAML: {reason}")]
    MalformedDocument { side: DocumentSide, reason: String },

    #[error("{kind} {name} not found in namespace {namespace}")]
    LookupNotFound {
        kind: &'static str,
        name: String,
        namespace: String,
    },
}

impl KronoformError {
    /// True for errors that only affect the audit trail and must never block
    /// the wrapped command.
    pub fn is_recording_only(&self) -> bool {
        matches!(
            self,
            Self::ClientUnavailable { .. } | Self::StoreWrite { .. } | Self::StoreRead { .. }
        )
    }
}
