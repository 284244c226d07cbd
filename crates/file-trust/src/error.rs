//! Failure kinds and the exit codes integrations rely on
//!
//! File manager extensions shell out to `qvm-file-trust` and only look at the
//! exit status, so every variant maps to a stable code. Codes 0 and 1 are
//! reserved for "trusted" and "untrusted"; failures use the sysexits range.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Exit status for a trusted object or a successful mutation
pub const EXIT_TRUSTED: i32 = 0;
/// Exit status for an untrusted object
pub const EXIT_UNTRUSTED: i32 = 1;
/// Bad command line
pub const EXIT_USAGE: i32 = 64;
/// Settings file could not be loaded
pub const EXIT_CONFIG: i32 = 78;

/// Which of the configuration text files a message is about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Global,
    Local,
    Phrase,
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListKind::Global => write!(f, "global untrusted folder list"),
            ListKind::Local => write!(f, "local untrusted folder list"),
            ListKind::Phrase => write!(f, "untrusted phrase file"),
        }
    }
}

/// Errors raised while deciding or enforcing trust
#[derive(Error, Debug)]
pub enum TrustError {
    #[error("Unable to open {kind}: {}", path.display())]
    RuleFileUnreadable {
        kind: ListKind,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to inspect {}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to read extended attributes of {}", path.display())]
    AttributeRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to set untrusted attribute on {}", path.display())]
    AttributeWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to remove untrusted attribute on {}", path.display())]
    AttributeRemove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not unlock {} for reading", path.display())]
    Unlock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to set permissions {mode:04o} on {}", path.display())]
    PermissionChange {
        path: PathBuf,
        mode: u32,
        #[source]
        source: io::Error,
    },

    #[error("Marker and permissions of {} disagree: {detail}", path.display())]
    InconsistentState { path: PathBuf, detail: String },

    #[error("Unable to read local untrusted folder list: {}", path.display())]
    LocalListUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to write local untrusted folder list: {}", path.display())]
    LocalListUnwritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TrustError {
    /// Stable process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            TrustError::AttributeRead { .. } => 65,
            TrustError::AttributeWrite { .. } => 66,
            TrustError::AttributeRemove { .. } => 67,
            TrustError::InconsistentState { .. } => 70,
            TrustError::RuleFileUnreadable {
                kind: ListKind::Local,
                ..
            }
            | TrustError::LocalListUnreadable { .. } => 72,
            TrustError::RuleFileUnreadable { .. } => 71,
            TrustError::LocalListUnwritable { .. } => 73,
            TrustError::Stat { .. } => 74,
            TrustError::Unlock { .. } | TrustError::PermissionChange { .. } => 77,
        }
    }
}
