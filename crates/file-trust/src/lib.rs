//! File trust - "always open in a disposable VM" for files and folders
//!
//! An untrusted object may have come from somewhere we do not control and
//! should only ever be opened in an isolated VM. This crate decides which
//! objects are untrusted and records that decision:
//!
//! - Folders are untrusted when a folder list names them or an ancestor, or
//!   when their path contains the untrusted phrase.
//! - Files are untrusted when they carry the `user.qubes.untrusted` marker,
//!   which always comes with every permission bit cleared.
//!
//! The isolation itself is somebody else's job; it only reads the marker.

pub mod classifier;
pub mod config;
pub mod decorate;
pub mod error;
pub mod marker;
pub mod mutator;
pub mod output;
pub mod phrase;
pub mod rules;
pub mod watch;
pub mod xattr;

pub use classifier::{is_untrusted_path, Classifier, UntrustedBy};
pub use config::TrustSettings;
pub use error::{ListKind, TrustError};
pub use marker::{MarkerChange, MarkerStore, PermissionGuard};
pub use mutator::{Aggregate, BatchReport, Mode, Tally, TrustMutator};
pub use output::Reporter;
pub use phrase::Phrase;
pub use rules::{LocalRuleFile, ResolvedRules, RuleEdit, RuleStore};
pub use watch::{sweep, SweepSummary, TrustWatcher};
