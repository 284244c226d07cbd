//! Trust Core - Shared functionality for the file trust tools
//!
//! Both `qvm-file-trust` and `qvm-trust-daemon` agree on where the rule
//! lists live and how external helpers get launched; that lives here.

pub mod paths;
pub mod process;

pub use paths::Paths;
