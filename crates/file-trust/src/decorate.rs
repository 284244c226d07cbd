//! File manager emblems
//!
//! After a file's trust changes an optional helper is run as
//! `<command> <path> on|off`. It is never waited on and its failure never
//! changes the outcome of the trust change.

use crate::config::DecorationConfig;
use std::ffi::OsStr;
use std::path::Path;
use tracing::{debug, warn};
use trust_core::process::{command_exists, spawn_detached};

#[derive(Debug, Clone, Default)]
pub struct Decorator {
    command: Option<String>,
}

impl Decorator {
    pub fn new(config: &DecorationConfig) -> Self {
        let command = config
            .command
            .as_deref()
            .map(str::trim)
            .filter(|c| config.enabled && !c.is_empty())
            .map(|c| shellexpand::tilde(c).into_owned());

        if let Some(command) = &command {
            if !command_exists(command) {
                warn!("Decoration helper {} not found", command);
            }
        }
        Self { command }
    }

    pub fn is_enabled(&self) -> bool {
        self.command.is_some()
    }

    /// Best effort: `untrusted` turns the emblem on, otherwise off
    pub fn decorate(&self, path: &Path, untrusted: bool) {
        let Some(command) = &self.command else {
            return;
        };
        let flag = if untrusted { "on" } else { "off" };

        match spawn_detached(command, [path.as_os_str(), OsStr::new(flag)]) {
            Ok(pid) => debug!("Decorating {} {} (pid {})", path.display(), flag, pid),
            Err(e) => warn!("Unable to run decoration helper {}: {}", command, e),
        }
    }
}
