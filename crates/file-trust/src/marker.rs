//! Per-file trust marker
//!
//! An untrusted file carries `user.qubes.untrusted=true` and has every
//! permission bit cleared. A trusted file carries neither and has the mode it
//! had before it was marked. The pre-marker mode is kept next to the marker in
//! `user.qubes.untrusted.mode` so clearing the marker can put it back exactly.
//!
//! Reading or writing `user.*` attributes needs read or write access, so every
//! operation briefly relaxes the mode through a [`PermissionGuard`] and always
//! ends with the file either at its original mode or locked with the marker.
//!
//! Two invocations mutating the same file at once are not coordinated.

use crate::error::TrustError;
use crate::xattr;
use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::{debug, warn};

pub const MARKER_ATTR: &str = "user.qubes.untrusted";
pub const MARKER_VALUE: &[u8] = b"true";
pub const SAVED_MODE_ATTR: &str = "user.qubes.untrusted.mode";

/// Mode of a marked file
pub const LOCKED_MODE: u32 = 0o000;
/// Mode used to regain access to a file we cannot read or write
pub const DEFAULT_UNLOCK_MODE: u32 = 0o644;

const OWNER_READ: u32 = 0o400;
const OWNER_READ_WRITE: u32 = 0o600;

fn chmod(path: &Path, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, Permissions::from_mode(mode))
}

fn file_mode(path: &Path) -> Result<u32, TrustError> {
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o7777)
        .map_err(|source| TrustError::Stat {
            path: path.to_path_buf(),
            source,
        })
}

fn format_mode(mode: u32) -> String {
    format!("{:o}", mode)
}

fn parse_mode(raw: &[u8]) -> Option<u32> {
    let text = std::str::from_utf8(raw).ok()?;
    u32::from_str_radix(text.trim(), 8)
        .ok()
        .filter(|mode| *mode <= 0o7777)
}

/// Scoped permission change on one object.
///
/// Created by relaxing the mode when needed. Ends by either [`restore`] or
/// [`settle`]; if dropped before that, the original mode is put back.
///
/// [`restore`]: PermissionGuard::restore
/// [`settle`]: PermissionGuard::settle
pub struct PermissionGuard<'a> {
    path: &'a Path,
    original: u32,
    relaxed: bool,
    settled: bool,
}

impl<'a> PermissionGuard<'a> {
    /// Make sure the owner has the `needed` bits, chmodding to `unlock_mode`
    /// if they are missing.
    pub fn unlock(
        path: &'a Path,
        original: u32,
        needed: u32,
        unlock_mode: u32,
    ) -> Result<Self, TrustError> {
        let relaxed = original & needed != needed;
        if relaxed {
            debug!(
                "Unlocking {} ({:04o} -> {:04o})",
                path.display(),
                original,
                unlock_mode
            );
            chmod(path, unlock_mode).map_err(|source| TrustError::Unlock {
                path: path.to_path_buf(),
                source,
            })?;
        }

        Ok(Self {
            path,
            original,
            relaxed,
            settled: false,
        })
    }

    pub fn original(&self) -> u32 {
        self.original
    }

    /// Leave the object at `mode`. The guard stays armed if this fails.
    pub fn settle(&mut self, mode: u32) -> io::Result<()> {
        chmod(self.path, mode)?;
        debug!("Set {} to {:04o}", self.path.display(), mode);
        self.settled = true;
        Ok(())
    }

    /// Put the original mode back
    pub fn restore(&mut self) -> io::Result<()> {
        self.settled = true;
        if self.relaxed {
            chmod(self.path, self.original)?;
        }
        Ok(())
    }
}

impl Drop for PermissionGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && self.relaxed {
            if let Err(e) = chmod(self.path, self.original) {
                warn!(
                    "Unable to restore permissions {:04o} on {}: {}",
                    self.original,
                    self.path.display(),
                    e
                );
            }
        }
    }
}

/// Result of a marker change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerChange {
    Marked,
    AlreadyMarked,
    Cleared,
    AlreadyClear,
}

impl MarkerChange {
    /// Whether the file carries the marker afterwards
    pub fn is_untrusted(&self) -> bool {
        matches!(self, MarkerChange::Marked | MarkerChange::AlreadyMarked)
    }
}

#[derive(Debug, Default)]
struct MarkerState {
    /// Marker attribute exists, whatever its value
    present: bool,
    /// Marker attribute exists with the truthy value
    marked: bool,
    saved_mode: Option<u32>,
}

fn read_state(path: &Path) -> io::Result<MarkerState> {
    let names = xattr::list(path)?;
    let mut state = MarkerState::default();

    if names.iter().any(|n| n == MARKER_ATTR) {
        let value = xattr::get(path, MARKER_ATTR)?;
        state.present = value.is_some();
        state.marked = value.as_deref() == Some(MARKER_VALUE);
        if let Some(value) = value.filter(|v| v != MARKER_VALUE) {
            debug!(
                "{} carries {}={}, not treated as untrusted",
                path.display(),
                MARKER_ATTR,
                xattr::display_value(&value)
            );
        }
    }

    if names.iter().any(|n| n == SAVED_MODE_ATTR) {
        state.saved_mode = xattr::get(path, SAVED_MODE_ATTR)?.and_then(|v| parse_mode(&v));
    }

    Ok(state)
}

/// Reads and writes the trust marker
#[derive(Debug, Clone)]
pub struct MarkerStore {
    unlock_mode: u32,
}

impl Default for MarkerStore {
    fn default() -> Self {
        Self::new(DEFAULT_UNLOCK_MODE)
    }
}

impl MarkerStore {
    pub fn new(unlock_mode: u32) -> Self {
        Self {
            unlock_mode: unlock_mode & 0o7777,
        }
    }

    /// Whether `path` carries the marker. An absent attribute is `Ok(false)`;
    /// only a failure to read attributes at all is an error.
    pub fn is_marked(&self, path: &Path) -> Result<bool, TrustError> {
        let original = file_mode(path)?;
        let mut guard = PermissionGuard::unlock(path, original, OWNER_READ, self.unlock_mode)?;

        let state = read_state(path);
        let marked = state.as_ref().map(|s| s.marked).unwrap_or(false);

        if let Err(source) = guard.restore() {
            return Err(if marked {
                TrustError::InconsistentState {
                    path: path.to_path_buf(),
                    detail: format!("marked file left unlocked: {}", source),
                }
            } else {
                TrustError::PermissionChange {
                    path: path.to_path_buf(),
                    mode: original,
                    source,
                }
            });
        }

        state
            .map(|s| s.marked)
            .map_err(|source| TrustError::AttributeRead {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Mark `path` untrusted (attribute set, permissions locked) or trusted
    /// (attribute removed, pre-marker permissions restored).
    pub fn set_marker(&self, path: &Path, untrusted: bool) -> Result<MarkerChange, TrustError> {
        let current = file_mode(path)?;
        let mut guard =
            PermissionGuard::unlock(path, current, OWNER_READ_WRITE, self.unlock_mode)?;

        let state = match read_state(path) {
            Ok(state) => state,
            Err(source) => {
                let err = TrustError::AttributeRead {
                    path: path.to_path_buf(),
                    source,
                };
                // Nothing is known about the marker, so treat a failed rollback
                // as a permission failure
                return Err(abandon(path, &mut guard, false, err));
            }
        };

        if untrusted {
            self.mark(path, guard, state)
        } else {
            self.clear(path, guard, state)
        }
    }

    /// Mode the file had before it was first marked
    fn pre_marker_mode(&self, state: &MarkerState, current: u32) -> u32 {
        match state.saved_mode {
            Some(mode) if state.present => mode,
            // Marked without a saved mode: the current mode is the lock itself
            _ if state.present && current == LOCKED_MODE => self.unlock_mode,
            _ => current,
        }
    }

    fn mark(
        &self,
        path: &Path,
        mut guard: PermissionGuard<'_>,
        state: MarkerState,
    ) -> Result<MarkerChange, TrustError> {
        let original = self.pre_marker_mode(&state, guard.original());
        let keep_saved = state.present && state.saved_mode.is_some();

        if !keep_saved {
            if let Err(source) = xattr::set(path, SAVED_MODE_ATTR, format_mode(original).as_bytes())
            {
                let err = TrustError::AttributeWrite {
                    path: path.to_path_buf(),
                    source,
                };
                return Err(abandon(path, &mut guard, state.marked, err));
            }
        }

        if !state.marked {
            if let Err(source) = xattr::set(path, MARKER_ATTR, MARKER_VALUE) {
                if !keep_saved {
                    if let Err(e) = xattr::remove(path, SAVED_MODE_ATTR) {
                        warn!("Unable to remove {} from {}: {}", SAVED_MODE_ATTR, path.display(), e);
                    }
                }
                let err = TrustError::AttributeWrite {
                    path: path.to_path_buf(),
                    source,
                };
                return Err(abandon(path, &mut guard, false, err));
            }
        }

        if let Err(source) = guard.settle(LOCKED_MODE) {
            // Marker present but the file is still open: undo the marker
            let undone = if state.marked {
                guard.restore()
            } else {
                xattr::remove(path, MARKER_ATTR)
                    .and_then(|_| {
                        if keep_saved {
                            Ok(true)
                        } else {
                            xattr::remove(path, SAVED_MODE_ATTR)
                        }
                    })
                    .and_then(|_| guard.restore())
            };

            return Err(match undone {
                Ok(()) => TrustError::PermissionChange {
                    path: path.to_path_buf(),
                    mode: LOCKED_MODE,
                    source,
                },
                Err(rollback) => TrustError::InconsistentState {
                    path: path.to_path_buf(),
                    detail: format!(
                        "marker set but permissions could not be locked ({}); rollback failed ({})",
                        source, rollback
                    ),
                },
            });
        }

        debug!("Marked {} untrusted (was {:04o})", path.display(), original);
        Ok(if state.marked {
            MarkerChange::AlreadyMarked
        } else {
            MarkerChange::Marked
        })
    }

    fn clear(
        &self,
        path: &Path,
        mut guard: PermissionGuard<'_>,
        state: MarkerState,
    ) -> Result<MarkerChange, TrustError> {
        if !state.present {
            let original = guard.original();
            guard
                .restore()
                .map_err(|source| TrustError::PermissionChange {
                    path: path.to_path_buf(),
                    mode: original,
                    source,
                })?;
            return Ok(MarkerChange::AlreadyClear);
        }

        let restore_to = self.pre_marker_mode(&state, guard.original());

        if let Err(source) = xattr::remove(path, MARKER_ATTR) {
            let err = TrustError::AttributeRemove {
                path: path.to_path_buf(),
                source,
            };
            return Err(abandon(path, &mut guard, state.marked, err));
        }

        if let Err(e) = xattr::remove(path, SAVED_MODE_ATTR) {
            warn!("Unable to remove {} from {}: {}", SAVED_MODE_ATTR, path.display(), e);
        }

        if let Err(source) = guard.settle(restore_to) {
            // Unmarked but not back at the original mode: put the marker back
            let relocked = xattr::set(path, MARKER_ATTR, MARKER_VALUE)
                .and_then(|_| xattr::set(path, SAVED_MODE_ATTR, format_mode(restore_to).as_bytes()))
                .and_then(|_| guard.restore());

            return Err(match relocked {
                Ok(()) => TrustError::PermissionChange {
                    path: path.to_path_buf(),
                    mode: restore_to,
                    source,
                },
                Err(rollback) => TrustError::InconsistentState {
                    path: path.to_path_buf(),
                    detail: format!(
                        "marker removed but permissions {:04o} could not be restored ({}); rollback failed ({})",
                        restore_to, source, rollback
                    ),
                },
            });
        }

        debug!("Cleared marker on {} (now {:04o})", path.display(), restore_to);
        Ok(MarkerChange::Cleared)
    }
}

/// Roll the mode back after a failure that left the marker as it was
fn abandon(path: &Path, guard: &mut PermissionGuard<'_>, marked: bool, err: TrustError) -> TrustError {
    match guard.restore() {
        Ok(()) => err,
        Err(source) => {
            warn!("{}", err);
            if marked {
                TrustError::InconsistentState {
                    path: path.to_path_buf(),
                    detail: format!("marked file left unlocked: {}", source),
                }
            } else {
                TrustError::PermissionChange {
                    path: path.to_path_buf(),
                    mode: guard.original(),
                    source,
                }
            }
        }
    }
}
