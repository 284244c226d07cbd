//! Keep untrusted folders' files marked
//!
//! `sweep` marks every regular file below the resolved folders. The watcher
//! then follows new and moved-in files, and starts over whenever either
//! folder list changes.

use crate::error::TrustError;
use crate::marker::MarkerChange;
use crate::mutator::TrustMutator;
use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Quiet period after a list change before rules are reloaded
const RELOAD_SETTLE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub marked: usize,
    pub already: usize,
    pub failed: usize,
}

impl SweepSummary {
    fn record(&mut self, path: &Path, result: Result<MarkerChange, TrustError>) {
        match result {
            Ok(MarkerChange::Marked) => {
                debug!("Marked {}", path.display());
                self.marked += 1;
            }
            Ok(_) => self.already += 1,
            Err(e) => {
                warn!("{}", e);
                self.failed += 1;
            }
        }
    }
}

/// Mark every regular file below each folder untrusted. Symlinks are not
/// followed and never marked.
pub fn sweep(roots: &BTreeSet<PathBuf>, mutator: &TrustMutator) -> SweepSummary {
    let mut summary = SweepSummary::default();
    for root in roots {
        sweep_dir(root, mutator, &mut summary);
    }
    summary
}

fn sweep_dir(dir: &Path, mutator: &TrustMutator, summary: &mut SweepSummary) {
    if !dir.is_dir() {
        debug!("Skipping {}, not a directory", dir.display());
        return;
    }

    for entry in WalkDir::new(dir).follow_links(false) {
        match entry {
            Ok(entry) if entry.file_type().is_file() => {
                summary.record(entry.path(), mutator.apply_marker(entry.path(), true));
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Unable to walk {}: {}", dir.display(), e);
                summary.failed += 1;
            }
        }
    }
}

/// What a filesystem event asks of the watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchAction {
    /// A folder list changed
    Reload,
    /// Something appeared below an untrusted folder
    Mark(PathBuf),
}

/// Decide what to do about one event
pub fn actions_for(event: &Event, lists: &[PathBuf], roots: &BTreeSet<PathBuf>) -> Vec<WatchAction> {
    if matches!(event.kind, EventKind::Access(_)) {
        return Vec::new();
    }

    if event.paths.iter().any(|p| lists.contains(p)) {
        return vec![WatchAction::Reload];
    }

    let arrived = match event.kind {
        EventKind::Create(_) => event.paths.iter().collect::<Vec<_>>(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.iter().collect(),
        // Old and new name, in that order
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.last().into_iter().collect()
        }
        _ => Vec::new(),
    };

    arrived
        .into_iter()
        .filter(|p| roots.iter().any(|root| p.starts_with(root)))
        .map(|p| WatchAction::Mark(p.clone()))
        .collect()
}

pub struct TrustWatcher {
    mutator: TrustMutator,
    lists: Vec<PathBuf>,
}

impl TrustWatcher {
    pub fn new(mutator: TrustMutator) -> Self {
        let lists = vec![
            mutator.rules().global_path().to_path_buf(),
            mutator.rules().local_path().to_path_buf(),
        ];
        Self { mutator, lists }
    }

    /// Resolved folders; load problems are logged by the rule store
    pub fn roots(&self) -> BTreeSet<PathBuf> {
        self.mutator.rules().load().roots
    }

    /// Sweep once and return
    pub fn sweep_once(&self) -> SweepSummary {
        self.sweep_roots(&self.roots())
    }

    fn sweep_roots(&self, roots: &BTreeSet<PathBuf>) -> SweepSummary {
        let summary = sweep(roots, &self.mutator);
        info!(
            "Swept {} folders: {} marked, {} already untrusted, {} failed",
            roots.len(),
            summary.marked,
            summary.already,
            summary.failed
        );
        summary
    }

    /// Sweep, then follow changes until the watcher goes away
    pub fn run(&self) -> Result<()> {
        loop {
            let roots = self.roots();
            self.sweep_roots(&roots);

            let (tx, rx) = mpsc::channel();
            let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
                match res {
                    Ok(event) => {
                        if let Err(e) = tx.send(event) {
                            warn!("Failed to send event: {}", e);
                        }
                    }
                    Err(e) => warn!("Watch error: {:?}", e),
                }
            })
            .context("Failed to create filesystem watcher")?;

            self.watch_all(&mut watcher, &roots);

            if !self.follow(&rx, &roots) {
                info!("Watcher channel disconnected");
                return Ok(());
            }
            info!("Folder lists changed, reloading");
        }
    }

    fn watch_all(&self, watcher: &mut RecommendedWatcher, roots: &BTreeSet<PathBuf>) {
        for root in roots {
            if !root.is_dir() {
                debug!("Skipping non-existent folder: {}", root.display());
                continue;
            }
            match watcher.watch(root, RecursiveMode::Recursive) {
                Ok(()) => info!("Watching {}", root.display()),
                Err(e) => warn!("Failed to watch {}: {}", root.display(), e),
            }
        }

        // Lists are replaced by rename, so watch their directories
        let parents: BTreeSet<&Path> = self.lists.iter().filter_map(|l| l.parent()).collect();
        for parent in parents {
            if !parent.is_dir() {
                debug!("Skipping non-existent list directory: {}", parent.display());
                continue;
            }
            if let Err(e) = watcher.watch(parent, RecursiveMode::NonRecursive) {
                warn!("Failed to watch {}: {}", parent.display(), e);
            }
        }
    }

    /// Handle events until a list changes (`true`) or the channel closes
    fn follow(&self, rx: &mpsc::Receiver<Event>, roots: &BTreeSet<PathBuf>) -> bool {
        loop {
            let event = match rx.recv() {
                Ok(event) => event,
                Err(_) => return false,
            };

            for action in actions_for(&event, &self.lists, roots) {
                match action {
                    WatchAction::Reload => {
                        // Let a burst of writes to the list settle
                        while rx.recv_timeout(RELOAD_SETTLE).is_ok() {}
                        return true;
                    }
                    WatchAction::Mark(path) => self.mark_arrival(&path),
                }
            }
        }
    }

    fn mark_arrival(&self, path: &Path) {
        let file_type = match fs::symlink_metadata(path) {
            Ok(meta) => meta.file_type(),
            Err(e) => {
                debug!("{} vanished before it could be marked: {}", path.display(), e);
                return;
            }
        };

        let mut summary = SweepSummary::default();
        if file_type.is_dir() {
            sweep_dir(path, &self.mutator, &mut summary);
        } else if file_type.is_file() {
            summary.record(path, self.mutator.apply_marker(path, true));
        }
        if summary.marked > 0 {
            info!("Marked {} new file(s) under {}", summary.marked, path.display());
        }
    }
}
