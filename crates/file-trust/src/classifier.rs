//! Path classification
//!
//! A folder is untrusted when it is, or sits beneath, one of the resolved
//! folders, or when its path contains the untrusted phrase. Nothing here
//! touches attributes or permissions.

use crate::phrase::Phrase;
use crate::rules::{lexical_normalize, LoadWarning, RuleStore};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Why a path was classified as untrusted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UntrustedBy {
    /// The path is this folder or lies beneath it
    Root(PathBuf),
    /// The path contains the untrusted phrase
    Phrase,
}

/// Pure classification of `path` against the resolved folders and phrase
pub fn is_untrusted_path(roots: &BTreeSet<PathBuf>, phrase: &Phrase, path: &Path) -> bool {
    untrusted_by(roots, phrase, path).is_some()
}

fn untrusted_by(roots: &BTreeSet<PathBuf>, phrase: &Phrase, path: &Path) -> Option<UntrustedBy> {
    let path = lexical_normalize(path);

    // Component-wise, so /etc/qubesx never matches /etc/qubes
    if let Some(root) = roots.iter().find(|root| path.starts_with(root)) {
        return Some(UntrustedBy::Root(root.clone()));
    }

    if phrase.matches(&path) {
        return Some(UntrustedBy::Phrase);
    }

    None
}

/// Resolved folders and phrase, loaded once per invocation
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    roots: BTreeSet<PathBuf>,
    phrase: Phrase,
}

impl Classifier {
    pub fn new(roots: BTreeSet<PathBuf>, phrase: Phrase) -> Self {
        Self { roots, phrase }
    }

    /// Load both folder lists and the phrase file, collecting every warning
    pub fn load(store: &RuleStore, phrase_file: &Path) -> (Self, Vec<LoadWarning>) {
        let resolved = store.load();
        let mut warnings = resolved.warnings;

        let (phrase, phrase_warning) = Phrase::load(phrase_file);
        if let Some(err) = phrase_warning {
            warnings.push(LoadWarning::Unreadable(err));
        }

        (Self::new(resolved.roots, phrase), warnings)
    }

    pub fn roots(&self) -> &BTreeSet<PathBuf> {
        &self.roots
    }

    pub fn phrase(&self) -> &Phrase {
        &self.phrase
    }

    pub fn classify(&self, path: &Path) -> Option<UntrustedBy> {
        untrusted_by(&self.roots, &self.phrase, path)
    }

    pub fn is_untrusted(&self, path: &Path) -> bool {
        self.classify(path).is_some()
    }
}
