//! Untrusted phrase
//!
//! Any path containing the phrase (ignoring case) is untrusted, wherever it
//! lives. Only the first non-comment line of the phrase file counts.

use crate::error::{ListKind, TrustError};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Phrase(String);

impl Phrase {
    pub fn new(phrase: impl Into<String>) -> Self {
        Self(phrase.into().trim().to_string())
    }

    /// Load the phrase file. A missing file means no phrase; an unreadable
    /// one also means no phrase, plus a warning for the caller to surface.
    pub fn load(path: &Path) -> (Self, Option<TrustError>) {
        match fs::read_to_string(path) {
            Ok(text) => {
                let phrase = Self::parse(&text);
                debug!("Untrusted phrase: {:?}", phrase.as_str());
                (phrase, None)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No phrase file at {}", path.display());
                (Self::default(), None)
            }
            Err(source) => {
                let err = TrustError::RuleFileUnreadable {
                    kind: ListKind::Phrase,
                    path: path.to_path_buf(),
                    source,
                };
                warn!("{}", err);
                (Self::default(), Some(err))
            }
        }
    }

    /// First non-blank line that is not a `#` comment
    pub fn parse(text: &str) -> Self {
        text.lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('#'))
            .map(Self::new)
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Case-insensitive containment. An empty phrase matches nothing.
    pub fn matches(&self, path: &Path) -> bool {
        if self.0.is_empty() {
            return false;
        }
        path.to_string_lossy()
            .to_lowercase()
            .contains(&self.0.to_lowercase())
    }
}
