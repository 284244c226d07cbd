//! File trust settings
//!
//! Configuration file:
//! - ~/.config/qubes/file-trust.yaml - where the lists live, the unlock mode
//!   and the optional decoration helper
//!
//! Every field is optional; a missing file means the stock Qubes locations.

use crate::marker::DEFAULT_UNLOCK_MODE;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use trust_core::Paths;

/// Settings shared by `qvm-file-trust` and `qvm-trust-daemon`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustSettings {
    /// System-wide untrusted folder list
    #[serde(default = "default_global_list")]
    pub global_list: PathBuf,

    /// User untrusted folder list, rewritten on folder trust changes
    #[serde(default = "default_local_list")]
    pub local_list: PathBuf,

    /// File holding the untrusted phrase
    #[serde(default = "default_phrase_file")]
    pub phrase_file: PathBuf,

    /// Mode applied when a file must be opened up to read or write its marker
    #[serde(default = "default_unlock_mode", with = "octal")]
    pub unlock_mode: u32,

    /// Emblem helper run after a file's trust changes
    #[serde(default)]
    pub decoration: DecorationConfig,
}

fn default_global_list() -> PathBuf {
    Paths::new().global_list()
}

fn default_local_list() -> PathBuf {
    Paths::new().local_list()
}

fn default_phrase_file() -> PathBuf {
    Paths::new().phrase_file()
}

fn default_unlock_mode() -> u32 {
    DEFAULT_UNLOCK_MODE
}

impl Default for TrustSettings {
    fn default() -> Self {
        Self {
            global_list: default_global_list(),
            local_list: default_local_list(),
            phrase_file: default_phrase_file(),
            unlock_mode: default_unlock_mode(),
            decoration: DecorationConfig::default(),
        }
    }
}

impl TrustSettings {
    /// Load settings from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Paths::new().settings())
    }

    /// Load settings from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read settings from {:?}", path))?;
            serde_yaml::from_str::<Self>(&content)
                .with_context(|| format!("Failed to parse settings from {:?}", path))?
        } else {
            Self::default()
        };
        Ok(settings.expanded())
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Expand `~` in every configured path
    fn expanded(mut self) -> Self {
        self.global_list = expand_path(&self.global_list);
        self.local_list = expand_path(&self.local_list);
        self.phrase_file = expand_path(&self.phrase_file);
        self
    }
}

/// Decoration helper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecorationConfig {
    /// Run the helper at all
    #[serde(default = "default_decoration_enabled")]
    pub enabled: bool,

    /// Helper invoked as `<command> <path> on|off`
    #[serde(default)]
    pub command: Option<String>,
}

fn default_decoration_enabled() -> bool {
    true
}

impl Default for DecorationConfig {
    fn default() -> Self {
        Self {
            enabled: default_decoration_enabled(),
            command: None,
        }
    }
}

/// Expand ~ in a configured path
fn expand_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(shellexpand::tilde(s).as_ref()),
        None => path.to_path_buf(),
    }
}

/// Modes are written the way chmod takes them, e.g. `"644"`
mod octal {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(mode: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:o}", mode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let digits = raw.trim().trim_start_matches("0o");
        u32::from_str_radix(digits, 8)
            .ok()
            .filter(|mode| *mode <= 0o7777)
            .ok_or_else(|| de::Error::custom(format!("invalid file mode: {}", raw)))
    }
}
