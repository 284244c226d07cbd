//! Standard paths used by the file trust tools

use std::path::PathBuf;

/// Name shared by the system and user folder lists
pub const FOLDER_LIST_NAME: &str = "always-open-in-dispvm.list";

/// Name of the untrusted phrase file
pub const PHRASE_FILE_NAME: &str = "always-open-in-dispvm.phrase";

/// Name of the user settings file
pub const SETTINGS_FILE_NAME: &str = "file-trust.yaml";

/// Standard file trust paths
pub struct Paths {
    /// System-wide directory (/etc/qubes)
    pub system: PathBuf,
    /// User config directory (~/.config/qubes)
    pub config: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    pub fn new() -> Self {
        let config = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("qubes");

        Self {
            system: PathBuf::from("/etc/qubes"),
            config,
        }
    }

    /// Folder list shipped by the system administrator
    pub fn global_list(&self) -> PathBuf {
        self.system.join(FOLDER_LIST_NAME)
    }

    /// Folder list owned by the invoking user
    pub fn local_list(&self) -> PathBuf {
        self.config.join(FOLDER_LIST_NAME)
    }

    pub fn phrase_file(&self) -> PathBuf {
        self.system.join(PHRASE_FILE_NAME)
    }

    pub fn settings(&self) -> PathBuf {
        self.config.join(SETTINGS_FILE_NAME)
    }
}
