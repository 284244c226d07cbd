//! Untrusted folder lists
//!
//! Two lists describe which folder trees are untrusted:
//! - /etc/qubes/always-open-in-dispvm.list - system list, read only
//! - ~/.config/qubes/always-open-in-dispvm.list - user list, rewritten by
//!   `qvm-file-trust` when a folder's trust changes
//!
//! One path per line. Blank lines and `#` comments are skipped. In the user
//! list a `-` prefix removes a folder the system list contributed.

use crate::error::{ListKind, TrustError};
use std::collections::BTreeSet;
use std::fmt;
use std::fs::{self, File, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Expand a leading `~` and lexically normalize the result
pub fn normalize_path(raw: &str) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    lexical_normalize(Path::new(expanded.as_ref()))
}

/// Collapse repeated separators, `.` and `..` without touching the filesystem.
/// The result never ends in a separator.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let at_relative_start = matches!(
                    out.components().next_back(),
                    None | Some(Component::ParentDir)
                ) && !out.has_root();
                if at_relative_start {
                    out.push("..");
                } else {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// One physical line of a folder list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleLine {
    /// Blank line or comment
    Skip,
    /// Folder to treat as untrusted
    Add(PathBuf),
    /// `-` prefixed folder
    Negate(PathBuf),
}

impl RuleLine {
    pub fn parse(raw: &str) -> Self {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            return RuleLine::Skip;
        }

        match line.strip_prefix('-') {
            Some(rest) => {
                let rest = rest.trim_start();
                if rest.is_empty() {
                    RuleLine::Skip
                } else {
                    RuleLine::Negate(normalize_path(rest))
                }
            }
            None => RuleLine::Add(normalize_path(line)),
        }
    }

    /// The folder this line names, negated or not
    pub fn path(&self) -> Option<&Path> {
        match self {
            RuleLine::Skip => None,
            RuleLine::Add(path) | RuleLine::Negate(path) => Some(path),
        }
    }
}

/// Something odd found while loading, reported but never fatal
#[derive(Debug)]
pub enum LoadWarning {
    /// A list or the phrase file exists but could not be read
    Unreadable(TrustError),
    /// A `-` line in the system list; it is added like any other line
    InertNegation { source: PathBuf, line: usize, folder: PathBuf },
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadWarning::Unreadable(err) => write!(f, "{}", err),
            LoadWarning::InertNegation { source, line, folder } => write!(
                f,
                "{}:{}: '-' has no effect in the system list, {} stays untrusted",
                source.display(),
                line,
                folder.display()
            ),
        }
    }
}

/// The folder set after merging both lists
#[derive(Debug, Default)]
pub struct ResolvedRules {
    pub roots: BTreeSet<PathBuf>,
    pub warnings: Vec<LoadWarning>,
}

impl ResolvedRules {
    /// Merge the system list. Negation is not honoured here.
    pub fn apply_global(&mut self, text: &str, source: &Path) {
        for (index, raw) in text.lines().enumerate() {
            match RuleLine::parse(raw) {
                RuleLine::Skip => {}
                RuleLine::Add(path) => {
                    debug!("global: {}", path.display());
                    self.roots.insert(path);
                }
                RuleLine::Negate(path) => {
                    let warning = LoadWarning::InertNegation {
                        source: source.to_path_buf(),
                        line: index + 1,
                        folder: path.clone(),
                    };
                    warn!("{}", warning);
                    self.warnings.push(warning);
                    self.roots.insert(path);
                }
            }
        }
    }

    /// Merge the user list, whose `-` lines remove folders
    pub fn apply_local(&mut self, text: &str) {
        for raw in text.lines() {
            match RuleLine::parse(raw) {
                RuleLine::Skip => {}
                RuleLine::Add(path) => {
                    debug!("local: {}", path.display());
                    self.roots.insert(path);
                }
                RuleLine::Negate(path) => {
                    debug!("local: -{}", path.display());
                    self.roots.remove(&path);
                }
            }
        }
    }
}

/// Read a list, mapping "does not exist" to `None`
fn read_list(path: &Path, kind: ListKind) -> Result<Option<String>, TrustError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(TrustError::RuleFileUnreadable {
            kind,
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Reader for the system and user folder lists
#[derive(Debug, Clone)]
pub struct RuleStore {
    global: PathBuf,
    local: PathBuf,
}

impl RuleStore {
    pub fn new(global: impl Into<PathBuf>, local: impl Into<PathBuf>) -> Self {
        Self {
            global: global.into(),
            local: local.into(),
        }
    }

    pub fn global_path(&self) -> &Path {
        &self.global
    }

    pub fn local_path(&self) -> &Path {
        &self.local
    }

    /// Resolve both lists. Missing or unreadable lists contribute nothing.
    pub fn load(&self) -> ResolvedRules {
        let mut resolved = ResolvedRules::default();

        match read_list(&self.global, ListKind::Global) {
            Ok(Some(text)) => resolved.apply_global(&text, &self.global),
            Ok(None) => debug!("No global list at {}", self.global.display()),
            Err(e) => {
                warn!("{}", e);
                resolved.warnings.push(LoadWarning::Unreadable(e));
            }
        }

        match read_list(&self.local, ListKind::Local) {
            Ok(Some(text)) => resolved.apply_local(&text),
            Ok(None) => debug!("No local list at {}", self.local.display()),
            Err(e) => {
                warn!("{}", e);
                resolved.warnings.push(LoadWarning::Unreadable(e));
            }
        }

        resolved
    }

    /// Whether the system list names `folder`. Unlike `load`, an unreadable
    /// list is an error here: guessing would silently leave a folder untrusted.
    pub fn global_contains(&self, folder: &Path) -> Result<bool, TrustError> {
        let text = match read_list(&self.global, ListKind::Global)? {
            Some(text) => text,
            None => return Ok(false),
        };

        Ok(text
            .lines()
            .filter_map(|raw| match RuleLine::parse(raw) {
                RuleLine::Skip => None,
                RuleLine::Add(path) | RuleLine::Negate(path) => Some(path),
            })
            .any(|path| path == folder))
    }
}

/// What a rewrite of the user list did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleEdit {
    /// Folder appended as untrusted
    Added,
    /// A plain line for the folder already existed; nothing written
    AlreadyUntrusted,
    /// The folder's own line was removed
    Removed,
    /// A `-` line was appended to override the system list
    Negated,
    /// The system list names the folder and a `-` line already overrides it
    AlreadyTrusted,
    /// Neither list made the folder untrusted
    WasNotUntrusted,
}

/// The user-owned folder list
#[derive(Debug, Clone)]
pub struct LocalRuleFile {
    path: PathBuf,
}

impl LocalRuleFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents; a list that does not exist yet reads as empty
    pub fn read(&self) -> Result<String, TrustError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(TrustError::LocalListUnreadable {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Drop any `-` line for `folder`, then append it unless a plain line
    /// for it is already there
    pub fn mark_untrusted(&self, folder: &Path) -> Result<RuleEdit, TrustError> {
        let current = self.read()?;

        let mut had_plain = false;
        let mut had_negation = false;
        let mut updated = String::with_capacity(current.len());
        for raw in current.split_inclusive('\n') {
            match RuleLine::parse(raw) {
                RuleLine::Negate(ref p) if p == folder => had_negation = true,
                RuleLine::Add(ref p) if p == folder => {
                    had_plain = true;
                    updated.push_str(raw);
                }
                _ => updated.push_str(raw),
            }
        }

        if had_plain && !had_negation {
            return Ok(RuleEdit::AlreadyUntrusted);
        }

        // An existing plain line carries the folder once its `-` lines are gone
        if !had_plain {
            push_line(&mut updated, &folder.to_string_lossy());
        }

        self.replace(&updated)?;
        Ok(RuleEdit::Added)
    }

    /// Drop every line naming `folder`; when the system list names it too,
    /// append a `-` line so the merged result is trusted.
    pub fn mark_trusted(&self, folder: &Path, in_global: bool) -> Result<RuleEdit, TrustError> {
        let current = self.read()?;

        let mut had_plain = false;
        let mut had_negation = false;
        let mut updated = String::with_capacity(current.len());
        for raw in current.split_inclusive('\n') {
            match RuleLine::parse(raw) {
                RuleLine::Add(ref p) if p == folder => had_plain = true,
                RuleLine::Negate(ref p) if p == folder => had_negation = true,
                _ => updated.push_str(raw),
            }
        }

        if in_global {
            if had_negation && !had_plain {
                return Ok(RuleEdit::AlreadyTrusted);
            }
            push_line(&mut updated, &format!("-{}", folder.to_string_lossy()));
            self.replace(&updated)?;
            return Ok(RuleEdit::Negated);
        }

        if had_plain {
            self.replace(&updated)?;
            return Ok(RuleEdit::Removed);
        }

        if had_negation {
            // Stale override for a folder the system list no longer names
            self.replace(&updated)?;
        }
        Ok(RuleEdit::WasNotUntrusted)
    }

    /// Swap in new contents via a temp file in the same directory and a rename
    fn replace(&self, contents: &str) -> Result<(), TrustError> {
        let unwritable = |source: io::Error| TrustError::LocalListUnwritable {
            path: self.path.clone(),
            source,
        };

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(unwritable)?;

        let mode = fs::metadata(&self.path)
            .map(|m| m.permissions().mode() & 0o7777)
            .unwrap_or(0o644);

        let mut temp = NamedTempFile::new_in(parent).map_err(unwritable)?;
        temp.write_all(contents.as_bytes()).map_err(unwritable)?;
        temp.as_file().sync_all().map_err(unwritable)?;
        temp.as_file()
            .set_permissions(Permissions::from_mode(mode))
            .map_err(unwritable)?;
        temp.persist(&self.path).map_err(|e| unwritable(e.error))?;

        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }

        debug!("Rewrote {}", self.path.display());
        Ok(())
    }
}

fn push_line(buf: &mut String, line: &str) {
    if !buf.is_empty() && !buf.ends_with('\n') {
        buf.push('\n');
    }
    buf.push_str(line);
    buf.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn home() -> PathBuf {
        PathBuf::from(shellexpand::tilde("~").as_ref())
    }

    fn store_with(dir: &Path, global: Option<&str>, local: Option<&str>) -> RuleStore {
        let global_path = dir.join("global.list");
        let local_path = dir.join("local.list");
        if let Some(text) = global {
            fs::write(&global_path, text).unwrap();
        }
        if let Some(text) = local {
            fs::write(&local_path, text).unwrap();
        }
        RuleStore::new(global_path, local_path)
    }

    fn set(paths: &[&str]) -> BTreeSet<PathBuf> {
        paths.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/var/log/"), PathBuf::from("/var/log"));
        assert_eq!(normalize_path("/var//log/./x"), PathBuf::from("/var/log/x"));
        assert_eq!(normalize_path("/var/log/../tmp"), PathBuf::from("/var/tmp"));
        assert_eq!(normalize_path("/.."), PathBuf::from("/"));
        assert_eq!(normalize_path("~/Downloads"), home().join("Downloads"));
        assert_eq!(normalize_path("~"), lexical_normalize(&home()));
    }

    #[test]
    fn test_parse_rule_lines() {
        assert_eq!(RuleLine::parse(""), RuleLine::Skip);
        assert_eq!(RuleLine::parse("   \n"), RuleLine::Skip);
        assert_eq!(RuleLine::parse("# comment"), RuleLine::Skip);
        assert_eq!(RuleLine::parse("  # indented comment"), RuleLine::Skip);
        assert_eq!(RuleLine::parse("-"), RuleLine::Skip);
        assert_eq!(RuleLine::parse("/etc/\n"), RuleLine::Add("/etc".into()));
        assert_eq!(
            RuleLine::parse("-/home/user/QubesIncoming"),
            RuleLine::Negate("/home/user/QubesIncoming".into())
        );
    }

    #[test]
    fn test_load_merges_both_lists() {
        let dir = tempdir().unwrap();
        let store = store_with(
            dir.path(),
            Some("/home/user/Downloads\n/home/user/QubesIncoming\n"),
            Some(
                "/home/user/Downloads\n/home/user/Pictures\n/var/log/\n/etc/\n\
                 ~/terrible files\n~/my way too long path name with spaces\n",
            ),
        );

        let resolved = store.load();
        let mut expected = set(&[
            "/home/user/Downloads",
            "/home/user/QubesIncoming",
            "/home/user/Pictures",
            "/var/log",
            "/etc",
        ]);
        expected.insert(home().join("terrible files"));
        expected.insert(home().join("my way too long path name with spaces"));

        assert_eq!(resolved.roots, expected);
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn test_local_negation_removes_global_entry() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), Some("/a\n/b\n"), Some("/a\n-/b\n"));

        assert_eq!(store.load().roots, set(&["/a"]));
    }

    #[test]
    fn test_local_add_then_remove_nets_to_empty() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), Some(""), Some("/a\n-/a\n"));

        assert!(store.load().roots.is_empty());
    }

    #[test]
    fn test_local_negation_of_tilde_path() {
        let dir = tempdir().unwrap();
        let downloads = home().join("Downloads");
        let store = store_with(
            dir.path(),
            Some("~/Downloads\n~/QubesIncoming\n"),
            Some(&format!(
                "{}\n-{}\n",
                downloads.display(),
                home().join("QubesIncoming").display()
            )),
        );

        assert_eq!(store.load().roots, BTreeSet::from([downloads]));
    }

    #[test]
    fn test_global_negation_is_added_with_warning() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), Some("# header\n-/srv/drop\n"), None);

        let resolved = store.load();
        assert_eq!(resolved.roots, set(&["/srv/drop"]));
        assert_eq!(resolved.warnings.len(), 1);
        match &resolved.warnings[0] {
            LoadWarning::InertNegation { line, folder, .. } => {
                assert_eq!(*line, 2);
                assert_eq!(folder, &PathBuf::from("/srv/drop"));
            }
            other => panic!("unexpected warning: {}", other),
        }
    }

    #[test]
    fn test_missing_lists_are_silent() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), None, None);

        let resolved = store.load();
        assert!(resolved.roots.is_empty());
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn test_unreadable_global_degrades_to_warning() {
        let dir = tempdir().unwrap();
        // A directory cannot be read as a text file, even by root
        fs::create_dir(dir.path().join("global.list")).unwrap();
        let store = store_with(dir.path(), None, Some("/a\n"));

        let resolved = store.load();
        assert_eq!(resolved.roots, set(&["/a"]));
        assert_eq!(resolved.warnings.len(), 1);
        assert!(matches!(
            &resolved.warnings[0],
            LoadWarning::Unreadable(TrustError::RuleFileUnreadable {
                kind: ListKind::Global,
                ..
            })
        ));
    }

    #[test]
    fn test_global_contains() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), Some("/srv/share/\n# /opt\n"), None);

        assert!(store.global_contains(Path::new("/srv/share")).unwrap());
        assert!(!store.global_contains(Path::new("/opt")).unwrap());

        let empty = store_with(&dir.path().join("nowhere"), None, None);
        assert!(!empty.global_contains(Path::new("/srv/share")).unwrap());
    }

    #[test]
    fn test_mark_untrusted_creates_list_and_parents() {
        let dir = tempdir().unwrap();
        let list = LocalRuleFile::new(dir.path().join(".config/qubes/always-open-in-dispvm.list"));

        assert_eq!(list.mark_untrusted(Path::new("/home/user/mail")).unwrap(), RuleEdit::Added);
        assert_eq!(fs::read_to_string(list.path()).unwrap(), "/home/user/mail\n");
    }

    #[test]
    fn test_mark_untrusted_twice_leaves_file_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("local.list");
        fs::write(&path, "# mine\n/srv/a").unwrap();
        let list = LocalRuleFile::new(&path);

        assert_eq!(list.mark_untrusted(Path::new("/srv/b")).unwrap(), RuleEdit::Added);
        let after_first = fs::read(&path).unwrap();
        assert_eq!(after_first, b"# mine\n/srv/a\n/srv/b\n");

        assert_eq!(
            list.mark_untrusted(Path::new("/srv/b")).unwrap(),
            RuleEdit::AlreadyUntrusted
        );
        assert_eq!(fs::read(&path).unwrap(), after_first);
    }

    #[test]
    fn test_mark_untrusted_drops_existing_negation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("local.list");
        fs::write(&path, "-/srv/a\n/srv/b\n").unwrap();
        let list = LocalRuleFile::new(&path);

        list.mark_untrusted(Path::new("/srv/a")).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "/srv/b\n/srv/a\n");
    }

    #[test]
    fn test_mark_untrusted_drops_negation_after_plain_line() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), None, Some("/srv/x\n/srv/y\n-/srv/x\n"));
        assert!(!store.load().roots.contains(Path::new("/srv/x")));
        let list = LocalRuleFile::new(store.local_path());

        assert_eq!(list.mark_untrusted(Path::new("/srv/x")).unwrap(), RuleEdit::Added);
        assert_eq!(
            fs::read_to_string(store.local_path()).unwrap(),
            "/srv/x\n/srv/y\n"
        );
        assert!(store.load().roots.contains(Path::new("/srv/x")));

        let before = fs::read(store.local_path()).unwrap();
        assert_eq!(
            list.mark_untrusted(Path::new("/srv/x")).unwrap(),
            RuleEdit::AlreadyUntrusted
        );
        assert_eq!(fs::read(store.local_path()).unwrap(), before);
    }

    #[test]
    fn test_mark_trusted_removes_every_line_for_folder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("local.list");
        fs::write(&path, "# keep me\n/srv/a/\n/srv/b\n-/srv/a\n\n/srv/c\n").unwrap();
        let list = LocalRuleFile::new(&path);

        assert_eq!(list.mark_trusted(Path::new("/srv/a"), false).unwrap(), RuleEdit::Removed);
        assert_eq!(fs::read_to_string(&path).unwrap(), "# keep me\n/srv/b\n\n/srv/c\n");
    }

    #[test]
    fn test_mark_trusted_on_global_folder_appends_negation() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), Some("/srv/shared\n"), Some("/srv/mine\n"));
        let global_before = fs::read(store.global_path()).unwrap();
        let list = LocalRuleFile::new(store.local_path());

        let in_global = store.global_contains(Path::new("/srv/shared")).unwrap();
        assert_eq!(
            list.mark_trusted(Path::new("/srv/shared"), in_global).unwrap(),
            RuleEdit::Negated
        );

        assert_eq!(
            fs::read_to_string(store.local_path()).unwrap(),
            "/srv/mine\n-/srv/shared\n"
        );
        assert_eq!(fs::read(store.global_path()).unwrap(), global_before);
        assert_eq!(store.load().roots, set(&["/srv/mine"]));

        assert_eq!(
            list.mark_trusted(Path::new("/srv/shared"), in_global).unwrap(),
            RuleEdit::AlreadyTrusted
        );
    }

    #[test]
    fn test_mark_trusted_unknown_folder() {
        let dir = tempdir().unwrap();
        let list = LocalRuleFile::new(dir.path().join("local.list"));

        assert_eq!(
            list.mark_trusted(Path::new("/srv/never"), false).unwrap(),
            RuleEdit::WasNotUntrusted
        );
        assert!(!list.path().exists());
    }

    #[test]
    fn test_rewrite_keeps_existing_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("local.list");
        fs::write(&path, "/srv/a\n").unwrap();
        fs::set_permissions(&path, Permissions::from_mode(0o600)).unwrap();
        let list = LocalRuleFile::new(&path);

        list.mark_untrusted(Path::new("/srv/b")).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o600);
    }
}
