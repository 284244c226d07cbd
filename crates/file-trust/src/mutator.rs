//! Checking and changing trust, one path or a batch at a time
//!
//! Files carry their trust in the marker attribute. Folders carry it in the
//! folder lists, so changing a folder rewrites the user list and never touches
//! the folder itself.

use crate::classifier::{Classifier, UntrustedBy};
use crate::config::TrustSettings;
use crate::decorate::Decorator;
use crate::error::{TrustError, EXIT_TRUSTED, EXIT_UNTRUSTED};
use crate::marker::{MarkerChange, MarkerStore};
use crate::output::Reporter;
use crate::rules::{lexical_normalize, LocalRuleFile, RuleEdit, RuleStore};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// How per-path verdicts combine into one answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// Untrusted if any path is untrusted
    Any,
    /// Untrusted only if every path is untrusted
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Check(Aggregate),
    SetTrusted,
    SetUntrusted,
}

/// Running count of verdicts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub seen: usize,
    pub untrusted: usize,
}

impl Tally {
    pub fn record(self, untrusted: bool) -> Self {
        Self {
            seen: self.seen + 1,
            untrusted: self.untrusted + usize::from(untrusted),
        }
    }

    pub fn is_untrusted(&self, aggregate: Aggregate) -> bool {
        match aggregate {
            Aggregate::Any => self.untrusted > 0,
            Aggregate::All => self.seen > 0 && self.untrusted == self.seen,
        }
    }
}

/// Outcome of a whole invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    mode: Mode,
    tally: Tally,
    failed: usize,
    first_error: Option<i32>,
}

impl BatchReport {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            tally: Tally::default(),
            failed: 0,
            first_error: None,
        }
    }

    /// Fold one path's result in. A failed path counts as untrusted.
    pub fn record(self, result: &Result<bool, TrustError>) -> Self {
        match result {
            Ok(untrusted) => Self {
                tally: self.tally.record(*untrusted),
                ..self
            },
            Err(e) => Self {
                tally: self.tally.record(true),
                failed: self.failed + 1,
                first_error: self.first_error.or(Some(e.exit_code())),
                ..self
            },
        }
    }

    pub fn tally(&self) -> Tally {
        self.tally
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Aggregate verdict; mutations never report untrusted
    pub fn is_untrusted(&self) -> bool {
        match self.mode {
            Mode::Check(aggregate) => self.tally.is_untrusted(aggregate),
            Mode::SetTrusted | Mode::SetUntrusted => false,
        }
    }

    /// First failure wins, otherwise the verdict
    pub fn exit_code(&self) -> i32 {
        match self.first_error {
            Some(code) => code,
            None if self.is_untrusted() => EXIT_UNTRUSTED,
            None => EXIT_TRUSTED,
        }
    }
}

/// Resolve a command line path to an absolute, normalized one
pub fn absolute_target(raw: &Path) -> Result<PathBuf, TrustError> {
    let expanded = match raw.to_str() {
        Some(s) => PathBuf::from(shellexpand::tilde(s).as_ref()),
        None => raw.to_path_buf(),
    };

    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .map_err(|source| TrustError::Stat {
                path: raw.to_path_buf(),
                source,
            })?
            .join(expanded)
    };

    Ok(lexical_normalize(&absolute))
}

fn is_dir(path: &Path) -> Result<bool, TrustError> {
    fs::metadata(path)
        .map(|m| m.is_dir())
        .map_err(|source| TrustError::Stat {
            path: path.to_path_buf(),
            source,
        })
}

pub struct TrustMutator {
    rules: RuleStore,
    local: LocalRuleFile,
    phrase_file: PathBuf,
    markers: MarkerStore,
    decorator: Decorator,
}

impl TrustMutator {
    pub fn new(settings: TrustSettings) -> Self {
        Self {
            rules: RuleStore::new(&settings.global_list, &settings.local_list),
            local: LocalRuleFile::new(&settings.local_list),
            markers: MarkerStore::new(settings.unlock_mode),
            decorator: Decorator::new(&settings.decoration),
            phrase_file: settings.phrase_file,
        }
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    pub fn markers(&self) -> &MarkerStore {
        &self.markers
    }

    /// Load both lists and the phrase, surfacing load problems as warnings
    pub fn classifier<O: Write, E: Write>(&self, reporter: &mut Reporter<O, E>) -> Classifier {
        let (classifier, warnings) = Classifier::load(&self.rules, &self.phrase_file);
        for warning in warnings {
            reporter.warn(warning.to_string());
        }
        classifier
    }

    /// Resolved untrusted folders, sorted
    pub fn untrusted_folders<O: Write, E: Write>(
        &self,
        reporter: &mut Reporter<O, E>,
    ) -> Vec<PathBuf> {
        self.classifier(reporter).roots().iter().cloned().collect()
    }

    pub fn check_file<O: Write, E: Write>(
        &self,
        path: &Path,
        reporter: &mut Reporter<O, E>,
    ) -> Result<bool, TrustError> {
        let classifier = self.classifier(reporter);
        self.file_is_untrusted(&classifier, path, reporter)
    }

    pub fn set_file<O: Write, E: Write>(
        &self,
        path: &Path,
        untrusted: bool,
        reporter: &mut Reporter<O, E>,
    ) -> Result<MarkerChange, TrustError> {
        let change = self.apply_marker(path, untrusted)?;

        reporter.info(match change {
            MarkerChange::Marked => "File marked untrusted",
            MarkerChange::AlreadyMarked => "File is already untrusted",
            MarkerChange::Cleared => "File marked trusted",
            MarkerChange::AlreadyClear => "File is already trusted",
        });
        Ok(change)
    }

    /// Set or clear the marker and update the emblem, without any output
    pub fn apply_marker(&self, path: &Path, untrusted: bool) -> Result<MarkerChange, TrustError> {
        let change = self.markers.set_marker(path, untrusted)?;
        if matches!(change, MarkerChange::Marked | MarkerChange::Cleared) {
            self.decorator.decorate(path, change.is_untrusted());
        }
        Ok(change)
    }

    pub fn check_dir<O: Write, E: Write>(&self, path: &Path, reporter: &mut Reporter<O, E>) -> bool {
        let classifier = self.classifier(reporter);
        self.dir_is_untrusted(&classifier, path, reporter)
    }

    pub fn set_dir_trusted<O: Write, E: Write>(
        &self,
        path: &Path,
        reporter: &mut Reporter<O, E>,
    ) -> Result<RuleEdit, TrustError> {
        let folder = lexical_normalize(path);
        let in_global = self.rules.global_contains(&folder)?;
        let edit = self.local.mark_trusted(&folder, in_global)?;

        reporter.info(match edit {
            RuleEdit::Removed => "Folder marked trusted",
            RuleEdit::Negated => "Folder marked trusted, overriding the system list",
            RuleEdit::AlreadyTrusted => "Folder is already trusted",
            _ => "Folder was not untrusted",
        });

        // Rules just changed; the folder may still be covered from elsewhere
        let (classifier, _) = Classifier::load(&self.rules, &self.phrase_file);
        match classifier.classify(&folder) {
            Some(UntrustedBy::Root(root)) => reporter.warn(format!(
                "{} is still untrusted because {} is untrusted",
                folder.display(),
                root.display()
            )),
            Some(UntrustedBy::Phrase) => reporter.warn(format!(
                "{} is still untrusted because it contains the untrusted phrase",
                folder.display()
            )),
            None => {}
        }

        Ok(edit)
    }

    pub fn set_dir_untrusted<O: Write, E: Write>(
        &self,
        path: &Path,
        reporter: &mut Reporter<O, E>,
    ) -> Result<RuleEdit, TrustError> {
        let folder = lexical_normalize(path);
        let edit = self.local.mark_untrusted(&folder)?;

        reporter.info(match edit {
            RuleEdit::AlreadyUntrusted => "Folder is already untrusted",
            _ => "Folder marked untrusted",
        });
        Ok(edit)
    }

    /// Apply `mode` to every path in order. One path failing does not stop
    /// the rest; every failure is printed, quiet or not.
    pub fn run<O: Write, E: Write>(
        &self,
        mode: Mode,
        paths: &[PathBuf],
        reporter: &mut Reporter<O, E>,
    ) -> BatchReport {
        let mut classifier: Option<Classifier> = None;
        let batch = paths.len() > 1;

        paths.iter().fold(BatchReport::new(mode), |report, raw| {
            let result = absolute_target(raw).and_then(|target| {
                debug!("{:?} {}", mode, target.display());
                if batch {
                    reporter.info(format!("{}:", target.display()));
                }
                match mode {
                    Mode::Check(_) => {
                        let classifier =
                            classifier.get_or_insert_with(|| self.classifier(reporter));
                        if is_dir(&target)? {
                            Ok(self.dir_is_untrusted(classifier, &target, reporter))
                        } else {
                            self.file_is_untrusted(classifier, &target, reporter)
                        }
                    }
                    Mode::SetTrusted | Mode::SetUntrusted => {
                        let untrusted = mode == Mode::SetUntrusted;
                        if is_dir(&target)? {
                            if untrusted {
                                self.set_dir_untrusted(&target, reporter)?;
                            } else {
                                self.set_dir_trusted(&target, reporter)?;
                            }
                            Ok(untrusted)
                        } else {
                            self.set_file(&target, untrusted, reporter)
                                .map(|change| change.is_untrusted())
                        }
                    }
                }
            });

            if let Err(e) = &result {
                reporter.error(e.to_string());
            }
            report.record(&result)
        })
    }

    fn file_is_untrusted<O: Write, E: Write>(
        &self,
        classifier: &Classifier,
        path: &Path,
        reporter: &mut Reporter<O, E>,
    ) -> Result<bool, TrustError> {
        let marked = match self.markers.is_marked(path) {
            Ok(marked) => marked,
            Err(e @ TrustError::Unlock { .. }) => {
                reporter.warn(format!("{}; treating it as untrusted", e));
                true
            }
            Err(e) => return Err(e),
        };

        let untrusted = marked || classifier.phrase().matches(path);
        reporter.info(if untrusted {
            "File is untrusted"
        } else {
            "File is trusted"
        });
        Ok(untrusted)
    }

    fn dir_is_untrusted<O: Write, E: Write>(
        &self,
        classifier: &Classifier,
        path: &Path,
        reporter: &mut Reporter<O, E>,
    ) -> bool {
        let untrusted = classifier.is_untrusted(path);
        reporter.info(if untrusted {
            "Folder is untrusted"
        } else {
            "Folder is trusted"
        });
        untrusted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecorationConfig;
    use crate::xattr;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        dir: TempDir,
        mutator: TrustMutator,
    }

    impl Fixture {
        fn new(global: &str) -> Self {
            let dir = tempdir().unwrap();
            let global_list = dir.path().join("etc/always-open-in-dispvm.list");
            fs::create_dir_all(global_list.parent().unwrap()).unwrap();
            fs::write(&global_list, global).unwrap();

            let settings = TrustSettings {
                global_list,
                local_list: dir.path().join("config/always-open-in-dispvm.list"),
                phrase_file: dir.path().join("etc/always-open-in-dispvm.phrase"),
                unlock_mode: 0o644,
                decoration: DecorationConfig {
                    enabled: false,
                    command: None,
                },
            };
            Self {
                dir,
                mutator: TrustMutator::new(settings),
            }
        }

        fn folder(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            fs::create_dir_all(&path).unwrap();
            path
        }

        fn local_list(&self) -> PathBuf {
            self.mutator.rules().local_path().to_path_buf()
        }
    }

    fn captured(quiet: bool) -> Reporter<Vec<u8>, Vec<u8>> {
        Reporter::new(quiet, Vec::new(), Vec::new())
    }

    fn text(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_tally_aggregates() {
        let mixed = Tally::default().record(false).record(true);
        assert!(mixed.is_untrusted(Aggregate::Any));
        assert!(!mixed.is_untrusted(Aggregate::All));

        let all = Tally::default().record(true).record(true);
        assert!(all.is_untrusted(Aggregate::All));

        assert!(!Tally::default().is_untrusted(Aggregate::All));
        assert!(!Tally::default().is_untrusted(Aggregate::Any));
    }

    #[test]
    fn test_batch_any_and_all() {
        let fx = Fixture::new("");
        let trusted = fx.folder("documents");
        let untrusted = fx.folder("incoming");
        fs::write(fx.mutator.rules().global_path(), format!("{}\n", untrusted.display())).unwrap();
        let paths = vec![trusted, untrusted];

        let mut reporter = captured(false);
        let any = fx.mutator.run(Mode::Check(Aggregate::Any), &paths, &mut reporter);
        assert!(any.is_untrusted());
        assert_eq!(any.exit_code(), EXIT_UNTRUSTED);

        let all = fx.mutator.run(Mode::Check(Aggregate::All), &paths, &mut reporter);
        assert!(!all.is_untrusted());
        assert_eq!(all.exit_code(), EXIT_TRUSTED);
        assert_eq!(all.tally(), Tally { seen: 2, untrusted: 1 });

        let (out, _) = reporter.into_inner();
        let out = text(out);
        assert!(out.contains("Folder is trusted"));
        assert!(out.contains("Folder is untrusted"));
    }

    #[test]
    fn test_quiet_computes_same_result() {
        let fx = Fixture::new("");
        let untrusted = fx.folder("incoming");
        fx.mutator
            .set_dir_untrusted(&untrusted, &mut captured(true))
            .unwrap();

        let mut reporter = captured(true);
        let report = fx
            .mutator
            .run(Mode::Check(Aggregate::Any), &[untrusted], &mut reporter);
        assert_eq!(report.exit_code(), EXIT_UNTRUSTED);

        let (out, err) = reporter.into_inner();
        assert!(out.is_empty());
        assert!(err.is_empty());
    }

    #[test]
    fn test_failure_does_not_stop_batch_and_prints_when_quiet() {
        let fx = Fixture::new("");
        let missing = fx.dir.path().join("gone");
        let untrusted = fx.folder("incoming");
        fx.mutator
            .set_dir_untrusted(&untrusted, &mut captured(true))
            .unwrap();

        let mut reporter = captured(true);
        let report = fx.mutator.run(
            Mode::Check(Aggregate::All),
            &[missing.clone(), untrusted],
            &mut reporter,
        );

        assert_eq!(report.tally(), Tally { seen: 2, untrusted: 2 });
        assert_eq!(report.failed(), 1);
        assert_eq!(report.exit_code(), 74);

        let (out, err) = reporter.into_inner();
        assert!(out.is_empty());
        let err = text(err);
        assert!(err.starts_with("Error: "));
        assert!(err.contains(&missing.display().to_string()));
    }

    #[test]
    fn test_dir_set_untrusted_twice_is_unchanged() {
        let fx = Fixture::new("");
        let target = fx.folder("mail");
        let mut reporter = captured(false);

        let first = fx
            .mutator
            .run(Mode::SetUntrusted, &[target.clone()], &mut reporter);
        assert_eq!(first.exit_code(), EXIT_TRUSTED);
        let before = fs::read(fx.local_list()).unwrap();

        let second = fx
            .mutator
            .run(Mode::SetUntrusted, &[target.clone()], &mut reporter);
        assert_eq!(second.exit_code(), EXIT_TRUSTED);
        assert_eq!(fs::read(fx.local_list()).unwrap(), before);

        let (out, _) = reporter.into_inner();
        assert!(text(out).contains("Folder is already untrusted"));
        assert!(fx.mutator.check_dir(&target, &mut captured(true)));
    }

    #[test]
    fn test_dir_set_trusted_negates_global_entry() {
        let fx = Fixture::new("");
        let shared = fx.folder("shared");
        let global = format!("{}\n", shared.display());
        fs::write(fx.mutator.rules().global_path(), &global).unwrap();

        let edit = fx
            .mutator
            .set_dir_trusted(&shared, &mut captured(false))
            .unwrap();
        assert_eq!(edit, RuleEdit::Negated);

        assert_eq!(
            fs::read_to_string(fx.local_list()).unwrap(),
            format!("-{}\n", shared.display())
        );
        assert_eq!(
            fs::read_to_string(fx.mutator.rules().global_path()).unwrap(),
            global
        );
        assert!(!fx.mutator.check_dir(&shared, &mut captured(true)));
    }

    #[test]
    fn test_dir_set_trusted_under_untrusted_parent_warns() {
        let fx = Fixture::new("");
        let parent = fx.folder("incoming");
        let child = fx.folder("incoming/photos");
        fx.mutator
            .set_dir_untrusted(&parent, &mut captured(true))
            .unwrap();

        let mut reporter = captured(false);
        let edit = fx.mutator.set_dir_trusted(&child, &mut reporter).unwrap();
        assert_eq!(edit, RuleEdit::WasNotUntrusted);

        let (out, err) = reporter.into_inner();
        assert!(text(out).contains("Folder was not untrusted"));
        assert!(text(err).contains("still untrusted"));
    }

    #[test]
    fn test_trailing_separator_on_target() {
        let fx = Fixture::new("");
        let target = fx.folder("mail");
        let with_sep = PathBuf::from(format!("{}/", target.display()));

        fx.mutator
            .run(Mode::SetUntrusted, &[with_sep.clone()], &mut captured(true));
        assert_eq!(
            fs::read_to_string(fx.local_list()).unwrap(),
            format!("{}\n", target.display())
        );

        let report = fx
            .mutator
            .run(Mode::SetTrusted, &[with_sep], &mut captured(true));
        assert_eq!(report.exit_code(), EXIT_TRUSTED);
        assert_eq!(fs::read_to_string(fx.local_list()).unwrap(), "");
    }

    #[test]
    fn test_file_set_and_check() {
        let fx = Fixture::new("");
        if !xattr::supported(fx.dir.path()) {
            return;
        }
        let file = fx.dir.path().join("invoice.pdf");
        fs::write(&file, b"%PDF").unwrap();

        let check = |m: &TrustMutator| {
            m.run(Mode::Check(Aggregate::Any), &[file.clone()], &mut captured(true))
                .exit_code()
        };
        assert_eq!(check(&fx.mutator), EXIT_TRUSTED);

        let set = fx
            .mutator
            .run(Mode::SetUntrusted, &[file.clone()], &mut captured(true));
        assert_eq!(set.exit_code(), EXIT_TRUSTED);
        assert_eq!(check(&fx.mutator), EXIT_UNTRUSTED);

        fx.mutator.run(Mode::SetTrusted, &[file.clone()], &mut captured(true));
        assert_eq!(check(&fx.mutator), EXIT_TRUSTED);
    }

    #[test]
    fn test_file_phrase_is_secondary_signal() {
        let fx = Fixture::new("");
        if !xattr::supported(fx.dir.path()) {
            return;
        }
        fs::write(fx.dir.path().join("etc/always-open-in-dispvm.phrase"), "UNTRUSTED\n").unwrap();
        let file = fx.dir.path().join("report.untrusted.pdf");
        fs::write(&file, b"%PDF").unwrap();

        assert!(fx.mutator.check_file(&file, &mut captured(true)).unwrap());
    }

    #[test]
    fn test_absolute_target() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(absolute_target(Path::new("a/./b/")).unwrap(), cwd.join("a/b"));
        assert_eq!(absolute_target(Path::new("/srv//x/")).unwrap(), PathBuf::from("/srv/x"));
    }
}
