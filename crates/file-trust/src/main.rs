//! qvm-file-trust - set or check file and folder trust levels
//!
//! File manager extensions call this and act on the exit status alone:
//! 0 trusted, 1 untrusted, anything else a failure (see `file_trust::error`).

use anyhow::Result;
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use file_trust::{
    error::{EXIT_CONFIG, EXIT_TRUSTED, EXIT_USAGE},
    output::ERROR_PREFIX,
    Aggregate, Mode, Reporter, TrustMutator, TrustSettings,
};

/// qvm-file-trust - Set or check file/folder trust levels
#[derive(Parser)]
#[command(name = "qvm-file-trust")]
#[command(version)]
#[command(about = "Set or check file/folder trust levels")]
#[command(long_about = "Set or check file/folder trust levels.\n\n\
    Untrusted files carry the user.qubes.untrusted attribute and have all\n\
    permissions removed. Untrusted folders are listed in\n\
    /etc/qubes/always-open-in-dispvm.list or\n\
    ~/.config/qubes/always-open-in-dispvm.list.")]
#[command(group(
    ArgGroup::new("mode")
        .args(["check", "check_any", "check_all", "trusted", "untrusted", "print_folders"])
        .multiple(false)
))]
struct Cli {
    /// Check whether a file or folder is trusted
    #[arg(short = 'c', long)]
    check: bool,

    /// Report untrusted if any of the paths is untrusted
    #[arg(long)]
    check_any: bool,

    /// Report untrusted only if all of the paths are untrusted
    #[arg(long)]
    check_all: bool,

    /// Set files or folders as trusted
    #[arg(short = 't', long)]
    trusted: bool,

    /// Set files or folders as untrusted
    #[arg(short = 'u', long)]
    untrusted: bool,

    /// Print all folders considered untrusted
    #[arg(short = 'p', long = "printfolders")]
    print_folders: bool,

    /// Do not print verdicts or warnings
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Print the folder list as JSON
    #[arg(long, requires = "print_folders")]
    json: bool,

    /// Settings file to use instead of ~/.config/qubes/file-trust.yaml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Files or folders
    #[arg(value_name = "PATH", required_unless_present = "print_folders")]
    paths: Vec<PathBuf>,
}

impl Cli {
    fn mode(&self) -> Mode {
        if self.trusted {
            Mode::SetTrusted
        } else if self.untrusted {
            Mode::SetUntrusted
        } else if self.check_all {
            Mode::Check(Aggregate::All)
        } else {
            Mode::Check(Aggregate::Any)
        }
    }
}

fn main() {
    // Logs go to stderr; stdout belongs to verdicts
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { EXIT_USAGE } else { EXIT_TRUSTED });
        }
    };

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}{:#}", ERROR_PREFIX, e);
            EXIT_CONFIG
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let settings = match &cli.config {
        Some(path) => TrustSettings::load_from(path)?,
        None => TrustSettings::load()?,
    };
    let mutator = TrustMutator::new(settings);
    let mut reporter = Reporter::stdio(cli.quiet);

    if cli.print_folders {
        return cmd_print_folders(&mutator, &mut reporter, cli.json);
    }

    let report = mutator.run(cli.mode(), &cli.paths, &mut reporter);
    tracing::debug!(
        "{} path(s), {} untrusted, {} failed",
        report.tally().seen,
        report.tally().untrusted,
        report.failed()
    );
    Ok(report.exit_code())
}

fn cmd_print_folders(
    mutator: &TrustMutator,
    reporter: &mut Reporter,
    json_output: bool,
) -> Result<i32> {
    let folders = mutator.untrusted_folders(reporter);

    if json_output {
        let folders: Vec<String> = folders
            .iter()
            .map(|f| f.to_string_lossy().into_owned())
            .collect();
        println!("{}", serde_json::to_string_pretty(&folders)?);
    } else {
        for folder in &folders {
            println!("{}", folder.display());
        }
    }

    Ok(EXIT_TRUSTED)
}
