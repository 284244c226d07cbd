//! User-facing messages
//!
//! Verdicts and informational lines go to stdout, problems to stderr. Quiet
//! mode silences the first two kinds; fatal errors always print.

use std::io::{self, Stderr, Stdout, Write};

pub const ERROR_PREFIX: &str = "Error: ";
pub const WARNING_PREFIX: &str = "Warning: ";

pub struct Reporter<O: Write = Stdout, E: Write = Stderr> {
    quiet: bool,
    out: O,
    err: E,
}

impl Reporter<Stdout, Stderr> {
    pub fn stdio(quiet: bool) -> Self {
        Self::new(quiet, io::stdout(), io::stderr())
    }
}

impl<O: Write, E: Write> Reporter<O, E> {
    pub fn new(quiet: bool, out: O, err: E) -> Self {
        Self { quiet, out, err }
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        if !self.quiet {
            let _ = writeln!(self.out, "{}", message.as_ref());
        }
    }

    pub fn warn(&mut self, message: impl AsRef<str>) {
        if !self.quiet {
            let _ = writeln!(self.err, "{}{}", WARNING_PREFIX, message.as_ref());
        }
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        let _ = writeln!(self.err, "{}{}", ERROR_PREFIX, message.as_ref());
    }

    pub fn into_inner(self) -> (O, E) {
        (self.out, self.err)
    }
}
