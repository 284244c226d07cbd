//! Process management utilities

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

/// Check whether a command can be found, either as a path or on `$PATH`
pub fn command_exists(name: &str) -> bool {
    if name.contains('/') {
        return Path::new(name).is_file();
    }

    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(name).is_file()))
        .unwrap_or(false)
}

/// Launch a helper without waiting for it.
///
/// All standard streams are detached so the helper can neither block on our
/// terminal nor write into output an integration might be parsing.
pub fn spawn_detached<I, S>(program: &str, args: I) -> io::Result<u32>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    let pid = child.id();
    tracing::debug!("Spawned {} (pid {})", program, pid);

    // Reap in the background so long-running callers do not collect zombies
    std::thread::spawn(move || {
        let _ = child.wait();
    });
    Ok(pid)
}
