//! PID-file IO and liveness probe (component G, spec.md §4.G), grounded in
//! the `check_process` pattern in
//! `examples/other_examples/4ab30125_leynos-weaver__crates-weaverd-src-process.rs.rs`.

use anyhow::{Context as _, Result};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// Writes `pid` to `path` with mode 0644 (spec.md §6).
pub fn write_pid_file(path: &Path, pid: i32) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)
        .with_context(|| format!("open pid file '{}'", path.display()))?;
    writeln!(file, "{}", pid).with_context(|| format!("write pid file '{}'", path.display()))
}

/// Removes `path`, tolerating "already gone" (spec.md §4.F cleanup: each
/// step logs but does not propagate its own failure at the call site).
pub fn remove_pid_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove pid file '{}'", path.display())),
    }
}

/// Reads `path` as a decimal PID and probes whether that process is alive
/// by sending signal 0 (spec.md §4.G). Returns `Ok(true)` only when the
/// signal is accepted; every other outcome (missing file, unparsable
/// contents, unknown process) is an `Err` — callers that want a plain
/// boolean should treat an error as "not alive".
pub fn probe(path: &Path) -> Result<bool> {
    let content =
        fs::read_to_string(path).with_context(|| format!("read pid file '{}'", path.display()))?;
    let pid: i32 = content
        .trim()
        .parse()
        .with_context(|| format!("parse pid file '{}'", path.display()))?;
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => Ok(true),
        Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH) => {
            anyhow::bail!("pid {} not alive", pid)
        }
        Err(e) => Err(e).with_context(|| format!("probe pid {}", pid)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process;
    use tempfile::tempdir;

    #[test]
    fn write_then_probe_own_pid_is_alive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("heart.pid");
        write_pid_file(&path, process::id() as i32).unwrap();
        assert!(probe(&path).unwrap());
    }

    #[test]
    fn probe_nonexistent_pid_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("heart.pid");
        // PID 1 is init; a very large, almost-certainly-unused PID is a
        // more reliable "doesn't exist" fixture across environments.
        write_pid_file(&path, i32::MAX - 1).unwrap();
        assert!(probe(&path).is_err());
    }

    #[test]
    fn probe_missing_file_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.pid");
        assert!(probe(&path).is_err());
    }

    #[test]
    fn remove_pid_file_tolerates_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.pid");
        assert!(remove_pid_file(&path).is_ok());
    }
}
