//! Child launcher (component B, spec.md §4.B), grounded in the Go
//! source's `startProc`/`Background` and conmon's own `fork`/`ForkResult`/
//! `dup2` usage in `lib.rs`.

use crate::context::Context;
use crate::error::SupervisorError;
use crate::role::{detect_role, Role};
use log::debug;
use nix::errno::Errno;
use nix::unistd::{close, dup2, execve, fork, ForkResult, Pid};
use std::ffi::CString;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::process;

/// The outcome of one `background` boundary crossing.
pub enum Background {
    /// This process is the new generation; control returns to the caller.
    IsChild,
    /// A new generation was spawned.
    Spawned {
        /// The spawned child's PID.
        cpid: Pid,
    },
}

/// Crosses one generation boundary (spec.md §4.A+§4.B combined, mirroring
/// the Go source's `Background`): decides the current role, and if this
/// process is the parent, forks and execs the next generation.
///
/// `pipe_write_fd` becomes FD 3 in the child when present; the bootstrap
/// spawn has none. `exit_after_spawn` governs whether this process exits
/// once the child is launched (true for bootstrap, false for every
/// supervision-loop restart, per spec.md §4.F).
pub fn background(
    ctx: &mut Context,
    pipe_write_fd: Option<RawFd>,
    exit_after_spawn: bool,
) -> Result<Background, SupervisorError> {
    match detect_role() {
        Role::Child => Ok(Background::IsChild),
        Role::Parent { env, args } => spawn_generation(ctx, &args, &env, pipe_write_fd, exit_after_spawn),
    }
}

/// Spawns the next generation once [`detect_role`] has already determined
/// this process is the parent.
///
/// Factored out of [`background`] so a caller that needs to create the
/// anonymous pipe handed to the child (spec.md §4.F step d) can do so only
/// once it knows a spawn is actually about to happen, rather than creating
/// one speculatively before the role check — a pipe created before the
/// role is known is wasted (and wrongly scoped) on every call where this
/// process turns out to already be the child.
pub fn spawn_generation(
    ctx: &mut Context,
    args: &[String],
    env: &[(String, String)],
    pipe_write_fd: Option<RawFd>,
    exit_after_spawn: bool,
) -> Result<Background, SupervisorError> {
    if ctx.cancellation().is_cancelled() {
        return Err(SupervisorError::Cancelled);
    }
    let cpid = spawn(ctx, args, env, pipe_write_fd).map_err(SupervisorError::Spawn)?;
    ctx.set_cpid(cpid.as_raw());
    debug!("process({}) started", cpid);
    if exit_after_spawn {
        process::exit(0);
    }
    Ok(Background::Spawned { cpid })
}

fn nix_to_io(e: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

/// Forks and execs a copy of the current executable with `args`/`env`
/// captured by [`crate::role::detect_role`].
///
/// FD layout in the child (spec.md §6): `pipe_write_fd` lands at FD 3;
/// `ctx.extra_files()` follow at FD 4, 5, ...
fn spawn(
    ctx: &Context,
    args: &[String],
    env: &[(String, String)],
    pipe_write_fd: Option<RawFd>,
) -> io::Result<Pid> {
    match unsafe { fork() }.map_err(nix_to_io)? {
        ForkResult::Parent { child } => {
            if let Some(fd) = pipe_write_fd {
                // The parent (supervisor) only ever reads; its copy of
                // the write end would otherwise keep the pipe open after
                // the child exits.
                let _ = close(fd);
            }
            Ok(child)
        }
        ForkResult::Child => {
            child_exec(ctx, args, env, pipe_write_fd);
            // child_exec only returns on failure.
            process::exit(127);
        }
    }
}

fn child_exec(ctx: &Context, args: &[String], env: &[(String, String)], pipe_write_fd: Option<RawFd>) -> ! {
    if let Some(sink) = ctx.logger_for_redirect() {
        let fd = sink;
        let _ = dup2(fd, nix::libc::STDOUT_FILENO);
        let _ = dup2(fd, nix::libc::STDERR_FILENO);
    }

    if let Some(fd) = pipe_write_fd {
        if fd != 3 {
            if dup2(fd, 3).is_ok() {
                let _ = close(fd);
            }
        }
    }

    for (i, file) in ctx.extra_files().iter().enumerate() {
        let target = 4 + i as RawFd;
        let fd = file.as_raw_fd();
        if fd != target {
            let _ = dup2(fd, target);
        }
    }

    let path = CString::new(args[0].as_str()).expect("nul byte in argv[0]");
    let argv: Vec<CString> = args
        .iter()
        .map(|a| CString::new(a.as_str()).expect("nul byte in argv"))
        .collect();
    let envp: Vec<CString> = env
        .iter()
        .map(|(k, v)| CString::new(format!("{}={}", k, v)).expect("nul byte in env"))
        .collect();

    match execve(&path, &argv, &envp) {
        Ok(_) => unreachable!("execve does not return on success"),
        Err(e) => {
            eprintln!("exec {}: {}", args[0], e);
            process::exit(match e {
                Errno::ENOENT => 127,
                _ => 126,
            });
        }
    }
}
