//! Supervision loop (component F, spec.md §4.F) — the library's main
//! entry point, grounded in the Go source's `daemon.go` `Context.Run`.

use crate::context::Context;
use crate::error::SupervisorError;
use crate::fifo::FifoServer;
use crate::launcher::{background, spawn_generation, Background};
use crate::pidfile;
use crate::pipe::{self, PipeReader};
use crate::role::{detect_role, Role};
use crate::signal;
use anyhow::{Context as _, Result};
use log::{debug, info, warn};
use nix::fcntl::OFlag;
use nix::sys::wait::waitpid;
use nix::unistd::{close, pipe2};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::fs;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::process;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// FD 3 is where the launcher dup2's the anonymous pipe's write end in
/// every worker (spec.md §6); the worker writes its safe-close request
/// there directly rather than through any pipe it might create itself.
const WORKER_PIPE_FD: RawFd = 3;

/// What [`Context::run`] hands back once this process is identified as the
/// worker. The supervisor branch never returns — it exits the process
/// directly, per spec.md §4.F.
pub enum RunOutcome {
    /// This process is the worker; the caller's own business logic should
    /// now run. A termination-signal handler that writes a safe-close
    /// request and exits has already been installed.
    Worker,
}

#[derive(Clone, Debug, Default)]
struct StatusSnapshot {
    pid: i32,
    cpid: i32,
    count: u64,
    max_count: u64,
    err_num: u64,
    max_error: u64,
}

impl StatusSnapshot {
    fn line(&self) -> String {
        format!(
            "[supervisor-pid: {}] [pid: {}] [count: {}/{}] [errNum: {}/{}]",
            self.pid,
            self.cpid,
            self.count.saturating_sub(1),
            self.max_count,
            self.err_num,
            self.max_error
        )
    }
}

struct PipeGeneration {
    reader: PipeReader<std::fs::File>,
    cpid: i32,
    cpid_file: Option<PathBuf>,
    pid: i32,
}

impl Context {
    /// Runs the supervisor, or returns once this process is the worker
    /// (spec.md §4.F). The supervisor branch of this call never returns:
    /// on every exit path (restart-limit reached, cancellation, fatal
    /// error) it calls `process::exit` after logging and cleaning up.
    pub fn run(&mut self) -> Result<RunOutcome> {
        match background(self, None, true).context("bootstrap spawn")? {
            Background::IsChild => {}
            Background::Spawned { .. } => unreachable!("bootstrap exits before returning"),
        }

        self.set_pid(process::id() as i32);
        self.set_count(1);
        self.set_err_num(0);

        if let Some(path) = self.pid_file().clone() {
            if let Err(e) = pidfile::write_pid_file(&path, self.pid()) {
                self.log(&format!(
                    "[supervisor({})] [sync pidfile failed] [err: {}]",
                    self.pid(),
                    e
                ));
                process::exit(1);
            }
        }

        let mut fifo_server: Option<FifoServer> = None;
        let mut reader_tx: Option<Sender<PipeGeneration>> = None;
        let snapshot = Arc::new(Mutex::new(StatusSnapshot {
            pid: self.pid(),
            max_count: self.max_count(),
            max_error: self.max_error(),
            ..Default::default()
        }));

        loop {
            if self.err_num() > self.max_error() {
                self.log(&format!(
                    "[supervisor({})] [child process fails too many times]",
                    self.pid()
                ));
                self.cleanup(&mut fifo_server);
                process::exit(1);
            }
            if self.max_count() > 0 && self.count() > self.max_count() {
                self.log(&format!("[supervisor({})] [reboot too many times quit]", self.pid()));
                self.cleanup(&mut fifo_server);
                process::exit(0);
            }
            self.set_count(self.count() + 1);

            if self.cancellation().is_cancelled() {
                self.log(&format!("[supervisor({})] [cancelled]", self.pid()));
                self.cleanup(&mut fifo_server);
                process::exit(0);
            }

            // Decide this iteration's role before touching any pipe: a
            // worker generation already has its FD 3 connected to the
            // previous generation's pipe from the exec boundary that
            // created it (launcher.rs's `child_exec`), so it must not
            // create — or write to — a fresh, unconnected pipe of its own.
            match detect_role() {
                Role::Child => {
                    self.install_worker_shutdown_handler();
                    return Ok(RunOutcome::Worker);
                }
                Role::Parent { env, args } => {
                    let (read_fd, write_fd) = match pipe2(OFlag::O_CLOEXEC) {
                        Ok(fds) => fds,
                        Err(e) => {
                            self.log(&format!(
                                "[supervisor({})] [create anonymous pipe failed] [err: {}]",
                                self.pid(),
                                SupervisorError::Pipe(e)
                            ));
                            self.cleanup(&mut fifo_server);
                            process::exit(2);
                        }
                    };

                    let begin = Instant::now();
                    match spawn_generation(self, &args, &env, Some(write_fd), false) {
                        Ok(Background::Spawned { cpid }) => {
                            let cpid = cpid.as_raw();
                            set_process_title(&format!("heart -pid {}", cpid));

                            if let Some(path) = self.cpid_file().clone() {
                                if let Err(e) = pidfile::write_pid_file(&path, cpid) {
                                    self.log(&format!(
                                        "[supervisor({})] [sync cpid file failed] [err: {}]",
                                        self.pid(),
                                        e
                                    ));
                                }
                            }

                            if self.count() > 2 || self.is_reset() {
                                if let Some(cb) = self.restart_callback() {
                                    cb();
                                }
                            }

                            {
                                let mut snap = snapshot.lock().expect("status snapshot poisoned");
                                snap.cpid = cpid;
                                snap.count = self.count();
                                snap.err_num = self.err_num();
                            }

                            let generation = PipeGeneration {
                                reader: PipeReader::from_fd(read_fd),
                                cpid,
                                cpid_file: self.cpid_file().clone(),
                                pid: self.pid(),
                            };

                            match &reader_tx {
                                Some(tx) => {
                                    let _ = tx.send(generation);
                                }
                                None => {
                                    let (tx, rx) = mpsc::channel::<PipeGeneration>();
                                    let _ = tx.send(generation);
                                    std::thread::spawn(move || pipe_reader_loop(rx));
                                    reader_tx = Some(tx);
                                }
                            }

                            if fifo_server.is_none() {
                                let chroot = self.chroot().clone();
                                let snap_for_status = Arc::clone(&snapshot);
                                match FifoServer::start(&chroot, move || {
                                    snap_for_status.lock().expect("status snapshot poisoned").line()
                                }) {
                                    Ok(server) => fifo_server = Some(server),
                                    Err(e) => {
                                        self.log(&format!(
                                            "[supervisor({})] [fifo listen failed] [err: {}]",
                                            self.pid(),
                                            e
                                        ));
                                        self.cleanup(&mut fifo_server);
                                        process::exit(3);
                                    }
                                }
                            }

                            let status = waitpid(Some(nix::unistd::Pid::from_raw(cpid)), None);
                            let cost = begin.elapsed();

                            if cost < self.min_exit_time() {
                                self.set_err_num(self.err_num() + 1);
                            } else {
                                self.set_err_num(0);
                            }
                            if !self.restore_time().is_zero() && cost > self.restore_time() {
                                self.set_is_reset(true);
                                self.set_count(1);
                            }

                            {
                                let mut snap = snapshot.lock().expect("status snapshot poisoned");
                                snap.count = self.count();
                                snap.err_num = self.err_num();
                            }

                            self.log(&format!(
                                "[supervisor({})] [pid({}) exited: {:?}] [cost: {:?}] [{}]",
                                self.pid(),
                                cpid,
                                status,
                                cost,
                                self.information()
                            ));
                        }
                        Ok(Background::IsChild) => {
                            unreachable!("spawn_generation is only called after detect_role confirmed Parent")
                        }
                        Err(SupervisorError::Cancelled) => {
                            let _ = close(read_fd);
                            let _ = close(write_fd);
                            self.log(&format!("[supervisor({})] [cancelled before spawn]", self.pid()));
                            self.cleanup(&mut fifo_server);
                            process::exit(0);
                        }
                        Err(e) => {
                            let _ = close(read_fd);
                            let _ = close(write_fd);
                            self.log(&format!(
                                "[supervisor({})] [child process start failed] [err: {}]",
                                self.pid(),
                                e
                            ));
                            self.set_err_num(self.err_num() + 1);
                        }
                    }
                }
            }
        }
    }

    fn cleanup(&mut self, fifo_server: &mut Option<FifoServer>) {
        if let Some(mut server) = fifo_server.take() {
            server.shutdown();
        }
        if let Some(path) = self.cpid_file().clone() {
            if let Err(e) = pidfile::remove_pid_file(&path) {
                warn!("remove cpid file: {}", e);
            }
        }
        if let Some(path) = self.pid_file().clone() {
            if let Err(e) = pidfile::remove_pid_file(&path) {
                warn!("remove pid file: {}", e);
            }
        }
    }

    /// Installs the worker's own termination handler, which writes a
    /// `WantSafetyClose` record to FD 3 — the supervisor's pipe, inherited
    /// at the exec boundary that created this generation (spec.md §4.F
    /// step f, §6), not any pipe this process might have created itself.
    fn install_worker_shutdown_handler(&self) {
        let handler = move |_sig: i32| -> signal::HandlerResult {
            use std::io::Write as _;
            use std::mem::ManuallyDrop;
            use std::os::unix::io::FromRawFd;

            let file = unsafe { std::fs::File::from_raw_fd(WORKER_PIPE_FD) };
            let mut file = ManuallyDrop::new(file);
            let _ = pipe::write_message(&mut *file, &pipe::PipeMessage::want_safety_close());
            let _ = file.flush();
            process::exit(0);
        };
        signal::register(handler, &[SIGINT, SIGTERM]);
        std::thread::spawn(|| {
            if let Err(e) = signal::serve() {
                warn!("serve signals: {}", e);
            }
        });
    }
}

/// Drains one supervisor generation's pipe to completion (until the
/// worker requests a safe close, or the pipe closes), then waits on the
/// channel for the next generation. This is the single long-lived reader
/// thread spec.md §9 requires — started once per supervisor process, fed
/// a fresh `PipeReader` for every restart rather than being recreated
/// per-message or per-generation.
fn pipe_reader_loop(rx: std::sync::mpsc::Receiver<PipeGeneration>) {
    while let Ok(mut generation) = rx.recv() {
        loop {
            match generation.reader.next_message() {
                Ok(Some(msg)) if msg.behavior == pipe::Behavior::WantSafetyClose => {
                    if let Some(path) = &generation.cpid_file {
                        let _ = pidfile::remove_pid_file(path);
                    }
                    info!(
                        "[supervisor({})] [stop heart -pid {}] [safety exit]",
                        generation.pid, generation.cpid
                    );
                    process::exit(0);
                }
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(e) => {
                    debug!("pipe reader: {}", e);
                    break;
                }
            }
        }
    }
}

/// Best-effort process title update, grounded in conmon's own pattern of
/// writing directly to `/proc/self/*` pseudo-files (see its
/// `set_oom`/OOM-score-adjust handling). A true argv-rewrite needs unsafe
/// platform-specific memory surgery this crate deliberately avoids; this
/// updates `/proc/self/comm` instead, which the kernel truncates to 15
/// bytes and which shows up in `ps -eo comm` but not the full `ps -ef`
/// COMMAND column. Best effort: failures are logged, not fatal.
fn set_process_title(title: &str) {
    let truncated: String = title.chars().take(15).collect();
    if let Err(e) = fs::write("/proc/self/comm", truncated) {
        debug!("set process title: {}", e);
    }
}
