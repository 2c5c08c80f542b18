//! Supervision Context: the data model every component borrows or mutates
//! (spec.md §3, SPEC_FULL.md §4.J), built the way `conmon::config::Config`
//! is — `derive_builder` plus `getset` accessors.

use crate::cancel::Cancellation;
use derive_builder::Builder;
use getset::{CopyGetters, Getters, Setters};
use std::fs::File;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// A writable sink that exposes a raw descriptor, so the launcher can
/// redirect a worker's stdout/stderr onto it (spec.md §3's "two opaque byte
/// sinks").
pub trait LogSink: Write + AsRawFd + Send + Sync {}
impl<T: Write + AsRawFd + Send + Sync> LogSink for T {}

/// Invoked by the supervisor immediately before a restart beyond the first
/// (spec.md §3 `restart_callback`, §4.F step g).
pub type RestartCallback = Arc<dyn Fn() + Send + Sync>;

/// Spawn attributes passed through to the child. Kept separate from the
/// rest of `Context` so it can grow (working directory, uid/gid) without
/// disturbing the builder's other fields.
#[derive(Clone, Debug, Default)]
pub struct ProcAttr {
    /// Working directory for the child; `None` inherits the parent's.
    pub working_dir: Option<PathBuf>,
}

/// One supervised program: caller-built, then mutated by the supervision
/// loop for the remainder of the process's life (spec.md §3 invariant 1:
/// the counters are written only by the loop).
#[derive(Builder, Getters, CopyGetters, Setters)]
#[builder(default, pattern = "owned", setter(into, strip_option))]
pub struct Context {
    /// Directory the FIFO pair lives in.
    #[builder(default = "PathBuf::from(\".\")")]
    #[getset(get = "pub", set = "pub")]
    chroot: PathBuf,

    /// Spawn attributes passed through to the child.
    #[getset(get = "pub")]
    proc_attr: ProcAttr,

    /// Append-only sink for supervisor event-log lines.
    #[builder(setter(strip_option), default)]
    logger: Option<Box<dyn LogSink>>,

    /// Sink for worker panic traces; falls back to `logger` when unset.
    #[builder(setter(strip_option), default)]
    panic_logger: Option<Box<dyn LogSink>>,

    /// Hard cap on restarts; 0 means unlimited.
    #[getset(get_copy = "pub", set = "pub")]
    max_count: u64,

    /// Consecutive too-fast-exit cap.
    #[getset(get_copy = "pub", set = "pub")]
    max_error: u64,

    /// Runs shorter than this count as a failed start.
    #[getset(get_copy = "pub", set = "pub")]
    min_exit_time: Duration,

    /// Runs longer than this reset the restart counter.
    #[getset(get_copy = "pub", set = "pub")]
    restore_time: Duration,

    /// Extra inherited descriptors, landing at FD 4, 5, ... in the child.
    #[getset(get = "pub")]
    extra_files: Vec<File>,

    /// Where the supervisor's own PID is persisted.
    #[builder(setter(strip_option), default)]
    #[getset(get = "pub", set = "pub")]
    pid_file: Option<PathBuf>,

    /// Where the current worker's PID is persisted.
    #[builder(setter(strip_option), default)]
    #[getset(get = "pub", set = "pub")]
    cpid_file: Option<PathBuf>,

    /// Invoked before each restart beyond the first (spec.md §4.F step g).
    #[builder(setter(strip_option), default)]
    restart_callback: Option<RestartCallback>,

    /// Consulted immediately before each spawn attempt.
    #[getset(get = "pub")]
    cancellation: Cancellation,

    // --- runtime state below; not part of the public builder surface ---
    #[builder(setter(skip))]
    #[getset(get_copy = "pub", set = "pub(crate)")]
    pid: i32,

    #[builder(setter(skip))]
    #[getset(get_copy = "pub", set = "pub(crate)")]
    cpid: i32,

    #[builder(setter(skip), default = "1")]
    #[getset(get_copy = "pub", set = "pub(crate)")]
    count: u64,

    #[builder(setter(skip))]
    #[getset(get_copy = "pub", set = "pub(crate)")]
    err_num: u64,

    #[builder(setter(skip))]
    #[getset(get_copy = "pub", set = "pub(crate)")]
    is_reset: bool,
}

impl Context {
    /// A convenience builder entry point, mirroring `ConmonBuilder::default()`.
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// The restart callback, if one was configured.
    pub fn restart_callback(&self) -> Option<&RestartCallback> {
        self.restart_callback.as_ref()
    }

    /// The raw descriptor of the configured event-log sink, if any, for
    /// the launcher to redirect a worker's stdout/stderr onto.
    pub(crate) fn logger_for_redirect(&self) -> Option<std::os::unix::io::RawFd> {
        self.logger.as_ref().map(|s| s.as_raw_fd())
    }

    /// `count:completed/max; errNum:current/max`, matching the Go source's
    /// `Context.Information()` (spec.md §3's "in-process" counterpart to
    /// the FIFO server's bracketed line).
    pub fn information(&self) -> String {
        format!(
            "count:{}/{}; errNum:{}/{}",
            self.count.saturating_sub(1),
            self.max_count,
            self.err_num,
            self.max_error
        )
    }

    /// Writes one line to the configured event-log sink, falling back to
    /// the `log` crate when no sink was configured (spec.md §4.H/§4.F).
    pub fn log(&mut self, line: &str) {
        if let Some(sink) = self.logger.as_mut() {
            let _ = writeln!(sink, "{}", line);
        } else {
            log::info!("{}", line);
        }
    }

    /// Writes one line to the panic-trace sink, falling back to `logger`
    /// and then to the `log` crate (spec.md §3 `panic_logger`).
    pub fn log_panic(&mut self, line: &str) {
        if let Some(sink) = self.panic_logger.as_mut() {
            let _ = writeln!(sink, "{}", line);
        } else {
            self.log(line);
        }
    }

    /// Runs `body` behind an opt-in panic catch (spec.md §7: "a worker
    /// panic is caught by an opt-in wrapper that logs to the panic sink
    /// and returns"), grounded in the Go source's `Context.WithRecovery`.
    /// `recover_fn`, if given, is invoked with the caught payload before it
    /// is logged; a panic inside `body` never unwinds past this call —
    /// `run` simply returns and the supervision loop treats the worker's
    /// subsequent exit like any other.
    pub fn with_recovery<F, R>(&mut self, body: F, recover_fn: Option<R>)
    where
        F: FnOnce() + std::panic::UnwindSafe,
        R: FnOnce(&(dyn std::any::Any + Send)),
    {
        match std::panic::catch_unwind(body) {
            Ok(()) => {}
            Err(payload) => {
                if let Some(recover_fn) = recover_fn {
                    recover_fn(&payload);
                }
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_string());
                self.log_panic(&format!("panic in the recoverable worker body, error: {}", message));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_chroot_to_current_directory() {
        let ctx = Context::builder().build().unwrap();
        assert_eq!(ctx.chroot(), &PathBuf::from("."));
        assert_eq!(ctx.count(), 1);
        assert_eq!(ctx.err_num(), 0);
        assert!(!ctx.is_reset());
    }

    #[test]
    fn information_reports_completed_restarts() {
        let mut ctx = Context::builder()
            .max_count(5u64)
            .max_error(3u64)
            .build()
            .unwrap();
        ctx.set_count(4);
        ctx.set_err_num(1);
        assert_eq!(ctx.information(), "count:3/5; errNum:1/3");
    }

    #[test]
    fn cancellation_is_shared_across_clones() {
        let ctx = Context::builder().build().unwrap();
        let cancellation = ctx.cancellation().clone();
        assert!(!ctx.cancellation().is_cancelled());
        cancellation.cancel();
        assert!(ctx.cancellation().is_cancelled());
    }

    #[test]
    fn with_recovery_survives_a_panic_and_calls_the_hook() {
        let mut ctx = Context::builder().build().unwrap();
        let saw_panic = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let saw_panic_in_hook = Arc::clone(&saw_panic);
        ctx.with_recovery(
            || panic!("boom"),
            Some(move |_: &(dyn std::any::Any + Send)| {
                saw_panic_in_hook.store(true, std::sync::atomic::Ordering::SeqCst);
            }),
        );
        assert!(saw_panic.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn with_recovery_runs_body_normally_when_it_does_not_panic() {
        let mut ctx = Context::builder().build().unwrap();
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_in_body = Arc::clone(&ran);
        ctx.with_recovery(move || ran_in_body.store(true, std::sync::atomic::Ordering::SeqCst), None::<fn(&(dyn std::any::Any + Send))>);
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }
}
