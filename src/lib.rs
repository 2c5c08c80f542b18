#![deny(missing_docs)]

//! `heart`: a re-exec process supervisor.
//!
//! Keeps a long-lived worker process alive by repeatedly (re)spawning it,
//! enforcing restart-rate limits, coordinating graceful shutdown through an
//! anonymous pipe, and exposing a runtime status query over a filesystem
//! FIFO.
//!
//! A caller builds a [`Context`], calls [`Context::run`], and branches on
//! the result: the supervisor branch of `run` never returns (it manages
//! its own process lifetime); the worker branch returns
//! [`RunOutcome::Worker`] and the caller's own business logic proceeds
//! from there, with a termination-signal handler already installed.
//!
//! ```no_run
//! use heart::Context;
//!
//! let mut ctx = Context::builder().build().expect("valid context");
//! ctx.run().expect("supervisor run");
//! // reached only by the worker; the supervisor branch never returns.
//! ```

mod cancel;
mod context;
mod error;
mod fifo;
mod launcher;
mod logging;
mod pidfile;
mod pipe;
mod role;
mod signal;
mod supervisor;

pub use cancel::Cancellation;
pub use context::{Context, ContextBuilder, LogSink, ProcAttr, RestartCallback};
pub use error::SupervisorError;
pub use fifo::query_supervisor;
pub use logging::init_logging;
pub use pidfile::probe as probe_pid_file;
pub use pipe::{Behavior, MessageType, PipeMessage};
pub use signal::{
    register as register_signal_handler, serve as serve_signals, stop, HandlerError, HandlerResult,
};
pub use supervisor::RunOutcome;
