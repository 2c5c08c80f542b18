//! Error taxonomy for the fallible surfaces the restart loop must react to
//! (spec.md §7, SPEC_FULL.md §4.I).
//!
//! Call sites outside the restart loop propagate with `anyhow::Context`
//! exactly as the teacher crate does; the restart loop itself matches on
//! these variants to decide counters and exit codes.

use std::path::PathBuf;
use thiserror::Error;

/// Errors the supervision loop and its components can produce.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Forking or exec'ing the next generation failed.
    #[error("spawn child process: {0}")]
    Spawn(#[source] std::io::Error),

    /// Creating or reading/writing the anonymous pipe failed.
    #[error("anonymous pipe: {0}")]
    Pipe(#[source] nix::Error),

    /// Opening, writing, or removing a PID file failed.
    #[error("pid file '{path}': {source}")]
    PidFile {
        /// The file involved.
        path: PathBuf,
        /// The underlying IO failure.
        #[source]
        source: std::io::Error,
    },

    /// A FIFO query-server error judged non-benign per spec.md §7.3.
    #[error("fifo server: {0}")]
    Fifo(#[source] anyhow::Error),

    /// The supervision context's cancellation flag was tripped before a
    /// spawn attempt (spec.md §4.B).
    #[error("spawn cancelled")]
    Cancelled,
}
