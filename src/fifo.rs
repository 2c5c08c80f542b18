//! FIFO query server and diagnostic client (component E, spec.md §4.E;
//! SPEC_FULL.md §4.K), grounded in the Go source's `api.go`/`damon.go`
//! (`Context.Information`) and `example/named-pipe-ipc.go`.
//!
//! The concrete FIFO transport below the framing layer is explicitly out
//! of scope (spec.md §1); this is this crate's own realization of "a
//! send/receive primitive with defined framing" — a request FIFO and a
//! response FIFO, one pair per supervisor.

use anyhow::{Context as _, Result};
use log::warn;
use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{close, mkfifo, read};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const REQUEST_NAME: &str = "heart.req";
const RESPONSE_NAME: &str = "heart.resp";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// The sole query this crate's FIFO server understands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Api {
    /// Ask the supervisor to print its status line.
    PrintInformation = 1,
}

#[derive(Serialize, Deserialize)]
struct Request {
    #[serde(rename = "Api")]
    api: i64,
}

fn request_path(dir: &Path) -> PathBuf {
    dir.join(REQUEST_NAME)
}

fn response_path(dir: &Path) -> PathBuf {
    dir.join(RESPONSE_NAME)
}

/// A running FIFO query server. Dropping it (or calling
/// [`FifoServer::shutdown`]) stops the poll loop and removes both FIFO
/// files (spec.md §4.F cleanup: independent, logs but never propagates
/// its own failure).
pub struct FifoServer {
    req_path: PathBuf,
    resp_path: PathBuf,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FifoServer {
    /// Creates the FIFO pair in `dir` and starts the 500ms poll loop on a
    /// background thread. `status` is called to render the response to a
    /// `PrintInformation` query; it is invoked from the poll thread, so it
    /// must not block.
    ///
    /// Per spec.md §5, this is started at most once per supervisor
    /// process, after the first successful child spawn and before the
    /// wait on that child.
    pub fn start(dir: &Path, status: impl Fn() -> String + Send + Sync + 'static) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("create fifo dir '{}'", dir.display()))?;
        let req_path = request_path(dir);
        let resp_path = response_path(dir);

        for path in [&req_path, &resp_path] {
            let _ = fs::remove_file(path);
            mkfifo(path.as_path(), Mode::from_bits_truncate(0o600))
                .with_context(|| format!("create fifo '{}'", path.display()))?;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            let req_path = req_path.clone();
            let resp_path = resp_path.clone();
            thread::spawn(move || serve(&req_path, &resp_path, &stop, status))
        };

        Ok(Self {
            req_path,
            resp_path,
            stop,
            handle: Some(handle),
        })
    }

    /// Stops the poll loop and removes both FIFO files.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        for path in [&self.req_path, &self.resp_path] {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!("remove fifo '{}': {}", path.display(), e);
                }
            }
        }
    }
}

impl Drop for FifoServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// The request FIFO is opened once, non-blocking, and kept open for the
// server's whole lifetime. A non-blocking open never waits for a writer;
// a `read` that returns 0 just means no writer is currently connected, not
// that the FIFO is "used up" — a later writer can still deliver data on
// this same descriptor. This is what lets `shutdown` observe `stop`
// within one `POLL_INTERVAL` instead of blocking forever on `open`.
fn serve(req_path: &Path, resp_path: &Path, stop: &AtomicBool, status: impl Fn() -> String) {
    let fd = match open(req_path, OFlag::O_RDONLY | OFlag::O_NONBLOCK, Mode::empty()) {
        Ok(fd) => fd,
        Err(e) => {
            warn!("fifo server: open request fifo: {}", e);
            return;
        }
    };

    while !stop.load(Ordering::SeqCst) {
        match read_request(fd) {
            Ok(Some(Api::PrintInformation)) => {
                if let Err(e) = send_response(resp_path, &status()) {
                    warn!("fifo server: send response: {}", e);
                }
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                // Anything reaching here is neither "no message" (EAGAIN,
                // already folded into `Ok(None)`) nor a malformed request
                // (also folded into `Ok(None)`) — spec.md §4.E/§7.3 treats
                // it as fatal for the server, and §6 assigns it exit code 4.
                warn!("fifo server: fatal error: {}", e);
                let _ = close(fd);
                std::process::exit(4);
            }
        }
    }
    let _ = close(fd);
}

fn read_request(fd: RawFd) -> std::io::Result<Option<Api>> {
    let mut buf = [0u8; 256];
    let n = match read(fd, &mut buf) {
        Ok(n) => n,
        Err(Errno::EAGAIN) => return Ok(None),
        Err(e) => return Err(std::io::Error::from_raw_os_error(e as i32)),
    };
    if n == 0 {
        return Ok(None);
    }
    let text = String::from_utf8_lossy(&buf[..n]);
    let req: Request = match serde_json::from_str(text.trim()) {
        Ok(r) => r,
        Err(_) => return Ok(None),
    };
    Ok(match req.api {
        1 => Some(Api::PrintInformation),
        _ => None,
    })
}

fn send_response(resp_path: &Path, line: &str) -> std::io::Result<()> {
    let mut f = fs::OpenOptions::new().write(true).open(resp_path)?;
    writeln!(f, "{}", line)
}

/// Sends `{Api: PrintInformation}` to the FIFO pair in `dir` and returns
/// the response line, grounded in `example/named-pipe-ipc.go`. This is a
/// best-effort synchronous client for ad-hoc diagnostics, not a hardened
/// RPC client: opening the request FIFO for write blocks until the server
/// thread is polling, matching the original example's blocking behavior.
pub fn query_supervisor(dir: &Path) -> Result<String> {
    let req_path = request_path(dir);
    let resp_path = response_path(dir);

    let request = Request {
        api: Api::PrintInformation as i64,
    };
    let line = serde_json::to_string(&request)?;

    {
        let mut f = fs::OpenOptions::new()
            .write(true)
            .open(&req_path)
            .with_context(|| format!("open request fifo '{}'", req_path.display()))?;
        f.write_all(line.as_bytes())?;
    }

    let mut resp = String::new();
    {
        let mut f = fs::File::open(&resp_path)
            .with_context(|| format!("open response fifo '{}'", resp_path.display()))?;
        f.read_to_string(&mut resp)?;
    }
    Ok(resp.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn start_creates_both_fifos_and_shutdown_removes_them() {
        let dir = tempdir().unwrap();
        let mut server = FifoServer::start(dir.path(), || "status".to_string()).unwrap();
        assert!(request_path(dir.path()).exists());
        assert!(response_path(dir.path()).exists());
        server.shutdown();
        assert!(!request_path(dir.path()).exists());
        assert!(!response_path(dir.path()).exists());
    }
}
