//! Anonymous-pipe wire protocol on FD 3 (component D, spec.md §4.D, §6),
//! grounded in the Go source's `pipe.go` (`PipeMessage`, `PipeMessageType`,
//! `ProcessBehavior`).

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::io::{FromRawFd, RawFd};

/// Direction a framed message travels.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageType {
    /// Supervisor -> worker (reserved; no behavior is currently defined
    /// for this direction).
    SupervisorToProcess = 1,
    /// Worker -> supervisor.
    ProcessToSupervisor = 2,
}

/// What the sender wants the receiver to do.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Behavior {
    /// The worker requests a clean, supervised shutdown.
    WantSafetyClose = 1,
}

/// One newline-framed record exchanged over FD 3.
#[derive(Clone, Copy, Debug)]
pub struct PipeMessage {
    /// Which direction this record claims to travel.
    pub message_type: MessageType,
    /// What the sender wants done.
    pub behavior: Behavior,
}

impl PipeMessage {
    /// The one message a worker ever sends today (spec.md §4.D).
    pub fn want_safety_close() -> Self {
        Self {
            message_type: MessageType::ProcessToSupervisor,
            behavior: Behavior::WantSafetyClose,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawMessage {
    #[serde(rename = "Type")]
    r#type: i64,
    #[serde(rename = "Behavior")]
    behavior: i64,
}

fn decode(raw: RawMessage) -> Option<PipeMessage> {
    let message_type = match raw.r#type {
        1 => MessageType::SupervisorToProcess,
        2 => MessageType::ProcessToSupervisor,
        _ => return None,
    };
    let behavior = match raw.behavior {
        1 => Behavior::WantSafetyClose,
        _ => return None,
    };
    Some(PipeMessage {
        message_type,
        behavior,
    })
}

fn encode(msg: &PipeMessage) -> RawMessage {
    RawMessage {
        r#type: msg.message_type as i64,
        behavior: msg.behavior as i64,
    }
}

/// A single long-lived reader over the pipe's read end (spec.md §9: a
/// fresh decoder per message can't frame records correctly; this crate
/// creates one `PipeReader` per supervisor generation and keeps it for
/// that generation's whole lifetime).
pub struct PipeReader<R> {
    inner: BufReader<R>,
}

impl PipeReader<File> {
    /// Takes ownership of `fd` as the read end of the pipe.
    ///
    /// # Safety note
    /// `fd` must be a valid, open, readable file descriptor that nothing
    /// else will close; ownership transfers to the returned reader.
    pub fn from_fd(fd: RawFd) -> Self {
        let file = unsafe { File::from_raw_fd(fd) };
        Self {
            inner: BufReader::new(file),
        }
    }
}

impl<R: io::Read> PipeReader<R> {
    /// Reads and decodes the next record, skipping malformed lines and
    /// records with an unrecognized `Type` (spec.md §4.D tolerance rule).
    /// Returns `Ok(None)` once the pipe is closed.
    pub fn next_message(&mut self) -> io::Result<Option<PipeMessage>> {
        loop {
            let mut line = String::new();
            let n = self.inner.read_line(&mut line)?;
            if n == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let raw: RawMessage = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if let Some(msg) = decode(raw) {
                return Ok(Some(msg));
            }
        }
    }
}

/// Writes one framed record. A broken pipe is treated as a benign race
/// (the reader has already gone away) rather than an error, per spec.md
/// §4.D.
pub fn write_message<W: Write>(mut w: W, msg: &PipeMessage) -> io::Result<()> {
    let line = serde_json::to_string(&encode(msg))?;
    match writeln!(w, "{}", line) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn decodes_want_safety_close() {
        let mut reader = PipeReader {
            inner: BufReader::new(Cursor::new(b"{\"Type\":2,\"Behavior\":1}\n".to_vec())),
        };
        let msg = reader.next_message().unwrap().unwrap();
        assert_eq!(msg.message_type, MessageType::ProcessToSupervisor);
        assert_eq!(msg.behavior, Behavior::WantSafetyClose);
    }

    #[test]
    fn skips_unknown_type_then_reports_eof() {
        let mut reader = PipeReader {
            inner: BufReader::new(Cursor::new(b"{\"Type\":9,\"Behavior\":1}\n".to_vec())),
        };
        assert!(reader.next_message().unwrap().is_none());
    }

    #[test]
    fn skips_malformed_line_and_reads_next() {
        let data = b"not json\n{\"Type\":2,\"Behavior\":1}\n".to_vec();
        let mut reader = PipeReader {
            inner: BufReader::new(Cursor::new(data)),
        };
        let msg = reader.next_message().unwrap().unwrap();
        assert_eq!(msg.behavior, Behavior::WantSafetyClose);
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut buf = Vec::new();
        write_message(&mut buf, &PipeMessage::want_safety_close()).unwrap();
        let mut reader = PipeReader {
            inner: BufReader::new(Cursor::new(buf)),
        };
        let msg = reader.next_message().unwrap().unwrap();
        assert_eq!(msg.behavior, Behavior::WantSafetyClose);
    }
}
