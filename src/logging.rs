//! Structured log init (SPEC_FULL.md §4.H), grounded in
//! `Conmon::init_logging`.

use log::LevelFilter;
use std::io::Write;

/// Configures `env_logger` with a timestamped formatter that additionally
/// prints `file:line` at `Debug` and below, matching the teacher crate's
/// own formatter.
pub fn init_logging(level: LevelFilter) {
    env_logger::Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            let ts = buf.timestamp_millis();
            if record.level() <= LevelFilter::Debug {
                writeln!(
                    buf,
                    "{} {:<5} {} [{}:{}] {}",
                    ts,
                    record.level(),
                    record.target(),
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            } else {
                writeln!(buf, "{} {:<5} {} {}", ts, record.level(), record.target(), record.args())
            }
        })
        .init();
}
