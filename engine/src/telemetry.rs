//! Structured logging bootstrap (ambient stack).
//!
//! The core only ever calls the `log` facade; nothing under `src/` other
//! than this module knows or cares which backend is wired up. Embedding
//! applications are free to install their own `log` backend instead of
//! calling this at all — it's offered as a convenience, not a requirement.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use log::LevelFilter;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use crate::error::{CResult, Error};

const MAX_LOG_FILES: usize = 10;
const FILE_BUFFER_BYTES: usize = 1024 * 1024;

/// Installs a daily-rotating file logger plus a colored stderr channel for
/// `warn`-and-above records tagged with the `engine_warnings` target.
/// Returns guard objects that must be kept alive for the life of the
/// process; dropping them stops the background flush thread.
pub fn init_logging(dir: impl AsRef<Path>, level: &str) -> CResult<Vec<Box<dyn Drop + Send + Sync>>> {
    let mut guards: Vec<Box<dyn Drop + Send + Sync>> = Vec::new();
    let mut logger = fern::Dispatch::new();

    let rolling = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("docstore-engine.log")
        .max_log_files(MAX_LOG_FILES)
        .build(dir)
        .map_err(|err| Error::Internal(err.to_string()))?;
    let (non_blocking, flush_guard) = tracing_appender::non_blocking(rolling);
    let buffered = BufWriter::with_capacity(FILE_BUFFER_BYTES, non_blocking);
    guards.push(Box::new(flush_guard));

    let level = LevelFilter::from_str(level).map_err(|err| Error::InvalidArgument(err.to_string()))?;
    let file_dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] {} [{}] {}",
                chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(Box::new(buffered) as Box<dyn Write + Send>);
    logger = logger.chain(file_dispatch);

    let stderr_dispatch = fern::Dispatch::new()
        .level(LevelFilter::Warn)
        .filter(|metadata| metadata.target() == "engine_warnings")
        .format(|out, message, _| {
            out.finish(format_args!("\x1B[{}m{}\x1B[0m", fern::colors::Color::Yellow.to_fg_str(), message))
        })
        .chain(std::io::stderr());
    logger = logger.chain(stderr_dispatch);

    if logger.apply().is_err() {
        log::warn!("logger already installed, skipping re-init");
        return Ok(Vec::new());
    }

    Ok(guards)
}
