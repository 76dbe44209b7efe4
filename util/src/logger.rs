//! # Logger
//!
//! Log lines go to stdout and to the session's log file, stamped with the seconds elapsed since the
//! session epoch. Records from the hardware crates are capped at `WARN` so that bus traffic does
//! not drown the controllers' own trace output.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::fmt;
use colored::{ColoredString, Colorize};
use log::{info, Level, Record};
use thiserror::Error;

// Internal
use crate::session;

pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Dependencies whose logs are limited to warnings and errors.
const QUIET_TARGETS: [&str; 2] = ["rppal", "pwm_pca9685"];

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("The minimum log level must include INFO, found `{0}`")]
    InvalidMinLogLevel(LevelFilter),

    #[error("Could not open the log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("Could not install the logger: {0}")]
    FernInitError(log::SetLoggerError)
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Install the logger. Must be called once, after the session has been created.
///
/// `min_level` must be at least `Info`.
pub fn logger_init(
    min_level: LevelFilter,
    session: &session::Session
) -> Result<(), LoggerInitError> {

    if min_level < Level::Info {
        return Err(LoggerInitError::InvalidMinLogLevel(min_level))
    }

    let log_file = fern::log_file(&session.log_file_path)
        .map_err(LoggerInitError::LogFileInitError)?;

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}",
                Line {
                    elapsed_s: session::get_elapsed_seconds(),
                    record,
                    message
                }
            ))
        })
        .level(min_level);

    for target in QUIET_TARGETS.iter() {
        dispatch = dispatch.level_for(*target, LevelFilter::Warn);
    }

    dispatch
        .chain(std::io::stdout())
        .chain(log_file)
        .apply()
        .map_err(LoggerInitError::FernInitError)?;

    info!("Logger ready, level {:?}, file {:?}", min_level, session.log_file_path);
    if let Some(epoch) = session::get_epoch() {
        info!("Session epoch {}", epoch);
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE STRUCTS
// ---------------------------------------------------------------------------

/// One formatted log line. The record's target is only shown below `INFO`.
struct Line<'a, M: fmt::Display> {
    elapsed_s: f64,
    record: &'a Record<'a>,
    message: M,
}

impl<'a, M: fmt::Display> fmt::Display for Line<'a, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = self.record.level();

        write!(f, "[{:10.6} {}] ", self.elapsed_s, level_tag(level))?;
        if level > Level::Info {
            write!(f, "{}: ", self.record.target())?;
        }
        write!(f, "{}", self.message)
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn level_tag(level: Level) -> ColoredString {
    match level {
        Level::Trace => "TRC".dimmed().italic(),
        Level::Debug => "DBG".dimmed(),
        Level::Info  => "INF".normal(),
        Level::Warn  => "WRN".yellow(),
        Level::Error => "ERR".red().bold()
    }
}
