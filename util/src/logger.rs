//! Generic logger utility functions
//!
//! Every executable logs to the terminal and to the session's log file. Each one picks its own
//! levels for the two outputs and can quieten individual targets through [`LoggerConfig`].

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use log::{self, info};
use fern;
use colored::{ColoredString, Colorize};
use thiserror::Error;

// Internal imports
use crate::session;

// Re-exports
pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// How an executable wants its logs dispatched.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Level written to the session log file
    pub file_level: LevelFilter,

    /// Level written to the terminal
    pub term_level: LevelFilter,

    /// Per-target overrides, applied to both outputs
    pub target_levels: Vec<(&'static str, LevelFilter)>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with initialising the logger.
#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("Expected a log level less than `INFO`, found `{0}`")]
    InvalidMinLogLevel(log::LevelFilter),

    #[error("Error initialising the log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("An error occured while setting up the logger: {0}")]
    FernInitError(log::SetLoggerError)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl LoggerConfig {
    /// Log at `level` to both outputs. ZMQ internals are kept at info.
    pub fn new(level: LevelFilter) -> Self {
        Self {
            file_level: level,
            term_level: level,
            target_levels: vec![("zmq", LevelFilter::Info)],
        }
    }

    /// Limit what reaches the terminal, the log file still gets everything.
    pub fn term_level(mut self, level: LevelFilter) -> Self {
        self.term_level = level.min(self.file_level);
        self
    }

    /// Override the level for one target.
    pub fn target_level(mut self, target: &'static str, level: LevelFilter) -> Self {
        self.target_levels.retain(|(t, _)| *t != target);
        self.target_levels.push((target, level));
        self
    }

    /// The most verbose level either output accepts.
    fn max_level(&self) -> LevelFilter {
        self.file_level.max(self.term_level)
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
///
/// # Notes
///
/// - The file level must be greater than `log::Level::Info`.
///
/// # Safety
///
/// - This function must only be called once to prevent corrupting logs.
pub fn logger_init(
    config: LoggerConfig,
    session: &session::Session
) -> Result<(), LoggerInitError> {

    if config.file_level < log::Level::Info {
        return Err(LoggerInitError::InvalidMinLogLevel(config.file_level))
    }

    let log_file = fern::log_file(session.log_file_path.clone())
        .map_err(LoggerInitError::LogFileInitError)?;

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}",
                format_record(
                    session::get_elapsed_seconds(),
                    record.level(),
                    record.target(),
                    message
                )
            ))
        })
        .level(config.max_level());

    for &(target, level) in config.target_levels.iter() {
        dispatch = dispatch.level_for(target, level);
    }

    dispatch
        .chain(fern::Dispatch::new()
            .level(config.term_level)
            .chain(std::io::stdout())
        )
        .chain(fern::Dispatch::new()
            .level(config.file_level)
            .chain(log_file)
        )
        .apply()
        .map_err(LoggerInitError::FernInitError)?;

    info!("Logging initialised");
    if let Some(epoch) = session::get_epoch() {
        info!("    Session epoch: {}", epoch);
    }
    info!("    Log level: {:?} (terminal {:?})", config.file_level, config.term_level);
    info!("    Log file path: {:?}", session.log_file_path);

    Ok(())
}

/// Parse a log level name as given on the command line.
pub fn parse_level_filter(s: &str) -> Result<LevelFilter, String> {
    s.parse::<LevelFilter>()
        .map_err(|_| format!("Unknown log level \"{}\"", s))
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Format one log line. Debug and trace lines name their target.
fn format_record(
    elapsed_s: f64,
    level: log::Level,
    target: &str,
    message: &std::fmt::Arguments
) -> String {
    if level > log::Level::Info {
        format!("[{:10.6} {}] {}: {}", elapsed_s, level_to_str(level), target, message)
    }
    else {
        format!("[{:10.6} {}] {}", elapsed_s, level_to_str(level), message)
    }
}

/// Get the string representation of a log level
fn level_to_str(level: log::Level) -> ColoredString {
    match level {
        log::Level::Trace => "TRC".dimmed().italic(),
        log::Level::Debug => "DBG".dimmed(),
        log::Level::Info  => "INF".normal(),
        log::Level::Warn  => "WRN".yellow(),
        log::Level::Error => "ERR".red().bold()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
