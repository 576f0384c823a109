//! # Log Follower
//!
//! Follows the simulator's log file like `tail -F`, parsing any new telemetry lines. Reading
//! starts from the end of the file so stale telemetry from before start-up is never used. If the
//! file is replaced or truncated it is reopened and read from the start.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use serde::Deserialize;
use std::{
    fs::{self, File, Metadata},
    io::{BufRead, BufReader, Seek, SeekFrom},
    path::{Path, PathBuf},
    thread::{self, JoinHandle},
    time::Duration,
};

use super::{LineParser, Telemetry, TelemetryCell, TelemetryError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct LogTailParams {
    /// Path to the simulator's log file. If not set no telemetry will be read.
    pub log_path: Option<PathBuf>,

    /// Marker identifying telemetry lines
    pub marker: String,

    /// Time to wait at the end of the file before checking for more lines
    pub poll_period_ms: u64,

    /// Initial wait before retrying to open the log
    pub reopen_backoff_ms: u64,

    /// Longest wait between attempts to open the log
    pub reopen_backoff_max_ms: u64,
}

pub struct LogTail {
    path: PathBuf,

    parser: LineParser,

    reader: Option<BufReader<File>>,

    identity: Option<FileIdentity>,

    /// Number of bytes consumed from the current file
    pos: u64,

    /// Bytes of a line which hasn't been terminated yet
    partial: Vec<u8>,

    /// If true the next open starts at the end of the file
    skip_existing: bool,
}

/// Identity of a file on disk, which changes when the file is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Start a thread following the log and writing each new snapshot into the cell.
pub fn spawn(params: &LogTailParams, cell: TelemetryCell) -> Result<JoinHandle<()>, TelemetryError> {
    let path = match params.log_path {
        Some(ref p) => p.clone(),
        None => {
            return Err(TelemetryError::OpenError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no telemetry log path configured"
            )))
        }
    };

    let mut tail = LogTail::new(&path, &params.marker)?;

    let poll_period = Duration::from_millis(params.poll_period_ms);
    let backoff_min = Duration::from_millis(params.reopen_backoff_ms);
    let backoff_max = Duration::from_millis(params.reopen_backoff_max_ms.max(params.reopen_backoff_ms));

    let handle = thread::spawn(move || {
        let mut backoff = backoff_min;

        info!("Following {:?} for telemetry", path);

        loop {
            match tail.poll() {
                Ok(Some(t)) => {
                    backoff = backoff_min;
                    cell.set(t);
                },
                Ok(None) => {
                    backoff = backoff_min;
                    thread::sleep(poll_period);
                },
                Err(TelemetryError::OpenError(e)) => {
                    warn!("Could not open telemetry log, retrying in {:?}: {}", backoff, e);
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(backoff_max);
                },
                Err(e) => {
                    warn!("{}", e);
                    thread::sleep(poll_period);
                }
            }
        }
    });

    Ok(handle)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl LogTail {
    /// Create a new follower. The file is not opened until the first poll.
    pub fn new<P: AsRef<Path>>(path: P, marker: &str) -> Result<Self, TelemetryError> {
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            parser: LineParser::new(marker)?,
            reader: None,
            identity: None,
            pos: 0,
            partial: Vec::new(),
            skip_existing: true,
        })
    }

    /// Read any complete lines appended since the last poll.
    ///
    /// Returns the newest telemetry among them, or `None` if there wasn't any. Lines which fail
    /// to parse are logged and skipped.
    pub fn poll(&mut self) -> Result<Option<Telemetry>, TelemetryError> {
        if self.reader.is_none() {
            self.open()?;
        }

        let mut latest = None;

        loop {
            let num_read = match self.reader {
                Some(ref mut r) => r
                    .read_until(b'\n', &mut self.partial)
                    .map_err(TelemetryError::ReadError)?,
                None => break,
            };

            if num_read == 0 {
                if self.rotated() {
                    info!("Telemetry log was replaced, reopening");
                    self.reader = None;
                    self.open()?;
                    continue
                }
                break
            }

            self.pos += num_read as u64;

            // Unterminated line, wait for the rest of it
            if !self.partial.ends_with(b"\n") {
                continue
            }

            let line = String::from_utf8_lossy(&self.partial).into_owned();
            self.partial.clear();

            match self.parser.parse_line(line.trim_end()) {
                Ok(Some(t)) => latest = Some(t),
                Ok(None) => (),
                Err(e) => warn!("Skipping telemetry line: {}", e),
            }
        }

        Ok(latest)
    }

    fn open(&mut self) -> Result<(), TelemetryError> {
        let file = File::open(&self.path).map_err(TelemetryError::OpenError)?;
        let meta = file.metadata().map_err(TelemetryError::OpenError)?;
        let mut reader = BufReader::new(file);

        self.pos = if self.skip_existing {
            reader.seek(SeekFrom::End(0)).map_err(TelemetryError::OpenError)?
        }
        else {
            0
        };

        debug!("Opened telemetry log at byte {}", self.pos);

        self.skip_existing = false;
        self.identity = file_identity(&meta);
        self.partial.clear();
        self.reader = Some(reader);

        Ok(())
    }

    /// True if the file at the path is no longer the one being read.
    fn rotated(&self) -> bool {
        match fs::metadata(&self.path) {
            Ok(meta) => {
                let id = file_identity(&meta);
                (id.is_some() && id != self.identity) || meta.len() < self.pos
            },
            // Missing for a moment while being replaced, keep reading the old one
            Err(_) => false,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

#[cfg(unix)]
fn file_identity(meta: &Metadata) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt;

    Some(FileIdentity {
        dev: meta.dev(),
        ino: meta.ino(),
    })
}

#[cfg(not(unix))]
fn file_identity(_meta: &Metadata) -> Option<FileIdentity> {
    None
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
