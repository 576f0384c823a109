//! # Operator Console
//!
//! Line based console through which the operator captures the reference line and engages
//! autosteer. The console runs on its own thread and passes parsed commands to the main loop over
//! a channel.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, warn};
use rustyline::{error::ReadlineError, DefaultEditor};
use std::{
    path::PathBuf,
    sync::mpsc::{channel, Receiver, Sender},
    thread::{self, JoinHandle},
};
use structopt::{clap, StructOpt};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const PROMPT: &str = "autosteer $ ";

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A command issued by the operator.
#[derive(Debug, Clone, PartialEq, StructOpt)]
#[structopt(name = "autosteer")]
pub enum OperatorCmd {
    /// Capture the vehicle position as the next point of the reference line.
    ///
    /// The first capture sets point A, the second sets point B and with it the line direction.
    #[structopt(name = "ab", alias = "a")]
    CapturePoint,

    /// Shift the guide lines so that one passes through the vehicle.
    #[structopt(name = "nudge")]
    Nudge,

    /// Engage autosteer.
    #[structopt(name = "engage", alias = "on")]
    Engage,

    /// Disengage autosteer.
    #[structopt(name = "disengage", alias = "off")]
    Disengage,

    /// Set the working width in meters, or `auto` to use the width reported by the vehicle.
    #[structopt(name = "width")]
    Width {
        #[structopt(parse(try_from_str = parse_width))]
        width: WidthSetting,
    },

    /// Save the reference line.
    #[structopt(name = "save")]
    Save,

    /// Show the current guidance status.
    #[structopt(name = "status")]
    Status,

    /// Save and exit.
    #[structopt(name = "quit", alias = "exit")]
    Quit,
}

/// Working width chosen by the operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WidthSetting {
    /// Use the width reported by the vehicle
    Auto,

    /// Use this width in meters
    Meters(f64),
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Parse a console line into a command.
///
/// Returns `Ok(None)` for blank lines. The error carries clap's message, which is also how help
/// text is returned.
pub fn parse_line(line: &str) -> Result<Option<OperatorCmd>, clap::Error> {
    let args: Vec<&str> = line.split_whitespace().collect();

    if args.is_empty() {
        return Ok(None)
    }

    OperatorCmd::from_iter_safe(std::iter::once("autosteer").chain(args)).map(Some)
}

/// Start the console thread.
///
/// The returned receiver gets every command the operator enters. If the console closes (end of
/// input or interrupt) [`OperatorCmd::Quit`] is sent.
pub fn spawn_console(history_path: Option<PathBuf>) -> (Receiver<OperatorCmd>, JoinHandle<()>) {
    let (tx, rx) = channel();

    let handle = thread::spawn(move || run_console(tx, history_path));

    (rx, handle)
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn parse_width(s: &str) -> Result<WidthSetting, String> {
    if s.eq_ignore_ascii_case("auto") {
        return Ok(WidthSetting::Auto)
    }

    match s.parse::<f64>() {
        Ok(w) if w.is_finite() && w > 0.0 => Ok(WidthSetting::Meters(w)),
        _ => Err(format!("expected a positive width in meters or \"auto\", found \"{}\"", s))
    }
}

fn run_console(tx: Sender<OperatorCmd>, history_path: Option<PathBuf>) {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            warn!("Operator console unavailable: {}", e);
            return
        }
    };

    if let Some(ref path) = history_path {
        if rl.load_history(path).is_err() {
            debug!("No console history found at {:?}", path);
        }
    }

    loop {
        match rl.readline(PROMPT) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    rl.add_history_entry(line.as_str()).ok();
                }

                match parse_line(&line) {
                    Ok(Some(cmd)) => {
                        let quit = cmd == OperatorCmd::Quit;
                        if tx.send(cmd).is_err() || quit {
                            break
                        }
                    },
                    Ok(None) => (),
                    // Includes help output
                    Err(e) => println!("{}", e.message),
                }
            },
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                tx.send(OperatorCmd::Quit).ok();
                break
            },
            Err(e) => {
                warn!("Operator console error: {}", e);
                tx.send(OperatorCmd::Quit).ok();
                break
            }
        }
    }

    if let Some(ref path) = history_path {
        if let Err(e) = rl.save_history(path) {
            warn!("Could not save console history: {}", e);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn parse(line: &str) -> OperatorCmd {
        parse_line(line).unwrap().unwrap()
    }

    #[test]
    fn test_commands() {
        assert_eq!(parse("ab"), OperatorCmd::CapturePoint);
        assert_eq!(parse("a"), OperatorCmd::CapturePoint);
        assert_eq!(parse("nudge"), OperatorCmd::Nudge);
        assert_eq!(parse("on"), OperatorCmd::Engage);
        assert_eq!(parse("  engage  "), OperatorCmd::Engage);
        assert_eq!(parse("off"), OperatorCmd::Disengage);
        assert_eq!(parse("disengage"), OperatorCmd::Disengage);
        assert_eq!(parse("save"), OperatorCmd::Save);
        assert_eq!(parse("status"), OperatorCmd::Status);
        assert_eq!(parse("quit"), OperatorCmd::Quit);
    }

    #[test]
    fn test_width() {
        assert_eq!(
            parse("width 12.5"),
            OperatorCmd::Width { width: WidthSetting::Meters(12.5) }
        );
        assert_eq!(parse("width auto"), OperatorCmd::Width { width: WidthSetting::Auto });
        assert_eq!(parse("width AUTO"), OperatorCmd::Width { width: WidthSetting::Auto });

        assert!(parse_line("width").is_err());
        assert!(parse_line("width 0").is_err());
        assert!(parse_line("width wide").is_err());
    }

    #[test]
    fn test_blank_and_unknown() {
        assert!(parse_line("").unwrap().is_none());
        assert!(parse_line("   ").unwrap().is_none());
        assert!(parse_line("fly").is_err());
        assert!(parse_line("nudge now").is_err());
    }
}
