//! # Guidance Executable
//!
//! This executable is the peer side of autosteer. It is responsible for:
//! - Keeping the reference line captured by the operator
//! - Computing the steering command from the vehicle pose reported by the wheel host
//! - Exchanging state with the wheel host once per cycle

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::{debug, info, warn};
use std::{
    path::{Path, PathBuf},
    sync::mpsc::TryRecvError,
    thread,
    time::{Duration, Instant},
};
use structopt::StructOpt;

// Internal
use comms_if::net::{zmq, Backoff, NetParams};
use guide_lib::{
    data_store::DataStore,
    guidance::{self, GuidanceEngine, RefPointResult, ReferenceLine},
    operator::{self, OperatorCmd, WidthSetting},
    params::GuideExecParams,
    sync_client::SyncClient,
};
use util::{
    host,
    logger::{logger_init, parse_level_filter, LevelFilter, LoggerConfig},
    module::State,
    session::Session,
};

// ---------------------------------------------------------------------------
// STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "guide_exec", about = "Autosteer guidance peer")]
struct Opts {
    /// Minimum level to log at (info, debug, trace)
    #[structopt(long, default_value = "debug", parse(try_from_str = parse_level_filter))]
    log_level: LevelFilter,

    /// Path to the parameter file, defaults to params/guide_exec.toml under the software root
    #[structopt(long, parse(from_os_str))]
    params: Option<PathBuf>,

    /// Override the reference line file from the parameters
    #[structopt(long, parse(from_os_str))]
    ref_line: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {

    color_eyre::install()?;

    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new(
        "guide_exec",
        "sessions"
    ).wrap_err("Failed to create the session")?;

    // Initialise logger, the console prompt shares the terminal so only info and above go there
    let log_config = LoggerConfig::new(opts.log_level)
        .term_level(LevelFilter::Info)
        .target_level("rustyline", LevelFilter::Warn);
    logger_init(log_config, &session)
        .wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Guidance Executable\n");
    info!("Running on: {}", host::get_hostname().unwrap_or_else(|| "unknown".into()));
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let mut params: GuideExecParams = match opts.params {
        Some(ref p) => util::params::load_from_path(p),
        None => util::params::load("guide_exec.toml"),
    }.wrap_err("Could not load guide_exec params")?;

    if let Some(p) = opts.ref_line {
        params.ref_line_path = p;
    }

    let net_params: NetParams = util::params::load("net.toml")
        .wrap_err("Could not load net params")?;

    let ref_line_path = host::resolve_path(&params.ref_line_path);
    let history_path = params.console_history_path.as_ref().map(host::resolve_path);

    info!("Exec parameters loaded");

    // ---- INITIALISE MODULES ----

    info!("Initialising modules...");

    let mut engine = GuidanceEngine::new(params.guidance.clone())
        .wrap_err("Failed to initialise Guidance")?;

    match ReferenceLine::load(&ref_line_path) {
        Ok(line) => {
            info!("Loaded reference line {} from {:?}", line, ref_line_path);
            engine.set_ref_line(Some(line));
        },
        Err(e) => warn!("Starting without a reference line: {}", e)
    }

    let mut ds = DataStore::new(engine);
    ds.width_override_m = params.width_override_m;

    info!("Module initialisation complete\n");

    // ---- INITIALISE NETWORK ----

    info!("Initialising network");

    let zmq_ctx = zmq::Context::new();

    let mut sync_client = SyncClient::new(&zmq_ctx, &net_params)
        .wrap_err("Failed to initialise SyncClient")?;
    info!("SyncClient initialised");

    let mut backoff = Backoff::new(
        Duration::from_millis(net_params.reconnect_backoff_ms),
        Duration::from_millis(net_params.reconnect_backoff_max_ms)
    );

    info!("Network initialisation complete");

    // ---- OPERATOR CONSOLE ----

    let (cmd_rx, _console_handle) = operator::spawn_console(history_path);

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    let cycle_period = Duration::from_millis(params.cycle_period_ms);

    'main: loop {

        // Get cycle start time
        let cycle_start_instant = Instant::now();

        // Clear items that need wiping at the start of the cycle
        ds.cycle_start();

        // ---- OPERATOR COMMANDS ----

        loop {
            let cmd = match cmd_rx.try_recv() {
                Ok(c) => c,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warn!("Operator console closed");
                    break 'main
                }
            };

            if !exec_operator_cmd(cmd, &mut ds, &params, &ref_line_path) {
                break 'main
            }
        }

        // ---- GUIDANCE ----

        if let Some(pose) = ds.vehicle_pose() {
            let input = guidance::InputData {
                pose,
                working_width_m: ds.effective_width_m(params.guidance.default_width_m),
            };

            match ds.guidance.proc(&input) {
                Ok((cmd, rpt)) => {
                    ds.guidance_cmd = cmd;
                    ds.guidance_status_rpt = rpt;
                },
                Err(e) => warn!("Guidance processing error: {}", e)
            }
        }

        // ---- SYNC ----

        let request = ds.build_request();

        match sync_client.exchange(&request) {
            Ok(reply) => {
                if backoff.is_backing_off() {
                    info!("Wheel host responding again");
                }
                backoff.reset();
                ds.apply_reply(reply);
            },
            Err(e) => {
                ds.num_consec_sync_errors += 1;
                let delay = backoff.next_delay();
                if !sync_client.connected() {
                    debug!("No connection to the wheel host");
                }
                warn!(
                    "Sync with the wheel host failed ({} in a row), retrying in {} ms: {}",
                    ds.num_consec_sync_errors,
                    delay.as_millis(),
                    e
                );
                thread::sleep(delay);
            }
        }

        // ---- CYCLE MANAGEMENT ----

        let cycle_dur = Instant::now() - cycle_start_instant;

        // Get sleep duration
        match cycle_period.checked_sub(cycle_dur) {
            Some(d) => thread::sleep(d),
            None => {
                // Backoff sleeps are expected to overrun the cycle
                if !backoff.is_backing_off() {
                    warn!(
                        "Cycle overran by {:.06} s",
                        (cycle_dur - cycle_period).as_secs_f64()
                    );
                }
            }
        }

        ds.cycle_end();
    }

    // ---- SHUTDOWN ----

    save_ref_line(&ds, &ref_line_path);

    info!("End of execution");

    Ok(())
}

/// Execute an operator command, returning `false` if the executable should stop.
fn exec_operator_cmd(
    cmd: OperatorCmd,
    ds: &mut DataStore,
    params: &GuideExecParams,
    ref_line_path: &Path
) -> bool {
    debug!("Operator command: {:?}", cmd);

    match cmd {
        OperatorCmd::CapturePoint => match ds.vehicle_pose() {
            Some(pose) => match ds.guidance.set_reference_point(pose.position_m) {
                RefPointResult::ASet => info!(
                    "Point A set at ({:.2}, {:.2}), drive on and capture B",
                    pose.position_m.x, pose.position_m.y
                ),
                RefPointResult::LineUpdated(dir) => info!(
                    "Point B set, reference line direction is now {:.2} deg", dir
                ),
                RefPointResult::Degenerate => warn!(
                    "Point B is on top of point A, capture abandoned"
                ),
            },
            None => warn!("No vehicle position received yet, cannot capture a point")
        },
        OperatorCmd::Nudge => match ds.vehicle_pose() {
            Some(pose) => {
                if ds.guidance.nudge_to_reference_frame(pose.position_m) {
                    info!("Guide lines nudged onto the vehicle");
                }
                else {
                    warn!("No reference line to nudge");
                }
            },
            None => warn!("No vehicle position received yet, cannot nudge")
        },
        OperatorCmd::Engage => {
            if ds.guidance.ref_line().is_none() {
                warn!("Autosteer engaged without a reference line, no commands will be sent");
            }
            ds.guidance.set_autosteer(true);
            info!("Autosteer engaged");
        },
        OperatorCmd::Disengage => {
            ds.guidance.set_autosteer(false);
            info!("Autosteer disengaged");
        },
        OperatorCmd::Width { width } => match width {
            WidthSetting::Auto => {
                ds.width_override_m = None;
                info!("Using the working width reported by the vehicle");
            },
            WidthSetting::Meters(w) => {
                ds.width_override_m = Some(w);
                info!("Working width set to {:.2} m", w);
            }
        },
        OperatorCmd::Save => save_ref_line(ds, ref_line_path),
        OperatorCmd::Status => {
            info!(
                "Autosteer: {}, reference line: {}, wheel: {}, width: {:.2} m",
                if ds.guidance.is_autosteer_enabled() { "on" } else { "off" },
                ds.guidance.ref_line()
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| "none".into()),
                ds.wheel_position()
                    .map(|p| format!("{:.3}", p))
                    .unwrap_or_else(|| "unknown".into()),
                ds.effective_width_m(params.guidance.default_width_m)
            );
            if let Some(ref reply) = ds.latest_reply {
                info!(
                    "Implement: {}",
                    if reply.implement.is_working() { "working" } else { "idle" }
                );
            }
            info!("Guidance: {:?}, {:#?}", ds.guidance_cmd, ds.guidance.report());
        },
        OperatorCmd::Quit => {
            info!("Operator requested exit");
            return false
        }
    }

    true
}

fn save_ref_line(ds: &DataStore, path: &Path) {
    match ds.guidance.ref_line() {
        Some(line) => match line.save(path) {
            Ok(()) => info!("Reference line {} saved to {:?}", line, path),
            Err(e) => warn!("Could not save the reference line: {}", e)
        },
        None => debug!("No reference line to save")
    }
}
