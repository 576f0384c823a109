//! # Wheel Control Executable
//!
//! This executable is the host side of autosteer. It is responsible for:
//! - Following the simulator log for vehicle telemetry
//! - Driving the force feedback wheel to the steering demanded by the guidance peer
//! - Answering the peer's sync requests with the latest telemetry and wheel state

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Host side decisions and signal latching.
mod host_state;

/// Parameters for the wheel executable.
mod params;

/// Sync server abstraction.
mod sync_server;

/// Telemetry parsing and the log follower.
mod telemetry;

/// Closed loop wheel control.
mod wheel_ctrl;

/// Thread owning the wheel controller.
mod wheel_worker;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use comms_if::net::{zmq, Backoff, NetParams};
use log::{info, trace, warn};
use std::{path::PathBuf, thread, time::Duration};
use structopt::StructOpt;

// Internal
use host_state::HostState;
use params::WheelExecParams;
use sync_server::{Incoming, SyncServer};
use telemetry::TelemetryCell;
use util::{
    host,
    logger::{logger_init, parse_level_filter, LevelFilter, LoggerConfig},
    session::Session,
};
use wheel_ctrl::sim::SimWheel;
use wheel_worker::WheelWorker;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "wheel_exec", about = "Autosteer wheel host")]
struct Opts {
    /// Use a simulated wheel instead of the hardware
    #[structopt(long)]
    sim: bool,

    /// Minimum level to log at (info, debug, trace)
    #[structopt(long, default_value = "debug", parse(try_from_str = parse_level_filter))]
    log_level: LevelFilter,

    /// Path to the parameter file, defaults to params/wheel_exec.toml under the software root
    #[structopt(long, parse(from_os_str))]
    params: Option<PathBuf>,

    /// Override the telemetry log path from the parameters
    #[structopt(long, parse(from_os_str))]
    telemetry_log: Option<PathBuf>,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {

    color_eyre::install()?;

    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new(
        "wheel_exec",
        "sessions"
    ).wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LoggerConfig::new(opts.log_level), &session)
        .wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Wheel Control Executable\n");
    info!("Running on: {}", host::get_hostname().unwrap_or_else(|| "unknown".into()));
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let mut params: WheelExecParams = match opts.params {
        Some(ref p) => util::params::load_from_path(p),
        None => util::params::load("wheel_exec.toml"),
    }.wrap_err("Could not load wheel_exec params")?;

    if let Some(p) = opts.telemetry_log {
        params.telemetry.log_path = Some(p);
    }
    params.telemetry.log_path = params.telemetry.log_path.as_ref().map(host::resolve_path);

    let net_params: NetParams = util::params::load("net.toml")
        .wrap_err("Could not load net params")?;

    info!("Parameters loaded");

    // ---- TELEMETRY ----

    let telem_cell = TelemetryCell::new();

    let _telem_handle = match params.telemetry.log_path {
        Some(_) => Some(
            telemetry::log_tail::spawn(&params.telemetry, telem_cell.clone())
                .wrap_err("Failed to start the telemetry log follower")?
        ),
        None => {
            warn!("No telemetry log configured, replies will carry default telemetry");
            None
        }
    };

    // ---- WHEEL INITIALISATION ----

    let worker = if opts.sim {
        info!("Using simulated wheel");
        WheelWorker::spawn(
            SimWheel::new(params.sim.initial_position, params.sim.gain),
            params.wheel_ctrl.clone(),
            params.engage_button
        )
    }
    else {
        spawn_hw_wheel(&params)?
    };

    info!("Wheel initialised");

    // ---- SERVER INITIALISATION ----

    let zmq_ctx = zmq::Context::new();

    let mut server = SyncServer::new(&zmq_ctx, &net_params)
        .wrap_err("Failed to initialise server")?;

    let mut backoff = Backoff::new(
        Duration::from_millis(net_params.reconnect_backoff_ms),
        Duration::from_millis(net_params.reconnect_backoff_max_ms)
    );

    info!("Server initialised");

    // ---- MAIN LOOP ----

    info!("Initialisation complete, waiting for the guidance peer");

    let mut state = HostState::new(params.drive_speed);
    let mut peer_active = false;

    loop {
        let incoming = match server.get_request() {
            Ok(i) => {
                backoff.reset();
                i
            },
            Err(e) => {
                let delay = backoff.next_delay();
                warn!("{}, retrying in {} ms", e, delay.as_millis());
                peer_active = false;
                state.handle_silence(&worker);
                thread::sleep(delay);
                continue
            }
        };

        let request = match incoming {
            Incoming::Request(r) => Some(r),
            Incoming::Malformed => None,
            Incoming::Refused => {
                state.handle_silence(&worker);
                continue
            },
            Incoming::Silence => {
                if peer_active {
                    warn!("Guidance peer has gone quiet, waiting for requests");
                    peer_active = false;
                }
                state.handle_silence(&worker);
                continue
            }
        };

        if !peer_active {
            info!("Receiving requests from the guidance peer");
            peer_active = true;
        }

        trace!("Request: {:?}", request);

        let telem = telem_cell.get();
        let reply = state.handle_request(request.as_ref(), &worker, telem.as_ref());

        if let Err(e) = server.send_reply(&reply) {
            warn!("{}", e);
            peer_active = false;
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

#[cfg(feature = "g29")]
fn spawn_hw_wheel(params: &WheelExecParams) -> Result<WheelWorker> {
    let wheel = wheel_ctrl::g29::G29Wheel::open(&params.g29)
        .wrap_err("Failed to open the wheel")?;

    Ok(WheelWorker::spawn(wheel, params.wheel_ctrl.clone(), params.engage_button))
}

#[cfg(not(feature = "g29"))]
fn spawn_hw_wheel(_params: &WheelExecParams) -> Result<WheelWorker> {
    Err(color_eyre::eyre::eyre!(
        "wheel_exec was built without wheel hardware support, rebuild with `--features g29` or \
        run with `--sim`"
    ))
}
