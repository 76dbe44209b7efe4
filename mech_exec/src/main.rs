//! # Mechanisms Control Executable
//!
//! Bench executable for the rover's mechanisms:
//! - Servo groups (shoulder, hand, pan, grab, tilt)
//! - The four drive motors
//!
//! All actuators are homed on startup. If a demand script is given as the first argument its
//! demands are then replayed at their scripted times, after which every actuator is stopped.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use std::{env, sync::Arc, thread, time::Duration};
use color_eyre::{Result, eyre::WrapErr};
use log::{info, warn};

// Internal
use comms_if::eqpt::mech::MechDem;
use mech_lib::{
    actuators::Actuators,
    calib::CalibrationStore,
    params::MechExecParams,
    pwm::PwmHub,
    steps::SpeedStepStore,
    tm::LogSink,
};
use util::{
    logger::{logger_init, LevelFilter},
    script_interpreter::{Pending, ScriptInterpreter},
    session::{self, Session},
    time::SystemClock,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Period at which the demand script is polled.
const SCRIPT_POLL_PERIOD: Duration = Duration::from_millis(10);

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {

    // ---- EARLY INITIALISATION ----

    color_eyre::install()?;

    // Initialise session
    let session = Session::new(
        "mech_exec",
        "sessions"
    ).wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session)
        .wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Mechanisms Control Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let params: MechExecParams = util::params::load("mech_exec.toml")
        .wrap_err("Failed to load the mechanisms parameters")?;
    params.are_valid()
        .wrap_err("Invalid mechanisms parameters")?;

    info!("Parameters loaded");

    // ---- LOAD SCRIPT ----

    let args: Vec<String> = env::args().collect();
    let mut script = match args.get(1) {
        Some(path) => {
            let si = ScriptInterpreter::<MechDem>::new(path)
                .wrap_err("Failed to load the demand script")?;
            info!(
                "Loaded script {:?} with {} demands over {:.2} s",
                si.script_path(),
                si.get_num_dems(),
                si.get_duration()
            );
            Some(si)
        },
        None => {
            info!("No demand script given, actuators will be homed and stopped");
            None
        }
    };

    // ---- ACTUATOR INITIALISATION ----

    let clock = Arc::new(SystemClock::new());
    let tm = Arc::new(LogSink);
    let calib = CalibrationStore::new();
    let steps = Arc::new(SpeedStepStore::new());

    let hub = Arc::new(PwmHub::with_hardware(params.pwm.clone(), clock.clone()));

    let mut actuators = Actuators::new(&params, hub, clock, tm, &calib, steps)
        .wrap_err("Failed to initialise the actuators")?;
    actuators.start()
        .wrap_err("Failed to start the drive ramp")?;

    if let Err(e) = actuators.home_all() {
        warn!("Could not home the servos: {}", e);
    }

    info!("Initialisation complete");

    // ---- SCRIPT REPLAY ----

    if let Some(si) = script.as_mut() {
        loop {
            match si.get_pending(session::get_elapsed_seconds()) {
                Pending::None => (),
                Pending::Some(dems) => {
                    for dem in dems.iter() {
                        if let Err(e) = actuators.execute(dem) {
                            warn!("Demand {:?} failed: {}", dem, e);
                        }
                    }
                },
                Pending::EndOfScript => {
                    info!("End of script reached");
                    break
                }
            }

            thread::sleep(SCRIPT_POLL_PERIOD);
        }
    }

    // ---- SHUTDOWN ----

    actuators.stop_all();
    actuators.shutdown();

    info!("End of execution");

    Ok(())
}
