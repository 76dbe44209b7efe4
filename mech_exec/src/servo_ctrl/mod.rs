//! # Servo Controller Module
//!
//! A servo controller owns a set of channels and moves them with one of four motion regimes:
//!
//! - Snapping to the calibrated home position (`Init`)
//! - Linear interpolation to absolute goals over a fixed duration (`TimedInterpolate`)
//! - Approaching goals at a set speed (`SpeedInterpolate`)
//! - Moving continuously until a limit or a stop (`Oscillate`)
//!
//! Each controller runs its own background thread which sleeps until a motion is requested. The
//! motion logic itself lives in [`MotionState`], which does no I/O, so that it can be driven tick
//! by tick in tests.
//!
//! Several controllers may be created over the same [`PwmHub`](crate::pwm::PwmHub). They must not
//! command the same channel concurrently, nothing prevents it.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Channel calibration and working state
mod channel;

/// Pure motion state machine
mod motion;

/// Servo controller parameters
mod params;

/// The threaded controller
mod state;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use channel::*;
pub use motion::{MotionState, Next, Tick};
pub use params::*;
pub use state::*;

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Servo angle in degrees.
pub type Deg = i32;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum ServoCtrlError {
    #[error("No PWM driver is available: {0}")]
    DriverUnavailable(String),

    #[error(
        "Calibration of channel {channel} is out of range (init = {init}, min = {min}, max = {max})"
    )]
    CalibrationOutOfRange {
        channel: u8,
        init: Deg,
        min: Deg,
        max: Deg,
    },

    #[error("Channel {0} is not managed by this controller")]
    ChannelIndexOutOfRange(u8),

    #[error("Channel, goal and speed lists must have the same length")]
    MismatchedArgs,

    #[error("Direction must be 1 or -1, got {0}")]
    InvalidDirection(i8),

    #[error("Cannot change a channel's direction while a motion is in progress")]
    MotionInProgress,

    #[error("Invalid servo controller parameters")]
    InvalidParams,

    #[error("Could not start the controller thread: {0}")]
    ThreadSpawn(std::io::Error),
}
