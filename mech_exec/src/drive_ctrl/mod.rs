//! # Drive Controller Module
//!
//! The drive controller owns the target and current speed of the four drive motors. A background
//! thread moves each current speed towards its target no faster than the acceleration limit, and
//! writes the result to the motor H-bridges through the shared PWM hub.
//!
//! Whenever the drivetrain goes from stationary to moving, or back, a `drive_motion` event is
//! published.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Drive controller parameters
mod params;

/// The ramp controller
mod state;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use params::*;
pub use state::*;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

pub const NUM_MOTORS: usize = 4;

/// Largest speed magnitude.
pub const MAX_SPEED: f64 = 100.0;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum DriveCtrlError {
    #[error("Motor {0} does not exist")]
    MotorIndexOutOfRange(usize),

    #[error("Invalid drive controller parameters")]
    InvalidParams,

    #[error("Could not start the ramp thread: {0}")]
    ThreadSpawn(std::io::Error),
}
