//! # Mechanisms Library
//!
//! Servo and motor control for the rover's mechanisms. The library is split into:
//!
//! - `pwm`: the PWM chip drivers, the pulse codec and the process-wide hub which hands out the
//!   bound driver
//! - `servo_ctrl`: threaded servo controllers with their motion regimes
//! - `drive_ctrl`: the drivetrain ramp controller
//! - `calib`: the calibration store servo controllers observe
//! - `steps`: the per-group speed step multipliers
//! - `tm`: telemetry sinks events are published to
//! - `actuators`: the named set of controllers demands are dispatched to

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod actuators;
pub mod calib;
pub mod drive_ctrl;
pub mod params;
pub mod pwm;
pub mod servo_ctrl;
pub mod steps;
pub mod tm;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Mutex, MutexGuard, PoisonError};

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Lock a mutex, recovering the guard if another thread panicked while holding it.
///
/// Everything guarded in this crate is plain numeric state which stays valid after a panic.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
