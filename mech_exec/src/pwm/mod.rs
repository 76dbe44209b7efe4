//! # PWM Output Module
//!
//! This module provides a unified interface to the PWM chip which drives both the servos and the
//! motor H-bridges. Two interchangeable drivers exist for the chip: a feature-rich one built on the
//! `pwm-pca9685` crate and a minimal one which writes the four registers it needs directly. All
//! controllers share a single [`PwmHub`] which owns the chip and serialises access to it.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Angle, pulse width and tick conversions
pub mod codec;

/// Process-wide owner of the PWM driver
mod hub;

/// Parameters for the PWM chip
mod params;

/// [`PwmDriver`] implementation on top of the `pwm-pca9685` crate.
pub mod pca9685;

/// Minimal register-level [`PwmDriver`] implementation.
pub mod register;

/// Simulated [`PwmDriver`] used in bench mode.
pub mod sim;

#[cfg(test)]
pub(crate) mod mock;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use hub::*;
pub use params::*;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fmt;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of output channels on the chip.
pub const NUM_CHIP_CHANNELS: u8 = 16;

/// Internal oscillator frequency of the chip.
pub const OSC_FREQ_HZ: f64 = 25_000_000.0;

/// Lowest prescale value accepted by the chip.
const MIN_PRESCALE: f64 = 3.0;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Trait to provide a unified API for accessing the PWM chip.
pub trait PwmDriver: Send {

    /// Which implementation this is.
    fn kind(&self) -> DriverKind;

    /// Set the on and off tick of a channel within the PWM period.
    ///
    /// ## Arguments
    /// - `channel` - The channel to set, `0..16`
    /// - `on_tick` - Tick at which the output goes high, `0..=4095`
    /// - `off_tick` - Tick at which the output goes low, `0..=4095`
    fn set_channel(&mut self, channel: u8, on_tick: u16, off_tick: u16) -> Result<(), DriverError>;

    /// Set the refresh frequency of every channel.
    fn set_frequency(&mut self, hz: u16) -> Result<(), DriverError>;
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The available driver implementations, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Pca9685,
    Register,
    Simulated,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("An I2C error occured: {0}")]
    I2c(String),

    #[error("Channel {0} does not exist on the chip")]
    InvalidChannel(u8),

    #[error("Tick values out of range (on = {0}, off = {1})")]
    InvalidTicks(u16, u16),

    #[error("The chip cannot generate a frequency of {0} Hz")]
    InvalidFrequency(u16),

    #[error("No PWM driver is available: {0}")]
    Unavailable(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::Pca9685 => write!(f, "pwm-pca9685"),
            DriverKind::Register => write!(f, "register-level"),
            DriverKind::Simulated => write!(f, "simulated"),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Calculate the prescale register value for the given refresh frequency.
pub fn prescale_for(freq_hz: u16) -> Result<u8, DriverError> {
    if freq_hz == 0 {
        return Err(DriverError::InvalidFrequency(freq_hz))
    }

    let prescale = (OSC_FREQ_HZ / codec::CHIP_TICKS / freq_hz as f64 - 1.0).round();

    if prescale < MIN_PRESCALE || prescale > u8::MAX as f64 {
        return Err(DriverError::InvalidFrequency(freq_hz))
    }

    Ok(prescale as u8)
}

/// Check a channel and its tick values are addressable on the chip.
pub fn check_channel(channel: u8, on_tick: u16, off_tick: u16) -> Result<(), DriverError> {
    if channel >= NUM_CHIP_CHANNELS {
        return Err(DriverError::InvalidChannel(channel))
    }
    if on_tick > codec::MAX_TICK || off_tick > codec::MAX_TICK {
        return Err(DriverError::InvalidTicks(on_tick, off_tick))
    }
    Ok(())
}
