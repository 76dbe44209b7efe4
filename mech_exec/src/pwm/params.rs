//! # PWM chip parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::NUM_CHIP_CHANNELS;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Params {

    /// Linux I2C bus number the chip is attached to
    pub i2c_bus: u8,

    /// I2C address of the chip
    pub address: u8,

    /// Refresh frequency applied when the chip is bound.
    ///
    /// Units: Hz
    pub freq_hz: u16,

    /// Pulse width at 0 degrees.
    ///
    /// Units: microseconds
    pub servo_min_pulse_us: u16,

    /// Pulse width at 180 degrees.
    ///
    /// Units: microseconds
    pub servo_max_pulse_us: u16,

    /// If no chip can be reached bind a simulated output instead of failing motion commands.
    pub bench_mode: bool,

    /// Minimum time between two attempts at acquiring the chip after a failure.
    ///
    /// Units: seconds
    pub rebind_interval_s: f64,

    /// Channels which must never be written (e.g. the one driving the LED).
    pub reserved_channels: Vec<u8>,

    /// Channel pulsed to mid position and released once after the chip is bound.
    pub health_check_channel: Option<u8>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            i2c_bus: 1,
            address: 0x5F,
            freq_hz: 50,
            servo_min_pulse_us: 500,
            servo_max_pulse_us: 2400,
            bench_mode: false,
            rebind_interval_s: 5.0,
            reserved_channels: vec![5],
            health_check_channel: Some(0),
        }
    }
}

impl Params {
    pub fn are_valid(&self) -> bool {
        let channels_valid = self.reserved_channels
            .iter()
            .chain(self.health_check_channel.iter())
            .all(|&ch| ch < NUM_CHIP_CHANNELS);

        super::prescale_for(self.freq_hz).is_ok()
            && self.servo_min_pulse_us < self.servo_max_pulse_us
            && self.rebind_interval_s.is_finite()
            && self.rebind_interval_s >= 0.0
            && channels_valid
    }
}
