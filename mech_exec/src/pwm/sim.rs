//! Simulated [`PwmDriver`] used in bench mode.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::trace;

use super::{check_channel, prescale_for, DriverError, DriverKind, PwmDriver, NUM_CHIP_CHANNELS};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Driver with no hardware behind it, keeping the last value written to each channel.
#[derive(Debug, Default)]
pub struct SimulatedPwm {
    channels: [(u16, u16); NUM_CHIP_CHANNELS as usize],
    freq_hz: Option<u16>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimulatedPwm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last `(on, off)` ticks written to the channel.
    pub fn channel(&self, channel: u8) -> Option<(u16, u16)> {
        self.channels.get(channel as usize).copied()
    }

    pub fn frequency(&self) -> Option<u16> {
        self.freq_hz
    }
}

impl PwmDriver for SimulatedPwm {
    fn kind(&self) -> DriverKind {
        DriverKind::Simulated
    }

    fn set_channel(&mut self, channel: u8, on_tick: u16, off_tick: u16) -> Result<(), DriverError> {
        check_channel(channel, on_tick, off_tick)?;

        trace!("[sim] channel {} <- ({}, {})", channel, on_tick, off_tick);
        self.channels[channel as usize] = (on_tick, off_tick);

        Ok(())
    }

    fn set_frequency(&mut self, hz: u16) -> Result<(), DriverError> {
        prescale_for(hz)?;

        trace!("[sim] frequency <- {} Hz", hz);
        self.freq_hz = Some(hz);

        Ok(())
    }
}
