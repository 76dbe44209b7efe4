//! # Servo controller parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::Deg;
use crate::pwm::{codec::ANGLE_RANGE_DEG, NUM_CHIP_CHANNELS};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Params {

    /// Number of channels owned by each controller instance
    pub num_channels: usize,

    /// Lower end of the control range written to the codec.
    ///
    /// Units: degrees
    pub ctrl_range_min: Deg,

    /// Upper end of the control range written to the codec.
    ///
    /// Units: degrees
    pub ctrl_range_max: Deg,

    /// Logical angle range the control range maps onto.
    ///
    /// Units: degrees
    pub angle_range: Deg,

    /// Interval between two ticks of the speed and oscillate regimes.
    ///
    /// Units: seconds
    pub speed_tick_s: f64,

    /// Default duration of a timed interpolation.
    ///
    /// Units: seconds
    pub timed_duration_s: f64,

    /// Default number of steps in a timed interpolation
    pub timed_steps: u32,

    /// Release the hold of relaxable channels when a controller stops.
    pub relax_on_stop: bool,

    /// Per-channel defaults, channels beyond the end of this list use
    /// [`ChannelDefaults::default`].
    pub channels: Vec<ChannelDefaults>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct ChannelDefaults {
    /// Home position.
    ///
    /// Units: degrees
    pub init: Deg,

    /// Units: degrees
    pub min: Deg,

    /// Units: degrees
    pub max: Deg,

    /// Sign applied to offsets and oscillation, either 1 or -1
    pub direction: i8,

    /// Whether this channel's hold is released on stop
    pub relax: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            num_channels: 8,
            ctrl_range_min: 0,
            ctrl_range_max: 180,
            angle_range: 180,
            speed_tick_s: 0.09,
            timed_duration_s: 2.0,
            timed_steps: 30,
            relax_on_stop: true,
            channels: Vec::new(),
        }
    }
}

impl Params {
    /// Defaults for the given channel index.
    pub fn channel_defaults(&self, channel: usize) -> ChannelDefaults {
        self.channels.get(channel).copied().unwrap_or_default()
    }

    pub fn are_valid(&self) -> bool {
        let timing_valid = self.speed_tick_s.is_finite()
            && self.speed_tick_s > 0.0
            && self.timed_duration_s.is_finite()
            && self.timed_duration_s >= 0.0
            && self.timed_steps > 0;

        self.num_channels > 0
            && self.num_channels <= NUM_CHIP_CHANNELS as usize
            && self.ctrl_range_max > self.ctrl_range_min
            && self.angle_range > 0
            && timing_valid
            && self.channels.len() <= self.num_channels
            && self.channels.iter().all(ChannelDefaults::is_valid)
    }
}

impl Default for ChannelDefaults {
    fn default() -> Self {
        Self {
            init: 90,
            min: 0,
            max: 180,
            direction: 1,
            relax: true,
        }
    }
}

impl ChannelDefaults {
    pub fn is_valid(&self) -> bool {
        (self.direction == 1 || self.direction == -1)
            && calib_in_range(self.init, self.min, self.max)
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// True if `min <= init <= max` and all three lie within the logical angle range.
pub fn calib_in_range(init: Deg, min: Deg, max: Deg) -> bool {
    min as f64 >= ANGLE_RANGE_DEG.0
        && max as f64 <= ANGLE_RANGE_DEG.1
        && min <= init
        && init <= max
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let params = Params::default();
        assert!(params.are_valid());
        assert_eq!(params.channel_defaults(7), ChannelDefaults::default());
    }

    #[test]
    fn test_invalid() {
        let mut params = Params::default();
        params.channels = vec![ChannelDefaults { direction: 0, ..Default::default() }];
        assert!(!params.are_valid());

        let mut params = Params::default();
        params.channels = vec![ChannelDefaults { init: 10, min: 20, ..Default::default() }];
        assert!(!params.are_valid());

        let mut params = Params::default();
        params.timed_steps = 0;
        assert!(!params.are_valid());

        let mut params = Params::default();
        params.num_channels = 17;
        assert!(!params.are_valid());
    }

    #[test]
    fn test_from_toml() {
        let params: Params = util::params::from_str(r#"
            num_channels = 2
            speed_tick_s = 0.05

            [[channels]]
            init = 60
            direction = -1
        "#).unwrap();

        assert_eq!(params.num_channels, 2);
        assert_eq!(params.timed_steps, 30);
        assert_eq!(params.channel_defaults(0).init, 60);
        assert_eq!(params.channel_defaults(0).direction, -1);
        assert_eq!(params.channel_defaults(0).max, 180);
        assert_eq!(params.channel_defaults(1), ChannelDefaults::default());
    }
}
