//! # Drive controller parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::NUM_MOTORS;
use crate::pwm::NUM_CHIP_CHANNELS;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Params {

    /// If false targets are written to the motors immediately and no ramp thread is started.
    pub ramp_enabled: bool,

    /// Maximum rate of change of a motor's speed. Zero or less disables the limit.
    ///
    /// Units: speed units per second
    pub accel_limit: f64,

    /// Rate of the ramp loop.
    ///
    /// Units: Hz
    pub ramp_hz: f64,

    /// PWM channels of the H-bridge inputs of each motor, as `[IN1, IN2]`
    pub motor_channels: [[u8; 2]; NUM_MOTORS],

    /// Motors on the left side of the vehicle
    pub left_motors: Vec<usize>,

    /// Motors on the right side of the vehicle
    pub right_motors: Vec<usize>,

    /// Sign of a forward command for the left motors, either 1 or -1
    pub left_direction: i8,

    /// Sign of a forward command for the right motors, either 1 or -1
    pub right_direction: i8,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            ramp_enabled: true,
            accel_limit: 200.0,
            ramp_hz: 50.0,
            motor_channels: [[15, 14], [12, 13], [11, 10], [8, 9]],
            left_motors: vec![0],
            right_motors: vec![1],
            left_direction: 1,
            right_direction: 1,
        }
    }
}

impl Params {
    pub fn are_valid(&self) -> bool {
        let motors_valid = self.left_motors
            .iter()
            .chain(self.right_motors.iter())
            .all(|&m| m < NUM_MOTORS);

        let channels_valid = self.motor_channels
            .iter()
            .flat_map(|pair| pair.iter())
            .all(|&ch| ch < NUM_CHIP_CHANNELS);

        self.accel_limit.is_finite()
            && self.ramp_hz.is_finite()
            && self.ramp_hz > 0.0
            && motors_valid
            && channels_valid
            && (self.left_direction == 1 || self.left_direction == -1)
            && (self.right_direction == 1 || self.right_direction == -1)
    }

    /// Period of the ramp loop in seconds.
    pub fn ramp_period_s(&self) -> f64 {
        1.0 / self.ramp_hz
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_params() {
        assert!(Params::default().are_valid());

        let params: Params = util::params::from_str(r#"
            accel_limit = 100.0
            motor_channels = [[0, 1], [2, 3], [4, 5], [6, 7]]
        "#).unwrap();
        assert!(params.are_valid());
        assert_eq!(params.motor_channels[3], [6, 7]);
        assert_eq!(params.ramp_hz, 50.0);

        let params = Params { left_motors: vec![4], ..Default::default() };
        assert!(!params.are_valid());

        let params = Params { ramp_hz: 0.0, ..Default::default() };
        assert!(!params.are_valid());
    }
}
