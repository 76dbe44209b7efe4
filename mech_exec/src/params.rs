//! # Mechanisms Executable Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
    calib::ShoulderCalibration,
    drive_ctrl,
    pwm,
    servo_ctrl,
    steps,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MechExecParams {

    /// PWM chip parameters
    pub pwm: pwm::Params,

    /// Parameters shared by every servo controller
    pub servo: servo_ctrl::Params,

    /// Servo controller instances, one controller per group
    pub servo_groups: Vec<ServoGroupParams>,

    /// Drivetrain parameters
    pub drive: drive_ctrl::Params,

    /// Initial shoulder calibration, if any
    pub shoulder: Option<ShoulderParams>,
}

/// A named servo controller and the channels it drives.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServoGroupParams {
    pub name: String,

    pub channels: Vec<u8>,

    /// Per-channel changes to the shared servo defaults
    #[serde(default)]
    pub overrides: Vec<ChannelOverride>,

    /// Initial multiplier of speed and oscillation speeds, clamped to the allowed step range
    #[serde(default = "default_speed_step")]
    pub speed_step: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ChannelOverride {
    pub channel: u8,

    #[serde(default)]
    pub direction: Option<i8>,

    #[serde(default)]
    pub relax: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ShoulderParams {
    pub channel: u8,

    #[serde(flatten)]
    pub calib: ShoulderCalibration,
}

/// A PWM channel claimed by more than one owner.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelOverlap {
    pub channel: u8,
    pub first: String,
    pub second: String,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ParamsError {
    #[error("Invalid PWM parameters")]
    InvalidPwm,

    #[error("Invalid servo parameters")]
    InvalidServo,

    #[error("Invalid drive parameters")]
    InvalidDrive,

    #[error("Servo group \"{0}\" is defined more than once")]
    DuplicateGroup(String),

    #[error("Servo group \"{group}\" uses channel {channel} which is out of range")]
    InvalidGroupChannel {
        group: String,
        channel: u8,
    },

    #[error("Servo group \"{group}\" overrides channel {channel} which it does not own, or with an invalid direction")]
    InvalidOverride {
        group: String,
        channel: u8,
    },

    #[error("Shoulder calibration is out of range")]
    InvalidShoulder,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for MechExecParams {
    fn default() -> Self {
        Self {
            pwm: pwm::Params::default(),
            servo: servo_ctrl::Params::default(),
            servo_groups: vec![
                ServoGroupParams::new("shoulder", 0, Some(-1), Some(false)),
                ServoGroupParams::new("hand", 1, None, None),
                ServoGroupParams::new("pan", 2, Some(-1), None),
                ServoGroupParams::new("grab", 3, Some(-1), None),
                ServoGroupParams::new("tilt", 4, None, None),
            ],
            drive: drive_ctrl::Params::default(),
            shoulder: None,
        }
    }
}

impl MechExecParams {
    /// Check the parameters are consistent.
    ///
    /// Channels claimed by more than one group, or by a group and the drivetrain, are allowed but
    /// logged as warnings.
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        if !self.pwm.are_valid() {
            return Err(ParamsError::InvalidPwm)
        }
        if !self.servo.are_valid() {
            return Err(ParamsError::InvalidServo)
        }
        if !self.drive.are_valid() {
            return Err(ParamsError::InvalidDrive)
        }

        for (i, group) in self.servo_groups.iter().enumerate() {
            if self.servo_groups[..i].iter().any(|g| g.name == group.name) {
                return Err(ParamsError::DuplicateGroup(group.name.clone()))
            }

            for &ch in &group.channels {
                if ch as usize >= self.servo.num_channels {
                    return Err(ParamsError::InvalidGroupChannel {
                        group: group.name.clone(),
                        channel: ch,
                    })
                }
            }

            for o in &group.overrides {
                let direction_valid = o.direction.map_or(true, |d| d == 1 || d == -1);
                if !group.channels.contains(&o.channel) || !direction_valid {
                    return Err(ParamsError::InvalidOverride {
                        group: group.name.clone(),
                        channel: o.channel,
                    })
                }
            }
        }

        if let Some(shoulder) = self.shoulder {
            if !shoulder.calib.is_valid() || shoulder.channel as usize >= self.servo.num_channels {
                return Err(ParamsError::InvalidShoulder)
            }
        }

        for overlap in self.overlapping_channels() {
            warn!(
                "Channel {} is used by both {} and {}",
                overlap.channel, overlap.first, overlap.second
            );
        }

        Ok(())
    }

    /// Every channel claimed by more than one servo group or by a group and a drive motor.
    pub fn overlapping_channels(&self) -> Vec<ChannelOverlap> {
        let mut owners: HashMap<u8, String> = HashMap::new();
        let mut overlaps = Vec::new();

        let drive_owners = self.drive.motor_channels
            .iter()
            .enumerate()
            .flat_map(|(m, pair)| pair.iter().map(move |&ch| (ch, format!("drive motor {}", m))));

        let group_owners = self.servo_groups
            .iter()
            .flat_map(|g| g.channels.iter().map(move |&ch| (ch, format!("servo group {}", g.name))));

        for (ch, owner) in drive_owners.chain(group_owners) {
            match owners.get(&ch) {
                Some(first) => overlaps.push(ChannelOverlap {
                    channel: ch,
                    first: first.clone(),
                    second: owner,
                }),
                None => {
                    owners.insert(ch, owner);
                }
            }
        }

        overlaps
    }

    /// Servo controller parameters for one group, with its overrides applied.
    pub fn servo_params_for(&self, group: &ServoGroupParams) -> servo_ctrl::Params {
        let mut params = self.servo.clone();

        let channels: Vec<_> = (0..params.num_channels)
            .map(|ch| params.channel_defaults(ch))
            .collect();
        params.channels = channels;

        for o in &group.overrides {
            if let Some(defaults) = params.channels.get_mut(o.channel as usize) {
                if let Some(direction) = o.direction {
                    defaults.direction = direction;
                }
                if let Some(relax) = o.relax {
                    defaults.relax = relax;
                }
            }
        }

        params
    }
}

impl ServoGroupParams {
    fn new(name: &str, channel: u8, direction: Option<i8>, relax: Option<bool>) -> Self {
        let overrides = if direction.is_some() || relax.is_some() {
            vec![ChannelOverride { channel, direction, relax }]
        }
        else {
            Vec::new()
        };

        Self {
            name: name.to_owned(),
            channels: vec![channel],
            overrides,
            speed_step: default_speed_step(),
        }
    }
}

fn default_speed_step() -> i32 {
    steps::SPEED_STEP_MIN as i32
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = MechExecParams::default();
        assert_eq!(params.are_valid(), Ok(()));
        assert!(params.overlapping_channels().is_empty());

        let names: Vec<&str> = params.servo_groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["shoulder", "hand", "pan", "grab", "tilt"]);

        let shoulder = params.servo_params_for(&params.servo_groups[0]);
        assert_eq!(shoulder.channels.len(), 8);
        assert_eq!(shoulder.channels[0].direction, -1);
        assert!(!shoulder.channels[0].relax);
        assert_eq!(shoulder.channels[1].direction, 1);

        let tilt = params.servo_params_for(&params.servo_groups[4]);
        assert!(tilt.channels.iter().all(|c| c.direction == 1 && c.relax));
    }

    #[test]
    fn test_load() {
        let params: MechExecParams = util::params::from_str(r#"
            [pwm]
            bench_mode = true

            [servo]
            timed_steps = 10

            [[servo_groups]]
            name = "arm"
            channels = [0, 1]
            overrides = [{ channel = 1, direction = -1 }]

            [[servo_groups]]
            name = "head"
            channels = [1, 2]
            speed_step = 3

            [drive]
            accel_limit = 100.0

            [shoulder]
            channel = 0
            base_angle = 30
            raise_angle = 90
        "#).unwrap();

        assert_eq!(params.are_valid(), Ok(()));
        assert!(params.pwm.bench_mode);
        assert_eq!(params.servo.timed_steps, 10);
        assert_eq!(params.servo_groups.len(), 2);
        assert_eq!(
            params.shoulder,
            Some(ShoulderParams {
                channel: 0,
                calib: ShoulderCalibration { base_angle: 30, raise_angle: 90 }
            })
        );

        let arm = params.servo_params_for(&params.servo_groups[0]);
        assert_eq!(arm.channels[1].direction, -1);
        assert_eq!(params.servo_groups[0].speed_step, 1);
        assert_eq!(params.servo_groups[1].speed_step, 3);

        assert_eq!(
            params.overlapping_channels(),
            vec![ChannelOverlap {
                channel: 1,
                first: String::from("servo group arm"),
                second: String::from("servo group head"),
            }]
        );
    }

    #[test]
    fn test_invalid() {
        let mut params = MechExecParams::default();
        params.servo_groups.push(ServoGroupParams::new("hand", 6, None, None));
        assert_eq!(params.are_valid(), Err(ParamsError::DuplicateGroup(String::from("hand"))));

        let mut params = MechExecParams::default();
        params.servo_groups.push(ServoGroupParams::new("wrist", 9, None, None));
        assert_eq!(
            params.are_valid(),
            Err(ParamsError::InvalidGroupChannel { group: String::from("wrist"), channel: 9 })
        );

        let mut params = MechExecParams::default();
        params.servo_groups[1].overrides.push(ChannelOverride {
            channel: 2,
            direction: Some(-1),
            relax: None,
        });
        assert_eq!(
            params.are_valid(),
            Err(ParamsError::InvalidOverride { group: String::from("hand"), channel: 2 })
        );

        let params = MechExecParams {
            shoulder: Some(ShoulderParams {
                channel: 0,
                calib: ShoulderCalibration { base_angle: 150, raise_angle: 90 },
            }),
            ..Default::default()
        };
        assert_eq!(params.are_valid(), Err(ParamsError::InvalidShoulder));
    }

    #[test]
    fn test_drive_overlap() {
        let mut params = MechExecParams::default();
        params.servo.num_channels = 16;
        params.servo_groups.push(ServoGroupParams::new("spare", 15, None, None));

        assert_eq!(params.are_valid(), Ok(()));
        assert_eq!(
            params.overlapping_channels(),
            vec![ChannelOverlap {
                channel: 15,
                first: String::from("drive motor 0"),
                second: String::from("servo group spare"),
            }]
        );
    }
}
