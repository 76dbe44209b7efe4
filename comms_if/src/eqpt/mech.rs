//! # Mechanisms Equipment Demands and Telemetry

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Telemetry event name for servo regime transitions.
pub const EVT_SERVO_REGIME: &str = "servo_regime";

/// Telemetry event name for a servo stopping automatically at a limit.
pub const EVT_SERVO_LIMIT: &str = "servo_limit";

/// Telemetry event name for a servo motion being pre-empted by a new goal.
pub const EVT_SERVO_PREEMPTED: &str = "servo_preempted";

/// Telemetry event name for drive activity edges.
pub const EVT_DRIVE_MOTION: &str = "drive_motion";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An absolute goal angle for one servo channel.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelGoal {
    pub channel: u8,

    /// Goal angle in degrees
    pub angle: i32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Demands which can be issued to the mechanisms.
///
/// Servo demands address a named servo group, i.e. one servo controller instance.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum MechDem {
    /// Snap the listed channels (or every channel of the group if empty) to their init position.
    ServoHome {
        group: String,
        #[serde(default)]
        channels: Vec<u8>,
    },

    /// Interpolate to absolute goals over a fixed duration.
    ServoTimed {
        group: String,
        goals: Vec<ChannelGoal>,
        #[serde(default)]
        duration_s: Option<f64>,
        #[serde(default)]
        steps: Option<u32>,
    },

    /// Move by offsets from the init position at the given speeds.
    ServoSpeed {
        group: String,
        channels: Vec<u8>,
        deltas: Vec<i32>,
        speeds: Vec<i32>,
    },

    /// Continuous press-and-hold motion of one channel.
    ServoOscillate {
        group: String,
        channel: u8,
        direction: i8,
        speed: i32,
    },

    /// Set an absolute angle immediately.
    ServoSnap {
        group: String,
        channel: u8,
        angle: i32,
    },

    ServoStop {
        group: String,
    },

    /// Set the multiplier applied to a group's speed and oscillation speeds.
    ServoSpeedStep {
        group: String,
        step: i32,
    },

    /// Set the target speed of a single motor, in `[-100, 100]`.
    DriveTarget {
        motor: usize,
        speed: f64,
    },

    /// Differential drive command.
    DriveMove {
        speed: f64,
        direction: i8,
        #[serde(default)]
        turn: Turn,
    },

    DriveStop {
        #[serde(default)]
        immediate: bool,
    },

    /// Stop every servo group and the drivetrain.
    StopAll,
}

/// Turn demand for a differential drive command.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Turn {
    Left,
    Right,
    Straight,
}

/// The motion regime a servo controller is executing.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RegimeKind {
    Init,
    TimedInterpolate,
    SpeedInterpolate,
    Oscillate,
    Idle,
}

/// Telemetry events published by the mechanisms.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MechEvent {
    /// A servo controller changed regime.
    ServoRegime {
        controller: String,
        from: RegimeKind,
        to: RegimeKind,
    },

    /// An oscillating channel arrived at one of its limits and stopped.
    ServoLimit {
        controller: String,
        channel: u8,
        position: i32,
    },

    /// A running interpolation was aborted because the goal changed.
    ServoPreempted {
        controller: String,
        regime: RegimeKind,
    },

    /// The drivetrain started (`active = true`) or finished (`active = false`) moving.
    DriveMotion {
        active: bool,
    },
}

// -----------------------------------------------------------------------------------------------
// IMPLS
// -----------------------------------------------------------------------------------------------

impl Default for Turn {
    fn default() -> Self {
        Turn::Straight
    }
}

impl MechEvent {
    /// Name under which the event is published.
    pub fn name(&self) -> &'static str {
        match self {
            MechEvent::ServoRegime { .. } => EVT_SERVO_REGIME,
            MechEvent::ServoLimit { .. } => EVT_SERVO_LIMIT,
            MechEvent::ServoPreempted { .. } => EVT_SERVO_PREEMPTED,
            MechEvent::DriveMotion { .. } => EVT_DRIVE_MOTION,
        }
    }

    /// Structured payload of the event, without the type tag.
    pub fn payload(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(mut v) => v.get_mut("payload").map(Value::take).unwrap_or(Value::Null),
            Err(_) => Value::Null,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_dem_json() {
        let dem: MechDem = serde_json::from_str(
            r#"{"type": "ServoOscillate", "group": "shoulder", "channel": 0, "direction": -1, "speed": 2}"#
        ).unwrap();
        assert_eq!(dem, MechDem::ServoOscillate {
            group: "shoulder".into(),
            channel: 0,
            direction: -1,
            speed: 2
        });

        let dem: MechDem = serde_json::from_str(
            r#"{"type": "DriveMove", "speed": 40, "direction": 1}"#
        ).unwrap();
        assert_eq!(dem, MechDem::DriveMove { speed: 40.0, direction: 1, turn: Turn::Straight });

        let dem: MechDem = serde_json::from_str(
            r#"{"type": "ServoSpeedStep", "group": "pan", "step": 4}"#
        ).unwrap();
        assert_eq!(dem, MechDem::ServoSpeedStep { group: "pan".into(), step: 4 });
    }

    #[test]
    fn test_event_payload() {
        let evt = MechEvent::DriveMotion { active: true };
        assert_eq!(evt.name(), "drive_motion");
        assert_eq!(evt.payload(), serde_json::json!({ "active": true }));

        let evt = MechEvent::ServoLimit { controller: "tilt".into(), channel: 4, position: 150 };
        assert_eq!(evt.name(), "servo_limit");
        assert_eq!(
            evt.payload(),
            serde_json::json!({ "controller": "tilt", "channel": 4, "position": 150 })
        );
    }
}
