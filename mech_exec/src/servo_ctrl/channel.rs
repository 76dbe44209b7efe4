//! Calibration and working state of a single servo channel.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::{ChannelDefaults, Deg};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Calibrated home position and travel limits of a channel.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCalib {
    pub init: Deg,
    pub min: Deg,
    pub max: Deg,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    /// Sign applied to offsets and oscillation
    pub direction: i8,

    pub calib: ChannelCalib,

    /// Whether the hold is released when the controller stops
    pub relax: bool,

    pub goal: Deg,

    /// Position last commanded to the hardware
    pub current: Deg,

    /// Position the current motion started from
    pub last: Deg,

    /// Fractional position, `current` is its rounded value
    pub acc: f64,

    pub speed: i32,

    /// True once a pulse has been written, until the channel is relaxed
    pub engaged: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Channel {
    pub fn new(defaults: &ChannelDefaults) -> Self {
        let init = defaults.init;

        Self {
            direction: defaults.direction,
            calib: ChannelCalib {
                init,
                min: defaults.min,
                max: defaults.max,
            },
            relax: defaults.relax,
            goal: init,
            current: init,
            last: init,
            acc: init as f64,
            speed: 1,
            engaged: false,
        }
    }

    pub fn clamp(&self, angle: Deg) -> Deg {
        angle.max(self.calib.min).min(self.calib.max)
    }

    /// Set the current position, clamped to the limits. A clamp resets the accumulator.
    pub fn set_current(&mut self, angle: Deg) {
        let clamped = self.clamp(angle);
        self.current = clamped;

        if clamped != angle {
            self.acc = clamped as f64;
        }
    }

    /// Place the channel at an angle with no motion in progress.
    pub fn snap(&mut self, angle: Deg) {
        let angle = self.clamp(angle);

        self.goal = angle;
        self.current = angle;
        self.last = angle;
        self.acc = angle as f64;
    }

    /// Make the current position the starting point of the next motion.
    pub fn commit(&mut self) {
        self.last = self.current;
    }

    /// Re-synchronise the accumulator if it no longer rounds to the current position.
    pub fn sync_acc(&mut self) {
        if self.acc.round() as Deg != self.current {
            self.acc = self.current as f64;
        }
    }

    /// Goal for an offset from the home position, the offset being in control units.
    ///
    /// Offsets too large to represent push the goal to the corresponding limit.
    pub fn offset_goal(&self, offset: Deg) -> Deg {
        let signed = (self.direction as Deg).saturating_mul(offset);
        self.clamp(self.calib.init.saturating_add(signed))
    }

    /// Apply a new calibration, pulling the working state back inside the new limits.
    ///
    /// Returns true if the current position moved.
    pub fn apply_calib(&mut self, calib: ChannelCalib) -> bool {
        let previous = self.current;
        self.calib = calib;

        self.goal = self.clamp(self.goal);
        self.last = self.clamp(self.last);
        self.set_current(self.current);
        self.acc = self.acc.max(calib.min as f64).min(calib.max as f64);
        self.sync_acc();

        self.current != previous
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn channel() -> Channel {
        Channel::new(&ChannelDefaults {
            init: 90,
            min: 30,
            max: 150,
            direction: -1,
            relax: true,
        })
    }

    #[test]
    fn test_clamp_resets_acc() {
        let mut ch = channel();

        ch.acc = 120.4;
        ch.set_current(120);
        assert_eq!(ch.current, 120);
        assert_eq!(ch.acc, 120.4);

        ch.acc = 151.2;
        ch.set_current(151);
        assert_eq!(ch.current, 150);
        assert_eq!(ch.acc, 150.0);
    }

    #[test]
    fn test_offset_goal() {
        let ch = channel();
        assert_eq!(ch.offset_goal(30), 60);
        assert_eq!(ch.offset_goal(-30), 120);
        assert_eq!(ch.offset_goal(90), 30);

        assert_eq!(ch.offset_goal(Deg::MAX), 30);
        assert_eq!(ch.offset_goal(Deg::MIN), 150);

        let forward = Channel::new(&ChannelDefaults { direction: 1, ..Default::default() });
        assert_eq!(forward.offset_goal(Deg::MAX), 180);
        assert_eq!(forward.offset_goal(Deg::MIN), 0);
    }

    #[test]
    fn test_apply_calib() {
        let mut ch = channel();
        ch.snap(140);

        let moved = ch.apply_calib(ChannelCalib { init: 100, min: 80, max: 120 });
        assert!(moved);
        assert_eq!((ch.goal, ch.current, ch.last), (120, 120, 120));
        assert_eq!(ch.acc, 120.0);

        assert!(!ch.apply_calib(ChannelCalib { init: 100, min: 0, max: 180 }));
        assert_eq!(ch.current, 120);
    }
}
