//! # Calibration store
//!
//! Holds the calibration of every channel and notifies registered observers when one changes.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::info;
use serde::{Deserialize, Serialize};

use crate::lock;
use crate::servo_ctrl::{calib_in_range, ChannelCalib, Deg, ServoCtrlError};

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

pub type ObserverId = usize;

/// Called with each calibration update. Returning false unregisters the observer.
type Observer = Arc<dyn Fn(u8, ChannelCalib) -> bool + Send + Sync>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Shoulder joint calibration, expressed as the lowest position and how far it may raise above
/// it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShoulderCalibration {
    pub base_angle: Deg,
    pub raise_angle: Deg,
}

#[derive(Default)]
pub struct CalibrationStore {
    entries: Mutex<HashMap<u8, ChannelCalib>>,

    observers: Mutex<Vec<(ObserverId, Observer)>>,

    next_id: Mutex<ObserverId>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ShoulderCalibration {
    /// The shoulder rests at its base angle, which is also its lower limit.
    pub fn to_channel_calib(&self) -> ChannelCalib {
        ChannelCalib {
            init: self.base_angle,
            min: self.base_angle,
            max: self.base_angle.saturating_add(self.raise_angle).min(180),
        }
    }

    pub fn is_valid(&self) -> bool {
        (0..=180).contains(&self.base_angle)
            && (0..=180).contains(&self.raise_angle)
            && self.base_angle.saturating_add(self.raise_angle) <= 180
    }
}

impl CalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(u8, ChannelCalib) -> bool + Send + Sync + 'static
    {
        let id = {
            let mut next_id = lock(&self.next_id);
            *next_id += 1;
            *next_id
        };

        lock(&self.observers).push((id, Arc::new(observer)));
        id
    }

    pub fn unregister(&self, id: ObserverId) {
        lock(&self.observers).retain(|(i, _)| *i != id);
    }

    pub fn num_observers(&self) -> usize {
        lock(&self.observers).len()
    }

    pub fn get(&self, channel: u8) -> Option<ChannelCalib> {
        lock(&self.entries).get(&channel).copied()
    }

    /// Validate and store a channel's calibration then notify every observer.
    ///
    /// An invalid calibration is rejected and the previous one kept.
    pub fn update(&self, channel: u8, calib: ChannelCalib) -> Result<(), ServoCtrlError> {
        if !calib_in_range(calib.init, calib.min, calib.max) {
            return Err(ServoCtrlError::CalibrationOutOfRange {
                channel,
                init: calib.init,
                min: calib.min,
                max: calib.max,
            })
        }

        lock(&self.entries).insert(channel, calib);
        info!(
            "Calibration of channel {}: init = {}, min = {}, max = {}",
            channel, calib.init, calib.min, calib.max
        );

        // Observers are called without holding the lock so they may use the store
        let observers: Vec<(ObserverId, Observer)> = lock(&self.observers).clone();
        let dropped: Vec<ObserverId> = observers
            .iter()
            .filter(|(_, obs)| !obs(channel, calib))
            .map(|(id, _)| *id)
            .collect();

        if !dropped.is_empty() {
            lock(&self.observers).retain(|(id, _)| !dropped.contains(id));
        }

        Ok(())
    }

    pub fn update_shoulder(
        &self,
        channel: u8,
        shoulder: ShoulderCalibration
    ) -> Result<(), ServoCtrlError> {
        if !shoulder.is_valid() {
            return Err(ServoCtrlError::CalibrationOutOfRange {
                channel,
                init: shoulder.base_angle,
                min: shoulder.base_angle,
                max: shoulder.base_angle.saturating_add(shoulder.raise_angle),
            })
        }

        self.update(channel, shoulder.to_channel_calib())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_shoulder() {
        let shoulder = ShoulderCalibration { base_angle: 40, raise_angle: 100 };
        assert!(shoulder.is_valid());
        assert_eq!(shoulder.to_channel_calib(), ChannelCalib { init: 40, min: 40, max: 140 });

        assert!(!ShoulderCalibration { base_angle: 120, raise_angle: 90 }.is_valid());
        assert!(!ShoulderCalibration { base_angle: -5, raise_angle: 90 }.is_valid());

        let huge = ShoulderCalibration { base_angle: i32::MAX, raise_angle: 1 };
        assert!(!huge.is_valid());
        assert_eq!(huge.to_channel_calib().max, 180);

        let store = CalibrationStore::new();
        assert!(matches!(
            store.update_shoulder(0, huge),
            Err(ServoCtrlError::CalibrationOutOfRange { channel: 0, max: i32::MAX, .. })
        ));
        assert!(store.get(0).is_none());
    }

    #[test]
    fn test_observers() {
        let store = CalibrationStore::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_2 = calls.clone();
        let id = store.register(move |ch, calib| {
            assert_eq!(ch, 2);
            assert_eq!(calib.init, 100);
            calls_2.fetch_add(1, Ordering::SeqCst);
            true
        });
        store.register(|_, _| false);
        assert_eq!(store.num_observers(), 2);

        store.update(2, ChannelCalib { init: 100, min: 0, max: 180 }).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.num_observers(), 1);
        assert_eq!(store.get(2).map(|c| c.init), Some(100));

        // Rejected updates keep the previous value and notify nobody
        assert!(store.update(2, ChannelCalib { init: 100, min: 120, max: 180 }).is_err());
        assert!(store.update_shoulder(2, ShoulderCalibration { base_angle: 100, raise_angle: 90 }).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get(2).map(|c| c.min), Some(0));

        store.unregister(id);
        assert_eq!(store.num_observers(), 0);
    }
}
