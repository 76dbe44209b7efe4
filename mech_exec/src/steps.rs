//! # Speed step store
//!
//! Each servo group has a speed step, a multiplier applied to the speeds of its speed and
//! oscillation demands so an operator can make a joint coarser or finer without editing scripts.
//! Steps are kept within [`SPEED_STEP_MIN`]..=[`SPEED_STEP_MAX`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::info;

use crate::calib::ObserverId;
use crate::lock;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

pub const SPEED_STEP_MIN: u8 = 1;

pub const SPEED_STEP_MAX: u8 = 10;

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Called with the group name and its new step. Returning false unregisters the observer.
type Observer = Arc<dyn Fn(&str, u8) -> bool + Send + Sync>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Default)]
pub struct SpeedStepStore {
    steps: Mutex<HashMap<String, u8>>,

    observers: Mutex<Vec<(ObserverId, Observer)>>,

    next_id: Mutex<ObserverId>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum SpeedStepError {
    #[error("No speed step is defined for group \"{0}\"")]
    UnknownGroup(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SpeedStepStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group with its initial step. A group which is already defined keeps its current
    /// step.
    pub fn define(&self, group: &str, step: i32) -> u8 {
        *lock(&self.steps)
            .entry(group.to_owned())
            .or_insert_with(|| clamp_step(step))
    }

    pub fn get(&self, group: &str) -> Option<u8> {
        lock(&self.steps).get(group).copied()
    }

    /// Every defined group and its step, sorted by name.
    pub fn steps(&self) -> Vec<(String, u8)> {
        let mut steps: Vec<(String, u8)> = lock(&self.steps)
            .iter()
            .map(|(g, &s)| (g.clone(), s))
            .collect();
        steps.sort();
        steps
    }

    /// Set the step of a defined group, clamped to the allowed range, then notify every observer.
    ///
    /// Returns the step actually stored.
    pub fn update(&self, group: &str, step: i32) -> Result<u8, SpeedStepError> {
        let step = clamp_step(step);

        match lock(&self.steps).get_mut(group) {
            Some(s) => *s = step,
            None => return Err(SpeedStepError::UnknownGroup(group.to_owned()))
        }
        info!("Speed step of {}: {}", group, step);

        let observers: Vec<(ObserverId, Observer)> = lock(&self.observers).clone();
        let dropped: Vec<ObserverId> = observers
            .iter()
            .filter(|(_, obs)| !obs(group, step))
            .map(|(id, _)| *id)
            .collect();

        if !dropped.is_empty() {
            lock(&self.observers).retain(|(id, _)| !dropped.contains(id));
        }

        Ok(step)
    }

    pub fn register<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&str, u8) -> bool + Send + Sync + 'static
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
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

pub fn clamp_step(step: i32) -> u8 {
    step.max(SPEED_STEP_MIN as i32).min(SPEED_STEP_MAX as i32) as u8
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};

    #[test]
    fn test_clamp() {
        assert_eq!(clamp_step(i32::MIN), 1);
        assert_eq!(clamp_step(0), 1);
        assert_eq!(clamp_step(4), 4);
        assert_eq!(clamp_step(10), 10);
        assert_eq!(clamp_step(i32::MAX), 10);
    }

    #[test]
    fn test_store() {
        let store = SpeedStepStore::new();
        assert_eq!(store.define("pan", 0), 1);
        assert_eq!(store.define("tilt", 3), 3);

        // Redefining keeps the stored step
        assert_eq!(store.define("tilt", 8), 3);

        let seen = Arc::new(AtomicU8::new(0));
        let seen_2 = seen.clone();
        let id = store.register(move |group, step| {
            assert_eq!(group, "pan");
            seen_2.store(step, Ordering::SeqCst);
            true
        });
        store.register(|_, _| false);
        assert_eq!(store.num_observers(), 2);

        assert_eq!(store.update("pan", 25), Ok(10));
        assert_eq!(seen.load(Ordering::SeqCst), 10);
        assert_eq!(store.get("pan"), Some(10));
        assert_eq!(store.num_observers(), 1);

        assert_eq!(
            store.update("wrist", 2),
            Err(SpeedStepError::UnknownGroup(String::from("wrist")))
        );
        assert_eq!(seen.load(Ordering::SeqCst), 10);

        assert_eq!(store.steps(), vec![(String::from("pan"), 10), (String::from("tilt"), 3)]);

        store.unregister(id);
        assert_eq!(store.num_observers(), 0);
    }
}
