//! # Actuators
//!
//! The set of servo controllers and the drivetrain built from the executable's parameters.
//! Demands are dispatched here to the controller they address.
//!
//! A servo demand may only name channels owned by the group it addresses. Every controller spans
//! the whole chip, so other channels are rejected here with `ChannelIndexOutOfRange`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use comms_if::eqpt::mech::MechDem;
use log::{debug, info};
use util::time::{secs_to_duration, Clock};

use crate::{
    calib::CalibrationStore,
    drive_ctrl::{DriveCtrl, DriveCtrlError},
    params::{MechExecParams, ParamsError},
    pwm::PwmHub,
    servo_ctrl::{Deg, ServoCtrl, ServoCtrlError},
    steps::{SpeedStepError, SpeedStepStore},
    tm::TelemetrySink,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct Actuators {
    groups: Vec<ServoGroup>,

    drive: DriveCtrl,

    steps: Arc<SpeedStepStore>,
}

struct ServoGroup {
    ctrl: ServoCtrl,

    /// Channels the group owns, homed when a demand lists none
    channels: Vec<u8>,

    /// Speed multiplier, kept up to date by the step store
    speed_step: Arc<AtomicU8>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum ActuatorError {
    #[error("No servo group named \"{0}\"")]
    UnknownGroup(String),

    #[error("Invalid parameters: {0}")]
    Params(#[from] ParamsError),

    #[error("Servo error: {0}")]
    Servo(#[from] ServoCtrlError),

    #[error("Drive error: {0}")]
    Drive(#[from] DriveCtrlError),

    #[error("Speed step error: {0}")]
    Step(#[from] SpeedStepError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Actuators {
    /// Build every servo group and the drivetrain over the shared hub.
    ///
    /// If the parameters hold a shoulder calibration it is written to the store before the groups
    /// start watching it. Each group's speed step is defined in the step store unless it already
    /// holds one. The drive ramp is not started until [`Actuators::start`].
    pub fn new(
        params: &MechExecParams,
        hub: Arc<PwmHub>,
        clock: Arc<dyn Clock>,
        tm: Arc<dyn TelemetrySink>,
        calib: &CalibrationStore,
        steps: Arc<SpeedStepStore>
    ) -> Result<Self, ActuatorError> {
        params.are_valid()?;

        if let Some(shoulder) = params.shoulder {
            calib.update_shoulder(shoulder.channel, shoulder.calib)?;
        }

        let mut groups = Vec::with_capacity(params.servo_groups.len());
        for group in &params.servo_groups {
            let ctrl = ServoCtrl::new(
                &group.name,
                &params.servo_params_for(group),
                hub.clone(),
                clock.clone(),
                tm.clone()
            )?;
            ctrl.watch_calibration(calib, &group.channels)?;

            let speed_step = Arc::new(AtomicU8::new(steps.define(&group.name, group.speed_step)));
            let weak = Arc::downgrade(&speed_step);
            let name = group.name.clone();
            steps.register(move |g, step| match weak.upgrade() {
                Some(speed_step) => {
                    if g == name {
                        speed_step.store(step, Ordering::SeqCst);
                    }
                    true
                },
                None => false
            });

            debug!(
                "Servo group {} created on channels {:?}, speed step {}",
                group.name,
                group.channels,
                speed_step.load(Ordering::SeqCst)
            );

            groups.push(ServoGroup {
                ctrl,
                channels: group.channels.clone(),
                speed_step,
            });
        }

        let drive = DriveCtrl::new(params.drive.clone(), hub, clock, tm)?;

        info!("{} servo groups and the drivetrain initialised", groups.len());

        Ok(Self { groups, drive, steps })
    }

    /// Start the drive ramp.
    pub fn start(&mut self) -> Result<(), ActuatorError> {
        Ok(self.drive.start()?)
    }

    pub fn group(&self, name: &str) -> Option<&ServoCtrl> {
        self.groups.iter().find(|g| g.ctrl.name() == name).map(|g| &g.ctrl)
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.ctrl.name()).collect()
    }

    pub fn drive(&self) -> &DriveCtrl {
        &self.drive
    }

    /// Dispatch a demand to the controller it addresses.
    pub fn execute(&self, dem: &MechDem) -> Result<(), ActuatorError> {
        debug!("Executing {:?}", dem);

        match dem {
            MechDem::ServoHome { group, channels } => {
                let group = self.find(group)?;
                group.check_owned(channels)?;
                let channels = if channels.is_empty() { &group.channels } else { channels };
                group.ctrl.snap_to_init(channels)?;
            },
            MechDem::ServoTimed { group, goals, duration_s, steps } => {
                let group = self.find(group)?;
                let goals: Vec<(u8, Deg)> = goals.iter().map(|g| (g.channel, g.angle)).collect();
                group.check_owned(goals.iter().map(|g| &g.0))?;

                let ctrl = &group.ctrl;
                let (default_duration, default_steps) = ctrl.timed_defaults();
                ctrl.drive_timed(
                    &goals,
                    duration_s.map(secs_to_duration).unwrap_or(default_duration),
                    steps.unwrap_or(default_steps)
                )?;
            },
            MechDem::ServoSpeed { group, channels, deltas, speeds } => {
                let group = self.find(group)?;
                group.check_owned(channels)?;

                let speeds: Vec<i32> = speeds.iter().map(|&s| group.scale_speed(s)).collect();
                group.ctrl.drive_at_speed(channels, deltas, &speeds)?;
            },
            MechDem::ServoOscillate { group, channel, direction, speed } => {
                let group = self.find(group)?;
                group.check_owned(&[*channel])?;
                group.ctrl.oscillate(*channel, *direction, group.scale_speed(*speed))?;
            },
            MechDem::ServoSnap { group, channel, angle } => {
                let group = self.find(group)?;
                group.check_owned(&[*channel])?;
                group.ctrl.snap_to(*channel, *angle)?;
            },
            MechDem::ServoStop { group } => self.find(group)?.ctrl.stop(),
            MechDem::ServoSpeedStep { group, step } => {
                self.find(group)?;
                self.steps.update(group, *step)?;
            },
            MechDem::DriveTarget { motor, speed } => self.drive.set_target(*motor, *speed)?,
            MechDem::DriveMove { speed, direction, turn } => {
                self.drive.drive(*speed, *direction, *turn)?
            },
            MechDem::DriveStop { immediate } => self.drive.stop(*immediate),
            MechDem::StopAll => self.stop_all(),
        }

        Ok(())
    }

    /// Snap every group to its home position.
    pub fn home_all(&self) -> Result<(), ActuatorError> {
        for group in &self.groups {
            group.ctrl.snap_to_init(&group.channels)?;
        }
        Ok(())
    }

    /// Stop every servo group and bring the drivetrain to rest with the ramp.
    pub fn stop_all(&self) {
        for group in &self.groups {
            group.ctrl.stop();
        }
        self.drive.stop(false);
    }

    /// Stop everything immediately and join all controller threads.
    pub fn shutdown(&mut self) {
        for group in self.groups.iter_mut() {
            group.ctrl.shutdown();
        }
        self.drive.shutdown();

        info!("Actuators shut down");
    }

    fn find(&self, name: &str) -> Result<&ServoGroup, ActuatorError> {
        self.groups
            .iter()
            .find(|g| g.ctrl.name() == name)
            .ok_or_else(|| ActuatorError::UnknownGroup(name.to_owned()))
    }
}

impl ServoGroup {
    fn check_owned<'a, I>(&self, channels: I) -> Result<(), ServoCtrlError>
    where
        I: IntoIterator<Item = &'a u8>
    {
        match channels.into_iter().find(|ch| !self.channels.contains(ch)) {
            Some(&ch) => Err(ServoCtrlError::ChannelIndexOutOfRange(ch)),
            None => Ok(())
        }
    }

    fn scale_speed(&self, speed: i32) -> i32 {
        speed.saturating_mul(self.speed_step.load(Ordering::SeqCst) as i32)
    }
}
