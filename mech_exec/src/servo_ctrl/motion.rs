//! # Servo motion state machine
//!
//! [`MotionState`] holds every channel of a controller along with the requested and active motion,
//! and advances the motion one tick at a time. It performs no I/O and never sleeps: each call to
//! [`MotionState::tick`] returns the angles to write, the channels to relax and how long to wait
//! before the next tick. The controller thread is responsible for carrying these out, which keeps
//! all of the motion logic testable without threads or hardware.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Duration;

use comms_if::eqpt::mech::{MechEvent, RegimeKind};
use log::trace;
use util::time::secs_to_duration;

use super::{calib_in_range, Channel, ChannelCalib, Deg, Params, ServoCtrlError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Output of a single step of the state machine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tick {
    /// `(channel, angle)` pairs to write, in order
    pub writes: Vec<(u8, Deg)>,

    /// Channels whose output must be turned off after the writes
    pub relax: Vec<u8>,

    pub next: Next,
}

pub struct MotionState {
    /// Controller name used in events
    name: String,

    params: Params,

    channels: Vec<Channel>,

    regime: RegimeKind,

    run: RunState,

    /// Request waiting to be picked up by the next tick
    requested: Option<Request>,

    active: Option<Plan>,

    /// Events raised since the last call to `take_events`
    events: Vec<MechEvent>,
}

#[derive(Debug, Clone)]
struct Plan {
    kind: PlanKind,

    /// Goals of the moving channels when the plan started
    goals: Vec<(u8, Deg)>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// What the controller loop should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Next {
    Sleep(Duration),

    /// Nothing left to do, wait for the next request.
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
}

#[derive(Debug, Clone)]
enum Request {
    Timed {
        channels: Vec<u8>,
        interval: Duration,
        steps: u32,
    },
    Speed {
        channels: Vec<u8>,
    },
    Oscillate {
        channel: u8,
        direction: i8,
    },
}

#[derive(Debug, Clone, Copy)]
enum PlanKind {
    Timed {
        next_step: u32,
        steps: u32,
        interval: Duration,
    },
    Speed,
    Oscillate {
        channel: u8,
        direction: i8,
    },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for Next {
    fn default() -> Self {
        Next::Idle
    }
}

impl PlanKind {
    fn regime(&self) -> RegimeKind {
        match self {
            PlanKind::Timed { .. } => RegimeKind::TimedInterpolate,
            PlanKind::Speed => RegimeKind::SpeedInterpolate,
            PlanKind::Oscillate { .. } => RegimeKind::Oscillate,
        }
    }
}

impl Plan {
    /// Oscillation has no goal, only interpolations can see their goal change.
    fn goals_changed(&self, channels: &[Channel]) -> bool {
        match self.kind {
            PlanKind::Oscillate { .. } => false,
            _ => self.goals
                .iter()
                .any(|&(ch, goal)| channels[ch as usize].goal != goal)
        }
    }
}

impl MotionState {
    pub fn new(name: &str, params: &Params) -> Self {
        let channels = (0..params.num_channels)
            .map(|i| Channel::new(&params.channel_defaults(i)))
            .collect();

        Self {
            name: name.to_owned(),
            params: params.clone(),
            channels,
            regime: RegimeKind::Idle,
            run: RunState::Idle,
            requested: None,
            active: None,
            events: Vec::new(),
        }
    }

    pub fn regime(&self) -> RegimeKind {
        self.regime
    }

    /// True while a motion is requested or in progress.
    pub fn is_running(&self) -> bool {
        self.run == RunState::Running
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, channel: u8) -> Result<&Channel, ServoCtrlError> {
        self.channels
            .get(channel as usize)
            .ok_or(ServoCtrlError::ChannelIndexOutOfRange(channel))
    }

    fn channel_mut(&mut self, channel: u8) -> Result<&mut Channel, ServoCtrlError> {
        self.channels
            .get_mut(channel as usize)
            .ok_or(ServoCtrlError::ChannelIndexOutOfRange(channel))
    }

    fn check_channels(&self, channels: &[u8]) -> Result<(), ServoCtrlError> {
        for &ch in channels {
            self.channel(ch)?;
        }
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<MechEvent> {
        std::mem::take(&mut self.events)
    }

    /// Convert a value in logical angle units into control units.
    pub fn pwm_gen_out(&self, value: i32) -> i32 {
        let ratio = (self.params.ctrl_range_max - self.params.ctrl_range_min) as f64
            / self.params.angle_range as f64;

        (ratio * value as f64).round() as i32
    }

    /// Distance covered in one tick at the given speed. Speeds below 1 are raised to 1.
    fn speed_step(&self, speed: i32) -> f64 {
        self.pwm_gen_out(speed.max(1)).max(1) as f64 * self.params.speed_tick_s
    }

    fn speed_tick(&self) -> Duration {
        secs_to_duration(self.params.speed_tick_s)
    }

    /// Default duration and number of steps of a timed interpolation.
    pub fn timed_defaults(&self) -> (Duration, u32) {
        (secs_to_duration(self.params.timed_duration_s), self.params.timed_steps)
    }

    pub fn set_timed_defaults(&mut self, duration: Duration, steps: u32) -> Result<(), ServoCtrlError> {
        if steps == 0 {
            return Err(ServoCtrlError::InvalidParams)
        }

        self.params.timed_duration_s = duration.as_secs_f64();
        self.params.timed_steps = steps;
        Ok(())
    }

    pub fn set_speed_tick(&mut self, interval: Duration) -> Result<(), ServoCtrlError> {
        if interval == Duration::from_secs(0) {
            return Err(ServoCtrlError::InvalidParams)
        }

        self.params.speed_tick_s = interval.as_secs_f64();
        Ok(())
    }

    pub fn set_direction(&mut self, channel: u8, direction: i8) -> Result<(), ServoCtrlError> {
        if direction != 1 && direction != -1 {
            return Err(ServoCtrlError::InvalidDirection(direction))
        }
        if self.is_running() {
            return Err(ServoCtrlError::MotionInProgress)
        }

        self.channel_mut(channel)?.direction = direction;
        Ok(())
    }

    pub fn set_relax_enabled(&mut self, channel: u8, enabled: bool) -> Result<(), ServoCtrlError> {
        self.channel_mut(channel)?.relax = enabled;
        Ok(())
    }

    // ---- REQUESTS ----

    /// Interpolate the given channels to absolute goals.
    pub fn request_timed(
        &mut self,
        goals: &[(u8, Deg)],
        duration: Duration,
        steps: u32
    ) -> Result<(), ServoCtrlError> {
        if steps == 0 {
            return Err(ServoCtrlError::InvalidParams)
        }
        self.check_channels(&goals.iter().map(|g| g.0).collect::<Vec<_>>())?;

        for &(ch, goal) in goals {
            let c = &mut self.channels[ch as usize];
            c.goal = c.clamp(goal);
        }

        self.request(
            Request::Timed {
                channels: goals.iter().map(|g| g.0).collect(),
                interval: duration / steps,
                steps,
            },
            RegimeKind::TimedInterpolate
        );

        Ok(())
    }

    /// Interpolate to offsets from the home positions using the default duration and steps.
    pub fn request_timed_offsets(
        &mut self,
        channels: &[u8],
        deltas: &[Deg]
    ) -> Result<(), ServoCtrlError> {
        if channels.len() != deltas.len() {
            return Err(ServoCtrlError::MismatchedArgs)
        }
        self.check_channels(channels)?;

        let goals: Vec<(u8, Deg)> = channels
            .iter()
            .zip(deltas.iter())
            .map(|(&ch, &delta)| {
                (ch, self.channels[ch as usize].offset_goal(self.pwm_gen_out(delta)))
            })
            .collect();

        let (duration, steps) = self.timed_defaults();
        self.request_timed(&goals, duration, steps)
    }

    /// Move channels to offsets from their home positions at the given speeds.
    pub fn request_speed(
        &mut self,
        channels: &[u8],
        deltas: &[Deg],
        speeds: &[i32]
    ) -> Result<(), ServoCtrlError> {
        if channels.len() != deltas.len() || channels.len() != speeds.len() {
            return Err(ServoCtrlError::MismatchedArgs)
        }
        self.check_channels(channels)?;

        for ((&ch, &delta), &speed) in channels.iter().zip(deltas.iter()).zip(speeds.iter()) {
            let offset = self.pwm_gen_out(delta);
            let c = &mut self.channels[ch as usize];
            c.goal = c.offset_goal(offset);
            c.speed = speed.max(1);
        }

        self.request(
            Request::Speed { channels: channels.to_vec() },
            RegimeKind::SpeedInterpolate
        );

        Ok(())
    }

    /// Move a channel continuously until it reaches a limit or the controller is stopped.
    pub fn request_oscillate(
        &mut self,
        channel: u8,
        direction: i8,
        speed: i32
    ) -> Result<(), ServoCtrlError> {
        if direction != 1 && direction != -1 {
            return Err(ServoCtrlError::InvalidDirection(direction))
        }
        self.channel_mut(channel)?.speed = speed.max(1);

        self.request(Request::Oscillate { channel, direction }, RegimeKind::Oscillate);

        Ok(())
    }

    fn request(&mut self, request: Request, regime: RegimeKind) {
        trace!("[{}] requested {:?}", self.name, request);

        self.requested = Some(request);
        self.set_regime(regime);
        self.run = RunState::Running;
    }

    // ---- IMMEDIATE OPERATIONS ----

    /// Abort any motion and move channels (all if empty) straight to their home position.
    pub fn snap_to_init(&mut self, channels: &[u8]) -> Result<Tick, ServoCtrlError> {
        let ids: Vec<u8> = if channels.is_empty() {
            (0..self.channels.len()).map(|i| i as u8).collect()
        }
        else {
            channels.to_vec()
        };
        self.check_channels(&ids)?;

        self.cancel();
        self.set_regime(RegimeKind::Init);

        let mut tick = Tick::default();
        for ch in ids {
            let c = &mut self.channels[ch as usize];
            c.snap(c.calib.init);
            c.engaged = true;
            tick.writes.push((ch, c.current));
        }

        self.set_regime(RegimeKind::Idle);
        Ok(tick)
    }

    /// Abort any motion and set a channel to an absolute angle, releasing it afterwards if it is
    /// relaxable.
    pub fn snap_to(&mut self, channel: u8, angle: Deg) -> Result<Tick, ServoCtrlError> {
        self.channel(channel)?;
        self.cancel();

        let relax_on_stop = self.params.relax_on_stop;
        let c = &mut self.channels[channel as usize];
        let mut tick = Tick::default();

        c.snap(angle);
        c.engaged = true;
        tick.writes.push((channel, c.current));

        if c.relax && relax_on_stop {
            c.engaged = false;
            tick.relax.push(channel);
        }

        self.set_regime(RegimeKind::Idle);
        Ok(tick)
    }

    /// Set a channel to an offset from its home position immediately.
    ///
    /// A running interpolation which includes the channel sees its goal change and is pre-empted
    /// on its next tick.
    pub fn move_offset(&mut self, channel: u8, delta: Deg) -> Result<Tick, ServoCtrlError> {
        self.channel(channel)?;

        let offset = self.pwm_gen_out(delta);
        let c = &mut self.channels[channel as usize];
        let goal = c.offset_goal(offset);
        c.snap(goal);
        c.engaged = true;

        Ok(Tick {
            writes: vec![(channel, c.current)],
            ..Default::default()
        })
    }

    /// Replace a channel's calibration, aborting any motion.
    ///
    /// If the channel's position had to move to stay within the new limits and the channel is
    /// holding a position, the new position is returned to be written.
    pub fn set_calibration(
        &mut self,
        channel: u8,
        calib: ChannelCalib
    ) -> Result<Tick, ServoCtrlError> {
        self.channel(channel)?;

        if !calib_in_range(calib.init, calib.min, calib.max) {
            return Err(ServoCtrlError::CalibrationOutOfRange {
                channel,
                init: calib.init,
                min: calib.min,
                max: calib.max,
            })
        }

        self.cancel();

        let c = &mut self.channels[channel as usize];
        let mut tick = Tick::default();
        if c.apply_calib(calib) && c.engaged {
            tick.writes.push((channel, c.current));
        }

        self.set_regime(RegimeKind::Idle);
        Ok(tick)
    }

    /// Abort any motion, keeping every channel where it is.
    ///
    /// Returns the channels to release. Calling this again without any motion in between returns
    /// nothing and changes nothing.
    pub fn stop(&mut self) -> Vec<u8> {
        self.cancel();

        let relax_on_stop = self.params.relax_on_stop;
        let mut relax = Vec::new();

        for (i, c) in self.channels.iter_mut().enumerate() {
            c.goal = c.current;
            c.sync_acc();

            if relax_on_stop && c.relax && c.engaged {
                c.engaged = false;
                relax.push(i as u8);
            }
        }

        self.set_regime(RegimeKind::Idle);
        relax
    }

    /// Mark channels as released.
    pub fn relaxed(&mut self, channels: &[u8]) -> Result<(), ServoCtrlError> {
        self.check_channels(channels)?;

        for &ch in channels {
            self.channels[ch as usize].engaged = false;
        }
        Ok(())
    }

    // ---- TICK ----

    /// Advance the motion by one step.
    pub fn tick(&mut self) -> Tick {
        let mut tick = Tick::default();

        if let Some(request) = self.requested.take() {
            if let Some(plan) = self.active.take() {
                self.preempt(&plan);
            }
            self.active = Some(self.start(request));
        }
        else if self.active.as_ref().map_or(false, |p| p.goals_changed(&self.channels)) {
            if let Some(plan) = self.active.take() {
                self.preempt(&plan);
            }
        }

        let plan = match self.active.take() {
            Some(p) => p,
            None => {
                self.finish();
                return tick
            }
        };

        self.active = match plan.kind {
            PlanKind::Timed { next_step, steps, interval } => {
                self.step_timed(plan.goals, next_step, steps, interval, &mut tick)
            },
            PlanKind::Speed => self.step_speed(plan.goals, &mut tick),
            PlanKind::Oscillate { channel, direction } => {
                self.step_oscillate(channel, direction, &mut tick)
            }
        };

        if self.active.is_none() {
            self.finish();
        }

        tick
    }

    fn start(&mut self, request: Request) -> Plan {
        let (kind, channels) = match request {
            Request::Timed { channels, interval, steps } => (
                PlanKind::Timed { next_step: 0, steps, interval },
                channels
            ),
            Request::Speed { channels } => (PlanKind::Speed, channels),
            Request::Oscillate { channel, direction } => (
                PlanKind::Oscillate { channel, direction },
                vec![channel]
            ),
        };

        let mut goals = Vec::with_capacity(channels.len());
        for ch in channels {
            let c = &mut self.channels[ch as usize];
            c.commit();
            c.sync_acc();
            goals.push((ch, c.goal));
        }

        trace!("[{}] starting {:?}", self.name, kind);

        Plan { kind, goals }
    }

    /// Abort a plan, keeping the position it reached as the start of the next motion.
    fn preempt(&mut self, plan: &Plan) {
        for &(ch, _) in plan.goals.iter() {
            self.channels[ch as usize].commit();
        }

        if let PlanKind::Oscillate { .. } = plan.kind {
            return
        }

        self.events.push(MechEvent::ServoPreempted {
            controller: self.name.clone(),
            regime: plan.kind.regime(),
        });
    }

    fn finish(&mut self) {
        for c in self.channels.iter_mut() {
            c.commit();
        }

        self.active = None;
        self.run = RunState::Idle;
        self.set_regime(RegimeKind::Idle);
    }

    fn cancel(&mut self) {
        self.requested = None;
        self.active = None;
        self.run = RunState::Idle;

        for c in self.channels.iter_mut() {
            c.commit();
        }
    }

    fn set_regime(&mut self, regime: RegimeKind) {
        if regime == self.regime {
            return
        }

        self.events.push(MechEvent::ServoRegime {
            controller: self.name.clone(),
            from: self.regime,
            to: regime,
        });
        self.regime = regime;
    }

    fn step_timed(
        &mut self,
        goals: Vec<(u8, Deg)>,
        next_step: u32,
        steps: u32,
        interval: Duration,
        tick: &mut Tick
    ) -> Option<Plan> {
        if next_step >= steps {
            return None
        }

        let fraction = (next_step + 1) as f64 / steps as f64;

        for &(ch, goal) in goals.iter() {
            let c = &mut self.channels[ch as usize];

            let pos = c.last as f64 + (goal - c.last) as f64 * fraction;
            c.set_current(pos.round() as Deg);
            c.acc = c.current as f64;
            c.engaged = true;

            tick.writes.push((ch, c.current));
        }

        tick.next = Next::Sleep(interval);

        Some(Plan {
            kind: PlanKind::Timed { next_step: next_step + 1, steps, interval },
            goals,
        })
    }

    fn step_speed(&mut self, goals: Vec<(u8, Deg)>, tick: &mut Tick) -> Option<Plan> {
        let mut done = true;

        for &(ch, goal) in goals.iter() {
            let step = self.speed_step(self.channels[ch as usize].speed);
            let c = &mut self.channels[ch as usize];
            let target = goal as f64;

            if c.acc < target {
                c.acc = (c.acc + step).min(target);
            }
            else {
                c.acc = (c.acc - step).max(target);
            }

            let previous = c.current;
            c.set_current(c.acc.round() as Deg);
            c.commit();

            if c.current != previous {
                c.engaged = true;
                tick.writes.push((ch, c.current));
            }

            if c.acc != target {
                done = false;
            }
        }

        if done {
            return None
        }

        tick.next = Next::Sleep(self.speed_tick());
        Some(Plan { kind: PlanKind::Speed, goals })
    }

    fn step_oscillate(&mut self, channel: u8, direction: i8, tick: &mut Tick) -> Option<Plan> {
        let step = self.speed_step(self.channels[channel as usize].speed);
        let next = Next::Sleep(self.speed_tick());
        let relax_on_stop = self.params.relax_on_stop;
        let c = &mut self.channels[channel as usize];

        let sign = (direction * c.direction) as f64;
        c.acc = (c.acc + sign * step)
            .max(c.calib.min as f64)
            .min(c.calib.max as f64);

        let previous = c.current;
        c.set_current(c.acc.round() as Deg);
        c.goal = c.current;
        c.commit();

        if c.current != previous {
            c.engaged = true;
            tick.writes.push((channel, c.current));
        }

        let at_limit = (sign > 0.0 && c.current >= c.calib.max)
            || (sign < 0.0 && c.current <= c.calib.min);

        if !at_limit {
            tick.next = next;
            return Some(Plan {
                kind: PlanKind::Oscillate { channel, direction },
                goals: vec![(channel, c.goal)],
            })
        }

        if relax_on_stop && c.relax && c.engaged {
            c.engaged = false;
            tick.relax.push(channel);
        }

        self.events.push(MechEvent::ServoLimit {
            controller: self.name.clone(),
            channel,
            position: c.current,
        });

        None
    }
}
