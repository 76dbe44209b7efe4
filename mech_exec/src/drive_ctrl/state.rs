//! Drive ramp controller.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use comms_if::eqpt::mech::{MechEvent, Turn};
use log::{debug, info, trace, warn};
use util::{
    maths::{clamp, step_towards},
    time::{secs_to_duration, Clock},
};

use super::{DriveCtrlError, Params, MAX_SPEED, NUM_MOTORS};
use crate::lock;
use crate::pwm::{PwmHandle, PwmHub};
use crate::tm::TelemetrySink;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Speeds smaller than this are considered zero.
const SPEED_EPSILON: f64 = 1e-6;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Controller for the drive motors.
pub struct DriveCtrl {
    shared: Arc<Shared>,

    thread: Option<JoinHandle<()>>,
}

struct Shared {
    params: Params,

    hub: Arc<PwmHub>,

    clock: Arc<dyn Clock>,

    tm: Arc<dyn TelemetrySink>,

    state: Mutex<DriveState>,

    /// Serialises hardware writes and activity events
    io: Mutex<Link>,

    stop: AtomicBool,
}

#[derive(Default)]
struct DriveState {
    targets: [f64; NUM_MOTORS],

    currents: [f64; NUM_MOTORS],

    /// Clock time of the last tick
    last_tick: Option<Duration>,

    /// Whether the drivetrain was moving at the last output
    active: bool,
}

#[derive(Default)]
struct Link {
    handle: Option<PwmHandle>,

    /// True while the driver can't be acquired, so that it's only logged once
    unavailable: bool,

    /// True while writes to the driver fail, so that it's only logged once
    write_failing: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DriveCtrl {
    /// Create the controller. The ramp thread is not started until [`DriveCtrl::start`].
    pub fn new(
        params: Params,
        hub: Arc<PwmHub>,
        clock: Arc<dyn Clock>,
        tm: Arc<dyn TelemetrySink>
    ) -> Result<Self, DriveCtrlError> {
        if !params.are_valid() {
            return Err(DriveCtrlError::InvalidParams)
        }

        Ok(Self {
            shared: Arc::new(Shared {
                params,
                hub,
                clock,
                tm,
                state: Mutex::new(DriveState::default()),
                io: Mutex::new(Link::default()),
                stop: AtomicBool::new(false),
            }),
            thread: None,
        })
    }

    /// Start the ramp thread. Does nothing if ramping is disabled or the thread already runs.
    pub fn start(&mut self) -> Result<(), DriveCtrlError> {
        if !self.shared.params.ramp_enabled {
            debug!("Drive ramp disabled, targets will be applied directly");
            return Ok(())
        }
        if self.thread.is_some() {
            return Ok(())
        }

        self.shared.stop.store(false, Ordering::SeqCst);

        let shared = self.shared.clone();
        self.thread = Some(
            thread::Builder::new()
                .name(String::from("drive_ramp"))
                .spawn(move || run(shared))
                .map_err(DriveCtrlError::ThreadSpawn)?
        );

        debug!("Drive ramp started at {} Hz", self.shared.params.ramp_hz);
        Ok(())
    }

    /// Set the target speed of a motor, clamped to `[-100, 100]`.
    pub fn set_target(&self, motor: usize, speed: f64) -> Result<(), DriveCtrlError> {
        self.set_targets(&[(motor, speed)])
    }

    /// Set the target of a motor from a direction and a speed magnitude in `[0, 100]`.
    ///
    /// A negative direction reverses the motor, anything else drives it forward.
    pub fn set_motor(&self, motor: usize, direction: i8, speed: f64) -> Result<(), DriveCtrlError> {
        let speed = magnitude(speed);

        self.set_target(motor, if direction < 0 { -speed } else { speed })
    }

    /// Differential drive command.
    ///
    /// Moving forward a turn reverses the motors on the inside of the turn. Moving backward the
    /// turn is ignored. A zero speed or direction stops the drivetrain with the ramp.
    pub fn drive(&self, speed: f64, direction: i8, turn: Turn) -> Result<(), DriveCtrlError> {
        let speed = magnitude(speed);

        if speed < SPEED_EPSILON || direction == 0 {
            self.stop(false);
            return Ok(())
        }

        let (left, right) = match (direction > 0, turn) {
            (true, Turn::Left) => (-1.0, 1.0),
            (true, Turn::Right) => (1.0, -1.0),
            (true, Turn::Straight) => (1.0, 1.0),
            (false, _) => (-1.0, -1.0),
        };

        let params = &self.shared.params;
        let left_speed = left * params.left_direction as f64 * speed;
        let right_speed = right * params.right_direction as f64 * speed;

        let targets: Vec<(usize, f64)> = params.left_motors
            .iter()
            .map(|&m| (m, left_speed))
            .chain(params.right_motors.iter().map(|&m| (m, right_speed)))
            .collect();

        self.set_targets(&targets)
    }

    fn set_targets(&self, targets: &[(usize, f64)]) -> Result<(), DriveCtrlError> {
        for &(motor, _) in targets {
            if motor >= NUM_MOTORS {
                return Err(DriveCtrlError::MotorIndexOutOfRange(motor))
            }
        }

        let ramp_enabled = self.shared.params.ramp_enabled;
        {
            let mut state = lock(&self.shared.state);
            for &(motor, speed) in targets {
                let speed = if speed.is_nan() { 0.0 } else { clamp(&speed, &-MAX_SPEED, &MAX_SPEED) };

                state.targets[motor] = speed;
                if !ramp_enabled {
                    state.currents[motor] = speed;
                }
            }
        }

        if !ramp_enabled {
            self.shared.output();
        }

        Ok(())
    }

    /// Stop every motor.
    ///
    /// An immediate stop zeroes the current speeds and writes them straight away, otherwise only
    /// the targets are zeroed and the ramp brings the motors to rest.
    pub fn stop(&self, immediate: bool) {
        let direct = immediate || !self.shared.params.ramp_enabled;

        {
            let mut state = lock(&self.shared.state);
            state.targets = [0.0; NUM_MOTORS];
            if direct {
                state.currents = [0.0; NUM_MOTORS];
            }
        }

        if direct {
            self.shared.output();
        }
    }

    /// Advance the ramp by one step and write the result.
    pub fn tick(&self) {
        self.shared.tick()
    }

    pub fn targets(&self) -> [f64; NUM_MOTORS] {
        lock(&self.shared.state).targets
    }

    pub fn currents(&self) -> [f64; NUM_MOTORS] {
        lock(&self.shared.state).currents
    }

    /// True if any motor is moving or commanded to move.
    pub fn is_active(&self) -> bool {
        lock(&self.shared.state).is_active()
    }

    /// Stop every motor immediately and terminate the ramp thread.
    pub fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Drive ramp thread panicked");
            }
        }

        self.stop(true);
    }
}

impl Drop for DriveCtrl {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.shutdown();
        }
    }
}

impl DriveState {
    fn is_active(&self) -> bool {
        self.targets
            .iter()
            .chain(self.currents.iter())
            .any(|v| v.abs() > SPEED_EPSILON)
    }
}

impl Shared {
    fn tick(&self) {
        let now = self.clock.now();

        {
            let mut guard = lock(&self.state);
            let state = &mut *guard;

            let dt = match state.last_tick {
                Some(last) if now > last => (now - last).as_secs_f64(),
                _ => self.params.ramp_period_s()
            };
            state.last_tick = Some(now);

            let max_delta = self.params.accel_limit * dt;

            for (current, &target) in state.currents.iter_mut().zip(state.targets.iter()) {
                let next = if self.params.accel_limit > 0.0 {
                    step_towards(*current, target, max_delta)
                }
                else {
                    target
                };

                *current = clamp(&next, &-MAX_SPEED, &MAX_SPEED);
            }

            trace!("Drive currents: {:?}", state.currents);
        }

        self.output();
    }

    /// Write the current speeds and publish an event if the activity changed.
    fn output(&self) {
        let mut link = lock(&self.io);

        let (currents, edge) = {
            let mut state = lock(&self.state);
            let active = state.is_active();

            let edge = if active != state.active {
                state.active = active;
                Some(active)
            }
            else {
                None
            };

            (state.currents, edge)
        };

        if let Some(handle) = self.bind(&mut link) {
            self.write(&mut link, &handle, &currents);
        }

        if let Some(active) = edge {
            debug!("Drive {}", if active { "started" } else { "stopped" });
            self.tm.publish_event(&MechEvent::DriveMotion { active });
        }
    }

    fn bind(&self, link: &mut Link) -> Option<PwmHandle> {
        if let Some(ref handle) = link.handle {
            return Some(handle.clone())
        }

        match self.hub.acquire() {
            Ok(handle) => {
                if link.unavailable {
                    info!("Drive output available again, using the {} PWM driver", handle.kind());
                }
                else {
                    info!("Drive using the {} PWM driver", handle.kind());
                }

                link.unavailable = false;
                link.handle = Some(handle.clone());
                Some(handle)
            },
            Err(e) => {
                if !link.unavailable {
                    warn!("Drive output unavailable: {}", e);
                    link.unavailable = true;
                }
                None
            }
        }
    }

    fn write(&self, link: &mut Link, handle: &PwmHandle, currents: &[f64; NUM_MOTORS]) {
        let mut failure = None;

        for (motor, &speed) in currents.iter().enumerate() {
            let [in_1, in_2] = self.params.motor_channels[motor];
            let (duty_1, duty_2) = h_bridge_duty(speed);

            for &(channel, duty) in [(in_1, duty_1), (in_2, duty_2)].iter() {
                if let Err(e) = handle.set_duty(channel, duty) {
                    failure = Some(e);
                }
            }
        }

        match failure {
            Some(e) => if !link.write_failing {
                warn!("Drive output write failed: {}", e);
                link.write_failing = true;
            },
            None => if link.write_failing {
                info!("Drive output writes recovered");
                link.write_failing = false;
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Duty cycles of the two inputs of an H-bridge for a signed speed.
///
/// Forward drives IN1, reverse drives IN2, and zero leaves both off.
pub fn h_bridge_duty(speed: f64) -> (f64, f64) {
    let duty = (speed.abs() / MAX_SPEED).min(1.0);

    if speed > SPEED_EPSILON {
        (duty, 0.0)
    }
    else if speed < -SPEED_EPSILON {
        (0.0, duty)
    }
    else {
        (0.0, 0.0)
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Clamp a speed magnitude into `[0, 100]`, non-numbers giving zero.
fn magnitude(speed: f64) -> f64 {
    if speed.is_nan() {
        0.0
    }
    else {
        clamp(&speed, &0.0, &MAX_SPEED)
    }
}

fn run(shared: Arc<Shared>) {
    let period = secs_to_duration(shared.params.ramp_period_s());

    while !shared.stop.load(Ordering::SeqCst) {
        shared.tick();
        shared.clock.sleep(period);
    }

    debug!("Drive ramp stopped");
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pwm::mock::{dead_hub, mock_hub, WriteLog};
    use crate::tm::EventBus;
    use util::time::SimClock;

    fn ctrl(params: Params) -> (DriveCtrl, Arc<SimClock>, WriteLog, Arc<EventBus>) {
        let clock = Arc::new(SimClock::new());
        let (hub, log) = mock_hub(clock.clone());
        let bus = Arc::new(EventBus::new(64));
        let ctrl = DriveCtrl::new(params, hub, clock.clone(), bus.clone()).unwrap();

        (ctrl, clock, log, bus)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_ramp() {
        let (ctrl, clock, _, _) = ctrl(Params::default());

        ctrl.set_target(0, 80.0).unwrap();
        assert_eq!(ctrl.currents()[0], 0.0);

        for n in 1..=30 {
            if n > 1 {
                clock.advance(Duration::from_millis(20));
            }
            ctrl.tick();

            let expected = (4.0 * n as f64).min(80.0);
            assert!(approx(ctrl.currents()[0], expected), "tick {}: {:?}", n, ctrl.currents());
        }

        // Longer gaps allow larger steps
        ctrl.set_target(0, -100.0).unwrap();
        clock.advance(Duration::from_millis(100));
        ctrl.tick();
        assert!(approx(ctrl.currents()[0], 60.0));
    }

    #[test]
    fn test_targets_clamped() {
        let (ctrl, _, _, _) = ctrl(Params::default());

        ctrl.set_target(1, 250.0).unwrap();
        assert_eq!(ctrl.targets()[1], 100.0);
        ctrl.set_target(1, -300.0).unwrap();
        assert_eq!(ctrl.targets()[1], -100.0);
        ctrl.set_target(2, std::f64::NAN).unwrap();
        assert_eq!(ctrl.targets()[2], 0.0);

        assert!(matches!(
            ctrl.set_target(4, 10.0),
            Err(DriveCtrlError::MotorIndexOutOfRange(4))
        ));

        ctrl.set_motor(3, -1, 140.0).unwrap();
        assert_eq!(ctrl.targets()[3], -100.0);
        ctrl.set_motor(3, 1, -20.0).unwrap();
        assert_eq!(ctrl.targets()[3], 0.0);
    }

    #[test]
    fn test_h_bridge_output() {
        let (ctrl, _, log, _) = ctrl(Params { accel_limit: 0.0, ..Default::default() });

        ctrl.set_target(0, -50.0).unwrap();
        ctrl.set_target(1, 100.0).unwrap();
        ctrl.tick();

        // Motor 0 on channels 15/14, motor 1 on 12/13
        assert_eq!(log.channel(15).last(), Some(&0));
        assert_eq!(log.channel(14).last(), Some(&2048));
        assert_eq!(log.channel(12).last(), Some(&4095));
        assert_eq!(log.channel(13).last(), Some(&0));
        assert_eq!(log.channel(11).last(), Some(&0));

        assert_eq!(h_bridge_duty(0.0), (0.0, 0.0));
        assert_eq!(h_bridge_duty(25.0), (0.25, 0.0));
    }

    #[test]
    fn test_immediate_stop() {
        let (ctrl, clock, log, _) = ctrl(Params::default());

        ctrl.set_target(0, 60.0).unwrap();
        for _ in 0..5 {
            ctrl.tick();
            clock.advance(Duration::from_millis(20));
        }
        assert!(ctrl.currents()[0] > 0.0);

        ctrl.stop(true);
        assert_eq!(ctrl.currents(), [0.0; NUM_MOTORS]);
        assert_eq!(ctrl.targets(), [0.0; NUM_MOTORS]);
        assert_eq!(log.channel(15).last(), Some(&0));
        assert!(!ctrl.is_active());
    }

    #[test]
    fn test_activity_events() {
        let (ctrl, clock, _, bus) = ctrl(Params::default());
        let rx = bus.subscribe();

        ctrl.set_target(0, 20.0).unwrap();
        for _ in 0..10 {
            ctrl.tick();
            clock.advance(Duration::from_millis(20));
        }

        // Ramped stop, still moving until the ramp reaches zero
        ctrl.stop(false);
        assert!(ctrl.is_active());
        for _ in 0..10 {
            ctrl.tick();
            clock.advance(Duration::from_millis(20));
        }
        assert!(!ctrl.is_active());

        let events: Vec<serde_json::Value> = rx.try_iter().map(|m| m.payload).collect();
        assert_eq!(events, vec![
            serde_json::json!({ "active": true }),
            serde_json::json!({ "active": false }),
        ]);
    }

    #[test]
    fn test_ramp_disabled() {
        let (ctrl, _, log, bus) = ctrl(Params { ramp_enabled: false, ..Default::default() });
        let rx = bus.subscribe();

        ctrl.set_target(2, 75.0).unwrap();
        assert_eq!(ctrl.currents()[2], 75.0);
        assert_eq!(log.channel(11).last(), Some(&3071));
        assert_eq!(rx.try_recv().map(|m| m.payload).ok(), Some(serde_json::json!({ "active": true })));

        ctrl.stop(false);
        assert_eq!(ctrl.currents()[2], 0.0);
        assert_eq!(log.channel(11).last(), Some(&0));
    }

    #[test]
    fn test_differential_drive() {
        let (ctrl, _, _, _) = ctrl(Params::default());

        ctrl.drive(40.0, 1, Turn::Straight).unwrap();
        assert_eq!(ctrl.targets(), [40.0, 40.0, 0.0, 0.0]);

        ctrl.drive(40.0, 1, Turn::Left).unwrap();
        assert_eq!(ctrl.targets(), [-40.0, 40.0, 0.0, 0.0]);

        ctrl.drive(40.0, 1, Turn::Right).unwrap();
        assert_eq!(ctrl.targets(), [40.0, -40.0, 0.0, 0.0]);

        ctrl.drive(40.0, -1, Turn::Left).unwrap();
        assert_eq!(ctrl.targets(), [-40.0, -40.0, 0.0, 0.0]);

        ctrl.drive(0.0, 1, Turn::Straight).unwrap();
        assert_eq!(ctrl.targets(), [0.0; NUM_MOTORS]);
    }

    #[test]
    fn test_driver_unavailable() {
        let clock = Arc::new(SimClock::new());
        let ctrl = DriveCtrl::new(
            Params::default(),
            dead_hub(clock.clone()),
            clock.clone(),
            Arc::new(EventBus::new(1))
        ).unwrap();

        ctrl.set_target(0, 100.0).unwrap();
        for _ in 0..3 {
            ctrl.tick();
            clock.advance(Duration::from_millis(20));
        }

        // Bookkeeping carries on without a driver
        assert!(approx(ctrl.currents()[0], 12.0));
    }

    #[test]
    fn test_thread() {
        let (mut ctrl, _, _, _) = ctrl(Params::default());
        ctrl.start().unwrap();

        ctrl.set_target(0, 100.0).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while ctrl.currents()[0] < 100.0 && std::time::Instant::now() < deadline {
            thread::yield_now();
        }
        assert_eq!(ctrl.currents()[0], 100.0);

        ctrl.shutdown();
        assert_eq!(ctrl.currents(), [0.0; NUM_MOTORS]);
        assert!(!ctrl.is_active());
    }
}
