//! Threaded servo controller.
//!
//! Two locks guard a controller. The I/O lock serialises everything which writes to the chip or
//! publishes telemetry on behalf of this controller, so that a stop can never be overtaken by a
//! tick computed before it. The motion lock guards the [`MotionState`] and is only held while it
//! is read or mutated. The I/O lock is always taken first, and no lock is held while the thread
//! sleeps.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Condvar, Mutex, PoisonError,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use comms_if::eqpt::mech::{MechEvent, RegimeKind};
use log::{debug, info, trace, warn};
use util::time::Clock;

use super::{Channel, ChannelCalib, Deg, MotionState, Next, Params, ServoCtrlError, Tick};
use crate::calib::{CalibrationStore, ObserverId};
use crate::lock;
use crate::pwm::{PwmHandle, PwmHub};
use crate::tm::TelemetrySink;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A servo controller instance, owning a set of channels and the thread moving them.
pub struct ServoCtrl {
    inner: Arc<Inner>,

    thread: Option<JoinHandle<()>>,
}

struct Inner {
    name: String,

    hub: Arc<PwmHub>,

    clock: Arc<dyn Clock>,

    tm: Arc<dyn TelemetrySink>,

    io: Mutex<Link>,

    motion: Mutex<MotionState>,

    /// Signalled when a motion is requested or the controller shuts down
    wake: Condvar,

    /// Signalled when the controller goes idle
    idle: Condvar,

    shutdown: AtomicBool,
}

/// This controller's binding to the PWM hub.
#[derive(Default)]
struct Link {
    handle: Option<PwmHandle>,

    /// Set once the driver being unavailable has been logged, cleared on bind
    unavailable_logged: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ServoCtrl {
    /// Create a new controller and start its thread.
    ///
    /// The PWM driver is not acquired until the first motion command.
    pub fn new(
        name: &str,
        params: &Params,
        hub: Arc<PwmHub>,
        clock: Arc<dyn Clock>,
        tm: Arc<dyn TelemetrySink>
    ) -> Result<Self, ServoCtrlError> {
        if !params.are_valid() {
            return Err(ServoCtrlError::InvalidParams)
        }

        let inner = Arc::new(Inner {
            name: name.to_owned(),
            hub,
            clock,
            tm,
            io: Mutex::new(Link::default()),
            motion: Mutex::new(MotionState::new(name, params)),
            wake: Condvar::new(),
            idle: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let thread_inner = inner.clone();
        let thread = thread::Builder::new()
            .name(format!("servo_{}", name))
            .spawn(move || run(thread_inner))
            .map_err(ServoCtrlError::ThreadSpawn)?;

        debug!("[{}] Servo controller started", name);

        Ok(Self {
            inner,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Move channels (all if empty) straight to their home position.
    pub fn snap_to_init(&self, channels: &[u8]) -> Result<(), ServoCtrlError> {
        self.inner.apply(true, |m| m.snap_to_init(channels))
    }

    pub fn set_calibration(&self, channel: u8, calib: ChannelCalib) -> Result<(), ServoCtrlError> {
        self.inner.set_calibration(channel, calib)
    }

    /// Interpolate to absolute goals in `steps` equal steps over `duration`. Returns immediately.
    pub fn drive_timed(
        &self,
        goals: &[(u8, Deg)],
        duration: Duration,
        steps: u32
    ) -> Result<(), ServoCtrlError> {
        self.inner.apply(true, |m| {
            m.request_timed(goals, duration, steps)?;
            Ok(Tick::default())
        })
    }

    /// Interpolate to offsets from the home positions with the default duration and steps.
    pub fn drive_timed_offsets(&self, channels: &[u8], deltas: &[Deg]) -> Result<(), ServoCtrlError> {
        self.inner.apply(true, |m| {
            m.request_timed_offsets(channels, deltas)?;
            Ok(Tick::default())
        })
    }

    /// Move channels to offsets from their home positions at the given speeds. Returns
    /// immediately.
    pub fn drive_at_speed(
        &self,
        channels: &[u8],
        deltas: &[Deg],
        speeds: &[i32]
    ) -> Result<(), ServoCtrlError> {
        self.inner.apply(true, |m| {
            m.request_speed(channels, deltas, speeds)?;
            Ok(Tick::default())
        })
    }

    /// Move a channel continuously until it reaches a limit or [`ServoCtrl::stop`] is called.
    pub fn oscillate(&self, channel: u8, direction: i8, speed: i32) -> Result<(), ServoCtrlError> {
        self.inner.apply(true, |m| {
            m.request_oscillate(channel, direction, speed)?;
            Ok(Tick::default())
        })
    }

    /// Set an absolute angle immediately, then release the channel if it is relaxable.
    pub fn snap_to(&self, channel: u8, angle: Deg) -> Result<(), ServoCtrlError> {
        self.inner.apply(true, |m| m.snap_to(channel, angle))
    }

    /// Set an offset from the home position immediately.
    pub fn move_offset(&self, channel: u8, delta: Deg) -> Result<(), ServoCtrlError> {
        self.inner.apply(true, |m| m.move_offset(channel, delta))
    }

    /// Stop any motion where it is. Safe to call at any time, from any thread, any number of
    /// times.
    pub fn stop(&self) {
        let result = self.inner.apply(false, |m| Ok(Tick {
            relax: m.stop(),
            ..Default::default()
        }));

        if let Err(e) = result {
            warn!("[{}] Stop failed: {}", self.inner.name, e);
        }
    }

    /// Release the hold of the given channels.
    pub fn relax(&self, channels: &[u8]) -> Result<(), ServoCtrlError> {
        self.inner.apply(false, |m| {
            m.relaxed(channels)?;
            Ok(Tick {
                relax: channels.to_vec(),
                ..Default::default()
            })
        })
    }

    pub fn read_position(&self, channel: u8) -> Result<Deg, ServoCtrlError> {
        Ok(lock(&self.inner.motion).channel(channel)?.current)
    }

    /// Copy of a channel's calibration and working state.
    pub fn channel_state(&self, channel: u8) -> Result<Channel, ServoCtrlError> {
        Ok(lock(&self.inner.motion).channel(channel)?.clone())
    }

    pub fn regime(&self) -> RegimeKind {
        lock(&self.inner.motion).regime()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.motion).is_running()
    }

    pub fn num_channels(&self) -> usize {
        lock(&self.inner.motion).num_channels()
    }

    pub fn timed_defaults(&self) -> (Duration, u32) {
        lock(&self.inner.motion).timed_defaults()
    }

    /// Block until the controller is idle, returning false if the timeout elapsed first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut motion = lock(&self.inner.motion);

        while motion.is_running() {
            let now = Instant::now();
            if now >= deadline {
                return false
            }

            motion = match self.inner.idle.wait_timeout(motion, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0
            };
        }
        drop(motion);

        // The tick which went idle may still be writing its output
        drop(lock(&self.inner.io));

        true
    }

    pub fn set_direction(&self, channel: u8, direction: i8) -> Result<(), ServoCtrlError> {
        lock(&self.inner.motion).set_direction(channel, direction)
    }

    pub fn set_relax_enabled(&self, channel: u8, enabled: bool) -> Result<(), ServoCtrlError> {
        lock(&self.inner.motion).set_relax_enabled(channel, enabled)
    }

    pub fn set_timed_defaults(&self, duration: Duration, steps: u32) -> Result<(), ServoCtrlError> {
        lock(&self.inner.motion).set_timed_defaults(duration, steps)
    }

    pub fn set_speed_tick(&self, interval: Duration) -> Result<(), ServoCtrlError> {
        lock(&self.inner.motion).set_speed_tick(interval)
    }

    /// Follow calibration updates of the given channels.
    ///
    /// Calibrations already in the store are applied straight away. The observer only holds a
    /// weak reference, it unregisters itself once the controller is dropped.
    pub fn watch_calibration(
        &self,
        store: &CalibrationStore,
        channels: &[u8]
    ) -> Result<ObserverId, ServoCtrlError> {
        {
            let motion = lock(&self.inner.motion);
            for &ch in channels {
                motion.channel(ch)?;
            }
        }

        let weak = Arc::downgrade(&self.inner);
        let watched = channels.to_vec();
        let id = store.register(move |ch, calib| {
            let inner = match weak.upgrade() {
                Some(i) => i,
                None => return false
            };

            if watched.contains(&ch) {
                if let Err(e) = inner.set_calibration(ch, calib) {
                    warn!("[{}] Calibration update rejected: {}", inner.name, e);
                }
            }
            true
        });

        for &ch in channels {
            if let Some(calib) = store.get(ch) {
                self.set_calibration(ch, calib)?;
            }
        }

        Ok(id)
    }

    /// Stop any motion and terminate the controller thread.
    pub fn shutdown(&mut self) {
        let thread = match self.thread.take() {
            Some(t) => t,
            None => return
        };

        self.stop();

        {
            let _motion = lock(&self.inner.motion);
            self.inner.shutdown.store(true, Ordering::SeqCst);
            self.inner.wake.notify_all();
        }

        if thread.join().is_err() {
            warn!("[{}] Servo thread panicked", self.inner.name);
        }
    }
}

impl Drop for ServoCtrl {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn set_calibration(&self, channel: u8, calib: ChannelCalib) -> Result<(), ServoCtrlError> {
        self.apply(false, |m| m.set_calibration(channel, calib))
    }

    /// Get the driver, binding to the hub on first use.
    fn bind(&self, link: &mut Link) -> Result<PwmHandle, ServoCtrlError> {
        if let Some(ref handle) = link.handle {
            return Ok(handle.clone())
        }

        match self.hub.acquire() {
            Ok(handle) => {
                info!("[{}] Using the {} PWM driver", self.name, handle.kind());
                link.handle = Some(handle.clone());
                link.unavailable_logged = false;
                Ok(handle)
            },
            Err(e) => {
                if !link.unavailable_logged {
                    warn!("[{}] Motion unavailable: {}", self.name, e);
                    link.unavailable_logged = true;
                }
                Err(ServoCtrlError::DriverUnavailable(e.to_string()))
            }
        }
    }

    /// Apply an operation to the motion state and carry out its output.
    ///
    /// If `need_driver` is set the operation fails without touching the state when no driver can
    /// be bound. Otherwise the state is updated regardless and the output is only written if a
    /// driver is already bound.
    fn apply<F>(&self, need_driver: bool, op: F) -> Result<(), ServoCtrlError>
    where
        F: FnOnce(&mut MotionState) -> Result<Tick, ServoCtrlError>
    {
        let mut link = lock(&self.io);

        let handle = if need_driver {
            Some(self.bind(&mut link)?)
        }
        else {
            link.handle.clone()
        };

        let (tick, events) = {
            let mut motion = lock(&self.motion);
            let tick = op(&mut motion)?;

            if motion.is_running() {
                self.wake.notify_all();
            }
            else {
                self.idle.notify_all();
            }

            (tick, motion.take_events())
        };

        self.write(handle.as_ref(), &tick);
        self.publish(events);

        drop(link);
        Ok(())
    }

    /// Compute and carry out one tick of the active motion.
    fn step(&self) -> Next {
        let link = lock(&self.io);

        let (tick, events) = {
            let mut motion = lock(&self.motion);
            let tick = motion.tick();

            if !motion.is_running() {
                self.idle.notify_all();
            }

            (tick, motion.take_events())
        };

        self.write(link.handle.as_ref(), &tick);
        self.publish(events);

        drop(link);
        tick.next
    }

    fn write(&self, handle: Option<&PwmHandle>, tick: &Tick) {
        let handle = match handle {
            Some(h) => h,
            None => return
        };

        for &(ch, angle) in tick.writes.iter() {
            trace!("[{}] channel {} -> {}", self.name, ch, angle);
            if let Err(e) = handle.set_angle(ch, angle as f64) {
                warn!("[{}] Could not write channel {}: {}", self.name, ch, e);
            }
        }

        for &ch in tick.relax.iter() {
            if let Err(e) = handle.relax(ch) {
                warn!("[{}] Could not relax channel {}: {}", self.name, ch, e);
            }
        }
    }

    fn publish(&self, events: Vec<MechEvent>) {
        for event in events.iter() {
            self.tm.publish_event(event);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Controller thread: sleep until a motion is requested, then tick it to completion.
fn run(inner: Arc<Inner>) {
    loop {
        {
            let mut motion = lock(&inner.motion);
            while !motion.is_running() && !inner.shutdown.load(Ordering::SeqCst) {
                motion = inner.wake.wait(motion).unwrap_or_else(PoisonError::into_inner);
            }
        }

        if inner.shutdown.load(Ordering::SeqCst) {
            break
        }

        if let Next::Sleep(duration) = inner.step() {
            inner.clock.sleep(duration);
        }
    }

    debug!("[{}] Servo controller stopped", inner.name);
}
