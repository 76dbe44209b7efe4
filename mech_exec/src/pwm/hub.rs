//! # PWM Hub
//!
//! The hub is the single owner of the PWM chip. Servo and drive controllers all borrow the same
//! driver through clonable [`PwmHandle`]s, so register writes from different controllers are
//! serialised instead of racing on the bus.
//!
//! The chip is acquired lazily: the first controller to need it triggers acquisition, which tries
//! each registered driver in order of preference and falls back to the next on failure. A failed
//! acquisition is not retried until the rebind interval has elapsed.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use util::time::{secs_to_duration, Clock};

use super::{codec, sim::SimulatedPwm, DriverError, DriverKind, Params, PwmDriver};
use crate::lock;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Time the health check pulse is held before the channel is released.
const HEALTH_CHECK_HOLD: Duration = Duration::from_millis(20);

/// Angle the health check moves its channel to.
const HEALTH_CHECK_ANGLE_DEG: f64 = 90.0;

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Function which attempts to open a driver for the chip.
pub type DriverFactory =
    Box<dyn Fn(&Params) -> Result<Box<dyn PwmDriver>, DriverError> + Send + Sync>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Process-wide owner of the PWM chip.
pub struct PwmHub {
    params: Params,

    clock: Arc<dyn Clock>,

    /// Driver factories in order of preference
    factories: Vec<(DriverKind, DriverFactory)>,

    state: Mutex<HubState>,
}

#[derive(Default)]
struct HubState {
    handle: Option<PwmHandle>,

    /// Time and reason of the last failed acquisition
    last_failure: Option<(Duration, String)>,
}

/// Shared access to the bound PWM driver.
///
/// Every write locks the driver for its duration, so handles can be used from any thread.
#[derive(Clone)]
pub struct PwmHandle {
    kind: DriverKind,
    driver: Arc<Mutex<Box<dyn PwmDriver>>>,
    reserved: Arc<Vec<u8>>,
    freq_hz: u16,
    min_pulse_us: u16,
    max_pulse_us: u16,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PwmHub {
    /// Create a hub with no drivers registered.
    pub fn new(params: Params, clock: Arc<dyn Clock>) -> Self {
        Self {
            params,
            clock,
            factories: Vec::new(),
            state: Mutex::new(HubState::default()),
        }
    }

    /// Create a hub which tries the `pwm-pca9685` driver first and falls back to the register-level
    /// driver.
    pub fn with_hardware(params: Params, clock: Arc<dyn Clock>) -> Self {
        let register_clock = clock.clone();

        Self::new(params, clock)
            .with_driver(DriverKind::Pca9685, super::pca9685::open)
            .with_driver(DriverKind::Register, move |p: &Params| {
                super::register::open(p, register_clock.clone())
            })
    }

    /// Register another driver, tried after those already registered.
    pub fn with_driver<F>(mut self, kind: DriverKind, factory: F) -> Self
    where
        F: Fn(&Params) -> Result<Box<dyn PwmDriver>, DriverError> + Send + Sync + 'static
    {
        self.factories.push((kind, Box::new(factory)));
        self
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The bound driver, without attempting acquisition.
    pub fn current(&self) -> Option<PwmHandle> {
        lock(&self.state).handle.clone()
    }

    /// Get a handle to the chip, acquiring it if this has not been done yet.
    pub fn acquire(&self) -> Result<PwmHandle, DriverError> {
        let mut state = lock(&self.state);

        if let Some(ref handle) = state.handle {
            return Ok(handle.clone())
        }

        let now = self.clock.now();
        if let Some((failed_at, ref reason)) = state.last_failure {
            if now.saturating_sub(failed_at) < secs_to_duration(self.params.rebind_interval_s) {
                return Err(DriverError::Unavailable(reason.clone()))
            }
        }

        let mut reasons: Vec<String> = Vec::new();

        for (kind, factory) in self.factories.iter() {
            let opened = factory(&self.params).and_then(|mut driver| {
                driver.set_frequency(self.params.freq_hz)?;
                Ok(driver)
            });

            match opened {
                Ok(driver) => {
                    if reasons.is_empty() {
                        info!("Using {} PWM driver", kind);
                    }
                    else {
                        warn!("Fallback to {} PWM driver: {}", kind, reasons.join("; "));
                    }

                    let handle = PwmHandle::new(*kind, driver, &self.params);
                    self.health_check(&handle);

                    state.handle = Some(handle.clone());
                    state.last_failure = None;
                    return Ok(handle)
                }
                Err(e) => {
                    debug!("{} PWM driver unavailable: {}", kind, e);
                    reasons.push(format!("{}: {}", kind, e));
                }
            }
        }

        let reason = if reasons.is_empty() {
            String::from("no PWM drivers registered")
        }
        else {
            reasons.join("; ")
        };

        if self.params.bench_mode {
            warn!("No PWM chip available ({}), bench mode so outputs are simulated", reason);

            let handle = PwmHandle::new(
                DriverKind::Simulated,
                Box::new(SimulatedPwm::new()),
                &self.params
            );
            state.handle = Some(handle.clone());
            return Ok(handle)
        }

        state.last_failure = Some((now, reason.clone()));
        Err(DriverError::Unavailable(reason))
    }

    /// Pulse the health check channel to mid position then release it.
    ///
    /// Failures are only logged, a channel which cannot be written will show up again on the
    /// first real command.
    fn health_check(&self, handle: &PwmHandle) {
        let channel = match self.params.health_check_channel {
            Some(c) => c,
            None => return
        };

        if let Err(e) = handle.set_angle(channel, HEALTH_CHECK_ANGLE_DEG) {
            warn!("PWM health check failed on channel {}: {}", channel, e);
        }
        self.clock.sleep(HEALTH_CHECK_HOLD);
        if let Err(e) = handle.relax(channel) {
            warn!("Could not release health check channel {}: {}", channel, e);
        }
    }
}

impl PwmHandle {
    fn new(kind: DriverKind, driver: Box<dyn PwmDriver>, params: &Params) -> Self {
        Self {
            kind,
            driver: Arc::new(Mutex::new(driver)),
            reserved: Arc::new(params.reserved_channels.clone()),
            freq_hz: params.freq_hz,
            min_pulse_us: params.servo_min_pulse_us,
            max_pulse_us: params.servo_max_pulse_us,
        }
    }

    pub fn kind(&self) -> DriverKind {
        self.kind
    }

    /// True if writes to this channel are skipped.
    pub fn is_reserved(&self, channel: u8) -> bool {
        self.reserved.contains(&channel)
    }

    /// Raw channel write. Writes to reserved channels are silently dropped.
    pub fn set_channel(&self, channel: u8, on_tick: u16, off_tick: u16) -> Result<(), DriverError> {
        if self.is_reserved(channel) {
            return Ok(())
        }

        lock(&self.driver).set_channel(channel, on_tick, off_tick)
    }

    /// Drive a servo channel to a logical angle.
    pub fn set_angle(&self, channel: u8, angle_deg: f64) -> Result<(), DriverError> {
        let ticks = codec::angle_to_ticks(
            angle_deg,
            self.min_pulse_us,
            self.max_pulse_us,
            self.freq_hz
        );

        self.set_channel(channel, 0, ticks)
    }

    /// Set a channel's duty cycle, between 0.0 and 1.0.
    pub fn set_duty(&self, channel: u8, duty: f64) -> Result<(), DriverError> {
        self.set_channel(channel, 0, codec::duty_to_ticks(duty))
    }

    /// Turn a channel's output off, releasing any servo hold.
    pub fn relax(&self, channel: u8) -> Result<(), DriverError> {
        self.set_channel(channel, 0, 0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pwm::mock::{MockPwm, PwmWrite, WriteLog};
    use util::time::SimClock;

    fn params() -> Params {
        Params {
            health_check_channel: None,
            ..Default::default()
        }
    }

    #[test]
    fn test_prefers_first_driver() -> Result<(), DriverError> {
        let log = WriteLog::default();
        let log_2 = log.clone();
        let hub = PwmHub::new(params(), Arc::new(SimClock::new()))
            .with_driver(DriverKind::Pca9685, move |_: &Params| {
                Ok(Box::new(MockPwm::new(DriverKind::Pca9685, log_2.clone())) as Box<dyn PwmDriver>)
            })
            .with_driver(DriverKind::Register, |_: &Params| {
                Err(DriverError::I2c("should not be tried".into()))
            });

        let handle = hub.acquire()?;
        assert_eq!(handle.kind(), DriverKind::Pca9685);
        assert_eq!(log.frequencies(), vec![50]);

        // Second acquisition hands out the same driver
        let again = hub.acquire()?;
        again.set_angle(0, 90.0)?;
        assert_eq!(log.writes(), vec![PwmWrite { channel: 0, on: 0, off: 297 }]);

        Ok(())
    }

    #[test]
    fn test_falls_back() -> Result<(), DriverError> {
        let log = WriteLog::default();
        let log_2 = log.clone();
        let hub = PwmHub::new(params(), Arc::new(SimClock::new()))
            .with_driver(DriverKind::Pca9685, |_: &Params| {
                Err(DriverError::I2c("no such device".into()))
            })
            .with_driver(DriverKind::Register, move |_: &Params| {
                Ok(Box::new(MockPwm::new(DriverKind::Register, log_2.clone())) as Box<dyn PwmDriver>)
            });

        assert_eq!(hub.acquire()?.kind(), DriverKind::Register);
        assert_eq!(hub.current().map(|h| h.kind()), Some(DriverKind::Register));

        Ok(())
    }

    #[test]
    fn test_unavailable_retry_interval() {
        let clock = Arc::new(SimClock::new());
        let hub = PwmHub::new(params(), clock.clone())
            .with_driver(DriverKind::Pca9685, |_: &Params| {
                Err(DriverError::I2c("no such device".into()))
            });

        assert!(matches!(hub.acquire(), Err(DriverError::Unavailable(_))));
        assert!(hub.current().is_none());

        // Within the rebind interval the failure is returned without retrying
        clock.advance(Duration::from_secs(1));
        assert!(matches!(hub.acquire(), Err(DriverError::Unavailable(_))));

        clock.advance(Duration::from_secs(5));
        assert!(matches!(hub.acquire(), Err(DriverError::Unavailable(_))));
    }

    #[test]
    fn test_bench_mode() -> Result<(), DriverError> {
        let hub = PwmHub::new(
            Params { bench_mode: true, ..params() },
            Arc::new(SimClock::new())
        );

        let handle = hub.acquire()?;
        assert_eq!(handle.kind(), DriverKind::Simulated);
        handle.set_angle(3, 45.0)?;

        Ok(())
    }

    #[test]
    fn test_reserved_and_health_check() -> Result<(), DriverError> {
        let log = WriteLog::default();
        let log_2 = log.clone();
        let hub = PwmHub::new(Params::default(), Arc::new(SimClock::new()))
            .with_driver(DriverKind::Pca9685, move |_: &Params| {
                Ok(Box::new(MockPwm::new(DriverKind::Pca9685, log_2.clone())) as Box<dyn PwmDriver>)
            });

        let handle = hub.acquire()?;

        // Health check pulses channel 0 to mid position then releases it
        assert_eq!(log.writes(), vec![
            PwmWrite { channel: 0, on: 0, off: 297 },
            PwmWrite { channel: 0, on: 0, off: 0 },
        ]);

        // Channel 5 is reserved by default
        handle.set_angle(5, 10.0)?;
        handle.set_duty(6, 1.0)?;
        assert_eq!(log.writes().len(), 3);
        assert_eq!(log.writes()[2], PwmWrite { channel: 6, on: 0, off: 4095 });

        Ok(())
    }
}
