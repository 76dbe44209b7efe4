//! Recording driver used by the tests of the controllers.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use util::time::Clock;

use super::{check_channel, DriverError, DriverKind, Params, PwmDriver, PwmHub};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmWrite {
    pub channel: u8,
    pub on: u16,
    pub off: u16,
}

/// Shared record of everything written through a [`MockPwm`].
#[derive(Clone, Default)]
pub struct WriteLog {
    writes: Arc<Mutex<Vec<PwmWrite>>>,
    frequencies: Arc<Mutex<Vec<u16>>>,
    failing: Arc<AtomicBool>,
}

pub struct MockPwm {
    kind: DriverKind,
    log: WriteLog,
}

impl WriteLog {
    pub fn writes(&self) -> Vec<PwmWrite> {
        self.writes.lock().unwrap().clone()
    }

    /// Off ticks written to one channel, in order.
    pub fn channel(&self, channel: u8) -> Vec<u16> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.channel == channel)
            .map(|w| w.off)
            .collect()
    }

    pub fn frequencies(&self) -> Vec<u16> {
        self.frequencies.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.writes.lock().unwrap().clear();
    }

    /// Make every following write fail with an I2C error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl MockPwm {
    pub fn new(kind: DriverKind, log: WriteLog) -> Self {
        Self { kind, log }
    }
}

impl PwmDriver for MockPwm {
    fn kind(&self) -> DriverKind {
        self.kind
    }

    fn set_channel(&mut self, channel: u8, on_tick: u16, off_tick: u16) -> Result<(), DriverError> {
        check_channel(channel, on_tick, off_tick)?;
        if self.log.failing.load(Ordering::SeqCst) {
            return Err(DriverError::I2c("bus fault".into()))
        }

        self.log.writes.lock().unwrap().push(PwmWrite { channel, on: on_tick, off: off_tick });
        Ok(())
    }

    fn set_frequency(&mut self, hz: u16) -> Result<(), DriverError> {
        self.log.frequencies.lock().unwrap().push(hz);
        Ok(())
    }
}

/// Hub bound to a recording driver, with the health check disabled.
pub fn mock_hub(clock: Arc<dyn Clock>) -> (Arc<PwmHub>, WriteLog) {
    let log = WriteLog::default();
    let log_2 = log.clone();

    let params = Params {
        health_check_channel: None,
        ..Default::default()
    };

    let hub = PwmHub::new(params, clock).with_driver(DriverKind::Pca9685, move |_: &Params| {
        Ok(Box::new(MockPwm::new(DriverKind::Pca9685, log_2.clone())) as Box<dyn PwmDriver>)
    });

    (Arc::new(hub), log)
}

/// Hub with no driver which can ever be bound.
pub fn dead_hub(clock: Arc<dyn Clock>) -> Arc<PwmHub> {
    let params = Params {
        health_check_channel: None,
        ..Default::default()
    };

    Arc::new(PwmHub::new(params, clock))
}
