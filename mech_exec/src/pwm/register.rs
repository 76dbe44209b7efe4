//! Minimal register-level [`PwmDriver`] implementation.
//!
//! Only the registers needed for servo and motor control are touched: the two mode registers, the
//! prescaler and the per-channel on/off registers.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{sync::Arc, time::Duration};

use log::warn;
use util::time::Clock;

use super::{check_channel, prescale_for, DriverError, DriverKind, Params, PwmDriver};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const MODE1: u8 = 0x00;
const MODE2: u8 = 0x01;
const PRESCALE: u8 = 0xFE;
const LED0_ON_L: u8 = 0x06;
const ALL_LED_ON_L: u8 = 0xFA;
const ALL_LED_OFF_L: u8 = 0xFC;

const MODE1_RESTART: u8 = 0x80;
const MODE1_SLEEP: u8 = 0x10;
const MODE1_ALLCALL: u8 = 0x01;
const MODE2_OUTDRV: u8 = 0x04;

/// Number of registers between two consecutive channels.
const REGS_PER_CHANNEL: u8 = 4;

/// Time for the oscillator to settle after entering or leaving sleep.
const OSC_SETTLE: Duration = Duration::from_millis(5);

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Byte-level access to the chip's registers.
pub trait RegisterBus: Send {
    fn write_byte(&mut self, reg: u8, value: u8) -> Result<(), DriverError>;

    /// Write consecutive registers starting at `reg`, relying on the chip's auto-increment.
    fn write_block(&mut self, reg: u8, data: &[u8]) -> Result<(), DriverError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct RegisterPwm<B: RegisterBus> {
    bus: B,

    clock: Arc<dyn Clock>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<B: RegisterBus> RegisterPwm<B> {
    /// Reset the chip into a known state: every output off, totem pole outputs, all-call enabled.
    pub fn new(bus: B, clock: Arc<dyn Clock>) -> Result<Self, DriverError> {
        let mut pwm = Self { bus, clock };

        pwm.all_off()?;
        pwm.bus.write_byte(MODE2, MODE2_OUTDRV)?;
        pwm.bus.write_byte(MODE1, MODE1_ALLCALL)?;

        Ok(pwm)
    }

    /// Turn every channel off at once.
    pub fn all_off(&mut self) -> Result<(), DriverError> {
        self.bus.write_block(ALL_LED_ON_L, &[0, 0])?;
        self.bus.write_block(ALL_LED_OFF_L, &[0, 0])
    }
}

impl<B: RegisterBus> PwmDriver for RegisterPwm<B> {
    fn kind(&self) -> DriverKind {
        DriverKind::Register
    }

    fn set_channel(&mut self, channel: u8, on_tick: u16, off_tick: u16) -> Result<(), DriverError> {
        check_channel(channel, on_tick, off_tick)?;

        let [on_l, on_h] = on_tick.to_le_bytes();
        let [off_l, off_h] = off_tick.to_le_bytes();

        self.bus.write_block(
            LED0_ON_L + REGS_PER_CHANNEL * channel,
            &[on_l, on_h, off_l, off_h]
        )
    }

    fn set_frequency(&mut self, hz: u16) -> Result<(), DriverError> {
        let prescale = prescale_for(hz)?;

        // The prescaler can only be written while the oscillator is off
        self.bus.write_byte(MODE1, MODE1_ALLCALL | MODE1_SLEEP)?;
        self.clock.sleep(OSC_SETTLE);
        self.bus.write_byte(PRESCALE, prescale)?;
        self.bus.write_byte(MODE1, MODE1_ALLCALL)?;
        self.clock.sleep(OSC_SETTLE);
        self.bus.write_byte(MODE1, MODE1_ALLCALL | MODE1_RESTART)?;
        self.bus.write_byte(MODE2, MODE2_OUTDRV)
    }
}

impl<B: RegisterBus> Drop for RegisterPwm<B> {
    fn drop(&mut self) {
        if let Err(e) = self.all_off() {
            warn!("Could not turn PWM outputs off: {}", e);
        }
    }
}

#[cfg(any(target_arch = "arm", target_arch = "aarch64"))]
impl RegisterBus for rppal::i2c::I2c {
    fn write_byte(&mut self, reg: u8, value: u8) -> Result<(), DriverError> {
        self.smbus_write_byte(reg, value)
            .map_err(|e| DriverError::I2c(format!("{}", e)))
    }

    fn write_block(&mut self, reg: u8, data: &[u8]) -> Result<(), DriverError> {
        let mut buf = Vec::with_capacity(data.len() + 1);
        buf.push(reg);
        buf.extend_from_slice(data);

        self.write(&buf)
            .map(|_| ())
            .map_err(|e| DriverError::I2c(format!("{}", e)))
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Open the chip on the configured Linux I2C bus.
#[cfg(any(target_arch = "arm", target_arch = "aarch64"))]
pub fn open(params: &Params, clock: Arc<dyn Clock>) -> Result<Box<dyn PwmDriver>, DriverError> {
    let mut i2c = rppal::i2c::I2c::with_bus(params.i2c_bus)
        .map_err(|e| DriverError::I2c(format!("{}", e)))?;
    i2c.set_slave_address(params.address as u16)
        .map_err(|e| DriverError::I2c(format!("{}", e)))?;

    Ok(Box::new(RegisterPwm::new(i2c, clock)?))
}

/// Open the chip on the configured Linux I2C bus.
#[cfg(not(any(target_arch = "arm", target_arch = "aarch64")))]
pub fn open(params: &Params, _clock: Arc<dyn Clock>) -> Result<Box<dyn PwmDriver>, DriverError> {
    Err(DriverError::Unavailable(format!(
        "no I2C bus {} support on this platform",
        params.i2c_bus
    )))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, PartialEq)]
    enum Op {
        Byte(u8, u8),
        Block(u8, Vec<u8>),
        Sleep(Duration),
    }

    #[derive(Clone, Default)]
    struct RecordingBus(Arc<Mutex<Vec<Op>>>);

    impl RegisterBus for RecordingBus {
        fn write_byte(&mut self, reg: u8, value: u8) -> Result<(), DriverError> {
            self.0.lock().unwrap().push(Op::Byte(reg, value));
            Ok(())
        }

        fn write_block(&mut self, reg: u8, data: &[u8]) -> Result<(), DriverError> {
            self.0.lock().unwrap().push(Op::Block(reg, data.to_vec()));
            Ok(())
        }
    }

    impl RecordingBus {
        fn take(&self) -> Vec<Op> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }

        /// Clock recording its sleeps in the same log as the bus writes.
        fn clock(&self) -> Arc<dyn Clock> {
            Arc::new(RecordingClock(self.0.clone()))
        }
    }

    struct RecordingClock(Arc<Mutex<Vec<Op>>>);

    impl Clock for RecordingClock {
        fn now(&self) -> Duration {
            Duration::from_secs(0)
        }

        fn sleep(&self, duration: Duration) {
            self.0.lock().unwrap().push(Op::Sleep(duration));
        }
    }

    #[test]
    fn test_init_and_frequency() {
        let bus = RecordingBus::default();
        let mut pwm = RegisterPwm::new(bus.clone(), bus.clock()).unwrap();

        assert_eq!(bus.take(), vec![
            Op::Block(0xFA, vec![0, 0]),
            Op::Block(0xFC, vec![0, 0]),
            Op::Byte(0x01, 0x04),
            Op::Byte(0x00, 0x01),
        ]);

        pwm.set_frequency(50).unwrap();
        assert_eq!(bus.take(), vec![
            Op::Byte(0x00, 0x11),
            Op::Sleep(Duration::from_millis(5)),
            Op::Byte(0xFE, 121),
            Op::Byte(0x00, 0x01),
            Op::Sleep(Duration::from_millis(5)),
            Op::Byte(0x00, 0x81),
            Op::Byte(0x01, 0x04),
        ]);

        assert_eq!(pwm.set_frequency(0), Err(DriverError::InvalidFrequency(0)));
        assert!(bus.take().is_empty());
    }

    #[test]
    fn test_channel_registers() {
        let bus = RecordingBus::default();
        let mut pwm = RegisterPwm::new(bus.clone(), bus.clock()).unwrap();
        bus.take();

        pwm.set_channel(0, 0, 297).unwrap();
        pwm.set_channel(15, 0x0123, 0x0FFF).unwrap();
        assert_eq!(bus.take(), vec![
            Op::Block(0x06, vec![0, 0, 0x29, 0x01]),
            Op::Block(0x42, vec![0x23, 0x01, 0xFF, 0x0F]),
        ]);

        assert_eq!(pwm.set_channel(16, 0, 0), Err(DriverError::InvalidChannel(16)));
        assert!(bus.take().is_empty());

        // Outputs are turned off when the driver is dropped
        drop(pwm);
        assert_eq!(bus.take(), vec![
            Op::Block(0xFA, vec![0, 0]),
            Op::Block(0xFC, vec![0, 0]),
        ]);
    }
}
