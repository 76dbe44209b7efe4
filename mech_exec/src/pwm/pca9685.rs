//! [`PwmDriver`] implementation on top of the `pwm-pca9685` crate.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fmt::Debug;

use embedded_hal::blocking::i2c::{Write, WriteRead};
use pwm_pca9685::{Address, Channel, Pca9685};

use super::{check_channel, prescale_for, DriverError, DriverKind, Params, PwmDriver};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// PCA9685 chip accessed through any `embedded-hal` I2C bus.
pub struct Pca9685Pwm<I2C> {
    chip: Pca9685<I2C>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<I2C, E> Pca9685Pwm<I2C>
where
    I2C: Write<Error = E> + WriteRead<Error = E>,
    E: Debug
{
    /// Take ownership of the bus and wake the chip at the given address.
    pub fn new(i2c: I2C, address: u8) -> Result<Self, DriverError> {
        let mut chip = Pca9685::new(i2c, Address::from(address))
            .map_err(map_err)?;

        chip.enable().map_err(map_err)?;

        Ok(Self { chip })
    }
}

impl<I2C, E> PwmDriver for Pca9685Pwm<I2C>
where
    I2C: Write<Error = E> + WriteRead<Error = E> + Send,
    E: Debug
{
    fn kind(&self) -> DriverKind {
        DriverKind::Pca9685
    }

    fn set_channel(&mut self, channel: u8, on_tick: u16, off_tick: u16) -> Result<(), DriverError> {
        check_channel(channel, on_tick, off_tick)?;

        self.chip
            .set_channel_on_off(to_channel(channel)?, on_tick, off_tick)
            .map_err(map_err)
    }

    fn set_frequency(&mut self, hz: u16) -> Result<(), DriverError> {
        let prescale = prescale_for(hz)?;

        // The prescale register can only be written while the oscillator is asleep
        self.chip.disable().map_err(map_err)?;
        self.chip.set_prescale(prescale).map_err(map_err)?;
        self.chip.enable().map_err(map_err)
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Open the chip on the configured Linux I2C bus.
#[cfg(any(target_arch = "arm", target_arch = "aarch64"))]
pub fn open(params: &Params) -> Result<Box<dyn PwmDriver>, DriverError> {
    let i2c = rppal::i2c::I2c::with_bus(params.i2c_bus)
        .map_err(|e| DriverError::I2c(format!("{}", e)))?;

    Ok(Box::new(Pca9685Pwm::new(i2c, params.address)?))
}

/// Open the chip on the configured Linux I2C bus.
#[cfg(not(any(target_arch = "arm", target_arch = "aarch64")))]
pub fn open(params: &Params) -> Result<Box<dyn PwmDriver>, DriverError> {
    Err(DriverError::Unavailable(format!(
        "no I2C bus {} support on this platform",
        params.i2c_bus
    )))
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn map_err<E: Debug>(e: pwm_pca9685::Error<E>) -> DriverError {
    match e {
        pwm_pca9685::Error::I2C(e) => DriverError::I2c(format!("{:?}", e)),
        pwm_pca9685::Error::InvalidInputData => DriverError::I2c(String::from("invalid input data")),
    }
}

fn to_channel(channel: u8) -> Result<Channel, DriverError> {
    Ok(match channel {
        0 => Channel::C0,
        1 => Channel::C1,
        2 => Channel::C2,
        3 => Channel::C3,
        4 => Channel::C4,
        5 => Channel::C5,
        6 => Channel::C6,
        7 => Channel::C7,
        8 => Channel::C8,
        9 => Channel::C9,
        10 => Channel::C10,
        11 => Channel::C11,
        12 => Channel::C12,
        13 => Channel::C13,
        14 => Channel::C14,
        15 => Channel::C15,
        c => return Err(DriverError::InvalidChannel(c))
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_channel_mapping() {
        assert!(matches!(to_channel(0), Ok(Channel::C0)));
        assert!(matches!(to_channel(15), Ok(Channel::C15)));
        assert!(matches!(to_channel(16), Err(DriverError::InvalidChannel(16))));
    }

    #[cfg(not(any(target_arch = "arm", target_arch = "aarch64")))]
    #[test]
    fn test_open_unsupported() {
        assert!(matches!(open(&Params::default()), Err(DriverError::Unavailable(_))));
    }
}
