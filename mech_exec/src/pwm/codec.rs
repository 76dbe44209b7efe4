//! Conversions between logical angles, pulse widths and chip ticks.
//!
//! All functions are pure and saturate rather than fail, the chip silently accepting any value in
//! its tick range.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use util::maths::{clamp, lin_map};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of ticks in one PWM period.
pub const CHIP_TICKS: f64 = 4096.0;

/// Largest tick value which can be written to a channel.
pub const MAX_TICK: u16 = 4095;

/// Logical angle range accepted by [`angle_to_pulse_us`].
pub const ANGLE_RANGE_DEG: (f64, f64) = (0.0, 180.0);

const MICROS_PER_SECOND: f64 = 1_000_000.0;

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Clamp an angle into 0-180 degrees and convert it to a pulse width in microseconds.
pub fn angle_to_pulse_us(angle: f64, min_us: u16, max_us: u16) -> u16 {
    let angle = clamp(&angle, &ANGLE_RANGE_DEG.0, &ANGLE_RANGE_DEG.1);

    lin_map(ANGLE_RANGE_DEG, (min_us as f64, max_us as f64), angle).round() as u16
}

/// Convert a pulse width to chip ticks at the given refresh frequency, clamped to `0..=4095`.
pub fn pulse_us_to_ticks(us: f64, freq_hz: u16) -> u16 {
    let ticks = (us * freq_hz as f64 * CHIP_TICKS / MICROS_PER_SECOND).round();

    clamp(&ticks, &0.0, &(MAX_TICK as f64)) as u16
}

/// Convert an angle straight to the off tick of a servo pulse.
pub fn angle_to_ticks(angle: f64, min_us: u16, max_us: u16, freq_hz: u16) -> u16 {
    pulse_us_to_ticks(angle_to_pulse_us(angle, min_us, max_us) as f64, freq_hz)
}

/// Convert a duty cycle between 0.0 and 1.0 to an off tick.
pub fn duty_to_ticks(duty: f64) -> u16 {
    let duty = if duty.is_nan() { 0.0 } else { clamp(&duty, &0.0, &1.0) };

    (duty * MAX_TICK as f64).round() as u16
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_angle_to_pulse() {
        assert_eq!(angle_to_pulse_us(0.0, 500, 2400), 500);
        assert_eq!(angle_to_pulse_us(90.0, 500, 2400), 1450);
        assert_eq!(angle_to_pulse_us(180.0, 500, 2400), 2400);

        // Saturates outside the logical range
        assert_eq!(angle_to_pulse_us(-20.0, 500, 2400), 500);
        assert_eq!(angle_to_pulse_us(270.0, 500, 2400), 2400);
    }

    #[test]
    fn test_pulse_to_ticks() {
        assert_eq!(pulse_us_to_ticks(500.0, 50), 102);
        assert_eq!(pulse_us_to_ticks(1450.0, 50), 297);
        assert_eq!(pulse_us_to_ticks(2400.0, 50), 492);
        assert_eq!(pulse_us_to_ticks(2400.0, 1000), MAX_TICK);
        assert_eq!(pulse_us_to_ticks(-10.0, 50), 0);

        assert_eq!(angle_to_ticks(90.0, 500, 2400, 50), 297);
    }

    #[test]
    fn test_duty_to_ticks() {
        assert_eq!(duty_to_ticks(0.0), 0);
        assert_eq!(duty_to_ticks(0.5), 2048);
        assert_eq!(duty_to_ticks(1.0), 4095);
        assert_eq!(duty_to_ticks(1.7), 4095);
        assert_eq!(duty_to_ticks(-0.2), 0);
        assert_eq!(duty_to_ticks(std::f64::NAN), 0);
    }
}
