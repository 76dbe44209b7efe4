//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float
{
    target_range.0
        + ((value - source_range.0)
        * (target_range.1 - target_range.0)
        / (source_range.1 - source_range.0))
}

/// Clamp a value into `[min, max]`.
pub fn clamp<T>(value: &T, min: &T, max: &T) -> T
where
    T: PartialOrd + Copy
{
    let mut ret = *value;

    if ret > *max {
        ret = *max
    }
    if ret < *min {
        ret = *min
    }

    ret
}

/// Move `current` towards `target` by at most `max_delta`, never stepping past the target.
pub fn step_towards<T>(current: T, target: T, max_delta: T) -> T
where
    T: Float
{
    if target > current + max_delta {
        current + max_delta
    }
    else if target < current - max_delta {
        current - max_delta
    }
    else {
        target
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lin_map() {
        assert_eq!(lin_map((0f64, 180f64), (500f64, 2400f64), 0f64), 500f64);
        assert_eq!(lin_map((0f64, 180f64), (500f64, 2400f64), 180f64), 2400f64);
        assert_eq!(lin_map((0f64, 180f64), (500f64, 2400f64), 90f64), 1450f64);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(&200, &0, &180), 180);
        assert_eq!(clamp(&-3, &0, &180), 0);
        assert_eq!(clamp(&42.5, &0.0, &180.0), 42.5);
    }

    #[test]
    fn test_step_towards() {
        assert_eq!(step_towards(0f64, 80f64, 4f64), 4f64);
        assert_eq!(step_towards(78f64, 80f64, 4f64), 80f64);
        assert_eq!(step_towards(10f64, -10f64, 4f64), 6f64);
        assert_eq!(step_towards(-8f64, -10f64, 4f64), -10f64);
    }
}
