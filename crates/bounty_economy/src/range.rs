//! # Range Roller
//!
//! Rolls a scalar inside a declared `[min, max]` range, aligned to a multiple.
//!
//! Alignment is a **floor**: the drawn value is pushed DOWN to the nearest
//! multiple (`v -= v % multiple`, or `floor(v / multiple) * multiple` for
//! floats). The realized maximum is therefore always `<= max`, and a small
//! range with a large multiple can land below `min`:
//!
//! ```text
//! roll_int64(0, 9, 5)   -> {0, 5}
//! roll_int64(6, 9, 5)   -> {5}      (below min)
//! ```
//!
//! A `multiple <= 0` is treated as `1` (`1.0` for floats). `min == max`
//! returns `min` without consuming randomness.

use serde::{Deserialize, Serialize};

use crate::random::RandomSource;

/// Rolls an `i64` in `[min, max]`, floor-aligned to `multiple`.
#[must_use]
pub fn roll_int64(rng: &dyn RandomSource, min: i64, max: i64, multiple: i64) -> i64 {
    if max <= min {
        return min;
    }
    let multiple = if multiple <= 0 { 1 } else { multiple };
    let value = rng.int_inclusive(min, max);
    value - value % multiple
}

/// Rolls an `i32` in `[min, max]`, floor-aligned to `multiple`.
#[must_use]
pub fn roll_int32(rng: &dyn RandomSource, min: i32, max: i32, multiple: i32) -> i32 {
    if max <= min {
        return min;
    }
    let multiple = if multiple <= 0 { 1 } else { multiple };
    // The draw is within [min, max] so the narrowing cannot fail.
    let value = i32::try_from(rng.int_inclusive(i64::from(min), i64::from(max))).unwrap_or(min);
    value - value % multiple
}

/// Rolls a `u64` in `[min, max]`, floor-aligned to `multiple`.
#[must_use]
pub fn roll_uint64(rng: &dyn RandomSource, min: u64, max: u64, multiple: u64) -> u64 {
    if max <= min {
        return min;
    }
    let multiple = multiple.max(1);
    let value = rng.uint_inclusive(min, max);
    value - value % multiple
}

/// Rolls an `f64` in `[min, max]`, floor-aligned to `multiple`.
#[must_use]
pub fn roll_float64(rng: &dyn RandomSource, min: f64, max: f64, multiple: f64) -> f64 {
    if max <= min {
        return min;
    }
    let multiple = if multiple <= 0.0 { 1.0 } else { multiple };
    let value = rng.float_inclusive(min, max);
    (value / multiple).floor() * multiple
}

/// Declared `i64` range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeInt64 {
    /// Lower bound (inclusive).
    pub min: i64,
    /// Upper bound (inclusive).
    pub max: i64,
    /// Alignment; `<= 0` means 1.
    #[serde(default)]
    pub multiple: i64,
}

impl RangeInt64 {
    /// A range that always yields `value`.
    #[must_use]
    pub const fn fixed(value: i64) -> Self {
        Self { min: value, max: value, multiple: 1 }
    }

    /// A range with unit alignment.
    #[must_use]
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max, multiple: 1 }
    }

    /// Rolls a value from this range.
    #[must_use]
    pub fn roll(&self, rng: &dyn RandomSource) -> i64 {
        roll_int64(rng, self.min, self.max, self.multiple)
    }

    /// `min <= max`.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.min <= self.max
    }
}

/// Declared `i32` range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeInt32 {
    /// Lower bound (inclusive).
    pub min: i32,
    /// Upper bound (inclusive).
    pub max: i32,
    /// Alignment; `<= 0` means 1.
    #[serde(default)]
    pub multiple: i32,
}

impl RangeInt32 {
    /// A range that always yields `value`.
    #[must_use]
    pub const fn fixed(value: i32) -> Self {
        Self { min: value, max: value, multiple: 1 }
    }

    /// Rolls a value from this range.
    #[must_use]
    pub fn roll(&self, rng: &dyn RandomSource) -> i32 {
        roll_int32(rng, self.min, self.max, self.multiple)
    }

    /// `min <= max`.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.min <= self.max
    }
}

/// Declared `u64` range (durations).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeUInt64 {
    /// Lower bound (inclusive).
    pub min: u64,
    /// Upper bound (inclusive).
    pub max: u64,
    /// Alignment; `0` means 1.
    #[serde(default)]
    pub multiple: u64,
}

impl RangeUInt64 {
    /// A range that always yields `value`.
    #[must_use]
    pub const fn fixed(value: u64) -> Self {
        Self { min: value, max: value, multiple: 1 }
    }

    /// Rolls a value from this range.
    #[must_use]
    pub fn roll(&self, rng: &dyn RandomSource) -> u64 {
        roll_uint64(rng, self.min, self.max, self.multiple)
    }

    /// `min <= max`.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.min <= self.max
    }
}

/// Declared `f64` range (numeric item properties).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeFloat64 {
    /// Lower bound (inclusive).
    pub min: f64,
    /// Upper bound (inclusive).
    pub max: f64,
    /// Alignment; `<= 0.0` means 1.0.
    #[serde(default)]
    pub multiple: f64,
}

impl RangeFloat64 {
    /// Rolls a value from this range.
    #[must_use]
    pub fn roll(&self, rng: &dyn RandomSource) -> f64 {
        roll_float64(rng, self.min, self.max, self.multiple)
    }

    /// `min <= max` and both bounds finite.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::ChaChaSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts how often the roller asked for randomness.
    struct CountingSource {
        inner: ChaChaSource,
        draws: AtomicUsize,
    }

    impl RandomSource for CountingSource {
        fn next_u64(&self) -> u64 {
            self.draws.fetch_add(1, Ordering::SeqCst);
            self.inner.next_u64()
        }
        fn int_inclusive(&self, min: i64, max: i64) -> i64 {
            self.draws.fetch_add(1, Ordering::SeqCst);
            self.inner.int_inclusive(min, max)
        }
        fn uint_inclusive(&self, min: u64, max: u64) -> u64 {
            self.draws.fetch_add(1, Ordering::SeqCst);
            self.inner.uint_inclusive(min, max)
        }
        fn float_inclusive(&self, min: f64, max: f64) -> f64 {
            self.draws.fetch_add(1, Ordering::SeqCst);
            self.inner.float_inclusive(min, max)
        }
        fn below(&self, bound: u64) -> u64 {
            self.draws.fetch_add(1, Ordering::SeqCst);
            self.inner.below(bound)
        }
    }

    #[test]
    fn test_fixed_range_consumes_no_randomness() {
        let rng = CountingSource {
            inner: ChaChaSource::seeded(1),
            draws: AtomicUsize::new(0),
        };
        for _ in 0..100 {
            assert_eq!(roll_int64(&rng, 10, 10, 1), 10);
            assert_eq!(roll_int32(&rng, -4, -4, 3), -4);
            assert_eq!(roll_uint64(&rng, 9, 9, 0), 9);
            assert!((roll_float64(&rng, 2.5, 2.5, 1.0) - 2.5).abs() < f64::EPSILON);
        }
        assert_eq!(rng.draws.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_floor_alignment() {
        let rng = ChaChaSource::seeded(42);
        for _ in 0..10_000 {
            let v = roll_int64(&rng, 0, 9, 5);
            assert!(v == 0 || v == 5, "got {v}");
        }
    }

    #[test]
    fn test_alignment_can_fall_below_min() {
        let rng = ChaChaSource::seeded(42);
        for _ in 0..1_000 {
            assert_eq!(roll_int64(&rng, 6, 9, 5), 5);
        }
    }

    #[test]
    fn test_non_positive_multiple_is_one() {
        let rng = ChaChaSource::seeded(9);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..5_000 {
            seen.insert(roll_int64(&rng, 1, 4, 0));
            seen.insert(roll_int64(&rng, 1, 4, -3));
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_float_alignment() {
        let rng = ChaChaSource::seeded(5);
        for _ in 0..5_000 {
            let v = roll_float64(&rng, 0.0, 10.0, 2.5);
            assert!(v >= 0.0 && v <= 10.0);
            assert!((v / 2.5 - (v / 2.5).round()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_inverted_range_returns_min() {
        let rng = ChaChaSource::seeded(5);
        assert_eq!(roll_int64(&rng, 8, 3, 1), 8);
        assert_eq!(RangeUInt64 { min: 10, max: 2, multiple: 1 }.roll(&rng), 10);
        assert!(!RangeInt64::new(8, 3).is_valid());
    }
}
