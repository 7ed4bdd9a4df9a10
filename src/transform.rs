//! Axis shaping: normalize → deadzone → expo curve → gain.
//!
//! [`Transformation`] is a pure function object mapping a raw axis value from
//! its hardware range onto `[-1, 1]`. Results are memoized by exact input
//! value, because joysticks tend to rest on the same handful of integers.

use std::cell::RefCell;
use std::collections::HashMap;

/// Callable that returns the axis transformation at `x`.
///
/// Inputs above `max` (or below `min`) produce outputs beyond `±gain`;
/// consumers clamp where that matters.
#[derive(Debug)]
pub struct Transformation {
    min: f64,
    max: f64,
    deadzone: f64,
    gain: f64,
    expo: f64,
    cache: RefCell<HashMap<u64, f64>>,
}

impl Transformation {
    /// `expo` must lie in `[-1, 1]`; the preset surface validates this before
    /// a transformation is ever constructed.
    pub fn new(min: f64, max: f64, deadzone: f64, gain: f64, expo: f64) -> Self {
        debug_assert!((-1.0..=1.0).contains(&expo));
        Self {
            min,
            max,
            deadzone,
            gain,
            expo,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Transform `x` from the input range to `[-gain, gain]`.
    pub fn apply(&self, x: f64) -> f64 {
        let bits = x.to_bits();
        if let Some(y) = self.cache.borrow().get(&bits) {
            return *y;
        }
        let y = self.calc_cubic(self.flatten_deadzone(self.normalize(x))) * self.gain;
        self.cache.borrow_mut().insert(bits, y);
        y
    }

    /// Update the input range, dropping the cache if it changed.
    pub fn set_range(&mut self, min: f64, max: f64) {
        if min != self.min || max != self.max {
            self.cache.borrow_mut().clear();
        }
        self.min = min;
        self.max = max;
    }

    /// Move and scale `x` to be between -1 and 1.
    fn normalize(&self, x: f64) -> f64 {
        if self.min == -1.0 && self.max == 1.0 {
            return x;
        }
        let half_range = (self.max - self.min) / 2.0;
        let middle = half_range + self.min;
        (x - middle) / half_range
    }

    /// Values within `±deadzone` become 0; the rest is rescaled so the output
    /// still reaches ±1 at the range ends.
    fn flatten_deadzone(&self, x: f64) -> f64 {
        if x.abs() <= self.deadzone {
            return 0.0;
        }
        (x - self.deadzone * x.signum()) / (1.0 - self.deadzone)
    }

    /// Cubic expo shaping.
    ///
    /// With `k = expo` and `d = 1 - k`, positive expo applies
    /// `f(x) = d*x + (1 - d)*x³` (flat near the center, steep at the edges).
    /// Negative expo applies the analytic inverse of that cubic with
    /// `d = 1 + k`, mirroring the curve at `y = x`. The function satisfies
    /// `f(1) = 1` and `f(-x) = -f(x)` for all `k` in `[-1, 1]`.
    fn calc_cubic(&self, x: f64) -> f64 {
        let k = self.expo;

        if k == 0.0 || x == 0.0 {
            return x;
        }

        if k > 0.0 {
            let d = 1.0 - k;
            return d * x + (1.0 - d) * x.powi(3);
        }

        // real inverse of y = b*x + a*x³
        let sign = x.signum();
        let x = x.abs();
        let d = 1.0 + k;
        let a = 1.0 - d;
        let b = d;
        let c = ((27.0 * x * x + (4.0 * b.powi(3)) / a).sqrt() + 3f64.powf(1.5) * x).powf(1.0 / 3.0);
        let y = c / (2f64.powf(1.0 / 3.0) * 3f64.sqrt() * a.powf(1.0 / 3.0))
            - (2f64.powf(1.0 / 3.0) * b) / (3f64.sqrt() * a.powf(2.0 / 3.0) * c);
        y * sign
    }
}
