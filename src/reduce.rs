// src/reduce.rs
//
// Reductions used when merging per-thread partial results.
//
// MaxTorqueSq tracks max |t|^2 without overflowing: a sub-block whose squared
// magnitudes are not finite is rescaled so the stored value stays finite,
// and the value is kept alongside the inverse of the scale applied.
// Stored pair (sq, inv_scale) stands for |t|_max = sqrt(sq) / inv_scale.

use std::iter::Sum;
use std::ops::AddAssign;

use crate::error::{EnergyError, Result};
use crate::vec3::{norm_sq, V3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaxTorqueSq {
    pub sq: f64,
    pub inv_scale: f64,
}

impl Default for MaxTorqueSq {
    fn default() -> Self {
        Self {
            sq: 0.0,
            inv_scale: 1.0,
        }
    }
}

impl MaxTorqueSq {
    /// Fold `other` into `self`, comparing through the ratio of the two
    /// inverse scales. The result always lives in the coarser frame (the
    /// smaller inverse scale), so the conversion factor is at most 1 and the
    /// comparison itself cannot overflow.
    pub fn merge(&mut self, other: MaxTorqueSq) {
        if other.sq == 0.0 {
            return;
        }
        if other.inv_scale >= self.inv_scale {
            let r = self.inv_scale / other.inv_scale;
            let candidate = other.sq * r * r;
            if candidate > self.sq {
                self.sq = candidate;
            }
        } else {
            let r = other.inv_scale / self.inv_scale;
            let mine = self.sq * r * r;
            self.sq = mine.max(other.sq);
            self.inv_scale = other.inv_scale;
        }
    }

    /// max |t| in physical units. Saturates at f64::MAX when the true value
    /// is beyond the representable range.
    pub fn magnitude(&self) -> f64 {
        let m = self.sq.sqrt() / self.inv_scale;
        if m.is_finite() {
            m
        } else {
            f64::MAX
        }
    }

    pub fn is_rescaled(&self) -> bool {
        self.inv_scale != 1.0
    }
}

/// max |t|^2 over `torque[k]` for cells with `active(k)`. `base` is the mesh
/// index of `torque[0]`, used only for error reporting.
///
/// Falls back to a rescaled pass if any squared magnitude is not finite;
/// fails only if a raw component is itself not finite.
pub fn block_max_torque_sq(
    torque: &[V3],
    base: usize,
    active: impl Fn(usize) -> bool,
) -> Result<MaxTorqueSq> {
    let mut max_sq = 0.0f64;
    let mut overflowed = false;
    for (k, t) in torque.iter().enumerate() {
        if !active(k) {
            continue;
        }
        let sq = norm_sq(*t);
        if !sq.is_finite() {
            overflowed = true;
            break;
        }
        if sq > max_sq {
            max_sq = sq;
        }
    }
    if !overflowed {
        return Ok(MaxTorqueSq {
            sq: max_sq,
            inv_scale: 1.0,
        });
    }

    // Quarter sums keep |x|+|y|+|z| representable for any finite components.
    let mut scale = 0.0f64;
    for (k, t) in torque.iter().enumerate() {
        if !active(k) {
            continue;
        }
        for &c in t {
            if !c.is_finite() {
                return Err(EnergyError::NumericOverflow {
                    index: base + k,
                    component: c,
                });
            }
        }
        let s = 0.25 * t[0].abs() + 0.25 * t[1].abs() + 0.25 * t[2].abs();
        if s > scale {
            scale = s;
        }
    }
    let inv_scale = 1.0 / scale;

    let mut sq = 0.0f64;
    for (k, t) in torque.iter().enumerate() {
        if !active(k) {
            continue;
        }
        let u = [t[0] * inv_scale, t[1] * inv_scale, t[2] * inv_scale];
        let s = norm_sq(u);
        if s > sq {
            sq = s;
        }
    }
    Ok(MaxTorqueSq { sq, inv_scale })
}

/// Neumaier-compensated running sum for energy totals.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompensatedSum {
    sum: f64,
    comp: f64,
}

impl CompensatedSum {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add(&mut self, x: f64) {
        let t = self.sum + x;
        if self.sum.abs() >= x.abs() {
            self.comp += (self.sum - t) + x;
        } else {
            self.comp += (x - t) + self.sum;
        }
        self.sum = t;
    }

    pub fn value(&self) -> f64 {
        self.sum + self.comp
    }
}

impl AddAssign<f64> for CompensatedSum {
    fn add_assign(&mut self, x: f64) {
        self.add(x);
    }
}

impl Sum<f64> for CompensatedSum {
    fn sum<I: Iterator<Item = f64>>(iter: I) -> Self {
        let mut acc = CompensatedSum::new();
        for x in iter {
            acc.add(x);
        }
        acc
    }
}
