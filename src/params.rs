// src/params.rs

use serde::{Deserialize, Serialize};

/// Vacuum permeability (T·m/A).
pub const MU0: f64 = 4.0 * std::f64::consts::PI * 1e-7;

/// Material constants shared by the reference energy terms (SI units).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub ms: f64,             // saturation magnetisation (A/m)
    pub a_ex: f64,           // exchange stiffness (J/m)
    pub k_u: f64,            // uniaxial anisotropy constant (J/m^3)
    pub easy_axis: [f64; 3], // unit vector
}

impl Default for Material {
    /// Permalloy-like defaults.
    fn default() -> Self {
        Self {
            ms: 8.0e5,
            a_ex: 13e-12,
            k_u: 500.0,
            easy_axis: [0.0, 0.0, 1.0],
        }
    }
}
