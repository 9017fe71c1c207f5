// src/energy/anisotropy.rs

use crate::energy::{ChunkEnergy, ThreadAux};
use crate::error::Result;
use crate::params::{Material, MU0};
use crate::roles::CellIo;
use crate::state::SimState;
use crate::vec3::{dot, normalize, scale, V3};

/// Uniaxial anisotropy.
///
/// For w_ani = K_u [1 - (m·u)^2], we get:
///   H_ani = (2 K_u / (μ0 M_s)) (m·u) u
pub struct UniaxialAnisotropy {
    name: String,
    k_u: f64,
    axis: V3,
}

impl UniaxialAnisotropy {
    pub fn new(name: impl Into<String>, k_u: f64, axis: V3) -> Self {
        Self {
            name: name.into(),
            k_u,
            axis: normalize(axis),
        }
    }

    pub fn from_material(name: impl Into<String>, mat: &Material) -> Self {
        Self::new(name, mat.k_u, mat.easy_axis)
    }
}

impl ChunkEnergy for UniaxialAnisotropy {
    fn name(&self) -> &str {
        &self.name
    }

    fn compute_chunk(
        &self,
        state: &SimState,
        io: &mut CellIo<'_>,
        aux: &mut ThreadAux,
        _thread_id: usize,
    ) -> Result<()> {
        let u = self.axis;
        let coeff = 2.0 * self.k_u / MU0;
        for i in io.range() {
            let ms_inv = state.ms_inverse[i];
            if ms_inv == 0.0 {
                io.record_zero(i);
                continue;
            }
            let mdotu = dot(state.spin[i], u);
            let e = self.k_u * (1.0 - mdotu * mdotu);
            io.record(i, e, scale(coeff * ms_inv * mdotu, u));
            aux.energy_total += e * state.mesh.volume(i);
        }
        Ok(())
    }
}
