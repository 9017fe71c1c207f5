// src/energy/zeeman.rs

use crate::energy::{ChunkEnergy, ThreadAux};
use crate::error::Result;
use crate::params::MU0;
use crate::roles::CellIo;
use crate::state::SimState;
use crate::vec3::{dot, V3};

/// Uniform applied field H_app (A/m).
///
/// E = -μ0 Ms (m · H_app)
pub struct Zeeman {
    name: String,
    h_app: V3,
}

impl Zeeman {
    pub fn new(name: impl Into<String>, h_app: V3) -> Self {
        Self {
            name: name.into(),
            h_app,
        }
    }
}

impl ChunkEnergy for Zeeman {
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
        let h = self.h_app;
        for i in io.range() {
            let ms = state.ms[i];
            let e = -MU0 * ms * dot(state.spin[i], h);
            io.record(i, e, h);
            aux.energy_total += e * state.mesh.volume(i);
        }
        Ok(())
    }

    fn bytes_per_cell(&self) -> usize {
        0
    }
}
