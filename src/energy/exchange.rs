// src/energy/exchange.rs
//
// Six-neighbour exchange on a rectangular mesh, free boundaries.
//
// Per cell i with neighbours n at spacing d_n (empty cells skipped):
//   E_i = A Σ_n (1 - m_i·m_n) / d_n^2
//   H_i = (2A / (μ0 Ms_i)) Σ_n (m_n - m_i) / d_n^2
//
// Neighbour spins outside the chunk are only read, never written, so the
// term is safe to run on any sub-range from any thread.

use crate::energy::{ChunkEnergy, ThreadAux};
use crate::error::{EnergyError, Result};
use crate::mesh::RectMesh;
use crate::params::{Material, MU0};
use crate::roles::CellIo;
use crate::state::SimState;
use crate::vec3::{add, dot, scale, sub, V3, ZERO};

pub struct Exchange {
    name: String,
    a_ex: f64,
    mesh: Option<RectMesh>,
}

impl Exchange {
    pub fn new(name: impl Into<String>, a_ex: f64) -> Self {
        Self {
            name: name.into(),
            a_ex,
            mesh: None,
        }
    }

    pub fn from_material(name: impl Into<String>, mat: &Material) -> Self {
        Self::new(name, mat.a_ex)
    }
}

impl ChunkEnergy for Exchange {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize_chunk(&mut self, state: &SimState, _thread_count: usize) -> Result<()> {
        let rect = state.mesh.as_rect().ok_or_else(|| {
            EnergyError::Precondition(format!(
                "exchange term '{}' requires a rectangular mesh",
                self.name
            ))
        })?;
        self.mesh = Some(*rect);
        Ok(())
    }

    fn compute_chunk(
        &self,
        state: &SimState,
        io: &mut CellIo<'_>,
        aux: &mut ThreadAux,
        _thread_id: usize,
    ) -> Result<()> {
        let mesh = self.mesh.ok_or_else(|| {
            EnergyError::InternalInvariant(format!(
                "exchange term '{}' evaluated before initialize_chunk",
                self.name
            ))
        })?;
        let (wx, wy, wz) = (
            1.0 / (mesh.dx * mesh.dx),
            1.0 / (mesh.dy * mesh.dy),
            1.0 / (mesh.dz * mesh.dz),
        );
        let stride_y = mesh.nx;
        let stride_z = mesh.nx * mesh.ny;
        let coeff = 2.0 * self.a_ex / MU0;
        let volume = mesh.cell_volume();

        for idx in io.range() {
            let ms_inv = state.ms_inverse[idx];
            if ms_inv == 0.0 {
                io.record_zero(idx);
                continue;
            }
            let m = state.spin[idx];
            let (i, j, k) = mesh.coords(idx);

            let mut lap: V3 = ZERO;
            let mut e_sum = 0.0;
            let mut visit = |n: usize, w: f64| {
                if state.ms[n] == 0.0 {
                    return;
                }
                let mn = state.spin[n];
                lap = add(lap, scale(w, sub(mn, m)));
                e_sum += w * (1.0 - dot(m, mn));
            };
            if i > 0 {
                visit(idx - 1, wx);
            }
            if i + 1 < mesh.nx {
                visit(idx + 1, wx);
            }
            if j > 0 {
                visit(idx - stride_y, wy);
            }
            if j + 1 < mesh.ny {
                visit(idx + stride_y, wy);
            }
            if k > 0 {
                visit(idx - stride_z, wz);
            }
            if k + 1 < mesh.nz {
                visit(idx + stride_z, wz);
            }

            let e = self.a_ex * e_sum;
            io.record(idx, e, scale(coeff * ms_inv, lap));
            aux.energy_total += e * volume;
        }
        Ok(())
    }

    fn bytes_per_cell(&self) -> usize {
        // Neighbour spins.
        24
    }
}
