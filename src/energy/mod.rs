// src/energy/mod.rs
//
// Pluggable energy terms.
//
// Two kinds, fixed when a term is registered:
//   Batch -> one whole-mesh call on the orchestrator thread
//   Chunk -> many calls on disjoint sub-ranges, from any worker thread
//
// Every term records each cell of its range through `CellIo::record`, which
// writes energy density, field and the derived torque m × H into whatever
// outputs are active, in the role the orchestrator chose.

pub mod anisotropy;
pub mod exchange;
pub mod zeeman;

pub use anisotropy::UniaxialAnisotropy;
pub use exchange::Exchange;
pub use zeeman::Zeeman;

use crate::error::Result;
use crate::roles::CellIo;
use crate::state::SimState;
use crate::vec3::V3;

/// Per-thread partial sums for one chunk term, summed (not overwritten) by
/// every chunk call made on that thread.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThreadAux {
    /// Σ energy density × cell volume (J).
    pub energy_total: f64,
    /// Σ ∂E/∂t (J/s).
    pub de_dt: f64,
}

/// Scalar result of one whole-mesh term evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TermEnergy {
    pub energy_sum: f64,
    pub de_dt: f64,
    /// Absolute error estimate of the cellwise energy density (J/m^3).
    /// `None` lets the orchestrator derive one from `energy_sum`.
    pub energy_density_error_estimate: Option<f64>,
}

pub trait BatchEnergy: Send {
    fn name(&self) -> &str;

    /// Whole-mesh evaluation; `io.range()` is `0..mesh size`.
    fn compute(&mut self, state: &SimState, io: &mut CellIo<'_>) -> Result<TermEnergy>;
}

pub trait ChunkEnergy: Send + Sync {
    fn name(&self) -> &str;

    /// Serial setup on the orchestrator thread before any `compute_chunk`.
    /// Anything non-thread-safe belongs here or in `finalize_chunk`.
    fn initialize_chunk(&mut self, _state: &SimState, _thread_count: usize) -> Result<()> {
        Ok(())
    }

    /// Evaluate cells `io.range()`. Called concurrently from several
    /// threads on disjoint ranges; `aux` belongs to `thread_id` alone.
    fn compute_chunk(
        &self,
        state: &SimState,
        io: &mut CellIo<'_>,
        aux: &mut ThreadAux,
        thread_id: usize,
    ) -> Result<()>;

    /// Serial teardown after all workers joined; `aux` holds one record per thread.
    fn finalize_chunk(&mut self, _state: &SimState, _aux: &[ThreadAux]) -> Result<()> {
        Ok(())
    }

    fn energy_density_error_estimate(&self) -> Option<f64> {
        None
    }

    /// Extra bytes per cell this term reads beyond spin and Ms; feeds the
    /// cache sub-block size.
    fn bytes_per_cell(&self) -> usize {
        8
    }
}

/// A registered energy term, resolved once into its kind.
pub enum EnergyTerm {
    Batch(Box<dyn BatchEnergy>),
    Chunk(Box<dyn ChunkEnergy>),
}

impl EnergyTerm {
    pub fn batch(term: impl BatchEnergy + 'static) -> Self {
        EnergyTerm::Batch(Box::new(term))
    }

    pub fn chunk(term: impl ChunkEnergy + 'static) -> Self {
        EnergyTerm::Chunk(Box::new(term))
    }

    pub fn name(&self) -> &str {
        match self {
            EnergyTerm::Batch(t) => t.name(),
            EnergyTerm::Chunk(t) => t.name(),
        }
    }
}

/// Outputs kept per term across calls. Arrays are only filled when the
/// matching request flag on the entry is set.
#[derive(Debug, Clone, Default)]
pub struct TermOutputs {
    pub energy_sum: Option<f64>,
    pub energy_density: Vec<f64>,
    pub field: Vec<V3>,
    /// Id of the state these outputs describe; 0 while being recomputed.
    pub state_id: u32,
}

pub struct TermEntry {
    pub term: EnergyTerm,
    pub request_energy_density: bool,
    pub request_field: bool,
    pub outputs: TermOutputs,
    pub(crate) calc_count: u64,
}

impl TermEntry {
    pub fn new(term: EnergyTerm) -> Self {
        Self {
            term,
            request_energy_density: false,
            request_field: false,
            outputs: TermOutputs::default(),
            calc_count: 0,
        }
    }

    pub fn with_energy_density_output(mut self) -> Self {
        self.request_energy_density = true;
        self
    }

    pub fn with_field_output(mut self) -> Self {
        self.request_field = true;
        self
    }

    pub fn name(&self) -> &str {
        self.term.name()
    }

    /// Number of completed evaluations.
    pub fn calc_count(&self) -> u64 {
        self.calc_count
    }

    /// Invalidate outputs and size the requested arrays for `n` cells.
    pub(crate) fn begin(&mut self, n: usize) {
        self.outputs.state_id = 0;
        self.outputs.energy_sum = None;
        if self.request_energy_density {
            self.outputs.energy_density.resize(n, 0.0);
        }
        if self.request_field {
            self.outputs.field.resize(n, [0.0; 3]);
        }
    }
}

/// Runs a chunk term through the batch interface: one thread, one call
/// over the whole mesh.
pub struct BatchAdapter<T: ChunkEnergy>(pub T);

impl<T: ChunkEnergy> BatchEnergy for BatchAdapter<T> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn compute(&mut self, state: &SimState, io: &mut CellIo<'_>) -> Result<TermEnergy> {
        let mut aux = [ThreadAux::default()];
        self.0.initialize_chunk(state, 1)?;
        self.0.compute_chunk(state, io, &mut aux[0], 0)?;
        self.0.finalize_chunk(state, &aux)?;
        Ok(TermEnergy {
            energy_sum: aux[0].energy_total,
            de_dt: aux[0].de_dt,
            energy_density_error_estimate: self.0.energy_density_error_estimate(),
        })
    }
}
