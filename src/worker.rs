// src/worker.rs
//
// Per-thread chunk loop.
//
// Each worker claims jobs from the basket until it is empty. A job is walked
// in cache-sized sub-blocks, in ascending order; for every sub-block all
// chunk terms run in registration order (so the cells stay in cache across
// terms), then the torque post-processing runs on the same cells:
//   1. zero torque at fixed cells
//   2. max |torque|^2, overflow-safe (rescaled blocks are counted and
//      reported once per call by the orchestrator)
//   3. zero torque at Ms == 0 cells and derive torque × m if requested

use std::ops::Range;

use tracing::trace;

use crate::basket::JobBasket;
use crate::energy::{ChunkEnergy, ThreadAux};
use crate::error::{EnergyError, Result};
use crate::reduce::{block_max_torque_sq, MaxTorqueSq};
use crate::roles::{BufferRole, CellIo, RoleHandoff, SharedCells, Slot};
use crate::state::SimState;
use crate::vec3::{cross, V3, ZERO};

/// Where torque × m goes.
pub(crate) enum CrossMode<'a> {
    None,
    /// Separate caller buffer.
    Separate(SharedCells<'a, V3>),
    /// The torque working buffer *is* the caller's torque × m buffer;
    /// post-processing converts it in place.
    InPlace,
}

/// Shared outputs of one call. `torque` always exists: the caller's torque
/// array, the aliased torque × m array, or the scratch field.
pub(crate) struct SharedOutputs<'a> {
    pub energy: Option<SharedCells<'a, f64>>,
    pub field: Option<SharedCells<'a, V3>>,
    pub torque: SharedCells<'a, V3>,
    pub cross: CrossMode<'a>,
    pub scratch_energy: SharedCells<'a, f64>,
}

impl SharedOutputs<'_> {
    /// Term view of `range`; shared buffers are in fill role if `fill`.
    ///
    /// # Safety
    /// The caller must be the only user of `range` in every buffer while
    /// the returned view is alive.
    pub unsafe fn cell_io<'s>(
        &'s self,
        range: Range<usize>,
        spin: &'s [V3],
        fill: bool,
    ) -> CellIo<'s> {
        let energy = self.energy.as_ref().map(|c| c.range_mut(range.clone()));
        let field = self.field.as_ref().map(|c| c.range_mut(range.clone()));
        let energy_role = BufferRole::for_request(energy.is_some(), fill);
        let field_role = BufferRole::for_request(field.is_some(), fill);
        let torque_role = BufferRole::for_request(true, fill);
        CellIo::new(
            range.clone(),
            spin,
            Slot::new(energy_role, energy),
            Slot::new(field_role, field),
            Slot::new(torque_role, Some(self.torque.range_mut(range.clone()))),
            self.scratch_energy.range_mut(range),
        )
    }
}

/// One chunk term as seen by the workers, with its private output arrays.
pub(crate) struct ChunkSlot<'a> {
    pub term: &'a dyn ChunkEnergy,
    pub energy_density: Option<SharedCells<'a, f64>>,
    pub field: Option<SharedCells<'a, V3>>,
}

#[derive(Debug)]
pub(crate) struct ThreadPartial {
    pub max_torque: MaxTorqueSq,
    /// One record per chunk term, in term order.
    pub aux: Vec<ThreadAux>,
    pub jobs: usize,
    /// Sub-blocks whose max torque needed the rescaled pass.
    pub rescaled_blocks: usize,
}

pub(crate) struct ChunkWorker<'a> {
    pub state: &'a SimState,
    pub basket: &'a JobBasket,
    pub terms: &'a [ChunkSlot<'a>],
    pub outputs: &'a SharedOutputs<'a>,
    /// Ascending, deduplicated.
    pub fixed_cells: &'a [usize],
    pub cache_block: usize,
    /// Claimed by whichever job owns index 0; a second claim means the
    /// basket handed index 0 out twice.
    pub origin: &'a RoleHandoff,
    pub handoff: &'a RoleHandoff,
    /// True once the batch phase filled the shared accumulators.
    pub accums_filled: bool,
}

impl ChunkWorker<'_> {
    pub fn run(&self, thread_id: usize) -> Result<ThreadPartial> {
        let mut partial = ThreadPartial {
            max_torque: MaxTorqueSq::default(),
            aux: vec![ThreadAux::default(); self.terms.len()],
            jobs: 0,
            rescaled_blocks: 0,
        };

        loop {
            let job = self.basket.claim(thread_id);
            if job.is_empty() {
                break;
            }
            partial.jobs += 1;

            // Jobs arrive in no particular order, so the fixed-cell cursor
            // restarts for each job; within a job sub-blocks only ascend.
            let mut fixed_cursor = self.fixed_cells.partition_point(|&i| i < job.start);

            let mut start = job.start;
            while start < job.end {
                let stop = (start + self.cache_block).min(job.end);
                self.run_terms(start..stop, thread_id, &mut partial.aux)?;
                if self.post_process(start..stop, &mut fixed_cursor, &mut partial.max_torque)? {
                    partial.rescaled_blocks += 1;
                }
                start = stop;
            }
        }

        trace!(thread_id, jobs = partial.jobs, "worker done");
        Ok(partial)
    }

    fn run_terms(
        &self,
        block: Range<usize>,
        thread_id: usize,
        aux: &mut [ThreadAux],
    ) -> Result<()> {
        if block.start == 0 && !self.origin.claim() {
            return Err(EnergyError::InternalInvariant(
                "index 0 processed by more than one job".into(),
            ));
        }

        // Without a batch term the accumulators are stale: the first chunk
        // term fills every sub-block. The handoff flag records the transition.
        let fill_block = !self.accums_filled;
        if fill_block && block.start == 0 && !self.handoff.claim() {
            return Err(EnergyError::InternalInvariant(
                "fill handoff claimed twice".into(),
            ));
        }

        for (n, (slot, aux)) in self.terms.iter().zip(aux.iter_mut()).enumerate() {
            // SAFETY: `block` lies inside a job this thread claimed; the
            // basket hands each index to exactly one job.
            let mut io = unsafe {
                let term_energy = slot
                    .energy_density
                    .as_ref()
                    .map(|c| c.range_mut(block.clone()));
                let term_field = slot.field.as_ref().map(|c| c.range_mut(block.clone()));
                self.outputs
                    .cell_io(block.clone(), &self.state.spin, fill_block && n == 0)
                    .with_term_outputs(term_energy, term_field)
            };
            slot.term.compute_chunk(self.state, &mut io, aux, thread_id)?;
        }
        Ok(())
    }

    /// Returns true if the sub-block's max torque had to be rescaled.
    fn post_process(
        &self,
        block: Range<usize>,
        fixed_cursor: &mut usize,
        max_torque: &mut MaxTorqueSq,
    ) -> Result<bool> {
        // SAFETY: as in `run_terms`; the term views are gone by now.
        let torque = unsafe { self.outputs.torque.range_mut(block.clone()) };

        while let Some(&index) = self.fixed_cells.get(*fixed_cursor) {
            if index >= block.end {
                break;
            }
            if index >= block.start {
                torque[index - block.start] = ZERO;
            }
            *fixed_cursor += 1;
        }

        let ms = &self.state.ms[block.clone()];
        let spin = &self.state.spin[block.clone()];

        let block_max = block_max_torque_sq(torque, block.start, |k| ms[k] != 0.0)?;
        let rescaled = block_max.is_rescaled();
        if rescaled {
            trace!(start = block.start, stop = block.end, "sub-block max torque rescaled");
        }
        max_torque.merge(block_max);

        match &self.outputs.cross {
            CrossMode::None => {
                for (t, &ms) in torque.iter_mut().zip(ms) {
                    if ms == 0.0 {
                        *t = ZERO;
                    }
                }
            }
            CrossMode::InPlace => {
                for ((t, &ms), &m) in torque.iter_mut().zip(ms).zip(spin) {
                    *t = if ms == 0.0 { ZERO } else { cross(*t, m) };
                }
            }
            CrossMode::Separate(cells) => {
                // SAFETY: same range, different buffer from `torque`.
                let out = unsafe { cells.range_mut(block.clone()) };
                for (((t, c), &ms), &m) in torque.iter_mut().zip(out.iter_mut()).zip(ms).zip(spin) {
                    if ms == 0.0 {
                        *t = ZERO;
                        *c = ZERO;
                    } else {
                        *c = cross(*t, m);
                    }
                }
            }
        }
        Ok(rescaled)
    }
}
