// src/compute.rs
//
// Orchestrator: sum every registered energy term over the mesh.
//
// Phases of one call:
//   1. validate, size the requested buffers, pick the torque working buffer
//   2. batch terms, serially on this thread; the first one fills the
//      shared accumulators, the rest add into them
//   3. chunk terms on the worker pool, cache-blocked, plus torque
//      post-processing (always run, even with no chunk terms)
//   4. serial merge of per-thread partials, per-term bookkeeping and
//      publication of well-known quantities into the state
//
// If torque × m is requested without torque, the torque working buffer is
// the torque × m array itself and post-processing converts it in place.
// If neither is requested the scratch field hosts torque, so the max torque
// is always available.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use tracing::{debug, debug_span, warn};

use crate::basket::JobBasket;
use crate::config::EngineConfig;
use crate::energy::{BatchEnergy, ChunkEnergy, EnergyTerm, TermEntry, ThreadAux};
use crate::error::{EnergyError, Result};
use crate::reduce::{CompensatedSum, MaxTorqueSq};
use crate::roles::{RoleHandoff, SharedCells};
use crate::state::SimState;
use crate::vec3::{V3, ZERO};
use crate::worker::{ChunkSlot, ChunkWorker, CrossMode, SharedOutputs, ThreadPartial};

/// Names under which aggregate results are published into the state.
pub mod well_known {
    pub const TOTAL_ENERGY: &str = "Total energy";
    pub const DE_DT: &str = "Total dE/dt";
    pub const MAX_TORQUE: &str = "Max mxH";
    pub const ENERGY_DENSITY_ERROR: &str = "Energy density error estimate";

    pub fn term_energy(term_name: &str) -> String {
        format!("{term_name}:Energy")
    }
}

/// Relative round-off assumed for terms that report no error estimate.
const EDEE_ROUND_ERROR: f64 = 1e-14;

/// Buffers for one call. The two scratch buffers are required; every other
/// output is computed only if present. Present buffers are resized to the
/// mesh on entry.
#[derive(Default)]
pub struct ComputeEnergyData<'a> {
    pub scratch_energy: Option<&'a mut Vec<f64>>,
    pub scratch_field: Option<&'a mut Vec<V3>>,
    pub energy: Option<&'a mut Vec<f64>>,
    pub field: Option<&'a mut Vec<V3>>,
    pub torque: Option<&'a mut Vec<V3>>,
    pub torque_cross_m: Option<&'a mut Vec<V3>>,
    /// Cells whose torque is forced to zero; ascending, deduplicated.
    pub fixed_cells: &'a [usize],
}

impl<'a> ComputeEnergyData<'a> {
    pub fn new(scratch_energy: &'a mut Vec<f64>, scratch_field: &'a mut Vec<V3>) -> Self {
        Self {
            scratch_energy: Some(scratch_energy),
            scratch_field: Some(scratch_field),
            ..Self::default()
        }
    }

    pub fn with_energy(mut self, buf: &'a mut Vec<f64>) -> Self {
        self.energy = Some(buf);
        self
    }

    pub fn with_field(mut self, buf: &'a mut Vec<V3>) -> Self {
        self.field = Some(buf);
        self
    }

    pub fn with_torque(mut self, buf: &'a mut Vec<V3>) -> Self {
        self.torque = Some(buf);
        self
    }

    pub fn with_torque_cross_m(mut self, buf: &'a mut Vec<V3>) -> Self {
        self.torque_cross_m = Some(buf);
        self
    }

    pub fn with_fixed_cells(mut self, cells: &'a [usize]) -> Self {
        self.fixed_cells = cells;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EnergyResult {
    /// Σ over terms of the whole-mesh energy (J).
    pub total_energy: f64,
    /// Σ over terms of ∂E/∂t (J/s).
    pub de_dt: f64,
    /// max over cells of |m × H| (A/m).
    pub max_torque: f64,
    /// Σ over terms of the cellwise energy density error estimate (J/m^3).
    pub energy_density_error_estimate: f64,
}

/// Mutable view of one registered term, split so its private output arrays
/// can be lent to workers while the term itself is shared.
struct TermRef<'t, B: ?Sized> {
    term: &'t mut Box<B>,
    energy_density: Option<&'t mut [f64]>,
    field: Option<&'t mut [V3]>,
    energy_sum: &'t mut Option<f64>,
    state_id: &'t mut u32,
    calc_count: &'t mut u64,
}

impl<B: ?Sized> TermRef<'_, B> {
    fn finish(&mut self, state_id: u32, energy_sum: f64) {
        *self.calc_count += 1;
        *self.energy_sum = Some(energy_sum);
        *self.state_id = state_id;
    }
}

type BatchRef<'t> = TermRef<'t, dyn BatchEnergy>;
type ChunkRef<'t> = TermRef<'t, dyn ChunkEnergy>;

/// Size per-term outputs and split the list by kind, keeping registration
/// order within each kind.
fn partition_terms(terms: &mut [TermEntry], n: usize) -> (Vec<BatchRef<'_>>, Vec<ChunkRef<'_>>) {
    let mut batch = Vec::new();
    let mut chunk = Vec::new();
    for entry in terms.iter_mut() {
        entry.begin(n);
        let TermEntry {
            term,
            request_energy_density,
            request_field,
            outputs,
            calc_count,
        } = entry;
        let energy_density = if *request_energy_density {
            Some(outputs.energy_density.as_mut_slice())
        } else {
            None
        };
        let field = if *request_field {
            Some(outputs.field.as_mut_slice())
        } else {
            None
        };
        let energy_sum = &mut outputs.energy_sum;
        let state_id = &mut outputs.state_id;
        match term {
            EnergyTerm::Batch(t) => batch.push(TermRef {
                term: t,
                energy_density,
                field,
                energy_sum,
                state_id,
                calc_count,
            }),
            EnergyTerm::Chunk(t) => chunk.push(TermRef {
                term: t,
                energy_density,
                field,
                energy_sum,
                state_id,
                calc_count,
            }),
        }
    }
    (batch, chunk)
}

/// Error estimate for one term: its own if reported, else |E| / V scaled
/// by the assumed round-off.
fn energy_density_error(reported: Option<f64>, energy_sum: f64, total_volume: f64) -> f64 {
    if let Some(e) = reported.filter(|e| *e >= 0.0) {
        return e;
    }
    let magnitude = energy_sum.abs();
    let density = if total_volume >= 1.0 || magnitude < f64::MAX * total_volume {
        magnitude / total_volume
    } else if total_volume == 0.0 {
        0.0
    } else {
        f64::MAX / 256.0
    };
    density * EDEE_ROUND_ERROR
}

fn check_fixed_cells(fixed: &[usize], n: usize) -> Result<()> {
    if fixed.windows(2).any(|w| w[0] >= w[1]) {
        return Err(EnergyError::Precondition(
            "fixed-cell list must be ascending without duplicates".into(),
        ));
    }
    if let Some(&last) = fixed.last() {
        if last >= n {
            return Err(EnergyError::Precondition(format!(
                "fixed cell {last} outside a mesh of {n} cells"
            )));
        }
    }
    Ok(())
}

pub struct EnergyEngine {
    config: EngineConfig,
    pool: ThreadPool,
}

impl EnergyEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.thread_count())
            .thread_name(|i| format!("llg-energy-{i}"))
            .build()?;
        Ok(Self { config, pool })
    }

    /// Engine configured from `LLG_ENERGY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(EngineConfig::from_env())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn max_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Cells per cache sub-block for `bytes_per_cell` of working set.
    fn cache_block_size(&self, bytes_per_cell: usize, n: usize, threads: usize) -> usize {
        let budget = self.config.cache_bytes / self.config.cache_fudge;
        let mut block = (budget / bytes_per_cell.max(1)).max(1);
        if threads * block > n {
            block = n / threads;
        }
        if block == 0 {
            return 1;
        }
        let g = self.config.block_granule;
        if block % g != 0 {
            block += g - block % g;
        }
        block
    }

    /// Evaluate every term in `terms` for `state`, filling the requested
    /// buffers in `data`.
    ///
    /// Either the full result is produced, or an error is returned and no
    /// aggregate is published.
    pub fn compute_energies(
        &self,
        state: &SimState,
        terms: &mut [TermEntry],
        data: ComputeEnergyData<'_>,
    ) -> Result<EnergyResult> {
        let _span = debug_span!("compute_energies", state_id = state.id()).entered();

        if state.id() == 0 {
            return Err(EnergyError::Precondition(
                "invalid (unlocked) state: generation id 0".into(),
            ));
        }
        let ComputeEnergyData {
            scratch_energy,
            scratch_field,
            mut energy,
            mut field,
            mut torque,
            mut torque_cross_m,
            fixed_cells,
        } = data;
        let (Some(scratch_energy), Some(scratch_field)) = (scratch_energy, scratch_field) else {
            return Err(EnergyError::Precondition(
                "scratch energy and scratch field buffers are required".into(),
            ));
        };

        let n = state.size();
        check_fixed_cells(fixed_cells, n)?;

        scratch_energy.resize(n, 0.0);
        scratch_field.resize(n, ZERO);
        if let Some(buf) = energy.as_mut() {
            buf.resize(n, 0.0);
        }
        for buf in [&mut field, &mut torque, &mut torque_cross_m]
            .into_iter()
            .flatten()
        {
            buf.resize(n, ZERO);
        }

        if terms.is_empty() || n == 0 {
            // Nothing to evaluate: identity values, no workers.
            if let Some(e) = energy {
                e.fill(0.0);
            }
            for buf in [field, torque, torque_cross_m].into_iter().flatten() {
                buf.fill(ZERO);
            }
            let result = EnergyResult::default();
            publish(state, &result);
            debug!(cells = n, terms = terms.len(), "degenerate call; no workers launched");
            return Ok(result);
        }

        let (mut batch, mut chunk) = partition_terms(terms, n);

        let requested = (
            energy.is_some(),
            field.is_some(),
            torque_cross_m.is_some() && torque.is_some(),
        );
        let (torque_buf, cross) = match (torque, torque_cross_m) {
            (Some(t), Some(c)) => (t.as_mut_slice(), CrossMode::Separate(SharedCells::new(c))),
            (None, Some(c)) => (c.as_mut_slice(), CrossMode::InPlace),
            (Some(t), None) => (t.as_mut_slice(), CrossMode::None),
            (None, None) => (scratch_field.as_mut_slice(), CrossMode::None),
        };
        let outputs = SharedOutputs {
            energy: energy.map(|v| SharedCells::new(v.as_mut_slice())),
            field: field.map(|v| SharedCells::new(v.as_mut_slice())),
            torque: SharedCells::new(torque_buf),
            cross,
            scratch_energy: SharedCells::new(scratch_energy.as_mut_slice()),
        };

        let total_volume = state.mesh.total_volume();
        let handoff = RoleHandoff::new();
        let mut energy_sum = CompensatedSum::new();
        let mut de_dt = CompensatedSum::new();
        let mut edee = 0.0;

        // Batch terms.
        for r in batch.iter_mut() {
            let fill = handoff.claim();
            // SAFETY: no worker exists yet and only this view is alive.
            let mut io = unsafe { outputs.cell_io(0..n, &state.spin, fill) }
                .with_term_outputs(r.energy_density.as_deref_mut(), r.field.as_deref_mut());
            let te = r.term.compute(state, &mut io)?;
            energy_sum += te.energy_sum;
            de_dt += te.de_dt;
            edee += energy_density_error(
                te.energy_density_error_estimate,
                te.energy_sum,
                total_volume,
            );
            r.finish(state.id(), te.energy_sum);
        }
        let accums_filled = handoff.is_taken();

        // Chunk terms.
        let pool_threads = self.max_threads();
        let bytes_per_cell = 24 + 8 + 24 // spin, Ms, torque
            + if requested.0 { 8 } else { 0 }
            + if requested.1 { 24 } else { 0 }
            + if requested.2 { 24 } else { 0 }
            + chunk
                .iter()
                .map(|r| {
                    r.term.bytes_per_cell()
                        + r.energy_density.as_ref().map_or(0, |_| 8)
                        + r.field.as_ref().map_or(0, |_| 24)
                })
                .sum::<usize>();
        let cache_block = self.cache_block_size(bytes_per_cell, n, pool_threads);
        let basket = JobBasket::new(n, pool_threads, self.config.jobs_per_thread, cache_block);
        let thread_count = pool_threads.min(basket.job_count().max(1));

        debug!(
            cells = n,
            batch_terms = batch.len(),
            chunk_terms = chunk.len(),
            threads = thread_count,
            cache_block,
            job_block = basket.block_size(),
            "launching chunk workers"
        );

        for i in 0..chunk.len() {
            if let Err(e) = chunk[i].term.initialize_chunk(state, thread_count) {
                abandon_chunk_terms(&mut chunk[..i], state, thread_count);
                return Err(e);
            }
        }

        let origin = RoleHandoff::new();
        let joined: Result<Vec<ThreadPartial>> = {
            let slots: Vec<ChunkSlot<'_>> = chunk
                .iter_mut()
                .map(|r| ChunkSlot {
                    term: &**r.term,
                    energy_density: r.energy_density.as_deref_mut().map(SharedCells::new),
                    field: r.field.as_deref_mut().map(SharedCells::new),
                })
                .collect();
            let worker = ChunkWorker {
                state,
                basket: &basket,
                terms: &slots,
                outputs: &outputs,
                fixed_cells,
                cache_block,
                origin: &origin,
                handoff: &handoff,
                accums_filled,
            };
            let results: Vec<Result<ThreadPartial>> = self.pool.install(|| {
                (0..thread_count)
                    .into_par_iter()
                    .with_max_len(1)
                    .map(|tid| worker.run(tid))
                    .collect()
            });
            results.into_iter().collect()
        };

        let checked = joined.and_then(|partials| {
            if !origin.is_taken() {
                Err(EnergyError::InternalInvariant("index 0 was never processed".into()))
            } else if !chunk.is_empty() && !handoff.is_taken() {
                Err(EnergyError::InternalInvariant("accumulators were never filled".into()))
            } else {
                Ok(partials)
            }
        });
        let partials = match checked {
            Ok(partials) => partials,
            Err(e) => {
                abandon_chunk_terms(&mut chunk, state, thread_count);
                return Err(e);
            }
        };

        for (ei, r) in chunk.iter_mut().enumerate() {
            let aux: Vec<ThreadAux> = partials.iter().map(|p| p.aux[ei]).collect();
            r.term.finalize_chunk(state, &aux)?;
            let term_energy: CompensatedSum = aux.iter().map(|a| a.energy_total).sum();
            let term_de_dt: CompensatedSum = aux.iter().map(|a| a.de_dt).sum();
            let term_energy = term_energy.value();
            energy_sum += term_energy;
            de_dt += term_de_dt.value();
            edee += energy_density_error(
                r.term.energy_density_error_estimate(),
                term_energy,
                total_volume,
            );
            r.finish(state.id(), term_energy);
        }

        let mut max_torque = MaxTorqueSq::default();
        for p in &partials {
            max_torque.merge(p.max_torque);
        }
        let rescaled_blocks: usize = partials.iter().map(|p| p.rescaled_blocks).sum();
        if rescaled_blocks > 0 {
            warn!(
                rescaled_blocks,
                cache_block,
                "torque magnitude overflowed; max torque taken from rescaled sub-blocks"
            );
        }
        let max_torque_magnitude = max_torque.magnitude();
        if max_torque_magnitude == f64::MAX {
            warn!("max torque exceeds the f64 range; reporting f64::MAX");
        }

        let result = EnergyResult {
            total_energy: energy_sum.value(),
            de_dt: de_dt.value(),
            max_torque: max_torque_magnitude,
            energy_density_error_estimate: edee,
        };

        publish(state, &result);
        let term_sums = batch
            .iter()
            .map(|r| (r.term.name(), *r.energy_sum))
            .chain(chunk.iter().map(|r| (r.term.name(), *r.energy_sum)));
        for (name, sum) in term_sums {
            if let Some(e) = sum {
                state.add_derived_data(&well_known::term_energy(name), e);
            }
        }

        debug!(
            total_energy = result.total_energy,
            max_torque = result.max_torque,
            "energies computed"
        );
        Ok(result)
    }
}

/// Give every chunk term its `finalize_chunk` after a failed parallel phase,
/// with empty per-thread records, so no term is left initialized.
fn abandon_chunk_terms(chunk: &mut [ChunkRef<'_>], state: &SimState, thread_count: usize) {
    let aux = vec![ThreadAux::default(); thread_count];
    for r in chunk.iter_mut() {
        if let Err(e) = r.term.finalize_chunk(state, &aux) {
            warn!(term = r.term.name(), error = %e, "finalize after failed call also failed");
        }
    }
}

fn publish(state: &SimState, result: &EnergyResult) {
    let quantities = [
        (well_known::TOTAL_ENERGY, result.total_energy),
        (well_known::DE_DT, result.de_dt),
        (well_known::MAX_TORQUE, result.max_torque),
        (well_known::ENERGY_DENSITY_ERROR, result.energy_density_error_estimate),
    ];
    for (name, value) in quantities {
        if !state.add_derived_data(name, value) {
            debug!(name, "well-known quantity already published; kept existing value");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_estimate_prefers_reported_value() {
        assert_eq!(energy_density_error(Some(2.0), 1e9, 1.0), 2.0);
        assert_eq!(energy_density_error(Some(-1.0), 4.0, 2.0), 2.0 * EDEE_ROUND_ERROR);
    }

    #[test]
    fn error_estimate_handles_tiny_volumes() {
        assert_eq!(energy_density_error(None, 5.0, 0.0), 0.0);
        let e = energy_density_error(None, f64::MAX, 1e-20);
        assert_eq!(e, f64::MAX / 256.0 * EDEE_ROUND_ERROR);
        let e = energy_density_error(None, -3e-18, 1e-24);
        assert!((e - 3e6 * EDEE_ROUND_ERROR).abs() < 1e-20);
    }

    #[test]
    fn fixed_cells_must_be_sorted_and_in_range() {
        assert!(check_fixed_cells(&[], 0).is_ok());
        assert!(check_fixed_cells(&[0, 3, 9], 10).is_ok());
        assert!(check_fixed_cells(&[3, 3], 10).is_err());
        assert!(check_fixed_cells(&[4, 2], 10).is_err());
        assert!(check_fixed_cells(&[10], 10).is_err());
    }

    #[test]
    fn cache_block_is_granule_multiple_and_fits_threads() {
        let engine = EnergyEngine::new(EngineConfig::default().with_threads(2)).unwrap();
        let b = engine.cache_block_size(100, 1_000_000, 4);
        assert_eq!(b % 16, 0);
        assert!(b * 100 >= 512 * 1024 / 2);
        // Small mesh: never more than n / threads, then rounded up.
        assert_eq!(engine.cache_block_size(100, 40, 4), 16);
        assert_eq!(engine.cache_block_size(100, 3, 4), 1);
    }
}
