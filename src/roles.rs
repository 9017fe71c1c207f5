// src/roles.rs
//
// Output buffer roles and the per-invocation view handed to energy terms.
//
// Each shared output (energy density, field, torque) is addressed in one of
// three roles for a given term invocation:
//   Fill       -> the term overwrites every cell of its range
//   Accumulate -> the term adds into values an earlier term filled
//   Unused     -> not requested, the term skips it
// The first contributing term fills, so no separate zeroing pass is needed.
// Whether a buffer is still awaiting its fill is tracked by RoleHandoff, a
// single-use flag that flips once per call and never flips back.

use std::marker::PhantomData;
use std::ops::{AddAssign, Range};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::vec3::{cross, V3};

/// Role of a shared output buffer for one term invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRole {
    Fill,
    Accumulate,
    Unused,
}

impl BufferRole {
    /// Role for a requested buffer, given whether it still awaits its fill.
    pub fn for_request(requested: bool, fill: bool) -> Self {
        match (requested, fill) {
            (false, _) => BufferRole::Unused,
            (true, true) => BufferRole::Fill,
            (true, false) => BufferRole::Accumulate,
        }
    }
}

/// Per-cell value that can be stored or added into a buffer.
pub trait CellValue: Copy + Send + Sync {
    fn accumulate(&mut self, v: Self);
}

impl CellValue for f64 {
    #[inline]
    fn accumulate(&mut self, v: Self) {
        self.add_assign(v);
    }
}

impl CellValue for V3 {
    #[inline]
    fn accumulate(&mut self, v: Self) {
        self[0] += v[0];
        self[1] += v[1];
        self[2] += v[2];
    }
}

/// A buffer slice tagged with its role.
pub enum Slot<'a, T> {
    Fill(&'a mut [T]),
    Accumulate(&'a mut [T]),
    Unused,
}

impl<'a, T: CellValue> Slot<'a, T> {
    pub fn new(role: BufferRole, data: Option<&'a mut [T]>) -> Self {
        match (role, data) {
            (BufferRole::Fill, Some(d)) => Slot::Fill(d),
            (BufferRole::Accumulate, Some(d)) => Slot::Accumulate(d),
            _ => Slot::Unused,
        }
    }

    pub fn role(&self) -> BufferRole {
        match self {
            Slot::Fill(_) => BufferRole::Fill,
            Slot::Accumulate(_) => BufferRole::Accumulate,
            Slot::Unused => BufferRole::Unused,
        }
    }

    pub fn is_used(&self) -> bool {
        !matches!(self, Slot::Unused)
    }

    /// Write `v` at local offset `k` according to the role.
    #[inline]
    pub fn put(&mut self, k: usize, v: T) {
        match self {
            Slot::Fill(d) => d[k] = v,
            Slot::Accumulate(d) => d[k].accumulate(v),
            Slot::Unused => {}
        }
    }
}

/// Single-use fill handoff for the shared accumulators.
///
/// `claim` succeeds exactly once per call. The batch phase claims it for the
/// first batch term; otherwise the worker owning the sub-block at index 0
/// claims it while that sub-block's first chunk term runs in fill role.
#[derive(Debug, Default)]
pub struct RoleHandoff {
    taken: AtomicBool,
}

impl RoleHandoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// True for the first caller only.
    pub fn claim(&self) -> bool {
        self.taken
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_taken(&self) -> bool {
        self.taken.load(Ordering::Acquire)
    }
}

/// Process-wide output array shared by all workers of one call.
///
/// Workers obtain disjoint mutable sub-slices. Disjointness is not checked
/// here; it follows from the job basket handing each index to one job.
pub struct SharedCells<'a, T> {
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

// SAFETY: SharedCells only hands out sub-slices through the unsafe
// `range_mut`, whose callers guarantee ranges never overlap across threads.
unsafe impl<T: Send> Send for SharedCells<'_, T> {}
unsafe impl<T: Send> Sync for SharedCells<'_, T> {}

impl<'a, T> SharedCells<'a, T> {
    pub fn new(data: &'a mut [T]) -> Self {
        Self {
            ptr: data.as_mut_ptr(),
            len: data.len(),
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mutable view of `range`.
    ///
    /// # Safety
    /// No other live reference may overlap `range` while the returned slice
    /// is alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn range_mut(&self, range: Range<usize>) -> &mut [T] {
        assert!(range.start <= range.end && range.end <= self.len);
        std::slice::from_raw_parts_mut(self.ptr.add(range.start), range.end - range.start)
    }
}

/// What an energy term sees for one invocation: a cell range and the
/// buffers it writes, each already in the right role.
///
/// Terms must call [`CellIo::record`] (or [`CellIo::record_zero`]) for every
/// index in `range()`, since a fill-role buffer holds stale data otherwise.
pub struct CellIo<'a> {
    range: Range<usize>,
    spin: &'a [V3],
    pub energy: Slot<'a, f64>,
    pub field: Slot<'a, V3>,
    pub torque: Slot<'a, V3>,
    /// Term-private energy density output, always filled.
    pub term_energy: Option<&'a mut [f64]>,
    /// Term-private field output, always filled.
    pub term_field: Option<&'a mut [V3]>,
    scratch_energy: &'a mut [f64],
}

impl<'a> CellIo<'a> {
    /// Slices are local to `range` (slot index 0 is mesh index
    /// `range.start`); `spin` covers the whole mesh.
    pub fn new(
        range: Range<usize>,
        spin: &'a [V3],
        energy: Slot<'a, f64>,
        field: Slot<'a, V3>,
        torque: Slot<'a, V3>,
        scratch_energy: &'a mut [f64],
    ) -> Self {
        Self {
            range,
            spin,
            energy,
            field,
            torque,
            term_energy: None,
            term_field: None,
            scratch_energy,
        }
    }

    pub fn with_term_outputs(
        mut self,
        term_energy: Option<&'a mut [f64]>,
        term_field: Option<&'a mut [V3]>,
    ) -> Self {
        self.term_energy = term_energy;
        self.term_field = term_field;
        self
    }

    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// True if anything per-cell is wanted besides torque.
    pub fn wants_energy_density(&self) -> bool {
        self.energy.is_used() || self.term_energy.is_some()
    }

    pub fn wants_field(&self) -> bool {
        self.field.is_used() || self.term_field.is_some()
    }

    /// Per-cell workspace for this range, contents unspecified on entry.
    pub fn scratch_energy(&mut self) -> &mut [f64] {
        &mut *self.scratch_energy
    }

    /// Record cell `index` (mesh index): energy density (J/m^3) and field
    /// (A/m). Torque m × H is derived from the cell's spin.
    #[inline]
    pub fn record(&mut self, index: usize, energy_density: f64, field: V3) {
        let k = index - self.range.start;
        self.energy.put(k, energy_density);
        self.field.put(k, field);
        self.torque.put(k, cross(self.spin[index], field));
        if let Some(e) = self.term_energy.as_deref_mut() {
            e[k] = energy_density;
        }
        if let Some(h) = self.term_field.as_deref_mut() {
            h[k] = field;
        }
    }

    /// Record a cell that contributes nothing (e.g. Ms == 0).
    #[inline]
    pub fn record_zero(&mut self, index: usize) {
        self.record(index, 0.0, [0.0; 3]);
    }
}
