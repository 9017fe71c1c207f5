// src/mesh.rs

/// Cell geometry consumed by the energy engine.
///
/// Implementations must be safe to read from every worker thread at once.
pub trait Mesh: Send + Sync {
    /// Total number of cells.
    fn size(&self) -> usize;

    /// Volume of cell `index` (m^3).
    fn volume(&self, index: usize) -> f64;

    fn total_volume(&self) -> f64 {
        (0..self.size()).map(|i| self.volume(i)).sum()
    }

    /// Rectangular view, for terms that need neighbour stencils.
    fn as_rect(&self) -> Option<&RectMesh> {
        None
    }
}

/// Simple 3D finite-difference mesh with uniform cells.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectMesh {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

impl RectMesh {
    /// Create a mesh with nx × ny × nz cells of size dx × dy × dz.
    pub fn new(nx: usize, ny: usize, nz: usize, dx: f64, dy: f64, dz: f64) -> Self {
        Self {
            nx,
            ny,
            nz,
            dx,
            dy,
            dz,
        }
    }

    /// Convert (i, j, k) indices to a flat index (x fastest).
    #[inline]
    pub fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(i < self.nx && j < self.ny && k < self.nz);
        (k * self.ny + j) * self.nx + i
    }

    /// Inverse of [`RectMesh::idx`].
    #[inline]
    pub fn coords(&self, index: usize) -> (usize, usize, usize) {
        let i = index % self.nx;
        let j = (index / self.nx) % self.ny;
        let k = index / (self.nx * self.ny);
        (i, j, k)
    }

    #[inline]
    pub fn cell_volume(&self) -> f64 {
        self.dx * self.dy * self.dz
    }
}

impl Mesh for RectMesh {
    fn size(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    fn volume(&self, _index: usize) -> f64 {
        self.cell_volume()
    }

    fn total_volume(&self) -> f64 {
        self.size() as f64 * self.cell_volume()
    }

    fn as_rect(&self) -> Option<&RectMesh> {
        Some(self)
    }
}
