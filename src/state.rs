// src/state.rs
//
// Read-only simulation snapshot handed to the energy engine.
//
// The only interior mutability is the derived-data cache: named scalars
// (total energy, max torque, ...) computed once for this state and then
// frozen. A second write to the same name is refused, never overwritten.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{EnergyError, Result};
use crate::mesh::Mesh;
use crate::vec3::V3;

pub struct SimState {
    id: u32,
    pub mesh: Arc<dyn Mesh>,
    /// Unit magnetisation direction per cell.
    pub spin: Vec<V3>,
    /// Saturation magnetisation per cell (A/m); zero marks empty cells.
    pub ms: Vec<f64>,
    /// 1/Ms, or 0 where Ms is 0.
    pub ms_inverse: Vec<f64>,
    derived: Mutex<BTreeMap<String, f64>>,
}

impl SimState {
    /// Build a state with generation id `id`. Id 0 is reserved for
    /// "not a valid state" and is rejected later by the engine, not here.
    pub fn new(id: u32, mesh: Arc<dyn Mesh>, spin: Vec<V3>, ms: Vec<f64>) -> Result<Self> {
        let n = mesh.size();
        if spin.len() != n || ms.len() != n {
            return Err(EnergyError::Precondition(format!(
                "state arrays sized spin={} ms={} for a mesh of {} cells",
                spin.len(),
                ms.len(),
                n
            )));
        }
        let ms_inverse = ms
            .iter()
            .map(|&m| if m == 0.0 { 0.0 } else { 1.0 / m })
            .collect();
        Ok(Self {
            id,
            mesh,
            spin,
            ms,
            ms_inverse,
            derived: Mutex::new(BTreeMap::new()),
        })
    }

    /// Uniform state: every cell has direction `m` and magnetisation `ms`.
    pub fn uniform(id: u32, mesh: Arc<dyn Mesh>, m: V3, ms: f64) -> Result<Self> {
        let n = mesh.size();
        Self::new(id, mesh, vec![m; n], vec![ms; n])
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn size(&self) -> usize {
        self.spin.len()
    }

    /// Store `value` under `name` unless the name is already present.
    /// Returns true if stored, false if the existing value was kept.
    pub fn add_derived_data(&self, name: &str, value: f64) -> bool {
        let mut map = self.derived.lock().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(name) {
            return false;
        }
        map.insert(name.to_string(), value);
        true
    }

    pub fn get_derived_data(&self, name: &str) -> Option<f64> {
        let map = self.derived.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(name).copied()
    }

    /// Snapshot of every published quantity, sorted by name.
    pub fn derived_data(&self) -> Vec<(String, f64)> {
        let map = self.derived.lock().unwrap_or_else(PoisonError::into_inner);
        map.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}
