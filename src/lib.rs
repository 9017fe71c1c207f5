// src/lib.rs

pub mod basket;
pub mod compute;
pub mod config;
pub mod energy;
pub mod error;
pub mod mesh;
pub mod params;
pub mod reduce;
pub mod roles;
pub mod state;
pub mod vec3;
mod worker;

pub use compute::{ComputeEnergyData, EnergyEngine, EnergyResult};
pub use config::EngineConfig;
pub use energy::{BatchEnergy, ChunkEnergy, EnergyTerm, TermEntry};
pub use error::{EnergyError, Result};
pub use state::SimState;
