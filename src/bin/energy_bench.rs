// src/bin/energy_bench.rs
//
// Thin-film energy evaluation benchmark: exchange + anisotropy + Zeeman as
// chunk terms, plus a bias field evaluated through the batch path.
// Runs the same state for several worker counts and prints one JSON line
// per run (result + wall time). Logging via RUST_LOG, e.g. RUST_LOG=debug.
//
// Run:
//   cargo run --release --bin energy_bench
//
// Output:
//   out/energy_bench/engine_config.json

use std::fs::create_dir_all;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing_subscriber::EnvFilter;

use llg_energy::compute::{ComputeEnergyData, EnergyEngine, EnergyResult};
use llg_energy::config::EngineConfig;
use llg_energy::energy::{BatchAdapter, EnergyTerm, Exchange, TermEntry, UniaxialAnisotropy, Zeeman};
use llg_energy::mesh::RectMesh;
use llg_energy::params::Material;
use llg_energy::state::SimState;
use llg_energy::vec3::normalize;

#[derive(Serialize)]
struct BenchLine {
    threads: usize,
    config: EngineConfig,
    evals: usize,
    ms_per_eval: f64,
    result: EnergyResult,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // --- problem size ---
    let nx: usize = 256;
    let ny: usize = 256;
    let nz: usize = 2;
    let cell = 5e-9;
    let evals: usize = 20;
    // --------------------

    let mat = Material::default();
    let mesh = RectMesh::new(nx, ny, nz, cell, cell, cell);

    // In-plane curling pattern with a little out-of-plane tilt.
    let mut spin = Vec::with_capacity(nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let x = i as f64 - 0.5 * nx as f64;
                let y = j as f64 - 0.5 * ny as f64;
                let tilt = 0.1 * (k as f64 + 1.0);
                spin.push(normalize([-y, x, tilt * (x * x + y * y).sqrt()]));
            }
        }
    }
    let state = SimState::new(1, Arc::new(mesh), spin, vec![mat.ms; nx * ny * nz])?;

    let base = EngineConfig::from_env();
    let out_dir = Path::new("out").join("energy_bench");
    create_dir_all(&out_dir)?;
    base.write_to_dir(&out_dir)?;

    let max_threads = base.thread_count();
    let mut counts = vec![1, 2, 4, max_threads];
    counts.retain(|&t| t <= max_threads);
    counts.dedup();

    for threads in counts {
        let engine = EnergyEngine::new(base.clone().with_threads(threads))?;
        let mut terms = vec![
            TermEntry::new(EnergyTerm::batch(BatchAdapter(Zeeman::new(
                "bias",
                [0.0, 0.0, 1e3],
            )))),
            TermEntry::new(EnergyTerm::chunk(Exchange::from_material("exchange", &mat))),
            TermEntry::new(EnergyTerm::chunk(UniaxialAnisotropy::from_material(
                "anisotropy",
                &mat,
            ))),
            TermEntry::new(EnergyTerm::chunk(Zeeman::new("applied", [8e3, 0.0, 0.0]))),
        ];

        let mut scratch_e = Vec::new();
        let mut scratch_h = Vec::new();
        let mut energy = Vec::new();
        let mut field = Vec::new();
        let mut mxhxm = Vec::new();

        let mut result = EnergyResult::default();
        let t0 = Instant::now();
        for _ in 0..evals {
            let data = ComputeEnergyData::new(&mut scratch_e, &mut scratch_h)
                .with_energy(&mut energy)
                .with_field(&mut field)
                .with_torque_cross_m(&mut mxhxm);
            result = engine.compute_energies(&state, &mut terms, data)?;
        }
        let elapsed = t0.elapsed().as_secs_f64();

        let line = BenchLine {
            threads,
            config: engine.config().clone(),
            evals,
            ms_per_eval: 1e3 * elapsed / evals as f64,
            result,
        };
        println!("{}", serde_json::to_string(&line)?);
    }

    Ok(())
}
