// src/config.rs
//
// Engine tuning knobs. Defaults suit a typical L2 cache; every field can be
// overridden from the environment:
//   LLG_ENERGY_THREADS=<n>          worker threads (default: hardware threads)
//   LLG_ENERGY_CACHE_BYTES=<bytes>  cache budget per sub-block
//   LLG_ENERGY_CACHE_FUDGE=<n>      divide the budget by this factor
//   LLG_ENERGY_BLOCK_GRANULE=<n>    job/sub-block sizes are multiples of this
//   LLG_ENERGY_JOBS_PER_THREAD=<n>  jobs handed out per worker

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

use crate::error::{EnergyError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub threads: Option<usize>,
    pub cache_bytes: usize,
    pub cache_fudge: usize,
    pub block_granule: usize,
    pub jobs_per_thread: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: None,
            cache_bytes: 512 * 1024,
            cache_fudge: 2,
            block_granule: 16,
            jobs_per_thread: 1,
        }
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
}

impl EngineConfig {
    /// Defaults with `LLG_ENERGY_*` overrides applied.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(n) = env_usize("LLG_ENERGY_THREADS") {
            cfg.threads = Some(n);
        }
        if let Some(n) = env_usize("LLG_ENERGY_CACHE_BYTES") {
            cfg.cache_bytes = n;
        }
        if let Some(n) = env_usize("LLG_ENERGY_CACHE_FUDGE") {
            cfg.cache_fudge = n;
        }
        if let Some(n) = env_usize("LLG_ENERGY_BLOCK_GRANULE") {
            cfg.block_granule = n;
        }
        if let Some(n) = env_usize("LLG_ENERGY_JOBS_PER_THREAD") {
            cfg.jobs_per_thread = n;
        }
        cfg
    }

    pub fn with_threads(mut self, n: usize) -> Self {
        self.threads = Some(n);
        self
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s)
            .map_err(|e| EnergyError::Precondition(format!("bad engine config: {e}")))
    }

    /// Worker count: explicit setting, else hardware parallelism.
    pub fn thread_count(&self) -> usize {
        self.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == Some(0) {
            return Err(EnergyError::Precondition("threads must be >= 1".into()));
        }
        if self.cache_bytes == 0 || self.cache_fudge == 0 {
            return Err(EnergyError::Precondition(
                "cache_bytes and cache_fudge must be non-zero".into(),
            ));
        }
        if self.block_granule == 0 || self.jobs_per_thread == 0 {
            return Err(EnergyError::Precondition(
                "block_granule and jobs_per_thread must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn write_to_dir(&self, out_dir: &Path) -> std::io::Result<()> {
        let path = out_dir.join("engine_config.json");
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}
