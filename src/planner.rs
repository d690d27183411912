//! Chunk size selection.
//!
//! All sizes are bytes and all throughputs are bytes per second. A chunk is
//! enlarged only in response to a rate-limit signal, and only when the
//! observed throughput would fill more than one chunk per second at the
//! current size. Backoff is applied on every rate-limit signal regardless.

use crate::config::{NetworkEnv, TransferConfig, MIB};

/// Picks the initial chunk size and decides when to grow it.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPlanner {
    env: NetworkEnv,
    generic_chunk_size: u64,
    cloud_chunk_size: u64,
    max_chunk_size: u64,
}

impl ChunkPlanner {
    pub fn new(env: NetworkEnv, config: &TransferConfig) -> Self {
        Self {
            env,
            generic_chunk_size: config.generic_chunk_size.max(1),
            cloud_chunk_size: config.cloud_chunk_size.max(1),
            max_chunk_size: config.max_chunk_size.max(1),
        }
    }

    /// Baseline chunk size for the network environment.
    pub fn baseline(&self) -> u64 {
        match self.env {
            NetworkEnv::Generic => self.generic_chunk_size,
            NetworkEnv::Cloud => self.cloud_chunk_size,
        }
    }

    /// Initial chunk size for a file of `file_size` bytes.
    ///
    /// An override wins outright. Otherwise large files use about a twentieth
    /// of their size per chunk, in whole MiB, bounded by the environment
    /// baseline below and the ceiling above.
    pub fn initial_chunk_size(&self, file_size: u64, override_size: Option<u64>) -> u64 {
        if let Some(size) = override_size {
            return size.max(1);
        }

        let scaled = file_size / 20 / MIB * MIB;
        scaled.max(self.baseline()).min(self.max_chunk_size)
    }

    /// Chunk size to use after a rate-limit signal.
    ///
    /// Returns `None` when enlarging would not help: the ceiling is reached or
    /// throughput does not fill one chunk per second.
    pub fn grow(&self, current: u64, bandwidth_bytes_per_sec: f64) -> Option<u64> {
        if current >= self.max_chunk_size {
            return None;
        }
        if !bandwidth_bytes_per_sec.is_finite() || bandwidth_bytes_per_sec <= current as f64 {
            return None;
        }
        Some(current.saturating_mul(2).min(self.max_chunk_size))
    }
}
