//! Solver lifecycle state and state hashing.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Solver state
// ---------------------------------------------------------------------------

/// Lifecycle of one [`Solver`](crate::solver::Solver).
///
/// `Idle -> Running { step: 0..N-1 } -> Completed`. A run that aborts stays in
/// `Failed` at the step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SolverState {
    #[default]
    Idle,
    Running {
        step: u64,
    },
    Completed,
    Failed {
        step: u64,
    },
}

impl SolverState {
    pub fn is_finished(&self) -> bool {
        matches!(self, SolverState::Completed | SolverState::Failed { .. })
    }
}

// ---------------------------------------------------------------------------
// State hash
// ---------------------------------------------------------------------------

/// FNV-1a (64-bit) hash of reservoir masses for determinism checks.
/// Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    /// Hashes the exact bit pattern, so `0.0` and `-0.0` differ.
    pub fn write_f64(&mut self, v: f64) {
        self.write(&v.to_bits().to_le_bytes());
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}
