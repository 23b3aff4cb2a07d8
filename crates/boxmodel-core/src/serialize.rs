//! Binary persistence of a [`Solution`] via `bitcode` with a versioned
//! header.

use serde::{Deserialize, Serialize};

use crate::solution::Solution;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a serialized solution.
pub const SOLUTION_MAGIC: u32 = 0xB0C5_0001;

/// Current format version. Increment when breaking the wire format.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SOLUTION_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("solution from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
    #[error("malformed solution: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolutionHeader {
    pub magic: u32,
    pub version: u32,
    /// Number of recorded states.
    pub states: u64,
}

impl SolutionHeader {
    pub fn new(states: u64) -> Self {
        Self {
            magic: SOLUTION_MAGIC,
            version: FORMAT_VERSION,
            states,
        }
    }

    pub fn validate(&self) -> Result<(), DeserializeError> {
        if self.magic != SOLUTION_MAGIC {
            return Err(DeserializeError::InvalidMagic(self.magic));
        }
        if self.version > FORMAT_VERSION {
            return Err(DeserializeError::FutureVersion(self.version));
        }
        if self.version < FORMAT_VERSION {
            return Err(DeserializeError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct SolutionFile {
    header: SolutionHeader,
    solution: Solution,
}

impl Solution {
    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializeError> {
        let file = SolutionFile {
            header: SolutionHeader::new(self.len() as u64),
            solution: self.clone(),
        };
        bitcode::serialize(&file).map_err(|e| SerializeError::Encode(e.to_string()))
    }

    /// Decode, then validate the header and the shape of every record
    /// before returning the solution.
    pub fn from_bytes(data: &[u8]) -> Result<Self, DeserializeError> {
        let file: SolutionFile =
            bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
        file.header.validate()?;
        check_shape(&file.header, &file.solution)?;
        Ok(file.solution)
    }
}

/// Every record must hold one entry per labelled reservoir and variable, so
/// the read interface can index without bounds failures.
fn check_shape(header: &SolutionHeader, solution: &Solution) -> Result<(), DeserializeError> {
    let n = solution.reservoirs.len();
    let v = solution.variables.len();
    if header.states != solution.states.len() as u64 {
        return Err(DeserializeError::Malformed(format!(
            "header lists {} states, found {}",
            header.states,
            solution.states.len()
        )));
    }
    for state in &solution.states {
        let fits = state.fluid_masses.len() == n
            && state.volumes.len() == n
            && state.variable_masses.len() == n
            && state.variable_masses.iter().all(|m| m.len() == v);
        if !fits {
            return Err(DeserializeError::Malformed(format!(
                "state at timestep {} does not match {n} reservoirs x {v} variables",
                state.timestep
            )));
        }
    }
    for rate in &solution.rates {
        let fits = rate.fluid.len() == n
            && rate.variables.len() == n
            && rate.variables.iter().all(|m| m.len() == v);
        if !fits {
            return Err(DeserializeError::Malformed(format!(
                "rates of step {} do not match {n} reservoirs x {v} variables",
                rate.timestep
            )));
        }
    }
    Ok(())
}
