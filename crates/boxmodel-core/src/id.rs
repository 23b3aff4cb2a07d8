use serde::{Deserialize, Serialize};

/// Identifies a reservoir (box). Assigned contiguously from 0 in registration
/// order and used as the row/column index of every assembled array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReservoirId(pub u32);

/// Identifies a tracked variable. Indexes the variable axis of arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VariableId(pub u32);

/// Identifies a carrier fluid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FluidId(pub u32);

impl ReservoirId {
    /// Row/column position in assembled arrays.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl VariableId {
    /// Position on the variable axis.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl FluidId {
    /// Position in the system's fluid list.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}
