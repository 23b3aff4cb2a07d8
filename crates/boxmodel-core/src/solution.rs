//! Time-indexed results of a solver run.
//!
//! A [`Solution`] holds one [`StateRecord`] per timestep (the initial state at
//! timestep 0, then the state after every step) and one [`RateRecord`] per
//! step, keyed by the timestep the step started from. Values are stored as raw
//! SI magnitudes and handed back as [`Quantity`] values.

use serde::{Deserialize, Serialize};

use crate::assemble::MassRates;
use crate::id::VariableId;
use crate::quantity::{Dimension, Quantity};
use crate::system::{System, SystemError};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SolutionError {
    #[error("no reservoir named {0} in solution")]
    UnknownReservoir(String),
    #[error("no variable named {0} in solution")]
    UnknownVariable(String),
    #[error("timestep {timestep} out of range (solution has {len})")]
    TimestepOutOfRange { timestep: usize, len: usize },
}

/// Transport or transformation mechanism a rate is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mechanism {
    Flow,
    Flux,
    Process,
    Reaction,
}

impl Mechanism {
    pub const ALL: [Mechanism; 4] = [
        Mechanism::Flow,
        Mechanism::Flux,
        Mechanism::Process,
        Mechanism::Reaction,
    ];

    fn index(self) -> usize {
        match self {
            Mechanism::Flow => 0,
            Mechanism::Flux => 1,
            Mechanism::Process => 2,
            Mechanism::Reaction => 3,
        }
    }
}

/// A quantity tracked per reservoir.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateQuantity<'a> {
    FluidMass,
    Volume,
    VariableMass(&'a str),
    Concentration(&'a str),
}

/// Name and optional description of a reservoir or variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub description: Option<String>,
}

/// Reservoir state at one timestep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub timestep: u64,
    /// Seconds since the start of the run.
    pub time: f64,
    /// kg, per reservoir.
    pub fluid_masses: Vec<f64>,
    /// m^3, per reservoir.
    pub volumes: Vec<f64>,
    /// kg, `[reservoir][variable]`.
    pub variable_masses: Vec<Vec<f64>>,
}

/// Rates applied during one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRecord {
    /// Timestep the step started from.
    pub timestep: u64,
    /// kg/s, per reservoir.
    pub fluid: Vec<f64>,
    /// kg/s, `[reservoir][variable][mechanism]`.
    pub variables: Vec<Vec<[f64; 4]>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    /// Step length in seconds.
    pub(crate) timestep: f64,
    pub(crate) reservoirs: Vec<Label>,
    pub(crate) variables: Vec<Label>,
    pub(crate) states: Vec<StateRecord>,
    pub(crate) rates: Vec<RateRecord>,
}

impl Solution {
    /// An empty solution laid out for `system`.
    pub fn new(system: &System, timestep: Quantity) -> Self {
        Self {
            timestep: timestep.magnitude(),
            reservoirs: system
                .reservoirs()
                .map(|r| Label {
                    name: r.name().to_string(),
                    description: r.description().map(str::to_string),
                })
                .collect(),
            variables: system
                .variables()
                .map(|v| Label {
                    name: v.name.clone(),
                    description: v.description.clone(),
                })
                .collect(),
            states: Vec::new(),
            rates: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Write interface
    // -----------------------------------------------------------------------

    /// Append the current state of `system` as timestep `timestep`.
    pub fn record_state(&mut self, timestep: u64, system: &System) -> Result<(), SystemError> {
        let t = Quantity::from_base(timestep as f64 * self.timestep, Dimension::TIME);
        let mut fluid_masses = Vec::with_capacity(system.reservoir_count());
        let mut volumes = Vec::with_capacity(system.reservoir_count());
        let mut variable_masses = Vec::with_capacity(system.reservoir_count());
        for id in system.reservoir_ids() {
            let reservoir = system.reservoir(id)?;
            fluid_masses.push(reservoir.fluid_mass().magnitude());
            volumes.push(system.reservoir_volume(id, t)?.magnitude());
            let masses = system
                .variable_ids()
                .map(|v| reservoir.variable_mass(v).map(|m| m.magnitude()))
                .collect::<Result<Vec<_>, _>>()?;
            variable_masses.push(masses);
        }
        self.states.push(StateRecord {
            timestep,
            time: t.magnitude(),
            fluid_masses,
            volumes,
            variable_masses,
        });
        Ok(())
    }

    /// Append the rates applied during the step starting at `timestep`.
    pub fn record_rates(&mut self, timestep: u64, rates: &MassRates) {
        let n = rates.fluid.len();
        let variables = (0..n)
            .map(|b| {
                rates
                    .mechanisms
                    .iter()
                    .map(|m| {
                        [
                            m.flow.magnitudes()[b],
                            m.flux.magnitudes()[b],
                            m.process.magnitudes()[b],
                            m.reaction.magnitudes()[b],
                        ]
                    })
                    .collect()
            })
            .collect();
        self.rates.push(RateRecord {
            timestep,
            fluid: rates.fluid.magnitudes().to_vec(),
            variables,
        });
    }

    // -----------------------------------------------------------------------
    // Read interface
    // -----------------------------------------------------------------------

    /// Step length the run used.
    pub fn timestep(&self) -> Quantity {
        Quantity::from_base(self.timestep, Dimension::TIME)
    }

    /// Number of recorded states (steps + 1).
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Reservoir labels in id order.
    pub fn reservoirs(&self) -> &[Label] {
        &self.reservoirs
    }

    /// Variable labels in id order.
    pub fn variables(&self) -> &[Label] {
        &self.variables
    }

    /// Raw state records, one per timestep.
    pub fn states(&self) -> &[StateRecord] {
        &self.states
    }

    /// Raw rate records, one per step.
    pub fn rates(&self) -> &[RateRecord] {
        &self.rates
    }

    /// Simulated time of every recorded state.
    pub fn times(&self) -> Vec<Quantity> {
        self.states
            .iter()
            .map(|s| Quantity::from_base(s.time, Dimension::TIME))
            .collect()
    }

    fn reservoir_index(&self, name: &str) -> Result<usize, SolutionError> {
        self.reservoirs
            .iter()
            .position(|l| l.name == name)
            .ok_or_else(|| SolutionError::UnknownReservoir(name.to_string()))
    }

    fn variable_index(&self, name: &str) -> Result<usize, SolutionError> {
        self.variables
            .iter()
            .position(|l| l.name == name)
            .ok_or_else(|| SolutionError::UnknownVariable(name.to_string()))
    }

    /// Variable id of `name` in the system this solution was recorded from.
    pub fn variable_id(&self, name: &str) -> Result<VariableId, SolutionError> {
        Ok(VariableId(self.variable_index(name)? as u32))
    }

    fn extract(
        state: &StateRecord,
        b: usize,
        quantity: Resolved,
    ) -> Quantity {
        match quantity {
            Resolved::FluidMass => Quantity::from_base(state.fluid_masses[b], Dimension::MASS),
            Resolved::Volume => Quantity::from_base(state.volumes[b], Dimension::VOLUME),
            Resolved::VariableMass(v) => {
                Quantity::from_base(state.variable_masses[b][v], Dimension::MASS)
            }
            Resolved::Concentration(v) => {
                let fluid = state.fluid_masses[b];
                let var = state.variable_masses[b][v];
                Quantity::dimensionless(crate::entity::concentration(fluid, var))
            }
        }
    }

    fn resolve(&self, quantity: StateQuantity<'_>) -> Result<Resolved, SolutionError> {
        Ok(match quantity {
            StateQuantity::FluidMass => Resolved::FluidMass,
            StateQuantity::Volume => Resolved::Volume,
            StateQuantity::VariableMass(v) => Resolved::VariableMass(self.variable_index(v)?),
            StateQuantity::Concentration(v) => Resolved::Concentration(self.variable_index(v)?),
        })
    }

    /// Value of `quantity` in `reservoir` at `timestep`.
    pub fn value(
        &self,
        timestep: usize,
        reservoir: &str,
        quantity: StateQuantity<'_>,
    ) -> Result<Quantity, SolutionError> {
        let b = self.reservoir_index(reservoir)?;
        let resolved = self.resolve(quantity)?;
        let state = self
            .states
            .get(timestep)
            .ok_or(SolutionError::TimestepOutOfRange {
                timestep,
                len: self.states.len(),
            })?;
        Ok(Self::extract(state, b, resolved))
    }

    /// `quantity` in `reservoir` at every timestep.
    pub fn series(
        &self,
        reservoir: &str,
        quantity: StateQuantity<'_>,
    ) -> Result<Vec<Quantity>, SolutionError> {
        let b = self.reservoir_index(reservoir)?;
        let resolved = self.resolve(quantity)?;
        Ok(self
            .states
            .iter()
            .map(|s| Self::extract(s, b, resolved))
            .collect())
    }

    /// Fluid mass of `reservoir` at every timestep.
    pub fn fluid_mass_series(&self, reservoir: &str) -> Result<Vec<Quantity>, SolutionError> {
        self.series(reservoir, StateQuantity::FluidMass)
    }

    pub fn volume_series(&self, reservoir: &str) -> Result<Vec<Quantity>, SolutionError> {
        self.series(reservoir, StateQuantity::Volume)
    }

    /// Mass of `variable` in `reservoir` at every timestep.
    pub fn variable_mass_series(
        &self,
        reservoir: &str,
        variable: &str,
    ) -> Result<Vec<Quantity>, SolutionError> {
        self.series(reservoir, StateQuantity::VariableMass(variable))
    }

    pub fn concentration_series(
        &self,
        reservoir: &str,
        variable: &str,
    ) -> Result<Vec<Quantity>, SolutionError> {
        self.series(reservoir, StateQuantity::Concentration(variable))
    }

    /// Mass of `variable` summed over all reservoirs, per timestep.
    pub fn total_variable_mass_series(&self, variable: &str) -> Result<Vec<Quantity>, SolutionError> {
        let v = self.variable_index(variable)?;
        Ok(self
            .states
            .iter()
            .map(|s| {
                let total = s.variable_masses.iter().map(|m| m[v]).sum();
                Quantity::from_base(total, Dimension::MASS)
            })
            .collect())
    }

    /// Net rate of `variable` in `reservoir` due to `mechanism`, one entry
    /// per step.
    pub fn rate_series(
        &self,
        reservoir: &str,
        variable: &str,
        mechanism: Mechanism,
    ) -> Result<Vec<Quantity>, SolutionError> {
        let b = self.reservoir_index(reservoir)?;
        let v = self.variable_index(variable)?;
        Ok(self
            .rates
            .iter()
            .map(|r| Quantity::from_base(r.variables[b][v][mechanism.index()], Dimension::MASS_RATE))
            .collect())
    }

    /// Net fluid rate of `reservoir`, one entry per step.
    pub fn fluid_rate_series(&self, reservoir: &str) -> Result<Vec<Quantity>, SolutionError> {
        let b = self.reservoir_index(reservoir)?;
        Ok(self
            .rates
            .iter()
            .map(|r| Quantity::from_base(r.fluid[b], Dimension::MASS_RATE))
            .collect())
    }
}

#[derive(Debug, Clone, Copy)]
enum Resolved {
    FluidMass,
    Volume,
    VariableMass(usize),
    Concentration(usize),
}
