//! System registry: fluids, variables, reservoirs and descriptors.
//!
//! Construction follows a builder lifecycle. [`SystemBuilder`] assigns
//! contiguous ids in registration order and checks names and constant
//! dimensions eagerly; [`SystemBuilder::build`] validates every id reference
//! and produces the [`System`]. After that only reservoir masses change.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::context::Context;
use crate::descriptor::{Endpoint, Flow, Flux, Process, Reaction};
use crate::entity::{Condition, Fluid, FluidDef, Reservoir, ReservoirDef, Variable, VariableDef};
use crate::id::{FluidId, ReservoirId, VariableId};
use crate::quantity::{Dimension, Quantity, QuantityError};
use crate::sim::StateHash;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },
    #[error("duplicate {kind} name: {name}")]
    Duplicate { kind: &'static str, name: String },
    #[error("unknown {kind} id: {id}")]
    UnknownId { kind: &'static str, id: u32 },
    #[error("invalid descriptor {name}: {reason}")]
    InvalidDescriptor { name: String, reason: String },
    #[error("evaluating {descriptor}: {source}")]
    Evaluation {
        descriptor: String,
        #[source]
        source: Box<SystemError>,
    },
    #[error("context has no focus reservoir")]
    NoFocus,
    #[error("shape mismatch: expected length {expected}, found {found}")]
    ShapeMismatch { expected: usize, found: usize },
    #[error(transparent)]
    Quantity(#[from] QuantityError),
}

impl SystemError {
    /// The innermost error, skipping `Evaluation` wrappers.
    pub fn root_cause(&self) -> &SystemError {
        match self {
            SystemError::Evaluation { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Names already taken within one kind of entity or descriptor.
#[derive(Debug, Default)]
struct NameSet(HashSet<String>);

impl NameSet {
    fn claim(&mut self, kind: &'static str, name: &str) -> Result<(), SystemError> {
        if !self.0.insert(name.to_string()) {
            return Err(SystemError::Duplicate {
                kind,
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct SystemBuilder {
    global_condition: Condition,
    fluids: Vec<FluidDef>,
    fluid_name_to_id: HashMap<String, FluidId>,
    variables: Vec<VariableDef>,
    variable_name_to_id: HashMap<String, VariableId>,
    reservoirs: Vec<ReservoirDef>,
    reservoir_name_to_id: HashMap<String, ReservoirId>,
    flows: Vec<Flow>,
    flow_names: NameSet,
    fluxes: Vec<Flux>,
    flux_names: NameSet,
    processes: Vec<Process>,
    process_names: NameSet,
    reactions: Vec<Reaction>,
    reaction_names: NameSet,
}

impl Default for SystemBuilder {
    fn default() -> Self {
        Self::new(Condition::new())
    }
}

impl SystemBuilder {
    pub fn new(global_condition: Condition) -> Self {
        Self {
            global_condition,
            fluids: Vec::new(),
            fluid_name_to_id: HashMap::new(),
            variables: Vec::new(),
            variable_name_to_id: HashMap::new(),
            reservoirs: Vec::new(),
            reservoir_name_to_id: HashMap::new(),
            flows: Vec::new(),
            flow_names: NameSet::default(),
            fluxes: Vec::new(),
            flux_names: NameSet::default(),
            processes: Vec::new(),
            process_names: NameSet::default(),
            reactions: Vec::new(),
            reaction_names: NameSet::default(),
        }
    }

    pub fn register_fluid(&mut self, def: FluidDef) -> Result<FluidId, SystemError> {
        if self.fluid_name_to_id.contains_key(&def.name) {
            return Err(SystemError::Duplicate {
                kind: "fluid",
                name: def.name,
            });
        }
        def.density.check_constant(Dimension::DENSITY)?;
        let id = FluidId(self.fluids.len() as u32);
        debug!(fluid = %def.name, id = id.0, "registered fluid");
        self.fluid_name_to_id.insert(def.name.clone(), id);
        self.fluids.push(def);
        Ok(id)
    }

    pub fn register_variable(&mut self, def: VariableDef) -> Result<VariableId, SystemError> {
        if self.variable_name_to_id.contains_key(&def.name) {
            return Err(SystemError::Duplicate {
                kind: "variable",
                name: def.name,
            });
        }
        let id = VariableId(self.variables.len() as u32);
        debug!(variable = %def.name, id = id.0, mobile = def.mobile, "registered variable");
        self.variable_name_to_id.insert(def.name.clone(), id);
        self.variables.push(def);
        Ok(id)
    }

    pub fn register_reservoir(&mut self, def: ReservoirDef) -> Result<ReservoirId, SystemError> {
        if self.reservoir_name_to_id.contains_key(&def.name) {
            return Err(SystemError::Duplicate {
                kind: "reservoir",
                name: def.name,
            });
        }
        check_reservoir_masses(&def)?;
        let id = ReservoirId(self.reservoirs.len() as u32);
        debug!(reservoir = %def.name, id = id.0, "registered reservoir");
        self.reservoir_name_to_id.insert(def.name.clone(), id);
        self.reservoirs.push(def);
        Ok(id)
    }

    pub fn register_flow(&mut self, flow: Flow) -> Result<(), SystemError> {
        check_endpoints(&flow.name, flow.source, flow.target)?;
        flow.rate.check_constant(Dimension::MASS_RATE)?;
        for concentration in flow.inflow_concentrations.values() {
            concentration.ensure(Dimension::DIMENSIONLESS)?;
        }
        if !flow.inflow_concentrations.is_empty() && !flow.source.is_external() {
            return Err(invalid(
                &flow.name,
                "inflow concentrations require an external source",
            ));
        }
        self.flow_names.claim("flow", &flow.name)?;
        debug!(flow = %flow.name, "registered flow");
        self.flows.push(flow);
        Ok(())
    }

    pub fn register_flux(&mut self, flux: Flux) -> Result<(), SystemError> {
        check_endpoints(&flux.name, flux.source, flux.target)?;
        flux.rate.check_constant(Dimension::MASS_RATE)?;
        self.flux_names.claim("flux", &flux.name)?;
        debug!(flux = %flux.name, "registered flux");
        self.fluxes.push(flux);
        Ok(())
    }

    pub fn register_process(&mut self, process: Process) -> Result<(), SystemError> {
        process.rate.check_constant(Dimension::MASS_RATE)?;
        self.process_names.claim("process", &process.name)?;
        debug!(process = %process.name, "registered process");
        self.processes.push(process);
        Ok(())
    }

    pub fn register_reaction(&mut self, reaction: Reaction) -> Result<(), SystemError> {
        reaction.rate.check_constant(Dimension::MASS_RATE)?;
        if reaction.coefficients.is_empty() {
            return Err(invalid(&reaction.name, "reaction involves no variables"));
        }
        let mut seen = HashSet::new();
        for (variable, coefficient) in &reaction.coefficients {
            if !seen.insert(*variable) {
                return Err(invalid(&reaction.name, "variable listed twice"));
            }
            if !coefficient.is_finite() {
                return Err(invalid(&reaction.name, "non-finite coefficient"));
            }
        }
        self.reaction_names.claim("reaction", &reaction.name)?;
        debug!(reaction = %reaction.name, "registered reaction");
        self.reactions.push(reaction);
        Ok(())
    }

    /// Edit a registered reservoir definition by name, e.g. to seed masses
    /// of variables registered after it.
    ///
    /// The edit is applied to a copy and stored only if it passes the same
    /// checks as registration; a rejected edit leaves the builder unchanged.
    pub fn mutate_reservoir<F>(&mut self, name: &str, f: F) -> Result<(), SystemError>
    where
        F: FnOnce(&mut ReservoirDef),
    {
        let id = self.reservoir_id(name).ok_or_else(|| SystemError::NotFound {
            kind: "reservoir",
            name: name.to_string(),
        })?;
        let mut edited = self.reservoirs[id.index()].clone();
        f(&mut edited);
        if edited.name != name {
            return Err(invalid(name, "reservoirs cannot be renamed"));
        }
        check_reservoir_masses(&edited)?;
        self.reservoirs[id.index()] = edited;
        Ok(())
    }

    pub fn fluid_id(&self, name: &str) -> Option<FluidId> {
        self.fluid_name_to_id.get(name).copied()
    }

    pub fn variable_id(&self, name: &str) -> Option<VariableId> {
        self.variable_name_to_id.get(name).copied()
    }

    pub fn reservoir_id(&self, name: &str) -> Option<ReservoirId> {
        self.reservoir_name_to_id.get(name).copied()
    }

    /// Validate every id reference and freeze the system.
    pub fn build(self) -> Result<System, SystemError> {
        let n_fluids = self.fluids.len();
        let n_variables = self.variables.len();
        let n_reservoirs = self.reservoirs.len();

        let check_reservoir = |id: ReservoirId| {
            if id.index() < n_reservoirs {
                Ok(())
            } else {
                Err(SystemError::UnknownId {
                    kind: "reservoir",
                    id: id.0,
                })
            }
        };
        let check_variable = |id: VariableId| {
            if id.index() < n_variables {
                Ok(())
            } else {
                Err(SystemError::UnknownId {
                    kind: "variable",
                    id: id.0,
                })
            }
        };
        let check_endpoint = |e: Endpoint| match e {
            Endpoint::Reservoir(id) => check_reservoir(id),
            Endpoint::External => Ok(()),
        };

        for flow in &self.flows {
            check_endpoint(flow.source)?;
            check_endpoint(flow.target)?;
            for variable in flow.inflow_concentrations.keys() {
                check_variable(*variable)?;
            }
        }
        for flux in &self.fluxes {
            check_endpoint(flux.source)?;
            check_endpoint(flux.target)?;
            check_variable(flux.variable)?;
        }
        for process in &self.processes {
            check_reservoir(process.reservoir)?;
            check_variable(process.variable)?;
        }
        let mut reactions_by_reservoir = vec![Vec::new(); n_reservoirs];
        for (index, reaction) in self.reactions.iter().enumerate() {
            check_reservoir(reaction.reservoir)?;
            for (variable, _) in &reaction.coefficients {
                check_variable(*variable)?;
            }
            reactions_by_reservoir[reaction.reservoir.index()].push(index);
        }

        let fluids = self
            .fluids
            .into_iter()
            .enumerate()
            .map(|(i, def)| Fluid {
                id: FluidId(i as u32),
                name: def.name,
                density: def.density,
                description: def.description,
            })
            .collect();

        let variables = self
            .variables
            .into_iter()
            .enumerate()
            .map(|(i, def)| Variable {
                id: VariableId(i as u32),
                name: def.name,
                mobile: def.mobile,
                description: def.description,
            })
            .collect();

        let mut reservoirs = Vec::with_capacity(n_reservoirs);
        for (i, def) in self.reservoirs.into_iter().enumerate() {
            if def.fluid.index() >= n_fluids {
                return Err(SystemError::UnknownId {
                    kind: "fluid",
                    id: def.fluid.0,
                });
            }
            let mut masses = vec![Quantity::zero(Dimension::MASS); n_variables];
            for (variable, mass) in def.variable_masses {
                check_variable(variable)?;
                masses[variable.index()] = mass;
            }
            let condition = def
                .condition
                .unwrap_or_else(|| self.global_condition.clone());
            reservoirs.push(Reservoir::new(
                ReservoirId(i as u32),
                def.name,
                def.fluid,
                def.fluid_mass,
                masses,
                condition,
                def.description,
            ));
        }

        debug!(
            reservoirs = n_reservoirs,
            variables = n_variables,
            flows = self.flows.len(),
            fluxes = self.fluxes.len(),
            processes = self.processes.len(),
            reactions = self.reactions.len(),
            "built system"
        );

        Ok(System {
            global_condition: self.global_condition,
            fluids,
            fluid_name_to_id: self.fluid_name_to_id,
            variables,
            variable_name_to_id: self.variable_name_to_id,
            reservoirs,
            reservoir_name_to_id: self.reservoir_name_to_id,
            flows: self.flows,
            fluxes: self.fluxes,
            processes: self.processes,
            reactions: self.reactions,
            reactions_by_reservoir,
        })
    }
}

fn check_reservoir_masses(def: &ReservoirDef) -> Result<(), SystemError> {
    def.fluid_mass.ensure(Dimension::MASS)?;
    for (_, mass) in &def.variable_masses {
        mass.ensure(Dimension::MASS)?;
    }
    Ok(())
}

fn invalid(name: &str, reason: &str) -> SystemError {
    SystemError::InvalidDescriptor {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn check_endpoints(name: &str, source: Endpoint, target: Endpoint) -> Result<(), SystemError> {
    if source.is_external() && target.is_external() {
        return Err(invalid(name, "both endpoints are external"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// A built box model. Entities and descriptors are fixed; reservoir masses
/// are the only mutable state.
#[derive(Debug, Clone)]
pub struct System {
    global_condition: Condition,
    fluids: Vec<Fluid>,
    fluid_name_to_id: HashMap<String, FluidId>,
    variables: Vec<Variable>,
    variable_name_to_id: HashMap<String, VariableId>,
    reservoirs: Vec<Reservoir>,
    reservoir_name_to_id: HashMap<String, ReservoirId>,
    flows: Vec<Flow>,
    fluxes: Vec<Flux>,
    processes: Vec<Process>,
    reactions: Vec<Reaction>,
    /// Indices into `reactions`, grouped by reservoir, in registration order.
    reactions_by_reservoir: Vec<Vec<usize>>,
}

impl System {
    /// Fallback condition for reservoirs registered without their own.
    pub fn global_condition(&self) -> &Condition {
        &self.global_condition
    }

    /// Number of reservoirs, N.
    pub fn reservoir_count(&self) -> usize {
        self.reservoirs.len()
    }

    /// Number of tracked variables.
    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    pub fn fluid_count(&self) -> usize {
        self.fluids.len()
    }

    /// Reservoir by id; `UnknownId` if out of range.
    pub fn reservoir(&self, id: ReservoirId) -> Result<&Reservoir, SystemError> {
        self.reservoirs.get(id.index()).ok_or(SystemError::UnknownId {
            kind: "reservoir",
            id: id.0,
        })
    }

    pub fn variable(&self, id: VariableId) -> Result<&Variable, SystemError> {
        self.variables.get(id.index()).ok_or(SystemError::UnknownId {
            kind: "variable",
            id: id.0,
        })
    }

    pub fn fluid(&self, id: FluidId) -> Result<&Fluid, SystemError> {
        self.fluids.get(id.index()).ok_or(SystemError::UnknownId {
            kind: "fluid",
            id: id.0,
        })
    }

    /// Id of the reservoir named `name`.
    pub fn reservoir_id(&self, name: &str) -> Result<ReservoirId, SystemError> {
        lookup(&self.reservoir_name_to_id, "reservoir", name)
    }

    pub fn variable_id(&self, name: &str) -> Result<VariableId, SystemError> {
        lookup(&self.variable_name_to_id, "variable", name)
    }

    pub fn fluid_id(&self, name: &str) -> Result<FluidId, SystemError> {
        lookup(&self.fluid_name_to_id, "fluid", name)
    }

    pub fn reservoir_by_name(&self, name: &str) -> Result<&Reservoir, SystemError> {
        self.reservoir(self.reservoir_id(name)?)
    }

    /// Reservoirs in id order.
    pub fn reservoirs(&self) -> impl Iterator<Item = &Reservoir> {
        self.reservoirs.iter()
    }

    /// Variables in id order.
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter()
    }

    /// Fluids in id order.
    pub fn fluids(&self) -> impl Iterator<Item = &Fluid> {
        self.fluids.iter()
    }

    /// `0..N` as reservoir ids.
    pub fn reservoir_ids(&self) -> impl Iterator<Item = ReservoirId> {
        (0..self.reservoirs.len() as u32).map(ReservoirId)
    }

    pub fn variable_ids(&self) -> impl Iterator<Item = VariableId> {
        (0..self.variables.len() as u32).map(VariableId)
    }

    /// Flows in registration order.
    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    /// Fluxes in registration order.
    pub fn fluxes(&self) -> &[Flux] {
        &self.fluxes
    }

    /// Processes in registration order.
    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub fn reactions(&self) -> &[Reaction] {
        &self.reactions
    }

    /// Reactions of one reservoir, in registration order. The position in
    /// this sequence is the reaction axis of the rate cube.
    pub fn reactions_in(&self, id: ReservoirId) -> impl Iterator<Item = &Reaction> {
        self.reactions_by_reservoir
            .get(id.index())
            .into_iter()
            .flatten()
            .map(|&i| &self.reactions[i])
    }

    /// Indices into [`reactions`](Self::reactions) for one reservoir.
    pub(crate) fn reaction_indices(&self, id: ReservoirId) -> &[usize] {
        self.reactions_by_reservoir
            .get(id.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Largest number of reactions attached to any single reservoir.
    pub fn max_reactions_per_reservoir(&self) -> usize {
        self.reactions_by_reservoir
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
    }

    // -----------------------------------------------------------------------
    // Contexts
    // -----------------------------------------------------------------------

    /// Context focused on `focus`, or the global context for `None`.
    pub fn context(&self, focus: Option<ReservoirId>) -> Result<Context<'_>, SystemError> {
        match focus {
            Some(id) => self.reservoir_context(id),
            None => Ok(self.global_context()),
        }
    }

    /// Context with no focus reservoir.
    pub fn global_context(&self) -> Context<'_> {
        Context::new(self, None)
    }

    pub fn reservoir_context(&self, id: ReservoirId) -> Result<Context<'_>, SystemError> {
        Ok(Context::new(self, Some(self.reservoir(id)?)))
    }

    /// Volume of reservoir `id` at time `t`, with density evaluated against
    /// the reservoir's own context.
    pub fn reservoir_volume(&self, id: ReservoirId, t: Quantity) -> Result<Quantity, SystemError> {
        let reservoir = self.reservoir(id)?;
        let fluid = self.fluid(reservoir.fluid())?;
        let ctx = Context::new(self, Some(reservoir));
        reservoir
            .volume(fluid, t, &ctx)
            .map_err(|e| SystemError::Evaluation {
                descriptor: format!("density of {}", fluid.name),
                source: Box::new(e),
            })
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Overwrite the fluid mass of `id`. Only the dimension is checked.
    pub fn set_fluid_mass(&mut self, id: ReservoirId, mass: Quantity) -> Result<(), SystemError> {
        let reservoir = self
            .reservoirs
            .get_mut(id.index())
            .ok_or(SystemError::UnknownId {
                kind: "reservoir",
                id: id.0,
            })?;
        reservoir.set_fluid_mass(mass)
    }

    pub fn set_variable_mass(
        &mut self,
        id: ReservoirId,
        variable: VariableId,
        mass: Quantity,
    ) -> Result<(), SystemError> {
        let reservoir = self
            .reservoirs
            .get_mut(id.index())
            .ok_or(SystemError::UnknownId {
                kind: "reservoir",
                id: id.0,
            })?;
        reservoir.set_variable_mass(variable, mass)
    }

    /// FNV-1a hash over the bit patterns of every reservoir mass.
    pub fn state_hash(&self) -> u64 {
        let mut h = StateHash::new();
        for reservoir in &self.reservoirs {
            h.write_u32(reservoir.id().0);
            h.write_f64(reservoir.fluid_mass().magnitude());
            for variable in self.variable_ids() {
                let mass = reservoir
                    .variable_mass(variable)
                    .map(|m| m.magnitude())
                    .unwrap_or(0.0);
                h.write_f64(mass);
            }
        }
        h.finish()
    }
}

fn lookup<Id: Copy>(
    map: &HashMap<String, Id>,
    kind: &'static str,
    name: &str,
) -> Result<Id, SystemError> {
    map.get(name).copied().ok_or_else(|| SystemError::NotFound {
        kind,
        name: name.to_string(),
    })
}
