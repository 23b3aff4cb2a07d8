//! Static vocabulary of a box model: fluids, variables, conditions and
//! reservoirs (boxes).
//!
//! User code describes entities with the `*Def` types; the
//! [`SystemBuilder`](crate::system::SystemBuilder) assigns ids and turns them
//! into the resolved types stored in a [`System`](crate::system::System).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::expression::Expression;
use crate::id::{FluidId, ReservoirId, VariableId};
use crate::quantity::{Dimension, Quantity};
use crate::system::SystemError;

// ---------------------------------------------------------------------------
// Fluid
// ---------------------------------------------------------------------------

/// A carrier medium definition. Density may depend on context.
#[derive(Debug, Clone)]
pub struct FluidDef {
    pub name: String,
    pub density: Expression,
    pub description: Option<String>,
}

impl FluidDef {
    pub fn new(name: &str, density: impl Into<Expression>) -> Self {
        Self {
            name: name.to_string(),
            density: density.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// A registered fluid.
#[derive(Debug, Clone)]
pub struct Fluid {
    pub id: FluidId,
    pub name: String,
    pub density: Expression,
    pub description: Option<String>,
}

impl Fluid {
    /// Density at time `t`, evaluated against `ctx`.
    pub fn density(&self, t: Quantity, ctx: &Context<'_>) -> Result<Quantity, SystemError> {
        self.density.evaluate_as(t, ctx, Dimension::DENSITY)
    }
}

// ---------------------------------------------------------------------------
// Variable
// ---------------------------------------------------------------------------

/// A tracked quantity definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDef {
    pub name: String,
    /// Immobile variables are not carried by advective flows.
    pub mobile: bool,
    pub description: Option<String>,
}

impl VariableDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            mobile: true,
            description: None,
        }
    }

    pub fn immobile(mut self) -> Self {
        self.mobile = false;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// A registered variable. Identity is by `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub id: VariableId,
    pub name: String,
    pub mobile: bool,
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// A named bundle of scalar physical quantities (temperature, salinity, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    quantities: BTreeMap<String, Quantity>,
}

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: Quantity) -> Self {
        self.quantities.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<Quantity> {
        self.quantities.get(name).copied()
    }

    /// Look up `name`, failing with `NotFound` if absent.
    pub fn require(&self, name: &str) -> Result<Quantity, SystemError> {
        self.get(name).ok_or_else(|| SystemError::NotFound {
            kind: "condition quantity",
            name: name.to_string(),
        })
    }

    /// Look up `name` and check its dimension.
    pub fn require_as(&self, name: &str, expected: Dimension) -> Result<Quantity, SystemError> {
        Ok(self.require(name)?.ensure(expected)?)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.quantities.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.quantities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quantities.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Quantity)> for Condition {
    fn from_iter<I: IntoIterator<Item = (S, Quantity)>>(iter: I) -> Self {
        Self {
            quantities: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reservoir (box)
// ---------------------------------------------------------------------------

/// Definition of a reservoir before registration.
#[derive(Debug, Clone)]
pub struct ReservoirDef {
    pub name: String,
    pub fluid: FluidId,
    pub fluid_mass: Quantity,
    pub variable_masses: Vec<(VariableId, Quantity)>,
    /// Falls back to a copy of the global condition when `None`.
    pub condition: Option<Condition>,
    pub description: Option<String>,
}

impl ReservoirDef {
    pub fn new(name: &str, fluid: FluidId, fluid_mass: Quantity) -> Self {
        Self {
            name: name.to_string(),
            fluid,
            fluid_mass,
            variable_masses: Vec::new(),
            condition: None,
            description: None,
        }
    }

    pub fn with_variable_mass(mut self, variable: VariableId, mass: Quantity) -> Self {
        self.variable_masses.push((variable, mass));
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// A reservoir holding one fluid mass and one mass per variable.
///
/// Only the solver (through [`System`](crate::system::System)) mutates the
/// masses; everything else here is a derived read accessor.
#[derive(Debug, Clone)]
pub struct Reservoir {
    id: ReservoirId,
    name: String,
    fluid: FluidId,
    fluid_mass: Quantity,
    /// Indexed by `VariableId`.
    variable_masses: Vec<Quantity>,
    condition: Condition,
    description: Option<String>,
}

impl Reservoir {
    pub(crate) fn new(
        id: ReservoirId,
        name: String,
        fluid: FluidId,
        fluid_mass: Quantity,
        variable_masses: Vec<Quantity>,
        condition: Condition,
        description: Option<String>,
    ) -> Self {
        Self {
            id,
            name,
            fluid,
            fluid_mass,
            variable_masses,
            condition,
            description,
        }
    }

    pub fn id(&self) -> ReservoirId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fluid(&self) -> FluidId {
        self.fluid
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn fluid_mass(&self) -> Quantity {
        self.fluid_mass
    }

    /// Total mass: fluid plus every variable.
    pub fn mass(&self) -> Quantity {
        let total: f64 = self.fluid_mass.magnitude()
            + self
                .variable_masses
                .iter()
                .map(Quantity::magnitude)
                .sum::<f64>();
        Quantity::from_base(total, Dimension::MASS)
    }

    pub fn variable_mass(&self, variable: VariableId) -> Result<Quantity, SystemError> {
        self.variable_masses
            .get(variable.index())
            .copied()
            .ok_or(SystemError::UnknownId {
                kind: "variable",
                id: variable.0,
            })
    }

    /// `m_var / (m_fluid + m_var)`, dimensionless; `0` when both are zero.
    pub fn concentration(&self, variable: VariableId) -> Result<Quantity, SystemError> {
        let var_mass = self.variable_mass(variable)?.magnitude();
        Ok(Quantity::dimensionless(concentration(
            self.fluid_mass.magnitude(),
            var_mass,
        )))
    }

    /// `fluid_mass / density`, with density evaluated against `ctx`.
    pub fn volume(
        &self,
        fluid: &Fluid,
        t: Quantity,
        ctx: &Context<'_>,
    ) -> Result<Quantity, SystemError> {
        let density = fluid.density(t, ctx)?;
        Ok(self.fluid_mass / density)
    }

    pub(crate) fn set_fluid_mass(&mut self, mass: Quantity) -> Result<(), SystemError> {
        self.fluid_mass = mass.ensure(Dimension::MASS)?;
        Ok(())
    }

    pub(crate) fn set_variable_mass(
        &mut self,
        variable: VariableId,
        mass: Quantity,
    ) -> Result<(), SystemError> {
        let mass = mass.ensure(Dimension::MASS)?;
        let slot = self
            .variable_masses
            .get_mut(variable.index())
            .ok_or(SystemError::UnknownId {
                kind: "variable",
                id: variable.0,
            })?;
        *slot = mass;
        Ok(())
    }
}

/// Mass fraction of a variable in its reservoir. The variable's own mass is
/// part of the denominator.
pub fn concentration(fluid_mass: f64, variable_mass: f64) -> f64 {
    let total = fluid_mass + variable_mass;
    if total == 0.0 {
        0.0
    } else {
        variable_mass / total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::{KELVIN, KILOGRAM};

    fn reservoir(fluid_kg: f64, var_kg: &[f64]) -> Reservoir {
        Reservoir::new(
            ReservoirId(0),
            "box1".to_string(),
            FluidId(0),
            fluid_kg * KILOGRAM,
            var_kg.iter().map(|m| *m * KILOGRAM).collect(),
            Condition::new(),
            None,
        )
    }

    #[test]
    fn mass_includes_variables() {
        let r = reservoir(1e5, &[3.0, 3.0, 0.0, 0.0]);
        assert_eq!(r.mass(), (1e5 + 6.0) * KILOGRAM);
        assert_eq!(r.fluid_mass(), 1e5 * KILOGRAM);
    }

    #[test]
    fn concentration_includes_own_mass() {
        let r = reservoir(1e5, &[3.0]);
        let c = r.concentration(VariableId(0)).unwrap();
        assert!(c.is_dimensionless());
        assert_eq!(c.magnitude(), 3.0 / (1e5 + 3.0));
    }

    #[test]
    fn concentration_of_empty_reservoir_is_zero() {
        let r = reservoir(0.0, &[0.0]);
        assert_eq!(r.concentration(VariableId(0)).unwrap().magnitude(), 0.0);
    }

    #[test]
    fn unknown_variable_is_an_error() {
        let r = reservoir(1.0, &[]);
        assert!(matches!(
            r.concentration(VariableId(3)),
            Err(SystemError::UnknownId { kind: "variable", id: 3 })
        ));
    }

    #[test]
    fn set_masses_checks_dimension() {
        let mut r = reservoir(1.0, &[0.0]);
        assert!(r.set_variable_mass(VariableId(0), 2.0 * KILOGRAM).is_ok());
        assert!(r.set_variable_mass(VariableId(0), 2.0 * KELVIN).is_err());
        assert!(r.set_fluid_mass(2.0 * KELVIN).is_err());
        assert_eq!(r.variable_mass(VariableId(0)).unwrap(), 2.0 * KILOGRAM);
    }

    #[test]
    fn condition_lookup() {
        let c = Condition::new().with("T", 290.0 * KELVIN);
        assert_eq!(c.get("T"), Some(290.0 * KELVIN));
        assert!(c.get("S").is_none());
        assert!(matches!(
            c.require("S"),
            Err(SystemError::NotFound { kind: "condition quantity", .. })
        ));
        assert!(c.require_as("T", Dimension::TEMPERATURE).is_ok());
        assert!(matches!(
            c.require_as("T", Dimension::MASS),
            Err(SystemError::Quantity(_))
        ));
    }

    #[test]
    fn condition_from_iter() {
        let c: Condition = [("T", 1.0 * KELVIN), ("T2", 2.0 * KELVIN)].into_iter().collect();
        assert_eq!(c.len(), 2);
        assert_eq!(c.names().collect::<Vec<_>>(), vec!["T", "T2"]);
    }

    #[test]
    fn variable_def_builder() {
        let v = VariableDef::new("phyto").immobile().with_description("phytoplankton");
        assert!(!v.mobile);
        assert_eq!(v.description.as_deref(), Some("phytoplankton"));
    }
}
