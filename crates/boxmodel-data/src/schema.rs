//! Serde data file structs for declarative box models.
//!
//! These structs define the on-disk format for fluids, variables,
//! reservoirs, transport descriptors and solver settings. They are
//! deserialized from RON, JSON or TOML files and then resolved into a
//! `SystemBuilder` by the loader. Every rate in a data file is constant;
//! state-dependent rates are registered in code on the returned builder.

use std::collections::BTreeMap;

use boxmodel_core::solver::{IntegrationScheme, NegativeMassPolicy};
use serde::Deserialize;

// ===========================================================================
// Quantities
// ===========================================================================

/// A magnitude and a unit expression, e.g. `(value: 6e17, unit: "kg/year")`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuantityData {
    pub value: f64,
    #[serde(default)]
    pub unit: String,
}

/// Named quantities such as `{"T": (value: 288, unit: "K")}`.
pub type ConditionData = BTreeMap<String, QuantityData>;

fn default_true() -> bool {
    true
}

// ===========================================================================
// Entities
// ===========================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct FluidData {
    pub name: String,
    pub density: QuantityData,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VariableData {
    pub name: String,
    /// Whether advective flows carry this variable.
    #[serde(default = "default_true")]
    pub mobile: bool,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReservoirData {
    pub name: String,
    pub fluid: String,
    pub fluid_mass: QuantityData,
    /// Initial variable masses by variable name. Unlisted variables start at
    /// zero.
    #[serde(default)]
    pub variables: BTreeMap<String, QuantityData>,
    /// Local condition. When absent the reservoir uses the global condition.
    #[serde(default)]
    pub condition: Option<ConditionData>,
    #[serde(default)]
    pub description: Option<String>,
}

// ===========================================================================
// Descriptors
// ===========================================================================

/// A fluid flow. A missing `source` or `target` is the outside world.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowData {
    pub name: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    pub rate: QuantityData,
    #[serde(default = "default_true")]
    pub tracer_transport: bool,
    /// Dimensionless concentration of each variable in water entering from
    /// outside.
    #[serde(default)]
    pub inflow_concentrations: BTreeMap<String, QuantityData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FluxData {
    pub name: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    pub variable: String,
    pub rate: QuantityData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessData {
    pub name: String,
    pub reservoir: String,
    pub variable: String,
    /// Positive adds mass, negative removes it.
    pub rate: QuantityData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactionData {
    pub name: String,
    pub reservoir: String,
    /// Stoichiometric coefficient by variable name.
    pub coefficients: BTreeMap<String, f64>,
    pub rate: QuantityData,
}

// ===========================================================================
// Solver
// ===========================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct SolverData {
    pub timestep: QuantityData,
    pub steps: u64,
    #[serde(default)]
    pub scheme: IntegrationScheme,
    #[serde(default)]
    pub negative_mass: NegativeMassPolicy,
}

// ===========================================================================
// Model
// ===========================================================================

/// A complete model file.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelData {
    /// The global condition.
    #[serde(default)]
    pub condition: ConditionData,
    pub fluids: Vec<FluidData>,
    #[serde(default)]
    pub variables: Vec<VariableData>,
    pub reservoirs: Vec<ReservoirData>,
    #[serde(default)]
    pub flows: Vec<FlowData>,
    #[serde(default)]
    pub fluxes: Vec<FluxData>,
    #[serde(default)]
    pub processes: Vec<ProcessData>,
    #[serde(default)]
    pub reactions: Vec<ReactionData>,
    #[serde(default)]
    pub solver: Option<SolverData>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ron_model_with_defaults() {
        let src = r#"
#![enable(implicit_some)]
(
    fluids: [(name: "water", density: (value: 1000.0, unit: "kg/m^3"))],
    variables: [(name: "po4"), (name: "sediment", mobile: false)],
    reservoirs: [
        (
            name: "upper",
            fluid: "water",
            fluid_mass: (value: 3e19, unit: "kg"),
            variables: {"po4": (value: 6.1e10, unit: "kg")},
        ),
    ],
    flows: [(name: "river", target: "upper", rate: (value: 3e16, unit: "kg/year"))],
)
"#;
        let model: ModelData = ron::from_str(src).unwrap();
        assert_eq!(model.fluids[0].density.value, 1000.0);
        assert!(model.variables[0].mobile);
        assert!(!model.variables[1].mobile);
        assert!(model.reservoirs[0].condition.is_none());
        assert_eq!(model.flows[0].source, None);
        assert_eq!(model.flows[0].target.as_deref(), Some("upper"));
        assert!(model.flows[0].tracer_transport);
        assert!(model.solver.is_none());
        assert!(model.condition.is_empty());
    }

    #[test]
    fn toml_model_with_solver_section() {
        let src = r#"
[condition]
T = { value = 288.0, unit = "K" }

[[fluids]]
name = "water"
density = { value = 1000.0, unit = "kg/m^3" }

[[reservoirs]]
name = "lake"
fluid = "water"
fluid_mass = { value = 1e5, unit = "kg" }

[[processes]]
name = "leak"
reservoir = "lake"
variable = "salt"
rate = { value = -1.0, unit = "kg/year" }

[solver]
timestep = { value = 1.0, unit = "year" }
steps = 10
scheme = "Heun"
"#;
        let model: ModelData = toml::from_str(src).unwrap();
        assert_eq!(model.condition["T"].unit, "K");
        assert_eq!(model.processes[0].rate.value, -1.0);
        let solver = model.solver.unwrap();
        assert_eq!(solver.steps, 10);
        assert_eq!(solver.scheme, IntegrationScheme::Heun);
        assert_eq!(solver.negative_mass, NegativeMassPolicy::Fail);
    }

    #[test]
    fn json_reaction_coefficients() {
        let src = r#"{
            "fluids": [{"name": "water", "density": {"value": 1000, "unit": "kg/m^3"}}],
            "reservoirs": [],
            "reactions": [{
                "name": "a_to_b",
                "reservoir": "lake",
                "coefficients": {"A": -1, "B": 1},
                "rate": {"value": 2, "unit": "kg/year"}
            }]
        }"#;
        let model: ModelData = serde_json::from_str(src).unwrap();
        let reaction = &model.reactions[0];
        assert_eq!(reaction.coefficients["A"], -1.0);
        assert_eq!(reaction.coefficients["B"], 1.0);
    }

    #[test]
    fn missing_unit_defaults_to_empty() {
        let q: QuantityData = serde_json::from_str(r#"{"value": 0.5}"#).unwrap();
        assert_eq!(q.unit, "");
    }
}
