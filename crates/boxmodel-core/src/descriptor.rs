//! Declarative links and rules: flows, fluxes, processes and reactions.
//!
//! Descriptors are immutable after construction. Each one carries a
//! [`RateExpression`] whose result must have dimension mass/time.

use std::collections::BTreeMap;

use crate::expression::RateExpression;
use crate::id::{ReservoirId, VariableId};
use crate::quantity::Quantity;

/// One end of a transport link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Reservoir(ReservoirId),
    /// Outside the modelled system.
    External,
}

impl Endpoint {
    pub fn reservoir(&self) -> Option<ReservoirId> {
        match self {
            Endpoint::Reservoir(id) => Some(*id),
            Endpoint::External => None,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, Endpoint::External)
    }
}

impl From<ReservoirId> for Endpoint {
    fn from(id: ReservoirId) -> Self {
        Endpoint::Reservoir(id)
    }
}

/// The reservoir whose context evaluates a link's rate: the source, or the
/// target when the source is external.
pub(crate) fn evaluation_reservoir(source: Endpoint, target: Endpoint) -> Option<ReservoirId> {
    source.reservoir().or_else(|| target.reservoir())
}

// ---------------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------------

/// Advective transport of fluid mass. Mobile variables travel with the fluid
/// at the source reservoir's concentration.
#[derive(Debug, Clone)]
pub struct Flow {
    pub name: String,
    pub source: Endpoint,
    pub target: Endpoint,
    pub rate: RateExpression,
    /// `false` for flows that move fluid only (evaporation).
    pub tracer_transport: bool,
    /// Concentrations of the incoming fluid when the source is external.
    pub inflow_concentrations: BTreeMap<VariableId, Quantity>,
}

impl Flow {
    pub fn new(
        name: &str,
        source: impl Into<Endpoint>,
        target: impl Into<Endpoint>,
        rate: impl Into<RateExpression>,
    ) -> Self {
        Self {
            name: name.to_string(),
            source: source.into(),
            target: target.into(),
            rate: rate.into(),
            tracer_transport: true,
            inflow_concentrations: BTreeMap::new(),
        }
    }

    pub fn without_tracers(mut self) -> Self {
        self.tracer_transport = false;
        self
    }

    pub fn with_inflow_concentration(mut self, variable: VariableId, concentration: Quantity) -> Self {
        self.inflow_concentrations.insert(variable, concentration);
        self
    }

    /// Concentration of `variable` in the incoming fluid; zero if undeclared.
    pub fn inflow_concentration(&self, variable: VariableId) -> f64 {
        self.inflow_concentrations
            .get(&variable)
            .map(Quantity::magnitude)
            .unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// Flux
// ---------------------------------------------------------------------------

/// Transport of one variable's mass independent of the bulk fluid.
#[derive(Debug, Clone)]
pub struct Flux {
    pub name: String,
    pub source: Endpoint,
    pub target: Endpoint,
    pub variable: VariableId,
    pub rate: RateExpression,
}

impl Flux {
    pub fn new(
        name: &str,
        source: impl Into<Endpoint>,
        target: impl Into<Endpoint>,
        variable: VariableId,
        rate: impl Into<RateExpression>,
    ) -> Self {
        Self {
            name: name.to_string(),
            source: source.into(),
            target: target.into(),
            variable,
            rate: rate.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Process
// ---------------------------------------------------------------------------

/// In-reservoir source (positive rate) or sink (negative rate) of one
/// variable.
#[derive(Debug, Clone)]
pub struct Process {
    pub name: String,
    pub reservoir: ReservoirId,
    pub variable: VariableId,
    pub rate: RateExpression,
}

impl Process {
    pub fn new(
        name: &str,
        reservoir: ReservoirId,
        variable: VariableId,
        rate: impl Into<RateExpression>,
    ) -> Self {
        Self {
            name: name.to_string(),
            reservoir,
            variable,
            rate: rate.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reaction
// ---------------------------------------------------------------------------

/// Stoichiometric transformation inside one reservoir. Each variable changes
/// by `coefficient * rate`; reactants carry negative coefficients.
#[derive(Debug, Clone)]
pub struct Reaction {
    pub name: String,
    pub reservoir: ReservoirId,
    pub coefficients: Vec<(VariableId, f64)>,
    pub rate: RateExpression,
}

impl Reaction {
    pub fn new(
        name: &str,
        reservoir: ReservoirId,
        coefficients: Vec<(VariableId, f64)>,
        rate: impl Into<RateExpression>,
    ) -> Self {
        Self {
            name: name.to_string(),
            reservoir,
            coefficients,
            rate: rate.into(),
        }
    }

    /// Coefficient of `variable`; zero for variables not involved.
    pub fn coefficient(&self, variable: VariableId) -> f64 {
        self.coefficients
            .iter()
            .find(|(v, _)| *v == variable)
            .map(|(_, c)| *c)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::{GRAM, KILOGRAM, YEAR};

    #[test]
    fn evaluation_reservoir_prefers_source() {
        let a = Endpoint::Reservoir(ReservoirId(0));
        let b = Endpoint::Reservoir(ReservoirId(1));
        assert_eq!(evaluation_reservoir(a, b), Some(ReservoirId(0)));
        assert_eq!(evaluation_reservoir(Endpoint::External, b), Some(ReservoirId(1)));
        assert_eq!(evaluation_reservoir(a, Endpoint::External), Some(ReservoirId(0)));
        assert_eq!(evaluation_reservoir(Endpoint::External, Endpoint::External), None);
    }

    #[test]
    fn flow_defaults_carry_tracers() {
        let f = Flow::new("river", Endpoint::External, ReservoirId(0), 3e16 * KILOGRAM / YEAR);
        assert!(f.tracer_transport);
        assert!(!f.without_tracers().tracer_transport);
    }

    #[test]
    fn inflow_concentration_defaults_to_zero() {
        let f = Flow::new("inflow", Endpoint::External, ReservoirId(0), 1e3 * KILOGRAM / YEAR)
            .with_inflow_concentration(VariableId(0), 1.0 * GRAM / KILOGRAM);
        assert!((f.inflow_concentration(VariableId(0)) - 1e-3).abs() < 1e-18);
        assert_eq!(f.inflow_concentration(VariableId(1)), 0.0);
    }

    #[test]
    fn reaction_coefficient_lookup() {
        let r = Reaction::new(
            "a_plus_b",
            ReservoirId(0),
            vec![(VariableId(0), -1.0), (VariableId(1), -1.0), (VariableId(2), 2.0)],
            1.0 * KILOGRAM / YEAR,
        );
        assert_eq!(r.coefficient(VariableId(0)), -1.0);
        assert_eq!(r.coefficient(VariableId(2)), 2.0);
        assert_eq!(r.coefficient(VariableId(3)), 0.0);
    }
}
