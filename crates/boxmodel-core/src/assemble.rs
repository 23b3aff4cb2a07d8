//! Translation of the declarative system into dense arrays at time `t`.
//!
//! Every operation here reads the current reservoir masses, evaluates the
//! rate expressions it needs against freshly built contexts and returns new
//! arrays. Nothing in this module mutates the [`System`].
//!
//! All rate arrays have dimension mass/time. Internal matrices are indexed
//! `[source][target]` with a zero diagonal; sink vectors hold transport out
//! of the system and source vectors transport into it, both keyed by the
//! reservoir on the system side of the link.

use crate::array::{QuantityMatrix, QuantityVector, RateCube};
use crate::descriptor::{Endpoint, evaluation_reservoir};
use crate::expression::RateExpression;
use crate::id::{ReservoirId, VariableId};
use crate::quantity::{Dimension, Quantity, QuantityError};
use crate::system::{System, SystemError};

const RATE: Dimension = Dimension::MASS_RATE;

/// Internal matrix plus boundary sink and source vectors for one set of
/// transport links.
#[derive(Debug, Clone)]
struct LinkArrays {
    internal: QuantityMatrix,
    sink: QuantityVector,
    source: QuantityVector,
}

impl LinkArrays {
    fn collect(
        n: usize,
        links: impl Iterator<Item = (Endpoint, Endpoint, f64)>,
    ) -> Result<Self, QuantityError> {
        let mut internal = QuantityMatrix::zeros(n, RATE);
        let mut sink = QuantityVector::zeros(n, RATE);
        let mut source = QuantityVector::zeros(n, RATE);
        for (from, to, rate) in links {
            let q = Quantity::from_base(rate, RATE);
            match (from, to) {
                (Endpoint::Reservoir(i), Endpoint::Reservoir(j)) => {
                    internal.add(i.index(), j.index(), q)?
                }
                (Endpoint::Reservoir(i), Endpoint::External) => sink.add(i.index(), q)?,
                (Endpoint::External, Endpoint::Reservoir(j)) => source.add(j.index(), q)?,
                // rejected at registration
                (Endpoint::External, Endpoint::External) => {}
            }
        }
        internal.zero_diagonal();
        Ok(Self {
            internal,
            sink,
            source,
        })
    }

    /// Inflow - outflow - sink + source, per reservoir.
    fn net(&self) -> Result<QuantityVector, QuantityError> {
        self.internal
            .column_sums()
            .try_sub(&self.internal.row_sums())?
            .try_sub(&self.sink)?
            .try_add(&self.source)
    }
}

/// Net mass rates of one variable, split by mechanism.
#[derive(Debug, Clone, PartialEq)]
pub struct MechanismRates {
    pub flow: QuantityVector,
    pub flux: QuantityVector,
    pub process: QuantityVector,
    pub reaction: QuantityVector,
}

impl MechanismRates {
    pub fn total(&self) -> Result<QuantityVector, QuantityError> {
        self.flow
            .try_add(&self.flux)?
            .try_add(&self.process)?
            .try_add(&self.reaction)
    }

    fn average(&self, other: &Self) -> Result<Self, QuantityError> {
        Ok(Self {
            flow: mean(&self.flow, &other.flow)?,
            flux: mean(&self.flux, &other.flux)?,
            process: mean(&self.process, &other.process)?,
            reaction: mean(&self.reaction, &other.reaction)?,
        })
    }
}

/// Time derivatives of every reservoir mass at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct MassRates {
    /// d(fluid mass)/dt per reservoir.
    pub fluid: QuantityVector,
    /// d(variable mass)/dt per reservoir, indexed by variable id.
    pub variables: Vec<QuantityVector>,
    /// Per-mechanism breakdown of `variables`, indexed by variable id.
    pub mechanisms: Vec<MechanismRates>,
}

impl MassRates {
    pub fn fluid_rate(&self, reservoir: ReservoirId) -> Option<Quantity> {
        self.fluid.get(reservoir.index())
    }

    pub fn variable_rate(&self, reservoir: ReservoirId, variable: VariableId) -> Option<Quantity> {
        self.variables
            .get(variable.index())
            .and_then(|v| v.get(reservoir.index()))
    }

    /// Elementwise mean of two rate sets, as used by the trapezoidal scheme.
    pub fn average(&self, other: &MassRates) -> Result<MassRates, QuantityError> {
        Ok(MassRates {
            fluid: mean(&self.fluid, &other.fluid)?,
            variables: self
                .variables
                .iter()
                .zip(&other.variables)
                .map(|(a, b)| mean(a, b))
                .collect::<Result<_, _>>()?,
            mechanisms: self
                .mechanisms
                .iter()
                .zip(&other.mechanisms)
                .map(|(a, b)| a.average(b))
                .collect::<Result<_, _>>()?,
        })
    }
}

fn mean(a: &QuantityVector, b: &QuantityVector) -> Result<QuantityVector, QuantityError> {
    Ok(a.try_add(b)?.scale(0.5))
}

fn wrap(descriptor: &str) -> impl FnOnce(SystemError) -> SystemError + '_ {
    move |e| SystemError::Evaluation {
        descriptor: descriptor.to_string(),
        source: Box::new(e),
    }
}

impl System {
    // -----------------------------------------------------------------------
    // Mass and concentration vectors
    // -----------------------------------------------------------------------

    pub fn fluid_mass_vector(&self) -> QuantityVector {
        QuantityVector::from_magnitudes(
            Dimension::MASS,
            self.reservoirs()
                .map(|r| r.fluid_mass().magnitude())
                .collect(),
        )
    }

    pub fn variable_mass_vector(&self, variable: VariableId) -> Result<QuantityVector, SystemError> {
        self.variable(variable)?;
        let values: Vec<f64> = self
            .reservoirs()
            .map(|r| r.variable_mass(variable).map(|m| m.magnitude()))
            .collect::<Result<_, _>>()?;
        Ok(QuantityVector::from_magnitudes(Dimension::MASS, values))
    }

    /// `m_var / (m_fluid + m_var)` per reservoir, dimensionless.
    pub fn variable_concentration_vector(
        &self,
        variable: VariableId,
    ) -> Result<QuantityVector, SystemError> {
        self.variable(variable)?;
        let values: Vec<f64> = self
            .reservoirs()
            .map(|r| r.concentration(variable).map(|c| c.magnitude()))
            .collect::<Result<_, _>>()?;
        Ok(QuantityVector::from_magnitudes(
            Dimension::DIMENSIONLESS,
            values,
        ))
    }

    // -----------------------------------------------------------------------
    // Rate evaluation
    // -----------------------------------------------------------------------

    fn evaluate_rate(
        &self,
        descriptor: &str,
        rate: &RateExpression,
        focus: Option<ReservoirId>,
        t: Quantity,
    ) -> Result<f64, SystemError> {
        let ctx = self.context(focus).map_err(wrap(descriptor))?;
        rate.evaluate_as(t, &ctx, RATE)
            .map(|q| q.magnitude())
            .map_err(wrap(descriptor))
    }

    fn flow_rates(&self, t: Quantity) -> Result<Vec<f64>, SystemError> {
        self.flows()
            .iter()
            .map(|f| {
                let focus = evaluation_reservoir(f.source, f.target);
                self.evaluate_rate(&f.name, &f.rate, focus, t)
            })
            .collect()
    }

    fn flux_rates(&self, t: Quantity) -> Result<Vec<f64>, SystemError> {
        self.fluxes()
            .iter()
            .map(|f| {
                let focus = evaluation_reservoir(f.source, f.target);
                self.evaluate_rate(&f.name, &f.rate, focus, t)
            })
            .collect()
    }

    fn process_rates(&self, t: Quantity) -> Result<Vec<f64>, SystemError> {
        self.processes()
            .iter()
            .map(|p| self.evaluate_rate(&p.name, &p.rate, Some(p.reservoir), t))
            .collect()
    }

    fn reaction_rates(&self, t: Quantity) -> Result<Vec<f64>, SystemError> {
        self.reactions()
            .iter()
            .map(|r| self.evaluate_rate(&r.name, &r.rate, Some(r.reservoir), t))
            .collect()
    }

    fn check_concentration(&self, concentration: &QuantityVector) -> Result<(), SystemError> {
        if concentration.len() != self.reservoir_count() {
            return Err(SystemError::ShapeMismatch {
                expected: self.reservoir_count(),
                found: concentration.len(),
            });
        }
        if !concentration.dimension().is_dimensionless() {
            return Err(QuantityError::WrongDimensionality {
                expected: Dimension::DIMENSIONLESS,
                found: concentration.dimension(),
            }
            .into());
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Link assembly from pre-evaluated rates
    // -----------------------------------------------------------------------

    fn fluid_links(&self, flow_rates: &[f64]) -> Result<LinkArrays, SystemError> {
        let links = self
            .flows()
            .iter()
            .zip(flow_rates)
            .map(|(f, r)| (f.source, f.target, *r));
        Ok(LinkArrays::collect(self.reservoir_count(), links)?)
    }

    /// Links of tracer-carrying flows only.
    fn tracer_links(&self, flow_rates: &[f64]) -> Result<LinkArrays, SystemError> {
        let links = self
            .flows()
            .iter()
            .zip(flow_rates)
            .filter(|(f, _)| f.tracer_transport)
            .map(|(f, r)| (f.source, f.target, *r));
        Ok(LinkArrays::collect(self.reservoir_count(), links)?)
    }

    /// Variable mass entering from outside: `rate * inflow concentration`.
    fn inflow_source(
        &self,
        variable: VariableId,
        flow_rates: &[f64],
    ) -> Result<QuantityVector, SystemError> {
        let links = self
            .flows()
            .iter()
            .zip(flow_rates)
            .filter(|(f, _)| f.tracer_transport)
            .map(|(f, r)| (f.source, f.target, *r * f.inflow_concentration(variable)));
        Ok(LinkArrays::collect(self.reservoir_count(), links)?.source)
    }

    fn flux_links(&self, variable: VariableId, flux_rates: &[f64]) -> Result<LinkArrays, SystemError> {
        let links = self
            .fluxes()
            .iter()
            .zip(flux_rates)
            .filter(|(f, _)| f.variable == variable)
            .map(|(f, r)| (f.source, f.target, *r));
        Ok(LinkArrays::collect(self.reservoir_count(), links)?)
    }

    /// Process `(sink, source)` for one variable. Negative rates are sinks.
    fn process_split(
        &self,
        variable: VariableId,
        process_rates: &[f64],
    ) -> Result<(QuantityVector, QuantityVector), SystemError> {
        let n = self.reservoir_count();
        let mut sink = QuantityVector::zeros(n, RATE);
        let mut source = QuantityVector::zeros(n, RATE);
        for (p, r) in self.processes().iter().zip(process_rates) {
            if p.variable != variable {
                continue;
            }
            let i = p.reservoir.index();
            if *r >= 0.0 {
                source.add(i, Quantity::from_base(*r, RATE))?;
            } else {
                sink.add(i, Quantity::from_base(-*r, RATE))?;
            }
        }
        Ok((sink, source))
    }

    fn rate_cube(&self, reaction_rates: &[f64]) -> Result<RateCube, SystemError> {
        let reactions = self.reactions();
        let mut cube = RateCube::zeros(
            self.reservoir_count(),
            self.variable_count(),
            self.max_reactions_per_reservoir(),
            RATE,
        );
        for b in self.reservoir_ids() {
            for (slot, &index) in self.reaction_indices(b).iter().enumerate() {
                let reaction = &reactions[index];
                let rate = reaction_rates[index];
                for (variable, coefficient) in &reaction.coefficients {
                    cube.set(
                        b.index(),
                        variable.index(),
                        slot,
                        Quantity::from_base(coefficient * rate, RATE),
                    )?;
                }
            }
        }
        Ok(cube)
    }

    fn is_mobile(&self, variable: VariableId) -> Result<bool, SystemError> {
        Ok(self.variable(variable)?.mobile)
    }

    // -----------------------------------------------------------------------
    // Fluid transport
    // -----------------------------------------------------------------------

    /// `[i][j]` = summed rate of flows from reservoir `i` to reservoir `j`.
    pub fn fluid_internal_flow_matrix(&self, t: Quantity) -> Result<QuantityMatrix, SystemError> {
        Ok(self.fluid_links(&self.flow_rates(t)?)?.internal)
    }

    /// Flows leaving the system, per originating reservoir.
    pub fn fluid_flow_sink_vector(&self, t: Quantity) -> Result<QuantityVector, SystemError> {
        Ok(self.fluid_links(&self.flow_rates(t)?)?.sink)
    }

    /// Flows entering the system, per receiving reservoir.
    pub fn fluid_flow_source_vector(&self, t: Quantity) -> Result<QuantityVector, SystemError> {
        Ok(self.fluid_links(&self.flow_rates(t)?)?.source)
    }

    // -----------------------------------------------------------------------
    // Variable transport by flows
    // -----------------------------------------------------------------------

    /// `[i][j]` = tracer-carrying flow `[i][j]` times `concentration[i]`.
    /// All zero for immobile variables.
    pub fn variable_internal_flow_matrix(
        &self,
        variable: VariableId,
        t: Quantity,
        concentration: &QuantityVector,
    ) -> Result<QuantityMatrix, SystemError> {
        self.check_concentration(concentration)?;
        if !self.is_mobile(variable)? {
            return Ok(QuantityMatrix::zeros(self.reservoir_count(), RATE));
        }
        let links = self.tracer_links(&self.flow_rates(t)?)?;
        Ok(links.internal.scale_rows(concentration))
    }

    /// Variable mass leaving the system with outgoing flows.
    pub fn variable_flow_sink_vector(
        &self,
        variable: VariableId,
        t: Quantity,
        concentration: &QuantityVector,
    ) -> Result<QuantityVector, SystemError> {
        self.check_concentration(concentration)?;
        if !self.is_mobile(variable)? {
            return Ok(QuantityVector::zeros(self.reservoir_count(), RATE));
        }
        let links = self.tracer_links(&self.flow_rates(t)?)?;
        Ok(links.sink.mul_elementwise(concentration))
    }

    /// Variable mass entering with external inflows at their declared
    /// concentrations.
    pub fn variable_flow_source_vector(
        &self,
        variable: VariableId,
        t: Quantity,
    ) -> Result<QuantityVector, SystemError> {
        if !self.is_mobile(variable)? {
            return Ok(QuantityVector::zeros(self.reservoir_count(), RATE));
        }
        self.inflow_source(variable, &self.flow_rates(t)?)
    }

    // -----------------------------------------------------------------------
    // Processes
    // -----------------------------------------------------------------------

    /// Magnitudes of negative process rates, per reservoir. Non-negative.
    pub fn variable_process_sink_vector(
        &self,
        variable: VariableId,
        t: Quantity,
    ) -> Result<QuantityVector, SystemError> {
        self.variable(variable)?;
        Ok(self.process_split(variable, &self.process_rates(t)?)?.0)
    }

    /// Positive process rates, per reservoir. Non-negative.
    pub fn variable_process_source_vector(
        &self,
        variable: VariableId,
        t: Quantity,
    ) -> Result<QuantityVector, SystemError> {
        self.variable(variable)?;
        Ok(self.process_split(variable, &self.process_rates(t)?)?.1)
    }

    // -----------------------------------------------------------------------
    // Fluxes
    // -----------------------------------------------------------------------

    pub fn variable_internal_flux_matrix(
        &self,
        variable: VariableId,
        t: Quantity,
    ) -> Result<QuantityMatrix, SystemError> {
        self.variable(variable)?;
        Ok(self.flux_links(variable, &self.flux_rates(t)?)?.internal)
    }

    pub fn variable_flux_sink_vector(
        &self,
        variable: VariableId,
        t: Quantity,
    ) -> Result<QuantityVector, SystemError> {
        self.variable(variable)?;
        Ok(self.flux_links(variable, &self.flux_rates(t)?)?.sink)
    }

    pub fn variable_flux_source_vector(
        &self,
        variable: VariableId,
        t: Quantity,
    ) -> Result<QuantityVector, SystemError> {
        self.variable(variable)?;
        Ok(self.flux_links(variable, &self.flux_rates(t)?)?.source)
    }

    // -----------------------------------------------------------------------
    // Reactions
    // -----------------------------------------------------------------------

    /// `[b][v][r]` = coefficient of variable `v` in the `r`-th reaction of
    /// reservoir `b`, times that reaction's rate.
    pub fn reaction_rate_cube(&self, t: Quantity) -> Result<RateCube, SystemError> {
        self.rate_cube(&self.reaction_rates(t)?)
    }

    // -----------------------------------------------------------------------
    // Mass balance
    // -----------------------------------------------------------------------

    /// Every mass derivative at `t`. Each rate expression is evaluated once
    /// and the resulting arrays are shared across variables.
    pub fn mass_rates(&self, t: Quantity) -> Result<MassRates, SystemError> {
        t.ensure(Dimension::TIME)?;
        let n = self.reservoir_count();
        let flow_rates = self.flow_rates(t)?;
        let flux_rates = self.flux_rates(t)?;
        let process_rates = self.process_rates(t)?;
        let cube = self.rate_cube(&self.reaction_rates(t)?)?;

        let fluid = self.fluid_links(&flow_rates)?.net()?;
        let tracer = self.tracer_links(&flow_rates)?;

        let mut variables = Vec::with_capacity(self.variable_count());
        let mut mechanisms = Vec::with_capacity(self.variable_count());
        for variable in self.variable_ids() {
            let flow = if self.is_mobile(variable)? {
                let concentration = self.variable_concentration_vector(variable)?;
                let internal = tracer.internal.scale_rows(&concentration);
                internal
                    .column_sums()
                    .try_sub(&internal.row_sums())?
                    .try_sub(&tracer.sink.mul_elementwise(&concentration))?
                    .try_add(&self.inflow_source(variable, &flow_rates)?)?
            } else {
                QuantityVector::zeros(n, RATE)
            };
            let flux = self.flux_links(variable, &flux_rates)?.net()?;
            let (sink, source) = self.process_split(variable, &process_rates)?;
            let process = source.try_sub(&sink)?;
            let reaction = cube.variable_rates(variable.index());

            let rates = MechanismRates {
                flow,
                flux,
                process,
                reaction,
            };
            variables.push(rates.total()?);
            mechanisms.push(rates);
        }

        Ok(MassRates {
            fluid,
            variables,
            mechanisms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Flow, Flux, Process, Reaction};
    use crate::entity::{Condition, ReservoirDef, VariableDef};
    use crate::expression::Expression;
    use crate::quantity::{KILOGRAM, SECOND, YEAR};
    use crate::system::SystemBuilder;
    use crate::test_utils::{lake_system, ocean_system, ocean_with_biology, water};

    fn t0() -> Quantity {
        0.0 * SECOND
    }

    fn per_year(v: f64) -> f64 {
        (v * KILOGRAM / YEAR).magnitude()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * a.abs().max(b.abs()).max(1e-300)
    }

    #[test]
    fn fluid_mass_vector_is_direct_lookup() {
        let system = ocean_system();
        let m = system.fluid_mass_vector();
        assert_eq!(m.dimension(), Dimension::MASS);
        assert_eq!(m.magnitudes(), ndarray::array![3e16 * 1020.0, 1e18 * 1030.0]);
    }

    #[test]
    fn two_box_flow_arrays() {
        let system = ocean_system();
        let upper = system.reservoir_id("upper_ocean").unwrap().index();
        let deep = system.reservoir_id("deep_ocean").unwrap().index();

        let m = system.fluid_internal_flow_matrix(t0()).unwrap();
        assert_eq!(m.dimension(), Dimension::MASS_RATE);
        assert_eq!(m.at(upper, upper).magnitude(), 0.0);
        assert_eq!(m.at(deep, deep).magnitude(), 0.0);
        assert!(close(m.at(upper, deep).magnitude(), per_year(6e17)));
        assert!(close(m.at(deep, upper).magnitude(), per_year(6e17)));

        let sink = system.fluid_flow_sink_vector(t0()).unwrap();
        let source = system.fluid_flow_source_vector(t0()).unwrap();
        assert!(close(sink.at(upper).magnitude(), per_year(3e16)));
        assert!(close(source.at(upper).magnitude(), per_year(3e16)));
        assert_eq!(sink.at(deep).magnitude(), 0.0);
        assert_eq!(source.at(deep).magnitude(), 0.0);
    }

    #[test]
    fn variable_flow_matrix_scales_rows_by_concentration() {
        let system = ocean_system();
        let po4 = system.variable_id("po4").unwrap();
        let conc = QuantityVector::from_magnitudes(Dimension::DIMENSIONLESS, vec![0.25, 0.5]);
        let fluid = system.fluid_internal_flow_matrix(t0()).unwrap();
        let var = system
            .variable_internal_flow_matrix(po4, t0(), &conc)
            .unwrap();
        for i in 0..2 {
            for j in 0..2 {
                assert_eq!(
                    var.at(i, j).magnitude(),
                    fluid.at(i, j).magnitude() * conc.magnitudes()[i]
                );
            }
        }
    }

    #[test]
    fn concentration_vector_shape_and_dimension_checked() {
        let system = ocean_system();
        let po4 = system.variable_id("po4").unwrap();
        let short = QuantityVector::zeros(1, Dimension::DIMENSIONLESS);
        assert!(matches!(
            system.variable_internal_flow_matrix(po4, t0(), &short),
            Err(SystemError::ShapeMismatch { expected: 2, found: 1 })
        ));
        let masses = system.variable_mass_vector(po4).unwrap();
        assert!(matches!(
            system.variable_flow_sink_vector(po4, t0(), &masses),
            Err(SystemError::Quantity(_))
        ));
    }

    #[test]
    fn evaporation_carries_no_tracer() {
        let system = ocean_system();
        let po4 = system.variable_id("po4").unwrap();
        let conc = system.variable_concentration_vector(po4).unwrap();
        let sink = system.variable_flow_sink_vector(po4, t0(), &conc).unwrap();
        assert!(sink.magnitudes().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn river_brings_phosphate_at_inflow_concentration() {
        let system = ocean_system();
        let po4 = system.variable_id("po4").unwrap();
        let upper = system.reservoir_id("upper_ocean").unwrap().index();
        let source = system.variable_flow_source_vector(po4, t0()).unwrap();
        assert!(close(
            source.at(upper).magnitude(),
            per_year(3e16) * 4.6455e-8
        ));
        assert_eq!(source.at(1 - upper).magnitude(), 0.0);
    }

    #[test]
    fn lake_outflow_sink_uses_concentration() {
        let system = lake_system();
        let a = system.variable_id("A").unwrap();
        let conc = system.variable_concentration_vector(a).unwrap();
        let sink = system.variable_flow_sink_vector(a, t0(), &conc).unwrap();
        let expected = per_year(1e3) * 3.0 / (1e5 + 3.0);
        assert!(close(sink.at(0).magnitude(), expected));
    }

    #[test]
    fn empty_descriptor_arrays_are_zero() {
        let system = ocean_system();
        let po4 = system.variable_id("po4").unwrap();
        let cube = system.reaction_rate_cube(t0()).unwrap();
        assert_eq!(cube.shape(), (2, 1, 0));
        assert!(cube.magnitudes().iter().all(|v| *v == 0.0));
        for v in [
            system.variable_process_sink_vector(po4, t0()).unwrap(),
            system.variable_process_source_vector(po4, t0()).unwrap(),
            system.variable_flux_sink_vector(po4, t0()).unwrap(),
            system.variable_flux_source_vector(po4, t0()).unwrap(),
        ] {
            assert!(v.magnitudes().iter().all(|x| *x == 0.0));
        }
        let flux = system.variable_internal_flux_matrix(po4, t0()).unwrap();
        assert!(flux.magnitudes().iter().all(|x| *x == 0.0));
    }

    #[test]
    fn reaction_cube_applies_coefficients() {
        let system = lake_system();
        let box1 = system.reservoir_id("box1").unwrap().index();
        let cube = system.reaction_rate_cube(t0()).unwrap();
        let a = system.variable_id("A").unwrap().index();
        let b = system.variable_id("B").unwrap().index();
        let c = system.variable_id("C").unwrap().index();
        let d = system.variable_id("D").unwrap().index();
        assert_eq!(cube.shape(), (1, 4, 1));
        let rate = cube.at(box1, c, 0).magnitude();
        assert!(rate > 0.0);
        assert_eq!(cube.at(box1, a, 0).magnitude(), -rate);
        assert_eq!(cube.at(box1, b, 0).magnitude(), -rate);
        assert_eq!(cube.at(box1, d, 0).magnitude(), 0.0);
    }

    #[test]
    fn processes_split_by_sign() {
        let system = ocean_with_biology();
        let po4 = system.variable_id("po4").unwrap();
        let phyto = system.variable_id("phyto").unwrap();
        let sink = system.variable_process_sink_vector(po4, t0()).unwrap();
        let source = system.variable_process_source_vector(po4, t0()).unwrap();
        assert!(sink.magnitudes().iter().all(|v| *v >= 0.0));
        assert!(source.magnitudes().iter().all(|v| *v >= 0.0));
        let phyto_sink = system.variable_process_sink_vector(phyto, t0()).unwrap();
        assert!(phyto_sink.magnitudes().iter().any(|v| *v > 0.0));
    }

    #[test]
    fn flux_matrix_has_zero_diagonal() {
        let system = ocean_with_biology();
        let phyto = system.variable_id("phyto").unwrap();
        let m = system.variable_internal_flux_matrix(phyto, t0()).unwrap();
        let upper = system.reservoir_id("upper_ocean").unwrap().index();
        let deep = system.reservoir_id("deep_ocean").unwrap().index();
        assert_eq!(m.at(upper, upper).magnitude(), 0.0);
        assert_eq!(m.at(deep, deep).magnitude(), 0.0);
        assert!(m.at(upper, deep).magnitude() > 0.0);
    }

    #[test]
    fn immobile_variable_not_advected() {
        let mut b = SystemBuilder::new(Condition::new());
        let fluid = b.register_fluid(water()).unwrap();
        let sediment = b
            .register_variable(VariableDef::new("sediment").immobile())
            .unwrap();
        let r0 = b
            .register_reservoir(
                ReservoirDef::new("r0", fluid, 100.0 * KILOGRAM)
                    .with_variable_mass(sediment, 10.0 * KILOGRAM),
            )
            .unwrap();
        let r1 = b
            .register_reservoir(ReservoirDef::new("r1", fluid, 100.0 * KILOGRAM))
            .unwrap();
        b.register_flow(Flow::new("r0_to_r1", r0, r1, 5.0 * KILOGRAM / SECOND))
            .unwrap();
        let system = b.build().unwrap();
        let conc = system.variable_concentration_vector(sediment).unwrap();
        let m = system
            .variable_internal_flow_matrix(sediment, t0(), &conc)
            .unwrap();
        assert!(m.magnitudes().iter().all(|v| *v == 0.0));
        let rates = system.mass_rates(t0()).unwrap();
        assert_eq!(rates.variable_rate(r0, sediment).unwrap().magnitude(), 0.0);
        assert_eq!(rates.fluid_rate(r1).unwrap().magnitude(), 5.0);
    }

    #[test]
    fn fluid_balance_of_ocean_is_zero() {
        let system = ocean_system();
        let rates = system.mass_rates(t0()).unwrap();
        for v in rates.fluid.magnitudes() {
            assert!(v.abs() < 1e-6 * per_year(6e17));
        }
    }

    #[test]
    fn mass_rates_mechanisms_sum_to_total() {
        let system = ocean_with_biology();
        let rates = system.mass_rates(t0()).unwrap();
        for (v, mech) in rates.mechanisms.iter().enumerate() {
            let total = mech.total().unwrap();
            assert_eq!(total, rates.variables[v]);
        }
    }

    #[test]
    fn internal_transport_conserves_variable_mass() {
        let mut b = SystemBuilder::new(Condition::new());
        let fluid = b.register_fluid(water()).unwrap();
        let x = b.register_variable(VariableDef::new("x")).unwrap();
        let r0 = b
            .register_reservoir(
                ReservoirDef::new("r0", fluid, 100.0 * KILOGRAM)
                    .with_variable_mass(x, 1.0 * KILOGRAM),
            )
            .unwrap();
        let r1 = b
            .register_reservoir(ReservoirDef::new("r1", fluid, 50.0 * KILOGRAM))
            .unwrap();
        b.register_flow(Flow::new("f01", r0, r1, 2.0 * KILOGRAM / SECOND))
            .unwrap();
        b.register_flux(Flux::new("settle", r0, r1, x, 0.1 * KILOGRAM / SECOND))
            .unwrap();
        let system = b.build().unwrap();
        let rates = system.mass_rates(t0()).unwrap();
        let total: f64 = rates.variables[x.index()].magnitudes().iter().sum();
        assert!(total.abs() < 1e-15);
        let fluid_total: f64 = rates.fluid.magnitudes().iter().sum();
        assert_eq!(fluid_total, 0.0);
    }

    #[test]
    fn failing_rate_names_descriptor() {
        let mut b = SystemBuilder::new(Condition::new());
        let fluid = b.register_fluid(water()).unwrap();
        let x = b.register_variable(VariableDef::new("x")).unwrap();
        let r = b
            .register_reservoir(ReservoirDef::new("r", fluid, 1.0 * KILOGRAM))
            .unwrap();
        b.register_process(Process::new(
            "needs_salinity",
            r,
            x,
            Expression::evaluable(|_, ctx| {
                let s = ctx.condition("S")?;
                Ok(s * (1.0 * KILOGRAM / SECOND))
            }),
        ))
        .unwrap();
        let system = b.build().unwrap();
        let err = system.variable_process_source_vector(x, t0()).unwrap_err();
        match err {
            SystemError::Evaluation { descriptor, source } => {
                assert_eq!(descriptor, "needs_salinity");
                assert!(matches!(*source, SystemError::NotFound { .. }));
            }
            other => panic!("expected Evaluation, got {other:?}"),
        }
    }

    #[test]
    fn evaluable_with_wrong_dimension_fails_at_assembly() {
        let mut b = SystemBuilder::new(Condition::new());
        let fluid = b.register_fluid(water()).unwrap();
        let x = b.register_variable(VariableDef::new("x")).unwrap();
        let r = b
            .register_reservoir(ReservoirDef::new("r", fluid, 1.0 * KILOGRAM))
            .unwrap();
        b.register_reaction(Reaction::new(
            "bad",
            r,
            vec![(x, 1.0)],
            Expression::evaluable(|_, _| Ok(1.0 * KILOGRAM)),
        ))
        .unwrap();
        let system = b.build().unwrap();
        let err = system.reaction_rate_cube(t0()).unwrap_err();
        assert!(matches!(
            err.root_cause(),
            SystemError::Quantity(QuantityError::WrongDimensionality { .. })
        ));
    }

    #[test]
    fn assembly_is_repeatable() {
        let system = ocean_with_biology();
        let t = 3.0 * YEAR;
        assert_eq!(system.mass_rates(t).unwrap(), system.mass_rates(t).unwrap());
    }
}
