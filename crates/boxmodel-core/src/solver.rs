//! Fixed-step time integration of reservoir masses.
//!
//! Each step evaluates every rate against one frozen state, then commits all
//! new masses at once. The system is never written while rates are being
//! evaluated; the borrow checker enforces this because contexts borrow the
//! system immutably.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::assemble::MassRates;
use crate::quantity::{Dimension, Quantity, QuantityError};
use crate::sim::SolverState;
use crate::solution::Solution;
use crate::system::{System, SystemError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IntegrationScheme {
    /// `m(t + dt) = m(t) + rate(t) * dt`.
    #[default]
    ExplicitEuler,
    /// Explicit trapezoid: an Euler trial step, then the mean of the rates at
    /// both ends.
    Heun,
}

/// What to do when a step would leave a mass below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NegativeMassPolicy {
    /// Abort the run with [`SolverError::NegativeMass`].
    #[default]
    Fail,
    /// Set the mass to zero and log a warning.
    Clamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    pub timestep: Quantity,
    pub steps: u64,
    #[serde(default)]
    pub scheme: IntegrationScheme,
    #[serde(default)]
    pub negative_mass: NegativeMassPolicy,
}

impl SolverConfig {
    pub fn new(timestep: Quantity, steps: u64) -> Self {
        Self {
            timestep,
            steps,
            scheme: IntegrationScheme::default(),
            negative_mass: NegativeMassPolicy::default(),
        }
    }

    pub fn with_scheme(mut self, scheme: IntegrationScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_negative_mass(mut self, policy: NegativeMassPolicy) -> Self {
        self.negative_mass = policy;
        self
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error(transparent)]
    System(#[from] SystemError),
    #[error("negative {quantity} mass in reservoir {reservoir} after step {step}")]
    NegativeMass {
        reservoir: String,
        quantity: String,
        step: u64,
    },
    #[error("non-finite {quantity} mass in reservoir {reservoir} after step {step}")]
    NonFinite {
        reservoir: String,
        quantity: String,
        step: u64,
    },
    #[error("solver already ran")]
    AlreadyCompleted,
    #[error("invalid timestep: {0}")]
    InvalidTimestep(String),
}

impl From<QuantityError> for SolverError {
    fn from(e: QuantityError) -> Self {
        SolverError::System(SystemError::Quantity(e))
    }
}

// ---------------------------------------------------------------------------
// Solver
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Solver {
    config: SolverConfig,
    state: SolverState,
}

/// Whether an advanced state is a predictor trial or the state to commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Trial,
    Commit,
}

/// New masses computed for one step, not yet committed.
struct PendingState {
    fluid: Vec<f64>,
    /// `[variable][reservoir]`
    variables: Vec<Vec<f64>>,
}

impl Solver {
    pub fn new(config: SolverConfig) -> Result<Self, SolverError> {
        let dt = config
            .timestep
            .ensure(Dimension::TIME)
            .map_err(|e| SolverError::InvalidTimestep(e.to_string()))?;
        if !(dt.magnitude() > 0.0 && dt.is_finite()) {
            return Err(SolverError::InvalidTimestep(format!(
                "timestep must be positive and finite, got {dt}"
            )));
        }
        Ok(Self {
            config,
            state: SolverState::Idle,
        })
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn state(&self) -> SolverState {
        self.state
    }

    /// Integrate `system` forward for the configured number of steps.
    ///
    /// On success the system holds the final state and the solver is
    /// `Completed`. On failure the system holds the last committed state.
    pub fn solve(&mut self, system: &mut System) -> Result<Solution, SolverError> {
        if self.state != SolverState::Idle {
            return Err(SolverError::AlreadyCompleted);
        }
        let dt = self.config.timestep;
        let steps = self.config.steps;
        info!(
            reservoirs = system.reservoir_count(),
            variables = system.variable_count(),
            steps,
            timestep_s = dt.magnitude(),
            scheme = ?self.config.scheme,
            "solve started"
        );

        let mut solution = Solution::new(system, dt);
        solution.record_state(0, system)?;

        for step in 0..steps {
            self.state = SolverState::Running { step };
            if let Err(e) = self.step(system, &mut solution, step) {
                self.state = SolverState::Failed { step };
                warn!(step, error = %e, "solve aborted");
                return Err(e);
            }
        }

        self.state = SolverState::Completed;
        info!(steps, state_hash = system.state_hash(), "solve finished");
        Ok(solution)
    }

    fn step(
        &self,
        system: &mut System,
        solution: &mut Solution,
        step: u64,
    ) -> Result<(), SolverError> {
        let dt = self.config.timestep;
        let t = Quantity::from_base(step as f64 * dt.magnitude(), Dimension::TIME);

        let rates = match self.config.scheme {
            IntegrationScheme::ExplicitEuler => system.mass_rates(t)?,
            IntegrationScheme::Heun => {
                let start = system.mass_rates(t)?;
                let mut trial = system.clone();
                let predicted = self.advance(&trial, &start, step, Stage::Trial)?;
                self.commit(&mut trial, predicted)?;
                let end = trial.mass_rates(t.try_add(dt)?)?;
                start.average(&end)?
            }
        };

        let next = self.advance(system, &rates, step, Stage::Commit)?;
        self.commit(system, next)?;
        solution.record_rates(step, &rates);
        solution.record_state(step + 1, system)?;
        debug!(step, t_s = t.magnitude(), "step complete");
        Ok(())
    }

    /// `m + rate * dt` for every mass. The negative-mass policy applies only
    /// to masses about to be committed; trial masses may go below zero.
    fn advance(
        &self,
        system: &System,
        rates: &MassRates,
        step: u64,
        stage: Stage,
    ) -> Result<PendingState, SolverError> {
        let dt = self.config.timestep.magnitude();
        let fluid = system
            .fluid_mass_vector()
            .magnitudes()
            .iter()
            .zip(rates.fluid.magnitudes())
            .enumerate()
            .map(|(b, (m, r))| self.check(system, b, "fluid", m + r * dt, step, stage))
            .collect::<Result<Vec<_>, _>>()?;

        let mut variables = Vec::with_capacity(system.variable_count());
        for variable in system.variable_ids() {
            let name = &system.variable(variable)?.name;
            let masses = system.variable_mass_vector(variable)?;
            let next = masses
                .magnitudes()
                .iter()
                .zip(rates.variables[variable.index()].magnitudes())
                .enumerate()
                .map(|(b, (m, r))| self.check(system, b, name, m + r * dt, step, stage))
                .collect::<Result<Vec<_>, _>>()?;
            variables.push(next);
        }
        Ok(PendingState { fluid, variables })
    }

    fn check(
        &self,
        system: &System,
        b: usize,
        quantity: &str,
        mass: f64,
        step: u64,
        stage: Stage,
    ) -> Result<f64, SolverError> {
        let reservoir = || {
            system
                .reservoirs()
                .nth(b)
                .map(|r| r.name().to_string())
                .unwrap_or_default()
        };
        if !mass.is_finite() {
            return Err(SolverError::NonFinite {
                reservoir: reservoir(),
                quantity: quantity.to_string(),
                step,
            });
        }
        if mass >= 0.0 || stage == Stage::Trial {
            return Ok(mass);
        }
        match self.config.negative_mass {
            NegativeMassPolicy::Fail => Err(SolverError::NegativeMass {
                reservoir: reservoir(),
                quantity: quantity.to_string(),
                step,
            }),
            NegativeMassPolicy::Clamp => {
                warn!(
                    reservoir = %reservoir(),
                    quantity,
                    step,
                    mass_kg = mass,
                    "negative mass clamped to zero"
                );
                Ok(0.0)
            }
        }
    }

    fn commit(&self, system: &mut System, next: PendingState) -> Result<(), SolverError> {
        let ids: Vec<_> = system.reservoir_ids().collect();
        for (id, mass) in ids.iter().zip(next.fluid) {
            system.set_fluid_mass(*id, Quantity::from_base(mass, Dimension::MASS))?;
        }
        let variable_ids: Vec<_> = system.variable_ids().collect();
        for (variable, masses) in variable_ids.into_iter().zip(next.variables) {
            for (id, mass) in ids.iter().zip(masses) {
                system.set_variable_mass(*id, variable, Quantity::from_base(mass, Dimension::MASS))?;
            }
        }
        Ok(())
    }
}

/// Run `steps` explicit Euler steps of length `timestep` with the default
/// negative-mass policy.
pub fn solve(system: &mut System, timestep: Quantity, steps: u64) -> Result<Solution, SolverError> {
    Solver::new(SolverConfig::new(timestep, steps))?.solve(system)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Flow, Process};
    use crate::entity::{Condition, ReservoirDef, VariableDef};
    use crate::quantity::{KILOGRAM, SECOND, YEAR};
    use crate::system::SystemBuilder;
    use crate::test_utils::{lake_system, ocean_system, water};

    /// One reservoir draining at a constant rate.
    fn draining(rate_kg_s: f64) -> System {
        let mut b = SystemBuilder::new(Condition::new());
        let fluid = b.register_fluid(water()).unwrap();
        let x = b.register_variable(VariableDef::new("x")).unwrap();
        let r = b
            .register_reservoir(
                ReservoirDef::new("r", fluid, 10.0 * KILOGRAM).with_variable_mass(x, 1.0 * KILOGRAM),
            )
            .unwrap();
        b.register_process(Process::new("decay", r, x, -rate_kg_s * KILOGRAM / SECOND))
            .unwrap();
        b.build().unwrap()
    }

    #[test]
    fn euler_step_is_mass_plus_rate_times_dt() {
        let mut system = draining(0.1);
        let solution = solve(&mut system, 1.0 * SECOND, 3).unwrap();
        let series = solution.variable_mass_series("r", "x").unwrap();
        let values: Vec<f64> = series.iter().map(|q| q.magnitude()).collect();
        assert_eq!(values.len(), 4);
        assert_eq!(values[0], 1.0);
        assert!((values[1] - 0.9).abs() < 1e-12);
        assert!((values[3] - 0.7).abs() < 1e-12);
    }

    #[test]
    fn state_machine_transitions() {
        let mut system = draining(0.1);
        let mut solver = Solver::new(SolverConfig::new(1.0 * SECOND, 2)).unwrap();
        assert_eq!(solver.state(), SolverState::Idle);
        solver.solve(&mut system).unwrap();
        assert_eq!(solver.state(), SolverState::Completed);
        assert!(matches!(
            solver.solve(&mut system),
            Err(SolverError::AlreadyCompleted)
        ));
    }

    #[test]
    fn negative_mass_fails_by_default() {
        let mut system = draining(0.6);
        let mut solver = Solver::new(SolverConfig::new(1.0 * SECOND, 3)).unwrap();
        let err = solver.solve(&mut system).unwrap_err();
        match err {
            SolverError::NegativeMass {
                reservoir,
                quantity,
                step,
            } => {
                assert_eq!(reservoir, "r");
                assert_eq!(quantity, "x");
                assert_eq!(step, 1);
            }
            other => panic!("expected NegativeMass, got {other:?}"),
        }
        assert_eq!(solver.state(), SolverState::Failed { step: 1 });
        let x = system.variable_id("x").unwrap();
        let r = system.reservoir_id("r").unwrap();
        let left = system.reservoir(r).unwrap().variable_mass(x).unwrap();
        assert!((left.magnitude() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn negative_mass_clamped_when_configured() {
        let mut system = draining(0.6);
        let config =
            SolverConfig::new(1.0 * SECOND, 3).with_negative_mass(NegativeMassPolicy::Clamp);
        let solution = Solver::new(config).unwrap().solve(&mut system).unwrap();
        let series = solution.variable_mass_series("r", "x").unwrap();
        assert_eq!(series[2].magnitude(), 0.0);
        assert_eq!(series[3].magnitude(), 0.0);
    }

    #[test]
    fn non_finite_mass_always_fails() {
        let mut system = draining(f64::INFINITY);
        let config =
            SolverConfig::new(1.0 * SECOND, 1).with_negative_mass(NegativeMassPolicy::Clamp);
        let err = Solver::new(config).unwrap().solve(&mut system).unwrap_err();
        assert!(matches!(err, SolverError::NonFinite { step: 0, .. }));
    }

    #[test]
    fn invalid_timestep_rejected() {
        assert!(matches!(
            Solver::new(SolverConfig::new(1.0 * KILOGRAM, 1)),
            Err(SolverError::InvalidTimestep(_))
        ));
        assert!(matches!(
            Solver::new(SolverConfig::new(0.0 * SECOND, 1)),
            Err(SolverError::InvalidTimestep(_))
        ));
        assert!(matches!(
            Solver::new(SolverConfig::new(-1.0 * SECOND, 1)),
            Err(SolverError::InvalidTimestep(_))
        ));
    }

    #[test]
    fn zero_steps_records_initial_state_only() {
        let mut system = ocean_system();
        let solution = solve(&mut system, 1.0 * YEAR, 0).unwrap();
        assert_eq!(solution.len(), 1);
        assert!(solution.rates().is_empty());
    }

    #[test]
    fn heun_is_exact_for_linear_rates() {
        // dm/dt = -k m has the Heun factor (1 - k dt + (k dt)^2 / 2).
        let mut b = SystemBuilder::new(Condition::new());
        let fluid = b.register_fluid(water()).unwrap();
        let x = b.register_variable(VariableDef::new("x")).unwrap();
        let r = b
            .register_reservoir(
                ReservoirDef::new("r", fluid, 10.0 * KILOGRAM).with_variable_mass(x, 1.0 * KILOGRAM),
            )
            .unwrap();
        b.register_process(Process::new(
            "decay",
            r,
            x,
            crate::expression::Expression::evaluable(|_, ctx| {
                Ok(ctx.variable_mass("x")? * -0.1 / (1.0 * SECOND))
            }),
        ))
        .unwrap();
        let mut system = b.build().unwrap();
        let config = SolverConfig::new(1.0 * SECOND, 1).with_scheme(IntegrationScheme::Heun);
        let solution = Solver::new(config).unwrap().solve(&mut system).unwrap();
        let m = solution.variable_mass_series("r", "x").unwrap()[1].magnitude();
        assert!((m - (1.0 - 0.1 + 0.005)).abs() < 1e-12);
    }

    #[test]
    fn heun_trial_may_overshoot_below_zero() {
        // dt = 1.5 tau: the Euler predictor lands at -0.5 kg, the corrected
        // step at 1 - 1.5 * (-1 + 0.5) / 2 = 0.625 kg.
        let mut b = SystemBuilder::new(Condition::new());
        let fluid = b.register_fluid(water()).unwrap();
        let x = b.register_variable(VariableDef::new("x")).unwrap();
        let r = b
            .register_reservoir(
                ReservoirDef::new("r", fluid, 10.0 * KILOGRAM).with_variable_mass(x, 1.0 * KILOGRAM),
            )
            .unwrap();
        b.register_process(Process::new(
            "decay",
            r,
            x,
            crate::expression::Expression::evaluable(|_, ctx| {
                Ok(-ctx.variable_mass("x")? / (1.0 * SECOND))
            }),
        ))
        .unwrap();
        let mut system = b.build().unwrap();
        let config = SolverConfig::new(1.5 * SECOND, 1).with_scheme(IntegrationScheme::Heun);
        let solution = Solver::new(config).unwrap().solve(&mut system).unwrap();
        let m = solution.variable_mass_series("r", "x").unwrap()[1].magnitude();
        assert!((m - 0.625).abs() < 1e-12);
    }

    #[test]
    fn heun_still_fails_on_committed_negative_mass() {
        let mut system = draining(0.6);
        let config = SolverConfig::new(1.0 * SECOND, 3).with_scheme(IntegrationScheme::Heun);
        let err = Solver::new(config).unwrap().solve(&mut system).unwrap_err();
        assert!(matches!(err, SolverError::NegativeMass { step: 1, .. }));
    }

    #[test]
    fn lake_run_is_deterministic() {
        let run = || {
            let mut system = lake_system();
            solve(&mut system, 1.0 * YEAR, 20).unwrap();
            system.state_hash()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn flow_only_system_conserves_fluid() {
        let mut b = SystemBuilder::new(Condition::new());
        let fluid = b.register_fluid(water()).unwrap();
        let a = b
            .register_reservoir(ReservoirDef::new("a", fluid, 100.0 * KILOGRAM))
            .unwrap();
        let c = b
            .register_reservoir(ReservoirDef::new("c", fluid, 100.0 * KILOGRAM))
            .unwrap();
        b.register_flow(Flow::new("a_to_c", a, c, 1.0 * KILOGRAM / SECOND))
            .unwrap();
        let mut system = b.build().unwrap();
        let solution = solve(&mut system, 1.0 * SECOND, 10).unwrap();
        let a_series = solution.fluid_mass_series("a").unwrap();
        let c_series = solution.fluid_mass_series("c").unwrap();
        assert_eq!(a_series[10].magnitude(), 90.0);
        assert_eq!(c_series[10].magnitude(), 110.0);
    }
}
