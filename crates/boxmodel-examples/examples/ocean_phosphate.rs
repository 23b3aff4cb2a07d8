//! Two-box ocean phosphate cycle.
//!
//! An upper and a deep ocean exchange water. Rivers bring phosphate into the
//! upper box and evaporation removes water only. Phytoplankton grows on
//! phosphate in the sunlit upper box at a temperature-dependent rate, sinks
//! into the deep box and is remineralized back to phosphate there.
//!
//! Run with: `cargo run -p boxmodel-examples --example ocean_phosphate`
//! Set `RUST_LOG=boxmodel_core=debug` to see every step.

use boxmodel_core::descriptor::{Endpoint, Flow, Flux, Reaction};
use boxmodel_core::entity::{Condition, FluidDef, ReservoirDef, VariableDef};
use boxmodel_core::expression::Expression;
use boxmodel_core::quantity::{CUBIC_METER, DIMENSIONLESS, KELVIN, KILOGRAM, YEAR};
use boxmodel_core::solution::Mechanism;
use boxmodel_core::solver::{IntegrationScheme, Solver, SolverConfig};
use boxmodel_core::system::SystemBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("ocean_phosphate=info".parse()?),
        )
        .init();

    let mut b = SystemBuilder::new(Condition::new().with("T", 288.0 * KELVIN));
    let seawater = b.register_fluid(
        FluidDef::new("seawater", 1025.0 * KILOGRAM / CUBIC_METER).with_description("mean density"),
    )?;
    let po4 = b.register_variable(VariableDef::new("po4").with_description("phosphate"))?;
    let phyto = b.register_variable(VariableDef::new("phyto").with_description("phytoplankton"))?;

    let upper = b.register_reservoir(
        ReservoirDef::new("upper_ocean", seawater, 3e16 * 1025.0 * KILOGRAM)
            .with_variable_mass(po4, 6.1e10 * KILOGRAM)
            .with_variable_mass(phyto, 1e9 * KILOGRAM)
            .with_condition(Condition::new().with("T", 293.0 * KELVIN)),
    )?;
    let deep = b.register_reservoir(
        ReservoirDef::new("deep_ocean", seawater, 1e18 * 1025.0 * KILOGRAM)
            .with_variable_mass(po4, 2.3e12 * KILOGRAM)
            .with_condition(Condition::new().with("T", 277.0 * KELVIN)),
    )?;

    // --- Water ---

    let exchange = 6e17 * KILOGRAM / YEAR;
    b.register_flow(Flow::new("downwelling", upper, deep, exchange))?;
    b.register_flow(Flow::new("upwelling", deep, upper, exchange))?;
    b.register_flow(
        Flow::new("evaporation", upper, Endpoint::External, 3.7e16 * KILOGRAM / YEAR)
            .without_tracers(),
    )?;
    b.register_flow(
        Flow::new("rivers", Endpoint::External, upper, 3.7e16 * KILOGRAM / YEAR)
            .with_inflow_concentration(po4, 4.6e-8 * DIMENSIONLESS),
    )?;

    // --- Biology ---

    // Growth doubles for every 10 K above 283 K.
    b.register_reaction(Reaction::new(
        "photosynthesis",
        upper,
        vec![(po4, -1.0), (phyto, 1.0)],
        Expression::evaluable(|_, ctx| {
            let kelvin = ctx.condition("T")?.value_in(KELVIN)?;
            let q10 = 2f64.powf((kelvin - 283.0) / 10.0);
            Ok(ctx.variable_mass("po4")? * (0.05 * q10) / (1.0 * YEAR))
        }),
    ))?;
    b.register_flux(Flux::new(
        "sinking",
        upper,
        deep,
        phyto,
        Expression::evaluable(|_, ctx| Ok(ctx.variable_mass("phyto")? * 0.5 / (1.0 * YEAR))),
    ))?;
    b.register_reaction(Reaction::new(
        "remineralization",
        deep,
        vec![(phyto, -1.0), (po4, 1.0)],
        Expression::evaluable(|_, ctx| Ok(ctx.variable_mass("phyto")? * 2.0 / (1.0 * YEAR))),
    ))?;

    let mut system = b.build()?;

    let config = SolverConfig::new(0.1 * YEAR, 2_000).with_scheme(IntegrationScheme::Heun);
    let mut solver = Solver::new(config)?;
    let solution = solver.solve(&mut system)?;
    info!(state = ?solver.state(), states = solution.len(), "run complete");

    let years: Vec<f64> = solution
        .times()
        .iter()
        .map(|t| t.value_in(YEAR))
        .collect::<Result<_, _>>()?;
    let last = solution.len() - 1;

    println!("=== Ocean phosphate after {:.0} years ===", years[last]);
    for reservoir in ["upper_ocean", "deep_ocean"] {
        let po4 = solution.concentration_series(reservoir, "po4")?;
        let phyto = solution.variable_mass_series(reservoir, "phyto")?;
        println!(
            "{reservoir:>12}: po4 {:.3e} -> {:.3e} kg/kg, phyto {:.3e} kg",
            po4[0].magnitude(),
            po4[last].magnitude(),
            phyto[last].value_in(KILOGRAM)?,
        );
    }

    let total = solution.total_variable_mass_series("po4")?;
    println!(
        "total po4: {:.4e} -> {:.4e} kg",
        total[0].value_in(KILOGRAM)?,
        total[last].value_in(KILOGRAM)?
    );

    println!("--- upper_ocean po4 budget in the final step (kg/year) ---");
    for mechanism in Mechanism::ALL {
        let series = solution.rate_series("upper_ocean", "po4", mechanism)?;
        if let Some(rate) = series.last() {
            let label = format!("{mechanism:?}");
            println!("{label:>10}: {:+.3e}", rate.value_in(KILOGRAM / YEAR)?);
        }
    }

    let bytes = solution.to_bytes()?;
    println!("solution snapshot: {} bytes", bytes.len());

    Ok(())
}
