//! Single lake loaded from a RON model file.
//!
//! The model file declares the lake, its inflow and outflow, and solver
//! settings. A state-dependent reaction is added in code before the system
//! is built.
//!
//! Run with: `cargo run -p boxmodel-examples --example lake_from_file`

use std::path::Path;

use boxmodel_core::descriptor::Reaction;
use boxmodel_core::expression::Expression;
use boxmodel_core::quantity::{KILOGRAM, YEAR};
use boxmodel_core::solver::{Solver, SolverConfig};
use boxmodel_data::load_model;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("data/lake.ron");
    let mut model = load_model(&path)?;

    let lake = model.builder.reservoir_id("lake").ok_or("no lake in model")?;
    let a = model.builder.variable_id("A").ok_or("no variable A")?;
    let b = model.builder.variable_id("B").ok_or("no variable B")?;
    let c = model.builder.variable_id("C").ok_or("no variable C")?;
    model.builder.register_reaction(Reaction::new(
        "a_plus_b_to_c",
        lake,
        vec![(a, -1.0), (b, -1.0), (c, 1.0)],
        Expression::evaluable(|_, ctx| {
            let ma = ctx.variable_mass("A")?;
            let mb = ctx.variable_mass("B")?;
            Ok(ma * mb * 0.01 / (1.0 * KILOGRAM) / (1.0 * YEAR))
        }),
    ))?;

    let (mut system, config) = model.build()?;
    let config = config.unwrap_or_else(|| SolverConfig::new(1.0 * YEAR, 10));
    info!(steps = config.steps, "solving lake model");
    let solution = Solver::new(config)?.solve(&mut system)?;

    println!("{:>6} {:>10} {:>10} {:>10}", "year", "A [kg]", "B [kg]", "C [kg]");
    let series = |name: &str| solution.variable_mass_series("lake", name);
    let (sa, sb, sc) = (series("A")?, series("B")?, series("C")?);
    for (k, t) in solution.times().iter().enumerate() {
        println!(
            "{:>6.1} {:>10.4} {:>10.4} {:>10.4}",
            t.value_in(YEAR)?,
            sa[k].value_in(KILOGRAM)?,
            sb[k].value_in(KILOGRAM)?,
            sc[k].value_in(KILOGRAM)?,
        );
    }
    Ok(())
}
