//! Shared reference systems for unit tests, integration tests and benches.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so other crates
//! reach these helpers through the `test-utils` feature.

use crate::descriptor::{Endpoint, Flow, Flux, Process, Reaction};
use crate::entity::{Condition, FluidDef, ReservoirDef, VariableDef};
use crate::expression::Expression;
use crate::quantity::{CUBIC_METER, DIMENSIONLESS, GRAM, KELVIN, KILOGRAM, YEAR};
use crate::system::{System, SystemBuilder};

// ===========================================================================
// Building blocks
// ===========================================================================

/// Water with a constant density of 1000 kg/m^3.
pub fn water() -> FluidDef {
    FluidDef::new("water", 1000.0 * KILOGRAM / CUBIC_METER)
}

pub fn temperature(kelvin: f64) -> Condition {
    Condition::new().with("T", kelvin * KELVIN)
}

/// `fraction * mass(variable) / year`, evaluated in the focus reservoir.
pub fn first_order(variable: &'static str, fraction: f64) -> Expression {
    Expression::evaluable(move |_, ctx| Ok(ctx.variable_mass(variable)? * fraction / (1.0 * YEAR)))
}

// ===========================================================================
// Two-box ocean
// ===========================================================================

/// Upper and deep ocean exchanging water, with evaporation and river input
/// on the upper box. Phosphate enters with the river.
pub fn ocean_builder() -> SystemBuilder {
    let mut b = SystemBuilder::new(temperature(111.0));
    let fluid = b.register_fluid(water()).expect("fluid");
    let po4 = b
        .register_variable(VariableDef::new("po4").with_description("phosphate"))
        .expect("po4");
    let upper = b
        .register_reservoir(
            ReservoirDef::new("upper_ocean", fluid, 3e16 * 1020.0 * KILOGRAM)
                .with_variable_mass(po4, 6.1e10 * KILOGRAM)
                .with_condition(temperature(333.0)),
        )
        .expect("upper_ocean");
    let deep = b
        .register_reservoir(
            ReservoirDef::new("deep_ocean", fluid, 1e18 * 1030.0 * KILOGRAM)
                .with_variable_mass(po4, 2.3e12 * KILOGRAM)
                .with_condition(temperature(222.0)),
        )
        .expect("deep_ocean");

    let exchange = 6e17 * KILOGRAM / YEAR;
    b.register_flow(Flow::new("downwelling", upper, deep, exchange))
        .expect("downwelling");
    b.register_flow(Flow::new("upwelling", deep, upper, exchange))
        .expect("upwelling");
    b.register_flow(
        Flow::new("evaporation", upper, Endpoint::External, 3e16 * KILOGRAM / YEAR).without_tracers(),
    )
    .expect("evaporation");
    b.register_flow(
        Flow::new("river_inflow", Endpoint::External, upper, 3e16 * KILOGRAM / YEAR)
            .with_inflow_concentration(po4, 4.6455e-8 * DIMENSIONLESS),
    )
    .expect("river_inflow");
    b
}

pub fn ocean_system() -> System {
    ocean_builder().build().expect("ocean system")
}

/// The two-box ocean plus phytoplankton: photosynthesis and
/// remineralization reactions, sinking of phytoplankton to depth, burial
/// and dust deposition.
pub fn ocean_with_biology() -> System {
    let mut b = ocean_builder();
    let po4 = b.variable_id("po4").expect("po4");
    let upper = b.reservoir_id("upper_ocean").expect("upper_ocean");
    let deep = b.reservoir_id("deep_ocean").expect("deep_ocean");
    let phyto = b
        .register_variable(VariableDef::new("phyto").with_description("phytoplankton"))
        .expect("phyto");

    b.mutate_reservoir("upper_ocean", |def| {
        def.variable_masses.push((phyto, 1e9 * KILOGRAM));
    })
    .expect("upper_ocean");
    b.mutate_reservoir("deep_ocean", |def| {
        def.variable_masses.push((phyto, 1e8 * KILOGRAM));
    })
    .expect("deep_ocean");

    b.register_reaction(Reaction::new(
        "photosynthesis",
        upper,
        vec![(po4, -1.0), (phyto, 1.0)],
        first_order("po4", 0.1),
    ))
    .expect("photosynthesis");
    for (name, reservoir) in [("remineralization_upper", upper), ("remineralization_deep", deep)] {
        b.register_reaction(Reaction::new(
            name,
            reservoir,
            vec![(phyto, -1.0), (po4, 1.0)],
            first_order("phyto", 0.4 / 114.0),
        ))
        .expect("remineralization");
    }
    b.register_flux(Flux::new(
        "phyto_sinking",
        upper,
        deep,
        phyto,
        Expression::evaluable(|_, ctx| {
            let m = ctx.variable_mass("phyto")?;
            Ok((m * 0.1 / (1.0 * YEAR)).try_add(1e6 * KILOGRAM / YEAR)?)
        }),
    ))
    .expect("sinking");
    b.register_process(Process::new(
        "phyto_burial",
        deep,
        phyto,
        Expression::evaluable(|_, ctx| {
            let m = ctx.variable_mass("phyto")?;
            let rate = (m * 0.01 / (1.0 * YEAR)).try_add(1e3 * KILOGRAM / YEAR)?;
            Ok(-rate)
        }),
    ))
    .expect("burial");
    b.register_process(Process::new(
        "dust_deposition",
        upper,
        po4,
        1e6 * KILOGRAM / YEAR,
    ))
    .expect("deposition");
    b.build().expect("ocean with biology")
}

// ===========================================================================
// Single-box lake
// ===========================================================================

/// One lake with four variables. An inflow brings A and B, an outflow drains
/// everything and A + B react to C inside the lake.
pub fn lake_system() -> System {
    let mut b = SystemBuilder::new(temperature(295.0));
    let fluid = b.register_fluid(water()).expect("fluid");
    let a = b.register_variable(VariableDef::new("A")).expect("A");
    let bv = b.register_variable(VariableDef::new("B")).expect("B");
    let c = b.register_variable(VariableDef::new("C")).expect("C");
    b.register_variable(VariableDef::new("D")).expect("D");
    let lake = b
        .register_reservoir(
            ReservoirDef::new("box1", fluid, 1e5 * KILOGRAM)
                .with_variable_mass(a, 3.0 * KILOGRAM)
                .with_variable_mass(bv, 3.0 * KILOGRAM)
                .with_condition(temperature(290.0))
                .with_description("lake"),
        )
        .expect("box1");
    b.register_flow(
        Flow::new("inflow", Endpoint::External, lake, 1e3 * KILOGRAM / YEAR)
            .with_inflow_concentration(a, 1.0 * GRAM / KILOGRAM)
            .with_inflow_concentration(bv, 2.0 * GRAM / KILOGRAM),
    )
    .expect("inflow");
    b.register_flow(Flow::new("outflow", lake, Endpoint::External, 1e3 * KILOGRAM / YEAR))
        .expect("outflow");
    b.register_reaction(Reaction::new(
        "a_plus_b_to_c",
        lake,
        vec![(a, -1.0), (bv, -1.0), (c, 1.0)],
        Expression::evaluable(|_, ctx| {
            let ma = ctx.variable_mass("A")?;
            let mb = ctx.variable_mass("B")?;
            Ok(ma * mb * 0.01 / (1.0 * KILOGRAM) / (1.0 * YEAR))
        }),
    ))
    .expect("reaction");
    b.build().expect("lake system")
}

// ===========================================================================
// Scalable ring
// ===========================================================================

/// `n` reservoirs connected in a ring by tracer-carrying flows, each with a
/// first-order decay process on one variable.
pub fn ring_system(n: usize) -> System {
    let mut b = SystemBuilder::new(temperature(288.0));
    let fluid = b.register_fluid(water()).expect("fluid");
    let tracer = b.register_variable(VariableDef::new("tracer")).expect("tracer");
    let ids: Vec<_> = (0..n)
        .map(|i| {
            b.register_reservoir(
                ReservoirDef::new(&format!("r{i}"), fluid, 1e6 * KILOGRAM)
                    .with_variable_mass(tracer, (i as f64 + 1.0) * KILOGRAM),
            )
            .expect("reservoir")
        })
        .collect();
    for i in 0..n {
        let next = ids[(i + 1) % n];
        b.register_flow(Flow::new(
            &format!("f{i}"),
            ids[i],
            next,
            1e4 * KILOGRAM / YEAR,
        ))
        .expect("flow");
        b.register_process(Process::new(
            &format!("decay{i}"),
            ids[i],
            tracer,
            Expression::evaluable(|_, ctx| {
                Ok(-(ctx.variable_mass("tracer")? * 0.01 / (1.0 * YEAR)))
            }),
        ))
        .expect("process");
    }
    b.build().expect("ring system")
}
