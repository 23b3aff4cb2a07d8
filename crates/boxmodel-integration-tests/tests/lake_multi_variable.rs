//! Single lake with four variables: two arrive with the inflow, react to a
//! third, and a fourth is never touched.

use boxmodel_core::quantity::{KILOGRAM, SECOND, YEAR};
use boxmodel_core::solution::{Mechanism, StateQuantity};
use boxmodel_core::solver::solve;
use boxmodel_core::test_utils::lake_system;

#[test]
fn lake_runs_for_fifty_years() {
    let mut system = lake_system();
    let solution = solve(&mut system, 1.0 * YEAR, 50).unwrap();
    assert_eq!(solution.len(), 51);

    let c = solution.variable_mass_series("box1", "C").unwrap();
    assert!(c.windows(2).all(|w| w[1].magnitude() > w[0].magnitude()));

    let d = solution.variable_mass_series("box1", "D").unwrap();
    assert!(d.iter().all(|m| m.magnitude() == 0.0));

    let fluid = solution.fluid_mass_series("box1").unwrap();
    assert!(fluid.iter().all(|m| (m.value_in(KILOGRAM).unwrap() - 1e5).abs() < 1e-6));

    // B arrives at twice A's concentration and both are consumed one to one.
    let a = solution.variable_mass_series("box1", "A").unwrap();
    let b = solution.variable_mass_series("box1", "B").unwrap();
    assert!(b[50].magnitude() > a[50].magnitude());
}

#[test]
fn reaction_is_the_only_source_of_c() {
    let mut system = lake_system();
    let solution = solve(&mut system, 1.0 * YEAR, 10).unwrap();
    for mechanism in [Mechanism::Flux, Mechanism::Process] {
        let rates = solution.rate_series("box1", "C", mechanism).unwrap();
        assert!(rates.iter().all(|r| r.magnitude() == 0.0));
    }
    let reaction = solution
        .rate_series("box1", "C", Mechanism::Reaction)
        .unwrap();
    assert!(reaction.iter().all(|r| r.magnitude() > 0.0));
    // C leaves with the outflow once there is some.
    let flow = solution.rate_series("box1", "C", Mechanism::Flow).unwrap();
    assert_eq!(flow[0].magnitude(), 0.0);
    assert!(flow[1..].iter().all(|r| r.magnitude() < 0.0));
}

#[test]
fn concentrations_follow_masses() {
    let mut system = lake_system();
    let solution = solve(&mut system, 1.0 * YEAR, 5).unwrap();
    for k in 0..solution.len() {
        let fluid = solution
            .value(k, "box1", StateQuantity::FluidMass)
            .unwrap()
            .magnitude();
        let a = solution
            .value(k, "box1", StateQuantity::VariableMass("A"))
            .unwrap()
            .magnitude();
        let conc = solution
            .value(k, "box1", StateQuantity::Concentration("A"))
            .unwrap()
            .magnitude();
        assert_eq!(conc, a / (fluid + a));
    }
}

#[test]
fn lake_assembly_arrays() {
    let system = lake_system();
    let t = 0.0 * SECOND;
    let a = system.variable_id("A").unwrap();

    let inflow = system.fluid_flow_source_vector(t).unwrap();
    let outflow = system.fluid_flow_sink_vector(t).unwrap();
    assert_eq!(inflow.at(0), outflow.at(0));
    assert_eq!(system.fluid_internal_flow_matrix(t).unwrap().size(), 1);

    let source = system.variable_flow_source_vector(a, t).unwrap();
    assert!((source.at(0).value_in(KILOGRAM / YEAR).unwrap() - 1.0).abs() < 1e-9);
}
