//! Boxmodel Core -- mass-balance simulation of interconnected reservoirs.
//!
//! A box model is a set of reservoirs ("boxes") that each hold a carrier
//! fluid and a mass of every tracked variable. Flows move fluid (and the
//! variables dissolved in it) between boxes or across the system boundary,
//! fluxes move one variable independently of the fluid, processes add or
//! remove one variable inside a box, and reactions convert variables into
//! each other with fixed stoichiometric coefficients.
//!
//! # Step Pipeline
//!
//! Each solver step at time `t = k * dt`:
//!
//! 1. **Evaluate** -- every rate expression runs once against a fresh
//!    [`context::Context`] built from the current (frozen) masses.
//! 2. **Assemble** -- the rates become dense arrays: internal flow and flux
//!    matrices, boundary sink/source vectors, process vectors and the
//!    per-reaction rate cube.
//! 3. **Balance** -- arrays reduce to one mass derivative per box and
//!    quantity.
//! 4. **Commit** -- all masses advance together; the negative-mass policy is
//!    applied and the new state is appended to the [`solution::Solution`].
//!
//! # Key Types
//!
//! - [`quantity::Quantity`] -- SI magnitude tagged with a run-time dimension.
//! - [`system::SystemBuilder`] / [`system::System`] -- registry of fluids,
//!   variables, reservoirs and descriptors with contiguous integer ids.
//! - [`expression::Expression`] -- constant or `Fn(t, &Context)` rate.
//! - [`solver::Solver`] -- fixed-step explicit Euler or Heun integration.
//! - [`solution::Solution`] -- time series keyed by (timestep, box, quantity).

pub mod array;
pub mod assemble;
pub mod context;
pub mod descriptor;
pub mod entity;
pub mod expression;
pub mod id;
pub mod quantity;
pub mod serialize;
pub mod sim;
pub mod solution;
pub mod solver;
pub mod system;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
