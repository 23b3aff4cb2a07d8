//! Rate expressions: a constant quantity or a pure function of simulation
//! time and a read-only [`Context`].

use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::quantity::{Dimension, Quantity};
use crate::system::SystemError;

/// Signature of an evaluable expression.
pub type EvalFn = dyn Fn(Quantity, &Context<'_>) -> Result<Quantity, SystemError> + Send + Sync;

/// A value attached to a descriptor or fluid that may depend on time and
/// system state.
///
/// Evaluable closures receive `&Context` and only `Fn` access to their
/// captures, so the same `(t, state)` pair always yields the same result.
#[derive(Clone)]
pub enum Expression {
    Constant(Quantity),
    Evaluable(Arc<EvalFn>),
}

/// Rates of flows, fluxes, processes and reactions are expressions.
pub type RateExpression = Expression;

impl Expression {
    pub fn constant(q: Quantity) -> Self {
        Expression::Constant(q)
    }

    pub fn evaluable<F>(f: F) -> Self
    where
        F: Fn(Quantity, &Context<'_>) -> Result<Quantity, SystemError> + Send + Sync + 'static,
    {
        Expression::Evaluable(Arc::new(f))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Expression::Constant(_))
    }

    /// Evaluate at time `t` against `ctx`. `t` must be a time quantity.
    pub fn evaluate(&self, t: Quantity, ctx: &Context<'_>) -> Result<Quantity, SystemError> {
        t.ensure(Dimension::TIME)?;
        match self {
            Expression::Constant(q) => Ok(*q),
            Expression::Evaluable(f) => f(t, ctx),
        }
    }

    /// Evaluate and require the result to have `expected` dimension.
    pub fn evaluate_as(
        &self,
        t: Quantity,
        ctx: &Context<'_>,
        expected: Dimension,
    ) -> Result<Quantity, SystemError> {
        Ok(self.evaluate(t, ctx)?.ensure(expected)?)
    }

    /// Constants are checked eagerly at registration; evaluable expressions
    /// can only be checked when they run.
    pub(crate) fn check_constant(&self, expected: Dimension) -> Result<(), SystemError> {
        if let Expression::Constant(q) = self {
            q.ensure(expected)?;
        }
        Ok(())
    }
}

impl From<Quantity> for Expression {
    fn from(q: Quantity) -> Self {
        Expression::Constant(q)
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Constant(q) => f.debug_tuple("Constant").field(q).finish(),
            Expression::Evaluable(_) => f.write_str("Evaluable(<fn>)"),
        }
    }
}
