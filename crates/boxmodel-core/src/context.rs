//! Read-only views of system state handed to rate expressions.
//!
//! A [`Context`] borrows the [`System`] immutably, so no mass can change while
//! one is alive. Contexts are cheap to build and are rebuilt for every
//! evaluation; nothing caches them across steps.

use std::fmt;

use crate::entity::{Condition, Reservoir};
use crate::quantity::{Dimension, Quantity};
use crate::system::{System, SystemError};

/// Evaluation context, focused on one reservoir or on none (global).
#[derive(Clone, Copy)]
pub struct Context<'a> {
    system: &'a System,
    focus: Option<&'a Reservoir>,
}

impl<'a> Context<'a> {
    pub(crate) fn new(system: &'a System, focus: Option<&'a Reservoir>) -> Self {
        Self { system, focus }
    }

    pub fn system(&self) -> &'a System {
        self.system
    }

    pub fn is_global(&self) -> bool {
        self.focus.is_none()
    }

    /// The focused reservoir, if any.
    pub fn focus(&self) -> Option<ReservoirView<'a>> {
        self.focus.map(|r| ReservoirView::new(self.system, r))
    }

    fn require_focus(&self) -> Result<&'a Reservoir, SystemError> {
        self.focus.ok_or(SystemError::NoFocus)
    }

    /// Condition quantity `name` of the focused reservoir. The global context
    /// reads the global condition instead.
    pub fn condition(&self, name: &str) -> Result<Quantity, SystemError> {
        match self.focus {
            Some(r) => r.condition().require(name),
            None => self.system.global_condition().require(name),
        }
    }

    /// Like [`condition`](Self::condition) with a dimension check.
    pub fn condition_as(&self, name: &str, expected: Dimension) -> Result<Quantity, SystemError> {
        Ok(self.condition(name)?.ensure(expected)?)
    }

    pub fn global_condition(&self) -> &'a Condition {
        self.system.global_condition()
    }

    /// Concentration of variable `variable` in the focused reservoir.
    pub fn concentration(&self, variable: &str) -> Result<Quantity, SystemError> {
        let id = self.system.variable_id(variable)?;
        self.require_focus()?.concentration(id)
    }

    pub fn variable_mass(&self, variable: &str) -> Result<Quantity, SystemError> {
        let id = self.system.variable_id(variable)?;
        self.require_focus()?.variable_mass(id)
    }

    pub fn fluid_mass(&self) -> Result<Quantity, SystemError> {
        Ok(self.require_focus()?.fluid_mass())
    }

    /// View of any reservoir by name, including the focused one.
    pub fn reservoir(&self, name: &str) -> Result<ReservoirView<'a>, SystemError> {
        let r = self.system.reservoir_by_name(name)?;
        Ok(ReservoirView::new(self.system, r))
    }

    /// Views of every reservoir in id order.
    pub fn reservoirs(&self) -> impl Iterator<Item = ReservoirView<'a>> + 'a {
        let system = self.system;
        system.reservoirs().map(move |r| ReservoirView::new(system, r))
    }

    pub fn variable_concentration(
        &self,
        reservoir: &str,
        variable: &str,
    ) -> Result<Quantity, SystemError> {
        self.reservoir(reservoir)?.concentration(variable)
    }
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("focus", &self.focus.map(Reservoir::name))
            .finish()
    }
}

/// Read-only view of one reservoir's condition and masses.
#[derive(Clone, Copy)]
pub struct ReservoirView<'a> {
    system: &'a System,
    reservoir: &'a Reservoir,
}

impl<'a> ReservoirView<'a> {
    fn new(system: &'a System, reservoir: &'a Reservoir) -> Self {
        Self { system, reservoir }
    }

    pub fn name(&self) -> &'a str {
        self.reservoir.name()
    }

    pub fn condition(&self) -> &'a Condition {
        self.reservoir.condition()
    }

    pub fn fluid_mass(&self) -> Quantity {
        self.reservoir.fluid_mass()
    }

    pub fn mass(&self) -> Quantity {
        self.reservoir.mass()
    }

    pub fn concentration(&self, variable: &str) -> Result<Quantity, SystemError> {
        let id = self.system.variable_id(variable)?;
        self.reservoir.concentration(id)
    }

    pub fn variable_mass(&self, variable: &str) -> Result<Quantity, SystemError> {
        let id = self.system.variable_id(variable)?;
        self.reservoir.variable_mass(id)
    }
}

impl fmt::Debug for ReservoirView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReservoirView")
            .field(&self.reservoir.name())
            .finish()
    }
}
