//! Run-time dimensioned quantities.
//!
//! Every magnitude is stored normalized to SI base units (kg, m, s, K, mol)
//! together with its [`Dimension`]. Multiplication and division combine
//! dimensions; addition and subtraction are only defined between quantities of
//! the same dimension and are therefore exposed as fallible `try_*` methods.

use std::fmt;
use std::ops::{Div, Mul, Neg};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by quantity arithmetic and unit handling.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QuantityError {
    #[error("wrong dimensionality: expected {expected}, found {found}")]
    WrongDimensionality {
        expected: Dimension,
        found: Dimension,
    },
    #[error("unknown unit symbol: {0}")]
    UnknownUnit(String),
    #[error("invalid unit expression: {0:?}")]
    InvalidUnitExpression(String),
}

// ---------------------------------------------------------------------------
// Dimension
// ---------------------------------------------------------------------------

/// Exponents over the SI base dimensions used by box models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Dimension {
    pub mass: i8,
    pub length: i8,
    pub time: i8,
    pub temperature: i8,
    pub amount: i8,
}

impl Dimension {
    pub const DIMENSIONLESS: Dimension = Dimension::new(0, 0, 0, 0, 0);
    pub const MASS: Dimension = Dimension::new(1, 0, 0, 0, 0);
    pub const LENGTH: Dimension = Dimension::new(0, 1, 0, 0, 0);
    pub const TIME: Dimension = Dimension::new(0, 0, 1, 0, 0);
    pub const TEMPERATURE: Dimension = Dimension::new(0, 0, 0, 1, 0);
    pub const AMOUNT: Dimension = Dimension::new(0, 0, 0, 0, 1);
    pub const VOLUME: Dimension = Dimension::new(0, 3, 0, 0, 0);
    pub const DENSITY: Dimension = Dimension::new(1, -3, 0, 0, 0);
    pub const MASS_RATE: Dimension = Dimension::new(1, 0, -1, 0, 0);
    pub const FREQUENCY: Dimension = Dimension::new(0, 0, -1, 0, 0);

    pub const fn new(mass: i8, length: i8, time: i8, temperature: i8, amount: i8) -> Self {
        Self {
            mass,
            length,
            time,
            temperature,
            amount,
        }
    }

    pub fn is_dimensionless(&self) -> bool {
        *self == Self::DIMENSIONLESS
    }

    /// Raise every exponent to an integer power.
    pub fn powi(self, n: i32) -> Self {
        let scale = |e: i8| (e as i32 * n) as i8;
        Self::new(
            scale(self.mass),
            scale(self.length),
            scale(self.time),
            scale(self.temperature),
            scale(self.amount),
        )
    }

    fn components(&self) -> [(&'static str, i8); 5] {
        [
            ("mass", self.mass),
            ("length", self.length),
            ("time", self.time),
            ("temperature", self.temperature),
            ("substance", self.amount),
        ]
    }
}

impl Mul for Dimension {
    type Output = Dimension;

    fn mul(self, rhs: Dimension) -> Dimension {
        Dimension::new(
            self.mass + rhs.mass,
            self.length + rhs.length,
            self.time + rhs.time,
            self.temperature + rhs.temperature,
            self.amount + rhs.amount,
        )
    }
}

impl Div for Dimension {
    type Output = Dimension;

    fn div(self, rhs: Dimension) -> Dimension {
        self * rhs.powi(-1)
    }
}

fn write_factors(
    f: &mut fmt::Formatter<'_>,
    factors: &[(&'static str, i8)],
    bracket: bool,
) -> fmt::Result {
    for (i, (name, exp)) in factors.iter().enumerate() {
        if i > 0 {
            f.write_str(" * ")?;
        }
        if bracket {
            write!(f, "[{name}]")?;
        } else {
            f.write_str(name)?;
        }
        if *exp != 1 {
            write!(f, "^{exp}")?;
        }
    }
    Ok(())
}

impl fmt::Display for Dimension {
    /// Formats as `[mass] / [time]`, or `dimensionless`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dimensionless() {
            return f.write_str("dimensionless");
        }
        let comps = self.components();
        let num: Vec<_> = comps.iter().filter(|(_, e)| *e > 0).copied().collect();
        let den: Vec<_> = comps
            .iter()
            .filter(|(_, e)| *e < 0)
            .map(|(n, e)| (*n, -*e))
            .collect();
        if num.is_empty() {
            f.write_str("1")?;
        } else {
            write_factors(f, &num, true)?;
        }
        if !den.is_empty() {
            f.write_str(" / ")?;
            write_factors(f, &den, true)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

/// A measurement unit: scale factor to SI base units plus a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub factor: f64,
    pub dimension: Dimension,
}

const SECONDS_PER_DAY: f64 = 86_400.0;

pub const DIMENSIONLESS: Unit = Unit::new(1.0, Dimension::DIMENSIONLESS);
pub const KILOGRAM: Unit = Unit::new(1.0, Dimension::MASS);
pub const GRAM: Unit = Unit::new(1e-3, Dimension::MASS);
pub const TONNE: Unit = Unit::new(1e3, Dimension::MASS);
pub const METER: Unit = Unit::new(1.0, Dimension::LENGTH);
pub const CUBIC_METER: Unit = Unit::new(1.0, Dimension::VOLUME);
pub const LITER: Unit = Unit::new(1e-3, Dimension::VOLUME);
pub const SECOND: Unit = Unit::new(1.0, Dimension::TIME);
pub const MINUTE: Unit = Unit::new(60.0, Dimension::TIME);
pub const HOUR: Unit = Unit::new(3_600.0, Dimension::TIME);
pub const DAY: Unit = Unit::new(SECONDS_PER_DAY, Dimension::TIME);
/// Julian year (365.25 days).
pub const YEAR: Unit = Unit::new(365.25 * SECONDS_PER_DAY, Dimension::TIME);
pub const KELVIN: Unit = Unit::new(1.0, Dimension::TEMPERATURE);
pub const MOLE: Unit = Unit::new(1.0, Dimension::AMOUNT);

impl Unit {
    pub const fn new(factor: f64, dimension: Dimension) -> Self {
        Self { factor, dimension }
    }

    pub fn powi(self, n: i32) -> Self {
        Self::new(self.factor.powi(n), self.dimension.powi(n))
    }

    /// Parse a unit expression such as `kg/year`, `kg/m^3` or `g * kg^-1`.
    ///
    /// Each `*` or `/` applies to the single term that follows it; there is
    /// no grouping. `1` and the empty string are dimensionless.
    pub fn parse(expr: &str) -> Result<Unit, QuantityError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() || trimmed == "1" || trimmed == "dimensionless" {
            return Ok(DIMENSIONLESS);
        }

        let mut unit = DIMENSIONLESS;
        let mut divide = false;
        let mut term = String::new();

        let flush = |term: &mut String, unit: &mut Unit, divide: bool| -> Result<(), QuantityError> {
            let t = term.trim();
            if t.is_empty() {
                return Err(QuantityError::InvalidUnitExpression(expr.to_string()));
            }
            let parsed = parse_term(t)?;
            *unit = if divide { *unit / parsed } else { *unit * parsed };
            term.clear();
            Ok(())
        };

        for ch in trimmed.chars() {
            match ch {
                '*' | '/' => {
                    flush(&mut term, &mut unit, divide)?;
                    divide = ch == '/';
                }
                _ => term.push(ch),
            }
        }
        flush(&mut term, &mut unit, divide)?;
        Ok(unit)
    }
}

fn parse_term(term: &str) -> Result<Unit, QuantityError> {
    let (symbol, exponent) = match term.split_once('^') {
        Some((s, e)) => {
            let n: i32 = e
                .trim()
                .parse()
                .map_err(|_| QuantityError::InvalidUnitExpression(term.to_string()))?;
            (s.trim(), n)
        }
        None => (term, 1),
    };
    let base = match symbol {
        "1" => DIMENSIONLESS,
        "kg" => KILOGRAM,
        "g" => GRAM,
        "t" => TONNE,
        "m" => METER,
        "m3" => CUBIC_METER,
        "l" | "L" => LITER,
        "s" => SECOND,
        "min" => MINUTE,
        "h" => HOUR,
        "d" | "day" => DAY,
        "a" | "yr" | "year" => YEAR,
        "K" => KELVIN,
        "mol" => MOLE,
        other => return Err(QuantityError::UnknownUnit(other.to_string())),
    };
    Ok(base.powi(exponent))
}

impl FromStr for Unit {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Unit::parse(s)
    }
}

impl Mul for Unit {
    type Output = Unit;

    fn mul(self, rhs: Unit) -> Unit {
        Unit::new(self.factor * rhs.factor, self.dimension * rhs.dimension)
    }
}

impl Div for Unit {
    type Output = Unit;

    fn div(self, rhs: Unit) -> Unit {
        Unit::new(self.factor / rhs.factor, self.dimension / rhs.dimension)
    }
}

// ---------------------------------------------------------------------------
// Quantity
// ---------------------------------------------------------------------------

/// A magnitude in SI base units tagged with its dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    magnitude: f64,
    dimension: Dimension,
}

impl Quantity {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self {
            magnitude: value * unit.factor,
            dimension: unit.dimension,
        }
    }

    /// Build from a magnitude that is already in SI base units.
    pub const fn from_base(magnitude: f64, dimension: Dimension) -> Self {
        Self {
            magnitude,
            dimension,
        }
    }

    pub const fn zero(dimension: Dimension) -> Self {
        Self::from_base(0.0, dimension)
    }

    pub const fn dimensionless(value: f64) -> Self {
        Self::from_base(value, Dimension::DIMENSIONLESS)
    }

    /// Magnitude in SI base units.
    pub fn magnitude(&self) -> f64 {
        self.magnitude
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn is_dimensionless(&self) -> bool {
        self.dimension.is_dimensionless()
    }

    pub fn is_finite(&self) -> bool {
        self.magnitude.is_finite()
    }

    /// Canonical base-unit representation. Magnitudes are always stored
    /// normalized, so this is the identity.
    pub fn to_base_units(self) -> Self {
        self
    }

    /// Express the magnitude in `unit`.
    pub fn value_in(&self, unit: Unit) -> Result<f64, QuantityError> {
        self.ensure(unit.dimension)?;
        Ok(self.magnitude / unit.factor)
    }

    /// Returns `self` if it has the expected dimension.
    pub fn ensure(self, expected: Dimension) -> Result<Self, QuantityError> {
        if self.dimension == expected {
            Ok(self)
        } else {
            Err(QuantityError::WrongDimensionality {
                expected,
                found: self.dimension,
            })
        }
    }

    pub fn try_add(self, rhs: Quantity) -> Result<Quantity, QuantityError> {
        rhs.ensure(self.dimension)?;
        Ok(Self::from_base(self.magnitude + rhs.magnitude, self.dimension))
    }

    pub fn try_sub(self, rhs: Quantity) -> Result<Quantity, QuantityError> {
        rhs.ensure(self.dimension)?;
        Ok(Self::from_base(self.magnitude - rhs.magnitude, self.dimension))
    }

    pub fn powi(self, n: i32) -> Quantity {
        Self::from_base(self.magnitude.powi(n), self.dimension.powi(n))
    }

    pub fn abs(self) -> Quantity {
        Self::from_base(self.magnitude.abs(), self.dimension)
    }
}

impl PartialOrd for Quantity {
    /// Only quantities of equal dimension are ordered.
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        if self.dimension != other.dimension {
            return None;
        }
        self.magnitude.partial_cmp(&other.magnitude)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.magnitude, self.dimension)
    }
}

impl Mul for Quantity {
    type Output = Quantity;

    fn mul(self, rhs: Quantity) -> Quantity {
        Quantity::from_base(self.magnitude * rhs.magnitude, self.dimension * rhs.dimension)
    }
}

impl Div for Quantity {
    type Output = Quantity;

    fn div(self, rhs: Quantity) -> Quantity {
        Quantity::from_base(self.magnitude / rhs.magnitude, self.dimension / rhs.dimension)
    }
}

impl Mul<f64> for Quantity {
    type Output = Quantity;

    fn mul(self, rhs: f64) -> Quantity {
        Quantity::from_base(self.magnitude * rhs, self.dimension)
    }
}

impl Mul<Quantity> for f64 {
    type Output = Quantity;

    fn mul(self, rhs: Quantity) -> Quantity {
        rhs * self
    }
}

impl Div<f64> for Quantity {
    type Output = Quantity;

    fn div(self, rhs: f64) -> Quantity {
        Quantity::from_base(self.magnitude / rhs, self.dimension)
    }
}

impl Mul<Unit> for f64 {
    type Output = Quantity;

    fn mul(self, rhs: Unit) -> Quantity {
        Quantity::new(self, rhs)
    }
}

impl Mul<Unit> for Quantity {
    type Output = Quantity;

    fn mul(self, rhs: Unit) -> Quantity {
        Quantity::from_base(self.magnitude * rhs.factor, self.dimension * rhs.dimension)
    }
}

impl Div<Unit> for Quantity {
    type Output = Quantity;

    fn div(self, rhs: Unit) -> Quantity {
        Quantity::from_base(self.magnitude / rhs.factor, self.dimension / rhs.dimension)
    }
}

impl Neg for Quantity {
    type Output = Quantity;

    fn neg(self) -> Quantity {
        Quantity::from_base(-self.magnitude, self.dimension)
    }
}
