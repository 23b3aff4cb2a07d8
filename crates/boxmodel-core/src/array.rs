//! Dense, dimension-homogeneous arrays produced by system assembly.
//!
//! Each array wraps an `ndarray` buffer of raw SI magnitudes plus a single
//! [`Dimension`] shared by all of its elements, so element writes are checked
//! once against that dimension and reads hand back full [`Quantity`] values.

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis, s};
use serde::{Deserialize, Serialize};

use crate::quantity::{Dimension, Quantity, QuantityError};

fn same_dimension(expected: Dimension, found: Dimension) -> Result<(), QuantityError> {
    if expected == found {
        Ok(())
    } else {
        Err(QuantityError::WrongDimensionality { expected, found })
    }
}

// ---------------------------------------------------------------------------
// Vector
// ---------------------------------------------------------------------------

/// A length-N vector indexed by reservoir id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityVector {
    dimension: Dimension,
    values: Array1<f64>,
}

impl QuantityVector {
    pub fn zeros(len: usize, dimension: Dimension) -> Self {
        Self {
            dimension,
            values: Array1::zeros(len),
        }
    }

    /// Build from raw SI magnitudes that all share `dimension`.
    pub fn from_magnitudes(dimension: Dimension, values: Vec<f64>) -> Self {
        Self {
            dimension,
            values: Array1::from(values),
        }
    }

    /// Build from quantities, all of which must have `dimension`.
    pub fn from_quantities<I>(dimension: Dimension, items: I) -> Result<Self, QuantityError>
    where
        I: IntoIterator<Item = Quantity>,
    {
        let values = items
            .into_iter()
            .map(|q| q.ensure(dimension).map(|q| q.magnitude()))
            .collect::<Result<Array1<_>, _>>()?;
        Ok(Self { dimension, values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    /// Element `i`, or `None` past the end.
    pub fn get(&self, i: usize) -> Option<Quantity> {
        self.values
            .get(i)
            .map(|v| Quantity::from_base(*v, self.dimension))
    }

    /// Element `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of bounds.
    pub fn at(&self, i: usize) -> Quantity {
        Quantity::from_base(self.values[i], self.dimension)
    }

    /// Overwrite element `i`; `q` must have the vector's dimension.
    pub fn set(&mut self, i: usize, q: Quantity) -> Result<(), QuantityError> {
        self.values[i] = q.ensure(self.dimension)?.magnitude();
        Ok(())
    }

    /// Accumulate `q` into element `i`.
    pub fn add(&mut self, i: usize, q: Quantity) -> Result<(), QuantityError> {
        self.values[i] += q.ensure(self.dimension)?.magnitude();
        Ok(())
    }

    /// Raw SI magnitudes.
    pub fn magnitudes(&self) -> ArrayView1<'_, f64> {
        self.values.view()
    }

    pub fn iter(&self) -> impl Iterator<Item = Quantity> + '_ {
        self.values
            .iter()
            .map(|v| Quantity::from_base(*v, self.dimension))
    }

    pub fn sum(&self) -> Quantity {
        Quantity::from_base(self.values.sum(), self.dimension)
    }

    /// Elementwise sum. Both vectors must share a dimension and a length.
    pub fn try_add(&self, other: &QuantityVector) -> Result<QuantityVector, QuantityError> {
        same_dimension(self.dimension, other.dimension)?;
        Ok(QuantityVector {
            dimension: self.dimension,
            values: &self.values + &other.values,
        })
    }

    pub fn try_sub(&self, other: &QuantityVector) -> Result<QuantityVector, QuantityError> {
        same_dimension(self.dimension, other.dimension)?;
        Ok(QuantityVector {
            dimension: self.dimension,
            values: &self.values - &other.values,
        })
    }

    /// Elementwise product; dimensions combine.
    pub fn mul_elementwise(&self, other: &QuantityVector) -> QuantityVector {
        QuantityVector {
            dimension: self.dimension * other.dimension,
            values: &self.values * &other.values,
        }
    }

    pub fn scale(&self, factor: f64) -> QuantityVector {
        QuantityVector {
            dimension: self.dimension,
            values: &self.values * factor,
        }
    }
}

// ---------------------------------------------------------------------------
// Square matrix
// ---------------------------------------------------------------------------

/// An N×N matrix. Entry `(i, j)` is transport from reservoir `i` to
/// reservoir `j`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityMatrix {
    dimension: Dimension,
    values: Array2<f64>,
}

impl QuantityMatrix {
    pub fn zeros(size: usize, dimension: Dimension) -> Self {
        Self {
            dimension,
            values: Array2::zeros((size, size)),
        }
    }

    /// N, the number of rows and of columns.
    pub fn size(&self) -> usize {
        self.values.nrows()
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    /// Entry `(i, j)`.
    ///
    /// # Panics
    ///
    /// Panics if either index is out of bounds.
    pub fn at(&self, i: usize, j: usize) -> Quantity {
        Quantity::from_base(self.values[[i, j]], self.dimension)
    }

    pub fn get(&self, i: usize, j: usize) -> Option<Quantity> {
        self.values
            .get((i, j))
            .map(|v| Quantity::from_base(*v, self.dimension))
    }

    pub fn set(&mut self, i: usize, j: usize, q: Quantity) -> Result<(), QuantityError> {
        self.values[[i, j]] = q.ensure(self.dimension)?.magnitude();
        Ok(())
    }

    pub fn add(&mut self, i: usize, j: usize, q: Quantity) -> Result<(), QuantityError> {
        self.values[[i, j]] += q.ensure(self.dimension)?.magnitude();
        Ok(())
    }

    pub fn zero_diagonal(&mut self) {
        self.values.diag_mut().fill(0.0);
    }

    /// Per-row totals: everything leaving reservoir `i`.
    pub fn row_sums(&self) -> QuantityVector {
        QuantityVector {
            dimension: self.dimension,
            values: self.values.sum_axis(Axis(1)),
        }
    }

    /// Per-column totals: everything arriving in reservoir `j`.
    pub fn column_sums(&self) -> QuantityVector {
        QuantityVector {
            dimension: self.dimension,
            values: self.values.sum_axis(Axis(0)),
        }
    }

    /// Multiply row `i` by `factors[i]`; dimensions combine.
    ///
    /// # Panics
    ///
    /// Panics if `factors` does not have one entry per row.
    pub fn scale_rows(&self, factors: &QuantityVector) -> QuantityMatrix {
        let column = factors.values.view().insert_axis(Axis(1));
        QuantityMatrix {
            dimension: self.dimension * factors.dimension,
            values: &self.values * &column,
        }
    }

    /// Raw SI magnitudes, indexed `[from, to]`.
    pub fn magnitudes(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }
}

// ---------------------------------------------------------------------------
// Reaction rate cube
// ---------------------------------------------------------------------------

/// Rank-3 array `[reservoir][variable][reaction]`. The reaction axis is the
/// position of the reaction within its reservoir's reaction list, so each
/// reaction's contribution stays individually addressable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateCube {
    dimension: Dimension,
    values: Array3<f64>,
}

impl RateCube {
    pub fn zeros(reservoirs: usize, variables: usize, reactions: usize, dimension: Dimension) -> Self {
        Self {
            dimension,
            values: Array3::zeros((reservoirs, variables, reactions)),
        }
    }

    /// `(reservoirs, variables, reactions)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        self.values.dim()
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    /// # Panics
    ///
    /// Panics if any index is out of bounds.
    pub fn at(&self, b: usize, v: usize, r: usize) -> Quantity {
        Quantity::from_base(self.values[[b, v, r]], self.dimension)
    }

    pub fn set(&mut self, b: usize, v: usize, r: usize, q: Quantity) -> Result<(), QuantityError> {
        self.values[[b, v, r]] = q.ensure(self.dimension)?.magnitude();
        Ok(())
    }

    /// Sum over the reaction axis for one (reservoir, variable) pair.
    pub fn net_rate(&self, b: usize, v: usize) -> Quantity {
        Quantity::from_base(self.values.slice(s![b, v, ..]).sum(), self.dimension)
    }

    /// Net reaction rate of variable `v` in every reservoir.
    pub fn variable_rates(&self, v: usize) -> QuantityVector {
        QuantityVector {
            dimension: self.dimension,
            values: self.values.index_axis(Axis(1), v).sum_axis(Axis(1)),
        }
    }

    pub fn magnitudes(&self) -> ArrayView3<'_, f64> {
        self.values.view()
    }
}
