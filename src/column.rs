//! Typed Column: the atomic validated unit of storage.
//!
//! A column is a two-dimensional `f64` array whose rows are time steps. Its
//! width is 1 unless the registry marks the tag multi-channel. Named columns
//! take their unit and description from the registry entry matching the tag
//! (after wildcard normalisation). Columns are immutable; an update builds a
//! new column.

use ndarray::{Array2, ArrayView1, Axis};

use crate::error::{ArchiveError, ArchiveResult};
use crate::registry::FlagRegistry;

/// A named, unit-tagged, length-checked column.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedColumn {
    name: Option<String>,
    unit: Option<String>,
    description: Option<String>,
    multichannel: bool,
    values: Array2<f64>,
}

impl TypedColumn {
    /// Validating factory.
    ///
    /// A named column must be a registered tag. If the array does not have
    /// `declared_length` rows (or has several columns for a single-channel
    /// tag) it is transposed once and checked again; a remaining mismatch is
    /// a [`ArchiveError::Shape`].
    pub fn new(
        name: Option<&str>,
        values: Array2<f64>,
        declared_length: usize,
        registry: &FlagRegistry,
    ) -> ArchiveResult<Self> {
        let (unit, description, multichannel) = match name {
            Some(tag) => {
                let flag = registry.lookup(tag)?;
                (
                    Some(flag.unit.clone()),
                    Some(flag.desc.clone()),
                    flag.multichannel,
                )
            }
            None => (None, None, true),
        };

        let values = if fits(&values, declared_length, multichannel) {
            values
        } else {
            let transposed = values.reversed_axes();
            if !fits(&transposed, declared_length, multichannel) {
                let (rows, cols) = transposed.dim();
                return Err(ArchiveError::Shape(format!(
                    "column {} has shape {}x{}, expected {} rows{}",
                    name.unwrap_or("<anonymous>"),
                    cols,
                    rows,
                    declared_length,
                    if multichannel { "" } else { " and 1 channel" }
                )));
            }
            transposed.as_standard_layout().into_owned()
        };

        Ok(Self {
            name: name.map(str::to_string),
            unit,
            description,
            multichannel,
            values,
        })
    }

    /// Builds a single-channel column from a flat vector.
    pub fn from_vec(
        name: Option<&str>,
        values: Vec<f64>,
        registry: &FlagRegistry,
    ) -> ArchiveResult<Self> {
        let len = values.len();
        let array = Array2::from_shape_vec((len, 1), values)
            .map_err(|e| ArchiveError::Shape(e.to_string()))?;
        Self::new(name, array, len, registry)
    }

    /// Registered tag, `None` for anonymous intermediates.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Canonical unit.
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Registry description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Values, rows along axis 0.
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Consumes the column, returning its values.
    pub fn into_values(self) -> Array2<f64> {
        self.values
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.values.nrows()
    }

    /// True when the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }

    /// Number of channels.
    pub fn width(&self) -> usize {
        self.values.ncols()
    }

    /// Whether the tag permits more than one channel.
    pub fn is_multichannel(&self) -> bool {
        self.multichannel
    }

    /// One channel as a view.
    pub fn channel(&self, index: usize) -> Option<ArrayView1<'_, f64>> {
        (index < self.width()).then(|| self.values.index_axis(Axis(1), index))
    }

    /// Re-validates against an expected row count.
    pub fn check_length(&self, expected: usize) -> ArchiveResult<()> {
        if self.len() != expected {
            return Err(ArchiveError::Shape(format!(
                "column {} has {} rows, structure has {}",
                self.name().unwrap_or("<anonymous>"),
                self.len(),
                expected
            )));
        }
        Ok(())
    }
}

fn fits(values: &Array2<f64>, declared_length: usize, multichannel: bool) -> bool {
    values.nrows() == declared_length && (multichannel || values.ncols() == 1)
}
