// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dimension list plus a batch factor.
///
/// Shapes are stored in normalized form: trailing dimensions of size one are
/// dropped, so `[2,3,1]x5` and `[2,3]x5` compare equal. The scalar shape is
/// the empty dimension list. Dimensions are addressed lowest-first and any
/// index beyond the stored rank reads as one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<u32>,
    batch: u32,
}

impl Default for Shape {
    fn default() -> Self {
        Shape {
            dims: Vec::new(),
            batch: 1,
        }
    }
}

impl Shape {
    /// Creates a shape from its dimension list and batch factor.
    ///
    /// Every dimension and the batch factor must be positive.
    pub fn new(dims: &[u32], batch: u32) -> Result<Shape> {
        if let Some(index) = dims.iter().position(|&d| d == 0) {
            return Err(Error::ZeroDimension { index });
        }
        if batch == 0 {
            return Err(Error::ZeroBatch);
        }
        let mut dims = dims.to_vec();
        while dims.last() == Some(&1) {
            dims.pop();
        }
        Ok(Shape { dims, batch })
    }

    /// Creates an unbatched shape from a dimension list.
    pub fn from_dims(dims: &[u32]) -> Result<Shape> {
        Shape::new(dims, 1)
    }

    /// The scalar shape `[]x1`.
    pub fn scalar() -> Shape {
        Shape::default()
    }

    /// Scalar shape carrying a batch factor; callers guarantee `batch > 0`.
    pub(crate) fn scalar_batched(batch: u32) -> Shape {
        Shape {
            dims: Vec::new(),
            batch,
        }
    }

    /// Returns the size of dimension `index`, reading one beyond the rank.
    pub fn at(&self, index: usize) -> u32 {
        self.dims.get(index).copied().unwrap_or(1)
    }

    /// Returns the normalized dimension list.
    pub fn dims(&self) -> &[u32] {
        &self.dims
    }

    /// Returns the number of stored dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns the batch factor.
    pub fn batch(&self) -> u32 {
        self.batch
    }

    /// Returns whether each sample holds exactly one value.
    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Number of values in one sample.
    pub fn volume(&self) -> usize {
        self.dims.iter().map(|&d| d as usize).product()
    }

    /// Total number of values across the whole batch.
    pub fn size(&self) -> usize {
        self.volume() * self.batch as usize
    }

    /// Returns a copy with dimension `index` resized to `size`.
    pub fn resize_dim(&self, index: usize, size: u32) -> Result<Shape> {
        if size == 0 {
            return Err(Error::ZeroDimension { index });
        }
        let mut dims = self.dims.clone();
        if index >= dims.len() {
            dims.resize(index + 1, 1);
        }
        dims[index] = size;
        Shape::new(&dims, self.batch)
    }

    /// Returns a copy with the batch factor replaced.
    pub fn resize_batch(&self, batch: u32) -> Result<Shape> {
        if batch == 0 {
            return Err(Error::ZeroBatch);
        }
        Ok(Shape {
            dims: self.dims.clone(),
            batch,
        })
    }

    /// Returns whether the per-sample dimensions match, ignoring batches.
    pub fn has_same_dims(&self, other: &Shape) -> bool {
        self.dims == other.dims
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]x{}", self.batch)
    }
}
