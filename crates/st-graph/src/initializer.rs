// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Parameter initialization strategies, sampling through the tensor's device.

use crate::device::Device;
use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// Fills a tensor with fresh values in place.
pub trait Initializer {
    fn apply(&self, tensor: &mut Tensor) -> Result<()>;
}

/// Fills every value with a constant.
#[derive(Clone, Copy, Debug)]
pub struct Constant {
    value: f32,
}

impl Constant {
    pub fn new(value: f32) -> Constant {
        Constant { value }
    }
}

impl Initializer for Constant {
    fn apply(&self, tensor: &mut Tensor) -> Result<()> {
        for v in tensor.data_mut() {
            *v = self.value;
        }
        Ok(())
    }
}

/// Uniform samples from `[lower, upper)`.
#[derive(Clone, Copy, Debug)]
pub struct Uniform {
    lower: f32,
    upper: f32,
}

impl Uniform {
    pub fn new(lower: f32, upper: f32) -> Uniform {
        Uniform { lower, upper }
    }
}

impl Initializer for Uniform {
    fn apply(&self, tensor: &mut Tensor) -> Result<()> {
        let samples =
            tensor
                .device()
                .sample_uniform(tensor.data().len(), self.lower, self.upper)?;
        tensor.data_mut().copy_from_slice(&samples);
        Ok(())
    }
}

/// Normal samples with the given mean and standard deviation.
#[derive(Clone, Copy, Debug)]
pub struct Normal {
    mean: f32,
    sd: f32,
}

impl Normal {
    pub fn new(mean: f32, sd: f32) -> Normal {
        Normal { mean, sd }
    }
}

impl Initializer for Normal {
    fn apply(&self, tensor: &mut Tensor) -> Result<()> {
        let samples = tensor
            .device()
            .sample_normal(tensor.data().len(), self.mean, self.sd)?;
        tensor.data_mut().copy_from_slice(&samples);
        Ok(())
    }
}

/// Identity matrix; requires an unbatched square matrix shape.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl Identity {
    pub fn new() -> Identity {
        Identity
    }
}

impl Initializer for Identity {
    fn apply(&self, tensor: &mut Tensor) -> Result<()> {
        let shape = tensor.shape().clone();
        if shape.rank() > 2 || shape.at(0) != shape.at(1) || shape.batch() != 1 {
            return Err(Error::InvalidArgument(
                "identity initializer requires an unbatched square matrix",
            ));
        }
        let n = shape.at(0) as usize;
        let data = tensor.data_mut();
        data.fill(0.0);
        for i in 0..n {
            data[i + n * i] = 1.0;
        }
        Ok(())
    }
}

/// Xavier/Glorot uniform initialization scaled by `gain`.
///
/// The bound is `gain * sqrt(6 / (fan_in + fan_out))` with fans taken from
/// the first two dimensions.
#[derive(Clone, Copy, Debug)]
pub struct XavierUniform {
    gain: f32,
}

impl XavierUniform {
    pub fn new(gain: f32) -> XavierUniform {
        XavierUniform { gain }
    }
}

impl Default for XavierUniform {
    fn default() -> Self {
        XavierUniform { gain: 1.0 }
    }
}

impl Initializer for XavierUniform {
    fn apply(&self, tensor: &mut Tensor) -> Result<()> {
        let shape = tensor.shape();
        let fan_in = shape.at(1) as f32;
        let fan_out = shape.at(0) as f32;
        let bound = self.gain * (6.0 / (fan_in + fan_out)).sqrt();
        let samples = tensor
            .device()
            .sample_uniform(tensor.data().len(), -bound, bound)?;
        tensor.data_mut().copy_from_slice(&samples);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceExt, Naive};
    use crate::shape::Shape;

    fn zeros(dims: &[u32]) -> Tensor {
        Naive::with_seed(11)
            .new_tensor_by_constant(Shape::new(dims, 1).unwrap(), 0.0)
            .unwrap()
    }

    #[test]
    fn constant_fills_every_value() {
        let mut t = zeros(&[2, 3]);
        Constant::new(4.5).apply(&mut t).unwrap();
        assert!(t.data().iter().all(|&v| v == 4.5));
    }

    #[test]
    fn identity_requires_square_matrices() {
        let mut t = zeros(&[3, 3]);
        Identity::new().apply(&mut t).unwrap();
        assert_eq!(t.data()[0], 1.0);
        assert_eq!(t.data()[1], 0.0);
        assert_eq!(t.data()[4], 1.0);
        let mut bad = zeros(&[2, 3]);
        assert!(Identity::new().apply(&mut bad).is_err());
    }

    #[test]
    fn xavier_stays_within_bound() {
        let mut t = zeros(&[4, 8]);
        XavierUniform::default().apply(&mut t).unwrap();
        let bound = (6.0f32 / 12.0).sqrt();
        assert!(t.data().iter().all(|&v| v.abs() <= bound));
        assert!(t.data().iter().any(|&v| v != 0.0));
    }

    #[test]
    fn uniform_respects_range() {
        let mut t = zeros(&[16]);
        Uniform::new(2.0, 3.0).apply(&mut t).unwrap();
        assert!(t.data().iter().all(|&v| (2.0..3.0).contains(&v)));
    }
}
