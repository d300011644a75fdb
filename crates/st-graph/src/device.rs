// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Compute devices and the process-default device registry.
//!
//! A device owns tensor allocation and random sampling. Only the naive CPU
//! backend exists in this crate; the trait seam is where accelerator
//! backends would plug in.

use crate::error::{Error, Result};
use crate::shape::Shape;
use crate::tensor::Tensor;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Bernoulli, LogNormal, Normal};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

/// Backend seam: raw buffer sampling and identification.
///
/// Implementations are single-threaded and shared through [`DeviceRef`]
/// handles; tensors remember the handle that created them.
pub trait Device {
    /// Human-readable backend name used in diagnostics.
    fn name(&self) -> &str;

    /// Samples `len` values uniformly from `[lower, upper)`.
    fn sample_uniform(&self, len: usize, lower: f32, upper: f32) -> Result<Vec<f32>>;

    /// Samples `len` values from a normal distribution.
    fn sample_normal(&self, len: usize, mean: f32, sd: f32) -> Result<Vec<f32>>;

    /// Samples `len` values from a log-normal distribution.
    fn sample_log_normal(&self, len: usize, mean: f32, sd: f32) -> Result<Vec<f32>>;

    /// Samples `len` values in `{0, 1}` with success probability `p`.
    fn sample_bernoulli(&self, len: usize, p: f32) -> Result<Vec<f32>>;
}

impl std::fmt::Debug for dyn Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device").field("name", &self.name()).finish()
    }
}

/// Shared handle to a device backend.
pub type DeviceRef = Rc<dyn Device>;

/// Tensor constructors available on any device handle.
pub trait DeviceExt {
    /// Allocates a tensor filled with `k`.
    fn new_tensor_by_constant(&self, shape: Shape, k: f32) -> Result<Tensor>;

    /// Allocates a tensor from explicit values; the length must match the
    /// shape's total size.
    fn new_tensor_by_vector(&self, shape: Shape, values: Vec<f32>) -> Result<Tensor>;

    /// Allocates a `size` × `size` identity matrix.
    fn identity(&self, size: u32) -> Result<Tensor>;

    /// Allocates a tensor of uniform samples from `[lower, upper)`.
    fn random_uniform(&self, shape: Shape, lower: f32, upper: f32) -> Result<Tensor>;

    /// Allocates a tensor of normal samples.
    fn random_normal(&self, shape: Shape, mean: f32, sd: f32) -> Result<Tensor>;

    /// Allocates a tensor of log-normal samples.
    fn random_log_normal(&self, shape: Shape, mean: f32, sd: f32) -> Result<Tensor>;

    /// Allocates a tensor of Bernoulli samples.
    fn random_bernoulli(&self, shape: Shape, p: f32) -> Result<Tensor>;
}

impl DeviceExt for DeviceRef {
    fn new_tensor_by_constant(&self, shape: Shape, k: f32) -> Result<Tensor> {
        let len = shape.size();
        Tensor::from_parts(shape, vec![k; len], self.clone())
    }

    fn new_tensor_by_vector(&self, shape: Shape, values: Vec<f32>) -> Result<Tensor> {
        Tensor::from_parts(shape, values, self.clone())
    }

    fn identity(&self, size: u32) -> Result<Tensor> {
        if size == 0 {
            return Err(Error::InvalidArgument("identity size must be positive"));
        }
        let n = size as usize;
        let mut data = vec![0.0; n * n];
        for i in 0..n {
            data[i + n * i] = 1.0;
        }
        Tensor::from_parts(Shape::new(&[size, size], 1)?, data, self.clone())
    }

    fn random_uniform(&self, shape: Shape, lower: f32, upper: f32) -> Result<Tensor> {
        let data = self.sample_uniform(shape.size(), lower, upper)?;
        Tensor::from_parts(shape, data, self.clone())
    }

    fn random_normal(&self, shape: Shape, mean: f32, sd: f32) -> Result<Tensor> {
        let data = self.sample_normal(shape.size(), mean, sd)?;
        Tensor::from_parts(shape, data, self.clone())
    }

    fn random_log_normal(&self, shape: Shape, mean: f32, sd: f32) -> Result<Tensor> {
        let data = self.sample_log_normal(shape.size(), mean, sd)?;
        Tensor::from_parts(shape, data, self.clone())
    }

    fn random_bernoulli(&self, shape: Shape, p: f32) -> Result<Tensor> {
        let data = self.sample_bernoulli(shape.size(), p)?;
        Tensor::from_parts(shape, data, self.clone())
    }
}

/// Naive CPU device backed by [`StdRng`].
pub struct Naive {
    rng: RefCell<StdRng>,
}

impl Naive {
    /// Creates a device seeded from system entropy.
    pub fn new() -> DeviceRef {
        debug!("creating naive device with entropy seed");
        Rc::new(Naive {
            rng: RefCell::new(StdRng::from_entropy()),
        })
    }

    /// Creates a device with a fixed seed for reproducible runs.
    pub fn with_seed(seed: u64) -> DeviceRef {
        debug!(seed, "creating naive device");
        Rc::new(Naive {
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
        })
    }
}

impl Device for Naive {
    fn name(&self) -> &str {
        "naive"
    }

    fn sample_uniform(&self, len: usize, lower: f32, upper: f32) -> Result<Vec<f32>> {
        if !(lower < upper) {
            return Err(Error::InvalidArgument(
                "uniform sampling requires lower < upper",
            ));
        }
        let dist = Uniform::new(lower, upper);
        let mut rng = self.rng.borrow_mut();
        Ok((0..len).map(|_| dist.sample(&mut *rng)).collect())
    }

    fn sample_normal(&self, len: usize, mean: f32, sd: f32) -> Result<Vec<f32>> {
        let dist = Normal::new(mean, sd)
            .map_err(|_| Error::InvalidArgument("normal sampling requires a finite positive sd"))?;
        let mut rng = self.rng.borrow_mut();
        Ok((0..len).map(|_| dist.sample(&mut *rng)).collect())
    }

    fn sample_log_normal(&self, len: usize, mean: f32, sd: f32) -> Result<Vec<f32>> {
        let dist = LogNormal::new(mean, sd).map_err(|_| {
            Error::InvalidArgument("log-normal sampling requires a finite positive sd")
        })?;
        let mut rng = self.rng.borrow_mut();
        Ok((0..len).map(|_| dist.sample(&mut *rng)).collect())
    }

    fn sample_bernoulli(&self, len: usize, p: f32) -> Result<Vec<f32>> {
        let dist = Bernoulli::new(p as f64)
            .map_err(|_| Error::InvalidArgument("bernoulli probability must lie in [0, 1]"))?;
        let mut rng = self.rng.borrow_mut();
        Ok((0..len)
            .map(|_| if rng.sample(dist) { 1.0 } else { 0.0 })
            .collect())
    }
}

thread_local! {
    static DEFAULT_DEVICE: RefCell<Option<DeviceRef>> = const { RefCell::new(None) };
}

/// Installs the default device used by constructors that do not take one.
pub fn set_default(device: DeviceRef) {
    debug!(name = device.name(), "setting default device");
    DEFAULT_DEVICE.with(|slot| *slot.borrow_mut() = Some(device));
}

/// Returns the current default device, failing when none is installed.
pub fn get_default() -> Result<DeviceRef> {
    DEFAULT_DEVICE
        .with(|slot| slot.borrow().clone())
        .ok_or(Error::NoDefaultDevice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_round_trips() {
        assert_eq!(get_default().unwrap_err(), Error::NoDefaultDevice);
        let dev = Naive::with_seed(42);
        set_default(dev.clone());
        let fetched = get_default().unwrap();
        assert!(Rc::ptr_eq(&dev, &fetched));
    }

    #[test]
    fn seeded_devices_sample_identically() {
        let a = Naive::with_seed(7);
        let b = Naive::with_seed(7);
        assert_eq!(
            a.sample_uniform(16, -1.0, 1.0).unwrap(),
            b.sample_uniform(16, -1.0, 1.0).unwrap()
        );
    }

    #[test]
    fn identity_places_ones_on_the_diagonal() {
        let dev = Naive::with_seed(0);
        let eye = dev.identity(3).unwrap();
        assert_eq!(eye.shape(), &Shape::new(&[3, 3], 1).unwrap());
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_eq!(eye.data()[i + 3 * j], expected);
            }
        }
    }

    #[test]
    fn random_constructors_honor_shape_and_distribution() {
        let dev = Naive::with_seed(13);
        let shape = Shape::new(&[4], 2).unwrap();
        let ln = dev.random_log_normal(shape.clone(), 0.0, 1.0).unwrap();
        assert_eq!(ln.shape(), &shape);
        assert!(ln.data().iter().all(|&v| v > 0.0));

        let bern = dev.random_bernoulli(Shape::new(&[32], 1).unwrap(), 0.25).unwrap();
        assert_eq!(bern.data().len(), 32);
        assert!(bern.data().iter().all(|&v| v == 0.0 || v == 1.0));

        let norm = dev.random_normal(shape.clone(), 10.0, 0.1).unwrap();
        assert!(norm.data().iter().all(|&v| (5.0..15.0).contains(&v)));

        let uni = dev.random_uniform(shape, -1.0, 1.0).unwrap();
        assert!(uni.data().iter().all(|&v| (-1.0..1.0).contains(&v)));
    }

    #[test]
    fn bernoulli_rejects_bad_probability() {
        let dev = Naive::with_seed(0);
        assert!(dev.sample_bernoulli(4, 1.5).is_err());
        let samples = dev.sample_bernoulli(32, 0.5).unwrap();
        assert!(samples.iter().all(|&v| v == 0.0 || v == 1.0));
    }
}
