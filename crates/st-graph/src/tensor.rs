// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Dense tensor values and the naive CPU kernels behind the graph operators.
//!
//! Storage is sample-major with the lowest dimension fastest, matching the
//! `[dims]x{batch}` shape convention. Every binary kernel supports two
//! broadcasts: a batch of one against a larger batch, and a per-sample
//! scalar against any shape.

use crate::device::DeviceRef;
use crate::error::{Error, Result};
use crate::shape::Shape;
use std::fmt;
use std::rc::Rc;

/// Dense f32 tensor bound to the device that created it.
#[derive(Clone)]
pub struct Tensor {
    shape: Shape,
    data: Vec<f32>,
    device: DeviceRef,
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor(shape={}, device={})", self.shape, self.device.name())
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Tensor) -> bool {
        self.shape == other.shape && self.data == other.data
    }
}

/// Infers the result shape of an elementwise binary kernel.
pub(crate) fn elementwise_shape(a: &Shape, b: &Shape) -> Result<Shape> {
    let batch = merge_batch(a, b)?;
    let dims = if a.is_scalar() {
        b.dims()
    } else if b.is_scalar() {
        a.dims()
    } else if a.has_same_dims(b) {
        a.dims()
    } else {
        return Err(Error::ShapeMismatch {
            left: a.clone(),
            right: b.clone(),
        });
    };
    Shape::new(dims, batch)
}

/// Infers the result shape of a matrix product.
pub(crate) fn matmul_shape(a: &Shape, b: &Shape) -> Result<Shape> {
    if a.rank() > 2 || b.rank() > 2 {
        return Err(Error::InvalidArgument("matmul supports rank <= 2 tensors"));
    }
    if a.at(1) != b.at(0) {
        return Err(Error::ShapeMismatch {
            left: a.clone(),
            right: b.clone(),
        });
    }
    let batch = merge_batch(a, b)?;
    Shape::new(&[a.at(0), b.at(1)], batch)
}

/// Infers the result shape of a matrix transpose.
pub(crate) fn transpose_shape(a: &Shape) -> Result<Shape> {
    if a.rank() > 2 {
        return Err(Error::InvalidArgument("transpose supports rank <= 2 tensors"));
    }
    Shape::new(&[a.at(1), a.at(0)], a.batch())
}

fn merge_batch(a: &Shape, b: &Shape) -> Result<u32> {
    match (a.batch(), b.batch()) {
        (x, y) if x == y => Ok(x),
        (1, y) => Ok(y),
        (x, 1) => Ok(x),
        (x, y) => Err(Error::BatchMismatch { left: x, right: y }),
    }
}

impl Tensor {
    pub(crate) fn from_parts(shape: Shape, data: Vec<f32>, device: DeviceRef) -> Result<Tensor> {
        if data.len() != shape.size() {
            return Err(Error::DataLength {
                expected: shape.size(),
                got: data.len(),
            });
        }
        Ok(Tensor {
            shape,
            data,
            device,
        })
    }

    fn with_data(&self, shape: Shape, data: Vec<f32>) -> Tensor {
        debug_assert_eq!(data.len(), shape.size());
        Tensor {
            shape,
            data,
            device: self.device.clone(),
        }
    }

    /// Returns the tensor shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the device that allocated this tensor.
    pub fn device(&self) -> &DeviceRef {
        &self.device
    }

    /// Immutable view of the raw values.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable view of the raw values.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Copies the values out.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.clone()
    }

    fn check_same_device(&self, other: &Tensor) -> Result<()> {
        if Rc::ptr_eq(&self.device, &other.device) {
            Ok(())
        } else {
            Err(Error::DeviceMismatch {
                left: self.device.name().to_string(),
                right: other.device.name().to_string(),
            })
        }
    }

    fn map(&self, f: impl Fn(f32) -> f32) -> Tensor {
        let data = self.data.iter().map(|&x| f(x)).collect();
        self.with_data(self.shape.clone(), data)
    }

    fn zip_with(&self, other: &Tensor, f: impl Fn(f32, f32) -> f32) -> Result<Tensor> {
        self.check_same_device(other)?;
        let shape = elementwise_shape(&self.shape, &other.shape)?;
        let vol = shape.volume();
        let (av, bv) = (self.shape.volume(), other.shape.volume());
        let mut out = Vec::with_capacity(shape.size());
        for b in 0..shape.batch() as usize {
            let ab = if self.shape.batch() == 1 { 0 } else { b };
            let bb = if other.shape.batch() == 1 { 0 } else { b };
            for i in 0..vol {
                let x = self.data[ab * av + if self.shape.is_scalar() { 0 } else { i }];
                let y = other.data[bb * bv + if other.shape.is_scalar() { 0 } else { i }];
                out.push(f(x, y));
            }
        }
        Ok(self.with_data(shape, out))
    }

    // --- unary kernels ---

    pub fn neg(&self) -> Tensor {
        self.map(|x| -x)
    }

    pub fn sqrt(&self) -> Tensor {
        self.map(f32::sqrt)
    }

    pub fn exp(&self) -> Tensor {
        self.map(f32::exp)
    }

    pub fn log(&self) -> Tensor {
        self.map(f32::ln)
    }

    pub fn tanh(&self) -> Tensor {
        self.map(f32::tanh)
    }

    pub fn sigmoid(&self) -> Tensor {
        self.map(|x| 1.0 / (1.0 + (-x).exp()))
    }

    pub fn softplus(&self) -> Tensor {
        self.map(|x| (1.0 + x.exp()).ln())
    }

    pub fn sin(&self) -> Tensor {
        self.map(f32::sin)
    }

    pub fn cos(&self) -> Tensor {
        self.map(f32::cos)
    }

    pub fn prelu(&self, a: f32) -> Tensor {
        self.map(|x| if x > 0.0 { x } else { a * x })
    }

    pub fn elu(&self, a: f32) -> Tensor {
        self.map(|x| if x > 0.0 { x } else { a * (x.exp() - 1.0) })
    }

    /// Pointwise derivative of [`Tensor::prelu`] with respect to the input.
    pub fn prelu_grad(&self, a: f32) -> Tensor {
        self.map(|x| if x > 0.0 { 1.0 } else { a })
    }

    /// Pointwise derivative of [`Tensor::elu`] with respect to the input.
    pub fn elu_grad(&self, a: f32) -> Tensor {
        self.map(|x| if x > 0.0 { 1.0 } else { a * x.exp() })
    }

    // --- constant binops ---

    pub fn add_const(&self, k: f32) -> Tensor {
        self.map(|x| x + k)
    }

    /// `self - k`.
    pub fn sub_const(&self, k: f32) -> Tensor {
        self.map(|x| x - k)
    }

    /// `k - self`.
    pub fn rsub_const(&self, k: f32) -> Tensor {
        self.map(|x| k - x)
    }

    pub fn mul_const(&self, k: f32) -> Tensor {
        self.map(|x| x * k)
    }

    /// `self / k`.
    pub fn div_const(&self, k: f32) -> Tensor {
        self.map(|x| x / k)
    }

    /// `k / self`.
    pub fn rdiv_const(&self, k: f32) -> Tensor {
        self.map(|x| k / x)
    }

    // --- elementwise binops with batch and scalar broadcasting ---

    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_with(other, |x, y| x + y)
    }

    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_with(other, |x, y| x - y)
    }

    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_with(other, |x, y| x * y)
    }

    pub fn div(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_with(other, |x, y| x / y)
    }

    // --- matrix kernels ---

    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        self.check_same_device(other)?;
        let shape = matmul_shape(&self.shape, &other.shape)?;
        let n = self.shape.at(0) as usize;
        let m = self.shape.at(1) as usize;
        let k = other.shape.at(1) as usize;
        let (av, bv) = (self.shape.volume(), other.shape.volume());
        let mut out = vec![0.0; shape.size()];
        for b in 0..shape.batch() as usize {
            let ab = if self.shape.batch() == 1 { 0 } else { b };
            let bb = if other.shape.batch() == 1 { 0 } else { b };
            let a = &self.data[ab * av..ab * av + av];
            let rhs = &other.data[bb * bv..bb * bv + bv];
            let dst = &mut out[b * n * k..(b + 1) * n * k];
            for l in 0..k {
                for j in 0..m {
                    let y = rhs[j + m * l];
                    if y == 0.0 {
                        continue;
                    }
                    for i in 0..n {
                        dst[i + n * l] += a[i + n * j] * y;
                    }
                }
            }
        }
        Ok(self.with_data(shape, out))
    }

    pub fn transpose(&self) -> Result<Tensor> {
        let shape = transpose_shape(&self.shape)?;
        let n = self.shape.at(0) as usize;
        let m = self.shape.at(1) as usize;
        let vol = self.shape.volume();
        let mut out = vec![0.0; self.data.len()];
        for b in 0..self.shape.batch() as usize {
            let src = &self.data[b * vol..(b + 1) * vol];
            let dst = &mut out[b * vol..(b + 1) * vol];
            for j in 0..m {
                for i in 0..n {
                    dst[j + m * i] = src[i + n * j];
                }
            }
        }
        Ok(self.with_data(shape, out))
    }

    // --- reductions and expansions ---

    fn dim_strides(&self, dim: usize) -> (usize, usize, usize) {
        let n = self.shape.at(dim) as usize;
        let lower: usize = (0..dim).map(|i| self.shape.at(i) as usize).product();
        let upper = self.shape.volume() / (lower * n);
        (lower, n, upper)
    }

    /// Sums along one dimension, collapsing it to size one.
    pub fn sum(&self, dim: usize) -> Result<Tensor> {
        let (lower, n, upper) = self.dim_strides(dim);
        let shape = self.shape.resize_dim(dim, 1)?;
        let vol = self.shape.volume();
        let rvol = shape.volume();
        let mut out = vec![0.0; shape.size()];
        for b in 0..self.shape.batch() as usize {
            for u in 0..upper {
                for l in 0..lower {
                    let mut acc = 0.0;
                    for t in 0..n {
                        acc += self.data[b * vol + (u * n + t) * lower + l];
                    }
                    out[b * rvol + u * lower + l] = acc;
                }
            }
        }
        Ok(self.with_data(shape, out))
    }

    /// Numerically stable log-sum-exp along one dimension.
    pub fn logsumexp(&self, dim: usize) -> Result<Tensor> {
        let (lower, n, upper) = self.dim_strides(dim);
        let shape = self.shape.resize_dim(dim, 1)?;
        let vol = self.shape.volume();
        let rvol = shape.volume();
        let mut out = vec![0.0; shape.size()];
        for b in 0..self.shape.batch() as usize {
            for u in 0..upper {
                for l in 0..lower {
                    let mut max = f32::NEG_INFINITY;
                    for t in 0..n {
                        max = max.max(self.data[b * vol + (u * n + t) * lower + l]);
                    }
                    let mut acc = 0.0;
                    for t in 0..n {
                        acc += (self.data[b * vol + (u * n + t) * lower + l] - max).exp();
                    }
                    out[b * rvol + u * lower + l] = acc.ln() + max;
                }
            }
        }
        Ok(self.with_data(shape, out))
    }

    /// Repeats a size-one dimension `size` times.
    pub fn broadcast(&self, dim: usize, size: u32) -> Result<Tensor> {
        if self.shape.at(dim) != 1 {
            return Err(Error::InvalidArgument(
                "broadcast requires the target dimension to be one",
            ));
        }
        if size == 0 {
            return Err(Error::ZeroDimension { index: dim });
        }
        let (lower, _, upper) = self.dim_strides(dim);
        let shape = self.shape.resize_dim(dim, size)?;
        let vol = self.shape.volume();
        let ovol = shape.volume();
        let size = size as usize;
        let mut out = vec![0.0; shape.size()];
        for b in 0..self.shape.batch() as usize {
            for u in 0..upper {
                for t in 0..size {
                    for l in 0..lower {
                        out[b * ovol + (u * size + t) * lower + l] =
                            self.data[b * vol + u * lower + l];
                    }
                }
            }
        }
        Ok(self.with_data(shape, out))
    }

    /// Sums all samples into a single-sample tensor.
    pub fn batch_sum(&self) -> Result<Tensor> {
        let vol = self.shape.volume();
        let shape = self.shape.resize_batch(1)?;
        let mut out = vec![0.0; vol];
        for b in 0..self.shape.batch() as usize {
            for i in 0..vol {
                out[i] += self.data[b * vol + i];
            }
        }
        Ok(self.with_data(shape, out))
    }

    /// Repeats a single-sample tensor across a batch of `batch`.
    pub fn broadcast_batch(&self, batch: u32) -> Result<Tensor> {
        if self.shape.batch() != 1 {
            return Err(Error::BatchMismatch {
                left: self.shape.batch(),
                right: 1,
            });
        }
        let shape = self.shape.resize_batch(batch)?;
        let mut out = Vec::with_capacity(shape.size());
        for _ in 0..batch {
            out.extend_from_slice(&self.data);
        }
        Ok(self.with_data(shape, out))
    }

    /// Collapses each sample to its total, yielding a `[]xB` tensor.
    pub fn sum_all(&self) -> Tensor {
        let vol = self.shape.volume();
        let batch = self.shape.batch();
        let mut out = Vec::with_capacity(batch as usize);
        for b in 0..batch as usize {
            out.push(self.data[b * vol..(b + 1) * vol].iter().sum());
        }
        self.with_data(Shape::scalar_batched(batch), out)
    }

    /// Reinterprets the per-sample layout; the volume must not change.
    pub fn reshape(&self, new_shape: &Shape) -> Result<Tensor> {
        if new_shape.volume() != self.shape.volume() {
            return Err(Error::ShapeMismatch {
                left: self.shape.clone(),
                right: new_shape.clone(),
            });
        }
        let shape = new_shape.resize_batch(self.shape.batch())?;
        Ok(self.with_data(shape, self.data.clone()))
    }

    /// Reshapes each sample into a column vector.
    pub fn flatten(&self) -> Result<Tensor> {
        self.reshape(&Shape::new(&[self.shape.volume() as u32], 1)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceExt, Naive};

    thread_local! {
        static TEST_DEVICE: DeviceRef = Naive::with_seed(0);
    }

    fn tensor(dims: &[u32], batch: u32, data: &[f32]) -> Tensor {
        let dev = TEST_DEVICE.with(|d| d.clone());
        dev.new_tensor_by_vector(Shape::new(dims, batch).unwrap(), data.to_vec())
            .unwrap()
    }

    #[test]
    fn construction_checks_data_length() {
        let dev = Naive::with_seed(0);
        let shape = Shape::new(&[2, 2], 1).unwrap();
        assert!(dev
            .new_tensor_by_vector(shape.clone(), vec![1.0, 2.0])
            .is_err());
        assert!(dev
            .new_tensor_by_vector(shape, vec![1.0, 2.0, 3.0, 4.0])
            .is_ok());
    }

    #[test]
    fn elementwise_add_with_batch_broadcast() {
        let a = tensor(&[2], 2, &[1.0, 2.0, 3.0, 4.0]);
        let b = tensor(&[2], 1, &[10.0, 20.0]);
        let c = a.add(&b).unwrap();
        assert_eq!(c.shape(), &Shape::new(&[2], 2).unwrap());
        assert_eq!(c.data(), &[11.0, 22.0, 13.0, 24.0]);
    }

    #[test]
    fn scalar_operand_broadcasts_over_any_shape() {
        let a = tensor(&[2, 2], 1, &[1.0, 2.0, 3.0, 4.0]);
        let k = tensor(&[], 1, &[0.5]);
        let c = a.mul(&k).unwrap();
        assert_eq!(c.shape(), a.shape());
        assert_eq!(c.data(), &[0.5, 1.0, 1.5, 2.0]);

        let kb = tensor(&[], 2, &[1.0, 2.0]);
        let ab = tensor(&[2], 2, &[1.0, 2.0, 3.0, 4.0]);
        let cb = ab.mul(&kb).unwrap();
        assert_eq!(cb.data(), &[1.0, 2.0, 6.0, 8.0]);
    }

    #[test]
    fn mismatched_dims_are_rejected() {
        let a = tensor(&[2], 1, &[1.0, 2.0]);
        let b = tensor(&[3], 1, &[1.0, 2.0, 3.0]);
        assert!(matches!(
            a.add(&b),
            Err(Error::ShapeMismatch { .. })
        ));
        let c = tensor(&[2], 2, &[1.0; 4]);
        let d = tensor(&[2], 3, &[1.0; 6]);
        assert!(matches!(c.add(&d), Err(Error::BatchMismatch { .. })));
    }

    #[test]
    fn tensors_from_different_devices_do_not_mix() {
        let d1 = Naive::with_seed(0);
        let d2 = Naive::with_seed(0);
        let a = d1
            .new_tensor_by_constant(Shape::new(&[2], 1).unwrap(), 1.0)
            .unwrap();
        let b = d2
            .new_tensor_by_constant(Shape::new(&[2], 1).unwrap(), 1.0)
            .unwrap();
        assert!(matches!(a.add(&b), Err(Error::DeviceMismatch { .. })));
    }

    #[test]
    fn matmul_matches_manual_product() {
        // a: 2x3 column-major, b: 3x2.
        let a = tensor(&[2, 3], 1, &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        let b = tensor(&[3, 2], 1, &[7.0, 9.0, 11.0, 8.0, 10.0, 12.0]);
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape(), &Shape::new(&[2, 2], 1).unwrap());
        // [[1 2 3],[4 5 6]] * [[7 8],[9 10],[11 12]] = [[58 64],[139 154]]
        assert_eq!(c.data(), &[58.0, 139.0, 64.0, 154.0]);
    }

    #[test]
    fn matmul_rejects_inner_mismatch() {
        let a = tensor(&[2, 3], 1, &[0.0; 6]);
        let b = tensor(&[2, 2], 1, &[0.0; 4]);
        assert!(a.matmul(&b).is_err());
    }

    #[test]
    fn transpose_swaps_axes() {
        let a = tensor(&[2, 3], 1, &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        let t = a.transpose().unwrap();
        assert_eq!(t.shape(), &Shape::new(&[3, 2], 1).unwrap());
        assert_eq!(t.data(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn sum_collapses_one_dimension() {
        let a = tensor(&[2, 3], 1, &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        let s0 = a.sum(0).unwrap();
        assert_eq!(s0.shape(), &Shape::new(&[1, 3], 1).unwrap());
        assert_eq!(s0.data(), &[5.0, 7.0, 9.0]);
        let s1 = a.sum(1).unwrap();
        assert_eq!(s1.shape(), &Shape::new(&[2], 1).unwrap());
        assert_eq!(s1.data(), &[6.0, 15.0]);
        // Reducing past the rank is the identity.
        assert_eq!(a.sum(5).unwrap().data(), a.data());
    }

    #[test]
    fn logsumexp_is_stable_and_correct() {
        let a = tensor(&[3], 1, &[1.0, 2.0, 3.0]);
        let l = a.logsumexp(0).unwrap();
        let expected = (1f32.exp() + 2f32.exp() + 3f32.exp()).ln();
        assert!((l.data()[0] - expected).abs() < 1e-5);

        let big = tensor(&[2], 1, &[1000.0, 1000.0]);
        let lb = big.logsumexp(0).unwrap();
        assert!((lb.data()[0] - (1000.0 + 2f32.ln())).abs() < 1e-3);
    }

    #[test]
    fn broadcast_expands_a_unit_dimension() {
        let a = tensor(&[1, 2], 1, &[1.0, 2.0]);
        let b = a.broadcast(0, 3).unwrap();
        assert_eq!(b.shape(), &Shape::new(&[3, 2], 1).unwrap());
        assert_eq!(b.data(), &[1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
        assert!(tensor(&[2], 1, &[1.0, 2.0]).broadcast(0, 3).is_err());
    }

    #[test]
    fn batch_sum_and_broadcast_batch_are_inverse_shapes() {
        let a = tensor(&[2], 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let s = a.batch_sum().unwrap();
        assert_eq!(s.shape(), &Shape::new(&[2], 1).unwrap());
        assert_eq!(s.data(), &[9.0, 12.0]);
        let r = s.broadcast_batch(2).unwrap();
        assert_eq!(r.shape().batch(), 2);
        assert_eq!(r.data(), &[9.0, 12.0, 9.0, 12.0]);
    }

    #[test]
    fn sum_all_collapses_each_sample() {
        let a = tensor(&[2, 2], 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let s = a.sum_all();
        assert_eq!(s.shape(), &Shape::new(&[], 2).unwrap());
        assert_eq!(s.data(), &[10.0, 26.0]);
    }

    #[test]
    fn reshape_preserves_volume() {
        let a = tensor(&[2, 3], 2, &[0.0; 12]);
        let r = a.reshape(&Shape::new(&[6], 1).unwrap()).unwrap();
        assert_eq!(r.shape(), &Shape::new(&[6], 2).unwrap());
        assert!(a.reshape(&Shape::new(&[5], 1).unwrap()).is_err());
        assert_eq!(a.flatten().unwrap().shape(), &Shape::new(&[6], 2).unwrap());
    }
}
