// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Free-function operator layer over graph nodes.
//!
//! Leaf constructors resolve the default graph and device; composite ops are
//! expressed through the node combinators so their gradients come for free.

use crate::device::{self, DeviceExt, DeviceRef};
use crate::error::Result;
use crate::graph::{self, Graph, Node};
use crate::shape::Shape;

/// Registers an input leaf on the default graph and device.
pub fn input(shape: Shape, data: Vec<f32>) -> Result<Node> {
    input_on(&graph::get_default()?, device::get_default()?, shape, data)
}

/// Registers an input leaf on an explicit graph and device.
pub fn input_on(graph: &Graph, device: DeviceRef, shape: Shape, data: Vec<f32>) -> Result<Node> {
    Ok(graph.add_input(device.new_tensor_by_vector(shape, data)?))
}

/// Registers a constant-filled leaf on the default graph and device.
pub fn constant(shape: Shape, k: f32) -> Result<Node> {
    constant_on(&graph::get_default()?, device::get_default()?, shape, k)
}

/// Registers a constant-filled leaf on an explicit graph and device.
pub fn constant_on(graph: &Graph, device: DeviceRef, shape: Shape, k: f32) -> Result<Node> {
    Ok(graph.add_input(device.new_tensor_by_constant(shape, k)?))
}

pub fn neg(x: &Node) -> Result<Node> {
    x.neg()
}

pub fn add(a: &Node, b: &Node) -> Result<Node> {
    a.add(b)
}

pub fn sub(a: &Node, b: &Node) -> Result<Node> {
    a.sub(b)
}

pub fn mul(a: &Node, b: &Node) -> Result<Node> {
    a.mul(b)
}

pub fn div(a: &Node, b: &Node) -> Result<Node> {
    a.div(b)
}

pub fn matmul(a: &Node, b: &Node) -> Result<Node> {
    a.matmul(b)
}

pub fn transpose(x: &Node) -> Result<Node> {
    x.transpose()
}

pub fn reshape(x: &Node, shape: &Shape) -> Result<Node> {
    x.reshape(shape)
}

pub fn flatten(x: &Node) -> Result<Node> {
    x.flatten()
}

pub fn sqrt(x: &Node) -> Result<Node> {
    x.sqrt()
}

pub fn exp(x: &Node) -> Result<Node> {
    x.exp()
}

pub fn log(x: &Node) -> Result<Node> {
    x.log()
}

pub fn tanh(x: &Node) -> Result<Node> {
    x.tanh()
}

pub fn sigmoid(x: &Node) -> Result<Node> {
    x.sigmoid()
}

pub fn softplus(x: &Node) -> Result<Node> {
    x.softplus()
}

pub fn sin(x: &Node) -> Result<Node> {
    x.sin()
}

pub fn cos(x: &Node) -> Result<Node> {
    x.cos()
}

pub fn relu(x: &Node) -> Result<Node> {
    x.prelu(0.0)
}

pub fn lrelu(x: &Node) -> Result<Node> {
    x.prelu(0.01)
}

pub fn prelu(x: &Node, a: f32) -> Result<Node> {
    x.prelu(a)
}

pub fn elu(x: &Node, a: f32) -> Result<Node> {
    x.elu(a)
}

pub fn sum(x: &Node, dim: usize) -> Result<Node> {
    x.sum(dim)
}

pub fn broadcast(x: &Node, dim: usize, size: u32) -> Result<Node> {
    x.broadcast(dim, size)
}

pub fn logsumexp(x: &Node, dim: usize) -> Result<Node> {
    x.logsumexp(dim)
}

pub fn batch_sum(x: &Node) -> Result<Node> {
    x.batch_sum()
}

/// `x - broadcast(logsumexp(x, dim))`, the stable log of the softmax.
pub fn log_softmax(x: &Node, dim: usize) -> Result<Node> {
    let lse = x.logsumexp(dim)?;
    x.sub(&lse.broadcast(dim, x.shape().at(dim))?)
}

pub fn softmax(x: &Node, dim: usize) -> Result<Node> {
    log_softmax(x, dim)?.exp()
}

/// Cross entropy against dense target distributions along `dim`.
pub fn softmax_cross_entropy(x: &Node, t: &Node, dim: usize) -> Result<Node> {
    t.mul(&log_softmax(x, dim)?)?.sum(dim)?.neg()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Naive;
    use crate::graph::Graph;

    fn setup() -> Graph {
        device::set_default(Naive::with_seed(0));
        let g = Graph::new();
        graph::set_default(&g);
        g
    }

    #[test]
    fn leaf_constructors_use_defaults() {
        let _g = setup();
        let x = input(Shape::new(&[2], 1).unwrap(), vec![1.0, 2.0]).unwrap();
        assert_eq!(x.to_vec().unwrap(), vec![1.0, 2.0]);
        let c = constant(Shape::new(&[3], 1).unwrap(), 0.5).unwrap();
        assert_eq!(c.to_vec().unwrap(), vec![0.5, 0.5, 0.5]);
    }

    #[test]
    fn softmax_normalizes_along_dim() {
        let _g = setup();
        let x = input(Shape::new(&[3], 1).unwrap(), vec![1.0, 2.0, 3.0]).unwrap();
        let y = softmax(&x, 0).unwrap().to_vec().unwrap();
        let total: f32 = y.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(y[2] > y[1] && y[1] > y[0]);
    }

    #[test]
    fn cross_entropy_matches_closed_form() {
        let _g = setup();
        let x = input(Shape::new(&[2], 1).unwrap(), vec![0.0, 0.0]).unwrap();
        let t = input(Shape::new(&[2], 1).unwrap(), vec![1.0, 0.0]).unwrap();
        let loss = softmax_cross_entropy(&x, &t, 0).unwrap();
        let value = loss.to_vec().unwrap()[0];
        assert!((value - 2f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn relu_clamps_negatives() {
        let _g = setup();
        let x = input(Shape::new(&[3], 1).unwrap(), vec![-1.0, 0.0, 2.0]).unwrap();
        assert_eq!(relu(&x).unwrap().to_vec().unwrap(), vec![0.0, 0.0, 2.0]);
    }
}
