// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Define-by-run computation graph core written in pure Rust.
//!
//! The crate provides batched shapes, dense tensors on a naive CPU device,
//! a lazily evaluated computation graph with reverse-mode autodiff, a
//! free-function operator layer, and parameter initializers. Accelerator
//! backends hang off the [`device::Device`] trait; none ship here.

pub mod device;
pub mod error;
pub mod graph;
pub mod initializer;
pub mod ops;
pub mod shape;
pub mod tensor;

pub use device::{Device, DeviceExt, DeviceRef, Naive};
pub use error::{Error, Result};
pub use graph::{Graph, Node, Trainable};
pub use initializer::{Constant, Identity, Initializer, Normal, Uniform, XavierUniform};
pub use shape::Shape;
pub use tensor::Tensor;
