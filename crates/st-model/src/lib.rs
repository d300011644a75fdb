// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Parameters, model trees, optimizers, and snapshot I/O on top of
//! [`st_graph`].
//!
//! [`Parameter`] is a learnable tensor handle, [`Model`] a named tree of
//! parameters and submodels, and [`Optimizer`] implementations walk that
//! tree applying gradients. The [`io`] module persists model subtrees as
//! JSON or bincode snapshots.

pub mod io;
pub mod model;
pub mod optim;
pub mod parameter;

pub use model::Model;
pub use optim::{Adam, Optimizer, Sgd};
pub use parameter::Parameter;

pub use st_graph::{
    Constant, Device, DeviceExt, DeviceRef, Error, Graph, Identity, Initializer, Naive, Node,
    Normal, Result, Shape, Tensor, Uniform, XavierUniform,
};
