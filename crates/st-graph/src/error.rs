// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::shape::Shape;
use thiserror::Error;

/// Result alias used throughout the graph core and the model layer.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors emitted by shapes, devices, tensors, graphs, and model containers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("invalid shape: dimension {index} is zero")]
    ZeroDimension { index: usize },
    #[error("invalid shape: batch size must be positive")]
    ZeroBatch,
    #[error("data length mismatch: expected {expected}, got {got}")]
    DataLength { expected: usize, got: usize },
    #[error("shape mismatch: {left} vs {right}")]
    ShapeMismatch { left: Shape, right: Shape },
    #[error("batch mismatch: {left} vs {right}")]
    BatchMismatch { left: u32, right: u32 },
    #[error("device mismatch: {left} vs {right}")]
    DeviceMismatch { left: String, right: String },
    #[error("no default device is set")]
    NoDefaultDevice,
    #[error("no default graph is set")]
    NoDefaultGraph,
    #[error("node does not belong to this graph")]
    ForeignNode,
    #[error("node belongs to a cleared graph generation")]
    StaleNode,
    #[error("name `{name}` is already registered")]
    DuplicateName { name: String },
    #[error("unknown name `{name}`")]
    UnknownName { name: String },
    #[error("parameter is already owned by a model")]
    ParameterAlreadyOwned,
    #[error("model is already owned by another model")]
    ModelAlreadyOwned,
    #[error("submodel registration would create a cycle")]
    CyclicModel,
    #[error("parameter is not initialized")]
    InvalidParameter,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("i/o failure: {message}")]
    Io { message: String },
    #[error("serialization failure: {message}")]
    Serialization { message: String },
}

impl Error {
    /// Wraps an I/O error into the library error type.
    pub fn io(err: std::io::Error) -> Error {
        Error::Io {
            message: err.to_string(),
        }
    }

    /// Wraps a serde error into the library error type.
    pub fn serde(err: impl ToString) -> Error {
        Error::Serialization {
            message: err.to_string(),
        }
    }
}
