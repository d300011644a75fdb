// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Snapshot serialization for parameters and model subtrees.
//!
//! Snapshots are dotted-name maps of stored tensors, written as pretty JSON
//! or bincode. Loading restores values (and optionally statistics) into an
//! already-registered model tree; parameters that are still invalid are
//! initialized on the default device.

use crate::model::Model;
use crate::parameter::{check_parameter_shape, Parameter};
use serde::{Deserialize, Serialize};
use st_graph::device::{self, DeviceExt, DeviceRef};
use st_graph::{Error, Result, Shape, Tensor};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::debug;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredTensor {
    shape: Shape,
    data: Vec<f32>,
}

impl StoredTensor {
    fn from_tensor(tensor: &Tensor) -> StoredTensor {
        StoredTensor {
            shape: tensor.shape().clone(),
            data: tensor.to_vec(),
        }
    }

    fn into_tensor(self, device: &DeviceRef) -> Result<Tensor> {
        device.new_tensor_by_vector(self.shape, self.data)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ParameterSnapshot {
    value: StoredTensor,
    #[serde(default)]
    stats: BTreeMap<String, StoredTensor>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ModelSnapshot {
    parameters: BTreeMap<String, ParameterSnapshot>,
}

fn snapshot_parameter(param: &Parameter, with_stats: bool) -> Result<ParameterSnapshot> {
    let value = StoredTensor::from_tensor(&param.value()?);
    let mut stats = BTreeMap::new();
    if with_stats {
        for name in param.stats_names()? {
            stats.insert(name.clone(), StoredTensor::from_tensor(&param.stats(&name)?));
        }
    }
    Ok(ParameterSnapshot { value, stats })
}

fn restore_parameter(
    param: &Parameter,
    snapshot: ParameterSnapshot,
    with_stats: bool,
) -> Result<()> {
    let device = if param.valid() {
        param.device()?
    } else {
        device::get_default()?
    };
    check_parameter_shape(&snapshot.value.shape)?;
    let value = snapshot.value.into_tensor(&device)?;
    if param.valid() && param.shape()? != *value.shape() {
        return Err(Error::ShapeMismatch {
            left: param.shape()?,
            right: value.shape().clone(),
        });
    }
    let grad = device.new_tensor_by_constant(value.shape().clone(), 0.0)?;
    let mut stats = BTreeMap::new();
    if with_stats {
        for (name, stored) in snapshot.stats {
            stats.insert(name, stored.into_tensor(&device)?);
        }
    }
    param.restore(value, grad, stats);
    Ok(())
}

fn model_snapshot(model: &Model, with_stats: bool) -> Result<ModelSnapshot> {
    let mut parameters = BTreeMap::new();
    for (name, param) in model.get_all_parameters() {
        parameters.insert(name, snapshot_parameter(&param, with_stats)?);
    }
    Ok(ModelSnapshot { parameters })
}

fn restore_model(model: &Model, mut snapshot: ModelSnapshot, with_stats: bool) -> Result<()> {
    for (name, param) in model.get_all_parameters() {
        let stored = snapshot
            .parameters
            .remove(&name)
            .ok_or(Error::UnknownName { name })?;
        restore_parameter(&param, stored, with_stats)?;
    }
    Ok(())
}

/// Writes a model subtree snapshot as pretty JSON.
pub fn save_model_json<P: AsRef<Path>>(model: &Model, path: P, with_stats: bool) -> Result<()> {
    let snapshot = model_snapshot(model, with_stats)?;
    debug!(parameters = snapshot.parameters.len(), "saving model snapshot");
    let file = File::create(path.as_ref()).map_err(Error::io)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &snapshot).map_err(Error::serde)?;
    Ok(())
}

/// Restores a model subtree from a JSON snapshot.
pub fn load_model_json<P: AsRef<Path>>(model: &Model, path: P, with_stats: bool) -> Result<()> {
    let file = File::open(path.as_ref()).map_err(Error::io)?;
    let reader = BufReader::new(file);
    let snapshot: ModelSnapshot = serde_json::from_reader(reader).map_err(Error::serde)?;
    restore_model(model, snapshot, with_stats)
}

/// Writes a model subtree snapshot as bincode.
pub fn save_model_bincode<P: AsRef<Path>>(model: &Model, path: P, with_stats: bool) -> Result<()> {
    let snapshot = model_snapshot(model, with_stats)?;
    let file = File::create(path.as_ref()).map_err(Error::io)?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, &snapshot).map_err(Error::serde)?;
    Ok(())
}

/// Restores a model subtree from a bincode snapshot.
pub fn load_model_bincode<P: AsRef<Path>>(model: &Model, path: P, with_stats: bool) -> Result<()> {
    let file = File::open(path.as_ref()).map_err(Error::io)?;
    let reader = BufReader::new(file);
    let snapshot: ModelSnapshot = bincode::deserialize_from(reader).map_err(Error::serde)?;
    restore_model(model, snapshot, with_stats)
}

/// Writes a single parameter snapshot as pretty JSON.
pub fn save_parameter_json<P: AsRef<Path>>(
    param: &Parameter,
    path: P,
    with_stats: bool,
) -> Result<()> {
    let snapshot = snapshot_parameter(param, with_stats)?;
    let file = File::create(path.as_ref()).map_err(Error::io)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &snapshot).map_err(Error::serde)?;
    Ok(())
}

/// Reads a parameter snapshot into a new handle on the default device.
pub fn load_parameter_json<P: AsRef<Path>>(path: P, with_stats: bool) -> Result<Parameter> {
    let file = File::open(path.as_ref()).map_err(Error::io)?;
    let reader = BufReader::new(file);
    let snapshot: ParameterSnapshot = serde_json::from_reader(reader).map_err(Error::serde)?;
    let param = Parameter::new();
    restore_parameter(&param, snapshot, with_stats)?;
    Ok(param)
}

/// Writes a single parameter snapshot as bincode.
pub fn save_parameter_bincode<P: AsRef<Path>>(
    param: &Parameter,
    path: P,
    with_stats: bool,
) -> Result<()> {
    let snapshot = snapshot_parameter(param, with_stats)?;
    let file = File::create(path.as_ref()).map_err(Error::io)?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, &snapshot).map_err(Error::serde)?;
    Ok(())
}

/// Reads a parameter snapshot into a new handle on the default device.
pub fn load_parameter_bincode<P: AsRef<Path>>(path: P, with_stats: bool) -> Result<Parameter> {
    let file = File::open(path.as_ref()).map_err(Error::io)?;
    let reader = BufReader::new(file);
    let snapshot: ParameterSnapshot = bincode::deserialize_from(reader).map_err(Error::serde)?;
    let param = Parameter::new();
    restore_parameter(&param, snapshot, with_stats)?;
    Ok(param)
}
