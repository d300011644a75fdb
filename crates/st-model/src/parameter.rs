// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Learnable tensor handles.
//!
//! A parameter starts out invalid and becomes usable once a value is
//! assigned. Handles are cheap clones of shared state so that a model can
//! own a parameter while graphs stream gradients into the same buffer.

use st_graph::device::{self, DeviceExt, DeviceRef};
use st_graph::graph::{self, Graph, Node, Trainable};
use st_graph::initializer::Initializer;
use st_graph::{Error, Result, Shape, Tensor};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

pub(crate) struct ParameterBody {
    pub(crate) value: Tensor,
    pub(crate) grad: Tensor,
    pub(crate) stats: BTreeMap<String, Tensor>,
}

pub(crate) struct ParameterImpl {
    pub(crate) body: Option<ParameterBody>,
    pub(crate) owned: bool,
}

impl ParameterImpl {
    fn body(&self) -> Result<&ParameterBody> {
        self.body.as_ref().ok_or(Error::InvalidParameter)
    }

    fn body_mut(&mut self) -> Result<&mut ParameterBody> {
        self.body.as_mut().ok_or(Error::InvalidParameter)
    }
}

impl Trainable for ParameterImpl {
    fn value_tensor(&self) -> Result<Tensor> {
        Ok(self.body()?.value.clone())
    }

    fn accumulate_gradient(&mut self, grad: &Tensor) -> Result<()> {
        let body = self.body_mut()?;
        if body.value.shape() != grad.shape() {
            return Err(Error::ShapeMismatch {
                left: body.value.shape().clone(),
                right: grad.shape().clone(),
            });
        }
        body.grad = body.grad.add(grad)?;
        Ok(())
    }
}

/// Shared handle to a learnable tensor.
#[derive(Clone)]
pub struct Parameter {
    pub(crate) inner: Rc<RefCell<ParameterImpl>>,
}

impl Default for Parameter {
    fn default() -> Self {
        Parameter::new()
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        match &inner.body {
            Some(body) => write!(
                f,
                "Parameter(shape={}, owned={}, stats={})",
                body.value.shape(),
                inner.owned,
                body.stats.len()
            ),
            None => write!(f, "Parameter(invalid)"),
        }
    }
}

pub(crate) fn check_parameter_shape(shape: &Shape) -> Result<()> {
    if shape.batch() != 1 {
        return Err(Error::InvalidArgument(
            "parameter shapes must have a batch of one",
        ));
    }
    Ok(())
}

impl Parameter {
    /// Creates an invalid parameter; every accessor fails until a value is
    /// assigned through one of the initialization paths.
    pub fn new() -> Parameter {
        Parameter {
            inner: Rc::new(RefCell::new(ParameterImpl {
                body: None,
                owned: false,
            })),
        }
    }

    /// Creates a parameter from explicit values on the default device.
    pub fn from_values(shape: Shape, values: Vec<f32>) -> Result<Parameter> {
        Parameter::from_values_on(device::get_default()?, shape, values)
    }

    /// Creates a parameter from explicit values on the given device.
    pub fn from_values_on(device: DeviceRef, shape: Shape, values: Vec<f32>) -> Result<Parameter> {
        let param = Parameter::new();
        param.initialize_by_values(device, shape, values)?;
        Ok(param)
    }

    /// Creates a parameter through an initializer on the default device.
    pub fn from_initializer(shape: Shape, init: &dyn Initializer) -> Result<Parameter> {
        Parameter::from_initializer_on(device::get_default()?, shape, init)
    }

    /// Creates a parameter through an initializer on the given device.
    pub fn from_initializer_on(
        device: DeviceRef,
        shape: Shape,
        init: &dyn Initializer,
    ) -> Result<Parameter> {
        check_parameter_shape(&shape)?;
        let mut value = device.new_tensor_by_constant(shape.clone(), 0.0)?;
        init.apply(&mut value)?;
        let grad = device.new_tensor_by_constant(shape, 0.0)?;
        let param = Parameter::new();
        param.restore(value, grad, BTreeMap::new());
        Ok(param)
    }

    /// Assigns explicit values, initializing an invalid parameter or
    /// replacing the value of a valid one with the same shape.
    pub fn initialize_by_values(
        &self,
        device: DeviceRef,
        shape: Shape,
        values: Vec<f32>,
    ) -> Result<()> {
        check_parameter_shape(&shape)?;
        let value = device.new_tensor_by_vector(shape.clone(), values)?;
        let grad = device.new_tensor_by_constant(shape, 0.0)?;
        self.restore(value, grad, BTreeMap::new());
        Ok(())
    }

    /// Returns whether the parameter has been initialized.
    pub fn valid(&self) -> bool {
        self.inner.borrow().body.is_some()
    }

    /// Returns the parameter shape.
    pub fn shape(&self) -> Result<Shape> {
        Ok(self.inner.borrow().body()?.value.shape().clone())
    }

    /// Returns the device holding the parameter.
    pub fn device(&self) -> Result<DeviceRef> {
        Ok(self.inner.borrow().body()?.value.device().clone())
    }

    /// Returns a copy of the current value.
    pub fn value(&self) -> Result<Tensor> {
        self.inner.borrow().value_tensor()
    }

    /// Returns a copy of the accumulated gradient.
    pub fn gradient(&self) -> Result<Tensor> {
        Ok(self.inner.borrow().body()?.grad.clone())
    }

    /// Replaces the value; the shape must not change.
    pub fn set_value(&self, value: &Tensor) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let body = inner.body_mut()?;
        if body.value.shape() != value.shape() {
            return Err(Error::ShapeMismatch {
                left: body.value.shape().clone(),
                right: value.shape().clone(),
            });
        }
        body.value = value.clone();
        Ok(())
    }

    /// Overwrites all values in place.
    pub fn reset_value_by_vector(&self, values: Vec<f32>) -> Result<()> {
        let (device, shape) = {
            let inner = self.inner.borrow();
            let body = inner.body()?;
            (body.value.device().clone(), body.value.shape().clone())
        };
        let value = device.new_tensor_by_vector(shape, values)?;
        self.set_value(&value)
    }

    /// Re-runs an initializer over the current value.
    pub fn reset_value(&self, init: &dyn Initializer) -> Result<()> {
        let mut value = self.value()?;
        init.apply(&mut value)?;
        self.set_value(&value)
    }

    /// Zeroes the gradient buffer.
    pub fn reset_gradient(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let body = inner.body_mut()?;
        let device = body.value.device().clone();
        body.grad = device.new_tensor_by_constant(body.value.shape().clone(), 0.0)?;
        Ok(())
    }

    /// Adds a gradient contribution; shapes must match.
    pub fn accumulate_gradient(&self, grad: &Tensor) -> Result<()> {
        self.inner.borrow_mut().accumulate_gradient(grad)
    }

    /// Registers a zero-filled statistics tensor under `name`.
    pub fn add_stats(&self, name: &str, shape: Shape) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let body = inner.body_mut()?;
        if body.stats.contains_key(name) {
            return Err(Error::DuplicateName {
                name: name.to_string(),
            });
        }
        let device = body.value.device().clone();
        let zeros = device.new_tensor_by_constant(shape, 0.0)?;
        body.stats.insert(name.to_string(), zeros);
        Ok(())
    }

    /// Returns whether a statistics tensor exists under `name`.
    pub fn has_stats(&self, name: &str) -> Result<bool> {
        Ok(self.inner.borrow().body()?.stats.contains_key(name))
    }

    /// Returns a copy of the statistics tensor under `name`.
    pub fn stats(&self, name: &str) -> Result<Tensor> {
        self.inner
            .borrow()
            .body()?
            .stats
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownName {
                name: name.to_string(),
            })
    }

    /// Replaces an existing statistics tensor; the shape must not change.
    pub fn set_stats(&self, name: &str, value: Tensor) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let body = inner.body_mut()?;
        let slot = body.stats.get_mut(name).ok_or_else(|| Error::UnknownName {
            name: name.to_string(),
        })?;
        if slot.shape() != value.shape() {
            return Err(Error::ShapeMismatch {
                left: slot.shape().clone(),
                right: value.shape().clone(),
            });
        }
        *slot = value;
        Ok(())
    }

    /// Registers this parameter as a trainable leaf on the default graph.
    pub fn node(&self) -> Result<Node> {
        self.node_in(&graph::get_default()?)
    }

    /// Registers this parameter as a trainable leaf on `graph`.
    pub fn node_in(&self, graph: &Graph) -> Result<Node> {
        graph.add_trainable(self.inner.clone())
    }

    /// Lists the registered statistics names.
    pub fn stats_names(&self) -> Result<Vec<String>> {
        Ok(self.inner.borrow().body()?.stats.keys().cloned().collect())
    }

    pub(crate) fn restore(&self, value: Tensor, grad: Tensor, stats: BTreeMap<String, Tensor>) {
        self.inner.borrow_mut().body = Some(ParameterBody { value, grad, stats });
    }

    pub(crate) fn mark_owned(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.owned {
            return Err(Error::ParameterAlreadyOwned);
        }
        inner.owned = true;
        Ok(())
    }

    pub(crate) fn same_handle(&self, other: &Parameter) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_graph::initializer::Constant;
    use st_graph::Naive;

    fn dev() -> DeviceRef {
        Naive::with_seed(3)
    }

    #[test]
    fn fresh_parameters_are_invalid() {
        let p = Parameter::new();
        assert!(!p.valid());
        assert_eq!(p.shape().unwrap_err(), Error::InvalidParameter);
        assert_eq!(p.value().unwrap_err(), Error::InvalidParameter);
        assert_eq!(p.gradient().unwrap_err(), Error::InvalidParameter);
        assert_eq!(p.has_stats("x").unwrap_err(), Error::InvalidParameter);
    }

    #[test]
    fn values_initialize_and_zero_the_gradient() {
        let p =
            Parameter::from_values_on(dev(), Shape::new(&[2], 1).unwrap(), vec![1.0, 2.0]).unwrap();
        assert!(p.valid());
        assert_eq!(p.value().unwrap().data(), &[1.0, 2.0]);
        assert_eq!(p.gradient().unwrap().data(), &[0.0, 0.0]);
    }

    #[test]
    fn batched_parameter_shapes_are_rejected() {
        let shape = Shape::new(&[2], 3).unwrap();
        assert!(Parameter::from_values_on(dev(), shape, vec![0.0; 6]).is_err());
    }

    #[test]
    fn initializer_path_fills_values() {
        let p =
            Parameter::from_initializer_on(dev(), Shape::new(&[4], 1).unwrap(), &Constant::new(2.0))
                .unwrap();
        assert_eq!(p.value().unwrap().data(), &[2.0; 4]);
    }

    #[test]
    fn gradients_accumulate_and_reset() {
        let p = Parameter::from_values_on(dev(), Shape::new(&[2], 1).unwrap(), vec![0.0, 0.0])
            .unwrap();
        let g = p.device().unwrap();
        let one = g
            .new_tensor_by_vector(Shape::new(&[2], 1).unwrap(), vec![1.0, 2.0])
            .unwrap();
        p.accumulate_gradient(&one).unwrap();
        p.accumulate_gradient(&one).unwrap();
        assert_eq!(p.gradient().unwrap().data(), &[2.0, 4.0]);
        p.reset_gradient().unwrap();
        assert_eq!(p.gradient().unwrap().data(), &[0.0, 0.0]);
    }

    #[test]
    fn stats_namespace_rejects_duplicates() {
        let p = Parameter::from_values_on(dev(), Shape::new(&[2], 1).unwrap(), vec![0.0, 0.0])
            .unwrap();
        p.add_stats("m", Shape::new(&[2], 1).unwrap()).unwrap();
        assert!(p.has_stats("m").unwrap());
        assert!(!p.has_stats("v").unwrap());
        assert_eq!(
            p.add_stats("m", Shape::new(&[2], 1).unwrap()).unwrap_err(),
            Error::DuplicateName {
                name: "m".to_string()
            }
        );
        assert_eq!(p.stats("m").unwrap().data(), &[0.0, 0.0]);
    }

    #[test]
    fn clones_share_state() {
        let p = Parameter::from_values_on(dev(), Shape::new(&[1], 1).unwrap(), vec![1.0]).unwrap();
        let q = p.clone();
        q.reset_value_by_vector(vec![5.0]).unwrap();
        assert_eq!(p.value().unwrap().data(), &[5.0]);
        assert!(p.same_handle(&q));
    }
}
