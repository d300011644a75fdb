// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Optimizers over a model subtree.
//!
//! An optimizer walks every parameter of a model, lazily installs whatever
//! statistics tensors it needs, applies the accumulated gradient, and zeroes
//! the gradient buffer afterwards.

use crate::model::Model;
use crate::parameter::Parameter;
use st_graph::Result;

/// Gradient-descent update strategy applied across a model tree.
pub trait Optimizer {
    /// Installs any statistics tensors the strategy needs on `param`.
    fn configure_parameter(&self, param: &Parameter) -> Result<()>;

    /// Applies one update to `param` and clears its gradient.
    fn update_parameter(&mut self, param: &Parameter) -> Result<()>;

    /// Returns the base learning rate.
    fn learning_rate(&self) -> f32;

    /// Multiplies the base learning rate by `factor`.
    fn scale_learning_rate(&mut self, factor: f32);

    /// Updates every parameter in the subtree.
    fn update(&mut self, model: &Model) -> Result<()> {
        for param in model.get_all_parameters().values() {
            self.configure_parameter(param)?;
            self.update_parameter(param)?;
        }
        Ok(())
    }
}

/// Plain stochastic gradient descent.
#[derive(Clone, Copy, Debug)]
pub struct Sgd {
    eta: f32,
}

impl Sgd {
    pub fn new(eta: f32) -> Sgd {
        Sgd { eta }
    }
}

impl Default for Sgd {
    fn default() -> Self {
        Sgd { eta: 0.1 }
    }
}

impl Optimizer for Sgd {
    fn configure_parameter(&self, _param: &Parameter) -> Result<()> {
        Ok(())
    }

    fn update_parameter(&mut self, param: &Parameter) -> Result<()> {
        let value = param.value()?;
        let grad = param.gradient()?;
        param.set_value(&value.sub(&grad.mul_const(self.eta))?)?;
        param.reset_gradient()
    }

    fn learning_rate(&self) -> f32 {
        self.eta
    }

    fn scale_learning_rate(&mut self, factor: f32) {
        self.eta *= factor;
    }
}

const ADAM_M1: &str = "adam-m1";
const ADAM_M2: &str = "adam-m2";

/// Adam with bias-corrected first and second moments.
///
/// Moment tensors live in the parameter's statistics map, so they survive
/// snapshot round-trips alongside the values.
#[derive(Clone, Copy, Debug)]
pub struct Adam {
    alpha: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    step: u64,
}

impl Adam {
    pub fn new(alpha: f32, beta1: f32, beta2: f32, eps: f32) -> Adam {
        Adam {
            alpha,
            beta1,
            beta2,
            eps,
            step: 0,
        }
    }
}

impl Default for Adam {
    fn default() -> Self {
        Adam::new(0.001, 0.9, 0.999, 1e-8)
    }
}

impl Optimizer for Adam {
    fn configure_parameter(&self, param: &Parameter) -> Result<()> {
        if !param.has_stats(ADAM_M1)? {
            let shape = param.shape()?;
            param.add_stats(ADAM_M1, shape.clone())?;
            param.add_stats(ADAM_M2, shape)?;
        }
        Ok(())
    }

    fn update_parameter(&mut self, param: &Parameter) -> Result<()> {
        let grad = param.gradient()?;
        let m1 = param
            .stats(ADAM_M1)?
            .mul_const(self.beta1)
            .add(&grad.mul_const(1.0 - self.beta1))?;
        let m2 = param
            .stats(ADAM_M2)?
            .mul_const(self.beta2)
            .add(&grad.mul(&grad)?.mul_const(1.0 - self.beta2))?;
        let t = self.step.max(1) as i32;
        let m1_hat = m1.div_const(1.0 - self.beta1.powi(t));
        let m2_hat = m2.div_const(1.0 - self.beta2.powi(t));
        let delta = m1_hat
            .div(&m2_hat.sqrt().add_const(self.eps))?
            .mul_const(self.alpha);
        param.set_value(&param.value()?.sub(&delta)?)?;
        param.set_stats(ADAM_M1, m1)?;
        param.set_stats(ADAM_M2, m2)?;
        param.reset_gradient()
    }

    fn learning_rate(&self) -> f32 {
        self.alpha
    }

    fn scale_learning_rate(&mut self, factor: f32) {
        self.alpha *= factor;
    }

    fn update(&mut self, model: &Model) -> Result<()> {
        self.step += 1;
        for param in model.get_all_parameters().values() {
            self.configure_parameter(param)?;
            self.update_parameter(param)?;
        }
        Ok(())
    }
}
