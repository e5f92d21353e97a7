//! Optimizers.
#[cfg(doc)]
use crate::autograd::Parameter;
use crate::autograd::ParameterViewMutD;
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// Optimizer.
pub trait Optimizer {
    /// Performs the optimization, updating the parameter with `learning_rate`.
    ///
    /// Consumes the gradient of the parameter.
    fn update(&self, learning_rate: f32, parameter: ParameterViewMutD) -> Result<()>;
}

/// Stochastic Gradient Descent.
///
/// Updates each [`Parameter`] as `value -= learning_rate * grad`. Parameters without a gradient
/// are left unchanged.
#[derive(Default, Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SGD {}

impl Optimizer for SGD {
    fn update(&self, learning_rate: f32, mut parameter: ParameterViewMutD) -> Result<()> {
        let Some(grad) = parameter.take_grad() else {
            return Ok(());
        };
        ensure!(
            grad.shape() == parameter.shape(),
            "Gradient {:?} does not match parameter {:?}!",
            grad.shape(),
            parameter.shape()
        );
        parameter
            .value_view_mut()
            .scaled_add(-learning_rate, &grad);
        Ok(())
    }
}
