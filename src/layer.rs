//! Layers.
//!
//! A layer owns its parameters and, once [`.set_inpt()`](Layer::set_inpt) is called, the
//! variables computed from its input. Each layer computes two outputs:
//! - the primary output, used for evaluation, where dropout is replaced by scaling by `1 - p`
//! - the dropout output, used for the training cost, where dropout masks the input
//!
//! Both outputs are `[mini_batch_size, outputs]`. The dropout output is only computed when a
//! dropout input is provided, evaluation binds the primary input alone.
use crate::{
    autograd::{ParameterViewMutD, Tensor, TensorD, Variable0, VariableD},
    device::Device,
    error::ConfigError,
};
use anyhow::{bail, Result};
use ndarray::{ArcArray1, Array1, Dimension};
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Layer builders.
pub mod builders;
mod conv_pool;
mod fully_connected;
mod softmax;

pub use conv_pool::ConvPoolLayer;
pub use fully_connected::FullyConnectedLayer;
pub use softmax::SoftmaxLayer;

/// A layer of a [`Network`](crate::network::Network).
pub trait Layer {
    /// The number of input neurons, ie the flattened input size per example.
    fn inputs(&self) -> usize;
    /// The number of output neurons, ie the flattened output size per example.
    fn outputs(&self) -> usize;
    /// The device of the parameters.
    fn device(&self) -> Device;
    /// Computes the outputs from `inpt` and, if provided, `inpt_dropout`.
    ///
    /// Both inputs have `mini_batch_size` rows and are reshaped as the layer requires.
    /// Replaces the previous outputs.
    fn set_inpt(
        &mut self,
        inpt: VariableD,
        inpt_dropout: Option<VariableD>,
        mini_batch_size: usize,
    ) -> Result<()>;
    /// The primary output.
    ///
    /// **Errors**
    ///
    /// [`ConfigError::InputNotSet`] if [`.set_inpt()`](Layer::set_inpt) was not called.
    fn output(&self) -> Result<VariableD>;
    /// The dropout output.
    ///
    /// **Errors**
    ///
    /// - [`ConfigError::InputNotSet`] if [`.set_inpt()`](Layer::set_inpt) was not called.
    /// - [`ConfigError::DropoutNotComputed`] if the input was set without a dropout input.
    fn output_dropout(&self) -> Result<VariableD>;
    /// The sum of the squared weights, biases are excluded.
    fn weight_squared_sum(&self) -> Variable0;
    /// The parameter values, weight then bias.
    fn parameters(&self) -> Vec<TensorD>;
    /// Mutable views of the parameters, weight then bias.
    fn parameters_mut(&mut self) -> Vec<ParameterViewMutD>;
    /// Enables / disables gradients for the parameters.
    ///
    /// See [`Parameter::set_training()`](crate::autograd::Parameter::set_training).
    fn set_training(&mut self, training: bool);
}

/// A layer of any kind.
#[derive(Clone, Debug)]
pub enum NetworkLayer {
    /// See [`FullyConnectedLayer`].
    FullyConnected(FullyConnectedLayer),
    /// See [`ConvPoolLayer`].
    ConvPool(ConvPoolLayer),
    /// See [`SoftmaxLayer`].
    Softmax(SoftmaxLayer),
}

macro_rules! dispatch {
    ($self:expr, $layer:ident => $e:expr) => {
        match $self {
            NetworkLayer::FullyConnected($layer) => $e,
            NetworkLayer::ConvPool($layer) => $e,
            NetworkLayer::Softmax($layer) => $e,
        }
    };
}

impl NetworkLayer {
    /// The name of the layer kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FullyConnected(_) => "FullyConnectedLayer",
            Self::ConvPool(_) => "ConvPoolLayer",
            Self::Softmax(_) => "SoftmaxLayer",
        }
    }
    /// The layer as a [`SoftmaxLayer`].
    pub fn as_softmax(&self) -> Option<&SoftmaxLayer> {
        if let Self::Softmax(layer) = self {
            Some(layer)
        } else {
            None
        }
    }
    /// The predicted class of each row of the primary output.
    ///
    /// **Errors**
    ///
    /// Not defined for [`ConvPoolLayer`].
    pub fn y_out(&self) -> Result<&Array1<usize>> {
        match self {
            Self::FullyConnected(layer) => layer.y_out(),
            Self::Softmax(layer) => layer.y_out(),
            Self::ConvPool(_) => bail!("ConvPoolLayer does not predict classes!"),
        }
    }
    /// The fraction of `y_out` equal to `y`.
    ///
    /// **Errors**
    ///
    /// Not defined for [`ConvPoolLayer`].
    pub fn accuracy(&self, y: &ArcArray1<u32>) -> Result<f32> {
        match self {
            Self::FullyConnected(layer) => layer.accuracy(y),
            Self::Softmax(layer) => layer.accuracy(y),
            Self::ConvPool(_) => bail!("ConvPoolLayer does not predict classes!"),
        }
    }
}

impl Layer for NetworkLayer {
    fn inputs(&self) -> usize {
        dispatch!(self, layer => layer.inputs())
    }
    fn outputs(&self) -> usize {
        dispatch!(self, layer => layer.outputs())
    }
    fn device(&self) -> Device {
        dispatch!(self, layer => layer.device())
    }
    fn set_inpt(
        &mut self,
        inpt: VariableD,
        inpt_dropout: Option<VariableD>,
        mini_batch_size: usize,
    ) -> Result<()> {
        dispatch!(self, layer => layer.set_inpt(inpt, inpt_dropout, mini_batch_size))
    }
    fn output(&self) -> Result<VariableD> {
        dispatch!(self, layer => layer.output())
    }
    fn output_dropout(&self) -> Result<VariableD> {
        dispatch!(self, layer => layer.output_dropout())
    }
    fn weight_squared_sum(&self) -> Variable0 {
        dispatch!(self, layer => layer.weight_squared_sum())
    }
    fn parameters(&self) -> Vec<TensorD> {
        dispatch!(self, layer => layer.parameters())
    }
    fn parameters_mut(&mut self) -> Vec<ParameterViewMutD> {
        dispatch!(self, layer => layer.parameters_mut())
    }
    fn set_training(&mut self, training: bool) {
        dispatch!(self, layer => layer.set_training(training))
    }
}

impl From<FullyConnectedLayer> for NetworkLayer {
    fn from(layer: FullyConnectedLayer) -> Self {
        Self::FullyConnected(layer)
    }
}

impl From<ConvPoolLayer> for NetworkLayer {
    fn from(layer: ConvPoolLayer) -> Self {
        Self::ConvPool(layer)
    }
}

impl From<SoftmaxLayer> for NetworkLayer {
    fn from(layer: SoftmaxLayer) -> Self {
        Self::Softmax(layer)
    }
}

fn input_not_set(name: &'static str) -> anyhow::Error {
    ConfigError::InputNotSet(name).into()
}

fn dropout_not_computed(name: &'static str) -> anyhow::Error {
    ConfigError::DropoutNotComputed(name).into()
}

fn check_dropout(p_dropout: f32) -> Result<f32> {
    if (0. ..=1.).contains(&p_dropout) {
        Ok(p_dropout)
    } else {
        Err(ConfigError::InvalidDropout(p_dropout).into())
    }
}

fn rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Samples N(0, std_dev).
fn normal<D: Dimension>(dim: D, std_dev: f32, rng: &mut StdRng) -> Result<Tensor<D>> {
    let normal = Normal::new(0., std_dev)?;
    Ok(Tensor::from_shape_simple_fn(dim, || normal.sample(&mut *rng)))
}

#[cfg(test)]
mod tests;
