//! Networks.
use crate::{
    autograd::{ParameterViewMutD, TensorD, Variable, Variable0, Variable2, VariableD},
    config::SgdConfig,
    dataset::Split,
    device::Device,
    error::ConfigError,
    layer::{ConvPoolLayer, Layer, NetworkLayer, SoftmaxLayer},
    ops::add,
    trainer::{Sgd, Summary},
};
use anyhow::{ensure, Result};
use ndarray::{ArcArray1, ArcArray2, Array1};

/// A stack of layers applied to a mini-batch.
///
/// [`Network::new()`] validates the stack: each layer's inputs equal the previous layer's
/// outputs, [`ConvPoolLayer`]s expect the network's mini-batch size and all layers share a
/// device.
///
/// [`.set_batch()`](Network::set_batch) binds a mini-batch to the input placeholder `x`
/// (and optionally the labels `y`), then feeds it through the layers. The first layer receives
/// `x` for both its primary and dropout inputs, each following layer receives the outputs of
/// the previous one. The dropout path is only computed while training, see
/// [`.set_training()`](Network::set_training).
#[derive(Clone, Debug)]
pub struct Network {
    layers: Vec<NetworkLayer>,
    mini_batch_size: usize,
    device: Device,
    training: bool,
    x: Option<Variable2>,
    y: Option<ArcArray1<u32>>,
}

impl Network {
    /// Creates a network from `layers` for mini-batches of `mini_batch_size` rows.
    ///
    /// **Errors**
    ///
    /// - [`ConfigError::ZeroMiniBatchSize`]
    /// - [`ConfigError::EmptyNetwork`]
    /// - [`ConfigError::LayerSizeMismatch`] if a layer's inputs differ from the previous
    ///   layer's outputs.
    /// - [`ConfigError::MiniBatchSizeMismatch`] if a [`ConvPoolLayer`] image shape has a
    ///   different batch size.
    /// - [`ConfigError::DeviceMismatch`] if the layers are on different devices.
    pub fn new(layers: Vec<NetworkLayer>, mini_batch_size: usize) -> Result<Self> {
        if mini_batch_size == 0 {
            return Err(ConfigError::ZeroMiniBatchSize.into());
        }
        let device = layers.first().ok_or(ConfigError::EmptyNetwork)?.device();
        for (index, layer) in layers.iter().enumerate() {
            if layer.device() != device {
                return Err(ConfigError::DeviceMismatch {
                    index,
                    expected: device,
                    found: layer.device(),
                }
                .into());
            }
            if let NetworkLayer::ConvPool(layer) = layer {
                check_image_batch(layer, mini_batch_size)?;
            }
            if index > 0 {
                let outputs = layers[index - 1].outputs();
                let inputs = layer.inputs();
                if outputs != inputs {
                    return Err(ConfigError::LayerSizeMismatch {
                        index,
                        outputs,
                        inputs,
                    }
                    .into());
                }
            }
        }
        tracing::debug!(
            "network {:?} mini_batch_size = {mini_batch_size}",
            layers.iter().map(NetworkLayer::name).collect::<Vec<_>>()
        );
        Ok(Self {
            layers,
            mini_batch_size,
            device,
            training: false,
            x: None,
            y: None,
        })
    }
    /// The layers.
    pub fn layers(&self) -> &[NetworkLayer] {
        &self.layers
    }
    /// The mini-batch size.
    pub fn mini_batch_size(&self) -> usize {
        self.mini_batch_size
    }
    /// The device of the layers.
    pub fn device(&self) -> Device {
        self.device
    }
    /// The number of input neurons of the first layer.
    pub fn inputs(&self) -> usize {
        self.layers[0].inputs()
    }
    /// The parameter values of all layers, in layer order, weight then bias.
    pub fn parameters(&self) -> Vec<TensorD> {
        self.layers.iter().flat_map(Layer::parameters).collect()
    }
    /// Mutable views of the parameters of all layers, in the order of
    /// [`.parameters()`](Network::parameters).
    pub fn parameters_mut(&mut self) -> Vec<ParameterViewMutD> {
        self.layers
            .iter_mut()
            .flat_map(Layer::parameters_mut)
            .collect()
    }
    /// Enables / disables gradients for all parameters.
    ///
    /// While training, [`.set_batch()`](Network::set_batch) also computes the dropout outputs.
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
        for layer in self.layers.iter_mut() {
            layer.set_training(training);
        }
    }
    /// Binds a mini-batch and computes the outputs of every layer.
    ///
    /// `x` is `[mini_batch_size, inputs]`, `y` has `mini_batch_size` labels. The labels of a
    /// previous batch are cleared when `y` is `None`.
    pub fn set_batch(&mut self, x: ArcArray2<f32>, y: Option<ArcArray1<u32>>) -> Result<()> {
        let shape = [self.mini_batch_size, self.inputs()];
        ensure!(
            x.shape() == shape,
            "Network expected a batch of shape {shape:?}, found {:?}!",
            x.shape()
        );
        if let Some(y) = y.as_ref() {
            ensure!(
                y.len() == self.mini_batch_size,
                "Network expected {} labels, found {}!",
                self.mini_batch_size,
                y.len()
            );
        }
        let x = Variable::from(x);
        let inpt = x.clone().into_dyn();
        let inpt_dropout = self.training.then(|| inpt.clone());
        self.layers[0].set_inpt(inpt, inpt_dropout, self.mini_batch_size)?;
        for index in 1..self.layers.len() {
            let (head, tail) = self.layers.split_at_mut(index);
            let prev = &head[index - 1];
            let inpt_dropout = if self.training {
                Some(prev.output_dropout()?)
            } else {
                None
            };
            tail[0].set_inpt(prev.output()?, inpt_dropout, self.mini_batch_size)?;
        }
        self.x.replace(x);
        self.y = y;
        Ok(())
    }
    /// The bound input batch.
    pub fn x(&self) -> Result<&Variable2> {
        self.x
            .as_ref()
            .ok_or_else(|| ConfigError::Unbound("x").into())
    }
    /// The bound labels.
    pub fn y(&self) -> Result<&ArcArray1<u32>> {
        self.y
            .as_ref()
            .ok_or_else(|| ConfigError::Unbound("y").into())
    }
    /// The primary output of the last layer.
    pub fn output(&self) -> Result<VariableD> {
        self.last().output()
    }
    /// The dropout output of the last layer.
    pub fn output_dropout(&self) -> Result<VariableD> {
        self.last().output_dropout()
    }
    fn last(&self) -> &NetworkLayer {
        &self.layers[self.layers.len() - 1]
    }
    /// The last layer as a [`SoftmaxLayer`].
    ///
    /// **Errors**
    ///
    /// [`ConfigError::NoSoftmaxOutput`] if the last layer is another kind.
    pub fn softmax(&self) -> Result<&SoftmaxLayer> {
        let last = self.last();
        last.as_softmax()
            .ok_or_else(|| ConfigError::NoSoftmaxOutput(last.name()).into())
    }
    /// The sum of the squared weights of every layer.
    pub fn weight_squared_sum(&self) -> Result<Variable0> {
        let mut terms = self.layers.iter().map(Layer::weight_squared_sum);
        let first = terms.next().ok_or(ConfigError::EmptyNetwork)?;
        terms.try_fold(first, add)
    }
    /// The negative log likelihood of the bound labels under the dropout output.
    ///
    /// Requires a batch bound while training, see [`SoftmaxLayer::cost()`].
    pub fn cost(&self) -> Result<Variable0> {
        self.softmax()?.cost(self)
    }
    /// The predicted class of each row of the bound batch.
    pub fn y_out(&self) -> Result<&Array1<usize>> {
        self.last().y_out()
    }
    /// The fraction of the bound batch predicted correctly.
    pub fn accuracy(&self) -> Result<f32> {
        self.last().accuracy(self.y()?)
    }
    /// Trains with [`Sgd`] and returns the [`Summary`].
    ///
    /// See [`Sgd::run()`].
    #[allow(clippy::too_many_arguments)]
    pub fn sgd(
        &mut self,
        training_data: &Split,
        epochs: usize,
        mini_batch_size: usize,
        eta: f32,
        validation_data: &Split,
        test_data: Option<&Split>,
        lmbda: f32,
    ) -> Result<Summary> {
        let config = SgdConfig {
            epochs,
            mini_batch_size,
            eta,
            lmbda,
        };
        Sgd::new(config)?.run(self, training_data, validation_data, test_data)
    }
}

fn check_image_batch(layer: &ConvPoolLayer, mini_batch_size: usize) -> Result<()> {
    let expected = layer.image_shape()[0];
    if expected != mini_batch_size {
        return Err(ConfigError::MiniBatchSizeMismatch {
            expected: mini_batch_size,
            found: expected,
        }
        .into());
    }
    Ok(())
}
