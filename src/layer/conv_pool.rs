use super::{
    builders::{ConvPoolLayerBuilder, LayerBuilder},
    input_not_set, normal, rng, Layer,
};
use crate::{
    autograd::{
        Parameter, Parameter1, Parameter4, ParameterViewMutD, TensorD, Variable0, VariableD,
    },
    device::Device,
    error::ConfigError,
    ops::{add_channel_bias, conv2_same, max_pool2_valid, sum_squares, Activation},
};
use anyhow::{Context, Result};
use ndarray::{Dimension, Ix1, Ix4};

/// Convolution and max pooling layer.
///
/// Convolves the input with `filter_shape[0]` filters (stride 1, zero padded to keep the image
/// size), max pools with a `pool` window and adds a bias per filter before the activation. The
/// `[n, filters, height / pool, width / pool]` feature maps are flattened to
/// `[n, outputs]` in row major order.
///
/// The layer does not apply dropout, [`.output_dropout()`](Layer::output_dropout) is the
/// primary output and the dropout input is ignored.
///
/// The weight is initialized from N(0, 1 / sqrt(n_out)) with
/// `n_out = filters * filter_height * filter_width / (pool_height * pool_width)`, the bias from
/// N(0, 1).
#[derive(Clone, Debug)]
pub struct ConvPoolLayer {
    weight: Parameter4,
    bias: Parameter1,
    image_shape: [usize; 4],
    pool: [usize; 2],
    activation: Activation,
    device: Device,
    output: Option<VariableD>,
}

impl ConvPoolLayer {
    /// A builder.
    pub fn builder() -> ConvPoolLayerBuilder {
        ConvPoolLayerBuilder::default()
    }
    /// A layer with `filter_shape` `[filters, channels, height, width]`, `image_shape`
    /// `[mini_batch_size, channels, height, width]`, max pool window `pool` and `activation`.
    ///
    /// See [`ConvPoolLayerBuilder::build()`].
    pub fn new(
        filter_shape: [usize; 4],
        image_shape: [usize; 4],
        pool: [usize; 2],
        activation: Activation,
    ) -> Result<Self> {
        Self::builder()
            .filter_shape(filter_shape)
            .image_shape(image_shape)
            .pool(pool)
            .activation(activation)
            .build()
    }
    pub(super) fn from_builder(builder: ConvPoolLayerBuilder) -> Result<Self> {
        let ConvPoolLayerBuilder {
            filter_shape,
            image_shape,
            pool,
            activation,
            device,
            seed,
        } = builder;
        let [filters, channels, fh, fw] = filter_shape;
        let mut rng = rng(seed);
        let n_out = (filters * fh * fw) as f32 / (pool[0] * pool[1]) as f32;
        let weight = Parameter::from(normal(
            Ix4(filters, channels, fh, fw),
            (1. / n_out).sqrt(),
            &mut rng,
        )?);
        let bias = Parameter::from(normal(Ix1(filters), 1., &mut rng)?);
        Ok(Self {
            weight,
            bias,
            image_shape,
            pool,
            activation,
            device: device.unwrap_or_else(Device::selected),
            output: None,
        })
    }
    /// The filter shape, `[filters, channels, height, width]`.
    pub fn filter_shape(&self) -> [usize; 4] {
        let (filters, channels, fh, fw) = self.weight.raw_dim().into_pattern();
        [filters, channels, fh, fw]
    }
    /// The image shape, `[mini_batch_size, channels, height, width]`.
    pub fn image_shape(&self) -> [usize; 4] {
        self.image_shape
    }
    /// The max pool window.
    pub fn pool(&self) -> [usize; 2] {
        self.pool
    }
    /// The activation.
    pub fn activation(&self) -> Activation {
        self.activation
    }
    /// The weight, `[filters, channels, height, width]`.
    pub fn weight(&self) -> &Parameter4 {
        &self.weight
    }
    /// The bias, `[filters]`.
    pub fn bias(&self) -> &Parameter1 {
        &self.bias
    }
}

impl Layer for ConvPoolLayer {
    fn inputs(&self) -> usize {
        let [_, c, h, w] = self.image_shape;
        c * h * w
    }
    fn outputs(&self) -> usize {
        let [_, _, h, w] = self.image_shape;
        let [ph, pw] = self.pool;
        self.filter_shape()[0] * (h / ph) * (w / pw)
    }
    fn device(&self) -> Device {
        self.device
    }
    /// **Errors**
    ///
    /// [`ConfigError::MiniBatchSizeMismatch`] if `mini_batch_size` does not equal the first
    /// dimension of the image shape.
    fn set_inpt(
        &mut self,
        inpt: VariableD,
        _inpt_dropout: Option<VariableD>,
        mini_batch_size: usize,
    ) -> Result<()> {
        let image_shape = self.image_shape;
        if mini_batch_size != image_shape[0] {
            return Err(ConfigError::MiniBatchSizeMismatch {
                expected: image_shape[0],
                found: mini_batch_size,
            }
            .into());
        }
        let inpt = inpt.into_shape(image_shape).with_context(|| {
            format!("ConvPoolLayer input can not be reshaped to {image_shape:?}!")
        })?;
        let conv = conv2_same(inpt, self.weight.to_variable())?;
        let pooled = max_pool2_valid(conv, self.pool)?;
        let output = self
            .activation
            .forward(add_channel_bias(pooled, &self.bias.to_variable())?)
            .into_shape([mini_batch_size, self.outputs()])?;
        self.output.replace(output.into_dyn());
        Ok(())
    }
    fn output(&self) -> Result<VariableD> {
        self.output
            .clone()
            .ok_or_else(|| input_not_set("ConvPoolLayer"))
    }
    fn output_dropout(&self) -> Result<VariableD> {
        self.output()
    }
    fn weight_squared_sum(&self) -> Variable0 {
        sum_squares(&self.weight.to_variable())
    }
    fn parameters(&self) -> Vec<TensorD> {
        vec![
            self.weight.value().clone().into_dyn(),
            self.bias.value().clone().into_dyn(),
        ]
    }
    fn parameters_mut(&mut self) -> Vec<ParameterViewMutD> {
        vec![
            self.weight.make_view_mut().into_dyn(),
            self.bias.make_view_mut().into_dyn(),
        ]
    }
    fn set_training(&mut self, training: bool) {
        self.weight.set_training(training);
        self.bias.set_training(training);
    }
}
