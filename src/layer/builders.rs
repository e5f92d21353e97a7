use super::{
    check_dropout, ConvPoolLayer, FullyConnectedLayer, NetworkLayer, SoftmaxLayer,
};
use crate::{device::Device, error::ConfigError, ops::Activation};
use anyhow::Result;

/// Layer builders.
///
/// Settings are validated in [`.build()`](LayerBuilder::build).
pub trait LayerBuilder: Default + Clone {
    /// The layer to build.
    type Layer: Into<NetworkLayer>;
    /// Sets the device.
    ///
    /// Defaults to [`Device::selected()`].
    fn device(self, device: Device) -> Self;
    /// Seeds the parameter initialization.
    ///
    /// Defaults to entropy.
    fn seed(self, seed: u64) -> Self;
    /// Builds the layer.
    fn build(self) -> Result<Self::Layer>;
}

fn ensure_positive(value: usize, name: &'static str) -> Result<()> {
    if value == 0 {
        Err(ConfigError::ZeroDimension { name }.into())
    } else {
        Ok(())
    }
}

/// Builder for [`FullyConnectedLayer`].
#[derive(Default, Clone, Debug)]
pub struct FullyConnectedLayerBuilder {
    pub(super) inputs: usize,
    pub(super) outputs: usize,
    pub(super) activation: Activation,
    pub(super) p_dropout: f32,
    pub(super) device: Option<Device>,
    pub(super) seed: Option<u64>,
}

impl FullyConnectedLayerBuilder {
    /// Sets the number of inputs.
    pub fn inputs(mut self, inputs: usize) -> Self {
        self.inputs = inputs;
        self
    }
    /// Sets the number of outputs.
    pub fn outputs(mut self, outputs: usize) -> Self {
        self.outputs = outputs;
        self
    }
    /// Sets the activation, defaults to [`Activation::Sigmoid`].
    pub fn activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }
    /// Sets the dropout probability, defaults to 0.
    pub fn dropout(mut self, p_dropout: f32) -> Self {
        self.p_dropout = p_dropout;
        self
    }
}

impl LayerBuilder for FullyConnectedLayerBuilder {
    type Layer = FullyConnectedLayer;
    fn device(mut self, device: Device) -> Self {
        self.device.replace(device);
        self
    }
    fn seed(mut self, seed: u64) -> Self {
        self.seed.replace(seed);
        self
    }
    /// **Errors**
    ///
    /// - [`ConfigError::ZeroDimension`] if `inputs` or `outputs` is 0.
    /// - [`ConfigError::InvalidDropout`] if the dropout probability is not in `[0, 1]`.
    fn build(self) -> Result<FullyConnectedLayer> {
        ensure_positive(self.inputs, "inputs")?;
        ensure_positive(self.outputs, "outputs")?;
        check_dropout(self.p_dropout)?;
        FullyConnectedLayer::from_builder(self)
    }
}

/// Builder for [`ConvPoolLayer`].
#[derive(Clone, Debug)]
pub struct ConvPoolLayerBuilder {
    pub(super) filter_shape: [usize; 4],
    pub(super) image_shape: [usize; 4],
    pub(super) pool: [usize; 2],
    pub(super) activation: Activation,
    pub(super) device: Option<Device>,
    pub(super) seed: Option<u64>,
}

impl Default for ConvPoolLayerBuilder {
    fn default() -> Self {
        Self {
            filter_shape: [0; 4],
            image_shape: [0; 4],
            pool: [2, 2],
            activation: Activation::default(),
            device: None,
            seed: None,
        }
    }
}

impl ConvPoolLayerBuilder {
    /// Sets the filter shape, `[filters, input channels, height, width]`.
    pub fn filter_shape(mut self, filter_shape: [usize; 4]) -> Self {
        self.filter_shape = filter_shape;
        self
    }
    /// Sets the image shape, `[mini_batch_size, channels, height, width]`.
    pub fn image_shape(mut self, image_shape: [usize; 4]) -> Self {
        self.image_shape = image_shape;
        self
    }
    /// Sets the max pool window, defaults to `[2, 2]`.
    pub fn pool(mut self, pool: [usize; 2]) -> Self {
        self.pool = pool;
        self
    }
    /// Sets the activation, defaults to [`Activation::Sigmoid`].
    pub fn activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }
}

impl LayerBuilder for ConvPoolLayerBuilder {
    type Layer = ConvPoolLayer;
    fn device(mut self, device: Device) -> Self {
        self.device.replace(device);
        self
    }
    fn seed(mut self, seed: u64) -> Self {
        self.seed.replace(seed);
        self
    }
    /// **Errors**
    ///
    /// - [`ConfigError::ZeroDimension`] if any dimension is 0.
    /// - [`ConfigError::ChannelMismatch`] if the filter and image channels differ.
    /// - [`ConfigError::PoolTooLarge`] if the pool window does not fit in the image.
    fn build(self) -> Result<ConvPoolLayer> {
        let [filters, filter_channels, fh, fw] = self.filter_shape;
        let [batch_size, channels, h, w] = self.image_shape;
        for (value, name) in [
            (filters, "filters"),
            (filter_channels, "filter channels"),
            (fh, "filter height"),
            (fw, "filter width"),
            (batch_size, "image batch size"),
            (channels, "image channels"),
            (h, "image height"),
            (w, "image width"),
            (self.pool[0], "pool height"),
            (self.pool[1], "pool width"),
        ] {
            ensure_positive(value, name)?;
        }
        if filter_channels != channels {
            return Err(ConfigError::ChannelMismatch {
                filter: filter_channels,
                image: channels,
            }
            .into());
        }
        if self.pool[0] > h || self.pool[1] > w {
            return Err(ConfigError::PoolTooLarge {
                pool: self.pool,
                image: [h, w],
            }
            .into());
        }
        ConvPoolLayer::from_builder(self)
    }
}

/// Builder for [`SoftmaxLayer`].
#[derive(Default, Clone, Debug)]
pub struct SoftmaxLayerBuilder {
    pub(super) inputs: usize,
    pub(super) outputs: usize,
    pub(super) p_dropout: f32,
    pub(super) device: Option<Device>,
}

impl SoftmaxLayerBuilder {
    /// Sets the number of inputs.
    pub fn inputs(mut self, inputs: usize) -> Self {
        self.inputs = inputs;
        self
    }
    /// Sets the number of classes.
    pub fn outputs(mut self, outputs: usize) -> Self {
        self.outputs = outputs;
        self
    }
    /// Sets the dropout probability, defaults to 0.
    pub fn dropout(mut self, p_dropout: f32) -> Self {
        self.p_dropout = p_dropout;
        self
    }
}

impl LayerBuilder for SoftmaxLayerBuilder {
    type Layer = SoftmaxLayer;
    fn device(mut self, device: Device) -> Self {
        self.device.replace(device);
        self
    }
    /// The parameters are initialized to zero, the seed is ignored.
    fn seed(self, _seed: u64) -> Self {
        self
    }
    /// **Errors**
    ///
    /// - [`ConfigError::ZeroDimension`] if `inputs` or `outputs` is 0.
    /// - [`ConfigError::InvalidDropout`] if the dropout probability is not in `[0, 1]`.
    fn build(self) -> Result<SoftmaxLayer> {
        ensure_positive(self.inputs, "inputs")?;
        ensure_positive(self.outputs, "outputs")?;
        check_dropout(self.p_dropout)?;
        SoftmaxLayer::from_builder(self)
    }
}
