use crate::device::Device;
use thiserror::Error;

/// Configuration errors.
///
/// Raised while building layers, networks and trainers, always before a training step
/// executes. Functions return [`anyhow::Result`], use
/// [`downcast_ref`](anyhow::Error::downcast_ref) to inspect the kind.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The network has no layers.
    #[error("Network has no layers!")]
    EmptyNetwork,
    /// Adjacent layers do not agree on the number of neurons.
    #[error("Layer {index} expects {inputs} inputs but the previous layer has {outputs} outputs!")]
    LayerSizeMismatch {
        /// Index of the layer receiving the input.
        index: usize,
        /// Outputs of layer `index - 1`.
        outputs: usize,
        /// Inputs of layer `index`.
        inputs: usize,
    },
    /// A layer was built with a zero dimension.
    #[error("Layer dimension {name} must be positive!")]
    ZeroDimension {
        /// The offending dimension.
        name: &'static str,
    },
    /// A convolutional filter does not match the image channels.
    #[error("Filter expects {filter} input channels but the image has {image}!")]
    ChannelMismatch {
        /// Input channels of the filter.
        filter: usize,
        /// Channels of the image.
        image: usize,
    },
    /// The pool window does not fit in the convolution output.
    #[error("Pool {pool:?} is larger than the feature map {image:?}!")]
    PoolTooLarge {
        /// Pool window.
        pool: [usize; 2],
        /// Feature map height and width.
        image: [usize; 2],
    },
    /// Mini-batch sizes disagree.
    #[error("Expected mini_batch_size {expected}, found {found}!")]
    MiniBatchSizeMismatch {
        /// Size the network was built with.
        expected: usize,
        /// Size that was requested.
        found: usize,
    },
    /// The mini-batch size is zero.
    #[error("mini_batch_size must be positive!")]
    ZeroMiniBatchSize,
    /// No full mini-batch fits in a split.
    #[error("The {split} split has {rows} rows, fewer than one mini-batch of {mini_batch_size}!")]
    EmptySplit {
        /// Name of the split.
        split: &'static str,
        /// Rows in the split.
        rows: usize,
        /// The mini-batch size.
        mini_batch_size: usize,
    },
    /// The columns of a split do not match the first layer.
    #[error("The {split} split has {columns} columns but the first layer expects {inputs} inputs!")]
    InputWidthMismatch {
        /// Name of the split.
        split: &'static str,
        /// Columns of the split inputs.
        columns: usize,
        /// Inputs of the first layer.
        inputs: usize,
    },
    /// Inputs and labels have different row counts.
    #[error("Split has {inputs} input rows but {labels} labels!")]
    RowMismatch {
        /// Rows of the inputs.
        inputs: usize,
        /// Length of the labels.
        labels: usize,
    },
    /// Zero epochs requested.
    #[error("epochs must be positive!")]
    ZeroEpochs,
    /// The learning rate is not a positive finite number.
    #[error("Learning rate {0} must be positive and finite!")]
    InvalidLearningRate(f32),
    /// The L2 coefficient is negative or not finite.
    #[error("L2 coefficient {0} must be non-negative and finite!")]
    InvalidL2(f32),
    /// The dropout probability is outside `[0, 1]`.
    #[error("Dropout probability {0} must be in [0, 1]!")]
    InvalidDropout(f32),
    /// The last layer does not define a cost.
    #[error("The last layer must be a SoftmaxLayer, found {0}!")]
    NoSoftmaxOutput(&'static str),
    /// Outputs were read before `set_inpt`.
    #[error("{0} outputs read before set_inpt!")]
    InputNotSet(&'static str),
    /// The dropout output was read after binding a batch for evaluation only.
    #[error("{0} dropout output is not computed, the batch was bound for evaluation!")]
    DropoutNotComputed(&'static str),
    /// The network placeholders were read before a mini-batch was bound.
    #[error("Network placeholder {0} is not bound!")]
    Unbound(&'static str),
    /// Layers live on different devices.
    ///
    /// Only [`Device::Host`] is compiled in, so this is reserved for additional backends.
    #[error("Layer {index} is on {found:?}, expected {expected:?}!")]
    DeviceMismatch {
        /// Index of the layer.
        index: usize,
        /// Device of the first layer.
        expected: Device,
        /// Device of layer `index`.
        found: Device,
    },
    /// A different device was already selected.
    ///
    /// Only [`Device::Host`] is compiled in, so this is reserved for additional backends.
    #[error("Device {selected:?} already selected, can not select {requested:?}!")]
    DeviceReselected {
        /// The device in use.
        selected: Device,
        /// The rejected device.
        requested: Device,
    },
}
