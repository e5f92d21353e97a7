//! Configuration for networks and training.
//!
//! Configurations are plain serde structures, typically loaded from JSON:
//!
//! ```json
//! {
//!   "mini_batch_size": 10,
//!   "seed": 0,
//!   "layers": [
//!     { "kind": "conv_pool", "filter_shape": [20, 1, 5, 5], "image_shape": [10, 1, 28, 28],
//!       "activation": "relu" },
//!     { "kind": "fully_connected", "n_in": 3920, "n_out": 100, "activation": "relu",
//!       "p_dropout": 0.5 },
//!     { "kind": "softmax", "n_in": 100, "n_out": 10, "p_dropout": 0.5 }
//!   ]
//! }
//! ```
use crate::{
    error::ConfigError,
    layer::{
        builders::LayerBuilder, ConvPoolLayer, FullyConnectedLayer, NetworkLayer, SoftmaxLayer,
    },
    network::Network,
    ops::Activation,
};
use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fs, path::Path};

fn from_json_path<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}!", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}!", path.display()))
}

/// Hyperparameters for [`Sgd`](crate::trainer::Sgd).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SgdConfig {
    /// The number of passes over the training data.
    pub epochs: usize,
    /// The number of rows per mini-batch.
    pub mini_batch_size: usize,
    /// The learning rate.
    pub eta: f32,
    /// The L2 regularization coefficient.
    #[serde(default)]
    pub lmbda: f32,
}

impl SgdConfig {
    /// Loads a config from a JSON file and validates it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = from_json_path(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }
    /// Checks the hyperparameters.
    ///
    /// **Errors**
    ///
    /// - [`ConfigError::ZeroEpochs`]
    /// - [`ConfigError::ZeroMiniBatchSize`]
    /// - [`ConfigError::InvalidLearningRate`] unless `eta` is positive and finite.
    /// - [`ConfigError::InvalidL2`] unless `lmbda` is non-negative and finite.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.epochs == 0 {
            return Err(ConfigError::ZeroEpochs);
        }
        if self.mini_batch_size == 0 {
            return Err(ConfigError::ZeroMiniBatchSize);
        }
        if !(self.eta.is_finite() && self.eta > 0.) {
            return Err(ConfigError::InvalidLearningRate(self.eta));
        }
        if !(self.lmbda.is_finite() && self.lmbda >= 0.) {
            return Err(ConfigError::InvalidL2(self.lmbda));
        }
        Ok(())
    }
}

fn default_pool() -> [usize; 2] {
    [2, 2]
}

/// A layer description.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerConfig {
    /// See [`FullyConnectedLayer`].
    FullyConnected {
        /// Inputs.
        n_in: usize,
        /// Outputs.
        n_out: usize,
        /// Defaults to sigmoid.
        #[serde(default)]
        activation: Activation,
        /// Defaults to 0.
        #[serde(default)]
        p_dropout: f32,
    },
    /// See [`ConvPoolLayer`].
    ConvPool {
        /// `[filters, channels, height, width]`
        filter_shape: [usize; 4],
        /// `[mini_batch_size, channels, height, width]`
        image_shape: [usize; 4],
        /// Defaults to `[2, 2]`.
        #[serde(default = "default_pool")]
        poolsize: [usize; 2],
        /// Defaults to sigmoid.
        #[serde(default)]
        activation: Activation,
    },
    /// See [`SoftmaxLayer`].
    Softmax {
        /// Inputs.
        n_in: usize,
        /// Classes.
        n_out: usize,
        /// Defaults to 0.
        #[serde(default)]
        p_dropout: f32,
    },
}

impl LayerConfig {
    /// Builds the layer, seeding the initialization with `seed` if provided.
    pub fn build(&self, seed: Option<u64>) -> Result<NetworkLayer> {
        fn seeded<B: LayerBuilder>(builder: B, seed: Option<u64>) -> Result<NetworkLayer> {
            let builder = match seed {
                Some(seed) => builder.seed(seed),
                None => builder,
            };
            Ok(builder.build()?.into())
        }
        match *self {
            Self::FullyConnected {
                n_in,
                n_out,
                activation,
                p_dropout,
            } => seeded(
                FullyConnectedLayer::builder()
                    .inputs(n_in)
                    .outputs(n_out)
                    .activation(activation)
                    .dropout(p_dropout),
                seed,
            ),
            Self::ConvPool {
                filter_shape,
                image_shape,
                poolsize,
                activation,
            } => seeded(
                ConvPoolLayer::builder()
                    .filter_shape(filter_shape)
                    .image_shape(image_shape)
                    .pool(poolsize)
                    .activation(activation),
                seed,
            ),
            Self::Softmax {
                n_in,
                n_out,
                p_dropout,
            } => seeded(
                SoftmaxLayer::builder()
                    .inputs(n_in)
                    .outputs(n_out)
                    .dropout(p_dropout),
                seed,
            ),
        }
    }
}

/// A network description.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// The layers, first to last.
    pub layers: Vec<LayerConfig>,
    /// The mini-batch size.
    pub mini_batch_size: usize,
    /// Seeds the initialization, layer `i` uses `seed + i`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl NetworkConfig {
    /// Loads a config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        from_json_path(path.as_ref())
    }
    /// Builds the layers and the [`Network`].
    ///
    /// See [`Network::new()`].
    pub fn build(&self) -> Result<Network> {
        let layers = self
            .layers
            .iter()
            .enumerate()
            .map(|(i, layer)| layer.build(self.seed.map(|seed| seed.wrapping_add(i as u64))))
            .collect::<Result<Vec<_>>>()?;
        Network::new(layers, self.mini_batch_size)
    }
}
