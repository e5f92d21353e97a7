//! Trains a network on MNIST.
//!
//! The gzip'd IDX files are loaded from `--data`, or "mnist" in the Downloads folder.
//!
//! ```bash
//! # one conv-pool layer
//! cargo run --release -p mnist -- --arch conv
//!
//! # two conv-pool layers with ReLU, L2 and dropout
//! cargo run --release -p mnist -- --arch conv2-dropout --epochs 40
//!
//! # a network and hyperparameters from JSON
//! cargo run --release -p mnist -- --network net.json --sgd sgd.json
//! ```
use anyhow::Result;
use clap::{Parser, ValueEnum};
use convnet::{
    config::{LayerConfig, NetworkConfig, SgdConfig},
    dataset::mnist::Mnist,
    device::Device,
    ops::Activation,
    trainer::Sgd,
};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Arch {
    /// Fully connected hidden layer of 100 sigmoid neurons.
    Shallow,
    /// One conv-pool layer.
    Conv,
    /// Two conv-pool layers.
    Conv2,
    /// Two conv-pool layers, ReLU activations, L2 regularization and dropout.
    Conv2Dropout,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Trains a network on MNIST.")]
struct Args {
    /// Architecture, ignored when --network is provided.
    #[arg(long, value_enum, default_value_t = Arch::Conv)]
    arch: Arch,
    /// NetworkConfig JSON file.
    #[arg(long)]
    network: Option<PathBuf>,
    /// SgdConfig JSON file.
    #[arg(long)]
    sgd: Option<PathBuf>,
    /// Folder with the MNIST files.
    #[arg(long)]
    data: Option<PathBuf>,
    /// Overrides the number of epochs.
    #[arg(long)]
    epochs: Option<usize>,
    /// Overrides the mini-batch size.
    #[arg(long)]
    mini_batch_size: Option<usize>,
    /// Overrides the learning rate.
    #[arg(long)]
    eta: Option<f32>,
    /// Overrides the L2 coefficient.
    #[arg(long)]
    lmbda: Option<f32>,
    /// Seeds the initialization.
    #[arg(long)]
    seed: Option<u64>,
    /// Log level.
    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,
}

fn conv_pool(
    channels: usize,
    filters: usize,
    size: usize,
    mini_batch_size: usize,
    activation: Activation,
) -> LayerConfig {
    LayerConfig::ConvPool {
        filter_shape: [filters, channels, 5, 5],
        image_shape: [mini_batch_size, channels, size, size],
        poolsize: [2, 2],
        activation,
    }
}

fn fully_connected(n_in: usize, activation: Activation, p_dropout: f32) -> LayerConfig {
    LayerConfig::FullyConnected {
        n_in,
        n_out: 100,
        activation,
        p_dropout,
    }
}

fn softmax(p_dropout: f32) -> LayerConfig {
    LayerConfig::Softmax {
        n_in: 100,
        n_out: 10,
        p_dropout,
    }
}

impl Arch {
    fn network(self, mini_batch_size: usize, seed: Option<u64>) -> NetworkConfig {
        use Activation::{ReLU, Sigmoid};
        let mbs = mini_batch_size;
        let layers = match self {
            Self::Shallow => vec![fully_connected(28 * 28, Sigmoid, 0.), softmax(0.)],
            Self::Conv => vec![
                conv_pool(1, 20, 28, mbs, Sigmoid),
                fully_connected(20 * 14 * 14, Sigmoid, 0.),
                softmax(0.),
            ],
            Self::Conv2 => vec![
                conv_pool(1, 20, 28, mbs, Sigmoid),
                conv_pool(20, 40, 14, mbs, Sigmoid),
                fully_connected(40 * 7 * 7, Sigmoid, 0.),
                softmax(0.),
            ],
            Self::Conv2Dropout => vec![
                conv_pool(1, 20, 28, mbs, ReLU),
                conv_pool(20, 40, 14, mbs, ReLU),
                fully_connected(40 * 7 * 7, ReLU, 0.5),
                softmax(0.5),
            ],
        };
        NetworkConfig {
            layers,
            mini_batch_size,
            seed,
        }
    }
    fn sgd(self) -> SgdConfig {
        let (eta, lmbda) = match self {
            Self::Shallow | Self::Conv | Self::Conv2 => (0.1, 0.),
            Self::Conv2Dropout => (0.03, 0.1),
        };
        SgdConfig {
            epochs: 60,
            mini_batch_size: 10,
            eta,
            lmbda,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    Device::host().select()?;

    let mut sgd_config = match args.sgd.as_ref() {
        Some(path) => SgdConfig::from_json_file(path)?,
        None => args.arch.sgd(),
    };
    if let Some(epochs) = args.epochs {
        sgd_config.epochs = epochs;
    }
    if let Some(mini_batch_size) = args.mini_batch_size {
        sgd_config.mini_batch_size = mini_batch_size;
    }
    if let Some(eta) = args.eta {
        sgd_config.eta = eta;
    }
    if let Some(lmbda) = args.lmbda {
        sgd_config.lmbda = lmbda;
    }
    let network_config = match args.network.as_ref() {
        Some(path) => NetworkConfig::from_json_file(path)?,
        None => args.arch.network(sgd_config.mini_batch_size, args.seed),
    };
    info!("{}", serde_json::to_string(&network_config)?);
    info!("{sgd_config:?}");

    let mut builder = Mnist::builder();
    if let Some(data) = args.data.as_ref() {
        builder = builder.path(data);
    }
    let mnist = builder.build()?;
    let mut net = network_config.build()?;
    let summary = Sgd::new(sgd_config)?.run(
        &mut net,
        mnist.training(),
        mnist.validation(),
        Some(mnist.test()),
    )?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
