/*!
Small fully connected and convolutional networks trained with mini-batch SGD.

A [`Network`](network::Network) is a stack of
[`FullyConnectedLayer`](layer::FullyConnectedLayer)s,
[`ConvPoolLayer`](layer::ConvPoolLayer)s and a final [`SoftmaxLayer`](layer::SoftmaxLayer). Each
layer computes a primary output, used for evaluation, and a dropout output, used for the training
cost. [`Sgd`](trainer::Sgd) trains the network on [`Split`](dataset::Split)s, tracking the best
validation accuracy and the corresponding test accuracy.

Tensors are [`ndarray`] arrays, gradients are computed by the eager [`autograd`] engine.

# Example
```no_run
# use convnet::{
#     dataset::Split,
#     device::Device,
#     layer::{builders::LayerBuilder, ConvPoolLayer, FullyConnectedLayer, SoftmaxLayer},
#     network::Network,
#     ops::Activation,
# };
# fn main() -> anyhow::Result<()> {
Device::host().select()?;
# let (training, validation, test): (Split, Split, Split) = todo!();
let mini_batch_size = 10;
let conv = ConvPoolLayer::builder()
    .image_shape([mini_batch_size, 1, 28, 28])
    .filter_shape([20, 1, 5, 5])
    .activation(Activation::ReLU)
    .build()?;
let hidden = FullyConnectedLayer::builder()
    .inputs(20 * 14 * 14)
    .outputs(100)
    .activation(Activation::ReLU)
    .build()?;
let mut net = Network::new(
    vec![conv.into(), hidden.into(), SoftmaxLayer::new(100, 10, 0.)?.into()],
    mini_batch_size,
)?;
let summary = net.sgd(
    &training,
    60,
    mini_batch_size,
    0.03,
    &validation,
    Some(&test),
    0.1,
)?;
println!("{summary:#?}");
# Ok(())
# }
```
*/
#![warn(missing_docs)]

/// Automatic differentiation.
pub mod autograd;
pub mod config;
pub mod criterion;
pub mod dataset;
/// Devices.
pub mod device;
/// Errors.
pub mod error;
pub mod layer;
pub mod network;
pub mod ops;
pub mod optimizer;
pub mod trainer;
