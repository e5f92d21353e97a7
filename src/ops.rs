//! Differentiable operations.
//!
//! Each operation computes its value eagerly and, when an input has a [`Node`](crate::autograd::Node),
//! adds an edge that maps the output gradient back to that input.
use crate::{
    autograd::{Tensor, Variable, Variable0, Variable1, Variable2},
    error::ConfigError,
};
use anyhow::{ensure, Result};
use ndarray::{Array1, ArrayView2, Axis, Dimension, Ix0, Ix2, Zip};
use rand::{
    distributions::{Bernoulli, Distribution},
    Rng,
};
use serde::{Deserialize, Serialize};

mod conv;
pub use conv::{add_channel_bias, conv2_same, max_pool2_valid};

/// Activation functions.
#[derive(Default, Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Identity.
    Linear,
    /// Logistic sigmoid.
    #[default]
    Sigmoid,
    /// Hyperbolic tangent.
    Tanh,
    /// Rectified linear unit.
    #[serde(rename = "relu")]
    ReLU,
}

impl Activation {
    /// Applies the activation elementwise.
    pub fn forward<D: Dimension + 'static>(self, input: Variable<D>) -> Variable<D> {
        if self == Self::Linear {
            return input;
        }
        let output = input.value().mapv(|x| self.eval(x)).into_shared();
        let mut builder = Variable::builder();
        if let Some(node) = input.node() {
            let output = output.clone();
            builder.edge(node, move |output_grad: Tensor<D>| {
                let mut input_grad = output_grad.into_owned();
                Zip::from(&mut input_grad)
                    .and(&output)
                    .for_each(|dx, y| *dx *= self.derivative(*y));
                Ok(input_grad.into_shared())
            });
        }
        builder.build(output)
    }
    fn eval(self, x: f32) -> f32 {
        match self {
            Self::Linear => x,
            Self::Sigmoid => 1. / (1. + (-x).exp()),
            Self::Tanh => x.tanh(),
            Self::ReLU => x.max(0.),
        }
    }
    /// The derivative in terms of the output `y`.
    fn derivative(self, y: f32) -> f32 {
        match self {
            Self::Linear => 1.,
            Self::Sigmoid => y * (1. - y),
            Self::Tanh => 1. - y * y,
            Self::ReLU => {
                if y > 0. {
                    1.
                } else {
                    0.
                }
            }
        }
    }
}

/// Multiplies by `alpha`.
pub fn scale<D: Dimension + 'static>(input: Variable<D>, alpha: f32) -> Variable<D> {
    let mut builder = Variable::builder();
    if let Some(node) = input.node() {
        builder.edge(node, move |output_grad: Tensor<D>| Ok(output_grad * alpha));
    }
    builder.build((input.value() * alpha).into_shared())
}

/// Adds two variables with the same shape.
pub fn add<D: Dimension + 'static>(lhs: Variable<D>, rhs: Variable<D>) -> Result<Variable<D>> {
    ensure!(
        lhs.shape() == rhs.shape(),
        "Can not add {:?} to {:?}!",
        rhs.shape(),
        lhs.shape()
    );
    let mut builder = Variable::builder();
    for node in [lhs.node(), rhs.node()].into_iter().flatten() {
        builder.edge(node, Ok);
    }
    let mut value = lhs.value().to_owned();
    value += rhs.value();
    Ok(builder.build(value.into_shared()))
}

/// Adds `bias` to each row of `input`.
pub fn add_bias(input: Variable2, bias: &Variable1) -> Result<Variable2> {
    let (_, units) = input.dim();
    ensure!(
        bias.dim() == units,
        "Bias {:?} does not match input {:?}!",
        bias.shape(),
        input.shape()
    );
    let mut builder = Variable::builder();
    if let Some(node) = input.node() {
        builder.edge(node, Ok);
    }
    if let Some(node) = bias.node() {
        builder.edge(node, |output_grad: Tensor<Ix2>| {
            Ok(output_grad.sum_axis(Axis(0)).into_shared())
        });
    }
    let mut value = input.value().to_owned();
    value += bias.value();
    Ok(builder.build(value.into_shared()))
}

/// The sum of the squared elements.
pub fn sum_squares<D: Dimension + 'static>(input: &Variable<D>) -> Variable0 {
    let mut builder = Variable::builder();
    if let Some(node) = input.node() {
        let input = input.value().clone();
        builder.edge(node, move |output_grad: Tensor<Ix0>| {
            Ok((&input * (2. * output_grad[()])).into_shared())
        });
    }
    let value = input.value().iter().map(|x| x * x).sum::<f32>();
    builder.build(Tensor::from_elem((), value))
}

/// Softmax over each row.
///
/// The row maximum is subtracted before exponentiation.
pub fn softmax(input: Variable2) -> Variable2 {
    let mut output = input.value().to_owned();
    for mut row in output.outer_iter_mut() {
        let max = row.fold(f32::NEG_INFINITY, |max, x| max.max(*x));
        row.mapv_inplace(|x| (x - max).exp());
        let sum = row.sum();
        row /= sum;
    }
    let output = output.into_shared();
    let mut builder = Variable::builder();
    if let Some(node) = input.node() {
        let output = output.clone();
        builder.edge(node, move |output_grad: Tensor<Ix2>| {
            let mut input_grad = output_grad.into_owned();
            for (mut dx, y) in input_grad.outer_iter_mut().zip(output.outer_iter()) {
                let dot = dx.dot(&y);
                Zip::from(&mut dx)
                    .and(&y)
                    .for_each(|dx, y| *dx = y * (*dx - dot));
            }
            Ok(input_grad.into_shared())
        });
    }
    builder.build(output)
}

/// Zeroes each element with probability `p`, using the thread rng.
///
/// See [`dropout_with_rng`].
pub fn dropout<D: Dimension + 'static>(input: Variable<D>, p: f32) -> Result<Variable<D>> {
    dropout_with_rng(input, p, &mut rand::thread_rng())
}

/// Zeroes each element with probability `p`.
///
/// Surviving elements are not rescaled. Every call draws a new mask, and the gradient is
/// masked the same way as the value.
///
/// **Errors**
///
/// [`ConfigError::InvalidDropout`] if `p` is not in `[0, 1]`.
pub fn dropout_with_rng<D, R>(input: Variable<D>, p: f32, rng: &mut R) -> Result<Variable<D>>
where
    D: Dimension + 'static,
    R: Rng + ?Sized,
{
    if !(0. ..=1.).contains(&p) {
        return Err(ConfigError::InvalidDropout(p).into());
    }
    if p == 0. {
        return Ok(input);
    }
    let keep = Bernoulli::new(f64::from(1. - p))?;
    let mask = Tensor::<D>::from_shape_simple_fn(input.raw_dim(), || {
        if keep.sample(&mut *rng) {
            1.
        } else {
            0.
        }
    });
    let mut builder = Variable::builder();
    if let Some(node) = input.node() {
        let mask = mask.clone();
        builder.edge(node, move |output_grad: Tensor<D>| {
            let mut input_grad = output_grad.into_owned();
            input_grad *= &mask;
            Ok(input_grad.into_shared())
        });
    }
    let mut value = input.value().to_owned();
    value *= &mask;
    Ok(builder.build(value.into_shared()))
}

/// The index of the maximum of each row.
///
/// Ties resolve to the first maximum.
pub fn argmax(input: ArrayView2<f32>) -> Array1<usize> {
    input
        .outer_iter()
        .map(|row| {
            let mut max = f32::NEG_INFINITY;
            let mut max_index = 0;
            for (i, x) in row.iter().copied().enumerate() {
                if x > max {
                    max = x;
                    max_index = i;
                }
            }
            max_index
        })
        .collect()
}
