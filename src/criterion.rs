//! Criteria for evaluating network outputs against labels.
use crate::{
    autograd::{Tensor, Variable, Variable0, Variable2},
    ops::argmax,
};
use anyhow::{ensure, Result};
use ndarray::{ArrayBase, ArrayView1, Data, Ix0, Ix1, Ix2};

/// A criterion.
pub trait Criterion<X, T> {
    /// The result.
    type Output;
    /// Evaluates `input` against `target`.
    fn eval(&self, input: X, target: T) -> Result<Self::Output>;
}

/// Accuracy.
///
/// The fraction of rows whose prediction equals the label, in `[0, 1]`.
#[derive(Default, Debug, Clone, Copy)]
pub struct Accuracy;

impl<S1: Data<Elem = f32>, S2: Data<Elem = u32>> Criterion<&ArrayBase<S1, Ix2>, &ArrayBase<S2, Ix1>>
    for Accuracy
{
    type Output = f32;
    fn eval(&self, input: &ArrayBase<S1, Ix2>, target: &ArrayBase<S2, Ix1>) -> Result<f32> {
        let predictions = argmax(input.view());
        self.eval(&predictions, target)
    }
}

impl<S1: Data<Elem = usize>, S2: Data<Elem = u32>>
    Criterion<&ArrayBase<S1, Ix1>, &ArrayBase<S2, Ix1>> for Accuracy
{
    type Output = f32;
    fn eval(&self, predictions: &ArrayBase<S1, Ix1>, target: &ArrayBase<S2, Ix1>) -> Result<f32> {
        ensure!(
            predictions.len() == target.len(),
            "{} predictions for {} labels!",
            predictions.len(),
            target.len()
        );
        if target.is_empty() {
            return Ok(0.);
        }
        let correct = predictions
            .iter()
            .zip(target)
            .filter(|(prediction, class)| **prediction == **class as usize)
            .count();
        Ok(correct as f32 / target.len() as f32)
    }
}

/// Cross entropy of the softmax of logits.
///
/// The mean over rows of `-ln(softmax(z)[label])`, computed as
/// `max(z) + ln(sum(exp(z - max(z)))) - z[label]` so that saturated logits yield a finite cost.
/// The gradient with respect to the logits is `(softmax(z) - onehot(label)) / rows`.
#[derive(Default, Debug, Clone, Copy)]
pub struct CrossEntropyLoss;

impl<'a> Criterion<Variable2, ArrayView1<'a, u32>> for CrossEntropyLoss {
    type Output = Variable0;
    fn eval(&self, input: Variable2, target: ArrayView1<'a, u32>) -> Result<Variable0> {
        let (rows, classes) = input.dim();
        ensure!(
            target.len() == rows,
            "CrossEntropyLoss input has {rows} rows but {} labels!",
            target.len()
        );
        ensure!(rows > 0, "CrossEntropyLoss of an empty batch!");
        for label in target.iter().copied() {
            ensure!(
                (label as usize) < classes,
                "Label {label} out of range for {classes} classes!"
            );
        }
        let n = rows as f32;
        let mut probabilities = input.value().to_owned();
        let mut total = 0f32;
        for ((mut p, z), label) in probabilities
            .outer_iter_mut()
            .zip(input.value().outer_iter())
            .zip(target)
        {
            let max = z.fold(f32::NEG_INFINITY, |max, x| max.max(*x));
            p.mapv_inplace(|x| (x - max).exp());
            let sum = p.sum();
            p /= sum;
            total += max + sum.ln() - z[*label as usize];
        }
        let mut builder = Variable::builder();
        if let Some(node) = input.node() {
            let target = target.to_owned();
            builder.edge(node, move |output_grad: Tensor<Ix0>| {
                let mut input_grad = probabilities;
                for (mut dx, label) in input_grad.outer_iter_mut().zip(target.iter()) {
                    dx[*label as usize] -= 1.;
                }
                input_grad *= output_grad[()] / n;
                Ok(input_grad.into_shared())
            });
        }
        Ok(builder.build(Tensor::from_elem((), total / n)))
    }
}
