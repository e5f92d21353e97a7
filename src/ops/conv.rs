use crate::autograd::{standard_layout, Tensor, Variable, Variable1, Variable4};
use anyhow::{ensure, Result};
use ndarray::{
    linalg::general_mat_mul, Array2, Array3, Array4, ArrayView2, ArrayView3, Axis, Ix4, Zip,
};
use rayon::prelude::*;

/// Padding before the first row or column so that a stride 1 filter keeps the size.
///
/// Even filters put the extra row / column after the last.
fn same_padding(filter: usize) -> usize {
    (filter - 1) / 2
}

/// Unfolds the `[c, h, w]` image into `[c * fh * fw, h * w]` patches.
fn im2col(input: ArrayView3<f32>, fh: usize, fw: usize) -> Array2<f32> {
    let (c, h, w) = input.dim();
    let (ph, pw) = (same_padding(fh), same_padding(fw));
    let mut cols = Array2::zeros((c * fh * fw, h * w));
    for (mut col, (ci, ki, kj)) in cols.outer_iter_mut().zip(patch_offsets(c, fh, fw)) {
        for i in 0..h {
            let Some(ii) = (i + ki).checked_sub(ph).filter(|ii| *ii < h) else {
                continue;
            };
            for j in 0..w {
                if let Some(jj) = (j + kj).checked_sub(pw).filter(|jj| *jj < w) {
                    col[i * w + j] = input[(ci, ii, jj)];
                }
            }
        }
    }
    cols
}

/// Folds `[c * fh * fw, h * w]` patches back into a `[c, h, w]` image, summing overlaps.
fn col2im(
    cols: ArrayView2<f32>,
    (c, h, w): (usize, usize, usize),
    fh: usize,
    fw: usize,
) -> Array3<f32> {
    let (ph, pw) = (same_padding(fh), same_padding(fw));
    let mut output = Array3::zeros((c, h, w));
    for (col, (ci, ki, kj)) in cols.outer_iter().zip(patch_offsets(c, fh, fw)) {
        for i in 0..h {
            let Some(ii) = (i + ki).checked_sub(ph).filter(|ii| *ii < h) else {
                continue;
            };
            for j in 0..w {
                if let Some(jj) = (j + kj).checked_sub(pw).filter(|jj| *jj < w) {
                    output[(ci, ii, jj)] += col[i * w + j];
                }
            }
        }
    }
    output
}

fn patch_offsets(c: usize, fh: usize, fw: usize) -> impl Iterator<Item = (usize, usize, usize)> {
    (0..c).flat_map(move |ci| (0..fh).flat_map(move |ki| (0..fw).map(move |kj| (ci, ki, kj))))
}

/// Stacks per image `[oc, h * w]` matrices into `[n, oc, h, w]`.
fn stack_images(
    images: Vec<Array2<f32>>,
    (n, c, h, w): (usize, usize, usize, usize),
) -> Result<Array4<f32>> {
    let views: Vec<_> = images.iter().map(Array2::view).collect();
    let stacked = if views.is_empty() {
        Array3::zeros((0, c, h * w))
    } else {
        ndarray::stack(Axis(0), &views)?
    };
    Ok(stacked.into_shape((n, c, h, w))?)
}

/// 2D convolution with stride 1 and "same" zero padding.
///
/// `input` is `[n, c, h, w]` and `weight` is `[oc, c, fh, fw]`, the output is `[n, oc, h, w]`.
/// Computed as a cross-correlation, the filter is not flipped.
/// Images are processed in parallel.
pub fn conv2_same(input: Variable4, weight: Variable4) -> Result<Variable4> {
    let (n, c, h, w) = input.dim();
    let (oc, ic, fh, fw) = weight.dim();
    ensure!(
        c == ic,
        "Conv weight {:?} does not match input {:?}!",
        weight.shape(),
        input.shape()
    );
    ensure!(fh > 0 && fw > 0, "Conv filter {:?} is empty!", weight.shape());
    let x = standard_layout(input.value().clone());
    let weight2 = standard_layout(weight.value().clone()).into_shape([oc, c * fh * fw])?;
    let mut builder = Variable::builder();
    if let Some(node) = input.node() {
        let weight2 = weight2.clone();
        builder.edge(node, move |output_grad: Tensor<Ix4>| {
            let output_grad = standard_layout(output_grad);
            let images = (0..n)
                .into_par_iter()
                .map(|b| -> Result<Array2<f32>> {
                    let dy = output_grad.index_axis(Axis(0), b).into_shape([oc, h * w])?;
                    let cols = weight2.t().dot(&dy);
                    Ok(col2im(cols.view(), (c, h, w), fh, fw).into_shape([c, h * w])?)
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(stack_images(images, (n, c, h, w))?.into_shared())
        });
    }
    if let Some(node) = weight.node() {
        let x = x.clone();
        builder.edge(node, move |output_grad: Tensor<Ix4>| {
            let output_grad = standard_layout(output_grad);
            let weight_grad = (0..n)
                .into_par_iter()
                .map(|b| -> Result<Array2<f32>> {
                    let cols = im2col(x.index_axis(Axis(0), b), fh, fw);
                    let dy = output_grad.index_axis(Axis(0), b).into_shape([oc, h * w])?;
                    Ok(dy.dot(&cols.t()))
                })
                .try_reduce(|| Array2::zeros((oc, c * fh * fw)), |a, b| Ok(a + b))?;
            Ok(weight_grad.into_shape([oc, c, fh, fw])?.into_shared())
        });
    }
    let images = (0..n)
        .into_par_iter()
        .map(|b| {
            let cols = im2col(x.index_axis(Axis(0), b), fh, fw);
            let mut y = Array2::zeros((oc, h * w));
            general_mat_mul(1., &weight2, &cols, 0., &mut y);
            y
        })
        .collect();
    let output = stack_images(images, (n, oc, h, w))?;
    Ok(builder.build(output.into_shared()))
}

/// 2D max pooling with a `pool` window, stride equal to the window and no padding.
///
/// Trailing rows / columns that do not fill a window are dropped. The gradient flows to the
/// first maximum of each window.
pub fn max_pool2_valid(input: Variable4, pool: [usize; 2]) -> Result<Variable4> {
    let (n, c, h, w) = input.dim();
    let [ph, pw] = pool;
    ensure!(ph > 0 && pw > 0, "Pool {pool:?} is empty!");
    let (oh, ow) = (h / ph, w / pw);
    ensure!(
        oh > 0 && ow > 0,
        "Pool {pool:?} is larger than input {:?}!",
        input.shape()
    );
    let x = input.value();
    let mut output = Array4::<f32>::zeros((n, c, oh, ow));
    let mut indices = Array4::<usize>::zeros((n, c, oh, ow));
    Zip::indexed(&mut output)
        .and(&mut indices)
        .par_for_each(|(b, ci, i, j), y, index| {
            let mut max = f32::NEG_INFINITY;
            let mut argmax = (i * ph) * w + j * pw;
            for ki in 0..ph {
                for kj in 0..pw {
                    let (ii, jj) = (i * ph + ki, j * pw + kj);
                    let v = x[(b, ci, ii, jj)];
                    if v > max {
                        max = v;
                        argmax = ii * w + jj;
                    }
                }
            }
            *y = max;
            *index = argmax;
        });
    let mut builder = Variable::builder();
    if let Some(node) = input.node() {
        builder.edge(node, move |output_grad: Tensor<Ix4>| {
            let mut input_grad = Array4::zeros((n, c, h, w));
            Zip::indexed(&output_grad)
                .and(&indices)
                .for_each(|(b, ci, _, _), dy, index| {
                    input_grad[(b, ci, index / w, index % w)] += *dy;
                });
            Ok(input_grad.into_shared())
        });
    }
    Ok(builder.build(output.into_shared()))
}

/// Adds `bias` to each channel of `input`.
pub fn add_channel_bias(input: Variable4, bias: &Variable1) -> Result<Variable4> {
    let (_, c, _, _) = input.dim();
    ensure!(
        bias.dim() == c,
        "Bias {:?} does not match channels of {:?}!",
        bias.shape(),
        input.shape()
    );
    let mut builder = Variable::builder();
    if let Some(node) = input.node() {
        builder.edge(node, Ok);
    }
    if let Some(node) = bias.node() {
        builder.edge(node, |output_grad: Tensor<Ix4>| {
            Ok(output_grad
                .sum_axis(Axis(3))
                .sum_axis(Axis(2))
                .sum_axis(Axis(0))
                .into_shared())
        });
    }
    let bias = standard_layout(bias.value().clone()).into_shape([1, c, 1, 1])?;
    let mut value = input.value().to_owned();
    value += &bias;
    Ok(builder.build(value.into_shared()))
}
