use super::{builders::LayerBuilder, *};
use crate::{autograd::Variable, ops::Activation};
use approx::assert_relative_eq;
use ndarray::{arr2, Array2};

fn input(rows: usize, cols: usize) -> VariableD {
    let x = Array2::from_shape_fn((rows, cols), |(i, j)| ((i * cols + j) % 7) as f32 * 0.1);
    Variable::from(x.into_shared()).into_dyn()
}

#[test]
fn fully_connected_init() -> Result<()> {
    let layer = FullyConnectedLayer::builder()
        .inputs(400)
        .outputs(100)
        .seed(0)
        .build()?;
    assert_eq!(layer.weight().shape(), &[400, 100]);
    assert_eq!(layer.bias().shape(), &[100]);
    let weight = layer.weight().value();
    let n = weight.len() as f32;
    let mean = weight.sum() / n;
    let std = (weight.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n).sqrt();
    assert!(mean.abs() < 0.01, "{mean}");
    assert_relative_eq!(std, 0.1, max_relative = 0.05);
    assert_eq!(layer.activation(), Activation::Sigmoid);
    let same = FullyConnectedLayer::builder()
        .inputs(400)
        .outputs(100)
        .seed(0)
        .build()?;
    assert_eq!(same.weight().value(), weight);
    Ok(())
}

#[test]
fn fully_connected_invalid() {
    let error = FullyConnectedLayer::new(0, 10, Activation::Sigmoid, 0.).unwrap_err();
    assert_eq!(
        error.downcast_ref::<ConfigError>(),
        Some(&ConfigError::ZeroDimension { name: "inputs" })
    );
    let error = FullyConnectedLayer::new(10, 10, Activation::Sigmoid, -0.1).unwrap_err();
    assert_eq!(
        error.downcast_ref::<ConfigError>(),
        Some(&ConfigError::InvalidDropout(-0.1))
    );
}

#[test]
fn fully_connected_outputs() -> Result<()> {
    let mut layer = FullyConnectedLayer::builder()
        .inputs(6)
        .outputs(3)
        .activation(Activation::Tanh)
        .seed(1)
        .build()?;
    let error = layer.output().unwrap_err();
    assert_eq!(
        error.downcast_ref::<ConfigError>(),
        Some(&ConfigError::InputNotSet("FullyConnectedLayer"))
    );
    // a [2, 2, 3] input is flattened to [2, 6]
    let x = input(2, 6).into_shape([2, 2, 3])?.into_dyn();
    layer.set_inpt(x.clone(), Some(x), 2)?;
    let output = layer.output()?;
    assert_eq!(output.shape(), &[2, 3]);
    assert!(output.value().iter().all(|y| y.abs() < 1.));
    // without dropout both paths agree
    let output_dropout = layer.output_dropout()?;
    for (a, b) in output.value().iter().zip(output_dropout.value().iter()) {
        assert_relative_eq!(*a, *b, epsilon = 1e-6);
    }
    assert_eq!(layer.y_out()?.len(), 2);
    Ok(())
}

#[test]
fn fully_connected_dropout_scales_primary() -> Result<()> {
    let mut layer = FullyConnectedLayer::builder()
        .inputs(4)
        .outputs(2)
        .activation(Activation::Linear)
        .dropout(0.5)
        .seed(2)
        .build()?;
    let x = input(3, 4);
    layer.set_inpt(x.clone(), Some(x.clone()), 3)?;
    let weight = layer.weight().value().clone();
    let bias = layer.bias().value().clone();
    let x2 = x.value().clone().into_dimensionality::<ndarray::Ix2>()?;
    let expected = x2.dot(&weight) * 0.5f32 + &bias;
    let output = layer.output()?;
    for (a, b) in output.value().iter().zip(expected.iter()) {
        assert_relative_eq!(*a, *b, epsilon = 1e-5);
    }
    Ok(())
}

#[test]
fn conv_pool_shapes() -> Result<()> {
    let mut layer = ConvPoolLayer::builder()
        .filter_shape([4, 1, 5, 5])
        .image_shape([2, 1, 28, 28])
        .seed(3)
        .build()?;
    assert_eq!(layer.inputs(), 784);
    assert_eq!(layer.outputs(), 4 * 14 * 14);
    assert_eq!(layer.pool(), [2, 2]);
    let x = input(2, 784);
    layer.set_inpt(x.clone(), Some(x.clone()), 2)?;
    assert_eq!(layer.output()?.shape(), &[2, 4 * 14 * 14]);
    assert_eq!(layer.output()?.value(), layer.output_dropout()?.value());
    let error = layer.set_inpt(x.clone(), Some(x), 3).unwrap_err();
    assert_eq!(
        error.downcast_ref::<ConfigError>(),
        Some(&ConfigError::MiniBatchSizeMismatch {
            expected: 2,
            found: 3
        })
    );
    Ok(())
}

#[test]
fn conv_pool_init_std() -> Result<()> {
    let layer = ConvPoolLayer::new([20, 1, 5, 5], [10, 1, 28, 28], [2, 2], Activation::ReLU)?;
    // n_out = 20 * 25 / 4 = 125
    let weight = layer.weight().value();
    let n = weight.len() as f32;
    let mean = weight.sum() / n;
    let std = (weight.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n).sqrt();
    assert_relative_eq!(std, (1f32 / 125.).sqrt(), max_relative = 0.15);
    assert_eq!(layer.filter_shape(), [20, 1, 5, 5]);
    Ok(())
}

#[test]
fn conv_pool_invalid() {
    let error = ConvPoolLayer::new([4, 3, 5, 5], [2, 1, 28, 28], [2, 2], Activation::ReLU)
        .unwrap_err();
    assert_eq!(
        error.downcast_ref::<ConfigError>(),
        Some(&ConfigError::ChannelMismatch {
            filter: 3,
            image: 1
        })
    );
    let error =
        ConvPoolLayer::new([4, 1, 3, 3], [2, 1, 4, 4], [5, 2], Activation::ReLU).unwrap_err();
    assert_eq!(
        error.downcast_ref::<ConfigError>(),
        Some(&ConfigError::PoolTooLarge {
            pool: [5, 2],
            image: [4, 4]
        })
    );
}

#[test]
fn softmax_uniform_at_init() -> Result<()> {
    let mut layer = SoftmaxLayer::new(5, 4, 0.)?;
    assert!(layer.weight().value().iter().all(|x| *x == 0.));
    assert!(layer.bias().value().iter().all(|x| *x == 0.));
    let x = input(3, 5);
    layer.set_inpt(x.clone(), Some(x), 3)?;
    let output = layer.output()?;
    assert!(output.value().iter().all(|p| (p - 0.25).abs() < 1e-6));
    // ties resolve to the first class
    assert_eq!(layer.y_out()?.to_vec(), vec![0, 0, 0]);
    assert_relative_eq!(layer.accuracy(&ndarray::arr1(&[0u32, 1, 0]).into_shared())?, 2. / 3.);
    Ok(())
}

#[test]
fn network_layer_dispatch() -> Result<()> {
    let mut layer = NetworkLayer::from(SoftmaxLayer::new(2, 2, 0.)?);
    assert_eq!(layer.name(), "SoftmaxLayer");
    assert!(layer.as_softmax().is_some());
    layer.set_training(true);
    assert_eq!(layer.parameters_mut().len(), 2);
    let x = Variable::from(arr2(&[[1f32, 2.]]).into_shared()).into_dyn();
    layer.set_inpt(x.clone(), Some(x), 1)?;
    assert_eq!(layer.y_out()?.len(), 1);
    let conv = NetworkLayer::from(ConvPoolLayer::new(
        [1, 1, 2, 2],
        [1, 1, 2, 2],
        [1, 1],
        Activation::Linear,
    )?);
    assert!(conv.y_out().is_err());
    assert!(conv.as_softmax().is_none());
    assert_eq!(conv.parameters().len(), 2);
    Ok(())
}

#[test]
fn fully_connected_primary_only() -> Result<()> {
    let mut layer = FullyConnectedLayer::builder()
        .inputs(4)
        .outputs(3)
        .dropout(0.5)
        .seed(5)
        .build()?;
    layer.set_inpt(input(2, 4), None, 2)?;
    assert_eq!(layer.output()?.shape(), &[2, 3]);
    assert_eq!(
        layer.output_dropout().unwrap_err().downcast_ref::<ConfigError>(),
        Some(&ConfigError::DropoutNotComputed("FullyConnectedLayer"))
    );
    Ok(())
}

#[test]
fn conv_pool_output_flattened() -> Result<()> {
    // a 1x1 identity filter with a 2x2 pool, so each output is the max of a window
    let mut layer = ConvPoolLayer::new([1, 1, 1, 1], [1, 1, 4, 4], [2, 2], Activation::Linear)?;
    let weight = layer.weight().value()[(0, 0, 0, 0)];
    let bias = layer.bias().value()[0];
    let x = Array2::from_shape_fn((1, 16), |(_, j)| j as f32);
    let x = Variable::from(x.into_shared()).into_dyn();
    layer.set_inpt(x, None, 1)?;
    let output = layer.output()?;
    assert_eq!(output.shape(), &[1, 4]);
    assert_eq!(layer.output_dropout()?.value(), output.value());
    let windows = if weight >= 0. {
        [5., 7., 13., 15.]
    } else {
        [0., 2., 8., 10.]
    };
    for (y, m) in output.value().iter().zip(windows) {
        assert_relative_eq!(*y, weight * m + bias, epsilon = 1e-4);
    }
    Ok(())
}
