use super::*;
use crate::{
    layer::{builders::LayerBuilder, FullyConnectedLayer, Layer, NetworkLayer, SoftmaxLayer},
    ops::Activation,
};
use approx::assert_relative_eq;
use ndarray::{Array1, Array2};

fn network(mini_batch_size: usize, seed: u64) -> Result<Network> {
    let hidden = FullyConnectedLayer::builder()
        .inputs(2)
        .outputs(8)
        .activation(Activation::Sigmoid)
        .seed(seed)
        .build()?;
    let layers = vec![hidden.into(), SoftmaxLayer::new(8, 2, 0.)?.into()];
    Network::new(layers, mini_batch_size)
}

/// Points on either side of the line x0 = x1, alternating classes.
fn separable(rows: usize) -> Result<Split> {
    let inputs = Array2::from_shape_fn([rows, 2], |(i, j)| {
        let offset = (i / 2 % 5) as f32 * 0.1;
        let sign = if i % 2 == 0 { 1. } else { -1. };
        if j == 0 {
            sign * (0.5 + offset)
        } else {
            -sign * (0.5 + offset)
        }
    });
    let labels = Array1::from_shape_fn(rows, |i| (i % 2) as u32);
    Split::new(inputs.into_shared(), labels.into_shared())
}

fn config(epochs: usize, mini_batch_size: usize) -> SgdConfig {
    SgdConfig {
        epochs,
        mini_batch_size,
        eta: 0.1,
        lmbda: 0.,
    }
}

fn config_error(error: anyhow::Error) -> Option<ConfigError> {
    error.downcast_ref::<ConfigError>().cloned()
}

#[test]
fn sgd_invalid_config() {
    let error = Sgd::new(config(0, 10)).unwrap_err();
    assert_eq!(config_error(error), Some(ConfigError::ZeroEpochs));
    let error = Sgd::new(SgdConfig {
        eta: -0.1,
        ..config(1, 10)
    })
    .unwrap_err();
    assert_eq!(config_error(error), Some(ConfigError::InvalidLearningRate(-0.1)));
}

#[test]
fn sgd_mini_batch_size_mismatch() -> Result<()> {
    let mut net = network(10, 0)?;
    let data = separable(40)?;
    let error = Sgd::new(config(1, 20))?
        .run(&mut net, &data, &data, None)
        .unwrap_err();
    assert_eq!(
        config_error(error),
        Some(ConfigError::MiniBatchSizeMismatch {
            expected: 10,
            found: 20
        })
    );
    Ok(())
}

#[test]
fn sgd_empty_split() -> Result<()> {
    let mut net = network(10, 0)?;
    let training = separable(40)?;
    let validation = separable(9)?;
    let error = Sgd::new(config(1, 10))?
        .run(&mut net, &training, &validation, None)
        .unwrap_err();
    assert_eq!(
        config_error(error),
        Some(ConfigError::EmptySplit {
            split: "validation",
            rows: 9,
            mini_batch_size: 10
        })
    );
    Ok(())
}

#[test]
fn sgd_input_width_mismatch() -> Result<()> {
    let mut net = network(10, 0)?;
    let training = separable(40)?;
    let test = Split::new(
        Array2::zeros([20, 3]).into_shared(),
        Array1::zeros(20).into_shared(),
    )?;
    let error = Sgd::new(config(1, 10))?
        .run(&mut net, &training, &training, Some(&test))
        .unwrap_err();
    assert_eq!(
        config_error(error),
        Some(ConfigError::InputWidthMismatch {
            split: "test",
            columns: 3,
            inputs: 2
        })
    );
    Ok(())
}

#[test]
fn sgd_no_softmax_output() -> Result<()> {
    let layer: NetworkLayer = FullyConnectedLayer::new(2, 2, Activation::Sigmoid, 0.)?.into();
    let mut net = Network::new(vec![layer], 10)?;
    let data = separable(20)?;
    let error = Sgd::new(config(1, 10))?
        .run(&mut net, &data, &data, None)
        .unwrap_err();
    assert_eq!(
        config_error(error),
        Some(ConfigError::NoSoftmaxOutput("FullyConnectedLayer"))
    );
    Ok(())
}

#[test]
fn train_mini_batch_decreases_cost() -> Result<()> {
    let mut net = network(10, 1)?;
    let train_mb = TrainMiniBatch {
        givens: Givens::new(&separable(10)?, 10),
        eta: 0.1,
        l2_scale: 0.,
        optimizer: SGD::default(),
    };
    let first = train_mb.call(&mut net, 0)?;
    assert_relative_eq!(first, 2f32.ln(), epsilon = 1e-5);
    let mut last = first;
    for _ in 0..20 {
        last = train_mb.call(&mut net, 0)?;
    }
    assert!(last < first, "{last} >= {first}");
    Ok(())
}

#[test]
fn train_mini_batch_l2_term() -> Result<()> {
    let data = separable(20)?;
    let mut plain = network(10, 2)?;
    let mut regularized = network(10, 2)?;
    let weight_squared_sum = regularized.weight_squared_sum()?.scalar();
    let givens = Givens::new(&data, 10);
    // lmbda = 1, 2 batches
    let l2_scale = 0.5 * 1. / 2.;
    let cost = TrainMiniBatch {
        givens: givens.clone(),
        eta: 0.1,
        l2_scale: 0.,
        optimizer: SGD::default(),
    }
    .call(&mut plain, 0)?;
    let cost_l2 = TrainMiniBatch {
        givens,
        eta: 0.1,
        l2_scale,
        optimizer: SGD::default(),
    }
    .call(&mut regularized, 0)?;
    assert_relative_eq!(
        cost_l2 - cost,
        l2_scale * weight_squared_sum,
        max_relative = 1e-4
    );
    // the penalty shrinks the hidden weights
    let shrunk = regularized.layers()[0].parameters()[0].clone();
    let unshrunk = plain.layers()[0].parameters()[0].clone();
    let norm = |x: &crate::autograd::TensorD| x.iter().map(|x| x * x).sum::<f32>();
    assert!(norm(&shrunk) < norm(&unshrunk));
    Ok(())
}

#[test]
fn sgd_ties_favor_later_epochs() -> Result<()> {
    let mut net = network(10, 3)?;
    let inputs = separable(30)?.inputs().clone();
    let data = Split::new(inputs, Array1::zeros(30).into_shared())?;
    let summary = Sgd::new(config(3, 10))?.run(&mut net, &data, &data, Some(&data))?;
    assert_eq!(summary.iterations, 9);
    assert_eq!(summary.epochs.len(), 3);
    for stats in summary.epochs.iter() {
        assert_eq!(stats.validation_accuracy, 1.);
    }
    assert_eq!(summary.best_validation_accuracy, 1.);
    assert_eq!(summary.best_iteration, 8);
    assert_eq!(summary.test_accuracy, Some(1.));
    Ok(())
}

#[test]
fn sgd_drops_remainder() -> Result<()> {
    let mut net = network(10, 4)?;
    let training = separable(105)?;
    let validation = separable(20)?;
    let summary = Sgd::new(config(2, 10))?.run(&mut net, &training, &validation, None)?;
    assert_eq!(summary.iterations, 20);
    assert_eq!(summary.epochs.len(), 2);
    assert!([9, 19].contains(&summary.best_iteration));
    assert_eq!(summary.test_accuracy, None);
    let best = &summary.epochs;
    assert!(best[1].best_validation_accuracy >= best[0].best_validation_accuracy);
    Ok(())
}

#[test]
fn sgd_test_mb_predictions() -> Result<()> {
    let mut net = network(10, 5)?;
    let data = separable(20)?;
    let mut sgd = Sgd::new(config(1, 10))?;
    let error = sgd.test_mb_predictions(&mut net, 0).unwrap_err();
    assert_eq!(config_error(error), Some(ConfigError::Unbound("test")));
    sgd.run(&mut net, &data, &data, Some(&data))?;
    let predictions = sgd.test_mb_predictions(&mut net, 1)?;
    assert_eq!(predictions.len(), 10);
    assert!(predictions.iter().all(|class| *class < 2));
    assert!(sgd.test_mb_predictions(&mut net, 2).is_err());
    Ok(())
}
