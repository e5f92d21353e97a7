use anyhow::{ensure, Result};
use convnet::{
    config::{NetworkConfig, SgdConfig},
    dataset::Split,
    device::Device,
    error::ConfigError,
    layer::{builders::LayerBuilder, ConvPoolLayer, FullyConnectedLayer, SoftmaxLayer},
    network::Network,
    ops::Activation,
    trainer::{Sgd, Summary},
};
use libtest_mimic::{Arguments, Trial};
use ndarray::{Array1, Array2};

fn main() {
    let args = Arguments::from_args();
    let tests = vec![
        Trial::test("device_gpu_unavailable", device_gpu_unavailable),
        Trial::test("network_size_mismatch", network_size_mismatch),
        Trial::test("sgd_separable", sgd_separable),
        Trial::test("sgd_batch_count", sgd_batch_count),
        Trial::test("sgd_conv_pool", sgd_conv_pool),
        Trial::test("sgd_reproducible", sgd_reproducible),
        Trial::test("sgd_network_config", sgd_network_config),
    ];
    libtest_mimic::run(&args, tests).exit()
}

/// Two linearly separable classes on either side of x0 = x1.
fn separable(rows: usize) -> Result<Split> {
    let inputs = Array2::from_shape_fn([rows, 2], |(i, j)| {
        let margin = 0.5 + (i / 2 % 5) as f32 * 0.1;
        let along = (i / 10 % 7) as f32 * 0.3 - 0.9;
        let sign = if i % 2 == 0 { 1. } else { -1. };
        if j == 0 {
            along + sign * margin
        } else {
            along - sign * margin
        }
    });
    let labels = Array1::from_shape_fn(rows, |i| (i % 2) as u32);
    Split::new(inputs.into_shared(), labels.into_shared())
}

fn fc_softmax(mini_batch_size: usize, seed: u64) -> Result<Network> {
    let hidden = FullyConnectedLayer::builder()
        .inputs(2)
        .outputs(8)
        .seed(seed)
        .build()?;
    Network::new(
        vec![hidden.into(), SoftmaxLayer::new(8, 2, 0.)?.into()],
        mini_batch_size,
    )
}

fn sgd_config(epochs: usize) -> SgdConfig {
    SgdConfig {
        epochs,
        mini_batch_size: 10,
        eta: 0.1,
        lmbda: 0.,
    }
}

fn device_gpu_unavailable() -> Result<(), libtest_mimic::Failed> {
    assert!(Device::gpu(0).is_err());
    assert!(Device::host().is_host());
    Ok(())
}

fn network_size_mismatch() -> Result<(), libtest_mimic::Failed> {
    let hidden = FullyConnectedLayer::new(784, 30, Activation::Sigmoid, 0.)?;
    let error = Network::new(
        vec![hidden.into(), SoftmaxLayer::new(20, 10, 0.)?.into()],
        10,
    )
    .unwrap_err();
    assert_eq!(
        error.downcast_ref::<ConfigError>(),
        Some(&ConfigError::LayerSizeMismatch {
            index: 1,
            outputs: 30,
            inputs: 20,
        })
    );
    Ok(())
}

fn check_best_monotonic(summary: &Summary) -> Result<()> {
    let mut best = 0f32;
    for stats in summary.epochs.iter() {
        ensure!(
            stats.best_validation_accuracy >= best,
            "best decreased in epoch {}",
            stats.epoch
        );
        ensure!(stats.best_validation_accuracy >= stats.validation_accuracy);
        best = stats.best_validation_accuracy;
    }
    ensure!(best == summary.best_validation_accuracy);
    Ok(())
}

fn sgd_separable() -> Result<(), libtest_mimic::Failed> {
    let training = separable(200)?;
    let validation = separable(100)?;
    let test = separable(60)?;
    let mut net = fc_softmax(10, 0)?;
    let summary = net.sgd(&training, 20, 10, 0.1, &validation, Some(&test), 0.)?;
    assert!(
        summary.best_validation_accuracy >= 0.95,
        "{}",
        summary.best_validation_accuracy
    );
    assert_eq!(summary.iterations, 20 * 20);
    assert!(summary.test_accuracy.is_some());
    check_best_monotonic(&summary)?;
    // the best iteration is the last mini-batch of an epoch
    assert_eq!((summary.best_iteration + 1) % 20, 0);
    Ok(())
}

fn sgd_batch_count() -> Result<(), libtest_mimic::Failed> {
    let training = separable(105)?;
    let validation = separable(20)?;
    let mut net = fc_softmax(10, 1)?;
    let summary = Sgd::new(sgd_config(3))?.run(&mut net, &training, &validation, None)?;
    assert_eq!(summary.iterations, 3 * 10);
    assert_eq!(summary.epochs.len(), 3);
    check_best_monotonic(&summary)?;
    Ok(())
}

fn sgd_conv_pool() -> Result<(), libtest_mimic::Failed> {
    let mini_batch_size = 5;
    let conv = ConvPoolLayer::builder()
        .filter_shape([2, 1, 3, 3])
        .image_shape([mini_batch_size, 1, 6, 6])
        .activation(Activation::ReLU)
        .seed(2)
        .build()?;
    let hidden = FullyConnectedLayer::builder()
        .inputs(2 * 3 * 3)
        .outputs(4)
        .activation(Activation::ReLU)
        .dropout(0.5)
        .seed(3)
        .build()?;
    let mut net = Network::new(
        vec![
            conv.into(),
            hidden.into(),
            SoftmaxLayer::new(4, 2, 0.5)?.into(),
        ],
        mini_batch_size,
    )?;
    let inputs = Array2::from_shape_fn([20, 36], |(i, j)| ((i * 7 + j) % 11) as f32 / 11.);
    let labels = Array1::from_shape_fn(20, |i| (i % 2) as u32);
    let data = Split::new(inputs.into_shared(), labels.into_shared())?;
    let config = SgdConfig {
        epochs: 2,
        mini_batch_size,
        eta: 0.03,
        lmbda: 0.1,
    };
    let mut sgd = Sgd::new(config)?;
    let summary = sgd.run(&mut net, &data, &data, Some(&data))?;
    assert_eq!(summary.iterations, 8);
    assert!(summary.epochs.iter().all(|stats| stats.mean_cost.is_finite()));
    let predictions = sgd.test_mb_predictions(&mut net, 3)?;
    assert_eq!(predictions.len(), mini_batch_size);
    for parameter in net.parameters() {
        assert!(parameter.iter().all(|x| x.is_finite()));
    }
    Ok(())
}

fn sgd_reproducible() -> Result<(), libtest_mimic::Failed> {
    let training = separable(60)?;
    let validation = separable(20)?;
    let run = || -> Result<(Summary, Network)> {
        let mut net = fc_softmax(10, 4)?;
        let summary = Sgd::new(sgd_config(2))?.run(&mut net, &training, &validation, None)?;
        Ok((summary, net))
    };
    let (a, net_a) = run()?;
    let (b, net_b) = run()?;
    assert_eq!(a, b);
    assert_eq!(net_a.parameters(), net_b.parameters());
    Ok(())
}

fn sgd_network_config() -> Result<(), libtest_mimic::Failed> {
    let json = r#"{
        "mini_batch_size": 10,
        "seed": 5,
        "layers": [
            { "kind": "fully_connected", "n_in": 2, "n_out": 6, "activation": "tanh" },
            { "kind": "softmax", "n_in": 6, "n_out": 2 }
        ]
    }"#;
    let network_config: NetworkConfig = serde_json::from_str(json)?;
    let mut net = network_config.build()?;
    let sgd_config: SgdConfig =
        serde_json::from_str(r#"{ "epochs": 2, "mini_batch_size": 10, "eta": 0.1 }"#)?;
    let data = separable(40)?;
    let summary = Sgd::new(sgd_config)?.run(&mut net, &data, &data, None)?;
    assert_eq!(summary.iterations, 8);
    let json = serde_json::to_string(&summary)?;
    let summary2: Summary = serde_json::from_str(&json)?;
    assert_eq!(summary, summary2);
    Ok(())
}
