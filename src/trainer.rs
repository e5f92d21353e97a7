//! Training.
//!
//! [`Sgd`] trains a [`Network`] with mini-batch stochastic gradient descent. Each evaluator is a
//! function of a mini-batch index: it slices the shared split, binds the slice to the network
//! and runs the forward (and for training, the backward) pass.
use crate::{
    config::SgdConfig,
    dataset::Split,
    error::ConfigError,
    network::Network,
    ops::{add, scale},
    optimizer::{Optimizer, SGD},
};
use anyhow::Result;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Binds mini-batches of a split to the network.
#[derive(Clone, Debug)]
struct Givens {
    split: Split,
    mini_batch_size: usize,
}

impl Givens {
    fn new(split: &Split, mini_batch_size: usize) -> Self {
        Self {
            split: split.clone(),
            mini_batch_size,
        }
    }
    fn batch_count(&self) -> usize {
        self.split.batch_count(self.mini_batch_size)
    }
    fn bind(&self, network: &mut Network, index: usize, labels: bool) -> Result<()> {
        let (x, y) = self.split.mini_batch(index, self.mini_batch_size)?;
        network.set_batch(x, labels.then_some(y))
    }
}

/// Executes one update and returns the cost.
#[derive(Debug)]
struct TrainMiniBatch {
    givens: Givens,
    eta: f32,
    l2_scale: f32,
    optimizer: SGD,
}

impl TrainMiniBatch {
    fn call(&self, network: &mut Network, index: usize) -> Result<f32> {
        network.set_training(true);
        self.givens.bind(network, index, true)?;
        let mut cost = network.cost()?;
        if self.l2_scale > 0. {
            cost = add(cost, scale(network.weight_squared_sum()?, self.l2_scale))?;
        }
        cost.backward()?;
        for parameter in network.parameters_mut() {
            self.optimizer.update(self.eta, parameter)?;
        }
        Ok(cost.scalar())
    }
}

/// Accuracy of a mini-batch.
#[derive(Debug)]
struct AccuracyMiniBatch {
    givens: Givens,
}

impl AccuracyMiniBatch {
    fn call(&self, network: &mut Network, index: usize) -> Result<f32> {
        network.set_training(false);
        self.givens.bind(network, index, true)?;
        network.accuracy()
    }
    /// The mean over every mini-batch.
    fn mean(&self, network: &mut Network) -> Result<f32> {
        let count = self.givens.batch_count();
        let mut sum = 0.;
        for index in 0..count {
            sum += self.call(network, index)?;
        }
        Ok(sum / count as f32)
    }
}

/// Predicted classes of a mini-batch.
#[derive(Debug)]
struct PredictionsMiniBatch {
    givens: Givens,
}

impl PredictionsMiniBatch {
    fn call(&self, network: &mut Network, index: usize) -> Result<Array1<usize>> {
        network.set_training(false);
        self.givens.bind(network, index, false)?;
        Ok(network.y_out()?.clone())
    }
}

/// Stats recorded at the end of an epoch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// The epoch, starting at 0.
    pub epoch: usize,
    /// Mean training cost over the epoch's mini-batches.
    pub mean_cost: f32,
    /// Mean validation accuracy.
    pub validation_accuracy: f32,
    /// Best validation accuracy up to and including this epoch.
    pub best_validation_accuracy: f32,
}

/// The result of [`Sgd::run()`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// The best mean validation accuracy.
    pub best_validation_accuracy: f32,
    /// The iteration at which the best validation accuracy was reached.
    pub best_iteration: usize,
    /// Mean test accuracy at `best_iteration`, if a test split was provided.
    pub test_accuracy: Option<f32>,
    /// The number of training steps executed.
    pub iterations: usize,
    /// Per epoch stats.
    pub epochs: Vec<EpochStats>,
}

/// Mini-batch stochastic gradient descent.
///
///```no_run
/// # use convnet::{config::SgdConfig, dataset::Split, network::Network, trainer::Sgd};
/// # fn main() -> anyhow::Result<()> {
/// # let (mut net, training, validation, test): (Network, Split, Split, Split) = todo!();
/// let config = SgdConfig {
///     epochs: 60,
///     mini_batch_size: 10,
///     eta: 0.03,
///     lmbda: 0.1,
/// };
/// let mut sgd = Sgd::new(config)?;
/// let summary = sgd.run(&mut net, &training, &validation, Some(&test))?;
/// println!("{}", summary.best_validation_accuracy);
/// # Ok(())
/// # }
///```
#[derive(Debug)]
pub struct Sgd {
    config: SgdConfig,
    optimizer: SGD,
    test_mb_predictions: Option<PredictionsMiniBatch>,
}

impl Sgd {
    /// Creates a trainer.
    ///
    /// **Errors**
    ///
    /// See [`SgdConfig::validate()`].
    pub fn new(config: SgdConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            optimizer: SGD::default(),
            test_mb_predictions: None,
        })
    }
    /// The config.
    pub fn config(&self) -> &SgdConfig {
        &self.config
    }
    /// Trains `network`.
    ///
    /// Each epoch executes one update per full mini-batch of `training`, remaining rows are not
    /// used. The cost is the negative log likelihood plus `0.5 * lmbda / batches` times the sum
    /// of squared weights. After the last mini-batch of an epoch the mean validation accuracy is
    /// computed. When it is at least the best so far, it becomes the best and the mean
    /// `test` accuracy is computed.
    ///
    /// Progress is reported with [`tracing`].
    ///
    /// **Errors**
    ///
    /// Configuration errors are returned before the first update:
    /// - [`ConfigError::MiniBatchSizeMismatch`] if the network was built for another mini-batch
    ///   size.
    /// - [`ConfigError::NoSoftmaxOutput`]
    /// - [`ConfigError::InputWidthMismatch`] if a split does not match the first layer.
    /// - [`ConfigError::EmptySplit`] if a split has less than one mini-batch.
    pub fn run(
        &mut self,
        network: &mut Network,
        training: &Split,
        validation: &Split,
        test: Option<&Split>,
    ) -> Result<Summary> {
        let SgdConfig {
            epochs,
            mini_batch_size,
            eta,
            lmbda,
        } = self.config;
        if network.mini_batch_size() != mini_batch_size {
            return Err(ConfigError::MiniBatchSizeMismatch {
                expected: network.mini_batch_size(),
                found: mini_batch_size,
            }
            .into());
        }
        network.softmax()?;
        check_split(network, "training", training, mini_batch_size)?;
        check_split(network, "validation", validation, mini_batch_size)?;
        if let Some(test) = test {
            check_split(network, "test", test, mini_batch_size)?;
        }
        let num_training_batches = training.batch_count(mini_batch_size);
        let train_mb = TrainMiniBatch {
            givens: Givens::new(training, mini_batch_size),
            eta,
            l2_scale: 0.5 * lmbda / num_training_batches as f32,
            optimizer: self.optimizer,
        };
        let validate_mb_accuracy = AccuracyMiniBatch {
            givens: Givens::new(validation, mini_batch_size),
        };
        let test_mb_accuracy = test.map(|test| AccuracyMiniBatch {
            givens: Givens::new(test, mini_batch_size),
        });
        self.test_mb_predictions = test.map(|test| PredictionsMiniBatch {
            givens: Givens::new(test, mini_batch_size),
        });
        info!(
            "training {num_training_batches} mini-batches of {mini_batch_size} for {epochs} epochs"
        );
        let mut best_validation_accuracy = 0f32;
        let mut best_iteration = 0;
        let mut test_accuracy = None;
        let mut iterations = 0;
        let mut stats = Vec::with_capacity(epochs);
        for epoch in 0..epochs {
            let mut cost_sum = 0f32;
            for minibatch_index in 0..num_training_batches {
                let iteration = num_training_batches * epoch + minibatch_index;
                if iteration % 1000 == 0 {
                    info!("Training mini-batch number {iteration}");
                }
                let cost_ij = train_mb.call(network, minibatch_index)?;
                debug!("iteration {iteration} cost = {cost_ij}");
                cost_sum += cost_ij;
                iterations += 1;
                if (iteration + 1) % num_training_batches == 0 {
                    let validation_accuracy = validate_mb_accuracy.mean(network)?;
                    info!(
                        "Epoch {epoch}: validation accuracy {:.2}%",
                        100. * validation_accuracy
                    );
                    if validation_accuracy >= best_validation_accuracy {
                        info!("This is the best validation accuracy to date.");
                        best_validation_accuracy = validation_accuracy;
                        best_iteration = iteration;
                        if let Some(test_mb_accuracy) = test_mb_accuracy.as_ref() {
                            let accuracy = test_mb_accuracy.mean(network)?;
                            info!("The corresponding test accuracy is {:.2}%", 100. * accuracy);
                            test_accuracy.replace(accuracy);
                        }
                    }
                    stats.push(EpochStats {
                        epoch,
                        mean_cost: cost_sum / num_training_batches as f32,
                        validation_accuracy,
                        best_validation_accuracy,
                    });
                }
            }
        }
        network.set_training(false);
        info!("Finished training network.");
        info!(
            "Best validation accuracy of {:.2}% obtained at iteration {best_iteration}",
            100. * best_validation_accuracy
        );
        if let Some(test_accuracy) = test_accuracy {
            info!("Corresponding test accuracy of {:.2}%", 100. * test_accuracy);
        }
        Ok(Summary {
            best_validation_accuracy,
            best_iteration,
            test_accuracy,
            iterations,
            epochs: stats,
        })
    }
    /// The predicted classes of test mini-batch `index`.
    ///
    /// **Errors**
    ///
    /// [`ConfigError::Unbound`] unless [`.run()`](Sgd::run) was called with a test split.
    pub fn test_mb_predictions(
        &self,
        network: &mut Network,
        index: usize,
    ) -> Result<Array1<usize>> {
        self.test_mb_predictions
            .as_ref()
            .ok_or(ConfigError::Unbound("test"))?
            .call(network, index)
    }
}

fn check_split(
    network: &Network,
    name: &'static str,
    split: &Split,
    mini_batch_size: usize,
) -> Result<()> {
    let inputs = network.inputs();
    if split.features() != inputs {
        return Err(ConfigError::InputWidthMismatch {
            split: name,
            columns: split.features(),
            inputs,
        }
        .into());
    }
    if split.batch_count(mini_batch_size) == 0 {
        return Err(ConfigError::EmptySplit {
            split: name,
            rows: split.len(),
            mini_batch_size,
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests;
