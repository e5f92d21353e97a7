use super::{
    builders::{LayerBuilder, SoftmaxLayerBuilder},
    dropout_not_computed, input_not_set, Layer,
};
use crate::{
    autograd::{
        Parameter, Parameter1, Parameter2, ParameterViewMutD, Tensor, TensorD, Variable0,
        Variable2, VariableD,
    },
    criterion::{Accuracy, Criterion, CrossEntropyLoss},
    device::Device,
    network::Network,
    ops::{add_bias, argmax, dropout, scale, softmax, sum_squares},
};
use anyhow::{Context, Result};
use ndarray::{linalg::Dot, ArcArray1, Array1};

#[derive(Clone, Debug)]
struct Outputs {
    output: Variable2,
    dropout: Option<DropoutOutputs>,
    y_out: Array1<usize>,
}

#[derive(Clone, Debug)]
struct DropoutOutputs {
    logits: Variable2,
    output: Variable2,
}

/// Softmax output layer.
///
/// Computes class probabilities `softmax(x.w + b)` and defines the training cost. The weight and
/// bias are initialized to zero.
#[derive(Clone, Debug)]
pub struct SoftmaxLayer {
    weight: Parameter2,
    bias: Parameter1,
    p_dropout: f32,
    device: Device,
    outputs: Option<Outputs>,
}

impl SoftmaxLayer {
    /// A builder.
    pub fn builder() -> SoftmaxLayerBuilder {
        SoftmaxLayerBuilder::default()
    }
    /// A layer with `n_in` inputs, `n_out` classes and dropout probability `p_dropout`.
    ///
    /// See [`SoftmaxLayerBuilder::build()`].
    pub fn new(n_in: usize, n_out: usize, p_dropout: f32) -> Result<Self> {
        Self::builder()
            .inputs(n_in)
            .outputs(n_out)
            .dropout(p_dropout)
            .build()
    }
    pub(super) fn from_builder(builder: SoftmaxLayerBuilder) -> Result<Self> {
        let SoftmaxLayerBuilder {
            inputs,
            outputs,
            p_dropout,
            device,
        } = builder;
        Ok(Self {
            weight: Parameter::from(Tensor::zeros([inputs, outputs])),
            bias: Parameter::from(Tensor::zeros(outputs)),
            p_dropout,
            device: device.unwrap_or_else(Device::selected),
            outputs: None,
        })
    }
    /// The weight, `[inputs, outputs]`.
    pub fn weight(&self) -> &Parameter2 {
        &self.weight
    }
    /// The bias, `[outputs]`.
    pub fn bias(&self) -> &Parameter1 {
        &self.bias
    }
    /// The dropout probability.
    pub fn p_dropout(&self) -> f32 {
        self.p_dropout
    }
    fn outputs_ref(&self) -> Result<&Outputs> {
        self.outputs
            .as_ref()
            .ok_or_else(|| input_not_set("SoftmaxLayer"))
    }
    fn dropout_ref(&self) -> Result<&DropoutOutputs> {
        self.outputs_ref()?
            .dropout
            .as_ref()
            .ok_or_else(|| dropout_not_computed("SoftmaxLayer"))
    }
    /// The negative log likelihood of the labels of `net` under the dropout output.
    ///
    /// Computed from the dropout logits with [`CrossEntropyLoss`], so the cost stays finite when
    /// the probability of a label underflows.
    ///
    /// **Errors**
    ///
    /// - [`ConfigError::Unbound`](crate::error::ConfigError::Unbound) if `net` has no labels bound.
    /// - [`ConfigError::DropoutNotComputed`](crate::error::ConfigError::DropoutNotComputed) if
    ///   the input was set without a dropout input.
    /// - A label is not a valid class.
    pub fn cost(&self, net: &Network) -> Result<Variable0> {
        let logits = self.dropout_ref()?.logits.clone();
        CrossEntropyLoss.eval(logits, net.y()?.view())
    }
    /// The predicted class of each row, the argmax of the primary output.
    pub fn y_out(&self) -> Result<&Array1<usize>> {
        Ok(&self.outputs_ref()?.y_out)
    }
    /// The fraction of [`.y_out()`](Self::y_out) equal to `y`.
    pub fn accuracy(&self, y: &ArcArray1<u32>) -> Result<f32> {
        Accuracy.eval(self.y_out()?, y)
    }
}

impl Layer for SoftmaxLayer {
    fn inputs(&self) -> usize {
        self.weight.shape()[0]
    }
    fn outputs(&self) -> usize {
        self.weight.shape()[1]
    }
    fn device(&self) -> Device {
        self.device
    }
    fn set_inpt(
        &mut self,
        inpt: VariableD,
        inpt_dropout: Option<VariableD>,
        mini_batch_size: usize,
    ) -> Result<()> {
        let shape = [mini_batch_size, self.inputs()];
        let context = || format!("SoftmaxLayer input can not be reshaped to {shape:?}!");
        let weight = self.weight.to_variable();
        let bias = self.bias.to_variable();
        let inpt = inpt.into_shape(shape).with_context(context)?;
        let output = softmax(add_bias(
            scale(inpt.dot(&weight)?, 1. - self.p_dropout),
            &bias,
        )?);
        let y_out = argmax(output.value().view());
        let dropout_outputs = if let Some(inpt_dropout) = inpt_dropout {
            let inpt_dropout = dropout(
                inpt_dropout.into_shape(shape).with_context(context)?,
                self.p_dropout,
            )?;
            let logits = add_bias(inpt_dropout.dot(&weight)?, &bias)?;
            let output = softmax(logits.clone());
            Some(DropoutOutputs { logits, output })
        } else {
            None
        };
        self.outputs.replace(Outputs {
            output,
            dropout: dropout_outputs,
            y_out,
        });
        Ok(())
    }
    fn output(&self) -> Result<VariableD> {
        Ok(self.outputs_ref()?.output.clone().into_dyn())
    }
    fn output_dropout(&self) -> Result<VariableD> {
        Ok(self.dropout_ref()?.output.clone().into_dyn())
    }
    fn weight_squared_sum(&self) -> Variable0 {
        sum_squares(&self.weight.to_variable())
    }
    fn parameters(&self) -> Vec<TensorD> {
        vec![
            self.weight.value().clone().into_dyn(),
            self.bias.value().clone().into_dyn(),
        ]
    }
    fn parameters_mut(&mut self) -> Vec<ParameterViewMutD> {
        vec![
            self.weight.make_view_mut().into_dyn(),
            self.bias.make_view_mut().into_dyn(),
        ]
    }
    fn set_training(&mut self, training: bool) {
        self.weight.set_training(training);
        self.bias.set_training(training);
    }
}
