use super::{
    builders::{FullyConnectedLayerBuilder, LayerBuilder},
    dropout_not_computed, input_not_set, normal, rng, Layer,
};
use crate::{
    autograd::{
        Parameter, Parameter1, Parameter2, ParameterViewMutD, TensorD, Variable0, Variable2,
        VariableD,
    },
    criterion::{Accuracy, Criterion},
    device::Device,
    ops::{add_bias, argmax, dropout, scale, sum_squares, Activation},
};
use anyhow::{Context, Result};
use ndarray::{linalg::Dot, ArcArray1, Array1, Ix1, Ix2};

#[derive(Clone, Debug)]
struct Outputs {
    output: Variable2,
    output_dropout: Option<Variable2>,
    y_out: Array1<usize>,
}

/// Fully connected layer.
///
/// Computes `activation(x.w + b)` with `w` of shape `[inputs, outputs]`.
///
/// The weight is initialized from N(0, 1 / sqrt(outputs)) and the bias from N(0, 1).
#[derive(Clone, Debug)]
pub struct FullyConnectedLayer {
    weight: Parameter2,
    bias: Parameter1,
    activation: Activation,
    p_dropout: f32,
    device: Device,
    outputs: Option<Outputs>,
}

impl FullyConnectedLayer {
    /// A builder.
    pub fn builder() -> FullyConnectedLayerBuilder {
        FullyConnectedLayerBuilder::default()
    }
    /// A layer with `n_in` inputs, `n_out` outputs, `activation` and dropout probability
    /// `p_dropout`.
    ///
    /// See [`FullyConnectedLayerBuilder::build()`].
    pub fn new(n_in: usize, n_out: usize, activation: Activation, p_dropout: f32) -> Result<Self> {
        Self::builder()
            .inputs(n_in)
            .outputs(n_out)
            .activation(activation)
            .dropout(p_dropout)
            .build()
    }
    pub(super) fn from_builder(builder: FullyConnectedLayerBuilder) -> Result<Self> {
        let FullyConnectedLayerBuilder {
            inputs,
            outputs,
            activation,
            p_dropout,
            device,
            seed,
        } = builder;
        let mut rng = rng(seed);
        let std_dev = (1. / outputs as f32).sqrt();
        let weight = Parameter::from(normal(Ix2(inputs, outputs), std_dev, &mut rng)?);
        let bias = Parameter::from(normal(Ix1(outputs), 1., &mut rng)?);
        Ok(Self {
            weight,
            bias,
            activation,
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
    /// The activation.
    pub fn activation(&self) -> Activation {
        self.activation
    }
    /// The dropout probability.
    pub fn p_dropout(&self) -> f32 {
        self.p_dropout
    }
    fn outputs_ref(&self) -> Result<&Outputs> {
        self.outputs
            .as_ref()
            .ok_or_else(|| input_not_set("FullyConnectedLayer"))
    }
    /// The index of the largest primary output of each row.
    pub fn y_out(&self) -> Result<&Array1<usize>> {
        Ok(&self.outputs_ref()?.y_out)
    }
    /// The fraction of [`.y_out()`](Self::y_out) equal to `y`.
    pub fn accuracy(&self, y: &ArcArray1<u32>) -> Result<f32> {
        Accuracy.eval(self.y_out()?, y)
    }
}

fn reshape_error(shape: [usize; 2]) -> String {
    format!("FullyConnectedLayer input can not be reshaped to {shape:?}!")
}

impl Layer for FullyConnectedLayer {
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
        let weight = self.weight.to_variable();
        let bias = self.bias.to_variable();
        let inpt = inpt.into_shape(shape).with_context(|| reshape_error(shape))?;
        let output = self.activation.forward(add_bias(
            scale(inpt.dot(&weight)?, 1. - self.p_dropout),
            &bias,
        )?);
        let y_out = argmax(output.value().view());
        let output_dropout = if let Some(inpt_dropout) = inpt_dropout {
            let inpt_dropout = inpt_dropout
                .into_shape(shape)
                .with_context(|| reshape_error(shape))?;
            let inpt_dropout = dropout(inpt_dropout, self.p_dropout)?;
            Some(
                self.activation
                    .forward(add_bias(inpt_dropout.dot(&weight)?, &bias)?),
            )
        } else {
            None
        };
        self.outputs.replace(Outputs {
            output,
            output_dropout,
            y_out,
        });
        Ok(())
    }
    fn output(&self) -> Result<VariableD> {
        Ok(self.outputs_ref()?.output.clone().into_dyn())
    }
    fn output_dropout(&self) -> Result<VariableD> {
        self.outputs_ref()?
            .output_dropout
            .clone()
            .map(Variable2::into_dyn)
            .ok_or_else(|| dropout_not_computed("FullyConnectedLayer"))
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
