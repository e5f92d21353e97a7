use anyhow::{ensure, Result};
use ndarray::{
    linalg::Dot, ArcArray, ArrayViewMut, Dimension, IntoDimension, Ix0, Ix1, Ix2, Ix4, IxDyn,
    ShapeError,
};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{HashMap, VecDeque},
    fmt::{self, Debug},
    marker::PhantomData,
    sync::{Arc, Weak},
};

/// A shared f32 tensor.
pub type Tensor<D> = ArcArray<f32, D>;
/// Dynamic dimensional [`Tensor`].
pub type TensorD = Tensor<IxDyn>;

type GradLock = Arc<RwLock<Option<TensorD>>>;

/// Builders.
pub mod builder {
    use super::*;

    /// VariableBuilder.
    ///
    ///```no_run
    /// # use anyhow::Result;
    /// # use convnet::autograd::{Tensor, Variable, Variable2};
    /// # let input: Variable2 = todo!();
    /// let mut builder = Variable::builder();
    /// if let Some(node) = input.node() {
    ///     // Add an edge computing the input gradient from the output gradient.
    ///     builder.edge(node, |output_grad: Tensor<_>| -> Result<Tensor<_>> { todo!() });
    /// }
    /// let output_value: Tensor<_> = todo!();
    /// # let _: Variable2 = {
    /// builder.build(output_value)
    /// # };
    ///```
    pub struct VariableBuilder<D: Dimension> {
        grad: Option<GradLock>,
        edges: Vec<EdgeInner>,
        _m: PhantomData<D>,
    }

    impl<D: Dimension + 'static> VariableBuilder<D> {
        pub(super) fn new() -> Self {
            Self {
                grad: None,
                edges: Vec::new(),
                _m: PhantomData,
            }
        }
        /// Adds an edge.
        ///
        /// During the backward pass, for each edge to `node`, `f` computes the gradient of `node`
        /// given the gradient of `self`.
        /// When multiple edges compute the same gradient, they are added together.
        pub fn edge<D2, F>(&mut self, node: &Node<D2>, f: F)
        where
            D2: Dimension + 'static,
            F: FnOnce(Tensor<D>) -> Result<Tensor<D2>> + Send + Sync + 'static,
        {
            let output_grad_lock = self.grad.get_or_insert_with(GradLock::default).clone();
            let mut output_grad_lock = Some(output_grad_lock);
            let node = node.inner.clone();
            let mut input_grad_lock = Arc::downgrade(&node.grad);
            let dim = node.dim.clone();
            let name = std::any::type_name::<F>();
            let mut f = Some(f);
            let op = Box::new(move || -> Result<()> {
                let input_grad_lock = Weak::upgrade(&std::mem::take(&mut input_grad_lock));
                if let Some((f, (input_grad_lock, output_grad_lock))) =
                    f.take().zip(input_grad_lock.zip(output_grad_lock.take()))
                {
                    let grad = output_grad_lock.read().clone();
                    std::mem::drop(output_grad_lock);
                    let Some(grad) = grad else {
                        return Ok(());
                    };
                    let grad = (f)(grad.into_dimensionality()?)?;
                    ensure!(
                        grad.shape() == dim.slice(),
                        "{name} computed gradient {:?}, expected {:?}!",
                        grad.shape(),
                        dim.slice()
                    );
                    let mut guard = input_grad_lock.write();
                    if let Some(input_grad) = guard.as_mut() {
                        *input_grad += &grad.into_dyn();
                    } else {
                        guard.replace(grad.into_dyn());
                    }
                }
                Ok(())
            });
            self.edges.push(EdgeInner { name, op, node })
        }
        /// Builds the variable with `value`.
        pub fn build(self, value: Tensor<D>) -> Variable<D> {
            let node = self
                .grad
                .map(|grad| Node::new(value.raw_dim().into_dyn(), grad, self.edges));
            Variable { value, node }
        }
    }
}
use builder::*;

struct EdgeInner {
    name: &'static str,
    op: Box<dyn FnMut() -> Result<()> + Send + Sync + 'static>,
    node: Arc<NodeInner>,
}

impl Debug for EdgeInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeInner")
            .field("name", &self.name)
            .field("node", &self.node)
            .finish()
    }
}

#[derive(Debug)]
struct NodeInner {
    dim: IxDyn,
    grad: GradLock,
    edges: Mutex<Vec<EdgeInner>>,
}

impl NodeInner {
    fn key(self: &Arc<Self>) -> *const NodeInner {
        Arc::as_ptr(self)
    }
}

/// Node.
///
/// Nodes store gradients and are connected via [`VariableBuilder::edge()`] to
/// form a graph that is traversed in [`.backward()`](Node::backward).
#[derive(Clone, Debug)]
pub struct Node<D: Dimension> {
    inner: Arc<NodeInner>,
    _m: PhantomData<D>,
}

impl<D: Dimension> Node<D> {
    fn new(dim: IxDyn, grad: GradLock, edges: Vec<EdgeInner>) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                dim,
                grad,
                edges: Mutex::new(edges),
            }),
            _m: PhantomData,
        }
    }
    /// The gradient.
    pub fn grad(&self) -> Option<Tensor<D>> {
        self.inner.grad.read().clone()?.into_dimensionality().ok()
    }
    /// Executes the backward pass.
    pub fn backward(&self) -> Result<()> {
        let grad = TensorD::ones(self.inner.dim.clone()).into_dimensionality::<D>()?;
        self.backward_grad(grad)
    }
    /// Executes the backward pass with `grad`.
    ///
    /// Only edges reachable from this node are executed. An edge runs once every
    /// reachable consumer of its output has contributed to the gradient, so branches
    /// that do not lead here (ie an unused inference path) never block the pass.
    pub fn backward_grad(&self, grad: Tensor<D>) -> Result<()> {
        {
            let mut guard = self.inner.grad.write();
            if guard.is_some() {
                return Ok(());
            }
            guard.replace(grad.into_dyn());
        }
        let mut pending = HashMap::<*const NodeInner, usize>::new();
        let mut stack = vec![self.inner.clone()];
        while let Some(node) = stack.pop() {
            for edge in node.edges.lock().iter() {
                let count = pending.entry(edge.node.key()).or_default();
                if *count == 0 {
                    stack.push(edge.node.clone());
                }
                *count += 1;
            }
        }
        let mut queue = VecDeque::new();
        queue.push_back(self.inner.clone());
        while let Some(node) = queue.pop_front() {
            let edges = std::mem::take(&mut *node.edges.lock());
            std::mem::drop(node);
            for mut edge in edges {
                (edge.op)()?;
                let node = edge.node;
                if let Some(count) = pending.get_mut(&node.key()) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(node);
                    }
                }
            }
        }
        Ok(())
    }
    fn into_dimensionality<D2: Dimension>(self) -> Node<D2> {
        Node {
            inner: self.inner,
            _m: PhantomData,
        }
    }
}

/// Variable.
///
/// Variables are tensors with an optional [`Node`] that stores a gradient. Numerical operations
/// on variables with a node create a graph of edges that is traversed during the backward pass
/// to compute the gradients.
///
/// Variables can be created from tensors via [`From`].
/// Use [`builder()`](Variable::builder) to create a Variable as a function of another variable.
#[derive(Clone, Debug)]
pub struct Variable<D: Dimension> {
    value: Tensor<D>,
    node: Option<Node<D>>,
}

/// Variable with 1 element
pub type Variable0 = Variable<Ix0>;
/// Variable with 1 dimension
pub type Variable1 = Variable<Ix1>;
/// Variable with 2 dimensions
pub type Variable2 = Variable<Ix2>;
/// Variable with 4 dimensions
pub type Variable4 = Variable<Ix4>;
/// Variable with dynamic dimensions
pub type VariableD = Variable<IxDyn>;

impl<D: Dimension + 'static> Variable<D> {
    /// A `VariableBuilder` for creating nodes and edges.
    pub fn builder() -> VariableBuilder<D> {
        VariableBuilder::new()
    }
    /// The value of the variable.
    pub fn value(&self) -> &Tensor<D> {
        &self.value
    }
    /// The node.
    pub fn node(&self) -> Option<&Node<D>> {
        self.node.as_ref()
    }
    /// The gradient, if computed.
    pub fn grad(&self) -> Option<Tensor<D>> {
        self.node.as_ref()?.grad()
    }
    /// The shape.
    pub fn shape(&self) -> &[usize] {
        self.value.shape()
    }
    /// The dim in pattern form.
    pub fn dim(&self) -> D::Pattern {
        self.value.dim()
    }
    /// The dim.
    pub fn raw_dim(&self) -> D {
        self.value.raw_dim()
    }
    /// Converts into dimensionality `D2`.
    pub fn into_dimensionality<D2>(self) -> Result<Variable<D2>, ShapeError>
    where
        D2: Dimension,
    {
        let value = self.value.into_dimensionality()?;
        Ok(Variable {
            value,
            node: self.node.map(Node::into_dimensionality),
        })
    }
    /// Converts into a dynamic dimensional variable.
    pub fn into_dyn(self) -> VariableD {
        Variable {
            value: self.value.into_dyn(),
            node: self.node.map(Node::into_dimensionality),
        }
    }
    /// Converts into `shape`.
    ///
    /// The elements are read in row major order.
    pub fn into_shape<E>(self, shape: E) -> Result<Variable<E::Dim>, ShapeError>
    where
        E: IntoDimension,
        E::Dim: 'static,
    {
        let dim = self.raw_dim();
        let mut builder = Variable::<E::Dim>::builder();
        if let Some(node) = self.node() {
            builder.edge(node, |output_grad| {
                Ok(standard_layout(output_grad).into_shape(dim)?)
            })
        }
        Ok(builder.build(standard_layout(self.value).into_shape(shape)?))
    }
}

/// Ensures `tensor` is in row major order, copying if necessary.
pub(crate) fn standard_layout<D: Dimension>(tensor: Tensor<D>) -> Tensor<D> {
    if tensor.is_standard_layout() {
        tensor
    } else {
        tensor.as_standard_layout().into_owned().into_shared()
    }
}

impl Variable0 {
    /// Executes the backward pass.
    ///
    /// See [`Node::backward`].
    pub fn backward(&self) -> Result<()> {
        if let Some(node) = self.node.as_ref() {
            node.backward()?;
        }
        Ok(())
    }
    /// The scalar value.
    pub fn scalar(&self) -> f32 {
        self.value[()]
    }
}

impl<D: Dimension> From<Tensor<D>> for Variable<D> {
    fn from(tensor: Tensor<D>) -> Self {
        Self {
            value: tensor,
            node: None,
        }
    }
}

impl Dot<Self> for Variable2 {
    type Output = Result<Self>;
    fn dot(&self, rhs: &Self) -> Result<Self> {
        let lhs = self;
        let (m, k) = lhs.dim();
        let (k2, n) = rhs.dim();
        ensure!(k == k2, "Can not dot [{m}, {k}] with [{k2}, {n}]!");
        let mut builder = Self::builder();
        if let Some(node) = lhs.node() {
            let rhs = rhs.value().clone();
            builder.edge(node, move |output_grad| {
                Ok(output_grad.dot(&rhs.t()).into_shared())
            });
        }
        if let Some(node) = rhs.node() {
            let lhs = lhs.value().clone();
            builder.edge(node, move |output_grad| {
                Ok(lhs.t().dot(&output_grad).into_shared())
            });
        }
        let value = lhs.value().dot(rhs.value()).into_shared();
        Ok(builder.build(value))
    }
}

/// Parameter.
///
/// Parameter values are updated during training by the
/// [`Optimizer`](crate::optimizer::Optimizer). A Parameter can be converted to a
/// [`Variable`] via [`.to_variable()`](Parameter::to_variable), which allows it to be used
/// in operations. During training, [`.set_training(true)`](Parameter::set_training)
/// ensures that the variable created from this parameter has a [`Node`], and every
/// variable created from the parameter shares its gradient.
#[derive(Clone)]
pub struct Parameter<D: Dimension> {
    value: Tensor<D>,
    grad: Option<GradLock>,
}

/// Parameter with 1 dimension.
pub type Parameter1 = Parameter<Ix1>;
/// Parameter with 2 dimensions.
pub type Parameter2 = Parameter<Ix2>;
/// Parameter with 4 dimensions.
pub type Parameter4 = Parameter<Ix4>;

impl<D: Dimension> Parameter<D> {
    /// The value of the parameter.
    pub fn value(&self) -> &Tensor<D> {
        &self.value
    }
    /// The gradient of the parameter.
    pub fn grad(&self) -> Option<Tensor<D>> {
        self.grad.as_ref()?.read().clone()?.into_dimensionality().ok()
    }
    /// The shape.
    pub fn shape(&self) -> &[usize] {
        self.value.shape()
    }
    /// The dim.
    pub fn raw_dim(&self) -> D {
        self.value.raw_dim()
    }
    /// Whether gradients are tracked.
    pub fn is_training(&self) -> bool {
        self.grad.is_some()
    }
    /// Enables / disables training.
    ///
    /// If `training`, ensures that when the parameter is converted to a [`Variable`],
    /// it will have a [`Node`] for computing a gradient.
    /// If `training` is false, discards any gradient that has been computed.
    pub fn set_training(&mut self, training: bool) {
        if training && self.grad.is_none() {
            self.grad.replace(GradLock::default());
        } else if !training {
            self.grad = None;
        }
    }
    /// Converts to a `Variable`.
    pub fn to_variable(&self) -> Variable<D> {
        let value = self.value.clone();
        let node = self
            .grad
            .as_ref()
            .map(|grad| Node::new(value.raw_dim().into_dyn(), grad.clone(), Vec::new()));
        Variable { value, node }
    }
    /// Makes a mutable parameter view.
    ///
    /// Copies the value if it is shared.
    pub fn make_view_mut(&mut self) -> ParameterViewMut<D> {
        ParameterViewMut {
            value: self.value.view_mut(),
            grad: self.grad.clone(),
        }
    }
}

impl<D: Dimension> From<Tensor<D>> for Parameter<D> {
    fn from(tensor: Tensor<D>) -> Self {
        Self {
            value: tensor,
            grad: None,
        }
    }
}

impl<D: Dimension> Debug for Parameter<D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("shape", &self.shape())
            .field("training", &self.is_training())
            .finish()
    }
}

/// Mutable parameter view.
///
/// Borrowed from a layer's [`Parameter`] for an optimizer update.
pub struct ParameterViewMut<'a, D: Dimension> {
    value: ArrayViewMut<'a, f32, D>,
    grad: Option<GradLock>,
}

/// Mutable parameter view with dynamic dimensions.
pub type ParameterViewMutD<'a> = ParameterViewMut<'a, IxDyn>;

impl<'a, D: Dimension> ParameterViewMut<'a, D> {
    /// The value.
    pub fn value_view_mut(&mut self) -> &mut ArrayViewMut<'a, f32, D> {
        &mut self.value
    }
    /// The gradient.
    pub fn grad(&self) -> Option<TensorD> {
        self.grad.as_ref()?.read().clone()
    }
    /// Takes the gradient, leaving none.
    pub fn take_grad(&mut self) -> Option<TensorD> {
        self.grad.as_ref()?.write().take()
    }
    /// The shape.
    pub fn shape(&self) -> &[usize] {
        self.value.shape()
    }
    /// Converts into a dynamic dimensional view.
    pub fn into_dyn(self) -> ParameterViewMutD<'a> {
        ParameterViewMut {
            value: self.value.into_dyn(),
            grad: self.grad,
        }
    }
}
