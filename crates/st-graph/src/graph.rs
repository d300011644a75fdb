// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Define-by-run computation graph with reverse-mode autodiff.
//!
//! Operator calls append records to an append-only op list; [`Node`] handles
//! are cheap indices into it. `forward` lazily evaluates the subgraph below a
//! node and memoizes every intermediate value, `backward` walks the records
//! in reverse insertion order (which is a topological order by construction)
//! and accumulates gradients into nodes and registered trainables.
//!
//! Graphs capture trainable values at evaluation time, so a graph is meant to
//! be cleared (or replaced) after each update step.

use crate::device::{DeviceExt, DeviceRef};
use crate::error::{Error, Result};
use crate::shape::Shape;
use crate::tensor::{elementwise_shape, matmul_shape, transpose_shape, Tensor};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::trace;

/// Seam between the graph and learnable state living outside it.
///
/// The model layer implements this for its parameters; the graph only needs
/// to read the current value and push accumulated gradients back.
pub trait Trainable {
    /// Current value of the trainable tensor.
    fn value_tensor(&self) -> Result<Tensor>;

    /// Adds `grad` into the trainable's gradient buffer.
    fn accumulate_gradient(&mut self, grad: &Tensor) -> Result<()>;
}

pub(crate) enum Op {
    Input(Tensor),
    Parameter(Rc<RefCell<dyn Trainable>>),
    Neg,
    Sqrt,
    Exp,
    Log,
    Tanh,
    Sigmoid,
    Softplus,
    Sin,
    Cos,
    Prelu(f32),
    Elu(f32),
    AddConst(f32),
    SubConst(f32),
    RsubConst(f32),
    MulConst(f32),
    DivConst(f32),
    RdivConst(f32),
    Add,
    Sub,
    Mul,
    Div,
    Matmul,
    Transpose,
    Reshape(Shape),
    Sum(usize),
    LogSumExp(usize),
    Broadcast(usize, u32),
    BatchSum,
}

struct Record {
    op: Op,
    args: Vec<usize>,
    shape: Shape,
    device: DeviceRef,
    value: Option<Tensor>,
    grad: Option<Tensor>,
}

struct GraphImpl {
    generation: u64,
    records: Vec<Record>,
}

/// Cheaply cloneable handle to a computation graph.
#[derive(Clone)]
pub struct Graph {
    inner: Rc<RefCell<GraphImpl>>,
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        write!(
            f,
            "Graph(records={}, generation={})",
            inner.records.len(),
            inner.generation
        )
    }
}

/// Handle to one value inside a [`Graph`].
#[derive(Clone)]
pub struct Node {
    graph: Graph,
    generation: u64,
    id: usize,
    shape: Shape,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Node(id={}, shape={})", self.id, self.shape)
    }
}

impl Graph {
    /// Creates an empty graph.
    pub fn new() -> Graph {
        Graph {
            inner: Rc::new(RefCell::new(GraphImpl {
                generation: 0,
                records: Vec::new(),
            })),
        }
    }

    /// Number of recorded operations.
    pub fn len(&self) -> usize {
        self.inner.borrow().records.len()
    }

    /// Returns whether no operation has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every record and invalidates all outstanding nodes.
    pub fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        trace!(records = inner.records.len(), "clearing graph");
        inner.records.clear();
        inner.generation += 1;
    }

    fn check_node(&self, node: &Node) -> Result<()> {
        if !Rc::ptr_eq(&self.inner, &node.graph.inner) {
            return Err(Error::ForeignNode);
        }
        if self.inner.borrow().generation != node.generation {
            return Err(Error::StaleNode);
        }
        Ok(())
    }

    fn push(&self, op: Op, args: Vec<usize>, shape: Shape, device: DeviceRef) -> Node {
        let mut inner = self.inner.borrow_mut();
        let id = inner.records.len();
        inner.records.push(Record {
            op,
            args,
            shape: shape.clone(),
            device,
            value: None,
            grad: None,
        });
        Node {
            graph: self.clone(),
            generation: inner.generation,
            id,
            shape,
        }
    }

    /// Registers a constant input value.
    pub fn add_input(&self, value: Tensor) -> Node {
        let shape = value.shape().clone();
        let device = value.device().clone();
        self.push(Op::Input(value), Vec::new(), shape, device)
    }

    /// Registers a trainable leaf; its value is read at evaluation time and
    /// gradients flow back through [`Trainable::accumulate_gradient`].
    pub fn add_trainable(&self, binding: Rc<RefCell<dyn Trainable>>) -> Result<Node> {
        let value = binding.borrow().value_tensor()?;
        let shape = value.shape().clone();
        let device = value.device().clone();
        Ok(self.push(Op::Parameter(binding), Vec::new(), shape, device))
    }

    pub(crate) fn add_unary(&self, x: &Node, op: Op) -> Result<Node> {
        self.check_node(x)?;
        let shape = infer_unary_shape(&op, &x.shape)?;
        let device = self.inner.borrow().records[x.id].device.clone();
        Ok(self.push(op, vec![x.id], shape, device))
    }

    pub(crate) fn add_binary(&self, a: &Node, b: &Node, op: Op) -> Result<Node> {
        self.check_node(a)?;
        self.check_node(b)?;
        let shape = match op {
            Op::Matmul => matmul_shape(&a.shape, &b.shape)?,
            _ => elementwise_shape(&a.shape, &b.shape)?,
        };
        let device = self.inner.borrow().records[a.id].device.clone();
        Ok(self.push(op, vec![a.id, b.id], shape, device))
    }

    /// Evaluates the subgraph below `node` and returns its value.
    ///
    /// Intermediate values are memoized; repeated calls reuse them.
    pub fn forward(&self, node: &Node) -> Result<Tensor> {
        self.check_node(node)?;
        let mut inner = self.inner.borrow_mut();
        let mut needed = vec![false; node.id + 1];
        let mut stack = vec![node.id];
        while let Some(id) = stack.pop() {
            if needed[id] {
                continue;
            }
            needed[id] = true;
            if inner.records[id].value.is_none() {
                stack.extend(inner.records[id].args.iter().copied());
            }
        }
        for id in 0..=node.id {
            if !needed[id] || inner.records[id].value.is_some() {
                continue;
            }
            let value = evaluate(&inner.records, id)?;
            inner.records[id].value = Some(value);
        }
        trace!(id = node.id, "forward pass complete");
        match &inner.records[node.id].value {
            Some(value) => Ok(value.clone()),
            None => Err(Error::InvalidArgument("forward failed to produce a value")),
        }
    }

    /// Runs reverse-mode differentiation from `node`, seeding with ones.
    ///
    /// Gradients accumulate into every record of the evaluated subgraph and,
    /// for trainable leaves, into the bound [`Trainable`].
    pub fn backward(&self, node: &Node) -> Result<()> {
        let value = self.forward(node)?;
        let seed = value
            .device()
            .new_tensor_by_constant(value.shape().clone(), 1.0)?;
        let mut inner = self.inner.borrow_mut();
        accumulate(&mut inner.records[node.id].grad, seed)?;
        for id in (0..=node.id).rev() {
            let grad = match inner.records[id].grad.clone() {
                Some(grad) => grad,
                None => continue,
            };
            let input_grads = differentiate(&inner.records, id, &grad)?;
            let args = inner.records[id].args.clone();
            for (arg, maybe_grad) in args.into_iter().zip(input_grads) {
                if let Some(g) = maybe_grad {
                    let reduced = reduce_to(g, &inner.records[arg].shape)?;
                    accumulate(&mut inner.records[arg].grad, reduced)?;
                }
            }
            if let Op::Parameter(binding) = &inner.records[id].op {
                binding.borrow_mut().accumulate_gradient(&grad)?;
            }
        }
        trace!(id = node.id, "backward pass complete");
        Ok(())
    }

    /// Returns the gradient accumulated at `node` by a previous backward run.
    pub fn gradient(&self, node: &Node) -> Result<Tensor> {
        self.check_node(node)?;
        self.inner.borrow().records[node.id]
            .grad
            .clone()
            .ok_or(Error::InvalidArgument(
                "no gradient has been accumulated at this node",
            ))
    }
}

fn infer_unary_shape(op: &Op, shape: &Shape) -> Result<Shape> {
    match op {
        Op::Sum(dim) | Op::LogSumExp(dim) => shape.resize_dim(*dim, 1),
        Op::Broadcast(dim, size) => {
            if shape.at(*dim) != 1 {
                return Err(Error::InvalidArgument(
                    "broadcast requires the target dimension to be one",
                ));
            }
            shape.resize_dim(*dim, *size)
        }
        Op::BatchSum => shape.resize_batch(1),
        Op::Transpose => transpose_shape(shape),
        Op::Reshape(target) => {
            if target.volume() != shape.volume() {
                return Err(Error::ShapeMismatch {
                    left: shape.clone(),
                    right: target.clone(),
                });
            }
            target.resize_batch(shape.batch())
        }
        _ => Ok(shape.clone()),
    }
}

fn value_of(records: &[Record], id: usize) -> Result<Tensor> {
    records[id]
        .value
        .clone()
        .ok_or(Error::InvalidArgument("operand has not been evaluated"))
}

fn evaluate(records: &[Record], id: usize) -> Result<Tensor> {
    let record = &records[id];
    let arg = |i: usize| value_of(records, record.args[i]);
    match &record.op {
        Op::Input(value) => Ok(value.clone()),
        Op::Parameter(binding) => binding.borrow().value_tensor(),
        Op::Neg => Ok(arg(0)?.neg()),
        Op::Sqrt => Ok(arg(0)?.sqrt()),
        Op::Exp => Ok(arg(0)?.exp()),
        Op::Log => Ok(arg(0)?.log()),
        Op::Tanh => Ok(arg(0)?.tanh()),
        Op::Sigmoid => Ok(arg(0)?.sigmoid()),
        Op::Softplus => Ok(arg(0)?.softplus()),
        Op::Sin => Ok(arg(0)?.sin()),
        Op::Cos => Ok(arg(0)?.cos()),
        Op::Prelu(a) => Ok(arg(0)?.prelu(*a)),
        Op::Elu(a) => Ok(arg(0)?.elu(*a)),
        Op::AddConst(k) => Ok(arg(0)?.add_const(*k)),
        Op::SubConst(k) => Ok(arg(0)?.sub_const(*k)),
        Op::RsubConst(k) => Ok(arg(0)?.rsub_const(*k)),
        Op::MulConst(k) => Ok(arg(0)?.mul_const(*k)),
        Op::DivConst(k) => Ok(arg(0)?.div_const(*k)),
        Op::RdivConst(k) => Ok(arg(0)?.rdiv_const(*k)),
        Op::Add => arg(0)?.add(&arg(1)?),
        Op::Sub => arg(0)?.sub(&arg(1)?),
        Op::Mul => arg(0)?.mul(&arg(1)?),
        Op::Div => arg(0)?.div(&arg(1)?),
        Op::Matmul => arg(0)?.matmul(&arg(1)?),
        Op::Transpose => arg(0)?.transpose(),
        Op::Reshape(target) => arg(0)?.reshape(target),
        Op::Sum(dim) => arg(0)?.sum(*dim),
        Op::LogSumExp(dim) => arg(0)?.logsumexp(*dim),
        Op::Broadcast(dim, size) => arg(0)?.broadcast(*dim, *size),
        Op::BatchSum => arg(0)?.batch_sum(),
    }
}

/// Gradients of one record with respect to each of its arguments.
fn differentiate(records: &[Record], id: usize, g: &Tensor) -> Result<Vec<Option<Tensor>>> {
    let record = &records[id];
    let arg = |i: usize| value_of(records, record.args[i]);
    let out = || value_of(records, id);
    Ok(match &record.op {
        Op::Input(_) | Op::Parameter(_) => Vec::new(),
        Op::Neg => vec![Some(g.neg())],
        Op::Sqrt => vec![Some(g.div(&out()?.mul_const(2.0))?)],
        Op::Exp => vec![Some(g.mul(&out()?)?)],
        Op::Log => vec![Some(g.div(&arg(0)?)?)],
        Op::Tanh => {
            let y = out()?;
            vec![Some(g.mul(&y.mul(&y)?.rsub_const(1.0))?)]
        }
        Op::Sigmoid => {
            let y = out()?;
            vec![Some(g.mul(&y.mul(&y.rsub_const(1.0))?)?)]
        }
        Op::Softplus => vec![Some(g.mul(&arg(0)?.sigmoid())?)],
        Op::Sin => vec![Some(g.mul(&arg(0)?.cos())?)],
        Op::Cos => vec![Some(g.mul(&arg(0)?.sin())?.neg())],
        Op::Prelu(a) => vec![Some(g.mul(&arg(0)?.prelu_grad(*a))?)],
        Op::Elu(a) => vec![Some(g.mul(&arg(0)?.elu_grad(*a))?)],
        Op::AddConst(_) | Op::SubConst(_) => vec![Some(g.clone())],
        Op::RsubConst(_) => vec![Some(g.neg())],
        Op::MulConst(k) => vec![Some(g.mul_const(*k))],
        Op::DivConst(k) => vec![Some(g.div_const(*k))],
        Op::RdivConst(k) => {
            let x = arg(0)?;
            vec![Some(g.mul(&x.mul(&x)?.rdiv_const(-*k))?)]
        }
        Op::Add => vec![Some(g.clone()), Some(g.clone())],
        Op::Sub => vec![Some(g.clone()), Some(g.neg())],
        Op::Mul => vec![Some(g.mul(&arg(1)?)?), Some(g.mul(&arg(0)?)?)],
        Op::Div => {
            let (a, b) = (arg(0)?, arg(1)?);
            let ga = g.div(&b)?;
            let gb = g.mul(&a.div(&b.mul(&b)?)?)?.neg();
            vec![Some(ga), Some(gb)]
        }
        Op::Matmul => {
            let (a, b) = (arg(0)?, arg(1)?);
            let ga = g.matmul(&b.transpose()?)?;
            let gb = a.transpose()?.matmul(g)?;
            vec![Some(ga), Some(gb)]
        }
        Op::Transpose => vec![Some(g.transpose()?)],
        // The data layout is untouched, so the gradient just takes the
        // input's shape back.
        Op::Reshape(_) => vec![Some(g.reshape(arg(0)?.shape())?)],
        Op::Sum(dim) => {
            let x = arg(0)?;
            vec![Some(g.broadcast(*dim, x.shape().at(*dim))?)]
        }
        Op::LogSumExp(dim) => {
            let x = arg(0)?;
            let n = x.shape().at(*dim);
            let yb = out()?.broadcast(*dim, n)?;
            let softmax = x.sub(&yb)?.exp();
            vec![Some(g.broadcast(*dim, n)?.mul(&softmax)?)]
        }
        Op::Broadcast(dim, _) => vec![Some(g.sum(*dim)?)],
        Op::BatchSum => {
            let x = arg(0)?;
            vec![Some(g.broadcast_batch(x.shape().batch())?)]
        }
    })
}

fn accumulate(slot: &mut Option<Tensor>, grad: Tensor) -> Result<()> {
    *slot = Some(match slot.take() {
        Some(existing) => existing.add(&grad)?,
        None => grad,
    });
    Ok(())
}

/// Reduces a flowing gradient onto an operand shape that was broadcast
/// during the forward pass.
fn reduce_to(mut g: Tensor, target: &Shape) -> Result<Tensor> {
    if g.shape().batch() != target.batch() {
        if target.batch() == 1 {
            g = g.batch_sum()?;
        } else {
            return Err(Error::BatchMismatch {
                left: g.shape().batch(),
                right: target.batch(),
            });
        }
    }
    if target.is_scalar() && !g.shape().is_scalar() {
        g = g.sum_all();
    }
    if !g.shape().has_same_dims(target) {
        return Err(Error::ShapeMismatch {
            left: g.shape().clone(),
            right: target.clone(),
        });
    }
    Ok(g)
}

impl Node {
    /// Returns the inferred shape of the node's value.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the graph this node belongs to.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Evaluates the node.
    pub fn forward(&self) -> Result<Tensor> {
        self.graph.forward(self)
    }

    /// Evaluates the node and copies the values out.
    pub fn to_vec(&self) -> Result<Vec<f32>> {
        Ok(self.forward()?.to_vec())
    }

    /// Runs backward from this node.
    pub fn backward(&self) -> Result<()> {
        self.graph.backward(self)
    }

    pub fn neg(&self) -> Result<Node> {
        self.graph.add_unary(self, Op::Neg)
    }

    pub fn add(&self, other: &Node) -> Result<Node> {
        self.graph.add_binary(self, other, Op::Add)
    }

    pub fn sub(&self, other: &Node) -> Result<Node> {
        self.graph.add_binary(self, other, Op::Sub)
    }

    pub fn mul(&self, other: &Node) -> Result<Node> {
        self.graph.add_binary(self, other, Op::Mul)
    }

    pub fn div(&self, other: &Node) -> Result<Node> {
        self.graph.add_binary(self, other, Op::Div)
    }

    pub fn add_const(&self, k: f32) -> Result<Node> {
        self.graph.add_unary(self, Op::AddConst(k))
    }

    /// `self - k`.
    pub fn sub_const(&self, k: f32) -> Result<Node> {
        self.graph.add_unary(self, Op::SubConst(k))
    }

    /// `k - self`.
    pub fn rsub_const(&self, k: f32) -> Result<Node> {
        self.graph.add_unary(self, Op::RsubConst(k))
    }

    pub fn mul_const(&self, k: f32) -> Result<Node> {
        self.graph.add_unary(self, Op::MulConst(k))
    }

    /// `self / k`.
    pub fn div_const(&self, k: f32) -> Result<Node> {
        self.graph.add_unary(self, Op::DivConst(k))
    }

    /// `k / self`.
    pub fn rdiv_const(&self, k: f32) -> Result<Node> {
        self.graph.add_unary(self, Op::RdivConst(k))
    }

    pub fn matmul(&self, other: &Node) -> Result<Node> {
        self.graph.add_binary(self, other, Op::Matmul)
    }

    pub fn transpose(&self) -> Result<Node> {
        self.graph.add_unary(self, Op::Transpose)
    }

    /// Reinterprets the per-sample layout; the volume must not change.
    pub fn reshape(&self, shape: &Shape) -> Result<Node> {
        self.graph.add_unary(self, Op::Reshape(shape.clone()))
    }

    /// Reshapes each sample into a column vector.
    pub fn flatten(&self) -> Result<Node> {
        self.reshape(&Shape::new(&[self.shape.volume() as u32], 1)?)
    }

    pub fn sqrt(&self) -> Result<Node> {
        self.graph.add_unary(self, Op::Sqrt)
    }

    pub fn exp(&self) -> Result<Node> {
        self.graph.add_unary(self, Op::Exp)
    }

    pub fn log(&self) -> Result<Node> {
        self.graph.add_unary(self, Op::Log)
    }

    pub fn tanh(&self) -> Result<Node> {
        self.graph.add_unary(self, Op::Tanh)
    }

    pub fn sigmoid(&self) -> Result<Node> {
        self.graph.add_unary(self, Op::Sigmoid)
    }

    pub fn softplus(&self) -> Result<Node> {
        self.graph.add_unary(self, Op::Softplus)
    }

    pub fn sin(&self) -> Result<Node> {
        self.graph.add_unary(self, Op::Sin)
    }

    pub fn cos(&self) -> Result<Node> {
        self.graph.add_unary(self, Op::Cos)
    }

    pub fn prelu(&self, a: f32) -> Result<Node> {
        self.graph.add_unary(self, Op::Prelu(a))
    }

    pub fn elu(&self, a: f32) -> Result<Node> {
        self.graph.add_unary(self, Op::Elu(a))
    }

    pub fn relu(&self) -> Result<Node> {
        self.prelu(0.0)
    }

    pub fn lrelu(&self) -> Result<Node> {
        self.prelu(0.01)
    }

    pub fn sum(&self, dim: usize) -> Result<Node> {
        self.graph.add_unary(self, Op::Sum(dim))
    }

    pub fn logsumexp(&self, dim: usize) -> Result<Node> {
        self.graph.add_unary(self, Op::LogSumExp(dim))
    }

    pub fn broadcast(&self, dim: usize, size: u32) -> Result<Node> {
        self.graph.add_unary(self, Op::Broadcast(dim, size))
    }

    pub fn batch_sum(&self) -> Result<Node> {
        self.graph.add_unary(self, Op::BatchSum)
    }
}

thread_local! {
    static DEFAULT_GRAPH: RefCell<Option<Graph>> = const { RefCell::new(None) };
}

/// Installs the default graph used by the free-function operator layer.
pub fn set_default(graph: &Graph) {
    DEFAULT_GRAPH.with(|slot| *slot.borrow_mut() = Some(graph.clone()));
}

/// Returns the current default graph, failing when none is installed.
pub fn get_default() -> Result<Graph> {
    DEFAULT_GRAPH
        .with(|slot| slot.borrow().clone())
        .ok_or(Error::NoDefaultGraph)
}
