//! Construction sessions: the explicit, dependency-injected context that
//! owns the interning cache and the size-parameter table.
//!
//! Every constructor infers the result shape/dtype up front, so a failing
//! call adds nothing to the graph or the cache, and then interns the node
//! under its structural key: the variant, the operand identities, the
//! auxiliary parameters, and the tags. Because operands are themselves
//! already interned, hashing by operand identity is O(1) per node and
//! common-subexpression elimination falls out of construction itself.
//!
//! Caches are session-scoped. Node identity is meaningless across sessions,
//! so sessions share no state and independent sessions need no
//! synchronization.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use log::trace;
use rustc_hash::FxHashMap;

use crate::array::{ArrayKind, ArrayNode, ArrayRef, Literal, NodeId, Tags};
use crate::dtype::{binary_result_dtype, reduce_result_dtype, unary_result_dtype, DType};
use crate::error::{GraphError, Result};
use crate::scalar::{BinaryScalarOp, ReduceOp, ScalarExpr, ScalarLiteral, UnaryScalarOp};
use crate::shape::{
    broadcast, check_axis, concatenated_shape, permuted_shape, reduced_shape, resolved_reshape,
    stacked_shape, Dim, ReshapeDim, Shape, SizeParam,
};

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a construction session. Node ids are only
/// comparable between nodes carrying the same session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

/// Structural identity of a node: variant, operand ids, auxiliary
/// parameters, and tags. Operands are referenced by interned identity, not
/// by deep recursion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NodeKey {
    kind: KindKey,
    shape: Shape,
    dtype: DType,
    tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KindKey {
    Placeholder { name: String },
    Constant { literal: Literal },
    DataWrapper { name: String },
    IndexLambda { expr: ScalarExpr, bindings: Vec<(String, NodeId)> },
    Reshape { input: NodeId },
    AxisPermutation { input: NodeId, axes: Vec<usize> },
    Stack { operands: Vec<NodeId>, axis: usize },
    Concatenate { operands: Vec<NodeId>, axis: usize },
}

impl KindKey {
    fn of(kind: &ArrayKind) -> Self {
        match kind {
            ArrayKind::Placeholder { name } => KindKey::Placeholder { name: name.clone() },
            ArrayKind::Constant { literal } => KindKey::Constant {
                literal: literal.clone(),
            },
            ArrayKind::DataWrapper { name } => KindKey::DataWrapper { name: name.clone() },
            ArrayKind::IndexLambda { expr, bindings } => KindKey::IndexLambda {
                expr: expr.clone(),
                bindings: bindings
                    .iter()
                    .map(|(name, operand)| (name.clone(), operand.id()))
                    .collect(),
            },
            ArrayKind::Reshape { input } => KindKey::Reshape { input: input.id() },
            ArrayKind::AxisPermutation { input, axes } => KindKey::AxisPermutation {
                input: input.id(),
                axes: axes.clone(),
            },
            ArrayKind::Stack { operands, axis } => KindKey::Stack {
                operands: operands.iter().map(ArrayRef::id).collect(),
                axis: *axis,
            },
            ArrayKind::Concatenate { operands, axis } => KindKey::Concatenate {
                operands: operands.iter().map(ArrayRef::id).collect(),
                axis: *axis,
            },
        }
    }
}

#[derive(Default)]
struct SessionState {
    next_node: u32,
    cache: FxHashMap<NodeKey, ArrayRef>,
    size_params: FxHashMap<SizeParam, Option<usize>>,
    placeholders: FxHashMap<String, (Shape, DType)>,
}

/// A single construction session. Created fresh per graph, dropped when the
/// graph is finalized; the interning cache never leaks across sessions.
pub struct Session {
    id: SessionId,
    state: RefCell<SessionState>,
}

impl Session {
    pub fn new() -> Self {
        Session {
            id: SessionId(SESSION_COUNTER.fetch_add(1, Ordering::Relaxed)),
            state: RefCell::new(SessionState::default()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Number of distinct nodes interned so far.
    pub fn node_count(&self) -> usize {
        self.state.borrow().cache.len()
    }

    // --- size parameters -------------------------------------------------

    /// Declares (or re-uses) a named symbolic axis length.
    pub fn size_param(&self, name: impl Into<String>) -> Dim {
        let param = SizeParam::new(name);
        self.state
            .borrow_mut()
            .size_params
            .entry(param.clone())
            .or_insert(None);
        Dim::Sym(param)
    }

    /// Binds a size parameter to a concrete value. Rebinding to the same
    /// value is a no-op; a conflicting rebind is an error because all users
    /// of the name must agree.
    pub fn bind_size_param(&self, name: &str, value: usize) -> Result<()> {
        let param = SizeParam::new(name);
        let mut state = self.state.borrow_mut();
        let slot = state.size_params.entry(param).or_insert(None);
        match slot {
            Some(existing) if *existing != value => Err(GraphError::shape(
                "bind_size_param",
                format!("`{name}` is already bound to {existing}, cannot rebind to {value}"),
            )),
            _ => {
                *slot = Some(value);
                Ok(())
            }
        }
    }

    /// Resolves every axis of `shape` to a concrete length using the
    /// session's bindings.
    pub fn concretize(&self, shape: &Shape) -> Result<Vec<usize>> {
        let state = self.state.borrow();
        shape
            .dims()
            .iter()
            .map(|dim| match dim {
                Dim::Static(value) => Ok(*value),
                Dim::Sym(param) => state
                    .size_params
                    .get(param)
                    .copied()
                    .flatten()
                    .ok_or_else(|| GraphError::UnboundSizeParam {
                        name: param.as_str().to_string(),
                    }),
            })
            .collect()
    }

    // --- leaf constructors -----------------------------------------------

    /// Declares a named external input. Re-declaring a name is fine as long
    /// as shape and dtype agree; the original node is returned.
    pub fn placeholder(
        &self,
        name: impl Into<String>,
        shape: Shape,
        dtype: DType,
    ) -> Result<ArrayRef> {
        let name = name.into();
        {
            let mut state = self.state.borrow_mut();
            match state.placeholders.get(&name) {
                Some((known_shape, known_dtype)) => {
                    if *known_shape != shape {
                        return Err(GraphError::shape(
                            "placeholder",
                            format!(
                                "`{name}` is already declared with shape {known_shape}, got {shape}"
                            ),
                        ));
                    }
                    if *known_dtype != dtype {
                        return Err(GraphError::dtype("placeholder", *known_dtype, dtype));
                    }
                }
                None => {
                    state
                        .placeholders
                        .insert(name.clone(), (shape.clone(), dtype));
                }
            }
        }
        Ok(self.intern(ArrayKind::Placeholder { name }, shape, dtype, Tags::new()))
    }

    /// Embeds a literal array value.
    pub fn constant(&self, literal: Literal) -> ArrayRef {
        let shape = literal.shape();
        let dtype = literal.dtype();
        self.intern(ArrayKind::Constant { literal }, shape, dtype, Tags::new())
    }

    pub fn scalar(&self, value: impl Into<ScalarLiteral>) -> ArrayRef {
        self.constant(Literal::scalar(value))
    }

    /// Wraps an externally managed concrete array; the payload stays outside
    /// this core and is resolved by the execution backend by name.
    pub fn data_wrapper(&self, name: impl Into<String>, shape: Shape, dtype: DType) -> ArrayRef {
        self.intern(
            ArrayKind::DataWrapper { name: name.into() },
            shape,
            dtype,
            Tags::new(),
        )
    }

    // --- index lambdas ---------------------------------------------------

    /// General index-lambda constructor with a caller-declared result type.
    /// Every binding referenced by the expression must be present and
    /// subscripted with exactly as many indices as its rank, and every
    /// output index variable must name an axis of the declared shape. This
    /// is what keeps a rewrite from splicing a differently-ranked operand
    /// into an existing expression.
    pub fn index_lambda(
        &self,
        expr: ScalarExpr,
        bindings: BTreeMap<String, ArrayRef>,
        shape: Shape,
        dtype: DType,
    ) -> Result<ArrayRef> {
        check_lambda_expr(&expr, shape.rank(), &bindings)?;
        for operand in bindings.values() {
            self.check_operand(operand);
        }
        Ok(self.intern(
            ArrayKind::IndexLambda { expr, bindings },
            shape,
            dtype,
            Tags::new(),
        ))
    }

    /// Applies an elementwise unary operator.
    pub fn unary(&self, op: UnaryScalarOp, input: &ArrayRef) -> Result<ArrayRef> {
        self.check_operand(input);
        let dtype = unary_result_dtype(op, input.dtype())?;
        let shape = input.shape().clone();
        let expr = ScalarExpr::Unary {
            op,
            inner: Box::new(ScalarExpr::full_ref("in0", shape.rank())),
        };
        let bindings = BTreeMap::from([("in0".to_string(), input.clone())]);
        self.index_lambda(expr, bindings, shape, dtype)
    }

    /// Applies an elementwise binary operator with NumPy-style broadcasting
    /// and dtype promotion.
    pub fn binary(&self, op: BinaryScalarOp, lhs: &ArrayRef, rhs: &ArrayRef) -> Result<ArrayRef> {
        self.check_operand(lhs);
        self.check_operand(rhs);
        let shape = broadcast(op.name(), lhs.shape(), rhs.shape())?;
        let dtype = binary_result_dtype(op, lhs.dtype(), rhs.dtype())?;
        let expr = ScalarExpr::Binary {
            op,
            lhs: Box::new(ScalarExpr::broadcast_ref("in0", lhs.shape(), shape.rank())),
            rhs: Box::new(ScalarExpr::broadcast_ref("in1", rhs.shape(), shape.rank())),
        };
        let bindings = BTreeMap::from([
            ("in0".to_string(), lhs.clone()),
            ("in1".to_string(), rhs.clone()),
        ]);
        self.index_lambda(expr, bindings, shape, dtype)
    }

    /// Reduces one axis with the given combiner.
    pub fn reduce(&self, op: ReduceOp, input: &ArrayRef, axis: usize) -> Result<ArrayRef> {
        self.check_operand(input);
        let shape = reduced_shape(op.name(), input.shape(), axis)?;
        let dtype = reduce_result_dtype(op, input.dtype());
        // Subscript of the operand: surviving axes use the output indices in
        // order, the reduced axis uses the reduction-bound index.
        let mut indices = Vec::with_capacity(input.ndim());
        let mut out_axis = 0;
        for in_axis in 0..input.ndim() {
            if in_axis == axis {
                indices.push(ScalarExpr::ReduceIndex(0));
            } else {
                indices.push(ScalarExpr::Index(out_axis));
                out_axis += 1;
            }
        }
        let expr = ScalarExpr::Reduce {
            op,
            extents: vec![input.shape().dims()[axis].clone()],
            body: Box::new(ScalarExpr::Ref {
                binding: "in0".to_string(),
                indices,
            }),
        };
        let bindings = BTreeMap::from([("in0".to_string(), input.clone())]);
        self.index_lambda(expr, bindings, shape, dtype)
    }

    /// Selects a single position along an axis, dropping that axis.
    pub fn index_axis(&self, input: &ArrayRef, axis: usize, position: usize) -> Result<ArrayRef> {
        self.check_operand(input);
        check_axis("index_axis", input.shape(), axis)?;
        if let Some(extent) = input.shape().dims()[axis].as_static() {
            if position >= extent {
                return Err(GraphError::shape(
                    "index_axis",
                    format!("position {position} out of range for axis of length {extent}"),
                ));
            }
        }
        let shape = reduced_shape("index_axis", input.shape(), axis)?;
        let mut indices = Vec::with_capacity(input.ndim());
        let mut out_axis = 0;
        for in_axis in 0..input.ndim() {
            if in_axis == axis {
                indices.push(ScalarExpr::Literal(ScalarLiteral::Int(position as i64)));
            } else {
                indices.push(ScalarExpr::Index(out_axis));
                out_axis += 1;
            }
        }
        let expr = ScalarExpr::Ref {
            binding: "in0".to_string(),
            indices,
        };
        let bindings = BTreeMap::from([("in0".to_string(), input.clone())]);
        let dtype = input.dtype();
        self.index_lambda(expr, bindings, shape, dtype)
    }

    // --- structural constructors -----------------------------------------

    /// Reshapes to the requested target; at most one axis may be inferred.
    pub fn reshape(
        &self,
        input: &ArrayRef,
        target: impl IntoIterator<Item = ReshapeDim>,
    ) -> Result<ArrayRef> {
        self.check_operand(input);
        let target: Vec<ReshapeDim> = target.into_iter().collect();
        let shape = resolved_reshape("reshape", input.shape(), &target)?;
        let dtype = input.dtype();
        Ok(self.intern(
            ArrayKind::Reshape {
                input: input.clone(),
            },
            shape,
            dtype,
            Tags::new(),
        ))
    }

    /// Reorders axes by the given permutation.
    pub fn axis_permutation(&self, input: &ArrayRef, axes: Vec<usize>) -> Result<ArrayRef> {
        self.check_operand(input);
        let shape = permuted_shape("axis_permutation", input.shape(), &axes)?;
        let dtype = input.dtype();
        Ok(self.intern(
            ArrayKind::AxisPermutation {
                input: input.clone(),
                axes,
            },
            shape,
            dtype,
            Tags::new(),
        ))
    }

    /// Stacks equal-shaped operands along a fresh axis.
    pub fn stack(&self, operands: &[ArrayRef], axis: usize) -> Result<ArrayRef> {
        for operand in operands {
            self.check_operand(operand);
        }
        let shapes: Vec<&Shape> = operands.iter().map(ArrayRef::shape).collect();
        let shape = stacked_shape("stack", &shapes, axis)?;
        let dtype = self.unified_dtype("stack", operands)?;
        Ok(self.intern(
            ArrayKind::Stack {
                operands: operands.to_vec(),
                axis,
            },
            shape,
            dtype,
            Tags::new(),
        ))
    }

    /// Concatenates operands along an existing axis.
    pub fn concatenate(&self, operands: &[ArrayRef], axis: usize) -> Result<ArrayRef> {
        for operand in operands {
            self.check_operand(operand);
        }
        let shapes: Vec<&Shape> = operands.iter().map(ArrayRef::shape).collect();
        let shape = concatenated_shape("concatenate", &shapes, axis)?;
        let dtype = self.unified_dtype("concatenate", operands)?;
        Ok(self.intern(
            ArrayKind::Concatenate {
                operands: operands.to_vec(),
                axis,
            },
            shape,
            dtype,
            Tags::new(),
        ))
    }

    // --- tags ------------------------------------------------------------

    /// Returns a copy of `node` with one extra tag. The original node is
    /// untouched; the result is interned like any other node.
    pub fn tagged(
        &self,
        node: &ArrayRef,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> ArrayRef {
        let mut tags = node.tags().clone();
        tags.insert(key.into(), value.into());
        self.with_tags(node, tags)
    }

    /// Returns a copy of `node` without the given tag, which must be
    /// present.
    pub fn without_tag(&self, node: &ArrayRef, key: &str) -> ArrayRef {
        let mut tags = node.tags().clone();
        let removed = tags.remove(key);
        assert!(removed.is_some(), "tag `{key}` is not present");
        self.with_tags(node, tags)
    }

    /// Re-interns `node` with its tag mapping replaced wholesale.
    pub fn with_tags(&self, node: &ArrayRef, tags: Tags) -> ArrayRef {
        self.check_operand(node);
        self.intern(
            node.kind().clone(),
            node.shape().clone(),
            node.dtype(),
            tags,
        )
    }

    // --- elementwise sugar -----------------------------------------------

    pub fn add(&self, lhs: &ArrayRef, rhs: &ArrayRef) -> Result<ArrayRef> {
        self.binary(BinaryScalarOp::Add, lhs, rhs)
    }

    pub fn sub(&self, lhs: &ArrayRef, rhs: &ArrayRef) -> Result<ArrayRef> {
        self.binary(BinaryScalarOp::Sub, lhs, rhs)
    }

    pub fn mul(&self, lhs: &ArrayRef, rhs: &ArrayRef) -> Result<ArrayRef> {
        self.binary(BinaryScalarOp::Mul, lhs, rhs)
    }

    pub fn div(&self, lhs: &ArrayRef, rhs: &ArrayRef) -> Result<ArrayRef> {
        self.binary(BinaryScalarOp::Div, lhs, rhs)
    }

    pub fn neg(&self, input: &ArrayRef) -> Result<ArrayRef> {
        self.unary(UnaryScalarOp::Neg, input)
    }

    pub fn exp(&self, input: &ArrayRef) -> Result<ArrayRef> {
        self.unary(UnaryScalarOp::Exp, input)
    }

    pub fn reduce_sum(&self, input: &ArrayRef, axis: usize) -> Result<ArrayRef> {
        self.reduce(ReduceOp::Sum, input, axis)
    }

    pub fn reduce_max(&self, input: &ArrayRef, axis: usize) -> Result<ArrayRef> {
        self.reduce(ReduceOp::Max, input, axis)
    }

    // --- interning -------------------------------------------------------

    fn unified_dtype(&self, op: &'static str, operands: &[ArrayRef]) -> Result<DType> {
        let mut operands = operands.iter();
        let first = operands
            .next()
            .expect("operand presence is checked by shape inference")
            .dtype();
        for operand in operands {
            if operand.dtype() != first {
                return Err(GraphError::dtype(op, first, operand.dtype()));
            }
        }
        Ok(first)
    }

    fn check_operand(&self, operand: &ArrayRef) {
        assert_eq!(
            operand.session_id(),
            self.id,
            "operand {} was built by a different session",
            operand.id()
        );
    }

    fn intern(&self, kind: ArrayKind, shape: Shape, dtype: DType, tags: Tags) -> ArrayRef {
        let key = NodeKey {
            kind: KindKey::of(&kind),
            shape: shape.clone(),
            dtype,
            tags: tags.clone(),
        };
        let mut state = self.state.borrow_mut();
        if let Some(existing) = state.cache.get(&key) {
            trace!("intern hit: {} -> {}", kind.name(), existing.id());
            return existing.clone();
        }
        let id = NodeId(state.next_node);
        state.next_node += 1;
        let node = ArrayRef::new(ArrayNode {
            id,
            session: self.id,
            kind,
            shape,
            dtype,
            tags,
        });
        trace!("intern new: {} as {}", node.kind().name(), id);
        state.cache.insert(key, node.clone());
        node
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Validates an index-lambda body against its bindings and the declared
/// output rank: bindings must exist, every `Ref` carries one subscript per
/// operand axis, and `Index` never names an axis past the output rank.
fn check_lambda_expr(
    expr: &ScalarExpr,
    out_rank: usize,
    bindings: &BTreeMap<String, ArrayRef>,
) -> Result<()> {
    match expr {
        ScalarExpr::Literal(_) | ScalarExpr::ReduceIndex(_) => Ok(()),
        ScalarExpr::Index(axis) => {
            if *axis >= out_rank {
                return Err(GraphError::shape(
                    "index_lambda",
                    format!("output index _{axis} out of range for rank {out_rank}"),
                ));
            }
            Ok(())
        }
        ScalarExpr::Ref { binding, indices } => {
            let operand = bindings.get(binding).ok_or_else(|| {
                GraphError::shape(
                    "index_lambda",
                    format!("expression references unknown binding `{binding}`"),
                )
            })?;
            if indices.len() != operand.ndim() {
                return Err(GraphError::shape(
                    "index_lambda",
                    format!(
                        "`{binding}` has rank {} but is subscripted with {} indices",
                        operand.ndim(),
                        indices.len()
                    ),
                ));
            }
            for index in indices {
                check_lambda_expr(index, out_rank, bindings)?;
            }
            Ok(())
        }
        ScalarExpr::Unary { inner, .. } => check_lambda_expr(inner, out_rank, bindings),
        ScalarExpr::Binary { lhs, rhs, .. } => {
            check_lambda_expr(lhs, out_rank, bindings)?;
            check_lambda_expr(rhs, out_rank, bindings)
        }
        ScalarExpr::Reduce { body, .. } => check_lambda_expr(body, out_rank, bindings),
    }
}
