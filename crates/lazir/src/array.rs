//! The expression node model: immutable, reference-counted DAG nodes with
//! structural sharing, plus the named-results container handed to
//! transforms and code generation.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::dtype::DType;
use crate::error::{GraphError, Result};
use crate::scalar::{ScalarExpr, ScalarLiteral};
use crate::session::SessionId;
use crate::shape::Shape;

/// Session-local identity of an interned node. Two references carrying the
/// same id (within one session) point at the same node object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Opaque scheduling/placement metadata attached to a node. The core never
/// interprets values beyond equality; because nodes are immutable and
/// interned, tags participate in structural identity and re-tagging builds
/// a new node.
pub type Tags = BTreeMap<String, String>;

/// A literal array value embedded in a [`ArrayKind::Constant`] node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Literal {
    dtype: DType,
    dims: Vec<usize>,
    values: Vec<ScalarLiteral>,
}

impl Literal {
    /// Builds a literal, checking that the value count matches the dims and
    /// every value fits the dtype's class.
    pub fn new(dtype: DType, dims: Vec<usize>, values: Vec<ScalarLiteral>) -> Result<Self> {
        let count: usize = dims.iter().product();
        if count != values.len() {
            return Err(GraphError::shape(
                "constant",
                format!("{} values for {count} elements", values.len()),
            ));
        }
        for value in &values {
            if !value.fits(dtype) {
                return Err(GraphError::dtype("constant", value.dtype(), dtype));
            }
        }
        Ok(Literal {
            dtype,
            dims,
            values,
        })
    }

    pub fn scalar(value: impl Into<ScalarLiteral>) -> Self {
        let value = value.into();
        Literal {
            dtype: value.dtype(),
            dims: Vec::new(),
            values: vec![value],
        }
    }

    pub fn vector_f64(values: Vec<f64>) -> Self {
        Literal {
            dtype: DType::F64,
            dims: vec![values.len()],
            values: values.into_iter().map(ScalarLiteral::Float).collect(),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn values(&self) -> &[ScalarLiteral] {
        &self.values
    }

    pub fn shape(&self) -> Shape {
        Shape::from_static(&self.dims)
    }
}

/// Closed set of node variants. Every consumer (inference, rebuild,
/// partitioning, digesting) matches totally over this enum.
#[derive(Debug, Clone)]
pub enum ArrayKind {
    /// Named external input with fixed shape/dtype; its value is supplied at
    /// execution time, outside this core.
    Placeholder { name: String },
    /// Embedded literal array value.
    Constant { literal: Literal },
    /// Opaque reference to an externally managed concrete array.
    DataWrapper { name: String },
    /// Scalar index expression over named operand bindings; carries both
    /// elementwise and reduction computation.
    IndexLambda {
        expr: ScalarExpr,
        bindings: BTreeMap<String, ArrayRef>,
    },
    /// Change of shape; the target lives in the node's own `shape`.
    Reshape { input: ArrayRef },
    /// Reorder of axes by the given permutation.
    AxisPermutation { input: ArrayRef, axes: Vec<usize> },
    /// Join of equal-shaped operands along a new axis.
    Stack { operands: Vec<ArrayRef>, axis: usize },
    /// Join of operands along an existing axis.
    Concatenate { operands: Vec<ArrayRef>, axis: usize },
}

impl ArrayKind {
    /// Short operation name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            ArrayKind::Placeholder { .. } => "placeholder",
            ArrayKind::Constant { .. } => "constant",
            ArrayKind::DataWrapper { .. } => "data_wrapper",
            ArrayKind::IndexLambda { .. } => "index_lambda",
            ArrayKind::Reshape { .. } => "reshape",
            ArrayKind::AxisPermutation { .. } => "axis_permutation",
            ArrayKind::Stack { .. } => "stack",
            ArrayKind::Concatenate { .. } => "concatenate",
        }
    }
}

/// One interned node of the expression DAG. Immutable after construction:
/// shape and dtype are inferred exactly once, when the node is built.
#[derive(Debug)]
pub struct ArrayNode {
    pub id: NodeId,
    pub session: SessionId,
    pub kind: ArrayKind,
    pub shape: Shape,
    pub dtype: DType,
    pub tags: Tags,
}

/// Shared handle to an interned node. Equality and hashing go through the
/// session-assigned identity, which is O(1) and correct because structurally
/// equal nodes are deduplicated at construction.
#[derive(Debug, Clone)]
pub struct ArrayRef(Rc<ArrayNode>);

impl ArrayRef {
    pub(crate) fn new(node: ArrayNode) -> Self {
        ArrayRef(Rc::new(node))
    }

    pub fn id(&self) -> NodeId {
        self.0.id
    }

    pub fn session_id(&self) -> SessionId {
        self.0.session
    }

    pub fn kind(&self) -> &ArrayKind {
        &self.0.kind
    }

    pub fn shape(&self) -> &Shape {
        &self.0.shape
    }

    pub fn dtype(&self) -> DType {
        self.0.dtype
    }

    pub fn ndim(&self) -> usize {
        self.0.shape.rank()
    }

    pub fn tags(&self) -> &Tags {
        &self.0.tags
    }

    /// Operand nodes in a fixed deterministic order (index-lambda bindings
    /// iterate by binding name).
    pub fn operands(&self) -> SmallVec<[ArrayRef; 2]> {
        match self.kind() {
            ArrayKind::Placeholder { .. }
            | ArrayKind::Constant { .. }
            | ArrayKind::DataWrapper { .. } => SmallVec::new(),
            ArrayKind::IndexLambda { bindings, .. } => {
                bindings.values().cloned().collect()
            }
            ArrayKind::Reshape { input } | ArrayKind::AxisPermutation { input, .. } => {
                let mut operands = SmallVec::new();
                operands.push(input.clone());
                operands
            }
            ArrayKind::Stack { operands, .. } | ArrayKind::Concatenate { operands, .. } => {
                operands.iter().cloned().collect()
            }
        }
    }
}

impl Deref for ArrayRef {
    type Target = ArrayNode;

    fn deref(&self) -> &ArrayNode {
        &self.0
    }
}

impl PartialEq for ArrayRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.session == other.0.session && self.0.id == other.0.id
    }
}

impl Eq for ArrayRef {}

impl std::hash::Hash for ArrayRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.session.hash(state);
        self.0.id.hash(state);
    }
}

/// Ordered mapping from output name to root node: the externally visible
/// result of a construction session and the unit consumed by the transform
/// and partition pipeline.
#[derive(Debug, Clone, Default)]
pub struct DictOfNamedArrays {
    entries: BTreeMap<String, ArrayRef>,
}

impl DictOfNamedArrays {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the dict from name/root pairs. Panics on a duplicate name or
    /// on roots from different sessions; both are caller bugs, not runtime
    /// conditions.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, ArrayRef)>) -> Self {
        let mut dict = Self::new();
        for (name, root) in pairs {
            dict.insert(name, root);
        }
        dict
    }

    pub fn insert(&mut self, name: impl Into<String>, root: ArrayRef) {
        let name = name.into();
        if let Some(existing) = self.entries.values().next() {
            assert_eq!(
                existing.session_id(),
                root.session_id(),
                "all named results must come from one session"
            );
        }
        let previous = self.entries.insert(name.clone(), root);
        assert!(previous.is_none(), "output name `{name}` is already taken");
    }

    pub fn get(&self, name: &str) -> Option<&ArrayRef> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArrayRef)> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn roots(&self) -> impl Iterator<Item = &ArrayRef> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a DictOfNamedArrays {
    type Item = (&'a String, &'a ArrayRef);
    type IntoIter = std::collections::btree_map::Iter<'a, String, ArrayRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
