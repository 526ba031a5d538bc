//! Typed failures raised while building or transforming expression graphs.
//!
//! Every error here is a programmer-facing contract violation reported
//! synchronously at the offending construction or traversal step. Nothing is
//! deferred to a later validation pass, and a failed construction leaves the
//! session untouched.

use thiserror::Error;

use crate::array::NodeId;
use crate::dtype::DType;

/// Failure modes of graph construction, rewriting, and partitioning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Operand shapes are incompatible under the operation's rule
    /// (broadcasting, reduction axis bounds, reshape element counts,
    /// stack/concatenate agreement).
    #[error("shape mismatch in `{op}`: {detail}")]
    ShapeMismatch { op: &'static str, detail: String },

    /// Operand dtypes cannot be unified under the promotion table, or the
    /// operation rejects the dtype outright.
    #[error("dtype error in `{op}`: {lhs:?} and {rhs:?} cannot be combined")]
    DtypeMismatch { op: &'static str, lhs: DType, rhs: DType },

    /// A symbolic size parameter was used where a concrete value is required,
    /// but no binding for it exists in the session.
    #[error("size parameter `{name}` is unbound but a concrete value is required")]
    UnboundSizeParam { name: String },

    /// The requested placement cannot be linearized: the partitions named
    /// here depend on each other, directly or through other partitions.
    #[error("partitions `{a}` and `{b}` cannot be ordered: placement induces a dependency cycle")]
    PartitionCycle { a: String, b: String },

    /// A mapper override re-entered a node whose result is still being
    /// computed. The expression graph itself is acyclic by construction, so
    /// this only fires on faulty rewrite rules.
    #[error("traversal re-entered node {node} before its result was available")]
    TraversalCycle { node: NodeId },
}

impl GraphError {
    pub(crate) fn shape(op: &'static str, detail: impl Into<String>) -> Self {
        GraphError::ShapeMismatch {
            op,
            detail: detail.into(),
        }
    }

    pub(crate) fn dtype(op: &'static str, lhs: DType, rhs: DType) -> Self {
        GraphError::DtypeMismatch { op, lhs, rhs }
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
