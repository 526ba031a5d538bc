//! Lazy array-expression IR: build symbolic array computations as an
//! immutable, deduplicated DAG, then rewrite and partition them without
//! ever executing anything.

pub mod array;
pub mod dtype;
pub mod error;
pub mod fingerprint;
pub mod partition;
pub mod scalar;
pub mod session;
pub mod shape;
pub mod transform;

pub use array::{ArrayKind, ArrayNode, ArrayRef, DictOfNamedArrays, Literal, NodeId, Tags};
pub use dtype::DType;
pub use error::{GraphError, Result};
pub use partition::{partition, GraphPart, PartitionKey, PartitionedGraph};
pub use scalar::{BinaryScalarOp, ReduceOp, ScalarExpr, ScalarLiteral, UnaryScalarOp};
pub use session::{Session, SessionId};
pub use shape::{Dim, ReshapeDim, Shape, SizeParam};
pub use transform::{rewrite_dict, rewrite_root, Analysis, Analyzer, RewriteRule, Rewriter};
