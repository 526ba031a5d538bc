//! Symbolic shapes: per-axis sizes that are either concrete integers or
//! named size parameters, plus the shape rules shared by all constructors
//! (broadcasting, reshape resolution, stack/concatenate agreement).
//!
//! Symbolic axes compare by parameter name only. Two distinct parameter
//! names are never assumed equal, and a symbolic axis is never assumed to be
//! broadcastable size 1.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

/// Names a symbolic axis length bound to a concrete value only when the
/// graph is concretized (e.g. `n` in shape `(n, 4)`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SizeParam(Arc<str>);

impl SizeParam {
    pub fn new(name: impl Into<String>) -> Self {
        Self(Arc::<str>::from(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SizeParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for SizeParam {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SizeParam {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(SizeParam::new(name))
    }
}

/// A single axis length: a concrete integer or a named size parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dim {
    Static(usize),
    Sym(SizeParam),
}

impl Dim {
    pub fn as_static(&self) -> Option<usize> {
        match self {
            Dim::Static(value) => Some(*value),
            Dim::Sym(_) => None,
        }
    }

    fn is_one(&self) -> bool {
        matches!(self, Dim::Static(1))
    }
}

impl From<usize> for Dim {
    fn from(value: usize) -> Self {
        Dim::Static(value)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Static(value) => write!(f, "{value}"),
            Dim::Sym(param) => write!(f, "{param}"),
        }
    }
}

/// Logical dimensions of an array expression. Rank 0 denotes a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<Dim>,
}

impl Shape {
    pub fn new(dims: impl Into<Vec<Dim>>) -> Self {
        Shape { dims: dims.into() }
    }

    pub fn scalar() -> Self {
        Shape { dims: Vec::new() }
    }

    pub fn from_static(dims: &[usize]) -> Self {
        Shape {
            dims: dims.iter().map(|d| Dim::Static(*d)).collect(),
        }
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns concrete dimensions when every axis is static.
    pub fn static_dims(&self) -> Option<Vec<usize>> {
        self.dims.iter().map(Dim::as_static).collect()
    }

    /// Static element count, when known.
    pub fn num_elements(&self) -> Option<usize> {
        self.static_dims()
            .map(|dims| dims.iter().product::<usize>())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{dim}")?;
        }
        if self.dims.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

/// Builds a [`Shape`] from anything convertible to [`Dim`].
#[macro_export]
macro_rules! shape {
    ($($dim:expr),* $(,)?) => {
        $crate::shape::Shape::new(vec![$($crate::shape::Dim::from($dim)),*])
    };
}

/// Target axis of a reshape: an explicit length or the single `-1`-style
/// axis inferred from the remaining element count.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReshapeDim {
    Explicit(Dim),
    Inferred,
}

impl From<usize> for ReshapeDim {
    fn from(value: usize) -> Self {
        ReshapeDim::Explicit(Dim::Static(value))
    }
}

impl From<Dim> for ReshapeDim {
    fn from(dim: Dim) -> Self {
        ReshapeDim::Explicit(dim)
    }
}

/// NumPy-style broadcast of two shapes: trailing axes are aligned, size-1
/// axes stretch, and anything else must agree (symbolic axes by name).
pub fn broadcast(op: &'static str, lhs: &Shape, rhs: &Shape) -> Result<Shape> {
    let rank = lhs.rank().max(rhs.rank());
    let mut dims = Vec::with_capacity(rank);
    for i in 0..rank {
        let a = broadcast_axis(lhs, rank, i);
        let b = broadcast_axis(rhs, rank, i);
        let dim = match (a, b) {
            (None, Some(d)) | (Some(d), None) => d.clone(),
            (Some(a), Some(b)) if a == b => a.clone(),
            (Some(a), Some(b)) if a.is_one() => b.clone(),
            (Some(a), Some(b)) if b.is_one() => a.clone(),
            _ => {
                return Err(GraphError::shape(
                    op,
                    format!("cannot broadcast {lhs} with {rhs}"),
                ))
            }
        };
        dims.push(dim);
    }
    Ok(Shape::new(dims))
}

fn broadcast_axis<'a>(shape: &'a Shape, rank: usize, axis: usize) -> Option<&'a Dim> {
    let offset = rank - shape.rank();
    if axis < offset {
        None
    } else {
        Some(&shape.dims()[axis - offset])
    }
}

/// Shape left after dropping the reduced axis.
pub fn reduced_shape(op: &'static str, input: &Shape, axis: usize) -> Result<Shape> {
    check_axis(op, input, axis)?;
    let mut dims = input.dims().to_vec();
    dims.remove(axis);
    Ok(Shape::new(dims))
}

/// Shape of an axis permutation; `axes` must be a permutation of `0..rank`.
pub fn permuted_shape(op: &'static str, input: &Shape, axes: &[usize]) -> Result<Shape> {
    if axes.len() != input.rank() {
        return Err(GraphError::shape(
            op,
            format!(
                "permutation {axes:?} does not cover all {} axes of {input}",
                input.rank()
            ),
        ));
    }
    let mut seen = vec![false; input.rank()];
    for &axis in axes {
        if axis >= input.rank() || seen[axis] {
            return Err(GraphError::shape(
                op,
                format!("{axes:?} is not a permutation of 0..{}", input.rank()),
            ));
        }
        seen[axis] = true;
    }
    Ok(Shape::new(
        axes.iter()
            .map(|&axis| input.dims()[axis].clone())
            .collect::<Vec<_>>(),
    ))
}

/// Resolves a reshape request against the input shape.
///
/// Element counts must match; at most one axis may be [`ReshapeDim::Inferred`]
/// and is computed from the remainder. Symbolic factors must match by name on
/// both sides since their concrete values are unknown here.
pub fn resolved_reshape(op: &'static str, input: &Shape, target: &[ReshapeDim]) -> Result<Shape> {
    let (in_static, in_syms) = factors(op, input.dims())?;

    let mut explicit = Vec::with_capacity(target.len());
    let mut inferred_at = None;
    for (i, dim) in target.iter().enumerate() {
        match dim {
            ReshapeDim::Explicit(dim) => explicit.push(dim.clone()),
            ReshapeDim::Inferred => {
                if inferred_at.replace(i).is_some() {
                    return Err(GraphError::shape(op, "at most one axis may be inferred"));
                }
            }
        }
    }
    let (out_static, out_syms) = factors(op, &explicit)?;

    if in_syms != out_syms {
        return Err(GraphError::shape(
            op,
            format!("symbolic factors of {input} do not match the requested shape"),
        ));
    }

    match inferred_at {
        None => {
            if in_static != out_static {
                return Err(GraphError::shape(
                    op,
                    format!("cannot reshape {input} ({in_static} elements) into {out_static} elements"),
                ));
            }
            Ok(Shape::new(explicit))
        }
        Some(position) => {
            if out_static == 0 || in_static % out_static != 0 {
                return Err(GraphError::shape(
                    op,
                    format!("cannot infer an axis of {input} from a remainder of {out_static}"),
                ));
            }
            let mut dims = explicit;
            dims.insert(position, Dim::Static(in_static / out_static));
            Ok(Shape::new(dims))
        }
    }
}

/// Shape of stacking `count` operands of identical shape along a new axis.
pub fn stacked_shape(op: &'static str, shapes: &[&Shape], axis: usize) -> Result<Shape> {
    let first = require_operands(op, shapes)?;
    for shape in &shapes[1..] {
        if shape.dims() != first.dims() {
            return Err(GraphError::shape(
                op,
                format!("operand shapes {first} and {shape} differ"),
            ));
        }
    }
    if axis > first.rank() {
        return Err(GraphError::shape(
            op,
            format!("axis {axis} out of range for rank {}", first.rank()),
        ));
    }
    let mut dims = first.dims().to_vec();
    dims.insert(axis, Dim::Static(shapes.len()));
    Ok(Shape::new(dims))
}

/// Shape of concatenating operands along an existing axis. Joined lengths
/// are summed, which requires them to be static: the sum of distinct size
/// parameters has no representation here.
pub fn concatenated_shape(op: &'static str, shapes: &[&Shape], axis: usize) -> Result<Shape> {
    let first = require_operands(op, shapes)?;
    check_axis(op, first, axis)?;
    let mut joined = 0usize;
    for shape in shapes {
        if shape.rank() != first.rank() {
            return Err(GraphError::shape(
                op,
                format!("operand ranks {} and {} differ", first.rank(), shape.rank()),
            ));
        }
        for (i, (a, b)) in first.dims().iter().zip(shape.dims()).enumerate() {
            if i != axis && a != b {
                return Err(GraphError::shape(
                    op,
                    format!("operand shapes {first} and {shape} differ away from axis {axis}"),
                ));
            }
        }
        match shape.dims()[axis].as_static() {
            Some(len) => joined += len,
            None => {
                return Err(GraphError::shape(
                    op,
                    format!("cannot sum symbolic axis {} of {shape}", shape.dims()[axis]),
                ))
            }
        }
    }
    let mut dims = first.dims().to_vec();
    dims[axis] = Dim::Static(joined);
    Ok(Shape::new(dims))
}

fn require_operands<'a>(op: &'static str, shapes: &[&'a Shape]) -> Result<&'a Shape> {
    shapes
        .first()
        .copied()
        .ok_or_else(|| GraphError::shape(op, "at least one operand is required"))
}

pub(crate) fn check_axis(op: &'static str, shape: &Shape, axis: usize) -> Result<()> {
    if axis >= shape.rank() {
        return Err(GraphError::shape(
            op,
            format!("axis {axis} out of range for shape {shape}"),
        ));
    }
    Ok(())
}

/// Splits dims into (product of static axes, sorted symbolic factors).
fn factors(op: &'static str, dims: &[Dim]) -> Result<(usize, Vec<SizeParam>)> {
    let mut product = 1usize;
    let mut syms = Vec::new();
    for dim in dims {
        match dim {
            Dim::Static(value) => {
                product = product.checked_mul(*value).ok_or_else(|| {
                    GraphError::shape(op, "element count overflows usize".to_string())
                })?;
            }
            Dim::Sym(param) => syms.push(param.clone()),
        }
    }
    syms.sort();
    Ok((product, syms))
}
