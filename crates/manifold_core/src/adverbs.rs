//! Evaluation of the data-parallel adverbs over runtime values.
//!
//! Every adverb walks one axis of its array arguments in ascending order. Non-array arguments are
//! passed unchanged to every call, and array arguments are replaced by their slice at the current
//! position.

use manifold_common::data::types::ScalarType;

use crate::interpreter::array::{ArrayError, ArrayValue, Scalar};
use crate::interpreter::value::Value;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AdverbError {
    #[error("arguments disagree on the length of axis {axis}: {expected} vs {found}")]
    ShapeMismatch {
        axis: usize,
        expected: usize,
        found: usize,
    },
    #[error("adverb axis must be a non-negative integer constant")]
    NonConstantAxis,
    #[error("axis {axis} is out of range for an argument of rank {rank}")]
    AxisOutOfRange { axis: usize, rank: usize },
    #[error("adverb results must be scalars or arrays, found {0}")]
    UnsupportedElement(String),
    #[error("allpairs needs exactly two array arguments")]
    AllPairsArgs,
    #[error("cannot reduce an empty axis without an initial value")]
    EmptyReduce,
    #[error(transparent)]
    Array(#[from] ArrayError),
}

/// Calls a function value on arguments; implemented by the interpreter.
pub trait Apply {
    type Error: From<AdverbError>;

    fn apply(&mut self, func: &Value, args: Vec<Value>) -> Result<Value, Self::Error>;
}

/// The length of `axis` shared by every array argument, or `None` if there are no arrays.
pub fn axis_len(args: &[Value], axis: usize) -> Result<Option<usize>, AdverbError> {
    let mut len = None;
    for arg in args {
        let Value::Array(array) = arg else {
            continue;
        };
        if axis >= array.rank() {
            return Err(AdverbError::AxisOutOfRange {
                axis,
                rank: array.rank(),
            });
        }
        let found = array.shape()[axis];
        match len {
            None => len = Some(found),
            Some(expected) if expected != found => {
                return Err(AdverbError::ShapeMismatch {
                    axis,
                    expected,
                    found,
                })
            }
            Some(_) => {}
        }
    }
    Ok(len)
}

fn slice_args(args: &[Value], axis: usize, i: usize) -> Vec<Value> {
    args.iter()
        .map(|arg| match arg {
            Value::Array(array) => Value::from_view(array.index_axis(axis, i)),
            other => other.clone(),
        })
        .collect()
}

fn element_layout(value: &Value) -> Result<(ScalarType, Vec<usize>), AdverbError> {
    match value {
        Value::Scalar(scalar) => Ok((scalar.natural_type(), Vec::new())),
        Value::Array(array) => Ok((array.elt(), array.shape().to_vec())),
        other => Err(AdverbError::UnsupportedElement(other.to_string())),
    }
}

fn write_slot(slot: &ArrayValue, value: &Value) -> Result<(), AdverbError> {
    match value {
        Value::Scalar(scalar) => {
            slot.fill(*scalar);
            Ok(())
        }
        Value::Array(array) => Ok(slot.copy_from(array)?),
        other => Err(AdverbError::UnsupportedElement(other.to_string())),
    }
}

// Nothing runs to size an empty result, so each call is taken to return the slice it was given:
// the output keeps the element type and the shape of the first array argument.
fn empty_like(args: &[Value]) -> Value {
    let layout = args.iter().find_map(|arg| match arg {
        Value::Array(array) => Some((array.elt(), array.shape().to_vec())),
        _ => None,
    });
    let (elt, shape) = layout.unwrap_or((ScalarType::Float64, vec![0]));
    Value::Array(ArrayValue::zeros(elt, shape))
}

// Storage that no argument can observe, so accumulators never write through a view of an input.
fn detach(value: Value) -> Value {
    match value {
        Value::Array(array) => Value::Array(array.cast(array.elt())),
        other => other,
    }
}

/// Builds an output array whose position `i` along axis `pos` holds `results[i]`, taking the
/// element layout from `first`.
struct Stacker {
    out: ArrayValue,
    pos: usize,
}

impl Stacker {
    fn new(first: &Value, len: usize, axis: usize) -> Result<Stacker, AdverbError> {
        let (elt, elt_shape) = element_layout(first)?;
        let pos = axis.min(elt_shape.len());
        let mut shape = elt_shape;
        shape.insert(pos, len);
        Ok(Stacker {
            out: ArrayValue::zeros(elt, shape),
            pos,
        })
    }

    fn write(&self, i: usize, value: &Value) -> Result<(), AdverbError> {
        write_slot(&self.out.index_axis(self.pos, i), value)
    }
}

/// Applies `func` to each position along `axis`. The first call also sizes the output and its
/// result fills position 0, so `func` runs exactly once per position, in order.
pub fn map<A: Apply>(
    applier: &mut A,
    func: &Value,
    args: &[Value],
    axis: usize,
) -> Result<Value, A::Error> {
    let Some(len) = axis_len(args, axis)? else {
        return applier.apply(func, args.to_vec());
    };
    if len == 0 {
        return Ok(empty_like(args));
    }

    let first = applier.apply(func, slice_args(args, axis, 0))?;
    let stacker = Stacker::new(&first, len, axis)?;
    stacker.write(0, &first)?;
    for i in 1..len {
        let result = applier.apply(func, slice_args(args, axis, i))?;
        stacker.write(i, &result)?;
    }
    Ok(Value::Array(stacker.out))
}

/// Applies `func` to every pair of slices of `x` and `y`, so `result[i, j] == func(x_i, y_j)`.
///
/// Calls happen in row-major order: `(0, 0)` sizes the output, then the rest of row 0, then rows
/// `1..` in full.
pub fn all_pairs<A: Apply>(
    applier: &mut A,
    func: &Value,
    x: &Value,
    y: &Value,
    axis: usize,
) -> Result<Value, A::Error> {
    let (Value::Array(xs), Value::Array(ys)) = (x, y) else {
        return Err(AdverbError::AllPairsArgs.into());
    };
    let nx = axis_len(std::slice::from_ref(x), axis)?.unwrap_or(0);
    let ny = axis_len(std::slice::from_ref(y), axis)?.unwrap_or(0);
    if nx == 0 || ny == 0 {
        let mut shape = vec![nx, ny];
        shape.extend(
            xs.shape()
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != axis)
                .map(|(_, &dim)| dim),
        );
        return Ok(Value::Array(ArrayValue::zeros(xs.elt(), shape)));
    }

    let pair = |i: usize, j: usize| {
        vec![
            Value::from_view(xs.index_axis(axis, i)),
            Value::from_view(ys.index_axis(axis, j)),
        ]
    };

    let first = applier.apply(func, pair(0, 0))?;
    let (elt, elt_shape) = element_layout(&first)?;
    let mut shape = vec![nx, ny];
    shape.extend(elt_shape);
    let out = ArrayValue::zeros(elt, shape);

    let slot = |i: usize, j: usize| out.index_axis(0, i).index_axis(0, j);
    write_slot(&slot(0, 0), &first)?;
    for i in 0..nx {
        let start = if i == 0 { 1 } else { 0 };
        for j in start..ny {
            let result = applier.apply(func, pair(i, j))?;
            write_slot(&slot(i, j), &result)?;
        }
    }
    Ok(Value::Array(out))
}

/// The reducer functions shared by `reduce` and `scan`.
pub struct Fold<'a> {
    pub func: &'a Value,
    pub combine: &'a Value,
    pub init: Option<Value>,
}

impl<'a> Fold<'a> {
    fn step<A: Apply>(
        &self,
        applier: &mut A,
        acc: Option<Value>,
        slices: Vec<Value>,
    ) -> Result<Value, A::Error> {
        let elt = applier.apply(self.func, slices)?;
        match acc {
            None => Ok(detach(elt)),
            Some(acc) => applier.apply(self.combine, vec![acc, elt]),
        }
    }
}

/// Folds `combine(acc, func(slices_i))` over the axis from left to right. Without an initial
/// value the first position seeds the accumulator.
pub fn reduce<A: Apply>(
    applier: &mut A,
    fold: &Fold,
    args: &[Value],
    axis: usize,
) -> Result<Value, A::Error> {
    let mut acc = fold.init.clone();
    match axis_len(args, axis)? {
        None => acc = Some(fold.step(applier, acc, args.to_vec())?),
        Some(len) => {
            for i in 0..len {
                acc = Some(fold.step(applier, acc, slice_args(args, axis, i))?);
            }
        }
    }
    acc.ok_or_else(|| AdverbError::EmptyReduce.into())
}

/// Like `reduce`, but records `emit(acc)` after every position.
pub fn scan<A: Apply>(
    applier: &mut A,
    fold: &Fold,
    emit: &Value,
    args: &[Value],
    axis: usize,
) -> Result<Value, A::Error> {
    let Some(len) = axis_len(args, axis)? else {
        let acc = fold.step(applier, fold.init.clone(), args.to_vec())?;
        return applier.apply(emit, vec![acc]);
    };
    if len == 0 {
        return Ok(empty_like(args));
    }

    let mut acc = fold.step(applier, fold.init.clone(), slice_args(args, axis, 0))?;
    let first = applier.apply(emit, vec![acc.clone()])?;
    let stacker = Stacker::new(&first, len, axis)?;
    stacker.write(0, &first)?;
    for i in 1..len {
        acc = fold.step(applier, Some(acc), slice_args(args, axis, i))?;
        let emitted = applier.apply(emit, vec![acc.clone()])?;
        stacker.write(i, &emitted)?;
    }
    Ok(Value::Array(stacker.out))
}

/// Reads an adverb's axis, which must be a non-negative integer.
pub fn axis_value(axis: &Value) -> Result<usize, AdverbError> {
    match axis {
        Value::Scalar(Scalar::Int(axis)) if *axis >= 0 => Ok(*axis as usize),
        _ => Err(AdverbError::NonConstantAxis),
    }
}
