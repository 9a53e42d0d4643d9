//! Turning symbolic shapes into computations over a backend's own values.

use std::collections::BTreeMap;

use id_collections::Id;

use manifold_common::data::shape_ast::{param_layout, ParamShape, Shape, ShapeOp, ShapeVarId};
use manifold_common::data::types::Type;

use crate::interpreter::value::Value;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeCodegenError {
    #[error("the shape depends on values that are only known at runtime")]
    Unknown,
    #[error("shape variable {0} is not bound to any argument")]
    UnboundVar(usize),
    #[error("dimension {index} is out of range for a shape with {len} entries")]
    DimOutOfRange { index: usize, len: usize },
    #[error("expected {expected} arguments, found {found}")]
    ArgCount { expected: usize, found: usize },
}

/// The operations a backend provides to compute shapes at runtime.
pub trait ShapeCodegen {
    type Value: Clone;

    /// The shape tuple of an array, or the empty tuple for a scalar.
    fn shape(&mut self, value: &Self::Value) -> Self::Value;

    fn tuple_elts(&mut self, value: &Self::Value) -> Vec<Self::Value>;

    fn tuple(&mut self, items: Vec<Self::Value>) -> Self::Value;

    fn constant(&mut self, value: i64) -> Self::Value;

    fn add(&mut self, lhs: Self::Value, rhs: Self::Value) -> Self::Value;
    fn sub(&mut self, lhs: Self::Value, rhs: Self::Value) -> Self::Value;
    fn mult(&mut self, lhs: Self::Value, rhs: Self::Value) -> Self::Value;
    fn div(&mut self, lhs: Self::Value, rhs: Self::Value) -> Self::Value;
    fn modulo(&mut self, lhs: Self::Value, rhs: Self::Value) -> Self::Value;
}

/// Binds each parameter's shape variables to the backend values describing the actual argument.
pub struct ArgConverter<'a, C: ShapeCodegen> {
    codegen: &'a mut C,
    bindings: BTreeMap<ShapeVarId, C::Value>,
}

impl<'a, C: ShapeCodegen> ArgConverter<'a, C> {
    pub fn new(codegen: &'a mut C) -> Self {
        ArgConverter {
            codegen,
            bindings: BTreeMap::new(),
        }
    }

    fn bind(&mut self, layout: &ParamShape, arg: &C::Value) {
        match layout {
            ParamShape::Scalar(var) => {
                self.bindings.insert(*var, arg.clone());
            }
            ParamShape::Array(var, _) => {
                let shape = self.codegen.shape(arg);
                self.bindings.insert(*var, shape);
            }
            ParamShape::Tuple(items) => {
                let elts = self.codegen.tuple_elts(arg);
                for (item, elt) in items.iter().zip(&elts) {
                    self.bind(item, elt);
                }
            }
            ParamShape::Opaque => {}
        }
    }

    pub fn convert(
        mut self,
        param_types: &[Type],
        args: &[C::Value],
    ) -> Result<ShapeEval<'a, C>, ShapeCodegenError> {
        if param_types.len() != args.len() {
            return Err(ShapeCodegenError::ArgCount {
                expected: param_types.len(),
                found: args.len(),
            });
        }
        for (layout, arg) in param_layout(param_types).iter().zip(args) {
            self.bind(layout, arg);
        }
        Ok(ShapeEval {
            codegen: self.codegen,
            bindings: self.bindings,
        })
    }
}

pub struct ShapeEval<'a, C: ShapeCodegen> {
    codegen: &'a mut C,
    bindings: BTreeMap<ShapeVarId, C::Value>,
}

impl<'a, C: ShapeCodegen> ShapeEval<'a, C> {
    pub fn eval(&mut self, shape: &Shape) -> Result<C::Value, ShapeCodegenError> {
        match shape {
            Shape::Var(var) => self
                .bindings
                .get(var)
                .cloned()
                .ok_or(ShapeCodegenError::UnboundVar(var.to_index())),
            Shape::Const(value) => Ok(self.codegen.constant(*value)),
            Shape::Dim(inner, index) => {
                let inner = self.eval(inner)?;
                let elts = self.codegen.tuple_elts(&inner);
                elts.get(*index)
                    .cloned()
                    .ok_or(ShapeCodegenError::DimOutOfRange {
                        index: *index,
                        len: elts.len(),
                    })
            }
            Shape::Tuple(items) => {
                let items = items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Result<_, _>>()?;
                Ok(self.codegen.tuple(items))
            }
            Shape::Binop(op, lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                Ok(match op {
                    ShapeOp::Add => self.codegen.add(lhs, rhs),
                    ShapeOp::Sub => self.codegen.sub(lhs, rhs),
                    ShapeOp::Mult => self.codegen.mult(lhs, rhs),
                    ShapeOp::Div => self.codegen.div(lhs, rhs),
                    ShapeOp::Mod => self.codegen.modulo(lhs, rhs),
                })
            }
            Shape::Closure(name, _) => {
                panic!("closure {} cannot be turned into a shape computation", name)
            }
            Shape::Unknown => Err(ShapeCodegenError::Unknown),
        }
    }
}

/// Computes `shape` for the given arguments of a function with parameter types `param_types`.
pub fn make_shape_expr<C: ShapeCodegen>(
    codegen: &mut C,
    param_types: &[Type],
    args: &[C::Value],
    shape: &Shape,
) -> Result<C::Value, ShapeCodegenError> {
    ArgConverter::new(codegen)
        .convert(param_types, args)?
        .eval(shape)
}

/// A shape-relevant summary of a runtime value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShapeValue {
    Int(i64),
    Tuple(Vec<ShapeValue>),
    // An array argument, represented by its dimensions
    Array(Vec<i64>),
}

impl ShapeValue {
    /// The summary of an argument: integers keep their value and arrays their dimensions.
    pub fn of_arg(value: &Value) -> ShapeValue {
        match value {
            Value::Tuple(items) => {
                ShapeValue::Tuple(items.iter().map(ShapeValue::of_arg).collect())
            }
            Value::Array(array) => {
                ShapeValue::Array(array.shape().iter().map(|&dim| dim as i64).collect())
            }
            other => match other.as_scalar() {
                Some(scalar) => ShapeValue::Int(scalar.as_i64()),
                None => ShapeValue::Tuple(Vec::new()),
            },
        }
    }

    /// The shape of a result, in the form `Shape` evaluates to.
    pub fn shape_of(value: &Value) -> ShapeValue {
        match value {
            Value::Tuple(items) => {
                ShapeValue::Tuple(items.iter().map(ShapeValue::shape_of).collect())
            }
            Value::Array(array) => ShapeValue::Tuple(
                array
                    .shape()
                    .iter()
                    .map(|&dim| ShapeValue::Int(dim as i64))
                    .collect(),
            ),
            _ => ShapeValue::Tuple(Vec::new()),
        }
    }

    fn int(&self) -> i64 {
        match self {
            ShapeValue::Int(value) => *value,
            other => panic!("expected an integer in a shape computation, found {:?}", other),
        }
    }
}

/// Evaluates shapes directly on concrete arguments.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConcreteShapes;

impl ShapeCodegen for ConcreteShapes {
    type Value = ShapeValue;

    fn shape(&mut self, value: &ShapeValue) -> ShapeValue {
        match value {
            ShapeValue::Array(dims) => {
                ShapeValue::Tuple(dims.iter().copied().map(ShapeValue::Int).collect())
            }
            _ => ShapeValue::Tuple(Vec::new()),
        }
    }

    fn tuple_elts(&mut self, value: &ShapeValue) -> Vec<ShapeValue> {
        match value {
            ShapeValue::Tuple(items) => items.clone(),
            ShapeValue::Array(dims) => dims.iter().copied().map(ShapeValue::Int).collect(),
            ShapeValue::Int(_) => Vec::new(),
        }
    }

    fn tuple(&mut self, items: Vec<ShapeValue>) -> ShapeValue {
        ShapeValue::Tuple(items)
    }

    fn constant(&mut self, value: i64) -> ShapeValue {
        ShapeValue::Int(value)
    }

    fn add(&mut self, lhs: ShapeValue, rhs: ShapeValue) -> ShapeValue {
        ShapeValue::Int(lhs.int().wrapping_add(rhs.int()))
    }

    fn sub(&mut self, lhs: ShapeValue, rhs: ShapeValue) -> ShapeValue {
        ShapeValue::Int(lhs.int().wrapping_sub(rhs.int()))
    }

    fn mult(&mut self, lhs: ShapeValue, rhs: ShapeValue) -> ShapeValue {
        ShapeValue::Int(lhs.int().wrapping_mul(rhs.int()))
    }

    // Division by zero yields zero; a shape built that way never matches a real result.
    fn div(&mut self, lhs: ShapeValue, rhs: ShapeValue) -> ShapeValue {
        ShapeValue::Int(lhs.int().checked_div_euclid(rhs.int()).unwrap_or(0))
    }

    fn modulo(&mut self, lhs: ShapeValue, rhs: ShapeValue) -> ShapeValue {
        ShapeValue::Int(lhs.int().checked_rem_euclid(rhs.int()).unwrap_or(0))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use id_collections::Id;
    use manifold_common::data::types::{ScalarType, INT64};

    fn var(index: usize) -> Shape {
        Shape::Var(ShapeVarId::from_index(index))
    }

    fn dim(index: usize, i: usize) -> Shape {
        Shape::Dim(Box::new(var(index)), i)
    }

    #[test]
    fn test_concrete_shapes() {
        let param_types = [
            Type::Array(ScalarType::Float64, 2),
            Type::Tuple(vec![INT64, Type::Array(ScalarType::Int64, 1)]),
        ];
        let args = [
            ShapeValue::of_arg(&Value::from_view(
                crate::interpreter::array::ArrayValue::zeros(ScalarType::Float64, vec![3, 4]),
            )),
            ShapeValue::of_arg(&Value::Tuple(vec![Value::int(5), Value::ints(&[1, 2])])),
        ];
        let shape = Shape::Tuple(vec![
            dim(0, 1),
            Shape::binop(ShapeOp::Add, var(1), dim(2, 0)),
            Shape::Const(7),
        ]);

        let result = make_shape_expr(&mut ConcreteShapes, &param_types, &args, &shape);
        assert_eq!(
            result,
            Ok(ShapeValue::Tuple(vec![
                ShapeValue::Int(4),
                ShapeValue::Int(7),
                ShapeValue::Int(7)
            ]))
        );
    }

    #[test]
    fn test_unknown_is_an_error() {
        let result = make_shape_expr(
            &mut ConcreteShapes,
            &[INT64],
            &[ShapeValue::Int(1)],
            &Shape::Unknown,
        );
        assert_eq!(result, Err(ShapeCodegenError::Unknown));
    }

    #[test]
    #[should_panic(expected = "cannot be turned into a shape computation")]
    fn test_closure_shapes_panic() {
        let shape = Shape::Closure("f".to_owned(), vec![]);
        let _ = make_shape_expr(&mut ConcreteShapes, &[], &[], &shape);
    }
}
