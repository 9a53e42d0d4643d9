use id_collections::{id_type, Count, Id};
use std::fmt;

use crate::data::types::Type;

#[id_type]
pub struct ShapeVarId(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShapeOp {
    Add,
    Sub,
    Mult,
    Div,
    Mod,
}

/// A symbolic description of a value's shape in terms of the inputs of the function computing it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Shape {
    Var(ShapeVarId),
    Const(i64),
    // Dimension `i` of the shape tuple the inner expression evaluates to
    Dim(Box<Shape>, usize),
    Tuple(Vec<Shape>),
    Binop(ShapeOp, Box<Shape>, Box<Shape>),
    // Closures carry no shape; one reaching evaluation is an internal error
    Closure(String, Vec<Shape>),
    // Data-dependent and not expressible in terms of the inputs
    Unknown,
}

impl Shape {
    pub fn scalar() -> Shape {
        Shape::Tuple(Vec::new())
    }

    pub fn binop(op: ShapeOp, lhs: Shape, rhs: Shape) -> Shape {
        match (op, &lhs, &rhs) {
            (_, Shape::Unknown, _) | (_, _, Shape::Unknown) => Shape::Unknown,
            (ShapeOp::Add, Shape::Const(a), Shape::Const(b)) => Shape::Const(a + b),
            (ShapeOp::Sub, Shape::Const(a), Shape::Const(b)) => Shape::Const(a - b),
            (ShapeOp::Mult, Shape::Const(a), Shape::Const(b)) => Shape::Const(a * b),
            (ShapeOp::Div, Shape::Const(a), Shape::Const(b)) if *b != 0 => {
                Shape::Const(a.div_euclid(*b))
            }
            (ShapeOp::Mod, Shape::Const(a), Shape::Const(b)) if *b != 0 => {
                Shape::Const(a.rem_euclid(*b))
            }
            (ShapeOp::Add, _, Shape::Const(0)) | (ShapeOp::Sub, _, Shape::Const(0)) => lhs,
            (ShapeOp::Add, Shape::Const(0), _) => rhs,
            (ShapeOp::Mult, _, Shape::Const(1)) | (ShapeOp::Div, _, Shape::Const(1)) => lhs,
            (ShapeOp::Mult, Shape::Const(1), _) => rhs,
            _ => Shape::Binop(op, Box::new(lhs), Box::new(rhs)),
        }
    }

    pub fn contains_unknown(&self) -> bool {
        match self {
            Shape::Unknown => true,
            Shape::Var(_) | Shape::Const(_) => false,
            Shape::Dim(inner, _) => inner.contains_unknown(),
            Shape::Tuple(items) | Shape::Closure(_, items) => {
                items.iter().any(Shape::contains_unknown)
            }
            Shape::Binop(_, lhs, rhs) => lhs.contains_unknown() || rhs.contains_unknown(),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Var(var) => write!(f, "%{}", var.to_index()),
            Shape::Const(value) => write!(f, "{}", value),
            Shape::Dim(inner, i) => write!(f, "dim({}, {})", inner, i),
            Shape::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Shape::Binop(op, lhs, rhs) => {
                let op = match op {
                    ShapeOp::Add => "+",
                    ShapeOp::Sub => "-",
                    ShapeOp::Mult => "*",
                    ShapeOp::Div => "/",
                    ShapeOp::Mod => "%",
                };
                write!(f, "({} {} {})", lhs, op, rhs)
            }
            Shape::Closure(name, _) => write!(f, "closure {}", name),
            Shape::Unknown => write!(f, "?"),
        }
    }
}

/// How one function parameter is bound to shape variables.
///
/// Scalars and arrays each consume one variable: a scalar's variable stands for its value, an
/// array's for its shape tuple. Tuples are destructured element by element. Every other kind of
/// parameter carries no shape information and consumes nothing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamShape {
    Scalar(ShapeVarId),
    Array(ShapeVarId, usize),
    Tuple(Vec<ParamShape>),
    Opaque,
}

fn layout_param(type_: &Type, next: &mut Count<ShapeVarId>) -> ParamShape {
    match type_ {
        Type::Scalar(_) => ParamShape::Scalar(next.inc()),
        Type::Array(_, rank) => ParamShape::Array(next.inc(), *rank),
        Type::Tuple(items) => {
            ParamShape::Tuple(items.iter().map(|item| layout_param(item, next)).collect())
        }
        Type::None | Type::Struct(_) | Type::Slice(..) | Type::Closure(_) => ParamShape::Opaque,
    }
}

/// Assigns shape variables to parameters in argument order. Shape inference and shape code
/// generation both go through this function, so their numbering always agrees.
pub fn param_layout(param_types: &[Type]) -> Vec<ParamShape> {
    let mut next = Count::new();
    param_types
        .iter()
        .map(|type_| layout_param(type_, &mut next))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::types::{ScalarType, INT64};

    #[test]
    fn test_param_layout() {
        let layout = param_layout(&[
            Type::Array(ScalarType::Float64, 2),
            Type::Tuple(vec![INT64, Type::None]),
            INT64,
        ]);
        assert_eq!(
            layout,
            vec![
                ParamShape::Array(ShapeVarId::from_index(0), 2),
                ParamShape::Tuple(vec![
                    ParamShape::Scalar(ShapeVarId::from_index(1)),
                    ParamShape::Opaque
                ]),
                ParamShape::Scalar(ShapeVarId::from_index(2)),
            ]
        );
    }

    #[test]
    fn test_binop_folding() {
        let n = Shape::Var(ShapeVarId::from_index(0));
        assert_eq!(
            Shape::binop(ShapeOp::Add, Shape::Const(2), Shape::Const(3)),
            Shape::Const(5)
        );
        assert_eq!(Shape::binop(ShapeOp::Mult, n.clone(), Shape::Const(1)), n);
        assert_eq!(
            Shape::binop(ShapeOp::Sub, n.clone(), Shape::Unknown),
            Shape::Unknown
        );
    }
}
