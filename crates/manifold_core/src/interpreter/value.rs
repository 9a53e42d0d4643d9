use id_collections::id_type;
use std::fmt;
use std::rc::Rc;

use manifold_common::data::prims::Prim;
use manifold_common::data::syntax::Literal;
use manifold_common::data::typed_ast::TypedFn;
use manifold_common::data::types::{ClosureType, ScalarType, StructType, Type};
use manifold_common::data::untyped_ast::UntypedFn;
use manifold_common::prim_config::prim_to_name;

use crate::args::Bindable;
use crate::interpreter::array::{ArrayValue, Scalar, SliceValue};

#[id_type]
pub struct HostFnId(u32);

/// A function value owned by the embedding runtime, translated into IR the first time it is
/// called.
#[derive(Clone, Debug)]
pub struct HostFunction {
    pub id: HostFnId,
    pub name: String,
    // Values of the function's nonlocals, in the order its translation declares them
    pub captured: Vec<Value>,
}

#[derive(Clone, Debug)]
pub enum FnDef {
    Untyped(Rc<UntypedFn>),
    Typed(Rc<TypedFn>),
}

impl FnDef {
    pub fn name(&self) -> &str {
        match self {
            FnDef::Untyped(func) => &func.name,
            FnDef::Typed(func) => &func.name,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClosureValue {
    pub func: FnDef,
    pub fixed: Vec<Value>,
}

#[derive(Clone, Debug)]
pub struct StructValue {
    pub name: String,
    pub fields: Vec<(String, Value)>,
}

#[derive(Clone, Debug)]
pub enum Value {
    None,
    Scalar(Scalar),
    Array(ArrayValue),
    Tuple(Vec<Value>),
    Struct(StructValue),
    Slice(SliceValue),
    Closure(ClosureValue),
    Prim(Prim),
    Host(Rc<HostFunction>),
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        Value::Scalar(scalar)
    }
}

impl From<ArrayValue> for Value {
    fn from(array: ArrayValue) -> Self {
        Value::Array(array)
    }
}

impl Value {
    pub fn int(value: i64) -> Value {
        Value::Scalar(Scalar::Int(value))
    }

    pub fn float(value: f64) -> Value {
        Value::Scalar(Scalar::Float(value))
    }

    pub fn bool(value: bool) -> Value {
        Value::Scalar(Scalar::Bool(value))
    }

    pub fn ints(values: &[i64]) -> Value {
        Value::Array(ArrayValue::from_flat(
            ScalarType::Int64,
            vec![values.len()],
            values.iter().copied().map(Scalar::Int).collect(),
        ))
    }

    pub fn floats(values: &[f64]) -> Value {
        Value::Array(ArrayValue::from_flat(
            ScalarType::Float64,
            vec![values.len()],
            values.iter().copied().map(Scalar::Float).collect(),
        ))
    }

    /// Wraps a view, collapsing rank-0 views to the scalar they point at.
    pub fn from_view(view: ArrayValue) -> Value {
        if view.rank() == 0 {
            Value::Scalar(view.get(&[]))
        } else {
            Value::Array(view)
        }
    }

    pub fn from_literal(lit: &Literal) -> Value {
        match lit {
            Literal::None => Value::None,
            Literal::Bool(value) => Value::bool(*value),
            Literal::Int(value) => Value::int(*value),
            Literal::Float(value) => Value::float(*value),
        }
    }

    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Value::Scalar(scalar) => Some(*scalar),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayValue> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        match self {
            Value::Array(array) => array.shape().to_vec(),
            _ => Vec::new(),
        }
    }

    /// The static type a specialization for this value would be keyed on, if it has one.
    pub fn type_of(&self) -> Option<Type> {
        match self {
            Value::None => Some(Type::None),
            Value::Scalar(scalar) => Some(Type::Scalar(scalar.natural_type())),
            Value::Array(array) => Some(Type::Array(array.elt(), array.rank())),
            Value::Tuple(items) => Some(Type::Tuple(
                items.iter().map(Value::type_of).collect::<Option<_>>()?,
            )),
            Value::Struct(value) => Some(Type::Struct(StructType {
                name: value.name.clone(),
                fields: value
                    .fields
                    .iter()
                    .map(|(name, field)| Some((name.clone(), field.type_of()?)))
                    .collect::<Option<_>>()?,
            })),
            Value::Slice(slice) => {
                let part = |part: Option<i64>| match part {
                    Some(_) => Type::Scalar(ScalarType::Int64),
                    None => Type::None,
                };
                Some(Type::Slice(
                    Box::new(part(slice.start)),
                    Box::new(part(slice.stop)),
                    Box::new(part(slice.step)),
                ))
            }
            Value::Closure(closure) => Some(Type::Closure(ClosureType {
                func: closure.func.name().to_owned(),
                captured: closure
                    .fixed
                    .iter()
                    .map(Value::type_of)
                    .collect::<Option<_>>()?,
            })),
            Value::Prim(_) | Value::Host(_) => None,
        }
    }
}

impl Bindable for Value {
    fn from_literal(lit: &Literal) -> Self {
        Value::from_literal(lit)
    }

    fn pack_tuple(items: Vec<Self>) -> Self {
        Value::Tuple(items)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Scalar(a), Value::Scalar(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => {
                a.name == b.name
                    && a.fields.len() == b.fields.len()
                    && a.fields.iter().zip(&b.fields).all(|(x, y)| x == y)
            }
            (Value::Slice(a), Value::Slice(b)) => a == b,
            (Value::Prim(a), Value::Prim(b)) => a == b,
            (Value::Host(a), Value::Host(b)) => a.id == b.id,
            (Value::Closure(a), Value::Closure(b)) => {
                a.func.name() == b.func.name() && a.fixed == b.fixed
            }
            _ => false,
        }
    }
}

fn write_scalar(f: &mut fmt::Formatter<'_>, scalar: Scalar) -> fmt::Result {
    match scalar {
        Scalar::Bool(value) => write!(f, "{}", value),
        Scalar::Int(value) => write!(f, "{}", value),
        Scalar::Float(value) => write!(f, "{:?}", value),
    }
}

fn write_array(f: &mut fmt::Formatter<'_>, array: &ArrayValue) -> fmt::Result {
    if array.rank() == 0 {
        return write_scalar(f, array.get(&[]));
    }
    write!(f, "[")?;
    for i in 0..array.shape()[0] {
        if i != 0 {
            write!(f, ", ")?;
        }
        write_array(f, &array.index_axis(0, i))?;
    }
    write!(f, "]")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Scalar(scalar) => write_scalar(f, *scalar),
            Value::Array(array) => write_array(f, array),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Value::Struct(value) => {
                write!(f, "{} {{", value.name)?;
                for (i, (name, field)) in value.fields.iter().enumerate() {
                    if i != 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {}: {}", name, field)?;
                }
                write!(f, " }}")
            }
            Value::Slice(slice) => {
                let part = |part: Option<i64>| match part {
                    Some(value) => value.to_string(),
                    None => String::new(),
                };
                write!(
                    f,
                    "{}:{}:{}",
                    part(slice.start),
                    part(slice.stop),
                    part(slice.step)
                )
            }
            Value::Closure(closure) => write!(f, "<closure {}>", closure.func.name()),
            Value::Prim(prim) => write!(f, "<prim {}>", prim_to_name(*prim)),
            Value::Host(host) => write!(f, "<host function {}>", host.name),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_type_of() {
        let value = Value::Tuple(vec![Value::int(1), Value::floats(&[1.0, 2.0])]);
        assert_eq!(
            value.type_of(),
            Some(Type::Tuple(vec![
                Type::Scalar(ScalarType::Int64),
                Type::Array(ScalarType::Float64, 1)
            ]))
        );
        assert_eq!(Value::Prim(Prim::Add).type_of(), None);
    }

    #[test]
    fn test_display() {
        let array = ArrayValue::from_flat(
            ScalarType::Int64,
            vec![2, 2],
            vec![Scalar::Int(1), Scalar::Int(2), Scalar::Int(3), Scalar::Int(4)],
        );
        assert_eq!(Value::Array(array).to_string(), "[[1, 2], [3, 4]]");
        assert_eq!(
            Value::Tuple(vec![Value::float(0.5), Value::None]).to_string(),
            "(0.5, None)"
        );
    }
}
