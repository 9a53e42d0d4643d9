use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScalarType {
    Bool,
    UInt8,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScalarKind {
    Bool,
    Unsigned,
    Signed,
    Float,
}

impl ScalarType {
    pub fn nbytes(self) -> usize {
        match self {
            ScalarType::Bool | ScalarType::UInt8 | ScalarType::Int8 => 1,
            ScalarType::Int16 => 2,
            ScalarType::Int32 | ScalarType::Float32 => 4,
            ScalarType::Int64 | ScalarType::Float64 => 8,
        }
    }

    pub fn kind(self) -> ScalarKind {
        match self {
            ScalarType::Bool => ScalarKind::Bool,
            ScalarType::UInt8 => ScalarKind::Unsigned,
            ScalarType::Int8 | ScalarType::Int16 | ScalarType::Int32 | ScalarType::Int64 => {
                ScalarKind::Signed
            }
            ScalarType::Float32 | ScalarType::Float64 => ScalarKind::Float,
        }
    }

    pub fn is_float(self) -> bool {
        self.kind() == ScalarKind::Float
    }

    pub fn is_integer(self) -> bool {
        matches!(self.kind(), ScalarKind::Signed | ScalarKind::Unsigned)
    }

    fn signed_of_width(nbytes: usize) -> ScalarType {
        match nbytes {
            1 => ScalarType::Int8,
            2 => ScalarType::Int16,
            4 => ScalarType::Int32,
            _ => ScalarType::Int64,
        }
    }

    /// The smallest scalar type both `self` and `other` convert into without losing their kind.
    pub fn join(self, other: ScalarType) -> ScalarType {
        use ScalarKind as K;

        if self == other {
            return self;
        }

        match (self.kind(), other.kind()) {
            (K::Bool, _) => other,
            (_, K::Bool) => self,
            (K::Float, K::Float) => ScalarType::Float64,
            (K::Float, _) | (_, K::Float) => {
                let (float, int) = if self.is_float() {
                    (self, other)
                } else {
                    (other, self)
                };
                if float == ScalarType::Float64 || int.nbytes() >= 4 {
                    ScalarType::Float64
                } else {
                    ScalarType::Float32
                }
            }
            (K::Signed, K::Signed) => {
                ScalarType::signed_of_width(self.nbytes().max(other.nbytes()))
            }
            // Mixing the unsigned byte with a signed integer needs one more byte of headroom.
            (K::Unsigned, K::Signed) | (K::Signed, K::Unsigned) => {
                let widest = self.nbytes().max(other.nbytes());
                let width = if widest == 1 { 2 } else { widest };
                ScalarType::signed_of_width(width)
            }
            (K::Unsigned, K::Unsigned) => ScalarType::UInt8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::UInt8 => "uint8",
            ScalarType::Int8 => "int8",
            ScalarType::Int16 => "int16",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::Float32 => "float32",
            ScalarType::Float64 => "float64",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<(String, Type)>,
}

impl StructType {
    pub fn field_index(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|(name, _)| name == field)
    }
}

/// `func` names a function registered in the session, either untyped or a typed specialization.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClosureType {
    pub func: String,
    pub captured: Vec<Type>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Type {
    None,
    Scalar(ScalarType),
    Array(ScalarType, usize), // Element type, rank (always at least 1)
    Tuple(Vec<Type>),
    Struct(StructType),
    Slice(Box<Type>, Box<Type>, Box<Type>), // Start, stop, step
    Closure(ClosureType),
}

pub const BOOL: Type = Type::Scalar(ScalarType::Bool);
pub const INT64: Type = Type::Scalar(ScalarType::Int64);
pub const FLOAT64: Type = Type::Scalar(ScalarType::Float64);

impl Type {
    /// An array of the given rank, collapsing to the element type at rank 0.
    pub fn array_of(elt: ScalarType, rank: usize) -> Type {
        if rank == 0 {
            Type::Scalar(elt)
        } else {
            Type::Array(elt, rank)
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Scalar(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array(_, _))
    }

    pub fn rank(&self) -> usize {
        match self {
            Type::Array(_, rank) => *rank,
            _ => 0,
        }
    }

    /// The scalar element type of scalars and arrays.
    pub fn elt_type(&self) -> Option<ScalarType> {
        match self {
            Type::Scalar(elt) | Type::Array(elt, _) => Some(*elt),
            _ => None,
        }
    }

    /// The type of one slice along an axis: arrays lose one dimension, everything else is passed
    /// through unchanged.
    pub fn slice_along_axis(&self) -> Type {
        match self {
            Type::Array(elt, rank) => Type::array_of(*elt, rank - 1),
            other => other.clone(),
        }
    }

    /// Inverse of `slice_along_axis` for values produced once per iteration of an adverb.
    pub fn stack(&self, extra_dims: usize) -> Option<Type> {
        match self {
            Type::Scalar(elt) => Some(Type::Array(*elt, extra_dims)),
            Type::Array(elt, rank) => Some(Type::Array(*elt, rank + extra_dims)),
            _ => None,
        }
    }

    pub fn join(&self, other: &Type) -> Option<Type> {
        if self == other {
            return Some(self.clone());
        }

        match (self, other) {
            (Type::Scalar(a), Type::Scalar(b)) => Some(Type::Scalar(a.join(*b))),
            (Type::Array(a, rank_a), Type::Array(b, rank_b)) if rank_a == rank_b => {
                Some(Type::Array(a.join(*b), *rank_a))
            }
            (Type::Tuple(items_a), Type::Tuple(items_b)) if items_a.len() == items_b.len() => {
                let items = items_a
                    .iter()
                    .zip(items_b)
                    .map(|(a, b)| a.join(b))
                    .collect::<Option<Vec<_>>>()?;
                Some(Type::Tuple(items))
            }
            (Type::Slice(start_a, stop_a, step_a), Type::Slice(start_b, stop_b, step_b)) => {
                Some(Type::Slice(
                    Box::new(start_a.join(start_b)?),
                    Box::new(stop_a.join(stop_b)?),
                    Box::new(step_a.join(step_b)?),
                ))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::None => write!(f, "none"),
            Type::Scalar(elt) => write!(f, "{}", elt.name()),
            Type::Array(elt, rank) => write!(f, "array{}<{}>", rank, elt.name()),
            Type::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Type::Struct(struct_type) => write!(f, "struct {}", struct_type.name),
            Type::Slice(start, stop, step) => write!(f, "slice({}, {}, {})", start, stop, step),
            Type::Closure(closure) => {
                write!(f, "closure {}[", closure.func)?;
                for (i, captured) in closure.captured.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", captured)?;
                }
                write!(f, "]")
            }
        }
    }
}
