use crate::data::prims::{Prim, PrimCategory};
use crate::data::types::{ScalarType, Type};

// Names:

macro_rules! define_prim_to_name {
    ($(($prim : ident, $name : expr)),*) => {
        pub fn prim_to_name(prim: Prim) -> &'static str {
            match prim {
                $(Prim::$prim => $name),*
            }
        }
    };
}

macro_rules! define_prim_names_const {
    ($(($prim : ident, $name : expr)),*) => {
        pub const PRIM_NAMES: &[(Prim, &str)] = &[
            $((Prim::$prim, $name)),*
        ];
    }
}

// Watch out!  This macro expects a trailing comma, but the macros it invokes internally do not.
macro_rules! define_prim_names {
    ($(($prim : ident, $name : expr)),*,) => {
        define_prim_to_name!($(($prim, $name)),*);
        define_prim_names_const!($(($prim, $name)),*);
    };
}

define_prim_names![
    (Add, "add"),
    (Subtract, "subtract"),
    (Multiply, "multiply"),
    (Divide, "divide"),
    (Modulo, "mod"),
    (Negative, "negative"),
    (Abs, "abs"),
    (Maximum, "maximum"),
    (Minimum, "minimum"),
    (Sqrt, "sqrt"),
    (Exp, "exp"),
    (Log, "log"),
    (Equal, "equal"),
    (NotEqual, "not_equal"),
    (Less, "less"),
    (LessEqual, "less_equal"),
    (Greater, "greater"),
    (GreaterEqual, "greater_equal"),
    (LogicalAnd, "logical_and"),
    (LogicalOr, "logical_or"),
    (LogicalNot, "logical_not"),
];

pub fn prim_from_name(name: &str) -> Option<Prim> {
    PRIM_NAMES
        .iter()
        .find(|(_, prim_name)| *prim_name == name)
        .map(|(prim, _)| *prim)
}

// Signatures:

/// The typing contract a primitive operator offers to the coercion rewriter.
///
/// `expected_input_types` maps the actual argument types to the types the arguments must be
/// coerced to (or `None` if the operator does not apply to them), and `result_type` maps those
/// upcast types to the type of the result.
pub trait PrimSignature {
    fn expected_input_types(&self, arg_types: &[Type]) -> Option<Vec<Type>>;
    fn result_type(&self, upcast_types: &[Type]) -> Type;
}

fn common_input_elt(category: PrimCategory, elts: &[ScalarType]) -> ScalarType {
    let joined = elts
        .iter()
        .copied()
        .reduce(ScalarType::join)
        .unwrap_or(ScalarType::Int64);

    match category {
        PrimCategory::Logical => ScalarType::Bool,
        PrimCategory::Arith if joined == ScalarType::Bool => ScalarType::Int64,
        PrimCategory::Float if !joined.is_float() => ScalarType::Float64,
        PrimCategory::Arith | PrimCategory::Float | PrimCategory::Compare => joined,
    }
}

impl PrimSignature for Prim {
    fn expected_input_types(&self, arg_types: &[Type]) -> Option<Vec<Type>> {
        if arg_types.len() != self.arity() {
            return None;
        }

        let elts = arg_types
            .iter()
            .map(|type_| match type_ {
                Type::Scalar(_) | Type::Array(_, _) => type_.elt_type(),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;

        let input_elt = common_input_elt(self.category(), &elts);

        Some(
            arg_types
                .iter()
                .map(|type_| Type::array_of(input_elt, type_.rank()))
                .collect(),
        )
    }

    fn result_type(&self, upcast_types: &[Type]) -> Type {
        let rank = upcast_types.iter().map(Type::rank).max().unwrap_or(0);
        let input_elt = upcast_types
            .first()
            .and_then(Type::elt_type)
            .unwrap_or(ScalarType::Int64);

        let result_elt = match self.category() {
            PrimCategory::Arith | PrimCategory::Float => input_elt,
            PrimCategory::Compare | PrimCategory::Logical => ScalarType::Bool,
        };

        Type::array_of(result_elt, rank)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::types::{BOOL, FLOAT64, INT64};

    #[test]
    fn test_names_round_trip() {
        for (prim, name) in PRIM_NAMES {
            assert_eq!(prim_to_name(*prim), *name);
            assert_eq!(prim_from_name(name), Some(*prim));
        }
        assert_eq!(prim_from_name("frobnicate"), None);
    }

    #[test]
    fn test_arith_upcasts() {
        let floats = Type::Array(ScalarType::Float32, 2);
        let expected = Prim::Add
            .expected_input_types(&[INT64, floats.clone()])
            .expect("add applies to numbers");
        assert_eq!(
            expected,
            vec![FLOAT64, Type::Array(ScalarType::Float64, 2)]
        );
        assert_eq!(
            Prim::Add.result_type(&expected),
            Type::Array(ScalarType::Float64, 2)
        );
    }

    #[test]
    fn test_divide_is_float() {
        let expected = Prim::Divide
            .expected_input_types(&[INT64, INT64])
            .expect("divide applies to ints");
        assert_eq!(expected, vec![FLOAT64, FLOAT64]);
        assert_eq!(Prim::Divide.result_type(&expected), FLOAT64);
    }

    #[test]
    fn test_compare_is_bool() {
        let expected = Prim::Less
            .expected_input_types(&[Type::Array(ScalarType::Int32, 1), INT64])
            .expect("less applies to ints");
        assert_eq!(
            Prim::Less.result_type(&expected),
            Type::Array(ScalarType::Bool, 1)
        );
        assert_eq!(Prim::LogicalNot.result_type(&[BOOL]), BOOL);
    }

    #[test]
    fn test_rejects_non_numeric() {
        assert_eq!(Prim::Add.expected_input_types(&[INT64, Type::None]), None);
        assert_eq!(Prim::Add.expected_input_types(&[INT64]), None);
    }
}
