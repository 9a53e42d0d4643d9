use std::collections::BTreeMap;

use crate::data::syntax::Block;
use crate::data::types::Type;

pub type TypeEnv = BTreeMap<String, Type>;

/// A function specialized for one argument-type signature.
#[derive(Clone, Debug, PartialEq)]
pub struct TypedFn {
    pub name: String,
    pub arg_names: Vec<String>,
    pub input_types: Vec<Type>,
    pub body: Block,
    pub return_type: Type,
    // Covers every parameter and local binding, including temporaries introduced by rewriting
    pub type_env: TypeEnv,
}

impl TypedFn {
    pub fn param_types(&self) -> impl Iterator<Item = (&String, &Type)> {
        self.arg_names.iter().zip(&self.input_types)
    }

    pub fn var_type(&self, name: &str) -> Option<&Type> {
        self.type_env.get(name)
    }

    pub fn all_scalar(&self) -> bool {
        self.type_env.values().all(Type::is_scalar)
    }
}

/// The name a specialization is registered under, e.g. `norm[array1<float64>,int64]`.
pub fn specialized_name(name: &str, arg_types: &[Type]) -> String {
    let rendered: Vec<String> = arg_types.iter().map(Type::to_string).collect();
    format!("{}[{}]", name, rendered.join(","))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::types::{ScalarType, INT64};

    #[test]
    fn test_specialized_name() {
        assert_eq!(
            specialized_name("f", &[INT64, Type::Array(ScalarType::Float64, 1)]),
            "f[int64,array1<float64>]"
        );
        assert_eq!(specialized_name("g", &[]), "g[]");
    }
}
