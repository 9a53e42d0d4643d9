use std::rc::Rc;

use manifold_common::data::typed_ast::{specialized_name, TypedFn};
use manifold_common::data::types::{ClosureType, Type};
use manifold_common::data::untyped_ast::UntypedFn;

use crate::args::{self, BindError};
use crate::registry::Session;
use crate::rewrite_typed;
use crate::type_infer;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecializeError {
    #[error("incompatible types: expected {expected}, found {found}")]
    IncompatibleTypes { expected: Type, found: Type },
    #[error("variable '{var}' is assigned both {first} and {second}")]
    ConflictingTypes {
        var: String,
        first: Type,
        second: Type,
    },
    #[error("variable '{0}' is used before it is assigned")]
    UnboundVariable(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("a value of type {0} is not callable")]
    NotCallable(Type),
    #[error("primitive '{0}' cannot be passed as a value in typed code")]
    FirstClassPrim(String),
    #[error("{0} calls itself, and recursive specialization is not supported")]
    Recursive(String),
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error("operator {prim} does not accept arguments of types {args}")]
    BadPrimArgs { prim: String, args: String },
    #[error("cannot index {base} with {index}")]
    BadIndex { base: Type, index: Type },
    #[error("{base} has no attribute '{name}'")]
    UnknownAttribute { base: Type, name: String },
    #[error("cannot assign to this kind of expression")]
    BadAssignTarget,
    #[error("adverb axis must be a non-negative integer constant")]
    NonConstantAxis,
    #[error("axis {axis} is out of range for an argument of rank {rank}")]
    AxisOutOfRange { axis: usize, rank: usize },
    #[error("adverbs cannot produce elements of type {0}")]
    BadAdverbElement(Type),
    #[error("allpairs needs exactly two array arguments")]
    AllPairsArgs,
    #[error("{func} cannot be applied element-wise to {found} arguments")]
    AdverbArity { func: String, found: usize },
    #[error("the closure captures more values than {0} has parameters")]
    TooManyCaptured(String),
    #[error("the type of '{0}' does not settle")]
    NoFixedPoint(String),
}

/// Returns the typed specialization of `name` for positional argument types `arg_types`, building
/// and caching it if this signature has not been seen before.
pub fn specialize(
    session: &mut Session,
    name: &str,
    arg_types: &[Type],
) -> Result<Rc<TypedFn>, SpecializeError> {
    let func = session
        .untyped(name)
        .cloned()
        .ok_or_else(|| SpecializeError::UnknownFunction(name.to_owned()))?;
    let bound = args::bind(
        name,
        &func.args,
        &func.nonlocals,
        arg_types.to_vec(),
        vec![],
    )?;
    specialize_bound(session, &func, bound)
}

/// Specializes `func` for already-bound parameters, in parameter order.
pub fn specialize_bound(
    session: &mut Session,
    func: &Rc<UntypedFn>,
    params: Vec<(String, Type)>,
) -> Result<Rc<TypedFn>, SpecializeError> {
    let param_types: Vec<Type> = params.iter().map(|(_, type_)| type_.clone()).collect();
    let key = (func.name.clone(), param_types);

    if let Some(cached) = session.cached_specialization(&key) {
        return Ok(cached);
    }

    if !session.begin_specialization(&key) {
        return Err(SpecializeError::Recursive(func.name.clone()));
    }
    let result = build_typed_fn(session, func, &params);
    session.end_specialization(&key);

    let typed = result?;
    tracing::debug!(name = %typed.name, "specialized function");
    Ok(session.record_specialization(key, typed))
}

fn build_typed_fn(
    session: &mut Session,
    func: &UntypedFn,
    params: &[(String, Type)],
) -> Result<TypedFn, SpecializeError> {
    let inference = type_infer::infer_fn(session, func, params)?;
    let rewritten = rewrite_typed::rewrite_fn(session, func, params, inference)?;

    let input_types: Vec<Type> = params.iter().map(|(_, type_)| type_.clone()).collect();
    Ok(TypedFn {
        name: specialized_name(&func.name, &input_types),
        arg_names: rewritten.arg_names,
        input_types,
        body: rewritten.body,
        return_type: rewritten.return_type,
        type_env: rewritten.type_env,
    })
}

/// Resolves the function a closure of type `closure` refers to for call-site argument types.
pub fn specialize_closure(
    session: &mut Session,
    closure: &ClosureType,
    arg_types: &[Type],
) -> Result<Rc<TypedFn>, SpecializeError> {
    let mut all_types = closure.captured.clone();
    all_types.extend(arg_types.iter().cloned());

    if let Some(typed) = session.typed(&closure.func) {
        if typed.input_types != all_types {
            return Err(SpecializeError::IncompatibleTypes {
                expected: Type::Tuple(typed.input_types.clone()),
                found: Type::Tuple(all_types),
            });
        }
        return Ok(typed.clone());
    }

    specialize(session, &closure.func, &all_types)
}

#[cfg(test)]
mod test {
    use super::*;
    use manifold_common::data::prims::Prim;
    use manifold_common::data::syntax::{Expr, Stmt};
    use manifold_common::data::types::{ScalarType, FLOAT64, INT64};
    use manifold_common::data::untyped_ast::ArgSpec;

    fn add_one() -> UntypedFn {
        UntypedFn::new(
            "add_one",
            ArgSpec::positional(&["x"]),
            vec![Stmt::ret(Expr::prim(
                Prim::Add,
                vec![Expr::var("x"), Expr::int(1)],
            ))],
        )
    }

    #[test]
    fn test_cache_per_signature() {
        let mut session = Session::new();
        session.register(add_one());

        let ints = specialize(&mut session, "add_one", &[INT64]).expect("specializes");
        let again = specialize(&mut session, "add_one", &[INT64]).expect("specializes");
        let floats = specialize(&mut session, "add_one", &[FLOAT64]).expect("specializes");

        assert!(Rc::ptr_eq(&ints, &again));
        assert_eq!(ints.name, "add_one[int64]");
        assert_eq!(ints.return_type, INT64);
        assert_eq!(floats.name, "add_one[float64]");
        assert_eq!(floats.return_type, FLOAT64);
    }

    #[test]
    fn test_array_signature() {
        let mut session = Session::new();
        session.register(add_one());
        let typed = specialize(&mut session, "add_one", &[Type::Array(ScalarType::Int32, 2)])
            .expect("specializes");
        assert_eq!(typed.return_type, Type::Array(ScalarType::Int64, 2));
    }

    #[test]
    fn test_recursion_is_reported() {
        let mut session = Session::new();
        session.register(UntypedFn::new(
            "loop_forever",
            ArgSpec::positional(&["x"]),
            vec![Stmt::ret(Expr::call("loop_forever", vec![Expr::var("x")]))],
        ));
        assert_eq!(
            specialize(&mut session, "loop_forever", &[INT64]).err(),
            Some(SpecializeError::Recursive("loop_forever".to_owned()))
        );
    }

    #[test]
    fn test_unknown_function() {
        let mut session = Session::new();
        assert_eq!(
            specialize(&mut session, "missing", &[]).err(),
            Some(SpecializeError::UnknownFunction("missing".to_owned()))
        );
    }
}
