use crate::RunConfig;
use manifold_common::config as cfg;
use manifold_common::data::prims::Prim;
use manifold_common::data::syntax::{Block, Expr, Stmt};
use manifold_common::data::types::ScalarType;
use manifold_common::data::untyped_ast::{ArgSpec, UntypedFn};
use manifold_core::interpreter::array::{ArrayValue, Scalar};
use manifold_core::interpreter::value::Value;
use manifold_core::registry::Session;

pub fn func(name: &str, params: &[&str], body: Block) -> UntypedFn {
    UntypedFn::new(name, ArgSpec::positional(params), body)
}

/// `name(a, b) = prim(a, b)`
pub fn binary(name: &str, prim: Prim) -> UntypedFn {
    func(
        name,
        &["a", "b"],
        vec![Stmt::ret(Expr::prim(prim, vec![Expr::var("a"), Expr::var("b")]))],
    )
}

pub fn identity(name: &str) -> UntypedFn {
    func(name, &["x"], vec![Stmt::ret(Expr::var("x"))])
}

pub fn array(elt: ScalarType, shape: &[usize], data: Vec<Scalar>) -> Value {
    Value::Array(ArrayValue::from_flat(elt, shape.to_vec(), data))
}

pub fn float_array(shape: &[usize], data: &[f64]) -> Value {
    array(
        ScalarType::Float64,
        shape,
        data.iter().copied().map(Scalar::Float).collect(),
    )
}

pub fn int_array(shape: &[usize], data: &[i64]) -> Value {
    array(
        ScalarType::Int64,
        shape,
        data.iter().copied().map(Scalar::Int).collect(),
    )
}

// Arguments are copied before every run so that in-place writes made by one run are invisible to
// the next.
pub fn fresh(value: &Value) -> Value {
    match value {
        Value::Array(array) => Value::Array(ArrayValue::from_flat(
            array.elt(),
            array.shape().to_vec(),
            array.to_flat(),
        )),
        Value::Tuple(items) => Value::Tuple(items.iter().map(fresh).collect()),
        other => other.clone(),
    }
}

pub fn checked_config(copy_elimination: bool) -> RunConfig {
    RunConfig {
        pass_options: cfg::PassOptions {
            copy_elimination,
            check_shapes: true,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn session_with(funcs: &[UntypedFn]) -> Session {
    let mut session = Session::new();
    for func in funcs {
        session.register(func.clone());
    }
    session
}

/// Runs `entry` in fresh sessions with and without copy elimination and requires both runs to
/// agree.
pub fn run_case(funcs: &[UntypedFn], entry: &str, args: &[Value]) -> Value {
    let mut results = Vec::new();
    for copy_elimination in [false, true] {
        let mut session = session_with(funcs);
        let args = args.iter().map(fresh).collect();
        let result = crate::run(&mut session, entry, args, &checked_config(copy_elimination))
            .expect("Run failed");
        results.push(result);
    }
    assert_eq!(
        results[0], results[1],
        "copy elimination changed the result of {}",
        entry
    );
    results.pop().expect("ran at least once")
}

macro_rules! case {
    (
        $name:ident;
        $entry:literal ( $($arg:expr),* $(,)? );
        funcs = [ $($func:expr),* $(,)? ];
        expect = $expected:expr;
    ) => {
        #[test]
        fn $name() {
            let result = $crate::test::run_case::run_case(
                &[$($func),*],
                $entry,
                &[$($arg),*],
            );
            assert_eq!(result, $expected);
        }
    };
}
