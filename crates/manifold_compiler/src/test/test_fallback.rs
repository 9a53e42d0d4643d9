use super::run_case::{func, session_with};
use crate::RunConfig;
use manifold_common::config as cfg;
use manifold_common::data::prims::Prim;
use manifold_common::data::syntax::{Expr, ExprKind, Stmt};
use manifold_common::data::untyped_ast::UntypedFn;
use manifold_common::report_error::Reportable;
use manifold_core::backend::{CompiledFn, InterpreterBackend};
use manifold_core::interpreter::value::Value;

// Passes a primitive operator as a first-class value, which typed code cannot express.
fn negate_all() -> UntypedFn {
    func(
        "negate_all",
        &["xs"],
        vec![Stmt::ret(Expr::map(
            ExprKind::Prim(Prim::Negative).into(),
            vec![Expr::var("xs")],
            0,
        ))],
    )
}

fn report(err: &crate::Error) -> String {
    let mut out = Vec::new();
    err.report(&mut out).expect("Writing to a Vec cannot fail");
    String::from_utf8(out).expect("Reports are UTF-8")
}

#[test]
fn first_class_prim_falls_back_to_interpreter() {
    let mut session = session_with(&[negate_all()]);
    let result = crate::run(
        &mut session,
        "negate_all",
        vec![Value::ints(&[1, -2, 3])],
        &RunConfig::default(),
    )
    .expect("Run failed");
    assert_eq!(result, Value::ints(&[-1, 2, -3]));
    assert!(session.typed("negate_all[array1<int64>]").is_none());
}

#[test]
fn fallback_can_be_disabled() {
    let mut session = session_with(&[negate_all()]);
    let config = RunConfig {
        pass_options: cfg::PassOptions {
            fallback: cfg::FallbackMode::Fail,
            ..Default::default()
        },
        ..Default::default()
    };
    let err = crate::run(&mut session, "negate_all", vec![Value::ints(&[1])], &config)
        .expect_err("Specialization should fail");
    let message = report(&err);
    assert!(message.starts_with("Cannot specialize negate_all"), "{}", message);
    assert!(message.contains("cannot be passed as a value"), "{}", message);
    assert_eq!(err.exit_status(), 1);
}

#[test]
fn untyped_argument_falls_back() {
    let apply = func(
        "apply",
        &["f", "x"],
        vec![Stmt::ret(Expr::invoke(Expr::var("f"), vec![Expr::var("x")]))],
    );
    let mut session = session_with(&[apply]);
    let result = crate::run(
        &mut session,
        "apply",
        vec![Value::Prim(Prim::Negative), Value::int(4)],
        &RunConfig::default(),
    )
    .expect("Run failed");
    assert_eq!(result, Value::int(-4));
}

#[test]
fn unknown_function_is_reported() {
    let mut session = session_with(&[]);
    let err = crate::run(&mut session, "missing", vec![], &RunConfig::default())
        .expect_err("There is nothing to run");
    assert_eq!(report(&err), "No function named 'missing' is registered\n");
}

#[test]
fn compile_mode_matches_interpretation() {
    let halve = func(
        "halve",
        &["x"],
        vec![Stmt::ret(Expr::prim(
            Prim::Divide,
            vec![Expr::var("x"), Expr::int(2)],
        ))],
    );
    let compile_config = RunConfig {
        mode: cfg::ExecutionMode::Compile,
        ..Default::default()
    };

    let mut session = session_with(&[halve.clone()]);
    let compiled = crate::run(&mut session, "halve", vec![Value::ints(&[3, 8])], &compile_config)
        .expect("Run failed");
    let mut session = session_with(&[halve]);
    let interpreted = crate::run(
        &mut session,
        "halve",
        vec![Value::ints(&[3, 8])],
        &RunConfig::default(),
    )
    .expect("Run failed");
    assert_eq!(compiled, interpreted);
    assert_eq!(compiled, Value::floats(&[1.5, 4.0]));

    let lowered = crate::compile(
        &mut session,
        "halve",
        vec![manifold_common::data::types::INT64],
        &compile_config,
        &mut InterpreterBackend,
    )
    .expect("Compilation failed");
    let result = lowered
        .callable
        .call(&mut session, vec![Value::int(5)])
        .expect("Call failed");
    assert_eq!(result, Value::float(2.5));
}
