use manifold_common::data::syntax::{Block, Expr, ExprKind, Merge, Stmt};
use manifold_common::data::typed_ast::TypedFn;
use manifold_common::data::types::{Type, BOOL};
use manifold_common::prim_config::{prim_to_name, PrimSignature};

// Every violation found here is a bug in the pass that produced the function, so all checks
// panic.

fn check_expr(func: &TypedFn, expr: &Expr) {
    let Some(type_) = &expr.type_ else {
        panic!("{}: untyped expression {:?}", func.name, expr.kind);
    };
    for child in expr.children() {
        check_expr(func, child);
    }

    match &expr.kind {
        ExprKind::Var(name) => {
            let declared = func
                .var_type(name)
                .unwrap_or_else(|| {
                    panic!("{}: variable '{}' has no declared type", func.name, name)
                });
            assert_eq!(
                declared, type_,
                "{}: variable '{}' used at the wrong type",
                func.name, name
            );
        }

        ExprKind::PrimCall(prim, args) => {
            let arg_types: Vec<Type> = args.iter().map(|arg| arg.ty().clone()).collect();
            let expected = prim.expected_input_types(&arg_types).unwrap_or_else(|| {
                panic!(
                    "{}: {} applied to invalid arguments",
                    func.name,
                    prim_to_name(*prim)
                )
            });
            assert_eq!(
                expected,
                arg_types,
                "{}: uncoerced arguments to {}",
                func.name,
                prim_to_name(*prim)
            );
            assert_eq!(
                &prim.result_type(&expected),
                type_,
                "{}: wrong result type for {}",
                func.name,
                prim_to_name(*prim)
            );
        }

        ExprKind::Prim(prim) => {
            panic!(
                "{}: first-class primitive {} in typed code",
                func.name,
                prim_to_name(*prim)
            );
        }

        ExprKind::Fn(inner) => {
            panic!("{}: function literal {} in typed code", func.name, inner.name);
        }

        ExprKind::Array(items) => {
            if let Type::Array(elt, 1) = type_ {
                for item in items {
                    assert_eq!(
                        item.ty(),
                        &Type::Scalar(*elt),
                        "{}: uncoerced array literal element",
                        func.name
                    );
                }
            }
        }

        _ => {}
    }
}

fn check_slot_write(func: &TypedFn, slot: &Type, value: &Type) {
    let fits = match (slot, value) {
        _ if slot == value => true,
        (Type::Array(elt, _), Type::Scalar(value_elt)) => elt == value_elt,
        (Type::Array(elt, rank), Type::Array(value_elt, value_rank)) => {
            elt == value_elt && value_rank <= rank
        }
        _ => false,
    };
    assert!(
        fits,
        "{}: cannot write {} into a slot of type {}",
        func.name, value, slot
    );
}

fn check_lhs(func: &TypedFn, lhs: &Expr) {
    match &lhs.kind {
        ExprKind::Var(_) | ExprKind::Index(_, _) => check_expr(func, lhs),
        ExprKind::Tuple(items) => {
            for item in items {
                check_lhs(func, item);
            }
            let item_types: Vec<Type> = items.iter().map(|item| item.ty().clone()).collect();
            assert_eq!(
                lhs.ty(),
                &Type::Tuple(item_types),
                "{}: tuple target typed inconsistently",
                func.name
            );
        }
        other => panic!("{}: invalid assignment target {:?}", func.name, other),
    }
}

fn check_merge(func: &TypedFn, merge: &Merge) {
    for (name, (left, right)) in merge {
        let declared = func
            .var_type(name)
            .unwrap_or_else(|| panic!("{}: merged variable '{}' is undeclared", func.name, name));
        check_expr(func, left);
        check_expr(func, right);
        assert_eq!(left.ty(), declared, "{}: merge of '{}'", func.name, name);
        assert_eq!(right.ty(), declared, "{}: merge of '{}'", func.name, name);
    }
}

fn check_block(func: &TypedFn, block: &Block) {
    for stmt in block {
        match stmt {
            Stmt::Assign { lhs, rhs } => {
                check_lhs(func, lhs);
                check_expr(func, rhs);
                if let ExprKind::Index(_, _) = &lhs.kind {
                    check_slot_write(func, lhs.ty(), rhs.ty());
                } else {
                    assert_eq!(
                        lhs.ty(),
                        rhs.ty(),
                        "{}: assignment of mismatched type",
                        func.name
                    );
                }
            }

            Stmt::Return(value) => {
                check_expr(func, value);
                assert_eq!(
                    value.ty(),
                    &func.return_type,
                    "{}: return of mismatched type",
                    func.name
                );
            }

            Stmt::If {
                cond,
                true_block,
                false_block,
                merge,
            } => {
                check_expr(func, cond);
                assert_eq!(cond.ty(), &BOOL, "{}: non-boolean condition", func.name);
                check_block(func, true_block);
                check_block(func, false_block);
                check_merge(func, merge);
            }

            Stmt::While { cond, body, merge } => {
                check_expr(func, cond);
                assert_eq!(cond.ty(), &BOOL, "{}: non-boolean condition", func.name);
                check_block(func, body);
                check_merge(func, merge);
            }
        }
    }
}

/// Asserts that `func` is well-typed typed IR: every node carries a type, and every assignment,
/// return, merge and condition has exactly the type its context requires.
pub fn check_fn(func: &TypedFn) {
    assert_eq!(
        func.arg_names.len(),
        func.input_types.len(),
        "{}: parameter list and signature disagree",
        func.name
    );
    for (name, type_) in func.param_types() {
        assert_eq!(
            func.var_type(name),
            Some(type_),
            "{}: parameter '{}' declared at the wrong type",
            func.name,
            name
        );
    }
    check_block(func, &func.body);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::Session;
    use crate::specialize::specialize;
    use manifold_common::data::prims::Prim;
    use manifold_common::data::types::{ScalarType, INT64};
    use manifold_common::data::untyped_ast::{ArgSpec, UntypedFn};

    #[test]
    fn test_specialized_code_checks() {
        let mut session = Session::new();
        session.register(UntypedFn::new(
            "scale",
            ArgSpec::positional(&["xs", "k"]),
            vec![
                Stmt::set(
                    "ys",
                    Expr::prim(Prim::Multiply, vec![Expr::var("xs"), Expr::var("k")]),
                ),
                Stmt::assign(
                    Expr::index(Expr::var("ys"), Expr::int(0)),
                    Expr::int(7),
                ),
                Stmt::ret(Expr::var("ys")),
            ],
        ));
        let typed = specialize(
            &mut session,
            "scale",
            &[Type::Array(ScalarType::Float32, 1), INT64],
        )
        .expect("specializes");
        check_fn(&typed);
    }

    #[test]
    #[should_panic(expected = "return of mismatched type")]
    fn test_bad_return_panics() {
        let mut session = Session::new();
        session.register(UntypedFn::new(
            "ident",
            ArgSpec::positional(&["x"]),
            vec![Stmt::ret(Expr::var("x"))],
        ));
        let typed = specialize(&mut session, "ident", &[INT64]).expect("specializes");
        let mut broken = (*typed).clone();
        broken.return_type = Type::Scalar(ScalarType::Float64);
        check_fn(&broken);
    }
}
