use std::collections::BTreeSet;

use manifold_common::data::syntax::{AllocKind, Block, Expr, ExprKind, Literal, Stmt};
use manifold_common::data::typed_ast::TypedFn;
use manifold_common::util::progress_logger::{ProgressLogger, ProgressSession};

use crate::analysis::use_def::{block_at_mut, index_target, stmt_at, StmtPath};
use crate::analysis::Dataflow;
use crate::registry::Session;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Rewrite {
    // `dest[idx] = src` can never be observed.
    DeadWrite { copy: StmtPath },
    // `src = E; ..; dest[idx] = src` becomes `dest[idx] = E`.
    Retarget { alloc: StmtPath, copy: StmtPath },
    // `src = alloc(..); src[:] = E; ..; dest[idx] = src` becomes `src = dest[idx]; src[:] = E; ..`.
    ViewSlot { alloc: StmtPath, copy: StmtPath },
}

// Whether evaluating `expr` can only read memory. Calls and adverbs may run code that writes
// through array arguments.
fn is_pure(expr: &Expr) -> bool {
    let effectful = matches!(
        expr.kind,
        ExprKind::Call(_, _)
            | ExprKind::Invoke(_, _)
            | ExprKind::Map { .. }
            | ExprKind::AllPairs { .. }
            | ExprKind::Reduce { .. }
            | ExprKind::Scan { .. }
    );
    !effectful && expr.children().into_iter().all(is_pure)
}

fn collect_copies<'a>(
    block: &'a Block,
    prefix: &mut StmtPath,
    copies: &mut Vec<(StmtPath, &'a Expr, &'a Expr)>,
) {
    for (i, stmt) in block.iter().enumerate() {
        prefix.push(i);
        match stmt {
            Stmt::Assign { lhs, rhs } => {
                if let ExprKind::Index(_, _) = lhs.kind {
                    copies.push((prefix.clone(), lhs, rhs));
                }
            }
            Stmt::Return(_) => {}
            Stmt::If {
                true_block,
                false_block,
                ..
            } => {
                prefix.push(1);
                collect_copies(true_block, prefix, copies);
                prefix.pop();
                prefix.push(2);
                collect_copies(false_block, prefix, copies);
                prefix.pop();
            }
            Stmt::While { body, .. } => {
                prefix.push(2);
                collect_copies(body, prefix, copies);
                prefix.pop();
            }
        }
        prefix.pop();
    }
}

fn is_array_var(func: &TypedFn, name: &str) -> bool {
    func.var_type(name).is_some_and(|type_| type_.is_array())
}

fn is_dead_write(func: &TypedFn, flow: &Dataflow, dest: &str, lhs: &Expr, rhs: &Expr) -> bool {
    let array_aliases = flow
        .escape
        .aliases(dest)
        .iter()
        .filter(|name| is_array_var(func, name))
        .count();

    flow.use_def.reads(dest).is_empty()
        && !flow.escape.escapes(dest)
        && array_aliases <= 1
        && is_pure(lhs)
        && is_pure(rhs)
}

fn same_block_before(earlier: &StmtPath, later: &StmtPath) -> bool {
    match (earlier.split_last(), later.split_last()) {
        (Some((i, earlier_block)), Some((j, later_block))) => {
            earlier_block == later_block && i < j
        }
        _ => false,
    }
}

fn is_none(expr: &Expr) -> bool {
    expr.kind == ExprKind::Const(Literal::None)
}

fn is_unit_step(step: &Expr) -> bool {
    is_none(step) || step.kind == ExprKind::Const(Literal::Int(1))
}

fn is_full_slice(index: &Expr) -> bool {
    match &index.kind {
        ExprKind::Slice { start, stop, step } => {
            is_none(start) && is_none(stop) && step.as_deref().map_or(true, is_unit_step)
        }
        _ => false,
    }
}

// Whether the statement right after the allocation overwrites every element of `src` without
// reading it. Raw allocations start zeroed, so a view of the destination may only replace one
// whose contents are fully overwritten before anything else happens.
fn fills_whole(func: &TypedFn, alloc: &StmtPath, src: &str) -> bool {
    let Some((&i, block)) = alloc.split_last() else {
        return false;
    };
    let mut next = block.to_vec();
    next.push(i + 1);
    let Some(Stmt::Assign { lhs, rhs }) = stmt_at(&func.body, &next) else {
        return false;
    };
    let ExprKind::Index(base, index) = &lhs.kind else {
        return false;
    };
    let rank = func.var_type(src).map_or(0, |type_| type_.rank());
    let covers = match &index.kind {
        ExprKind::Tuple(items) => items.len() == rank && items.iter().all(is_full_slice),
        _ => rank == 1 && is_full_slice(index),
    };
    base.as_var() == Some(src) && covers && !rhs.vars().contains(src)
}

fn find_fusion(
    func: &TypedFn,
    flow: &Dataflow,
    dest: &str,
    indices: &[&Expr],
    lhs: &Expr,
    rhs: &Expr,
    copy: &StmtPath,
) -> Option<Rewrite> {
    if !is_array_var(func, dest) {
        return None;
    }
    let src = rhs.as_var()?;
    let alloc = flow.local_allocs.get(src)?;
    if !same_block_before(&alloc.path, copy) || lhs.type_ != rhs.type_ {
        return None;
    }

    let src_private = !flow.escape.escapes(src)
        && flow.escape.aliases(src).len() == 1
        && flow.use_def.reads(src) == [copy.clone()]
        && flow.use_def.last_use(src) == Some(copy);
    if !src_private {
        return None;
    }

    // The destination and the index must already hold the values they will have at the copy.
    let mut inputs: BTreeSet<String> = indices.iter().flat_map(|index| index.vars()).collect();
    inputs.insert(dest.to_owned());
    let inputs_ready = inputs.iter().all(|name| {
        flow.use_def
            .created_before(name, copy)
            .is_some_and(|created| *created < alloc.path)
    });
    // Nothing may observe the destination early.
    let dest_untouched = flow
        .escape
        .aliases(dest)
        .iter()
        .all(|name| !flow.use_def.touched_between(name, &alloc.path, copy));
    if !inputs_ready || !dest_untouched {
        return None;
    }

    if flow.use_def.writes(src).is_empty() {
        Some(Rewrite::Retarget {
            alloc: alloc.path.clone(),
            copy: copy.clone(),
        })
    } else if alloc.kind == AllocKind::Raw && fills_whole(func, &alloc.path, src) {
        Some(Rewrite::ViewSlot {
            alloc: alloc.path.clone(),
            copy: copy.clone(),
        })
    } else {
        None
    }
}

fn find_rewrite(func: &TypedFn, flow: &Dataflow) -> Option<Rewrite> {
    let mut copies = Vec::new();
    collect_copies(&func.body, &mut Vec::new(), &mut copies);

    for (copy, lhs, rhs) in copies {
        let Some((dest, indices)) = index_target(lhs) else {
            continue;
        };
        if is_dead_write(func, flow, dest, lhs, rhs) {
            return Some(Rewrite::DeadWrite { copy });
        }
        if let Some(rewrite) = find_fusion(func, flow, dest, &indices, lhs, rhs, &copy) {
            return Some(rewrite);
        }
    }
    None
}

fn remove_stmt(body: &mut Block, path: &StmtPath) -> Stmt {
    let Some((&i, _)) = path.split_last() else {
        panic!("statement path is empty");
    };
    match block_at_mut(body, path) {
        Some(block) => block.remove(i),
        None => panic!("no statement at {:?}", path),
    }
}

fn replace_rhs(body: &mut Block, path: &StmtPath, new_lhs: Option<Expr>, new_rhs: Option<Expr>) {
    let Some((&i, _)) = path.split_last() else {
        panic!("statement path is empty");
    };
    let Some(Stmt::Assign { lhs, rhs }) = block_at_mut(body, path).and_then(|b| b.get_mut(i))
    else {
        panic!("no assignment at {:?}", path);
    };
    if let Some(new_lhs) = new_lhs {
        *lhs = new_lhs;
    }
    if let Some(new_rhs) = new_rhs {
        *rhs = new_rhs;
    }
}

fn apply(func: &mut TypedFn, rewrite: Rewrite) {
    match rewrite {
        Rewrite::DeadWrite { copy } => {
            remove_stmt(&mut func.body, &copy);
        }

        Rewrite::Retarget { alloc, copy } => {
            let Stmt::Assign { lhs: slot, .. } = remove_stmt(&mut func.body, &copy) else {
                panic!("copy at {:?} is not an assignment", copy);
            };
            if let Some(Stmt::Assign { lhs, .. }) = stmt_at(&func.body, &alloc) {
                if let Some(src) = lhs.as_var() {
                    func.type_env.remove(src);
                }
            }
            replace_rhs(&mut func.body, &alloc, Some(slot), None);
        }

        Rewrite::ViewSlot { alloc, copy } => {
            let Stmt::Assign { lhs: slot, .. } = remove_stmt(&mut func.body, &copy) else {
                panic!("copy at {:?} is not an assignment", copy);
            };
            replace_rhs(&mut func.body, &alloc, None, Some(slot));
        }
    }
}

/// Removes unobservable writes and makes freshly allocated values that are only copied into
/// a slot of another array be built in that slot directly. Runs to a fixed point.
pub fn eliminate_copies(func: &TypedFn) -> TypedFn {
    let mut func = func.clone();
    if func.all_scalar() {
        return func;
    }

    loop {
        let flow = Dataflow::compute(&func);
        let Some(rewrite) = find_rewrite(&func, &flow) else {
            break;
        };
        tracing::debug!(func = %func.name, ?rewrite, "eliminating copy");
        apply(&mut func, rewrite);
    }
    func
}

/// Runs copy elimination over every typed function in the session.
pub fn eliminate_copies_all(session: &mut Session, progress: impl ProgressLogger) {
    let funcs: Vec<_> = session.typed_fns().cloned().collect();
    let mut progress = progress.start_session(Some(funcs.len()));
    for func in funcs {
        progress.describe(&func.name);
        let optimized = eliminate_copies(&func);
        if optimized != *func {
            session.insert_typed(optimized);
        }
        progress.update(1);
    }
    progress.finish();
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::specialize::specialize;
    use crate::typecheck::check_fn;
    use manifold_common::data::prims::Prim;
    use manifold_common::data::types::{ScalarType, Type, FLOAT64, INT64};
    use manifold_common::data::untyped_ast::{ArgSpec, UntypedFn};
    use manifold_common::util::progress_logger::Hidden;
    use std::rc::Rc;

    fn alloc(elt: ScalarType, dims: Vec<Expr>) -> Expr {
        ExprKind::AllocArray {
            elt,
            shape: Box::new(Expr::tuple(dims)),
        }
        .into()
    }

    fn len_of(name: &str) -> Expr {
        ExprKind::TupleProj(Box::new(Expr::attr(Expr::var(name), "shape")), 0).into()
    }

    fn session_with_double() -> Session {
        let mut session = Session::new();
        session.register(UntypedFn::new(
            "double",
            ArgSpec::positional(&["x"]),
            vec![Stmt::ret(Expr::prim(
                Prim::Multiply,
                vec![Expr::var("x"), Expr::float(2.0)],
            ))],
        ));
        session
    }

    fn stacked_rows(read_between: bool) -> UntypedFn {
        let mut body = vec![
            Stmt::set("out", alloc(ScalarType::Float64, vec![Expr::int(2), len_of("xs")])),
            Stmt::set(
                "row",
                Expr::map(Expr::closure("double", vec![]), vec![Expr::var("xs")], 0),
            ),
        ];
        if read_between {
            body.push(Stmt::set(
                "peek",
                Expr::index(Expr::var("out"), Expr::tuple(vec![Expr::int(0), Expr::int(0)])),
            ));
        }
        body.extend([
            Stmt::assign(Expr::index(Expr::var("out"), Expr::int(0)), Expr::var("row")),
            Stmt::assign(Expr::index(Expr::var("out"), Expr::int(1)), Expr::var("xs")),
            Stmt::ret(Expr::var("out")),
        ]);
        UntypedFn::new("stacked_rows", ArgSpec::positional(&["xs"]), body)
    }

    #[test]
    fn test_adverb_result_is_retargeted() {
        let mut session = session_with_double();
        session.register(stacked_rows(false));
        let typed = specialize(&mut session, "stacked_rows", &[Type::Array(ScalarType::Float64, 1)])
            .expect("specializes");

        let optimized = eliminate_copies(&typed);
        check_fn(&optimized);
        assert_eq!(optimized.body.len(), typed.body.len() - 1);
        let Stmt::Assign { lhs, rhs } = &optimized.body[1] else {
            panic!("expected an assignment");
        };
        assert!(matches!(lhs.kind, ExprKind::Index(_, _)));
        assert!(matches!(rhs.kind, ExprKind::Map { .. }));
        assert!(optimized.var_type("row").is_none());
    }

    #[test]
    fn test_early_read_blocks_fusion() {
        let mut session = session_with_double();
        session.register(stacked_rows(true));
        let typed = specialize(&mut session, "stacked_rows", &[Type::Array(ScalarType::Float64, 1)])
            .expect("specializes");
        assert_eq!(eliminate_copies(&typed), *typed);
    }

    #[test]
    fn test_filled_allocation_becomes_view() {
        let mut session = Session::new();
        session.register(UntypedFn::new(
            "rows",
            ArgSpec::positional(&["n"]),
            vec![
                Stmt::set("out", alloc(ScalarType::Int64, vec![Expr::int(2), Expr::int(3)])),
                Stmt::set("tmp", alloc(ScalarType::Int64, vec![Expr::int(3)])),
                Stmt::assign(
                    Expr::index(
                        Expr::var("tmp"),
                        Expr::slice(Expr::none(), Expr::none(), None),
                    ),
                    Expr::var("n"),
                ),
                Stmt::assign(Expr::index(Expr::var("out"), Expr::int(0)), Expr::var("tmp")),
                Stmt::assign(Expr::index(Expr::var("out"), Expr::int(1)), Expr::int(0)),
                Stmt::ret(Expr::var("out")),
            ],
        ));
        let typed = specialize(&mut session, "rows", &[INT64]).expect("specializes");

        let optimized = eliminate_copies(&typed);
        check_fn(&optimized);
        assert_eq!(optimized.body.len(), 5);
        let Stmt::Assign { lhs, rhs } = &optimized.body[1] else {
            panic!("expected an assignment");
        };
        assert_eq!(lhs.as_var(), Some("tmp"));
        let ExprKind::Index(base, index) = &rhs.kind else {
            panic!("expected a view of the destination, got {:?}", rhs.kind);
        };
        assert_eq!(base.as_var(), Some("out"));
        assert_eq!(index.kind, ExprKind::Const(Literal::Int(0)));
    }

    #[test]
    fn test_partial_fill_keeps_copy() {
        let mut session = Session::new();
        session.register(UntypedFn::new(
            "fill_row",
            ArgSpec::positional(&["out"]),
            vec![
                Stmt::set("tmp", alloc(ScalarType::Int64, vec![Expr::int(3)])),
                Stmt::assign(Expr::index(Expr::var("tmp"), Expr::int(0)), Expr::int(1)),
                Stmt::assign(Expr::index(Expr::var("out"), Expr::int(0)), Expr::var("tmp")),
                Stmt::ret(Expr::var("out")),
            ],
        ));
        let typed = specialize(&mut session, "fill_row", &[Type::Array(ScalarType::Int64, 2)])
            .expect("specializes");
        assert_eq!(eliminate_copies(&typed), *typed);
    }

    #[test]
    fn test_unread_local_write_is_dropped() {
        let mut session = Session::new();
        session.register(UntypedFn::new(
            "scratch",
            ArgSpec::positional(&["x"]),
            vec![
                Stmt::set("junk", alloc(ScalarType::Float64, vec![Expr::int(4)])),
                Stmt::assign(Expr::index(Expr::var("junk"), Expr::int(0)), Expr::var("x")),
                Stmt::ret(Expr::var("x")),
            ],
        ));
        let typed = specialize(&mut session, "scratch", &[FLOAT64]).expect("specializes");
        let optimized = eliminate_copies(&typed);
        assert_eq!(optimized.body.len(), 2);
        assert!(matches!(optimized.body[1], Stmt::Return(_)));
    }

    #[test]
    fn test_fixed_point() {
        let mut session = session_with_double();
        session.register(stacked_rows(false));
        let typed = specialize(&mut session, "stacked_rows", &[Type::Array(ScalarType::Float64, 1)])
            .expect("specializes");
        let once = eliminate_copies(&typed);
        let twice = eliminate_copies(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_session_pass_replaces_rewritten_functions() {
        let mut session = session_with_double();
        session.register(stacked_rows(false));
        specialize(&mut session, "stacked_rows", &[Type::Array(ScalarType::Float64, 1)])
            .expect("specializes");
        let double = specialize(&mut session, "double", &[INT64]).expect("specializes");

        eliminate_copies_all(&mut session, Hidden);
        let optimized = session
            .typed("stacked_rows[array1<float64>]")
            .expect("still registered");
        assert!(optimized.var_type("row").is_none());
        let untouched = session.typed("double[int64]").expect("still registered");
        assert!(Rc::ptr_eq(untouched, &double));
    }

    #[test]
    fn test_scalar_functions_are_untouched() {
        let mut session = session_with_double();
        let typed = specialize(&mut session, "double", &[INT64]).expect("specializes");
        assert_eq!(eliminate_copies(&typed), *typed);
    }
}
