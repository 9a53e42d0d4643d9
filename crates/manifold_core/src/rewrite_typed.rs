use manifold_common::data::syntax::{Block, Expr, ExprKind, Literal, Merge, Stmt};
use manifold_common::data::typed_ast::TypeEnv;
use manifold_common::data::types::{ScalarType, Type, BOOL, INT64};
use manifold_common::data::untyped_ast::UntypedFn;
use manifold_common::prim_config::{prim_to_name, PrimSignature};
use manifold_common::util::name_gen::NameGen;

use crate::registry::Session;
use crate::specialize::SpecializeError;
use crate::type_infer::{annotate, Inference};

pub struct Rewritten {
    pub arg_names: Vec<String>,
    pub body: Block,
    pub return_type: Type,
    pub type_env: TypeEnv,
}

/// Rebuilds `func` as typed IR in which every value has exactly the type its context requires.
///
/// A parameter whose local variable was widened past its incoming type is renamed, and the body
/// starts by casting the incoming value into the original name.
pub fn rewrite_fn(
    session: &mut Session,
    func: &UntypedFn,
    params: &[(String, Type)],
    inference: Inference,
) -> Result<Rewritten, SpecializeError> {
    let mut rewriter = Rewriter {
        session,
        env: inference.env,
        return_type: inference.return_type,
        names: NameGen::new(),
    };

    let mut arg_names = Vec::new();
    let mut body = Vec::new();
    for (name, type_) in params {
        let local_type = rewriter
            .env
            .get(name)
            .cloned()
            .unwrap_or_else(|| type_.clone());
        if local_type == *type_ {
            arg_names.push(name.clone());
            continue;
        }

        let incoming = rewriter.names.fresh(&format!("{}.in", name));
        rewriter.env.insert(incoming.clone(), type_.clone());
        let value = coerce(
            Expr::typed(ExprKind::Var(incoming.clone()), type_.clone()),
            &local_type,
        )?;
        tracing::debug!(param = %name, from = %type_, to = %local_type, "widened parameter");
        body.push(Stmt::Assign {
            lhs: Expr::typed(ExprKind::Var(name.clone()), local_type),
            rhs: value,
        });
        arg_names.push(incoming);
    }

    body.extend(rewriter.rewrite_block(&func.body)?);

    Ok(Rewritten {
        arg_names,
        body,
        return_type: rewriter.return_type,
        type_env: rewriter.env,
    })
}

/// Converts a typed expression to `target`.
///
/// Tuple literals are converted component-wise. Otherwise only a numeric cast between scalars is
/// allowed; arrays are converted element by element only where a primitive or an indexed store
/// consumes them.
pub fn coerce(expr: Expr, target: &Type) -> Result<Expr, SpecializeError> {
    if expr.ty() == target {
        return Ok(expr);
    }

    let incompatible = |found: &Type| SpecializeError::IncompatibleTypes {
        expected: target.clone(),
        found: found.clone(),
    };

    match (expr.kind, target) {
        (ExprKind::Tuple(items), Type::Tuple(targets)) => {
            if items.len() != targets.len() {
                let found = Type::Tuple(items.iter().map(|item| item.ty().clone()).collect());
                return Err(incompatible(&found));
            }
            let items = items
                .into_iter()
                .zip(targets)
                .map(|(item, item_target)| coerce(item, item_target))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::typed(ExprKind::Tuple(items), target.clone()))
        }
        (kind, _) => {
            let found = expr.type_.clone().unwrap_or(Type::None);
            match (&found, target) {
                (Type::Scalar(_), Type::Scalar(elt)) => Ok(Expr::typed(
                    ExprKind::Cast(Box::new(Expr::typed(kind, found.clone())), *elt),
                    target.clone(),
                )),
                _ => Err(incompatible(&found)),
            }
        }
    }
}

fn convert_elements(value: Expr, elt: ScalarType) -> Expr {
    match value.ty() {
        Type::Array(value_elt, rank) if *value_elt != elt => {
            let target = Type::Array(elt, *rank);
            Expr::typed(ExprKind::Cast(Box::new(value), elt), target)
        }
        _ => value,
    }
}

// Primitives apply elementwise, so an array operand only needs its element type converted.
fn coerce_operand(value: Expr, target: &Type) -> Result<Expr, SpecializeError> {
    match (value.ty(), target) {
        (Type::Array(_, rank), Type::Array(elt, target_rank)) if rank == target_rank => {
            Ok(convert_elements(value, *elt))
        }
        _ => coerce(value, target),
    }
}

/// Converts the value of an indexed write to what the slot can hold. Scalars fill a whole slot
/// and lower-rank arrays broadcast into it, so only the element type has to match.
fn coerce_slot(value: Expr, slot: &Type) -> Result<Expr, SpecializeError> {
    match (value.ty(), slot) {
        (Type::Scalar(_), Type::Array(elt, _)) => coerce(value, &Type::Scalar(*elt)),
        (Type::Array(_, rank), Type::Array(elt, slot_rank)) if rank <= slot_rank => {
            Ok(convert_elements(value, *elt))
        }
        _ => coerce(value, slot),
    }
}

struct Rewriter<'a> {
    session: &'a mut Session,
    env: TypeEnv,
    return_type: Type,
    names: NameGen,
}

impl<'a> Rewriter<'a> {
    fn var_type(&self, name: &str) -> Result<Type, SpecializeError> {
        self.env
            .get(name)
            .cloned()
            .ok_or_else(|| SpecializeError::UnboundVariable(name.to_owned()))
    }

    fn temp(&mut self, base: &str, type_: Type) -> Expr {
        let name = self.names.fresh(base);
        self.env.insert(name.clone(), type_.clone());
        Expr::typed(ExprKind::Var(name), type_)
    }

    /// Types `expr` and inserts the coercions its subexpressions need. Statements computing
    /// temporaries the result depends on are appended to `out`.
    fn expr(&mut self, expr: &Expr, out: &mut Block) -> Result<Expr, SpecializeError> {
        let typed = annotate(self.session, &self.env, expr)?;
        self.fix(typed, out)
    }

    fn fix(&mut self, expr: Expr, out: &mut Block) -> Result<Expr, SpecializeError> {
        let expr = expr.try_map_children(&mut |child| self.fix(child, out))?;
        let type_ = expr.ty().clone();

        match expr.kind {
            ExprKind::PrimCall(prim, args) => {
                let arg_types: Vec<Type> = args.iter().map(|arg| arg.ty().clone()).collect();
                let expected = prim.expected_input_types(&arg_types).ok_or_else(|| {
                    SpecializeError::BadPrimArgs {
                        prim: prim_to_name(prim).to_owned(),
                        args: Type::Tuple(arg_types.clone()).to_string(),
                    }
                })?;
                let args = args
                    .into_iter()
                    .zip(&expected)
                    .map(|(arg, target)| coerce_operand(arg, target))
                    .collect::<Result<Vec<_>, _>>()?;
                let result_type = prim.result_type(&expected);
                Ok(Expr::typed(ExprKind::PrimCall(prim, args), result_type))
            }

            ExprKind::Array(items) => match type_ {
                Type::Array(elt, 1) => {
                    let items = items
                        .into_iter()
                        .map(|item| coerce(item, &Type::Scalar(elt)))
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(Expr::typed(ExprKind::Array(items), type_))
                }
                Type::Array(_, _) if !items.is_empty() => {
                    self.expand_array_literal(items, type_, out)
                }
                _ => Ok(Expr::typed(ExprKind::Array(items), type_)),
            },

            ExprKind::Reduce {
                func,
                combine,
                init,
                args,
                axis,
            } => {
                let init = self.coerce_init(&combine, init)?;
                Ok(Expr::typed(
                    ExprKind::Reduce {
                        func,
                        combine,
                        init,
                        args,
                        axis,
                    },
                    type_,
                ))
            }

            ExprKind::Scan {
                func,
                combine,
                emit,
                init,
                args,
                axis,
            } => {
                let init = self.coerce_init(&combine, init)?;
                Ok(Expr::typed(
                    ExprKind::Scan {
                        func,
                        combine,
                        emit,
                        init,
                        args,
                        axis,
                    },
                    type_,
                ))
            }

            kind => Ok(Expr::typed(kind, type_)),
        }
    }

    // The accumulator type is the first non-captured parameter of the specialized combine function.
    fn coerce_init(
        &mut self,
        combine: &Expr,
        init: Option<Box<Expr>>,
    ) -> Result<Option<Box<Expr>>, SpecializeError> {
        let Some(init) = init else {
            return Ok(None);
        };
        let ExprKind::Closure(name, captured) = &combine.kind else {
            return Err(SpecializeError::NotCallable(combine.ty().clone()));
        };
        let typed = self
            .session
            .typed(name)
            .cloned()
            .ok_or_else(|| SpecializeError::UnknownFunction(name.clone()))?;
        match typed.input_types.get(captured.len()) {
            Some(acc_type) => Ok(Some(Box::new(coerce(*init, acc_type)?))),
            None => Err(SpecializeError::AdverbArity {
                func: typed.name.clone(),
                found: 0,
            }),
        }
    }

    /// Materializes a literal of arrays: the output is allocated from the literal's length and
    /// the first element's shape, then every element is written into its slot.
    fn expand_array_literal(
        &mut self,
        items: Vec<Expr>,
        type_: Type,
        out: &mut Block,
    ) -> Result<Expr, SpecializeError> {
        let (elt, rank) = match &type_ {
            Type::Array(elt, rank) => (*elt, *rank),
            other => {
                return Err(SpecializeError::BadAdverbElement(other.clone()));
            }
        };
        tracing::debug!(rank, len = items.len(), "expanding array literal");

        let mut items = items.into_iter();
        let Some(first_value) = items.next() else {
            return Ok(Expr::typed(ExprKind::Array(vec![]), type_));
        };
        let first = self.temp("array.first", first_value.ty().clone());
        out.push(Stmt::Assign {
            lhs: first.clone(),
            rhs: first_value,
        });

        let first_shape = Expr::typed(
            ExprKind::Attribute(Box::new(first.clone()), "shape".to_owned()),
            Type::Tuple(vec![INT64; rank - 1]),
        );
        let len = items.len() + 1;
        let mut dims = vec![Expr::typed(ExprKind::Const(Literal::Int(len as i64)), INT64)];
        dims.extend((0..rank - 1).map(|i| {
            Expr::typed(
                ExprKind::TupleProj(Box::new(first_shape.clone()), i),
                INT64,
            )
        }));

        let result = self.temp("array", type_.clone());
        out.push(Stmt::Assign {
            lhs: result.clone(),
            rhs: Expr::typed(
                ExprKind::AllocArray {
                    elt,
                    shape: Box::new(Expr::typed(
                        ExprKind::Tuple(dims),
                        Type::Tuple(vec![INT64; rank]),
                    )),
                },
                type_.clone(),
            ),
        });

        let slot_type = Type::array_of(elt, rank - 1);
        for (i, value) in std::iter::once(first).chain(items).enumerate() {
            let slot = Expr::typed(
                ExprKind::Index(
                    Box::new(result.clone()),
                    Box::new(Expr::typed(ExprKind::Const(Literal::Int(i as i64)), INT64)),
                ),
                slot_type.clone(),
            );
            let value = coerce_slot(value, &slot_type)?;
            out.push(Stmt::Assign { lhs: slot, rhs: value });
        }

        Ok(result)
    }

    fn lhs_type(&mut self, lhs: &Expr) -> Result<Type, SpecializeError> {
        match &lhs.kind {
            ExprKind::Var(name) => self.var_type(name),
            ExprKind::Tuple(items) => Ok(Type::Tuple(
                items
                    .iter()
                    .map(|item| self.lhs_type(item))
                    .collect::<Result<_, _>>()?,
            )),
            _ => Err(SpecializeError::BadAssignTarget),
        }
    }

    fn typed_lhs(&mut self, lhs: &Expr) -> Result<Expr, SpecializeError> {
        match &lhs.kind {
            ExprKind::Var(name) => Ok(Expr::typed(
                ExprKind::Var(name.clone()),
                self.var_type(name)?,
            )),
            ExprKind::Tuple(items) => {
                let items = items
                    .iter()
                    .map(|item| self.typed_lhs(item))
                    .collect::<Result<Vec<_>, _>>()?;
                let type_ = Type::Tuple(items.iter().map(|item| item.ty().clone()).collect());
                Ok(Expr::typed(ExprKind::Tuple(items), type_))
            }
            _ => Err(SpecializeError::BadAssignTarget),
        }
    }

    fn rewrite_block(&mut self, block: &Block) -> Result<Block, SpecializeError> {
        let mut out = Vec::new();
        for stmt in block {
            self.rewrite_stmt(stmt, &mut out)?;
        }
        Ok(out)
    }

    fn rewrite_assign(
        &mut self,
        lhs: &Expr,
        rhs: Expr,
        out: &mut Block,
    ) -> Result<(), SpecializeError> {
        match &lhs.kind {
            ExprKind::Index(_, _) => {
                let lhs = self.expr(lhs, out)?;
                let rhs = coerce_slot(rhs, lhs.ty())?;
                out.push(Stmt::Assign { lhs, rhs });
            }

            ExprKind::Tuple(items) => {
                let target = self.lhs_type(lhs)?;
                let direct = *rhs.ty() == target || matches!(rhs.kind, ExprKind::Tuple(_));
                if direct {
                    let rhs = coerce(rhs, &target)?;
                    let lhs = self.typed_lhs(lhs)?;
                    out.push(Stmt::Assign { lhs, rhs });
                } else {
                    // Unpack through a temporary so each component can be coerced separately.
                    let Type::Tuple(item_types) = rhs.ty().clone() else {
                        return Err(SpecializeError::IncompatibleTypes {
                            expected: target,
                            found: rhs.ty().clone(),
                        });
                    };
                    if item_types.len() != items.len() {
                        return Err(SpecializeError::IncompatibleTypes {
                            expected: target,
                            found: rhs.ty().clone(),
                        });
                    }
                    let temp = self.temp("unpack", rhs.ty().clone());
                    out.push(Stmt::Assign {
                        lhs: temp.clone(),
                        rhs,
                    });
                    for (i, (item, item_type)) in items.iter().zip(item_types).enumerate() {
                        let component = Expr::typed(
                            ExprKind::TupleProj(Box::new(temp.clone()), i),
                            item_type,
                        );
                        self.rewrite_assign(item, component, out)?;
                    }
                }
            }

            ExprKind::Var(name) => {
                let target = self.var_type(name)?;
                let rhs = coerce(rhs, &target)?;
                out.push(Stmt::Assign {
                    lhs: Expr::typed(ExprKind::Var(name.clone()), target),
                    rhs,
                });
            }

            _ => return Err(SpecializeError::BadAssignTarget),
        }
        Ok(())
    }

    fn rewrite_merge_side(
        &mut self,
        name: &str,
        value: &Expr,
        out: &mut Block,
    ) -> Result<Expr, SpecializeError> {
        let target = self.var_type(name)?;
        let value = self.expr(value, out)?;
        coerce(value, &target)
    }

    fn rewrite_stmt(&mut self, stmt: &Stmt, out: &mut Block) -> Result<(), SpecializeError> {
        match stmt {
            Stmt::Assign { lhs, rhs } => {
                let rhs = self.expr(rhs, out)?;
                self.rewrite_assign(lhs, rhs, out)
            }

            Stmt::Return(value) => {
                let value = self.expr(value, out)?;
                let value = coerce(value, &self.return_type)?;
                out.push(Stmt::Return(value));
                Ok(())
            }

            Stmt::If {
                cond,
                true_block,
                false_block,
                merge,
            } => {
                let cond = self.expr(cond, out)?;
                let cond = coerce(cond, &BOOL)?;
                let mut true_block = self.rewrite_block(true_block)?;
                let mut false_block = self.rewrite_block(false_block)?;

                let mut typed_merge = Merge::new();
                for (name, (left, right)) in merge {
                    let left = self.rewrite_merge_side(name, left, &mut true_block)?;
                    let right = self.rewrite_merge_side(name, right, &mut false_block)?;
                    typed_merge.insert(name.clone(), (left, right));
                }

                out.push(Stmt::If {
                    cond,
                    true_block,
                    false_block,
                    merge: typed_merge,
                });
                Ok(())
            }

            Stmt::While { cond, body, merge } => {
                let mut lefts = Vec::new();
                for (name, (left, _)) in merge {
                    lefts.push(self.rewrite_merge_side(name, left, out)?);
                }

                let mut cond_setup = Vec::new();
                let cond = self.expr(cond, &mut cond_setup)?;
                let cond = coerce(cond, &BOOL)?;
                out.extend(cond_setup.iter().cloned());

                let mut body = self.rewrite_block(body)?;
                let mut typed_merge = Merge::new();
                for ((name, (_, right)), left) in merge.iter().zip(lefts) {
                    let right = self.rewrite_merge_side(name, right, &mut body)?;
                    typed_merge.insert(name.clone(), (left, right));
                }
                // Temporaries feeding the condition are recomputed before every test.
                body.extend(cond_setup);

                out.push(Stmt::While {
                    cond,
                    body,
                    merge: typed_merge,
                });
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::specialize::specialize;
    use manifold_common::data::prims::Prim;
    use manifold_common::data::types::FLOAT64;
    use manifold_common::data::untyped_ast::ArgSpec;

    #[test]
    fn test_prim_args_are_cast() {
        let mut session = Session::new();
        session.register(UntypedFn::new(
            "half",
            ArgSpec::positional(&["x"]),
            vec![Stmt::ret(Expr::prim(
                Prim::Multiply,
                vec![Expr::var("x"), Expr::float(0.5)],
            ))],
        ));
        let typed = specialize(&mut session, "half", &[INT64]).expect("specializes");
        assert_eq!(typed.return_type, FLOAT64);

        let Stmt::Return(value) = &typed.body[0] else {
            panic!("expected a return");
        };
        let ExprKind::PrimCall(_, args) = &value.kind else {
            panic!("expected a primitive call");
        };
        assert_eq!(
            args[0].kind,
            ExprKind::Cast(
                Box::new(Expr::typed(ExprKind::Var("x".to_owned()), INT64)),
                ScalarType::Float64
            )
        );
    }

    #[test]
    fn test_widened_param_is_renamed() {
        let mut session = Session::new();
        session.register(UntypedFn::new(
            "bump",
            ArgSpec::positional(&["x"]),
            vec![
                Stmt::set(
                    "x",
                    Expr::prim(Prim::Add, vec![Expr::var("x"), Expr::float(1.5)]),
                ),
                Stmt::ret(Expr::var("x")),
            ],
        ));
        let typed = specialize(&mut session, "bump", &[INT64]).expect("specializes");
        assert_eq!(typed.arg_names, vec!["x.in.0".to_owned()]);
        assert_eq!(typed.input_types, vec![INT64]);
        assert_eq!(typed.type_env["x"], FLOAT64);
        assert_eq!(typed.type_env["x.in.0"], INT64);
    }

    #[test]
    fn test_nested_array_literal_is_expanded() {
        let mut session = Session::new();
        session.register(UntypedFn::new(
            "rows",
            ArgSpec::positional(&["a", "b"]),
            vec![Stmt::ret(Expr::array(vec![Expr::var("a"), Expr::var("b")]))],
        ));
        let typed = specialize(
            &mut session,
            "rows",
            &[
                Type::Array(ScalarType::Int64, 1),
                Type::Array(ScalarType::Float64, 1),
            ],
        )
        .expect("specializes");

        assert_eq!(typed.return_type, Type::Array(ScalarType::Float64, 2));
        // first element, allocation, two slot writes, return
        assert_eq!(typed.body.len(), 5);
        let Stmt::Assign { rhs, .. } = &typed.body[1] else {
            panic!("expected an assignment");
        };
        assert!(matches!(rhs.kind, ExprKind::AllocArray { .. }));
        let Stmt::Assign { rhs, .. } = &typed.body[2] else {
            panic!("expected an assignment");
        };
        assert!(matches!(rhs.kind, ExprKind::Cast(_, ScalarType::Float64)));
    }

    #[test]
    fn test_branch_merge_is_coerced() {
        let mut session = Session::new();
        let mut merge = Merge::new();
        merge.insert("y".to_owned(), (Expr::int(1), Expr::float(2.0)));
        session.register(UntypedFn::new(
            "pick",
            ArgSpec::positional(&["c"]),
            vec![
                Stmt::If {
                    cond: Expr::var("c"),
                    true_block: vec![],
                    false_block: vec![],
                    merge,
                },
                Stmt::ret(Expr::var("y")),
            ],
        ));
        let typed = specialize(&mut session, "pick", &[INT64]).expect("specializes");
        let Stmt::If { cond, merge, .. } = &typed.body[0] else {
            panic!("expected a conditional");
        };
        assert_eq!(cond.ty(), &BOOL);
        let (left, right) = &merge["y"];
        assert_eq!(left.ty(), &FLOAT64);
        assert_eq!(right.ty(), &FLOAT64);
    }

    #[test]
    fn test_incompatible_assignment() {
        assert!(matches!(
            coerce(
                Expr::typed(ExprKind::Var("a".to_owned()), Type::Array(ScalarType::Int64, 1)),
                &INT64
            ),
            Err(SpecializeError::IncompatibleTypes { .. })
        ));
    }

    #[test]
    fn test_array_cast_is_rejected() {
        let ints = Expr::typed(ExprKind::Var("a".to_owned()), Type::Array(ScalarType::Int64, 1));
        assert!(matches!(
            coerce(ints.clone(), &Type::Array(ScalarType::Float64, 1)),
            Err(SpecializeError::IncompatibleTypes { .. })
        ));
        let stored = coerce_slot(ints, &Type::Array(ScalarType::Float64, 2)).expect("converts");
        assert_eq!(stored.ty(), &Type::Array(ScalarType::Float64, 1));
        assert!(matches!(stored.kind, ExprKind::Cast(_, ScalarType::Float64)));
    }
}
