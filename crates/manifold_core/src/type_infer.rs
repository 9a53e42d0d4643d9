use std::rc::Rc;

use manifold_common::data::syntax::{Block, Expr, ExprKind, Literal, Stmt};
use manifold_common::data::typed_ast::{TypeEnv, TypedFn};
use manifold_common::data::types::{ClosureType, ScalarType, StructType, Type, INT64};
use manifold_common::data::untyped_ast::UntypedFn;
use manifold_common::prim_config::{prim_to_name, PrimSignature};

use crate::args;
use crate::registry::Session;
use crate::specialize::{specialize_bound, specialize_closure, SpecializeError};

// Loops whose variable types are still widening after this many passes are rejected.
const MAX_ITERATIONS: usize = 32;

// Stands in for the per-iteration arguments when specializing an adverb's function.
const ELT_PLACEHOLDER: &str = "<elt>";

pub struct Inference {
    pub env: TypeEnv,
    pub return_type: Type,
}

/// Computes the type of every local variable of `func` and its return type, given bound parameter
/// types. A variable's type is the join of every value assigned to it.
pub fn infer_fn(
    session: &mut Session,
    func: &UntypedFn,
    params: &[(String, Type)],
) -> Result<Inference, SpecializeError> {
    let mut infer = Infer {
        session,
        env: params.iter().cloned().collect(),
        return_type: None,
        version: 0,
    };

    let mut iterations = 0;
    loop {
        let before = infer.version;
        infer.infer_block(&func.body)?;
        if infer.version == before {
            break;
        }
        iterations += 1;
        if iterations > MAX_ITERATIONS {
            return Err(SpecializeError::NoFixedPoint(func.name.clone()));
        }
    }

    Ok(Inference {
        env: infer.env,
        return_type: infer.return_type.unwrap_or(Type::None),
    })
}

struct Infer<'a> {
    session: &'a mut Session,
    env: TypeEnv,
    return_type: Option<Type>,
    // Bumped whenever any variable's type changes
    version: usize,
}

impl<'a> Infer<'a> {
    fn annotate(&mut self, expr: &Expr) -> Result<Expr, SpecializeError> {
        annotate(self.session, &self.env, expr)
    }

    fn bind_var(&mut self, name: &str, type_: Type) -> Result<(), SpecializeError> {
        let joined = match self.env.get(name) {
            None => type_,
            Some(existing) if *existing == type_ => return Ok(()),
            Some(existing) => existing.join(&type_).ok_or_else(|| {
                SpecializeError::ConflictingTypes {
                    var: name.to_owned(),
                    first: existing.clone(),
                    second: type_.clone(),
                }
            })?,
        };
        if self.env.get(name) != Some(&joined) {
            self.env.insert(name.to_owned(), joined);
            self.version += 1;
        }
        Ok(())
    }

    fn bind_lhs(&mut self, lhs: &Expr, type_: Type) -> Result<(), SpecializeError> {
        match &lhs.kind {
            ExprKind::Var(name) => self.bind_var(name, type_),
            ExprKind::Tuple(items) => match type_ {
                Type::Tuple(item_types) if item_types.len() == items.len() => {
                    for (item, item_type) in items.iter().zip(item_types) {
                        self.bind_lhs(item, item_type)?;
                    }
                    Ok(())
                }
                other => Err(SpecializeError::IncompatibleTypes {
                    expected: Type::Tuple(vec![Type::None; items.len()]),
                    found: other,
                }),
            },
            // Indexed writes don't rebind anything, but the target must make sense.
            ExprKind::Index(_, _) => self.annotate(lhs).map(|_| ()),
            _ => Err(SpecializeError::BadAssignTarget),
        }
    }

    fn bind_return(&mut self, type_: Type) -> Result<(), SpecializeError> {
        let joined = match &self.return_type {
            None => type_,
            Some(existing) => existing.join(&type_).ok_or_else(|| {
                SpecializeError::ConflictingTypes {
                    var: "<return>".to_owned(),
                    first: existing.clone(),
                    second: type_.clone(),
                }
            })?,
        };
        if self.return_type.as_ref() != Some(&joined) {
            self.return_type = Some(joined);
            self.version += 1;
        }
        Ok(())
    }

    fn infer_block(&mut self, block: &Block) -> Result<(), SpecializeError> {
        for stmt in block {
            self.infer_stmt(stmt)?;
        }
        Ok(())
    }

    fn infer_stmt(&mut self, stmt: &Stmt) -> Result<(), SpecializeError> {
        match stmt {
            Stmt::Assign { lhs, rhs } => {
                let rhs = self.annotate(rhs)?;
                self.bind_lhs(lhs, rhs.ty().clone())
            }

            Stmt::Return(value) => {
                let value = self.annotate(value)?;
                self.bind_return(value.ty().clone())
            }

            Stmt::If {
                cond,
                true_block,
                false_block,
                merge,
            } => {
                self.annotate(cond)?;
                self.infer_block(true_block)?;
                self.infer_block(false_block)?;
                for (name, (left, right)) in merge {
                    let left = self.annotate(left)?;
                    let right = self.annotate(right)?;
                    self.bind_var(name, left.ty().clone())?;
                    self.bind_var(name, right.ty().clone())?;
                }
                Ok(())
            }

            Stmt::While { cond, body, merge } => {
                for (name, (left, _)) in merge {
                    let left = self.annotate(left)?;
                    self.bind_var(name, left.ty().clone())?;
                }

                let mut iterations = 0;
                loop {
                    let before = self.version;
                    self.annotate(cond)?;
                    self.infer_block(body)?;
                    for (name, (_, right)) in merge {
                        let right = self.annotate(right)?;
                        self.bind_var(name, right.ty().clone())?;
                    }
                    if self.version == before {
                        break;
                    }
                    iterations += 1;
                    if iterations > MAX_ITERATIONS {
                        let name = merge.keys().next().cloned().unwrap_or_default();
                        return Err(SpecializeError::NoFixedPoint(name));
                    }
                }
                Ok(())
            }
        }
    }
}

/// Types an expression against `env`, producing typed IR: calls name their specialized callees,
/// closures and adverb functions become typed closures, function literals become closures over
/// their nonlocals, and omitted slice steps become 1.
///
/// No coercions are inserted here; that is the job of the coercion rewriter.
pub fn annotate(
    session: &mut Session,
    env: &TypeEnv,
    expr: &Expr,
) -> Result<Expr, SpecializeError> {
    Annotator { session, env }.annotate(expr)
}

struct Annotator<'a> {
    session: &'a mut Session,
    env: &'a TypeEnv,
}

pub(crate) fn const_axis(axis: &Expr) -> Result<usize, SpecializeError> {
    match &axis.kind {
        ExprKind::Const(Literal::Int(axis)) if *axis >= 0 => Ok(*axis as usize),
        _ => Err(SpecializeError::NonConstantAxis),
    }
}

fn is_int(type_: &Type) -> bool {
    matches!(type_, Type::Scalar(elt) if elt.is_integer())
}

fn is_slice_bound(type_: &Type) -> bool {
    *type_ == Type::None || is_int(type_)
}

pub(crate) fn index_type(base: &Type, index: &Expr) -> Result<Type, SpecializeError> {
    let bad_index = || SpecializeError::BadIndex {
        base: base.clone(),
        index: index.ty().clone(),
    };

    match base {
        Type::Array(elt, rank) => {
            let items: Vec<&Type> = match index.ty() {
                Type::Tuple(items) => items.iter().collect(),
                other => vec![other],
            };
            if items.len() > *rank {
                return Err(bad_index());
            }
            let mut dropped = 0;
            for item in items {
                match item {
                    _ if is_int(item) => dropped += 1,
                    Type::Slice(..) => {}
                    _ => return Err(bad_index()),
                }
            }
            Ok(Type::array_of(*elt, rank - dropped))
        }
        Type::Tuple(items) => match &index.kind {
            ExprKind::Const(Literal::Int(i)) => {
                let i = if *i < 0 { *i + items.len() as i64 } else { *i };
                if i < 0 || i as usize >= items.len() {
                    return Err(bad_index());
                }
                Ok(items[i as usize].clone())
            }
            _ => Err(bad_index()),
        },
        _ => Err(bad_index()),
    }
}

pub(crate) fn attribute_type(base: &Type, name: &str) -> Result<Type, SpecializeError> {
    let unknown = || SpecializeError::UnknownAttribute {
        base: base.clone(),
        name: name.to_owned(),
    };

    match (base, name) {
        (Type::Array(_, rank), "shape") => Ok(Type::Tuple(vec![INT64; *rank])),
        (Type::Array(_, _), "ndim" | "size") => Ok(INT64),
        (Type::Slice(start, _, _), "start") => Ok((**start).clone()),
        (Type::Slice(_, stop, _), "stop") => Ok((**stop).clone()),
        (Type::Slice(_, _, step), "step") => Ok((**step).clone()),
        (Type::Struct(struct_type), _) => struct_type
            .field_index(name)
            .map(|i| struct_type.fields[i].1.clone())
            .ok_or_else(unknown),
        _ => Err(unknown()),
    }
}

fn array_literal_type(items: &[Expr]) -> Result<Type, SpecializeError> {
    let Some(first) = items.first() else {
        return Ok(Type::Array(ScalarType::Float64, 1));
    };

    let mut elt = first.ty().elt_type();
    let rank = first.ty().rank();
    for item in items {
        let compatible = item.ty().is_scalar() || item.ty().is_array();
        if !compatible || item.ty().rank() != rank {
            return Err(SpecializeError::IncompatibleTypes {
                expected: first.ty().clone(),
                found: item.ty().clone(),
            });
        }
        elt = match (elt, item.ty().elt_type()) {
            (Some(a), Some(b)) => Some(a.join(b)),
            _ => None,
        };
    }

    match elt {
        Some(elt) => Ok(Type::Array(elt, rank + 1)),
        None => Err(SpecializeError::BadAdverbElement(first.ty().clone())),
    }
}

fn slice_types(args: &[Expr], axis: usize) -> Result<(Vec<Type>, bool), SpecializeError> {
    let mut any_array = false;
    let mut slices = Vec::new();
    for arg in args {
        match arg.ty() {
            Type::Array(elt, rank) => {
                if axis >= *rank {
                    return Err(SpecializeError::AxisOutOfRange { axis, rank: *rank });
                }
                any_array = true;
                slices.push(Type::array_of(*elt, rank - 1));
            }
            other => slices.push(other.clone()),
        }
    }
    Ok((slices, any_array))
}

fn stacked(elt: &Type, dims: usize) -> Result<Type, SpecializeError> {
    elt.stack(dims)
        .ok_or_else(|| SpecializeError::BadAdverbElement(elt.clone()))
}

fn types_of(exprs: &[Expr]) -> Vec<Type> {
    exprs.iter().map(|expr| expr.ty().clone()).collect()
}

impl<'a> Annotator<'a> {
    fn annotate_all(&mut self, exprs: &[Expr]) -> Result<Vec<Expr>, SpecializeError> {
        exprs.iter().map(|expr| self.annotate(expr)).collect()
    }

    // Types the placeholder expressions the argument binder produces for defaults and varargs.
    fn complete(&mut self, expr: Expr) -> Result<Expr, SpecializeError> {
        if expr.type_.is_some() {
            return Ok(expr);
        }
        match expr.kind {
            ExprKind::Tuple(items) => {
                let items = items
                    .into_iter()
                    .map(|item| self.complete(item))
                    .collect::<Result<Vec<_>, _>>()?;
                let type_ = Type::Tuple(types_of(&items));
                Ok(Expr::typed(ExprKind::Tuple(items), type_))
            }
            kind => self.annotate(&Expr::from(kind)),
        }
    }

    fn annotate(&mut self, expr: &Expr) -> Result<Expr, SpecializeError> {
        use ExprKind as K;

        match &expr.kind {
            K::Const(lit) => Ok(Expr::typed(K::Const(*lit), lit.type_())),

            K::Var(name) => match self.env.get(name) {
                Some(type_) => Ok(Expr::typed(K::Var(name.clone()), type_.clone())),
                None => Err(SpecializeError::UnboundVariable(name.clone())),
            },

            K::Tuple(items) => {
                let items = self.annotate_all(items)?;
                let type_ = Type::Tuple(types_of(&items));
                Ok(Expr::typed(K::Tuple(items), type_))
            }

            K::TupleProj(tuple, i) => {
                let tuple = self.annotate(tuple)?;
                let type_ = match tuple.ty() {
                    Type::Tuple(items) if *i < items.len() => items[*i].clone(),
                    other => {
                        return Err(SpecializeError::BadIndex {
                            base: other.clone(),
                            index: INT64,
                        })
                    }
                };
                Ok(Expr::typed(K::TupleProj(Box::new(tuple), *i), type_))
            }

            K::Array(items) => {
                let items = self.annotate_all(items)?;
                let type_ = array_literal_type(&items)?;
                Ok(Expr::typed(K::Array(items), type_))
            }

            K::Index(base, index) => {
                let base = self.annotate(base)?;
                let index = self.annotate(index)?;
                let type_ = index_type(base.ty(), &index)?;
                Ok(Expr::typed(K::Index(Box::new(base), Box::new(index)), type_))
            }

            K::Slice { start, stop, step } => {
                let start = self.annotate(start)?;
                let stop = self.annotate(stop)?;
                let step = match step {
                    Some(step) => self.annotate(step)?,
                    None => Expr::typed(K::Const(Literal::Int(1)), INT64),
                };
                for part in [&start, &stop, &step] {
                    if !is_slice_bound(part.ty()) {
                        return Err(SpecializeError::IncompatibleTypes {
                            expected: INT64,
                            found: part.ty().clone(),
                        });
                    }
                }
                let type_ = Type::Slice(
                    Box::new(start.ty().clone()),
                    Box::new(stop.ty().clone()),
                    Box::new(step.ty().clone()),
                );
                Ok(Expr::typed(
                    K::Slice {
                        start: Box::new(start),
                        stop: Box::new(stop),
                        step: Some(Box::new(step)),
                    },
                    type_,
                ))
            }

            K::Attribute(base, name) => {
                let base = self.annotate(base)?;
                let type_ = attribute_type(base.ty(), name)?;
                Ok(Expr::typed(K::Attribute(Box::new(base), name.clone()), type_))
            }

            K::PrimCall(prim, args) => {
                let args = self.annotate_all(args)?;
                let arg_types = types_of(&args);
                let expected = prim.expected_input_types(&arg_types).ok_or_else(|| {
                    SpecializeError::BadPrimArgs {
                        prim: prim_to_name(*prim).to_owned(),
                        args: Type::Tuple(arg_types.clone()).to_string(),
                    }
                })?;
                let type_ = prim.result_type(&expected);
                Ok(Expr::typed(K::PrimCall(*prim, args), type_))
            }

            K::Prim(prim) => Err(SpecializeError::FirstClassPrim(
                prim_to_name(*prim).to_owned(),
            )),

            K::Call(name, args) => self.annotate_call(name, args),

            K::Invoke(callee, args) => {
                let callee = self.annotate(callee)?;
                let args = self.annotate_all(args)?;
                let (closure, args, typed) = self.specialize_callable(callee, args)?;
                Ok(Expr::typed(
                    K::Invoke(Box::new(closure), args),
                    typed.return_type.clone(),
                ))
            }

            K::Closure(name, captured) => {
                if self.session.untyped(name).is_none() && self.session.typed(name).is_none() {
                    return Err(SpecializeError::UnknownFunction(name.clone()));
                }
                let captured = self.annotate_all(captured)?;
                let type_ = Type::Closure(ClosureType {
                    func: name.clone(),
                    captured: types_of(&captured),
                });
                Ok(Expr::typed(K::Closure(name.clone(), captured), type_))
            }

            K::ClosureElt(closure, i) => {
                let closure = self.annotate(closure)?;
                let type_ = match closure.ty() {
                    Type::Closure(closure_type) if *i < closure_type.captured.len() => {
                        closure_type.captured[*i].clone()
                    }
                    other => {
                        return Err(SpecializeError::BadIndex {
                            base: other.clone(),
                            index: INT64,
                        })
                    }
                };
                Ok(Expr::typed(K::ClosureElt(Box::new(closure), *i), type_))
            }

            K::Fn(func) => {
                self.session.register_rc(func.clone());
                let closure = Expr::closure(
                    func.name.clone(),
                    func.nonlocals.iter().map(Expr::var).collect(),
                );
                self.annotate(&closure)
            }

            K::Cast(inner, elt) => {
                let inner = self.annotate(inner)?;
                let type_ = match inner.ty() {
                    Type::Scalar(_) => Type::Scalar(*elt),
                    Type::Array(_, rank) => Type::Array(*elt, *rank),
                    other => {
                        return Err(SpecializeError::IncompatibleTypes {
                            expected: Type::Scalar(*elt),
                            found: other.clone(),
                        })
                    }
                };
                Ok(Expr::typed(K::Cast(Box::new(inner), *elt), type_))
            }

            K::Struct { name, fields } => {
                let fields = fields
                    .iter()
                    .map(|(field_name, field)| Ok((field_name.clone(), self.annotate(field)?)))
                    .collect::<Result<Vec<_>, SpecializeError>>()?;
                let type_ = Type::Struct(StructType {
                    name: name.clone(),
                    fields: fields
                        .iter()
                        .map(|(field_name, field)| (field_name.clone(), field.ty().clone()))
                        .collect(),
                });
                Ok(Expr::typed(
                    K::Struct {
                        name: name.clone(),
                        fields,
                    },
                    type_,
                ))
            }

            K::AllocArray { elt, shape } => {
                let shape = self.annotate(shape)?;
                let rank = match shape.ty() {
                    dim if is_int(dim) => 1,
                    Type::Tuple(dims) if !dims.is_empty() && dims.iter().all(is_int) => dims.len(),
                    other => {
                        return Err(SpecializeError::IncompatibleTypes {
                            expected: Type::Tuple(vec![INT64]),
                            found: other.clone(),
                        })
                    }
                };
                Ok(Expr::typed(
                    K::AllocArray {
                        elt: *elt,
                        shape: Box::new(shape),
                    },
                    Type::Array(*elt, rank),
                ))
            }

            K::Map { func, args, axis } => {
                let axis_idx = const_axis(axis)?;
                let axis = self.annotate(axis)?;
                let func = self.annotate(func)?;
                let args = self.annotate_all(args)?;
                let (slices, any_array) = slice_types(&args, axis_idx)?;
                let (func, typed) = self.specialize_elementwise(func, slices)?;
                let type_ = if any_array {
                    stacked(&typed.return_type, 1)?
                } else {
                    typed.return_type.clone()
                };
                Ok(Expr::typed(
                    K::Map {
                        func: Box::new(func),
                        args,
                        axis: Box::new(axis),
                    },
                    type_,
                ))
            }

            K::AllPairs { func, args, axis } => {
                let axis_idx = const_axis(axis)?;
                let axis = self.annotate(axis)?;
                let func = self.annotate(func)?;
                let args = self.annotate_all(args)?;
                if args.len() != 2 || !args.iter().all(|arg| arg.ty().is_array()) {
                    return Err(SpecializeError::AllPairsArgs);
                }
                let (slices, _) = slice_types(&args, axis_idx)?;
                let (func, typed) = self.specialize_elementwise(func, slices)?;
                let type_ = stacked(&typed.return_type, 2)?;
                Ok(Expr::typed(
                    K::AllPairs {
                        func: Box::new(func),
                        args,
                        axis: Box::new(axis),
                    },
                    type_,
                ))
            }

            K::Reduce {
                func,
                combine,
                init,
                args,
                axis,
            } => {
                let axis_idx = const_axis(axis)?;
                let axis = self.annotate(axis)?;
                let func = self.annotate(func)?;
                let combine = self.annotate(combine)?;
                let init = init.as_deref().map(|init| self.annotate(init)).transpose()?;
                let args = self.annotate_all(args)?;

                let (slices, _) = slice_types(&args, axis_idx)?;
                let (func, typed_func) = self.specialize_elementwise(func, slices)?;
                let elt = typed_func.return_type.clone();
                let start = init.as_ref().map_or(elt.clone(), |init| init.ty().clone());
                let (combine, acc) = self.settle_accumulator(combine, start, &elt)?;

                Ok(Expr::typed(
                    K::Reduce {
                        func: Box::new(func),
                        combine: Box::new(combine),
                        init: init.map(Box::new),
                        args,
                        axis: Box::new(axis),
                    },
                    acc,
                ))
            }

            K::Scan {
                func,
                combine,
                emit,
                init,
                args,
                axis,
            } => {
                let axis_idx = const_axis(axis)?;
                let axis = self.annotate(axis)?;
                let func = self.annotate(func)?;
                let combine = self.annotate(combine)?;
                let emit = self.annotate(emit)?;
                let init = init.as_deref().map(|init| self.annotate(init)).transpose()?;
                let args = self.annotate_all(args)?;

                let (slices, any_array) = slice_types(&args, axis_idx)?;
                let (func, typed_func) = self.specialize_elementwise(func, slices)?;
                let elt = typed_func.return_type.clone();
                let start = init.as_ref().map_or(elt.clone(), |init| init.ty().clone());
                let (combine, acc) = self.settle_accumulator(combine, start, &elt)?;
                let (emit, typed_emit) = self.specialize_elementwise(emit, vec![acc])?;
                let type_ = if any_array {
                    stacked(&typed_emit.return_type, 1)?
                } else {
                    typed_emit.return_type.clone()
                };

                Ok(Expr::typed(
                    K::Scan {
                        func: Box::new(func),
                        combine: Box::new(combine),
                        emit: Box::new(emit),
                        init: init.map(Box::new),
                        args,
                        axis: Box::new(axis),
                    },
                    type_,
                ))
            }
        }
    }

    fn annotate_call(&mut self, name: &str, args: &[Expr]) -> Result<Expr, SpecializeError> {
        let args = self.annotate_all(args)?;

        if let Some(typed) = self.session.typed(name).cloned() {
            let found = types_of(&args);
            if found != typed.input_types {
                return Err(SpecializeError::IncompatibleTypes {
                    expected: Type::Tuple(typed.input_types.clone()),
                    found: Type::Tuple(found),
                });
            }
            return Ok(Expr::typed(
                ExprKind::Call(name.to_owned(), args),
                typed.return_type.clone(),
            ));
        }

        let func = self
            .session
            .untyped(name)
            .cloned()
            .ok_or_else(|| SpecializeError::UnknownFunction(name.to_owned()))?;
        let bound = self.bind_exprs(&func, args)?;
        let typed = specialize_bound(self.session, &func, param_types(&bound))?;

        Ok(Expr::typed(
            ExprKind::Call(
                typed.name.clone(),
                bound.into_iter().map(|(_, expr)| expr).collect(),
            ),
            typed.return_type.clone(),
        ))
    }

    fn bind_exprs(
        &mut self,
        func: &UntypedFn,
        actuals: Vec<Expr>,
    ) -> Result<Vec<(String, Expr)>, SpecializeError> {
        args::bind(&func.name, &func.args, &func.nonlocals, actuals, vec![])?
            .into_iter()
            .map(|(name, expr)| Ok((name, self.complete(expr)?)))
            .collect()
    }

    /// Resolves a call through a closure-typed expression, returning the typed closure to invoke,
    /// the remaining call-site arguments, and the specialization they select.
    fn specialize_callable(
        &mut self,
        callee: Expr,
        args: Vec<Expr>,
    ) -> Result<(Expr, Vec<Expr>, Rc<TypedFn>), SpecializeError> {
        let closure_type = match callee.ty() {
            Type::Closure(closure_type) => closure_type.clone(),
            other => return Err(SpecializeError::NotCallable(other.clone())),
        };

        let num_captured = closure_type.captured.len();
        let captured: Vec<Expr> = match &callee.kind {
            ExprKind::Closure(_, captured) => captured.clone(),
            _ => closure_type
                .captured
                .iter()
                .enumerate()
                .map(|(i, type_)| {
                    Expr::typed(
                        ExprKind::ClosureElt(Box::new(callee.clone()), i),
                        type_.clone(),
                    )
                })
                .collect(),
        };

        if self.session.typed(&closure_type.func).is_some() {
            let typed = specialize_closure(self.session, &closure_type, &types_of(&args))?;
            let closure = Expr::typed(
                ExprKind::Closure(typed.name.clone(), captured),
                Type::Closure(closure_type),
            );
            return Ok((closure, args, typed));
        }

        let func = self
            .session
            .untyped(&closure_type.func)
            .cloned()
            .ok_or_else(|| SpecializeError::UnknownFunction(closure_type.func.clone()))?;
        if num_captured > func.nonlocals.len() + func.args.positional.len() {
            return Err(SpecializeError::TooManyCaptured(func.name.clone()));
        }

        let mut actuals = captured;
        actuals.extend(args);
        let bound = self.bind_exprs(&func, actuals)?;
        let typed = specialize_bound(self.session, &func, param_types(&bound))?;

        let mut fixed: Vec<Expr> = bound.into_iter().map(|(_, expr)| expr).collect();
        let rest = fixed.split_off(num_captured);
        let closure_type = ClosureType {
            func: typed.name.clone(),
            captured: types_of(&fixed),
        };
        let closure = Expr::typed(
            ExprKind::Closure(typed.name.clone(), fixed),
            Type::Closure(closure_type),
        );
        Ok((closure, rest, typed))
    }

    /// Specializes an adverb's function for one iteration's argument types. The function must
    /// take exactly those arguments after its captured values.
    fn specialize_elementwise(
        &mut self,
        func: Expr,
        arg_types: Vec<Type>,
    ) -> Result<(Expr, Rc<TypedFn>), SpecializeError> {
        let num_args = arg_types.len();
        let placeholders = arg_types
            .into_iter()
            .map(|type_| Expr::typed(ExprKind::Var(ELT_PLACEHOLDER.to_owned()), type_))
            .collect();
        let (closure, rest, typed) = self.specialize_callable(func, placeholders)?;

        let exact = rest.len() == num_args
            && rest.iter().all(|arg| arg.as_var() == Some(ELT_PLACEHOLDER));
        if !exact {
            return Err(SpecializeError::AdverbArity {
                func: typed.name.clone(),
                found: num_args,
            });
        }
        Ok((closure, typed))
    }

    /// Finds the accumulator type of a reduction: the smallest type containing the starting value
    /// and every result of `combine(acc, elt)`.
    fn settle_accumulator(
        &mut self,
        combine: Expr,
        start: Type,
        elt: &Type,
    ) -> Result<(Expr, Type), SpecializeError> {
        let mut acc = start;
        for _ in 0..MAX_ITERATIONS {
            let (typed_combine, typed) =
                self.specialize_elementwise(combine.clone(), vec![acc.clone(), elt.clone()])?;
            let joined = acc.join(&typed.return_type).ok_or_else(|| {
                SpecializeError::ConflictingTypes {
                    var: "<accumulator>".to_owned(),
                    first: acc.clone(),
                    second: typed.return_type.clone(),
                }
            })?;
            if joined == acc {
                return Ok((typed_combine, acc));
            }
            acc = joined;
        }
        Err(SpecializeError::NoFixedPoint("<accumulator>".to_owned()))
    }
}

fn param_types(bound: &[(String, Expr)]) -> Vec<(String, Type)> {
    bound
        .iter()
        .map(|(name, expr)| (name.clone(), expr.ty().clone()))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use manifold_common::data::prims::Prim;
    use manifold_common::data::types::FLOAT64;
    use manifold_common::data::untyped_ast::ArgSpec;
    use std::collections::BTreeMap;

    fn env(entries: &[(&str, Type)]) -> TypeEnv {
        entries
            .iter()
            .map(|(name, type_)| (name.to_string(), type_.clone()))
            .collect()
    }

    #[test]
    fn test_index_types() {
        let mut session = Session::new();
        let env = env(&[("a", Type::Array(ScalarType::Float32, 3)), ("i", INT64)]);

        let element = Expr::index(
            Expr::var("a"),
            Expr::tuple(vec![Expr::var("i"), Expr::int(0), Expr::int(1)]),
        );
        let typed = annotate(&mut session, &env, &element).expect("annotates");
        assert_eq!(typed.ty(), &Type::Scalar(ScalarType::Float32));

        let row = Expr::index(
            Expr::var("a"),
            Expr::tuple(vec![
                Expr::slice(Expr::none(), Expr::none(), None),
                Expr::var("i"),
            ]),
        );
        let typed = annotate(&mut session, &env, &row).expect("annotates");
        assert_eq!(typed.ty(), &Type::Array(ScalarType::Float32, 2));

        let too_many = Expr::index(Expr::var("a"), Expr::tuple(vec![Expr::int(0); 4]));
        assert!(matches!(
            annotate(&mut session, &env, &too_many),
            Err(SpecializeError::BadIndex { .. })
        ));
    }

    #[test]
    fn test_slice_step_defaults_to_one() {
        let mut session = Session::new();
        let typed = annotate(
            &mut session,
            &BTreeMap::new(),
            &Expr::slice(Expr::int(1), Expr::none(), None),
        )
        .expect("annotates");
        match &typed.kind {
            ExprKind::Slice {
                step: Some(step), ..
            } => assert_eq!(step.kind, ExprKind::Const(Literal::Int(1))),
            other => panic!("expected a slice, got {:?}", other),
        }
        assert_eq!(
            typed.ty(),
            &Type::Slice(Box::new(INT64), Box::new(Type::None), Box::new(INT64))
        );
    }

    #[test]
    fn test_loop_variable_widens() {
        let mut session = Session::new();
        // x = 0; while x < 10 { x = x + 0.5 }; return x
        let func = UntypedFn::new(
            "widen",
            ArgSpec::positional(&[]),
            vec![
                Stmt::set("x", Expr::int(0)),
                Stmt::While {
                    cond: Expr::prim(Prim::Less, vec![Expr::var("x"), Expr::int(10)]),
                    body: vec![Stmt::set(
                        "x",
                        Expr::prim(Prim::Add, vec![Expr::var("x"), Expr::float(0.5)]),
                    )],
                    merge: BTreeMap::new(),
                },
                Stmt::ret(Expr::var("x")),
            ],
        );
        let inference = infer_fn(&mut session, &func, &[]).expect("infers");
        assert_eq!(inference.env["x"], FLOAT64);
        assert_eq!(inference.return_type, FLOAT64);
    }

    #[test]
    fn test_conflicting_assignments() {
        let mut session = Session::new();
        let func = UntypedFn::new(
            "conflict",
            ArgSpec::positional(&["a"]),
            vec![
                Stmt::set("x", Expr::var("a")),
                Stmt::set("x", Expr::bool(true)),
                Stmt::ret(Expr::var("x")),
            ],
        );
        let params = vec![("a".to_owned(), Type::Array(ScalarType::Int64, 1))];
        assert!(matches!(
            infer_fn(&mut session, &func, &params),
            Err(SpecializeError::ConflictingTypes { .. })
        ));
    }

    #[test]
    fn test_reduce_accumulator_widens_to_init() {
        let mut session = Session::new();
        session.register(UntypedFn::new(
            "ident",
            ArgSpec::positional(&["x"]),
            vec![Stmt::ret(Expr::var("x"))],
        ));
        session.register(UntypedFn::new(
            "plus",
            ArgSpec::positional(&["acc", "x"]),
            vec![Stmt::ret(Expr::prim(
                Prim::Add,
                vec![Expr::var("acc"), Expr::var("x")],
            ))],
        ));

        let env = env(&[("xs", Type::Array(ScalarType::Int64, 1))]);
        let reduce = Expr::reduce(
            Expr::closure("ident", vec![]),
            Expr::closure("plus", vec![]),
            Some(Expr::float(0.0)),
            vec![Expr::var("xs")],
            0,
        );
        let typed = annotate(&mut session, &env, &reduce).expect("annotates");
        assert_eq!(typed.ty(), &FLOAT64);
        match &typed.kind {
            ExprKind::Reduce { combine, .. } => {
                assert_eq!(
                    combine.kind,
                    ExprKind::Closure("plus[float64,int64]".to_owned(), vec![])
                );
            }
            other => panic!("expected a reduce, got {:?}", other),
        }
    }

    #[test]
    fn test_first_class_prim_is_rejected() {
        let mut session = Session::new();
        let env = env(&[("xs", Type::Array(ScalarType::Int64, 1))]);
        let map = Expr::map(
            ExprKind::Prim(Prim::Negative).into(),
            vec![Expr::var("xs")],
            0,
        );
        assert_eq!(
            annotate(&mut session, &env, &map).err(),
            Some(SpecializeError::FirstClassPrim("negative".to_owned()))
        );
    }
}
