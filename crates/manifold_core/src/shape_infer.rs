//! Symbolic result shapes of typed functions.
//!
//! Shapes are expressed in terms of the shape variables `param_layout` assigns to the function's
//! parameters, so a backend can compute the size of a result before running the function body.

use std::collections::BTreeMap;

use manifold_common::data::prims::Prim;
use manifold_common::data::shape_ast::{param_layout, ParamShape, Shape, ShapeOp};
use manifold_common::data::syntax::{Block, Expr, ExprKind, Literal, Stmt};
use manifold_common::data::typed_ast::TypedFn;
use manifold_common::data::types::Type;

use crate::registry::Session;
use crate::type_infer::const_axis;

// Loops whose abstract state is still changing after this many passes are given up on.
const MAX_LOOP_PASSES: usize = 8;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeInferError {
    #[error("the result shape of {0} depends on runtime data")]
    DataDependent(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("{0} is recursive, so its result shape cannot be inferred")]
    Recursive(String),
    #[error("cannot infer the shape of a call through a value of type {0}")]
    NotCallable(Type),
    #[error("adverb axis must be a non-negative integer constant")]
    NonConstantAxis,
}

/// What shape inference knows about a value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Abstract {
    // The scalar's value, when it can be expressed in terms of the inputs
    Scalar(Shape),
    // One entry per dimension
    Array(Vec<Shape>),
    Tuple(Vec<Abstract>),
    Closure(String, Vec<Abstract>),
    Opaque,
}

impl Abstract {
    fn unknown_of(type_: &Type) -> Abstract {
        match type_ {
            Type::Scalar(_) => Abstract::Scalar(Shape::Unknown),
            Type::Array(_, rank) => Abstract::Array(vec![Shape::Unknown; *rank]),
            Type::Tuple(items) => Abstract::Tuple(items.iter().map(Abstract::unknown_of).collect()),
            Type::Struct(struct_type) => Abstract::Tuple(
                struct_type
                    .fields
                    .iter()
                    .map(|(_, field)| Abstract::unknown_of(field))
                    .collect(),
            ),
            Type::Closure(closure) => Abstract::Closure(
                closure.func.clone(),
                closure.captured.iter().map(Abstract::unknown_of).collect(),
            ),
            Type::None | Type::Slice(..) => Abstract::Opaque,
        }
    }

    fn join(&self, other: &Abstract) -> Abstract {
        fn join_dim(a: &Shape, b: &Shape) -> Shape {
            if a == b {
                a.clone()
            } else {
                Shape::Unknown
            }
        }

        match (self, other) {
            _ if self == other => self.clone(),
            (Abstract::Scalar(a), Abstract::Scalar(b)) => Abstract::Scalar(join_dim(a, b)),
            (Abstract::Array(a), Abstract::Array(b)) if a.len() == b.len() => {
                Abstract::Array(a.iter().zip(b).map(|(a, b)| join_dim(a, b)).collect())
            }
            (Abstract::Tuple(a), Abstract::Tuple(b)) if a.len() == b.len() => {
                Abstract::Tuple(a.iter().zip(b).map(|(a, b)| a.join(b)).collect())
            }
            (Abstract::Closure(f, a), Abstract::Closure(g, b)) if f == g && a.len() == b.len() => {
                Abstract::Closure(f.clone(), a.iter().zip(b).map(|(a, b)| a.join(b)).collect())
            }
            _ => Abstract::Opaque,
        }
    }

    fn to_shape(&self) -> Shape {
        match self {
            Abstract::Scalar(_) => Shape::scalar(),
            Abstract::Array(dims) => Shape::Tuple(dims.clone()),
            Abstract::Tuple(items) => Shape::Tuple(items.iter().map(Abstract::to_shape).collect()),
            Abstract::Closure(name, captured) => {
                Shape::Closure(name.clone(), captured.iter().map(Abstract::to_shape).collect())
            }
            Abstract::Opaque => Shape::Unknown,
        }
    }

    fn value(&self) -> Shape {
        match self {
            Abstract::Scalar(value) => value.clone(),
            _ => Shape::Unknown,
        }
    }
}

fn param_abstract(layout: &ParamShape, type_: &Type) -> Abstract {
    match (layout, type_) {
        (ParamShape::Scalar(var), _) => Abstract::Scalar(Shape::Var(*var)),
        (ParamShape::Array(var, rank), _) => Abstract::Array(
            (0..*rank)
                .map(|i| Shape::Dim(Box::new(Shape::Var(*var)), i))
                .collect(),
        ),
        (ParamShape::Tuple(items), Type::Tuple(item_types)) => Abstract::Tuple(
            items
                .iter()
                .zip(item_types)
                .map(|(item, item_type)| param_abstract(item, item_type))
                .collect(),
        ),
        (_, type_) => Abstract::unknown_of(type_),
    }
}

/// The symbolic shape of `func`'s result in terms of its parameters' shape variables.
pub fn result_shape(session: &Session, func: &TypedFn) -> Result<Shape, ShapeInferError> {
    let args = param_layout(&func.input_types)
        .iter()
        .zip(&func.input_types)
        .map(|(layout, type_)| param_abstract(layout, type_))
        .collect();

    let mut infer = ShapeInfer {
        session,
        active: Vec::new(),
    };
    let result = infer.infer_fn(func, args)?;
    let shape = result.to_shape();
    if shape.contains_unknown() {
        return Err(ShapeInferError::DataDependent(func.name.clone()));
    }
    Ok(shape)
}

struct ShapeInfer<'a> {
    session: &'a Session,
    active: Vec<String>,
}

type Env = BTreeMap<String, Abstract>;

struct Frame {
    env: Env,
    returned: Option<Abstract>,
}

impl Frame {
    fn record_return(&mut self, value: Abstract) {
        self.returned = Some(match &self.returned {
            None => value,
            Some(existing) => existing.join(&value),
        });
    }

    fn join_env(&self, other: &Env) -> Env {
        let mut joined = self.env.clone();
        for (name, value) in other {
            let merged = match joined.get(name) {
                Some(existing) => existing.join(value),
                None => value.clone(),
            };
            joined.insert(name.clone(), merged);
        }
        joined
    }
}

fn int_op(prim: Prim) -> Option<ShapeOp> {
    match prim {
        Prim::Add => Some(ShapeOp::Add),
        Prim::Subtract => Some(ShapeOp::Sub),
        Prim::Multiply => Some(ShapeOp::Mult),
        Prim::Divide => Some(ShapeOp::Div),
        Prim::Modulo => Some(ShapeOp::Mod),
        _ => None,
    }
}

fn broadcast_dims(args: &[Abstract], rank: usize) -> Vec<Shape> {
    (0..rank)
        .map(|pos| {
            // Position counted from the trailing dimension
            let back = rank - 1 - pos;
            args.iter()
                .filter_map(|arg| match arg {
                    Abstract::Array(dims) if back < dims.len() => {
                        Some(dims[dims.len() - 1 - back].clone())
                    }
                    _ => None,
                })
                .find(|dim| *dim != Shape::Const(1))
                .unwrap_or(Shape::Const(1))
        })
        .collect()
}

fn stack_elt(elt: Abstract, len: Shape, axis: usize) -> Abstract {
    match elt {
        Abstract::Scalar(_) => Abstract::Array(vec![len]),
        Abstract::Array(mut dims) => {
            let pos = axis.min(dims.len());
            dims.insert(pos, len);
            Abstract::Array(dims)
        }
        _ => Abstract::Opaque,
    }
}

impl<'a> ShapeInfer<'a> {
    fn infer_fn(
        &mut self,
        func: &TypedFn,
        args: Vec<Abstract>,
    ) -> Result<Abstract, ShapeInferError> {
        if self.active.contains(&func.name) {
            return Err(ShapeInferError::Recursive(func.name.clone()));
        }
        self.active.push(func.name.clone());

        let mut frame = Frame {
            env: func.arg_names.iter().cloned().zip(args).collect(),
            returned: None,
        };
        let result = self.infer_block(func, &func.body, &mut frame);
        self.active.pop();
        result?;

        Ok(frame.returned.unwrap_or(Abstract::Opaque))
    }

    fn call(&mut self, name: &str, args: Vec<Abstract>) -> Result<Abstract, ShapeInferError> {
        let callee = self
            .session
            .typed(name)
            .cloned()
            .ok_or_else(|| ShapeInferError::UnknownFunction(name.to_owned()))?;
        self.infer_fn(&callee, args)
    }

    fn invoke(
        &mut self,
        callee: &Abstract,
        args: Vec<Abstract>,
    ) -> Result<Abstract, ShapeInferError> {
        match callee {
            Abstract::Closure(name, fixed) => {
                let mut all_args = fixed.clone();
                all_args.extend(args);
                self.call(name, all_args)
            }
            _ => Err(ShapeInferError::NotCallable(Type::None)),
        }
    }

    fn infer_all(&mut self, exprs: &[Expr], env: &Env) -> Result<Vec<Abstract>, ShapeInferError> {
        exprs.iter().map(|expr| self.infer_expr(expr, env)).collect()
    }

    // Slices of every array argument along `axis`, plus the shared axis length.
    fn slice_args(args: &[Abstract], axis: usize) -> (Vec<Abstract>, Shape) {
        let mut len = Shape::Unknown;
        let slices = args
            .iter()
            .map(|arg| match arg {
                Abstract::Array(dims) if axis < dims.len() => {
                    if len == Shape::Unknown {
                        len = dims[axis].clone();
                    }
                    let mut dims = dims.clone();
                    dims.remove(axis);
                    if dims.is_empty() {
                        Abstract::Scalar(Shape::Unknown)
                    } else {
                        Abstract::Array(dims)
                    }
                }
                other => other.clone(),
            })
            .collect();
        (slices, len)
    }

    fn slice_extent(
        &mut self,
        slice: &Expr,
        dim: Shape,
        env: &Env,
    ) -> Result<Shape, ShapeInferError> {
        let ExprKind::Slice { start, stop, step } = &slice.kind else {
            return Ok(Shape::Unknown);
        };
        let unit_step = match step.as_deref().map(|step| &step.kind) {
            None | Some(ExprKind::Const(Literal::Int(1))) => true,
            _ => false,
        };
        if !unit_step {
            return Ok(Shape::Unknown);
        }
        let start = self.slice_bound(start, Shape::Const(0), env)?;
        let stop = self.slice_bound(stop, dim, env)?;
        Ok(Shape::binop(ShapeOp::Sub, stop, start))
    }

    // Negative bounds count from the end and are clamped at runtime, so they stay unknown.
    fn slice_bound(
        &mut self,
        bound: &Expr,
        default: Shape,
        env: &Env,
    ) -> Result<Shape, ShapeInferError> {
        Ok(match &bound.kind {
            ExprKind::Const(Literal::None) => default,
            ExprKind::Const(Literal::Int(value)) if *value < 0 => Shape::Unknown,
            _ => self.infer_expr(bound, env)?.value(),
        })
    }

    fn infer_expr(&mut self, expr: &Expr, env: &Env) -> Result<Abstract, ShapeInferError> {
        use ExprKind as K;

        let type_ = expr.ty();
        Ok(match &expr.kind {
            K::Const(Literal::Int(value)) => Abstract::Scalar(Shape::Const(*value)),
            K::Const(Literal::None) => Abstract::Opaque,
            K::Const(_) => Abstract::Scalar(Shape::Unknown),

            K::Var(name) => env
                .get(name)
                .cloned()
                .unwrap_or_else(|| Abstract::unknown_of(type_)),

            K::Tuple(items) => Abstract::Tuple(self.infer_all(items, env)?),

            K::TupleProj(tuple, i) => match self.infer_expr(tuple, env)? {
                Abstract::Tuple(items) if *i < items.len() => items[*i].clone(),
                _ => Abstract::unknown_of(type_),
            },

            K::Array(items) => {
                let items = self.infer_all(items, env)?;
                let mut dims = vec![Shape::Const(items.len() as i64)];
                if let Some(Abstract::Array(inner)) = items.first() {
                    dims.extend(inner.iter().cloned());
                }
                Abstract::Array(dims)
            }

            K::Index(base, index) => {
                let base_value = self.infer_expr(base, env)?;
                match base_value {
                    Abstract::Array(dims) => {
                        let items: Vec<&Expr> = match &index.kind {
                            K::Tuple(items) => items.iter().collect(),
                            _ => vec![&**index],
                        };
                        let mut result = Vec::new();
                        for (i, item) in items.iter().enumerate() {
                            if let Type::Slice(..) = item.ty() {
                                let dim = dims.get(i).cloned().unwrap_or(Shape::Unknown);
                                result.push(self.slice_extent(item, dim, env)?);
                            }
                        }
                        result.extend(dims.iter().skip(items.len()).cloned());
                        if result.is_empty() {
                            Abstract::Scalar(Shape::Unknown)
                        } else {
                            Abstract::Array(result)
                        }
                    }
                    Abstract::Tuple(items) => match &index.kind {
                        K::Const(Literal::Int(i)) => {
                            let i = if *i < 0 { *i + items.len() as i64 } else { *i };
                            items
                                .get(i as usize)
                                .cloned()
                                .unwrap_or_else(|| Abstract::unknown_of(type_))
                        }
                        _ => Abstract::unknown_of(type_),
                    },
                    _ => Abstract::unknown_of(type_),
                }
            }

            K::Slice { .. } => Abstract::Opaque,

            K::Attribute(base, name) => {
                let base_value = self.infer_expr(base, env)?;
                match (&base_value, name.as_str()) {
                    (Abstract::Array(dims), "shape") => Abstract::Tuple(
                        dims.iter().cloned().map(Abstract::Scalar).collect(),
                    ),
                    (Abstract::Array(dims), "ndim") => {
                        Abstract::Scalar(Shape::Const(dims.len() as i64))
                    }
                    (Abstract::Array(dims), "size") => Abstract::Scalar(
                        dims.iter().cloned().fold(Shape::Const(1), |acc, dim| {
                            Shape::binop(ShapeOp::Mult, acc, dim)
                        }),
                    ),
                    (Abstract::Tuple(fields), _) => match base.ty() {
                        Type::Struct(struct_type) => struct_type
                            .field_index(name)
                            .and_then(|i| fields.get(i).cloned())
                            .unwrap_or_else(|| Abstract::unknown_of(type_)),
                        _ => Abstract::unknown_of(type_),
                    },
                    _ => Abstract::unknown_of(type_),
                }
            }

            K::PrimCall(prim, args) => {
                let args = self.infer_all(args, env)?;
                match type_ {
                    Type::Array(_, rank) => Abstract::Array(broadcast_dims(&args, *rank)),
                    Type::Scalar(elt) if elt.is_integer() => match (int_op(*prim), &args[..]) {
                        (Some(op), [lhs, rhs]) => {
                            Abstract::Scalar(Shape::binop(op, lhs.value(), rhs.value()))
                        }
                        _ => Abstract::Scalar(Shape::Unknown),
                    },
                    _ => Abstract::unknown_of(type_),
                }
            }

            K::Prim(_) | K::Fn(_) => Abstract::Opaque,

            K::Call(name, args) => {
                let args = self.infer_all(args, env)?;
                self.call(name, args)?
            }

            K::Invoke(callee, args) => {
                let callee = self.infer_expr(callee, env)?;
                let args = self.infer_all(args, env)?;
                self.invoke(&callee, args)?
            }

            K::Closure(name, captured) => {
                Abstract::Closure(name.clone(), self.infer_all(captured, env)?)
            }

            K::ClosureElt(closure, i) => match self.infer_expr(closure, env)? {
                Abstract::Closure(_, captured) if *i < captured.len() => captured[*i].clone(),
                _ => Abstract::unknown_of(type_),
            },

            K::Cast(inner, _) => match self.infer_expr(inner, env)? {
                Abstract::Scalar(_) if !type_.elt_type().is_some_and(|elt| elt.is_integer()) => {
                    Abstract::Scalar(Shape::Unknown)
                }
                value => value,
            },

            K::Struct { fields, .. } => {
                let fields: Vec<Expr> = fields.iter().map(|(_, field)| field.clone()).collect();
                Abstract::Tuple(self.infer_all(&fields, env)?)
            }

            K::AllocArray { shape, .. } => match self.infer_expr(shape, env)? {
                Abstract::Scalar(len) => Abstract::Array(vec![len]),
                Abstract::Tuple(dims) => {
                    Abstract::Array(dims.iter().map(Abstract::value).collect())
                }
                _ => Abstract::unknown_of(type_),
            },

            K::Map { func, args, axis } => {
                let axis = const_axis(axis).map_err(|_| ShapeInferError::NonConstantAxis)?;
                let func = self.infer_expr(func, env)?;
                let args = self.infer_all(args, env)?;
                let (slices, len) = Self::slice_args(&args, axis);
                let elt = self.invoke(&func, slices)?;
                if args.iter().any(|arg| matches!(arg, Abstract::Array(_))) {
                    stack_elt(elt, len, axis)
                } else {
                    elt
                }
            }

            K::AllPairs { func, args, axis } => {
                let axis = const_axis(axis).map_err(|_| ShapeInferError::NonConstantAxis)?;
                let func = self.infer_expr(func, env)?;
                let args = self.infer_all(args, env)?;
                let (nx, ny, slices) = match &args[..] {
                    [x, y] => {
                        let (x_slices, nx) = Self::slice_args(std::slice::from_ref(x), axis);
                        let (y_slices, ny) = Self::slice_args(std::slice::from_ref(y), axis);
                        (nx, ny, vec![x_slices[0].clone(), y_slices[0].clone()])
                    }
                    _ => return Ok(Abstract::unknown_of(type_)),
                };
                match self.invoke(&func, slices)? {
                    Abstract::Scalar(_) => Abstract::Array(vec![nx, ny]),
                    Abstract::Array(dims) => {
                        let mut all = vec![nx, ny];
                        all.extend(dims);
                        Abstract::Array(all)
                    }
                    _ => Abstract::unknown_of(type_),
                }
            }

            K::Reduce {
                func,
                combine,
                init,
                args,
                axis,
            } => {
                let axis = const_axis(axis).map_err(|_| ShapeInferError::NonConstantAxis)?;
                let func = self.infer_expr(func, env)?;
                let combine = self.infer_expr(combine, env)?;
                let args = self.infer_all(args, env)?;
                let (slices, _) = Self::slice_args(&args, axis);
                let elt = self.invoke(&func, slices)?;
                let acc = match init {
                    Some(init) => self.infer_expr(init, env)?,
                    None => elt.clone(),
                };
                let combined = self.invoke(&combine, vec![acc.clone(), elt])?;
                acc.join(&combined)
            }

            K::Scan {
                func,
                combine,
                emit,
                init,
                args,
                axis,
            } => {
                let axis = const_axis(axis).map_err(|_| ShapeInferError::NonConstantAxis)?;
                let func = self.infer_expr(func, env)?;
                let combine = self.infer_expr(combine, env)?;
                let emit = self.infer_expr(emit, env)?;
                let args = self.infer_all(args, env)?;
                let (slices, len) = Self::slice_args(&args, axis);
                let elt = self.invoke(&func, slices)?;
                let acc = match init {
                    Some(init) => self.infer_expr(init, env)?,
                    None => elt.clone(),
                };
                let combined = self.invoke(&combine, vec![acc.clone(), elt])?;
                let emitted = self.invoke(&emit, vec![acc.join(&combined)])?;
                if args.iter().any(|arg| matches!(arg, Abstract::Array(_))) {
                    stack_elt(emitted, len, axis)
                } else {
                    emitted
                }
            }
        })
    }

    fn bind(env: &mut Env, lhs: &Expr, value: Abstract) {
        match &lhs.kind {
            ExprKind::Var(name) => {
                env.insert(name.clone(), value);
            }
            ExprKind::Tuple(items) => {
                for (i, item) in items.iter().enumerate() {
                    let item_value = match &value {
                        Abstract::Tuple(values) if i < values.len() => values[i].clone(),
                        _ => Abstract::unknown_of(item.ty()),
                    };
                    Self::bind(env, item, item_value);
                }
            }
            // Writes into existing storage never change its shape.
            _ => {}
        }
    }

    fn infer_block(
        &mut self,
        func: &TypedFn,
        block: &Block,
        frame: &mut Frame,
    ) -> Result<(), ShapeInferError> {
        for stmt in block {
            match stmt {
                Stmt::Assign { lhs, rhs } => {
                    let value = self.infer_expr(rhs, &frame.env)?;
                    Self::bind(&mut frame.env, lhs, value);
                }

                Stmt::Return(value) => {
                    let value = self.infer_expr(value, &frame.env)?;
                    frame.record_return(value);
                }

                Stmt::If {
                    true_block,
                    false_block,
                    merge,
                    ..
                } => {
                    let mut true_frame = Frame {
                        env: frame.env.clone(),
                        returned: frame.returned.clone(),
                    };
                    self.infer_block(func, true_block, &mut true_frame)?;
                    let mut false_frame = Frame {
                        env: frame.env.clone(),
                        returned: frame.returned.clone(),
                    };
                    self.infer_block(func, false_block, &mut false_frame)?;

                    let mut merged = Vec::new();
                    for (name, (left, right)) in merge {
                        let left = self.infer_expr(left, &true_frame.env)?;
                        let right = self.infer_expr(right, &false_frame.env)?;
                        merged.push((name.clone(), left.join(&right)));
                    }

                    frame.env = true_frame.join_env(&false_frame.env);
                    frame.env.extend(merged);
                    for returned in [true_frame.returned, false_frame.returned]
                        .into_iter()
                        .flatten()
                    {
                        frame.record_return(returned);
                    }
                }

                Stmt::While { body, merge, .. } => {
                    for (name, (left, _)) in merge {
                        let value = self.infer_expr(left, &frame.env)?;
                        frame.env.insert(name.clone(), value);
                    }

                    let mut settled = false;
                    for _ in 0..MAX_LOOP_PASSES {
                        let mut body_frame = Frame {
                            env: frame.env.clone(),
                            returned: frame.returned.clone(),
                        };
                        self.infer_block(func, body, &mut body_frame)?;
                        for (name, (_, right)) in merge {
                            let value = self.infer_expr(right, &body_frame.env)?;
                            body_frame.env.insert(name.clone(), value);
                        }

                        let joined = frame.join_env(&body_frame.env);
                        if let Some(returned) = body_frame.returned {
                            frame.record_return(returned);
                        }
                        if joined == frame.env {
                            settled = true;
                            break;
                        }
                        frame.env = joined;
                    }
                    if !settled {
                        return Err(ShapeInferError::DataDependent(func.name.clone()));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::specialize::specialize;
    use manifold_common::data::shape_ast::ShapeVarId;
    use manifold_common::data::types::{ScalarType, INT64};
    use manifold_common::data::untyped_ast::{ArgSpec, UntypedFn};
    use id_collections::Id;

    fn dim(var: usize, i: usize) -> Shape {
        Shape::Dim(Box::new(Shape::Var(ShapeVarId::from_index(var))), i)
    }

    #[test]
    fn test_all_pairs_shape() {
        let mut session = Session::new();
        session.register(UntypedFn::new(
            "dot",
            ArgSpec::positional(&["a", "b"]),
            vec![Stmt::ret(Expr::prim(
                Prim::Multiply,
                vec![Expr::var("a"), Expr::var("b")],
            ))],
        ));
        session.register(UntypedFn::new(
            "outer",
            ArgSpec::positional(&["xs", "ys"]),
            vec![Stmt::ret(Expr::all_pairs(
                Expr::closure("dot", vec![]),
                Expr::var("xs"),
                Expr::var("ys"),
                0,
            ))],
        ));
        let row = Type::Array(ScalarType::Float64, 2);
        let typed = specialize(&mut session, "outer", &[row.clone(), row]).expect("specializes");
        let shape = result_shape(&session, &typed).expect("infers");
        assert_eq!(shape, Shape::Tuple(vec![dim(0, 0), dim(1, 0), dim(0, 1)]));
    }

    #[test]
    fn test_allocation_from_scalar_arithmetic() {
        let mut session = Session::new();
        session.register(UntypedFn::new(
            "grow",
            ArgSpec::positional(&["n"]),
            vec![Stmt::ret(ExprKind::AllocArray {
                elt: ScalarType::Int64,
                shape: Box::new(Expr::tuple(vec![
                    Expr::prim(Prim::Add, vec![Expr::var("n"), Expr::int(1)]),
                    Expr::int(4),
                ])),
            }
            .into())],
        ));
        let typed = specialize(&mut session, "grow", &[INT64]).expect("specializes");
        let n = Shape::Var(ShapeVarId::from_index(0));
        assert_eq!(
            result_shape(&session, &typed),
            Ok(Shape::Tuple(vec![
                Shape::binop(ShapeOp::Add, n, Shape::Const(1)),
                Shape::Const(4)
            ]))
        );
    }

    #[test]
    fn test_branch_dependent_shape() {
        let mut session = Session::new();
        let mut merge = manifold_common::data::syntax::Merge::new();
        merge.insert(
            "out".to_owned(),
            (
                Expr::var("xs"),
                Expr::index(Expr::var("xs"), Expr::slice(Expr::int(1), Expr::none(), None)),
            ),
        );
        session.register(UntypedFn::new(
            "maybe_tail",
            ArgSpec::positional(&["xs", "c"]),
            vec![
                Stmt::If {
                    cond: Expr::var("c"),
                    true_block: vec![],
                    false_block: vec![],
                    merge,
                },
                Stmt::ret(Expr::var("out")),
            ],
        ));
        let typed = specialize(
            &mut session,
            "maybe_tail",
            &[Type::Array(ScalarType::Int64, 1), Type::Scalar(ScalarType::Bool)],
        )
        .expect("specializes");
        assert_eq!(
            result_shape(&session, &typed),
            Err(ShapeInferError::DataDependent(typed.name.clone()))
        );
    }
}
