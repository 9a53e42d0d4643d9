//! A reference interpreter for untyped and typed IR.

pub mod array;
pub mod value;

use im_rc::Vector;
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::rc::Rc;

use manifold_common::data::prims::Prim;
use manifold_common::data::syntax::{Block, Expr, ExprKind, Merge, Stmt};
use manifold_common::data::typed_ast::TypedFn;
use manifold_common::data::types::{ScalarType, Type};
use manifold_common::data::untyped_ast::UntypedFn;
use manifold_common::prim_config::{prim_to_name, PrimSignature};

use crate::adverbs::{self, AdverbError, Apply, Fold};
use crate::args::{self, BindError};
use crate::interpreter::array::{
    broadcast_shapes, indices, ArrayError, ArrayValue, IndexItem, Scalar, SliceValue,
};
use crate::interpreter::value::{ClosureValue, FnDef, StructValue, Value};
use crate::registry::{Session, TranslateError};

const STACK_RED_ZONE_BYTES: usize = 256 * 1024;
const STACK_GROW_BYTES: usize = 1024 * 1024;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum InterpErrorKind {
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error(transparent)]
    Adverb(#[from] AdverbError),
    #[error(transparent)]
    Array(#[from] ArrayError),
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error("variable '{0}' is not bound")]
    UnboundVariable(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("{0} is not callable")]
    NotCallable(String),
    #[error("{func} takes {expected} arguments but {found} were given")]
    ArgCount {
        func: String,
        expected: usize,
        found: usize,
    },
    #[error("operator {prim} does not accept arguments {args}")]
    BadPrimArgs { prim: String, args: String },
    #[error("operands with shapes {0:?} cannot be broadcast together")]
    Broadcast(Vec<Vec<usize>>),
    #[error("integer modulo by zero")]
    DivisionByZero,
    #[error("cannot index {base} with {index}")]
    BadIndex { base: String, index: String },
    #[error("{base} has no attribute '{name}'")]
    UnknownAttribute { base: String, name: String },
    #[error("cannot unpack {found} into {expected} targets")]
    Unpack { expected: usize, found: String },
    #[error("condition must be a scalar, found {0}")]
    BadCondition(String),
    #[error("cannot assign to this kind of expression")]
    BadAssignTarget,
    #[error("cannot allocate an array of shape {0}")]
    BadShape(String),
    #[error("cannot cast {0}")]
    BadCast(String),
}

/// The chain of calls active when an error was raised.
#[derive(Debug, Clone, PartialEq)]
pub struct StackTrace(Vector<Rc<String>>);

impl Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.0.iter().enumerate() {
            write!(f, "{}", line.as_str())?;
            if i != self.0.len() - 1 {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

impl StackTrace {
    fn new() -> StackTrace {
        StackTrace({
            let mut v = Vector::new();
            v.push_front(Rc::new("Stacktrace:".into()));
            v
        })
    }

    fn add_frame(&self, s: impl AsRef<str>) -> StackTrace {
        StackTrace({
            let mut v = self.0.clone();
            v.push_back(Rc::new(s.as_ref().lines().collect::<Vec<&str>>().join(" ")));
            v
        })
    }

    fn is_root(&self) -> bool {
        self.0.len() == 1
    }

    fn error(&self, kind: impl Into<InterpErrorKind>) -> InterpError {
        InterpError {
            kind: kind.into(),
            stacktrace: self.clone(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone)]
#[error("{kind}\n{stacktrace}")]
pub struct InterpError {
    pub kind: InterpErrorKind,
    pub stacktrace: StackTrace,
}

impl InterpError {
    // Errors raised without a trace pick up the one active where they surface.
    fn in_context(mut self, stacktrace: &StackTrace) -> InterpError {
        if self.stacktrace.is_root() {
            self.stacktrace = stacktrace.clone();
        }
        self
    }
}

impl From<AdverbError> for InterpError {
    fn from(err: AdverbError) -> Self {
        StackTrace::new().error(err)
    }
}

type Env = BTreeMap<String, Value>;

/// How control leaves a block.
enum Flow {
    Normal,
    Return(Value),
}

pub struct Interpreter<'a> {
    session: &'a mut Session,
}

/// Calls a closure, primitive or host function value.
pub fn call(
    session: &mut Session,
    target: &Value,
    args: Vec<Value>,
) -> Result<Value, InterpError> {
    Interpreter::new(session).call(target, args)
}

fn describe(values: &[Value]) -> String {
    let rendered: Vec<String> = values.iter().map(Value::to_string).collect();
    format!("({})", rendered.join(", "))
}

fn scalar_op(prim: Prim, args: &[Scalar], input: ScalarType) -> Result<Scalar, InterpErrorKind> {
    use Prim as P;

    let float = input.is_float();
    let x = args[0];
    let y = args.get(1).copied().unwrap_or(x);
    let (a, b) = (x.as_i64(), y.as_i64());
    let (p, q) = (x.as_f64(), y.as_f64());

    Ok(match prim {
        P::Add if float => Scalar::Float(p + q),
        P::Add => Scalar::Int(a.wrapping_add(b)),
        P::Subtract if float => Scalar::Float(p - q),
        P::Subtract => Scalar::Int(a.wrapping_sub(b)),
        P::Multiply if float => Scalar::Float(p * q),
        P::Multiply => Scalar::Int(a.wrapping_mul(b)),
        P::Divide => Scalar::Float(p / q),
        // The remainder takes the sign of the divisor.
        P::Modulo if float => {
            let r = p % q;
            Scalar::Float(if r != 0.0 && (r < 0.0) != (q < 0.0) { r + q } else { r })
        }
        P::Modulo => {
            if b == 0 {
                return Err(InterpErrorKind::DivisionByZero);
            }
            let r = a.wrapping_rem(b);
            Scalar::Int(if r != 0 && (r < 0) != (b < 0) { r + b } else { r })
        }
        P::Negative if float => Scalar::Float(-p),
        P::Negative => Scalar::Int(a.wrapping_neg()),
        P::Abs if float => Scalar::Float(p.abs()),
        P::Abs => Scalar::Int(a.wrapping_abs()),
        P::Maximum if float => Scalar::Float(p.max(q)),
        P::Maximum => Scalar::Int(a.max(b)),
        P::Minimum if float => Scalar::Float(p.min(q)),
        P::Minimum => Scalar::Int(a.min(b)),
        P::Sqrt => Scalar::Float(p.sqrt()),
        P::Exp => Scalar::Float(p.exp()),
        P::Log => Scalar::Float(p.ln()),
        P::Equal if float => Scalar::Bool(p == q),
        P::Equal => Scalar::Bool(a == b),
        P::NotEqual if float => Scalar::Bool(p != q),
        P::NotEqual => Scalar::Bool(a != b),
        P::Less if float => Scalar::Bool(p < q),
        P::Less => Scalar::Bool(a < b),
        P::LessEqual if float => Scalar::Bool(p <= q),
        P::LessEqual => Scalar::Bool(a <= b),
        P::Greater if float => Scalar::Bool(p > q),
        P::Greater => Scalar::Bool(a > b),
        P::GreaterEqual if float => Scalar::Bool(p >= q),
        P::GreaterEqual => Scalar::Bool(a >= b),
        P::LogicalAnd => Scalar::Bool(x.truthy() && y.truthy()),
        P::LogicalOr => Scalar::Bool(x.truthy() || y.truthy()),
        P::LogicalNot => Scalar::Bool(!x.truthy()),
    })
}

/// Evaluates a primitive elementwise, broadcasting array operands against each other.
fn eval_prim(
    prim: Prim,
    args: &[Value],
    result_type: Option<&Type>,
) -> Result<Value, InterpErrorKind> {
    let bad_args = || InterpErrorKind::BadPrimArgs {
        prim: prim_to_name(prim).to_owned(),
        args: describe(args),
    };

    let arg_types = args
        .iter()
        .map(|arg| match arg {
            Value::Scalar(_) | Value::Array(_) => arg.type_of(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()
        .ok_or_else(bad_args)?;
    let expected = prim.expected_input_types(&arg_types).ok_or_else(bad_args)?;
    let inputs: Vec<ScalarType> = expected.iter().filter_map(Type::elt_type).collect();
    let result_elt = result_type
        .and_then(Type::elt_type)
        .or_else(|| prim.result_type(&expected).elt_type())
        .ok_or_else(bad_args)?;

    let apply = |scalars: Vec<Scalar>| -> Result<Scalar, InterpErrorKind> {
        let cast: Vec<Scalar> = scalars
            .iter()
            .zip(&inputs)
            .map(|(scalar, elt)| scalar.cast(*elt))
            .collect();
        Ok(scalar_op(prim, &cast, inputs[0])?.cast(result_elt))
    };

    if args.iter().all(|arg| matches!(arg, Value::Scalar(_))) {
        let scalars = args.iter().filter_map(Value::as_scalar).collect();
        return Ok(Value::Scalar(apply(scalars)?));
    }

    let shapes: Vec<Vec<usize>> = args.iter().map(Value::shape).collect();
    let shape = broadcast_shapes(shapes.iter().map(Vec::as_slice))
        .ok_or_else(|| InterpErrorKind::Broadcast(shapes.clone()))?;
    let out = ArrayValue::zeros(result_elt, shape.clone());
    for index in indices(&shape) {
        let scalars = args
            .iter()
            .map(|arg| match arg {
                Value::Array(array) => array.get_broadcast(&index),
                Value::Scalar(scalar) => *scalar,
                _ => unreachable!("operands were checked to be scalars or arrays"),
            })
            .collect();
        out.set(&index, apply(scalars)?);
    }
    Ok(Value::Array(out))
}

fn index_items(index: &Value) -> Option<Vec<IndexItem>> {
    match index {
        Value::Scalar(scalar) if scalar.natural_type() != ScalarType::Float64 => {
            Some(vec![IndexItem::Int(scalar.as_i64())])
        }
        Value::Slice(slice) => Some(vec![IndexItem::Slice(*slice)]),
        Value::Tuple(items) => items
            .iter()
            .map(|item| match index_items(item)?.as_slice() {
                [single] => Some(*single),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

fn slice_bound(value: &Value) -> Option<Option<i64>> {
    match value {
        Value::None => Some(None),
        Value::Scalar(scalar) if scalar.natural_type() != ScalarType::Float64 => {
            Some(Some(scalar.as_i64()))
        }
        _ => None,
    }
}

fn dims_of(shape: &Value) -> Option<Vec<usize>> {
    let dim = |value: &Value| match value.as_scalar() {
        Some(Scalar::Int(n)) if n >= 0 => Some(n as usize),
        _ => None,
    };
    match shape {
        Value::Tuple(items) => items.iter().map(dim).collect(),
        other => Some(vec![dim(other)?]),
    }
}

fn optional_int(value: Option<i64>) -> Value {
    value.map_or(Value::None, Value::int)
}

// Adverbs call back into the interpreter through this, keeping the caller's stack trace.
struct Applier<'i, 'a> {
    interp: &'i mut Interpreter<'a>,
    stacktrace: StackTrace,
}

impl<'i, 'a> Apply for Applier<'i, 'a> {
    type Error = InterpError;

    fn apply(&mut self, func: &Value, args: Vec<Value>) -> Result<Value, InterpError> {
        self.interp.call_value(func, args, &self.stacktrace)
    }
}

impl<'a> Interpreter<'a> {
    pub fn new(session: &'a mut Session) -> Self {
        Interpreter { session }
    }

    pub fn call(&mut self, target: &Value, args: Vec<Value>) -> Result<Value, InterpError> {
        self.call_value(target, args, &StackTrace::new())
    }

    /// Calls the untyped function registered as `name`.
    pub fn call_untyped(&mut self, name: &str, args: Vec<Value>) -> Result<Value, InterpError> {
        let stacktrace = StackTrace::new();
        let func = self
            .session
            .untyped(name)
            .cloned()
            .ok_or_else(|| stacktrace.error(InterpErrorKind::UnknownFunction(name.to_owned())))?;
        self.apply_untyped(&func, args, &stacktrace)
    }

    pub fn call_typed(&mut self, func: &TypedFn, args: Vec<Value>) -> Result<Value, InterpError> {
        self.apply_typed(func, args, &StackTrace::new())
    }

    fn call_value(
        &mut self,
        target: &Value,
        args: Vec<Value>,
        stacktrace: &StackTrace,
    ) -> Result<Value, InterpError> {
        match target {
            Value::Closure(closure) => {
                let mut all_args = closure.fixed.clone();
                all_args.extend(args);
                match &closure.func {
                    FnDef::Untyped(func) => self.apply_untyped(func, all_args, stacktrace),
                    FnDef::Typed(func) => self.apply_typed(func, all_args, stacktrace),
                }
            }
            Value::Prim(prim) => {
                eval_prim(*prim, &args, None).map_err(|kind| stacktrace.error(kind))
            }
            Value::Host(host) => {
                let func = self
                    .session
                    .translate(host)
                    .map_err(|err| stacktrace.error(err))?;
                let closure = Value::Closure(ClosureValue {
                    func: FnDef::Untyped(func),
                    fixed: host.captured.clone(),
                });
                self.call_value(&closure, args, stacktrace)
            }
            other => Err(stacktrace.error(InterpErrorKind::NotCallable(other.to_string()))),
        }
    }

    fn apply_untyped(
        &mut self,
        func: &UntypedFn,
        args: Vec<Value>,
        stacktrace: &StackTrace,
    ) -> Result<Value, InterpError> {
        let stacktrace = stacktrace.add_frame(format!("func: {}", func.name));
        let bound = args::bind(&func.name, &func.args, &func.nonlocals, args, vec![])
            .map_err(|err| stacktrace.error(err))?;
        let mut env: Env = bound.into_iter().collect();
        self.run_body(&func.body, &mut env, &stacktrace)
    }

    fn apply_typed(
        &mut self,
        func: &TypedFn,
        args: Vec<Value>,
        stacktrace: &StackTrace,
    ) -> Result<Value, InterpError> {
        let stacktrace = stacktrace.add_frame(format!("func: {}", func.name));
        if args.len() != func.arg_names.len() {
            return Err(stacktrace.error(InterpErrorKind::ArgCount {
                func: func.name.clone(),
                expected: func.arg_names.len(),
                found: args.len(),
            }));
        }
        let mut env: Env = func.arg_names.iter().cloned().zip(args).collect();
        self.run_body(&func.body, &mut env, &stacktrace)
    }

    fn run_body(
        &mut self,
        body: &Block,
        env: &mut Env,
        stacktrace: &StackTrace,
    ) -> Result<Value, InterpError> {
        match self.exec_block(body, env, stacktrace)? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::None),
        }
    }

    fn fn_def(&self, name: &str) -> Option<FnDef> {
        if let Some(typed) = self.session.typed(name) {
            return Some(FnDef::Typed(typed.clone()));
        }
        self.session.untyped(name).cloned().map(FnDef::Untyped)
    }

    fn eval_all(
        &mut self,
        exprs: &[Expr],
        env: &Env,
        stacktrace: &StackTrace,
    ) -> Result<Vec<Value>, InterpError> {
        exprs
            .iter()
            .map(|expr| self.eval_expr(expr, env, stacktrace))
            .collect()
    }

    fn eval_expr(
        &mut self,
        expr: &Expr,
        env: &Env,
        stacktrace: &StackTrace,
    ) -> Result<Value, InterpError> {
        stacker::maybe_grow(STACK_RED_ZONE_BYTES, STACK_GROW_BYTES, || {
            self.eval_expr_inner(expr, env, stacktrace)
        })
    }

    fn eval_expr_inner(
        &mut self,
        expr: &Expr,
        env: &Env,
        stacktrace: &StackTrace,
    ) -> Result<Value, InterpError> {
        use ExprKind as K;

        let fail = |kind: InterpErrorKind| Err(stacktrace.error(kind));

        match &expr.kind {
            K::Const(lit) => {
                let value = Value::from_literal(lit);
                Ok(match (&value, &expr.type_) {
                    (Value::Scalar(scalar), Some(Type::Scalar(elt))) => {
                        Value::Scalar(scalar.cast(*elt))
                    }
                    _ => value,
                })
            }

            K::Var(name) => match env.get(name) {
                Some(value) => Ok(value.clone()),
                // Untyped code may name a registered function directly.
                None => match self.session.untyped(name) {
                    Some(func) => Ok(Value::Closure(ClosureValue {
                        func: FnDef::Untyped(func.clone()),
                        fixed: Vec::new(),
                    })),
                    None => fail(InterpErrorKind::UnboundVariable(name.clone())),
                },
            },

            K::Tuple(items) => Ok(Value::Tuple(self.eval_all(items, env, stacktrace)?)),

            K::TupleProj(tuple, i) => match self.eval_expr(tuple, env, stacktrace)? {
                Value::Tuple(items) if *i < items.len() => Ok(items[*i].clone()),
                other => fail(InterpErrorKind::BadIndex {
                    base: other.to_string(),
                    index: i.to_string(),
                }),
            },

            K::Array(items) => {
                let items = self.eval_all(items, env, stacktrace)?;
                self.array_literal(&items, expr.type_.as_ref())
                    .map_err(|kind| stacktrace.error(kind))
            }

            K::Index(base, index) => {
                let base = self.eval_expr(base, env, stacktrace)?;
                let index = self.eval_expr(index, env, stacktrace)?;
                self.index(&base, &index).map_err(|kind| stacktrace.error(kind))
            }

            K::Slice { start, stop, step } => {
                let start = self.eval_expr(start, env, stacktrace)?;
                let stop = self.eval_expr(stop, env, stacktrace)?;
                let step = match step {
                    Some(step) => self.eval_expr(step, env, stacktrace)?,
                    None => Value::None,
                };
                match (slice_bound(&start), slice_bound(&stop), slice_bound(&step)) {
                    (Some(start), Some(stop), Some(step)) => {
                        Ok(Value::Slice(SliceValue { start, stop, step }))
                    }
                    _ => fail(InterpErrorKind::BadIndex {
                        base: "a slice".to_owned(),
                        index: describe(&[start, stop, step]),
                    }),
                }
            }

            K::Attribute(base, name) => {
                let base = self.eval_expr(base, env, stacktrace)?;
                attribute(&base, name).map_err(|kind| stacktrace.error(kind))
            }

            K::PrimCall(prim, args) => {
                let args = self.eval_all(args, env, stacktrace)?;
                eval_prim(*prim, &args, expr.type_.as_ref())
                    .map_err(|kind| stacktrace.error(kind))
            }

            K::Prim(prim) => Ok(Value::Prim(*prim)),

            K::Call(name, args) => {
                let args = self.eval_all(args, env, stacktrace)?;
                match self.fn_def(name) {
                    Some(FnDef::Typed(func)) => self.apply_typed(&func, args, stacktrace),
                    Some(FnDef::Untyped(func)) => self.apply_untyped(&func, args, stacktrace),
                    None => fail(InterpErrorKind::UnknownFunction(name.clone())),
                }
            }

            K::Invoke(callee, args) => {
                let callee = self.eval_expr(callee, env, stacktrace)?;
                let args = self.eval_all(args, env, stacktrace)?;
                self.call_value(&callee, args, stacktrace)
            }

            K::Closure(name, captured) => {
                let fixed = self.eval_all(captured, env, stacktrace)?;
                match self.fn_def(name) {
                    Some(func) => Ok(Value::Closure(ClosureValue { func, fixed })),
                    None => fail(InterpErrorKind::UnknownFunction(name.clone())),
                }
            }

            K::ClosureElt(closure, i) => match self.eval_expr(closure, env, stacktrace)? {
                Value::Closure(closure) if *i < closure.fixed.len() => {
                    Ok(closure.fixed[*i].clone())
                }
                other => fail(InterpErrorKind::BadIndex {
                    base: other.to_string(),
                    index: i.to_string(),
                }),
            },

            K::Fn(func) => {
                let func = self.session.register_rc(func.clone());
                let fixed = func
                    .nonlocals
                    .iter()
                    .map(|name| match env.get(name) {
                        Some(value) => Ok(value.clone()),
                        None => {
                            Err(stacktrace.error(InterpErrorKind::UnboundVariable(name.clone())))
                        }
                    })
                    .collect::<Result<_, _>>()?;
                Ok(Value::Closure(ClosureValue {
                    func: FnDef::Untyped(func),
                    fixed,
                }))
            }

            K::Cast(inner, elt) => match self.eval_expr(inner, env, stacktrace)? {
                Value::Scalar(scalar) => Ok(Value::Scalar(scalar.cast(*elt))),
                Value::Array(array) => Ok(Value::Array(array.cast(*elt))),
                other => fail(InterpErrorKind::BadCast(other.to_string())),
            },

            K::Struct { name, fields } => {
                let fields = fields
                    .iter()
                    .map(|(field, value)| {
                        Ok((field.clone(), self.eval_expr(value, env, stacktrace)?))
                    })
                    .collect::<Result<_, InterpError>>()?;
                Ok(Value::Struct(StructValue {
                    name: name.clone(),
                    fields,
                }))
            }

            K::AllocArray { elt, shape } => {
                let shape = self.eval_expr(shape, env, stacktrace)?;
                match dims_of(&shape) {
                    Some(dims) => Ok(Value::Array(ArrayValue::zeros(*elt, dims))),
                    None => fail(InterpErrorKind::BadShape(shape.to_string())),
                }
            }

            K::Map { func, args, axis } => {
                let func = self.eval_expr(func, env, stacktrace)?;
                let args = self.eval_all(args, env, stacktrace)?;
                let axis = self.eval_axis(axis, env, stacktrace)?;
                adverbs::map(&mut self.applier(stacktrace), &func, &args, axis)
                    .map_err(|err| err.in_context(stacktrace))
            }

            K::AllPairs { func, args, axis } => {
                let func = self.eval_expr(func, env, stacktrace)?;
                let args = self.eval_all(args, env, stacktrace)?;
                let axis = self.eval_axis(axis, env, stacktrace)?;
                let [x, y] = &args[..] else {
                    return fail(AdverbError::AllPairsArgs.into());
                };
                adverbs::all_pairs(&mut self.applier(stacktrace), &func, x, y, axis)
                    .map_err(|err| err.in_context(stacktrace))
            }

            K::Reduce {
                func,
                combine,
                init,
                args,
                axis,
            } => {
                let func = self.eval_expr(func, env, stacktrace)?;
                let combine = self.eval_expr(combine, env, stacktrace)?;
                let init = match init {
                    Some(init) => Some(self.eval_expr(init, env, stacktrace)?),
                    None => None,
                };
                let args = self.eval_all(args, env, stacktrace)?;
                let axis = self.eval_axis(axis, env, stacktrace)?;
                let fold = Fold {
                    func: &func,
                    combine: &combine,
                    init,
                };
                adverbs::reduce(&mut self.applier(stacktrace), &fold, &args, axis)
                    .map_err(|err| err.in_context(stacktrace))
            }

            K::Scan {
                func,
                combine,
                emit,
                init,
                args,
                axis,
            } => {
                let func = self.eval_expr(func, env, stacktrace)?;
                let combine = self.eval_expr(combine, env, stacktrace)?;
                let emit = self.eval_expr(emit, env, stacktrace)?;
                let init = match init {
                    Some(init) => Some(self.eval_expr(init, env, stacktrace)?),
                    None => None,
                };
                let args = self.eval_all(args, env, stacktrace)?;
                let axis = self.eval_axis(axis, env, stacktrace)?;
                let fold = Fold {
                    func: &func,
                    combine: &combine,
                    init,
                };
                adverbs::scan(&mut self.applier(stacktrace), &fold, &emit, &args, axis)
                    .map_err(|err| err.in_context(stacktrace))
            }
        }
    }

    fn applier<'i>(&'i mut self, stacktrace: &StackTrace) -> Applier<'i, 'a> {
        Applier {
            interp: self,
            stacktrace: stacktrace.clone(),
        }
    }

    fn eval_axis(
        &mut self,
        axis: &Expr,
        env: &Env,
        stacktrace: &StackTrace,
    ) -> Result<usize, InterpError> {
        let axis = self.eval_expr(axis, env, stacktrace)?;
        adverbs::axis_value(&axis).map_err(|err| stacktrace.error(err))
    }

    fn array_literal(
        &self,
        items: &[Value],
        type_: Option<&Type>,
    ) -> Result<Value, InterpErrorKind> {
        let natural = items
            .iter()
            .filter_map(|item| match item {
                Value::Scalar(scalar) => Some(scalar.natural_type()),
                Value::Array(array) => Some(array.elt()),
                _ => None,
            })
            .reduce(ScalarType::join);
        let elt = type_
            .and_then(Type::elt_type)
            .or(natural)
            .unwrap_or(ScalarType::Float64);

        let arrays = items
            .iter()
            .map(|item| match item {
                Value::Scalar(scalar) => {
                    Ok(ArrayValue::from_flat(elt, Vec::new(), vec![*scalar]))
                }
                Value::Array(array) => Ok(array.clone()),
                other => Err(InterpErrorKind::BadPrimArgs {
                    prim: "array".to_owned(),
                    args: other.to_string(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Array(ArrayValue::stack(elt, &arrays)?))
    }

    fn index(&self, base: &Value, index: &Value) -> Result<Value, InterpErrorKind> {
        let bad_index = || InterpErrorKind::BadIndex {
            base: base.to_string(),
            index: index.to_string(),
        };
        match base {
            Value::Array(array) => {
                let items = index_items(index).ok_or_else(bad_index)?;
                Ok(Value::from_view(array.select(&items)?))
            }
            Value::Tuple(items) => {
                let Some(Scalar::Int(i)) = index.as_scalar() else {
                    return Err(bad_index());
                };
                let i = if i < 0 { i + items.len() as i64 } else { i };
                usize::try_from(i)
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .ok_or_else(bad_index)
            }
            _ => Err(bad_index()),
        }
    }

    fn assign(
        &mut self,
        lhs: &Expr,
        value: Value,
        env: &mut Env,
        stacktrace: &StackTrace,
    ) -> Result<(), InterpError> {
        match &lhs.kind {
            ExprKind::Var(name) => {
                env.insert(name.clone(), value);
                Ok(())
            }
            ExprKind::Tuple(targets) => match value {
                Value::Tuple(items) if items.len() == targets.len() => {
                    for (target, item) in targets.iter().zip(items) {
                        self.assign(target, item, env, stacktrace)?;
                    }
                    Ok(())
                }
                other => Err(stacktrace.error(InterpErrorKind::Unpack {
                    expected: targets.len(),
                    found: other.to_string(),
                })),
            },
            ExprKind::Index(base, index) => {
                let base = self.eval_expr(base, env, stacktrace)?;
                let index = self.eval_expr(index, env, stacktrace)?;
                let Value::Array(array) = &base else {
                    return Err(stacktrace.error(InterpErrorKind::BadAssignTarget));
                };
                let items = index_items(&index).ok_or_else(|| {
                    stacktrace.error(InterpErrorKind::BadIndex {
                        base: base.to_string(),
                        index: index.to_string(),
                    })
                })?;
                let slot = array.select(&items).map_err(|err| stacktrace.error(err))?;
                match value {
                    Value::Scalar(scalar) => slot.fill(scalar),
                    Value::Array(src) => {
                        slot.copy_from(&src).map_err(|err| stacktrace.error(err))?
                    }
                    _ => return Err(stacktrace.error(InterpErrorKind::BadAssignTarget)),
                }
                Ok(())
            }
            _ => Err(stacktrace.error(InterpErrorKind::BadAssignTarget)),
        }
    }

    fn truthy(
        &mut self,
        cond: &Expr,
        env: &Env,
        stacktrace: &StackTrace,
    ) -> Result<bool, InterpError> {
        match self.eval_expr(cond, env, stacktrace)? {
            Value::Scalar(scalar) => Ok(scalar.truthy()),
            other => Err(stacktrace.error(InterpErrorKind::BadCondition(other.to_string()))),
        }
    }

    // Every side is evaluated before anything is rebound, so entries may refer to each other.
    fn bind_merge(
        &mut self,
        merge: &Merge,
        left: bool,
        env: &mut Env,
        stacktrace: &StackTrace,
    ) -> Result<(), InterpError> {
        let mut values = Vec::with_capacity(merge.len());
        for (name, (left_value, right_value)) in merge {
            let side = if left { left_value } else { right_value };
            values.push((name.clone(), self.eval_expr(side, env, stacktrace)?));
        }
        env.extend(values);
        Ok(())
    }

    fn exec_block(
        &mut self,
        block: &Block,
        env: &mut Env,
        stacktrace: &StackTrace,
    ) -> Result<Flow, InterpError> {
        for stmt in block {
            match stmt {
                Stmt::Assign { lhs, rhs } => {
                    let value = self.eval_expr(rhs, env, stacktrace)?;
                    self.assign(lhs, value, env, stacktrace)?;
                }

                Stmt::Return(value) => {
                    return Ok(Flow::Return(self.eval_expr(value, env, stacktrace)?));
                }

                Stmt::If {
                    cond,
                    true_block,
                    false_block,
                    merge,
                } => {
                    let taken = self.truthy(cond, env, stacktrace)?;
                    let block = if taken { true_block } else { false_block };
                    if let Flow::Return(value) = self.exec_block(block, env, stacktrace)? {
                        return Ok(Flow::Return(value));
                    }
                    self.bind_merge(merge, taken, env, stacktrace)?;
                }

                Stmt::While { cond, body, merge } => {
                    self.bind_merge(merge, true, env, stacktrace)?;
                    while self.truthy(cond, env, stacktrace)? {
                        if let Flow::Return(value) = self.exec_block(body, env, stacktrace)? {
                            return Ok(Flow::Return(value));
                        }
                        self.bind_merge(merge, false, env, stacktrace)?;
                    }
                }
            }
        }
        Ok(Flow::Normal)
    }
}

fn attribute(base: &Value, name: &str) -> Result<Value, InterpErrorKind> {
    match (base, name) {
        (Value::Array(array), "shape") => Ok(Value::Tuple(
            array
                .shape()
                .iter()
                .map(|&dim| Value::int(dim as i64))
                .collect(),
        )),
        (Value::Array(array), "ndim") => Ok(Value::int(array.rank() as i64)),
        (Value::Array(array), "size") => Ok(Value::int(array.size() as i64)),
        (Value::Slice(slice), "start") => Ok(optional_int(slice.start)),
        (Value::Slice(slice), "stop") => Ok(optional_int(slice.stop)),
        (Value::Slice(slice), "step") => Ok(optional_int(slice.step)),
        (Value::Struct(value), _) => value
            .fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, field)| field.clone())
            .ok_or_else(|| InterpErrorKind::UnknownAttribute {
                base: base.to_string(),
                name: name.to_owned(),
            }),
        _ => Err(InterpErrorKind::UnknownAttribute {
            base: base.to_string(),
            name: name.to_owned(),
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::Translator;
    use crate::interpreter::value::HostFunction;
    use manifold_common::data::untyped_ast::ArgSpec;

    fn sum_to() -> UntypedFn {
        // total = 0; i = 0; while i < n: total = total + i; i = i + 1; return total
        let mut merge = Merge::new();
        merge.insert(
            "i".to_owned(),
            (
                Expr::int(0),
                Expr::prim(Prim::Add, vec![Expr::var("i"), Expr::int(1)]),
            ),
        );
        merge.insert(
            "total".to_owned(),
            (
                Expr::int(0),
                Expr::prim(Prim::Add, vec![Expr::var("total"), Expr::var("i")]),
            ),
        );
        UntypedFn::new(
            "sum_to",
            ArgSpec::positional(&["n"]),
            vec![
                Stmt::While {
                    cond: Expr::prim(Prim::Less, vec![Expr::var("i"), Expr::var("n")]),
                    body: vec![],
                    merge,
                },
                Stmt::ret(Expr::var("total")),
            ],
        )
    }

    #[test]
    fn test_loop_merges() {
        let mut session = Session::new();
        session.register(sum_to());
        let result = Interpreter::new(&mut session).call_untyped("sum_to", vec![Value::int(5)]);
        assert_eq!(result.expect("runs"), Value::int(10));
    }

    #[test]
    fn test_early_return_leaves_loop() {
        let mut session = Session::new();
        let mut merge = Merge::new();
        merge.insert(
            "i".to_owned(),
            (
                Expr::int(0),
                Expr::prim(Prim::Add, vec![Expr::var("i"), Expr::int(1)]),
            ),
        );
        session.register(UntypedFn::new(
            "first_at_least",
            ArgSpec::positional(&["xs", "limit"]),
            vec![
                Stmt::While {
                    cond: Expr::bool(true),
                    body: vec![Stmt::If {
                        cond: Expr::prim(
                            Prim::GreaterEqual,
                            vec![
                                Expr::index(Expr::var("xs"), Expr::var("i")),
                                Expr::var("limit"),
                            ],
                        ),
                        true_block: vec![Stmt::ret(Expr::var("i"))],
                        false_block: vec![],
                        merge: Merge::new(),
                    }],
                    merge,
                },
                Stmt::ret(Expr::int(-1)),
            ],
        ));
        let result = Interpreter::new(&mut session).call_untyped(
            "first_at_least",
            vec![Value::ints(&[1, 4, 9, 16]), Value::int(5)],
        );
        assert_eq!(result.expect("runs"), Value::int(2));
    }

    #[test]
    fn test_indexed_writes_go_through_views() {
        let mut session = Session::new();
        session.register(UntypedFn::new(
            "zero_row",
            ArgSpec::positional(&["m"]),
            vec![
                Stmt::set("row", Expr::index(Expr::var("m"), Expr::int(1))),
                Stmt::assign(
                    Expr::index(Expr::var("row"), Expr::slice(Expr::none(), Expr::none(), None)),
                    Expr::int(0),
                ),
                Stmt::ret(Expr::var("m")),
            ],
        ));
        let matrix = ArrayValue::from_flat(
            ScalarType::Int64,
            vec![2, 2],
            vec![Scalar::Int(1), Scalar::Int(2), Scalar::Int(3), Scalar::Int(4)],
        );
        let result = Interpreter::new(&mut session)
            .call_untyped("zero_row", vec![Value::Array(matrix.clone())])
            .expect("runs");
        assert_eq!(result.to_string(), "[[1, 2], [0, 0]]");
        assert_eq!(matrix.get(&[1, 0]), Scalar::Int(0));
    }

    #[test]
    fn test_function_literal_captures_nonlocals() {
        let mut session = Session::new();
        let add_k = UntypedFn::new(
            "add_k",
            ArgSpec::positional(&["x"]),
            vec![Stmt::ret(Expr::prim(
                Prim::Add,
                vec![Expr::var("x"), Expr::var("k")],
            ))],
        )
        .with_nonlocals(&["k"]);
        session.register(UntypedFn::new(
            "shift",
            ArgSpec::positional(&["xs", "k"]),
            vec![Stmt::ret(Expr::map(
                ExprKind::Fn(Rc::new(add_k)).into(),
                vec![Expr::var("xs")],
                0,
            ))],
        ));
        let result = Interpreter::new(&mut session)
            .call_untyped("shift", vec![Value::floats(&[0.5, 1.5]), Value::int(2)])
            .expect("runs");
        assert_eq!(result, Value::floats(&[2.5, 3.5]));
    }

    #[test]
    fn test_modulo_follows_divisor_sign() {
        assert_eq!(
            eval_prim(Prim::Modulo, &[Value::int(-7), Value::int(3)], None),
            Ok(Value::int(2))
        );
        assert_eq!(
            eval_prim(Prim::Modulo, &[Value::int(7), Value::int(0)], None),
            Err(InterpErrorKind::DivisionByZero)
        );
        assert_eq!(
            eval_prim(Prim::Add, &[Value::ints(&[1, 2]), Value::float(0.5)], None),
            Ok(Value::floats(&[1.5, 2.5]))
        );
    }

    #[test]
    fn test_errors_carry_call_frames() {
        let mut session = Session::new();
        session.register(UntypedFn::new(
            "outer",
            ArgSpec::positional(&[]),
            vec![Stmt::ret(Expr::call("inner", vec![]))],
        ));
        session.register(UntypedFn::new(
            "inner",
            ArgSpec::positional(&[]),
            vec![Stmt::ret(Expr::var("missing"))],
        ));
        let err = Interpreter::new(&mut session)
            .call_untyped("outer", vec![])
            .expect_err("unbound variable");
        assert_eq!(
            err.kind,
            InterpErrorKind::UnboundVariable("missing".to_owned())
        );
        let trace = err.stacktrace.to_string();
        assert!(trace.contains("func: outer"));
        assert!(trace.contains("func: inner"));
    }

    struct Doubler;

    impl Translator for Doubler {
        fn translate(&mut self, host: &HostFunction) -> Result<UntypedFn, TranslateError> {
            Ok(UntypedFn::new(
                host.name.clone(),
                ArgSpec::positional(&["x"]),
                vec![Stmt::ret(Expr::prim(
                    Prim::Multiply,
                    vec![Expr::var("x"), Expr::var("factor")],
                ))],
            )
            .with_nonlocals(&["factor"]))
        }
    }

    #[test]
    fn test_host_functions_become_closures() {
        let mut session = Session::with_translator(Doubler);
        let host = session.host_function("scale", vec![Value::int(2)]);
        let result = call(&mut session, &host, vec![Value::int(21)]);
        assert_eq!(result.expect("runs"), Value::int(42));
        assert!(session.untyped("scale").is_some());
    }
}
