#[cfg(test)]
mod test;

use manifold_common::config as cfg;
use manifold_common::data::typed_ast::TypedFn;
use manifold_common::data::types::Type;
use manifold_common::pretty_print::syntax::write_typed_fn;
use manifold_common::progress_ui;
use manifold_common::report_error::Reportable;
use manifold_common::util::progress_logger::{ProgressLogger, ProgressSession};
use manifold_core::args::{self, BindError};
use manifold_core::backend::{Backend, BackendError, Compiled, CompiledFn, InterpreterBackend};
use manifold_core::copy_elimination::eliminate_copies_all;
use manifold_core::interpreter::value::{ClosureValue, FnDef, Value};
use manifold_core::interpreter::{InterpError, Interpreter};
use manifold_core::registry::{Session, TranslateError};
use manifold_core::shape_codegen::{make_shape_expr, ConcreteShapes, ShapeValue};
use manifold_core::shape_infer::result_shape;
use manifold_core::specialize::{specialize_bound, SpecializeError};
use manifold_core::typecheck;
use std::fs;
use std::io;
use std::rc::Rc;

#[derive(Debug)]
enum ErrorKind {
    UnknownFunction(String),
    BindFailed(BindError),
    TranslateFailed(TranslateError),
    UntypedArgument { func: String, index: usize },
    SpecializeFailed { func: String, err: SpecializeError },
    InterpretFailed(InterpError),
    BackendFailed(BackendError),
    WriteIrFailed(io::Error),
    ShapeCheckFailed {
        func: String,
        expected: ShapeValue,
        found: ShapeValue,
    },
}

// This type is separate from 'ErrorKind' because enums cannot have private variants, and we don't
// want to expose the internal error types appearing in the variants of 'ErrorKind'.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error { kind }
    }
}

impl Reportable for Error {
    fn report(&self, dest: &mut impl io::Write) -> io::Result<()> {
        use ErrorKind::*;
        match &self.kind {
            UnknownFunction(name) => writeln!(dest, "No function named '{}' is registered", name),
            BindFailed(err) => writeln!(dest, "Could not bind arguments: {}", err),
            TranslateFailed(err) => writeln!(dest, "Could not translate argument: {}", err),
            UntypedArgument { func, index } => writeln!(
                dest,
                "Argument {} of {} has no static type, so {} cannot be specialized",
                index, func, func
            ),
            SpecializeFailed { func, err } => writeln!(dest, "Cannot specialize {}: {}", func, err),
            InterpretFailed(err) => writeln!(dest, "Runtime error: {}", err),
            BackendFailed(err) => writeln!(dest, "Backend error: {}", err),
            WriteIrFailed(err) => {
                writeln!(dest, "Could not write intermediate representation: {}", err)
            }
            ShapeCheckFailed {
                func,
                expected,
                found,
            } => writeln!(
                dest,
                "Result of {} has shape {:?}, but its inferred shape is {:?}",
                func, found, expected
            ),
        }
    }

    fn exit_status(&self) -> i32 {
        1
    }
}

#[derive(Clone, Debug, Default)]
pub struct RunConfig {
    pub mode: cfg::ExecutionMode,
    pub pass_options: cfg::PassOptions,
    pub artifact_dir: Option<cfg::ArtifactDir>,
    pub progress: progress_ui::ProgressMode,
}

fn write_typed_artifact(
    session: &Session,
    artifact_dir: &cfg::ArtifactDir,
    extension: &str,
) -> Result<(), Error> {
    let mut file = fs::File::create(artifact_dir.artifact_path(extension))
        .map_err(ErrorKind::WriteIrFailed)?;
    for func in session.typed_fns() {
        write_typed_fn(&mut file, func).map_err(ErrorKind::WriteIrFailed)?;
    }
    Ok(())
}

fn verify_types(session: &Session, progress: impl ProgressLogger) {
    let funcs: Vec<&Rc<TypedFn>> = session.typed_fns().collect();
    let mut progress = progress.start_session(Some(funcs.len()));
    for func in funcs {
        progress.describe(&func.name);
        typecheck::check_fn(func);
        progress.update(1);
    }
    progress.finish();
}

/// Specializes `name` for already-bound parameters and runs the configured typed passes over the
/// session, returning the final form of the specialization.
pub fn specialize_and_optimize(
    session: &mut Session,
    name: &str,
    params: Vec<(String, Type)>,
    config: &RunConfig,
) -> Result<Rc<TypedFn>, Error> {
    let func = session
        .untyped(name)
        .cloned()
        .ok_or_else(|| ErrorKind::UnknownFunction(name.to_owned()))?;
    let typed = specialize_bound(session, &func, params).map_err(|err| {
        ErrorKind::SpecializeFailed {
            func: name.to_owned(),
            err,
        }
    })?;

    let options = &config.pass_options;
    if options.verify_types {
        verify_types(session, progress_ui::bar(config.progress, "verify_types"));
    }
    if let Some(artifact_dir) = &config.artifact_dir {
        write_typed_artifact(session, artifact_dir, "typed")?;
    }

    if options.copy_elimination {
        eliminate_copies_all(session, progress_ui::bar(config.progress, "copy_elimination"));
        if options.verify_types {
            verify_types(session, progress_ui::bar(config.progress, "verify_types"));
        }
    }
    if let Some(artifact_dir) = &config.artifact_dir {
        write_typed_artifact(session, artifact_dir, "optimized")?;
    }

    // Copy elimination replaces every specialization it rewrites.
    Ok(session.typed(&typed.name).cloned().unwrap_or(typed))
}

/// Specializes and optimizes `name` for `arg_types`, then hands it to `backend`.
pub fn compile<B: Backend>(
    session: &mut Session,
    name: &str,
    arg_types: Vec<Type>,
    config: &RunConfig,
    backend: &mut B,
) -> Result<Compiled<B::Callable>, Error> {
    let params = bind_args(session, name, arg_types)?;
    let typed = specialize_and_optimize(session, name, params, config)?;
    Ok(backend
        .lower(session, &typed)
        .map_err(ErrorKind::BackendFailed)?)
}

fn bind_args<T: args::Bindable>(
    session: &Session,
    name: &str,
    args: Vec<T>,
) -> Result<Vec<(String, T)>, Error> {
    let func = session
        .untyped(name)
        .ok_or_else(|| ErrorKind::UnknownFunction(name.to_owned()))?;
    Ok(args::bind(name, &func.args, &func.nonlocals, args, vec![])
        .map_err(ErrorKind::BindFailed)?)
}

// Host functions cross into the runtime as closures over their translations.
fn prepare_arg(session: &mut Session, value: Value) -> Result<Value, Error> {
    Ok(match value {
        Value::Host(host) => {
            let func = session
                .translate(&host)
                .map_err(ErrorKind::TranslateFailed)?;
            Value::Closure(ClosureValue {
                func: FnDef::Untyped(func),
                fixed: host
                    .captured
                    .iter()
                    .cloned()
                    .map(|value| prepare_arg(session, value))
                    .collect::<Result<_, _>>()?,
            })
        }
        Value::Tuple(items) => Value::Tuple(
            items
                .into_iter()
                .map(|item| prepare_arg(session, item))
                .collect::<Result<_, _>>()?,
        ),
        other => other,
    })
}

/// Runs `name` on `args` through the reference interpreter backend.
pub fn run(
    session: &mut Session,
    name: &str,
    args: Vec<Value>,
    config: &RunConfig,
) -> Result<Value, Error> {
    run_with_backend(session, name, args, config, &mut InterpreterBackend)
}

/// Specializes `name` for the types of `args` and executes it as `config.mode` asks, falling back
/// to interpreting the untyped definition when specialization is impossible and the fallback mode
/// allows it.
pub fn run_with_backend<B: Backend>(
    session: &mut Session,
    name: &str,
    args: Vec<Value>,
    config: &RunConfig,
    backend: &mut B,
) -> Result<Value, Error> {
    let args = args
        .into_iter()
        .map(|arg| prepare_arg(session, arg))
        .collect::<Result<Vec<_>, _>>()?;
    let bound = bind_args(session, name, args.clone())?;

    let typed = match typed_params(name, &bound).and_then(|params| {
        specialize_and_optimize(session, name, params, config)
    }) {
        Ok(typed) => typed,
        Err(err) => {
            let fallback = config.pass_options.fallback;
            if fallback == cfg::FallbackMode::Fail || !err.is_unspecializable() {
                return Err(err);
            }
            tracing::warn!(
                name,
                reason = %describe(&err),
                "falling back to interpreting untyped code"
            );
            return Ok(Interpreter::new(session)
                .call_untyped(name, args)
                .map_err(ErrorKind::InterpretFailed)?);
        }
    };

    let values: Vec<Value> = bound.into_iter().map(|(_, value)| value).collect();
    let arg_shapes: Vec<ShapeValue> = values.iter().map(ShapeValue::of_arg).collect();

    let result = match config.mode {
        cfg::ExecutionMode::Interpret => Interpreter::new(session)
            .call_typed(&typed, values)
            .map_err(ErrorKind::InterpretFailed)?,
        cfg::ExecutionMode::Compile => {
            let compiled = backend
                .lower(session, &typed)
                .map_err(ErrorKind::BackendFailed)?;
            compiled
                .callable
                .call(session, values)
                .map_err(ErrorKind::BackendFailed)?
        }
    };

    if config.pass_options.check_shapes {
        check_shape(session, &typed, &arg_shapes, &result)?;
    }
    Ok(result)
}

fn typed_params(name: &str, bound: &[(String, Value)]) -> Result<Vec<(String, Type)>, Error> {
    bound
        .iter()
        .enumerate()
        .map(|(index, (param, value))| match value.type_of() {
            Some(type_) => Ok((param.clone(), type_)),
            None => Err(ErrorKind::UntypedArgument {
                func: name.to_owned(),
                index,
            }
            .into()),
        })
        .collect()
}

impl Error {
    fn is_unspecializable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::SpecializeFailed { .. } | ErrorKind::UntypedArgument { .. }
        )
    }
}

fn describe(err: &Error) -> String {
    let mut out = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = err.report(&mut out);
    String::from_utf8_lossy(&out).trim_end().to_owned()
}

fn contains_closure(type_: &Type) -> bool {
    match type_ {
        Type::Closure(_) => true,
        Type::Tuple(items) => items.iter().any(contains_closure),
        Type::Struct(struct_type) => struct_type
            .fields
            .iter()
            .any(|(_, field)| contains_closure(field)),
        _ => false,
    }
}

fn check_shape(
    session: &Session,
    typed: &TypedFn,
    arg_shapes: &[ShapeValue],
    result: &Value,
) -> Result<(), Error> {
    if contains_closure(&typed.return_type) {
        return Ok(());
    }
    let shape = match result_shape(session, typed) {
        Ok(shape) => shape,
        Err(err) => {
            tracing::debug!(name = %typed.name, %err, "skipping shape check");
            return Ok(());
        }
    };
    let expected = make_shape_expr(&mut ConcreteShapes, &typed.input_types, arg_shapes, &shape);
    let expected = match expected {
        Ok(expected) => expected,
        Err(err) => {
            tracing::debug!(name = %typed.name, %err, "skipping shape check");
            return Ok(());
        }
    };
    let found = ShapeValue::shape_of(result);
    if expected != found {
        return Err(ErrorKind::ShapeCheckFailed {
            func: typed.name.clone(),
            expected,
            found,
        }
        .into());
    }
    Ok(())
}
