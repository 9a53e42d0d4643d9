//! The interface to code generators that consume optimized typed IR.

use std::rc::Rc;

use manifold_common::data::typed_ast::TypedFn;
use manifold_common::data::types::Type;

use crate::interpreter::value::Value;
use crate::interpreter::{InterpError, Interpreter};
use crate::registry::Session;

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("backend cannot lower {func}: {reason}")]
    Unsupported { func: String, reason: String },
    #[error(transparent)]
    Runtime(#[from] InterpError),
}

/// A lowered function ready to run.
pub trait CompiledFn {
    fn call(&self, session: &mut Session, args: Vec<Value>) -> Result<Value, BackendError>;
}

pub struct Compiled<F> {
    pub callable: F,
    pub return_type: Type,
}

pub trait Backend {
    type Callable: CompiledFn;

    fn lower(
        &mut self,
        session: &Session,
        func: &Rc<TypedFn>,
    ) -> Result<Compiled<Self::Callable>, BackendError>;
}

/// "Lowers" by keeping the typed IR and running it in the reference interpreter.
#[derive(Clone, Copy, Debug, Default)]
pub struct InterpreterBackend;

pub struct InterpretedFn {
    func: Rc<TypedFn>,
}

impl CompiledFn for InterpretedFn {
    fn call(&self, session: &mut Session, args: Vec<Value>) -> Result<Value, BackendError> {
        Ok(Interpreter::new(session).call_typed(&self.func, args)?)
    }
}

impl Backend for InterpreterBackend {
    type Callable = InterpretedFn;

    fn lower(
        &mut self,
        _session: &Session,
        func: &Rc<TypedFn>,
    ) -> Result<Compiled<InterpretedFn>, BackendError> {
        tracing::debug!(name = %func.name, "lowering to the interpreter");
        Ok(Compiled {
            callable: InterpretedFn { func: func.clone() },
            return_type: func.return_type.clone(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::specialize::specialize;
    use manifold_common::data::prims::Prim;
    use manifold_common::data::syntax::{Expr, Stmt};
    use manifold_common::data::types::ScalarType;
    use manifold_common::data::untyped_ast::{ArgSpec, UntypedFn};

    #[test]
    fn test_interpreter_backend_runs_typed_code() {
        let mut session = Session::new();
        session.register(UntypedFn::new(
            "halve",
            ArgSpec::positional(&["x"]),
            vec![Stmt::ret(Expr::prim(
                Prim::Divide,
                vec![Expr::var("x"), Expr::int(2)],
            ))],
        ));
        let typed = specialize(&mut session, "halve", &[Type::Array(ScalarType::Int64, 1)])
            .expect("specializes");

        let compiled = InterpreterBackend
            .lower(&session, &typed)
            .expect("lowers");
        assert_eq!(compiled.return_type, Type::Array(ScalarType::Float64, 1));
        let result = compiled
            .callable
            .call(&mut session, vec![Value::ints(&[1, 4])])
            .expect("runs");
        assert_eq!(result, Value::floats(&[0.5, 2.0]));
    }
}
