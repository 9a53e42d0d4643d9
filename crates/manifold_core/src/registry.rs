use id_collections::Count;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use manifold_common::data::typed_ast::TypedFn;
use manifold_common::data::types::Type;
use manifold_common::data::untyped_ast::UntypedFn;

use crate::interpreter::value::{HostFnId, HostFunction, Value};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("no translator is installed, so host function {0} cannot be called")]
    NoTranslator(String),
    #[error("could not translate host function {name}: {reason}")]
    Unsupported { name: String, reason: String },
}

/// Turns host function values into untyped IR.
pub trait Translator {
    fn translate(&mut self, host: &HostFunction) -> Result<UntypedFn, TranslateError>;
}

/// A (function name, bound parameter types) pair identifying one specialization.
pub type SpecKey = (String, Vec<Type>);

/// Everything one compilation session knows about: untyped definitions, their typed
/// specializations, and translated host functions.
pub struct Session {
    untyped: BTreeMap<String, Rc<UntypedFn>>,
    typed: BTreeMap<String, Rc<TypedFn>>,
    specializations: BTreeMap<SpecKey, String>,
    in_progress: BTreeSet<SpecKey>,
    host_ids: Count<HostFnId>,
    translations: BTreeMap<HostFnId, Rc<UntypedFn>>,
    translator: Option<Box<dyn Translator>>,
}

impl Default for Session {
    fn default() -> Self {
        Session {
            untyped: BTreeMap::new(),
            typed: BTreeMap::new(),
            specializations: BTreeMap::new(),
            in_progress: BTreeSet::new(),
            host_ids: Count::new(),
            translations: BTreeMap::new(),
            translator: None,
        }
    }
}

impl Session {
    pub fn new() -> Self {
        Session::default()
    }

    pub fn with_translator(translator: impl Translator + 'static) -> Self {
        Session {
            translator: Some(Box::new(translator)),
            ..Session::default()
        }
    }

    /// Stores `func` under its name. The first definition of a name wins.
    pub fn register(&mut self, func: UntypedFn) -> Rc<UntypedFn> {
        self.register_rc(Rc::new(func))
    }

    pub fn register_rc(&mut self, func: Rc<UntypedFn>) -> Rc<UntypedFn> {
        if let Some(existing) = self.untyped.get(&func.name) {
            if !Rc::ptr_eq(existing, &func) && **existing != *func {
                tracing::warn!(
                    name = %func.name,
                    "function is already registered; keeping the first definition"
                );
            }
            return existing.clone();
        }
        self.untyped.insert(func.name.clone(), func.clone());
        func
    }

    pub fn untyped(&self, name: &str) -> Option<&Rc<UntypedFn>> {
        self.untyped.get(name)
    }

    pub fn typed(&self, name: &str) -> Option<&Rc<TypedFn>> {
        self.typed.get(name)
    }

    pub fn typed_fns(&self) -> impl Iterator<Item = &Rc<TypedFn>> {
        self.typed.values()
    }

    /// Installs or replaces a typed function, e.g. after an optimization pass rewrote it.
    pub fn insert_typed(&mut self, func: TypedFn) -> Rc<TypedFn> {
        let func = Rc::new(func);
        self.typed.insert(func.name.clone(), func.clone());
        func
    }

    pub fn cached_specialization(&self, key: &SpecKey) -> Option<Rc<TypedFn>> {
        let name = self.specializations.get(key)?;
        self.typed.get(name).cloned()
    }

    pub(crate) fn record_specialization(&mut self, key: SpecKey, func: TypedFn) -> Rc<TypedFn> {
        let func = self.insert_typed(func);
        self.specializations.insert(key, func.name.clone());
        func
    }

    /// Marks a specialization as under construction. Returns false if it already was, which means
    /// the function is being specialized recursively.
    pub(crate) fn begin_specialization(&mut self, key: &SpecKey) -> bool {
        self.in_progress.insert(key.clone())
    }

    pub(crate) fn end_specialization(&mut self, key: &SpecKey) {
        self.in_progress.remove(key);
    }

    pub fn host_function(&mut self, name: impl Into<String>, captured: Vec<Value>) -> Value {
        Value::Host(Rc::new(HostFunction {
            id: self.host_ids.inc(),
            name: name.into(),
            captured,
        }))
    }

    /// Translates a host function once, registering the result and reusing it afterwards.
    pub fn translate(&mut self, host: &HostFunction) -> Result<Rc<UntypedFn>, TranslateError> {
        if let Some(func) = self.translations.get(&host.id) {
            return Ok(func.clone());
        }

        let translator = self
            .translator
            .as_mut()
            .ok_or_else(|| TranslateError::NoTranslator(host.name.clone()))?;
        let func = translator.translate(host)?;
        tracing::debug!(name = %func.name, "translated host function");

        let func = self.register(func);
        self.translations.insert(host.id, func.clone());
        Ok(func)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use manifold_common::data::syntax::{Expr, Stmt};
    use manifold_common::data::untyped_ast::ArgSpec;

    struct CountingTranslator {
        calls: Rc<std::cell::Cell<usize>>,
    }

    impl Translator for CountingTranslator {
        fn translate(&mut self, host: &HostFunction) -> Result<UntypedFn, TranslateError> {
            self.calls.set(self.calls.get() + 1);
            Ok(UntypedFn::new(
                host.name.clone(),
                ArgSpec::positional(&["x"]),
                vec![Stmt::ret(Expr::var("x"))],
            ))
        }
    }

    #[test]
    fn test_first_registration_wins() {
        let mut session = Session::new();
        session.register(UntypedFn::new(
            "f",
            ArgSpec::positional(&["x"]),
            vec![Stmt::ret(Expr::var("x"))],
        ));
        session.register(UntypedFn::new(
            "f",
            ArgSpec::positional(&["y"]),
            vec![Stmt::ret(Expr::int(0))],
        ));
        let kept = session.untyped("f").expect("f is registered");
        assert_eq!(kept.args.positional, vec!["x".to_owned()]);
    }

    #[test]
    fn test_translation_is_memoized() {
        let calls = Rc::new(std::cell::Cell::new(0));
        let mut session = Session::with_translator(CountingTranslator {
            calls: calls.clone(),
        });
        let Value::Host(host) = session.host_function("ident", vec![]) else {
            unreachable!()
        };
        let first = session.translate(&host).expect("translates");
        let second = session.translate(&host).expect("translates");
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(calls.get(), 1);
        assert!(session.untyped("ident").is_some());
    }

    #[test]
    fn test_missing_translator() {
        let mut session = Session::new();
        let Value::Host(host) = session.host_function("g", vec![]) else {
            unreachable!()
        };
        assert_eq!(
            session.translate(&host),
            Err(TranslateError::NoTranslator("g".to_owned()))
        );
    }
}
