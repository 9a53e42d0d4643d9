use manifold_common::data::syntax::{Expr, Literal};
use manifold_common::data::types::Type;
use manifold_common::data::untyped_ast::ArgSpec;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("{func} takes {expected} positional arguments but {found} were given")]
    TooManyArgs {
        func: String,
        expected: usize,
        found: usize,
    },
    #[error("{func} is missing a value for argument '{name}'")]
    MissingArg { func: String, name: String },
    #[error("{func} got an unexpected keyword argument '{name}'")]
    UnknownKeyword { func: String, name: String },
    #[error("{func} got multiple values for argument '{name}'")]
    DuplicateArg { func: String, name: String },
}

/// Anything that can flow into a parameter slot: runtime values, types, or IR expressions.
pub trait Bindable: Clone {
    fn from_literal(lit: &Literal) -> Self;
    fn pack_tuple(items: Vec<Self>) -> Self;
}

impl Bindable for Type {
    fn from_literal(lit: &Literal) -> Self {
        lit.type_()
    }

    fn pack_tuple(items: Vec<Self>) -> Self {
        Type::Tuple(items)
    }
}

impl Bindable for Expr {
    fn from_literal(lit: &Literal) -> Self {
        Expr::lit(*lit)
    }

    fn pack_tuple(items: Vec<Self>) -> Self {
        Expr::tuple(items)
    }
}

/// Binds actuals to parameter names, returning them in parameter order: nonlocals first, then
/// positional parameters, then the variable-arity parameter if there is one.
pub fn bind<T: Bindable>(
    func: &str,
    spec: &ArgSpec,
    nonlocals: &[String],
    positional: Vec<T>,
    keywords: Vec<(String, T)>,
) -> Result<Vec<(String, T)>, BindError> {
    let mut actuals = positional.into_iter();

    let mut bound = Vec::new();
    for name in nonlocals {
        match actuals.next() {
            Some(value) => bound.push((name.clone(), value)),
            None => {
                return Err(BindError::MissingArg {
                    func: func.to_owned(),
                    name: name.clone(),
                })
            }
        }
    }

    let mut slots: Vec<Option<T>> = spec.positional.iter().map(|_| actuals.next()).collect();
    let extra: Vec<T> = actuals.collect();

    if !extra.is_empty() && spec.varargs.is_none() {
        return Err(BindError::TooManyArgs {
            func: func.to_owned(),
            expected: spec.positional.len(),
            found: spec.positional.len() + extra.len(),
        });
    }

    for (name, value) in keywords {
        let Some(slot_idx) = spec.positional.iter().position(|param| *param == name) else {
            return Err(BindError::UnknownKeyword {
                func: func.to_owned(),
                name,
            });
        };
        if slots[slot_idx].is_some() {
            return Err(BindError::DuplicateArg {
                func: func.to_owned(),
                name,
            });
        }
        slots[slot_idx] = Some(value);
    }

    for (name, slot) in spec.positional.iter().zip(slots) {
        let value = match slot {
            Some(value) => value,
            None => match spec.default_for(name) {
                Some(lit) => T::from_literal(lit),
                None => {
                    return Err(BindError::MissingArg {
                        func: func.to_owned(),
                        name: name.clone(),
                    })
                }
            },
        };
        bound.push((name.clone(), value));
    }

    if let Some(varargs) = &spec.varargs {
        bound.push((varargs.clone(), T::pack_tuple(extra)));
    }

    Ok(bound)
}
