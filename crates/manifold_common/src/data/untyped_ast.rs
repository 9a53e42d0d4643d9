use crate::data::syntax::{Block, Literal};

/// How the actual arguments of a call are bound to a function's parameter names.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ArgSpec {
    pub positional: Vec<String>,
    // Trailing positional parameters which may be omitted by the caller
    pub defaults: Vec<(String, Literal)>,
    // Collects any extra positional actuals into a tuple
    pub varargs: Option<String>,
}

impl ArgSpec {
    pub fn positional(names: &[&str]) -> Self {
        ArgSpec {
            positional: names.iter().map(|name| name.to_string()).collect(),
            defaults: Vec::new(),
            varargs: None,
        }
    }

    pub fn default_for(&self, name: &str) -> Option<&Literal> {
        self.defaults
            .iter()
            .find(|(default_name, _)| default_name == name)
            .map(|(_, lit)| lit)
    }

    /// Parameter names in binding order, excluding nonlocals.
    pub fn param_names(&self) -> Vec<String> {
        let mut names = self.positional.clone();
        names.extend(self.varargs.iter().cloned());
        names
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct UntypedFn {
    pub name: String,
    pub args: ArgSpec,
    // Names captured from the defining scope, bound from the leading actuals of every call
    pub nonlocals: Vec<String>,
    pub body: Block,
}

impl UntypedFn {
    pub fn new(name: impl Into<String>, args: ArgSpec, body: Block) -> Self {
        UntypedFn {
            name: name.into(),
            args,
            nonlocals: Vec::new(),
            body,
        }
    }

    pub fn with_nonlocals(mut self, nonlocals: &[&str]) -> Self {
        self.nonlocals = nonlocals.iter().map(|name| name.to_string()).collect();
        self
    }
}
