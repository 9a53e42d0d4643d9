use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::data::prims::Prim;
use crate::data::types::{ScalarType, Type, BOOL, FLOAT64, INT64};
use crate::data::untyped_ast::UntypedFn;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Literal {
    pub fn type_(&self) -> Type {
        match self {
            Literal::None => Type::None,
            Literal::Bool(_) => BOOL,
            Literal::Int(_) => INT64,
            Literal::Float(_) => FLOAT64,
        }
    }
}

/// Which kind of fresh storage an allocation-like expression materializes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AllocKind {
    Raw,
    Struct,
    Adverb,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Const(Literal),
    Var(String),
    Tuple(Vec<Expr>),
    TupleProj(Box<Expr>, usize),
    Array(Vec<Expr>),
    // The index may be a scalar, a slice, or a tuple of those
    Index(Box<Expr>, Box<Expr>),
    Slice {
        start: Box<Expr>,
        stop: Box<Expr>,
        step: Option<Box<Expr>>,
    },
    Attribute(Box<Expr>, String),
    PrimCall(Prim, Vec<Expr>),
    // A primitive operator used as a first-class callable (untyped IR only)
    Prim(Prim),
    Call(String, Vec<Expr>),
    Invoke(Box<Expr>, Vec<Expr>),
    Closure(String, Vec<Expr>),
    ClosureElt(Box<Expr>, usize),
    Fn(Rc<UntypedFn>),
    Cast(Box<Expr>, ScalarType),
    Struct {
        name: String,
        fields: Vec<(String, Expr)>,
    },
    AllocArray {
        elt: ScalarType,
        shape: Box<Expr>,
    },
    Map {
        func: Box<Expr>,
        args: Vec<Expr>,
        axis: Box<Expr>,
    },
    AllPairs {
        func: Box<Expr>,
        args: Vec<Expr>,
        axis: Box<Expr>,
    },
    Reduce {
        func: Box<Expr>,
        combine: Box<Expr>,
        init: Option<Box<Expr>>,
        args: Vec<Expr>,
        axis: Box<Expr>,
    },
    Scan {
        func: Box<Expr>,
        combine: Box<Expr>,
        emit: Box<Expr>,
        init: Option<Box<Expr>>,
        args: Vec<Expr>,
        axis: Box<Expr>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub type_: Option<Type>,
}

impl From<ExprKind> for Expr {
    fn from(kind: ExprKind) -> Self {
        Expr { kind, type_: None }
    }
}

impl Expr {
    pub fn typed(kind: ExprKind, type_: Type) -> Self {
        Expr {
            kind,
            type_: Some(type_),
        }
    }

    pub fn lit(lit: Literal) -> Self {
        ExprKind::Const(lit).into()
    }

    pub fn int(value: i64) -> Self {
        Expr::lit(Literal::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Expr::lit(Literal::Float(value))
    }

    pub fn bool(value: bool) -> Self {
        Expr::lit(Literal::Bool(value))
    }

    pub fn none() -> Self {
        Expr::lit(Literal::None)
    }

    pub fn var(name: impl Into<String>) -> Self {
        ExprKind::Var(name.into()).into()
    }

    pub fn tuple(items: Vec<Expr>) -> Self {
        ExprKind::Tuple(items).into()
    }

    pub fn array(items: Vec<Expr>) -> Self {
        ExprKind::Array(items).into()
    }

    pub fn index(base: Expr, index: Expr) -> Self {
        ExprKind::Index(Box::new(base), Box::new(index)).into()
    }

    pub fn slice(start: Expr, stop: Expr, step: Option<Expr>) -> Self {
        ExprKind::Slice {
            start: Box::new(start),
            stop: Box::new(stop),
            step: step.map(Box::new),
        }
        .into()
    }

    pub fn attr(base: Expr, name: impl Into<String>) -> Self {
        ExprKind::Attribute(Box::new(base), name.into()).into()
    }

    pub fn prim(prim: Prim, args: Vec<Expr>) -> Self {
        ExprKind::PrimCall(prim, args).into()
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        ExprKind::Call(name.into(), args).into()
    }

    pub fn invoke(callee: Expr, args: Vec<Expr>) -> Self {
        ExprKind::Invoke(Box::new(callee), args).into()
    }

    pub fn closure(name: impl Into<String>, captured: Vec<Expr>) -> Self {
        ExprKind::Closure(name.into(), captured).into()
    }

    pub fn cast(expr: Expr, type_: ScalarType) -> Self {
        ExprKind::Cast(Box::new(expr), type_).into()
    }

    pub fn map(func: Expr, args: Vec<Expr>, axis: i64) -> Self {
        ExprKind::Map {
            func: Box::new(func),
            args,
            axis: Box::new(Expr::int(axis)),
        }
        .into()
    }

    pub fn all_pairs(func: Expr, x: Expr, y: Expr, axis: i64) -> Self {
        ExprKind::AllPairs {
            func: Box::new(func),
            args: vec![x, y],
            axis: Box::new(Expr::int(axis)),
        }
        .into()
    }

    pub fn reduce(
        func: Expr,
        combine: Expr,
        init: Option<Expr>,
        args: Vec<Expr>,
        axis: i64,
    ) -> Self {
        ExprKind::Reduce {
            func: Box::new(func),
            combine: Box::new(combine),
            init: init.map(Box::new),
            args,
            axis: Box::new(Expr::int(axis)),
        }
        .into()
    }

    pub fn scan(
        func: Expr,
        combine: Expr,
        emit: Expr,
        init: Option<Expr>,
        args: Vec<Expr>,
        axis: i64,
    ) -> Self {
        ExprKind::Scan {
            func: Box::new(func),
            combine: Box::new(combine),
            emit: Box::new(emit),
            init: init.map(Box::new),
            args,
            axis: Box::new(Expr::int(axis)),
        }
        .into()
    }

    /// The resolved type of a node in typed IR.
    ///
    /// Every node of a specialized function carries a type, so a missing one is an internal
    /// consistency violation.
    pub fn ty(&self) -> &Type {
        match &self.type_ {
            Some(type_) => type_,
            None => panic!("expression has no type in typed IR: {:?}", self.kind),
        }
    }

    pub fn as_var(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Var(name) => Some(name),
            _ => None,
        }
    }

    pub fn alloc_kind(&self) -> Option<AllocKind> {
        match &self.kind {
            ExprKind::AllocArray { .. } => Some(AllocKind::Raw),
            ExprKind::Struct { .. } => Some(AllocKind::Struct),
            ExprKind::Map { .. }
            | ExprKind::AllPairs { .. }
            | ExprKind::Reduce { .. }
            | ExprKind::Scan { .. } => Some(AllocKind::Adverb),
            _ => None,
        }
    }

    pub fn children(&self) -> Vec<&Expr> {
        use ExprKind as E;

        match &self.kind {
            E::Const(_) | E::Var(_) | E::Prim(_) | E::Fn(_) => vec![],
            E::Tuple(items) | E::Array(items) | E::PrimCall(_, items) | E::Call(_, items) => {
                items.iter().collect()
            }
            E::Closure(_, captured) => captured.iter().collect(),
            E::TupleProj(inner, _)
            | E::Attribute(inner, _)
            | E::ClosureElt(inner, _)
            | E::Cast(inner, _) => vec![&**inner],
            E::Index(base, index) => vec![&**base, &**index],
            E::Slice { start, stop, step } => {
                let mut children = vec![&**start, &**stop];
                children.extend(step.as_deref());
                children
            }
            E::Invoke(callee, args) => std::iter::once(&**callee).chain(args).collect(),
            E::Struct { fields, .. } => fields.iter().map(|(_, field)| field).collect(),
            E::AllocArray { shape, .. } => vec![&**shape],
            E::Map { func, args, axis } | E::AllPairs { func, args, axis } => {
                std::iter::once(&**func)
                    .chain(args)
                    .chain(std::iter::once(&**axis))
                    .collect()
            }
            E::Reduce {
                func,
                combine,
                init,
                args,
                axis,
            } => {
                let mut children = vec![&**func, &**combine];
                children.extend(init.as_deref());
                children.extend(args);
                children.push(&**axis);
                children
            }
            E::Scan {
                func,
                combine,
                emit,
                init,
                args,
                axis,
            } => {
                let mut children = vec![&**func, &**combine, &**emit];
                children.extend(init.as_deref());
                children.extend(args);
                children.push(&**axis);
                children
            }
        }
    }

    /// Collects every variable this expression reads.
    pub fn collect_vars(&self, vars: &mut BTreeSet<String>) {
        if let ExprKind::Var(name) = &self.kind {
            vars.insert(name.clone());
        }
        for child in self.children() {
            child.collect_vars(vars);
        }
    }

    pub fn vars(&self) -> BTreeSet<String> {
        let mut vars = BTreeSet::new();
        self.collect_vars(&mut vars);
        vars
    }

    /// Rebuilds this node with `f` applied to each direct child, keeping the node's type.
    pub fn try_map_children<E, F>(self, f: &mut F) -> Result<Expr, E>
    where
        F: FnMut(Expr) -> Result<Expr, E>,
    {
        use ExprKind as K;

        fn each<E, F: FnMut(Expr) -> Result<Expr, E>>(
            items: Vec<Expr>,
            f: &mut F,
        ) -> Result<Vec<Expr>, E> {
            items.into_iter().map(|item| f(item)).collect()
        }

        fn boxed<E, F: FnMut(Expr) -> Result<Expr, E>>(
            item: Box<Expr>,
            f: &mut F,
        ) -> Result<Box<Expr>, E> {
            Ok(Box::new(f(*item)?))
        }

        fn optional<E, F: FnMut(Expr) -> Result<Expr, E>>(
            item: Option<Box<Expr>>,
            f: &mut F,
        ) -> Result<Option<Box<Expr>>, E> {
            item.map(|item| boxed(item, f)).transpose()
        }

        let Expr { kind, type_ } = self;
        let kind = match kind {
            leaf @ (K::Const(_) | K::Var(_) | K::Prim(_) | K::Fn(_)) => leaf,
            K::Tuple(items) => K::Tuple(each(items, f)?),
            K::TupleProj(tuple, i) => K::TupleProj(boxed(tuple, f)?, i),
            K::Array(items) => K::Array(each(items, f)?),
            K::Index(base, index) => K::Index(boxed(base, f)?, boxed(index, f)?),
            K::Slice { start, stop, step } => K::Slice {
                start: boxed(start, f)?,
                stop: boxed(stop, f)?,
                step: optional(step, f)?,
            },
            K::Attribute(base, name) => K::Attribute(boxed(base, f)?, name),
            K::PrimCall(prim, args) => K::PrimCall(prim, each(args, f)?),
            K::Call(name, args) => K::Call(name, each(args, f)?),
            K::Invoke(callee, args) => K::Invoke(boxed(callee, f)?, each(args, f)?),
            K::Closure(name, captured) => K::Closure(name, each(captured, f)?),
            K::ClosureElt(closure, i) => K::ClosureElt(boxed(closure, f)?, i),
            K::Cast(inner, elt) => K::Cast(boxed(inner, f)?, elt),
            K::Struct { name, fields } => K::Struct {
                name,
                fields: fields
                    .into_iter()
                    .map(|(field_name, field)| Ok((field_name, f(field)?)))
                    .collect::<Result<_, E>>()?,
            },
            K::AllocArray { elt, shape } => K::AllocArray {
                elt,
                shape: boxed(shape, f)?,
            },
            K::Map { func, args, axis } => K::Map {
                func: boxed(func, f)?,
                args: each(args, f)?,
                axis: boxed(axis, f)?,
            },
            K::AllPairs { func, args, axis } => K::AllPairs {
                func: boxed(func, f)?,
                args: each(args, f)?,
                axis: boxed(axis, f)?,
            },
            K::Reduce {
                func,
                combine,
                init,
                args,
                axis,
            } => K::Reduce {
                func: boxed(func, f)?,
                combine: boxed(combine, f)?,
                init: optional(init, f)?,
                args: each(args, f)?,
                axis: boxed(axis, f)?,
            },
            K::Scan {
                func,
                combine,
                emit,
                init,
                args,
                axis,
            } => K::Scan {
                func: boxed(func, f)?,
                combine: boxed(combine, f)?,
                emit: boxed(emit, f)?,
                init: optional(init, f)?,
                args: each(args, f)?,
                axis: boxed(axis, f)?,
            },
        };
        Ok(Expr { kind, type_ })
    }
}

/// Per-variable pair of values reconciled where two control-flow paths meet.
///
/// For conditionals the pair is (value after the true branch, value after the false branch). For
/// loops it is (value on entry, value after each iteration of the body).
pub type Merge = BTreeMap<String, (Expr, Expr)>;

pub type Block = Vec<Stmt>;

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Assign {
        lhs: Expr,
        rhs: Expr,
    },
    Return(Expr),
    If {
        cond: Expr,
        true_block: Block,
        false_block: Block,
        merge: Merge,
    },
    While {
        cond: Expr,
        body: Block,
        merge: Merge,
    },
}

impl Stmt {
    pub fn assign(lhs: Expr, rhs: Expr) -> Self {
        Stmt::Assign { lhs, rhs }
    }

    pub fn set(name: impl Into<String>, rhs: Expr) -> Self {
        Stmt::Assign {
            lhs: Expr::var(name),
            rhs,
        }
    }

    pub fn ret(expr: Expr) -> Self {
        Stmt::Return(expr)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_alloc_kind() {
        let alloc: Expr = ExprKind::AllocArray {
            elt: ScalarType::Float64,
            shape: Box::new(Expr::int(3)),
        }
        .into();
        assert_eq!(alloc.alloc_kind(), Some(AllocKind::Raw));
        assert_eq!(
            Expr::map(Expr::var("f"), vec![Expr::var("x")], 0).alloc_kind(),
            Some(AllocKind::Adverb)
        );
        assert_eq!(Expr::var("x").alloc_kind(), None);
        assert_eq!(Expr::array(vec![Expr::int(1)]).alloc_kind(), None);
    }

    #[test]
    fn test_vars() {
        let expr = Expr::reduce(
            Expr::var("f"),
            Expr::var("g"),
            Some(Expr::var("init")),
            vec![Expr::index(Expr::var("x"), Expr::var("i"))],
            0,
        );
        let vars: Vec<_> = expr.vars().into_iter().collect();
        assert_eq!(vars, vec!["f", "g", "i", "init", "x"]);
    }
}
