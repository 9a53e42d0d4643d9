use std::collections::{BTreeMap, BTreeSet};

use manifold_common::data::syntax::{Block, Expr, ExprKind, Merge, Stmt};
use manifold_common::data::typed_ast::TypedFn;
use manifold_common::data::types::Type;

#[derive(Clone, Debug, Default)]
struct UnionFind {
    parent: BTreeMap<String, String>,
}

impl UnionFind {
    fn find(&mut self, name: &str) -> String {
        let parent = match self.parent.get(name) {
            Some(parent) if parent != name => parent.clone(),
            Some(_) => return name.to_owned(),
            None => {
                self.parent.insert(name.to_owned(), name.to_owned());
                return name.to_owned();
            }
        };
        let root = self.find(&parent);
        self.parent.insert(name.to_owned(), root.clone());
        root
    }

    fn union(&mut self, a: &str, b: &str) {
        let a = self.find(a);
        let b = self.find(b);
        if a != b {
            self.parent.insert(a, b);
        }
    }
}

/// Variables whose storage a value computed by `expr` may share.
///
/// Views, projections, aggregates and call results alias their operands. Adverb results,
/// literals, allocations, casts and primitive results are fresh, and scalars never alias.
pub fn alias_roots(expr: &Expr) -> BTreeSet<String> {
    let mut roots = BTreeSet::new();
    collect_roots(expr, &mut roots);
    roots
}

fn collect_roots(expr: &Expr, roots: &mut BTreeSet<String>) {
    // Scalars are plain values
    if matches!(expr.type_, Some(Type::Scalar(_)) | Some(Type::None)) {
        return;
    }
    match &expr.kind {
        ExprKind::Var(name) => {
            roots.insert(name.clone());
        }
        ExprKind::Index(base, _)
        | ExprKind::TupleProj(base, _)
        | ExprKind::Attribute(base, _)
        | ExprKind::ClosureElt(base, _) => collect_roots(base, roots),
        ExprKind::Tuple(items) | ExprKind::Closure(_, items) | ExprKind::Call(_, items) => {
            for item in items {
                collect_roots(item, roots);
            }
        }
        ExprKind::Struct { fields, .. } => {
            for (_, field) in fields {
                collect_roots(field, roots);
            }
        }
        ExprKind::Invoke(callee, args) => {
            collect_roots(callee, roots);
            for arg in args {
                collect_roots(arg, roots);
            }
        }
        ExprKind::Const(_)
        | ExprKind::Array(_)
        | ExprKind::Slice { .. }
        | ExprKind::PrimCall(_, _)
        | ExprKind::Prim(_)
        | ExprKind::Fn(_)
        | ExprKind::Cast(_, _)
        | ExprKind::AllocArray { .. }
        | ExprKind::Map { .. }
        | ExprKind::AllPairs { .. }
        | ExprKind::Reduce { .. }
        | ExprKind::Scan { .. } => {}
    }
}

fn lhs_vars(lhs: &Expr, vars: &mut Vec<String>) {
    match &lhs.kind {
        ExprKind::Var(name) => vars.push(name.clone()),
        ExprKind::Tuple(items) => {
            for item in items {
                lhs_vars(item, vars);
            }
        }
        _ => {}
    }
}

/// May-alias classes and the set of variables whose storage is visible outside the function.
#[derive(Clone, Debug)]
pub struct Escape {
    classes: BTreeMap<String, BTreeSet<String>>,
    class_of: BTreeMap<String, String>,
    escaping: BTreeSet<String>,
}

struct Builder {
    union_find: UnionFind,
    escaping_roots: BTreeSet<String>,
}

impl Builder {
    fn bind(&mut self, name: &str, value: &Expr) {
        self.union_find.find(name);
        for root in alias_roots(value) {
            self.union_find.union(name, &root);
        }
    }

    fn visit_merge(&mut self, merge: &Merge) {
        for (name, (left, right)) in merge {
            self.bind(name, left);
            self.bind(name, right);
        }
    }

    fn visit_block(&mut self, block: &Block) {
        for stmt in block {
            match stmt {
                Stmt::Assign { lhs, rhs } => {
                    let mut targets = Vec::new();
                    lhs_vars(lhs, &mut targets);
                    for target in targets {
                        self.bind(&target, rhs);
                    }
                }
                Stmt::Return(value) => {
                    self.escaping_roots.extend(value.vars());
                }
                Stmt::If {
                    true_block,
                    false_block,
                    merge,
                    ..
                } => {
                    self.visit_block(true_block);
                    self.visit_block(false_block);
                    self.visit_merge(merge);
                }
                Stmt::While { body, merge, .. } => {
                    self.visit_block(body);
                    self.visit_merge(merge);
                }
            }
        }
    }
}

impl Escape {
    pub fn compute(func: &TypedFn) -> Escape {
        let mut builder = Builder {
            union_find: UnionFind::default(),
            escaping_roots: func.arg_names.iter().cloned().collect(),
        };
        for name in func.type_env.keys() {
            builder.union_find.find(name);
        }
        builder.visit_block(&func.body);

        let mut union_find = builder.union_find;
        let names: Vec<String> = union_find.parent.keys().cloned().collect();
        let mut classes: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut class_of = BTreeMap::new();
        for name in names {
            let root = union_find.find(&name);
            classes.entry(root.clone()).or_default().insert(name.clone());
            class_of.insert(name, root);
        }

        let mut escaping = BTreeSet::new();
        for name in &builder.escaping_roots {
            match class_of.get(name) {
                Some(root) => escaping.extend(classes[root].iter().cloned()),
                None => {
                    escaping.insert(name.clone());
                }
            }
        }

        Escape {
            classes,
            class_of,
            escaping,
        }
    }

    pub fn escapes(&self, name: &str) -> bool {
        self.escaping.contains(name)
    }

    /// Every variable that may share storage with `name`, including `name` itself.
    pub fn aliases(&self, name: &str) -> BTreeSet<String> {
        match self.class_of.get(name) {
            Some(root) => self.classes[root].clone(),
            None => [name.to_owned()].into_iter().collect(),
        }
    }

    pub fn may_alias(&self, a: &str, b: &str) -> bool {
        a == b
            || matches!(
                (self.class_of.get(a), self.class_of.get(b)),
                (Some(class_a), Some(class_b)) if class_a == class_b
            )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use manifold_common::data::syntax::Literal;
    use manifold_common::data::types::{ScalarType, INT64};

    fn var(name: &str, type_: Type) -> Expr {
        Expr::typed(ExprKind::Var(name.to_owned()), type_)
    }

    #[test]
    fn test_views_alias_and_returns_escape() {
        let matrix = Type::Array(ScalarType::Float64, 2);
        let row = Type::Array(ScalarType::Float64, 1);
        let func = TypedFn {
            name: "rows".to_owned(),
            arg_names: vec!["m".to_owned()],
            input_types: vec![matrix.clone()],
            body: vec![
                Stmt::assign(
                    var("first", row.clone()),
                    Expr::typed(
                        ExprKind::Index(
                            Box::new(var("m", matrix.clone())),
                            Box::new(Expr::typed(
                                ExprKind::Const(Literal::Int(0)),
                                INT64,
                            )),
                        ),
                        row.clone(),
                    ),
                ),
                Stmt::assign(
                    var("fresh", row.clone()),
                    Expr::typed(
                        ExprKind::AllocArray {
                            elt: ScalarType::Float64,
                            shape: Box::new(Expr::typed(
                                ExprKind::Const(Literal::Int(3)),
                                INT64,
                            )),
                        },
                        row.clone(),
                    ),
                ),
                Stmt::assign(var("copy", row.clone()), var("fresh", row.clone())),
                Stmt::ret(var("copy", row.clone())),
            ],
            return_type: row.clone(),
            type_env: [
                ("m".to_owned(), matrix),
                ("first".to_owned(), row.clone()),
                ("fresh".to_owned(), row.clone()),
                ("copy".to_owned(), row),
            ]
            .into_iter()
            .collect(),
        };

        let escape = Escape::compute(&func);
        assert!(escape.may_alias("first", "m"));
        assert!(!escape.may_alias("first", "fresh"));
        // returned through its copy
        assert!(escape.escapes("fresh"));
        // parameter storage belongs to the caller
        assert!(escape.escapes("first"));
        assert_eq!(escape.aliases("copy").len(), 2);
    }
}
