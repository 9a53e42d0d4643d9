use std::collections::BTreeMap;

use manifold_common::data::syntax::{Block, Expr, ExprKind, Merge, Stmt};
use manifold_common::data::typed_ast::TypedFn;

/// The position of a program point, as indices through nested blocks. Paths compare in program
/// order.
///
/// Within a conditional at index `k`, the condition is `[k, 0]`, the branches are `[k, 1, ..]`
/// and `[k, 2, ..]`, and the merge is `[k, 3]`. Within a loop, the entry side of the merge is
/// `[k, 0]`, the condition `[k, 1]`, the body `[k, 2, ..]`, and the back-edge side of the merge
/// `[k, 3]`. Parameters are defined at the empty path.
pub type StmtPath = Vec<usize>;

#[derive(Clone, Debug, Default)]
pub struct VarUses {
    pub reads: Vec<StmtPath>,
    // Indexed assignments through this variable
    pub writes: Vec<StmtPath>,
    pub defs: Vec<StmtPath>,
}

#[derive(Clone, Debug, Default)]
pub struct UseDef {
    vars: BTreeMap<String, VarUses>,
}

/// Splits an assignment target `x[i][j]` into its root variable and index expressions.
pub fn index_target(lhs: &Expr) -> Option<(&str, Vec<&Expr>)> {
    match &lhs.kind {
        ExprKind::Var(name) => Some((name, Vec::new())),
        ExprKind::Index(base, index) => {
            let (root, mut indices) = index_target(base)?;
            indices.push(index);
            Some((root, indices))
        }
        _ => None,
    }
}

impl UseDef {
    pub fn compute(func: &TypedFn) -> UseDef {
        let mut use_def = UseDef::default();
        for name in &func.arg_names {
            use_def.entry(name).defs.push(Vec::new());
        }
        use_def.visit_block(&func.body, &mut Vec::new());
        for uses in use_def.vars.values_mut() {
            uses.reads.sort();
            uses.writes.sort();
            uses.defs.sort();
        }
        use_def
    }

    fn entry(&mut self, name: &str) -> &mut VarUses {
        self.vars.entry(name.to_owned()).or_default()
    }

    fn read_expr(&mut self, expr: &Expr, path: &StmtPath) {
        for var in expr.vars() {
            self.entry(&var).reads.push(path.clone());
        }
    }

    fn define(&mut self, lhs: &Expr, path: &StmtPath) {
        match &lhs.kind {
            ExprKind::Var(name) => self.entry(name).defs.push(path.clone()),
            ExprKind::Tuple(items) => {
                for item in items {
                    self.define(item, path);
                }
            }
            _ => match index_target(lhs) {
                Some((root, indices)) => {
                    self.entry(root).writes.push(path.clone());
                    for index in indices {
                        self.read_expr(index, path);
                    }
                }
                None => self.read_expr(lhs, path),
            },
        }
    }

    fn visit_merge_side(&mut self, merge: &Merge, left: bool, path: &StmtPath) {
        for (name, (left_value, right_value)) in merge {
            let value = if left { left_value } else { right_value };
            self.read_expr(value, path);
            self.entry(name).defs.push(path.clone());
        }
    }

    fn visit_block(&mut self, block: &Block, prefix: &mut StmtPath) {
        for (i, stmt) in block.iter().enumerate() {
            prefix.push(i);
            match stmt {
                Stmt::Assign { lhs, rhs } => {
                    self.read_expr(rhs, prefix);
                    self.define(lhs, prefix);
                }

                Stmt::Return(value) => self.read_expr(value, prefix),

                Stmt::If {
                    cond,
                    true_block,
                    false_block,
                    merge,
                } => {
                    self.read_expr(cond, &section(prefix, 0));
                    prefix.push(1);
                    self.visit_block(true_block, prefix);
                    prefix.pop();
                    prefix.push(2);
                    self.visit_block(false_block, prefix);
                    prefix.pop();
                    // Both sides are attributed to the merge point.
                    self.visit_merge_side(merge, true, &section(prefix, 3));
                    for (_, right) in merge.values() {
                        self.read_expr(right, &section(prefix, 3));
                    }
                }

                Stmt::While { cond, body, merge } => {
                    self.visit_merge_side(merge, true, &section(prefix, 0));
                    self.read_expr(cond, &section(prefix, 1));
                    prefix.push(2);
                    self.visit_block(body, prefix);
                    prefix.pop();
                    self.visit_merge_side(merge, false, &section(prefix, 3));
                }
            }
            prefix.pop();
        }
    }

    pub fn uses(&self, name: &str) -> Option<&VarUses> {
        self.vars.get(name)
    }

    pub fn reads(&self, name: &str) -> &[StmtPath] {
        self.vars.get(name).map_or(&[], |uses| &uses.reads)
    }

    pub fn writes(&self, name: &str) -> &[StmtPath] {
        self.vars.get(name).map_or(&[], |uses| &uses.writes)
    }

    pub fn defs(&self, name: &str) -> &[StmtPath] {
        self.vars.get(name).map_or(&[], |uses| &uses.defs)
    }

    /// The earliest read or indexed write of `name`.
    pub fn first_use(&self, name: &str) -> Option<&StmtPath> {
        let uses = self.vars.get(name)?;
        match (uses.reads.first(), uses.writes.first()) {
            (Some(read), Some(write)) => Some(read.min(write)),
            (read, write) => read.or(write),
        }
    }

    /// The latest read or indexed write of `name`.
    pub fn last_use(&self, name: &str) -> Option<&StmtPath> {
        let uses = self.vars.get(name)?;
        match (uses.reads.last(), uses.writes.last()) {
            (Some(read), Some(write)) => Some(read.max(write)),
            (read, write) => read.or(write),
        }
    }

    /// The latest definition of `name` strictly before `point`, i.e. where the value visible at
    /// `point` was created when control flows straight through.
    pub fn created_before(&self, name: &str, point: &StmtPath) -> Option<&StmtPath> {
        self.defs(name).iter().rev().find(|def| *def < point)
    }

    /// Whether `name` is read, written or redefined strictly between `start` and `end`.
    pub fn touched_between(&self, name: &str, start: &StmtPath, end: &StmtPath) -> bool {
        let Some(uses) = self.vars.get(name) else {
            return false;
        };
        let between = |path: &StmtPath| start < path && path < end;
        uses.reads.iter().any(between)
            || uses.writes.iter().any(between)
            || uses.defs.iter().any(between)
    }
}

fn section(prefix: &StmtPath, part: usize) -> StmtPath {
    let mut path = prefix.clone();
    path.push(part);
    path
}

/// Returns the block a statement path points into: everything but the path's last index.
pub fn block_at_mut<'a>(block: &'a mut Block, path: &[usize]) -> Option<&'a mut Block> {
    match path {
        [_] => Some(block),
        [k, part, rest @ ..] => match (block.get_mut(*k)?, part) {
            (Stmt::If { true_block, .. }, 1) => block_at_mut(true_block, rest),
            (Stmt::If { false_block, .. }, 2) => block_at_mut(false_block, rest),
            (Stmt::While { body, .. }, 2) => block_at_mut(body, rest),
            _ => None,
        },
        [] => None,
    }
}

pub fn stmt_at<'a>(block: &'a Block, path: &[usize]) -> Option<&'a Stmt> {
    match path {
        [k] => block.get(*k),
        [k, part, rest @ ..] => match (block.get(*k)?, part) {
            (Stmt::If { true_block, .. }, 1) => stmt_at(true_block, rest),
            (Stmt::If { false_block, .. }, 2) => stmt_at(false_block, rest),
            (Stmt::While { body, .. }, 2) => stmt_at(body, rest),
            _ => None,
        },
        [] => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use manifold_common::data::prims::Prim;
    use manifold_common::data::types::{ScalarType, Type, BOOL, INT64};

    fn var(name: &str, type_: Type) -> Expr {
        Expr::typed(ExprKind::Var(name.to_owned()), type_)
    }

    #[test]
    fn test_paths_follow_nesting() {
        let array = Type::Array(ScalarType::Int64, 1);
        let mut merge = Merge::new();
        merge.insert("i".to_owned(), (var("zero", INT64), var("next", INT64)));

        let func = TypedFn {
            name: "fill".to_owned(),
            arg_names: vec!["out".to_owned(), "zero".to_owned()],
            input_types: vec![array.clone(), INT64],
            body: vec![Stmt::While {
                cond: var("go", BOOL),
                body: vec![
                    Stmt::assign(
                        Expr::typed(
                            ExprKind::Index(
                                Box::new(var("out", array.clone())),
                                Box::new(var("i", INT64)),
                            ),
                            INT64,
                        ),
                        var("i", INT64),
                    ),
                    Stmt::assign(
                        var("next", INT64),
                        Expr::typed(
                            ExprKind::PrimCall(
                                Prim::Add,
                                vec![var("i", INT64), var("zero", INT64)],
                            ),
                            INT64,
                        ),
                    ),
                ],
                merge,
            }],
            return_type: Type::None,
            type_env: [
                ("out".to_owned(), array),
                ("zero".to_owned(), INT64),
                ("i".to_owned(), INT64),
                ("next".to_owned(), INT64),
                ("go".to_owned(), BOOL),
            ]
            .into_iter()
            .collect(),
        };

        let use_def = UseDef::compute(&func);
        assert!(use_def.reads("out").is_empty());
        assert_eq!(use_def.writes("out"), &[vec![0, 2, 0]]);
        assert_eq!(use_def.defs("i"), &[vec![0, 0], vec![0, 3]]);
        assert_eq!(use_def.defs("zero"), &[Vec::<usize>::new()]);
        assert_eq!(use_def.first_use("i"), Some(&vec![0, 2, 0]));
        assert_eq!(use_def.last_use("next"), Some(&vec![0, 3]));
        assert_eq!(use_def.created_before("i", &vec![0, 2, 1]), Some(&vec![0, 0]));
        assert!(matches!(
            stmt_at(&func.body, &[0, 2, 1]),
            Some(Stmt::Assign { .. })
        ));
    }
}
