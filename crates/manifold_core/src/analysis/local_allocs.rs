use std::collections::BTreeMap;

use manifold_common::data::syntax::{AllocKind, Block, ExprKind, Stmt};
use manifold_common::data::typed_ast::TypedFn;

use crate::analysis::use_def::{StmtPath, UseDef};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalAlloc {
    pub path: StmtPath,
    pub kind: AllocKind,
}

/// Variables defined exactly once, by a statement that materializes fresh storage.
#[derive(Clone, Debug, Default)]
pub struct LocalAllocs {
    allocs: BTreeMap<String, LocalAlloc>,
}

impl LocalAllocs {
    pub fn compute(func: &TypedFn, use_def: &UseDef) -> LocalAllocs {
        let mut allocs = LocalAllocs::default();
        allocs.visit_block(&func.body, use_def, &mut Vec::new());
        allocs
    }

    fn visit_block(&mut self, block: &Block, use_def: &UseDef, prefix: &mut StmtPath) {
        for (i, stmt) in block.iter().enumerate() {
            prefix.push(i);
            match stmt {
                Stmt::Assign { lhs, rhs } => {
                    if let (ExprKind::Var(name), Some(kind)) = (&lhs.kind, rhs.alloc_kind()) {
                        if use_def.defs(name).len() == 1 {
                            self.allocs.insert(
                                name.clone(),
                                LocalAlloc {
                                    path: prefix.clone(),
                                    kind,
                                },
                            );
                        }
                    }
                }
                Stmt::Return(_) => {}
                Stmt::If {
                    true_block,
                    false_block,
                    ..
                } => {
                    prefix.push(1);
                    self.visit_block(true_block, use_def, prefix);
                    prefix.pop();
                    prefix.push(2);
                    self.visit_block(false_block, use_def, prefix);
                    prefix.pop();
                }
                Stmt::While { body, .. } => {
                    prefix.push(2);
                    self.visit_block(body, use_def, prefix);
                    prefix.pop();
                }
            }
            prefix.pop();
        }
    }

    pub fn get(&self, name: &str) -> Option<&LocalAlloc> {
        self.allocs.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LocalAlloc)> {
        self.allocs.iter()
    }
}
