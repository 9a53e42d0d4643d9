use std::io;
use std::io::Write;

use crate::data::syntax::{Block, Expr, ExprKind, Literal, Merge, Stmt};
use crate::data::typed_ast::TypedFn;
use crate::data::untyped_ast::UntypedFn;
use crate::prim_config::prim_to_name;

const TAB_SIZE: usize = 2;

struct Context<'a> {
    writer: &'a mut dyn Write,
    indentation: usize,
}

impl<'a> Context<'a> {
    fn add_indent(&mut self) {
        self.indentation += TAB_SIZE;
    }

    fn remove_indent(&mut self) {
        self.indentation -= TAB_SIZE;
    }

    fn write(&mut self, e: impl std::fmt::Display) -> io::Result<()> {
        write![self.writer, "{}", e]
    }

    fn writeln(&mut self) -> io::Result<()> {
        writeln![self.writer]?;
        write![self.writer, "{}", " ".repeat(self.indentation)]
    }

    fn write_list(&mut self, items: &[Expr]) -> io::Result<()> {
        for (i, item) in items.iter().enumerate() {
            if i != 0 {
                self.write(", ")?;
            }
            self.write_expr(item)?;
        }
        Ok(())
    }

    fn write_adverb(
        &mut self,
        name: &str,
        funcs: &[&Expr],
        init: Option<&Expr>,
        args: &[Expr],
        axis: &Expr,
    ) -> io::Result<()> {
        self.write(name)?;
        self.write("(")?;
        for func in funcs {
            self.write_expr(func)?;
            self.write(", ")?;
        }
        self.write("[")?;
        self.write_list(args)?;
        self.write("], axis=")?;
        self.write_expr(axis)?;
        if let Some(init) = init {
            self.write(", init=")?;
            self.write_expr(init)?;
        }
        self.write(")")
    }

    fn write_expr(&mut self, expr: &Expr) -> io::Result<()> {
        match &expr.kind {
            ExprKind::Const(lit) => match lit {
                Literal::None => self.write("None"),
                Literal::Bool(value) => self.write(value),
                Literal::Int(value) => self.write(value),
                Literal::Float(value) => self.write(format!("{:?}", value)),
            },
            ExprKind::Var(name) => self.write(name),
            ExprKind::Tuple(items) => {
                self.write("(")?;
                self.write_list(items)?;
                if items.len() == 1 {
                    self.write(",")?;
                }
                self.write(")")
            }
            ExprKind::TupleProj(tuple, i) => {
                self.write_expr(tuple)?;
                self.write(format!(".{}", i))
            }
            ExprKind::Array(items) => {
                self.write("[")?;
                self.write_list(items)?;
                self.write("]")
            }
            ExprKind::Index(base, index) => {
                self.write_expr(base)?;
                self.write("[")?;
                self.write_expr(index)?;
                self.write("]")
            }
            ExprKind::Slice { start, stop, step } => {
                self.write_expr(start)?;
                self.write(":")?;
                self.write_expr(stop)?;
                if let Some(step) = step {
                    self.write(":")?;
                    self.write_expr(step)?;
                }
                Ok(())
            }
            ExprKind::Attribute(base, name) => {
                self.write_expr(base)?;
                self.write(format!(".{}", name))
            }
            ExprKind::PrimCall(prim, args) => {
                self.write(prim_to_name(*prim))?;
                self.write("(")?;
                self.write_list(args)?;
                self.write(")")
            }
            ExprKind::Prim(prim) => self.write(format!("<prim {}>", prim_to_name(*prim))),
            ExprKind::Call(name, args) => {
                self.write(name)?;
                self.write("(")?;
                self.write_list(args)?;
                self.write(")")
            }
            ExprKind::Invoke(callee, args) => {
                self.write("invoke(")?;
                self.write_expr(callee)?;
                if !args.is_empty() {
                    self.write(", ")?;
                }
                self.write_list(args)?;
                self.write(")")
            }
            ExprKind::Closure(name, captured) => {
                self.write(format!("closure {}[", name))?;
                self.write_list(captured)?;
                self.write("]")
            }
            ExprKind::ClosureElt(closure, i) => {
                self.write_expr(closure)?;
                self.write(format!(".captured{}", i))
            }
            ExprKind::Fn(func) => self.write(format!("<fn {}>", func.name)),
            ExprKind::Cast(inner, type_) => {
                self.write(format!("{}(", type_.name()))?;
                self.write_expr(inner)?;
                self.write(")")
            }
            ExprKind::Struct { name, fields } => {
                self.write(format!("{} {{", name))?;
                for (i, (field_name, field)) in fields.iter().enumerate() {
                    if i != 0 {
                        self.write(",")?;
                    }
                    self.write(format!(" {}: ", field_name))?;
                    self.write_expr(field)?;
                }
                self.write(" }")
            }
            ExprKind::AllocArray { elt, shape } => {
                self.write(format!("alloc<{}>(", elt.name()))?;
                self.write_expr(shape)?;
                self.write(")")
            }
            ExprKind::Map { func, args, axis } => {
                self.write_adverb("map", &[&**func], None, args, axis)
            }
            ExprKind::AllPairs { func, args, axis } => {
                self.write_adverb("allpairs", &[&**func], None, args, axis)
            }
            ExprKind::Reduce {
                func,
                combine,
                init,
                args,
                axis,
            } => self.write_adverb("reduce", &[&**func, &**combine], init.as_deref(), args, axis),
            ExprKind::Scan {
                func,
                combine,
                emit,
                init,
                args,
                axis,
            } => self.write_adverb(
                "scan",
                &[&**func, &**combine, &**emit],
                init.as_deref(),
                args,
                axis,
            ),
        }
    }

    fn write_merge(&mut self, merge: &Merge) -> io::Result<()> {
        if merge.is_empty() {
            return Ok(());
        }
        self.write(" merge {")?;
        self.add_indent();
        for (name, (left, right)) in merge {
            self.writeln()?;
            self.write(format!("{} = phi(", name))?;
            self.write_expr(left)?;
            self.write(", ")?;
            self.write_expr(right)?;
            self.write(")")?;
        }
        self.remove_indent();
        self.writeln()?;
        self.write("}")
    }

    fn write_block(&mut self, block: &Block) -> io::Result<()> {
        self.write("{")?;
        self.add_indent();
        for stmt in block {
            self.writeln()?;
            self.write_stmt(stmt)?;
        }
        self.remove_indent();
        self.writeln()?;
        self.write("}")
    }

    fn write_stmt(&mut self, stmt: &Stmt) -> io::Result<()> {
        match stmt {
            Stmt::Assign { lhs, rhs } => {
                self.write_expr(lhs)?;
                self.write(" = ")?;
                self.write_expr(rhs)
            }
            Stmt::Return(value) => {
                self.write("return ")?;
                self.write_expr(value)
            }
            Stmt::If {
                cond,
                true_block,
                false_block,
                merge,
            } => {
                self.write("if ")?;
                self.write_expr(cond)?;
                self.write(" ")?;
                self.write_block(true_block)?;
                self.write(" else ")?;
                self.write_block(false_block)?;
                self.write_merge(merge)
            }
            Stmt::While { cond, body, merge } => {
                self.write("while ")?;
                self.write_expr(cond)?;
                self.write(" ")?;
                self.write_block(body)?;
                self.write_merge(merge)
            }
        }
    }
}

pub fn write_typed_fn(w: &mut dyn Write, func: &TypedFn) -> io::Result<()> {
    let mut context = Context {
        writer: w,
        indentation: 0,
    };
    context.write(format!("fn {}(", func.name))?;
    for (i, (name, type_)) in func.param_types().enumerate() {
        if i != 0 {
            context.write(", ")?;
        }
        context.write(format!("{}: {}", name, type_))?;
    }
    context.write(format!(") -> {} ", func.return_type))?;
    context.write_block(&func.body)?;
    context.writeln()?;
    context.writeln()
}

pub fn write_untyped_fn(w: &mut dyn Write, func: &UntypedFn) -> io::Result<()> {
    let mut context = Context {
        writer: w,
        indentation: 0,
    };
    context.write(format!("fn {}(", func.name))?;
    let mut params: Vec<String> = func
        .nonlocals
        .iter()
        .map(|name| format!("nonlocal {}", name))
        .collect();
    params.extend(func.args.positional.iter().cloned());
    params.extend(func.args.varargs.iter().map(|name| format!("*{}", name)));
    context.write(params.join(", "))?;
    context.write(") ")?;
    context.write_block(&func.body)?;
    context.writeln()?;
    context.writeln()
}

pub fn typed_fn_to_string(func: &TypedFn) -> String {
    let mut out = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_typed_fn(&mut out, func);
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::prims::Prim;
    use crate::data::untyped_ast::ArgSpec;

    #[test]
    fn test_write_untyped() {
        let func = UntypedFn::new(
            "inc",
            ArgSpec::positional(&["x"]),
            vec![
                Stmt::set("y", Expr::prim(Prim::Add, vec![Expr::var("x"), Expr::int(1)])),
                Stmt::ret(Expr::var("y")),
            ],
        );
        let mut out = Vec::new();
        write_untyped_fn(&mut out, &func).expect("writing to a Vec succeeds");
        let text = String::from_utf8(out).expect("printer emits UTF-8");
        assert_eq!(
            text,
            "fn inc(x) {\n  y = add(x, 1)\n  return y\n}\n\n"
        );
    }
}
