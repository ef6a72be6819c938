//! Display implementations for the imperative IR.
//!
//! C-like notation for debugging and test diagnostics; the real emitters
//! live in the backend.

use std::fmt;

use super::{Expr, Function, Literal, LoopKind, Stmt, TensorProperty};

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(v) => write!(f, "{}", v),
            Literal::Int(v) => write!(f, "{}", v),
            Literal::Float(v) => write!(f, "{:?}", v),
        }
    }
}

impl fmt::Display for TensorProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorProperty::Dimension(l) => write!(f, "dim{}", l + 1),
            TensorProperty::Pos(l) => write!(f, "pos{}", l + 1),
            TensorProperty::Idx(l) => write!(f, "idx{}", l + 1),
            TensorProperty::Values => write!(f, "vals"),
            TensorProperty::ValuesSize => write!(f, "vals_size"),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var { name, .. } => write!(f, "{}", name),
            Expr::Literal(lit) => write!(f, "{}", lit),
            Expr::Load { array, index } => write!(f, "{}[{}]", array, index),
            Expr::GetProperty { tensor, property } => write!(f, "{}.{}", tensor, property),
            Expr::Neg(e) => write!(f, "-({})", e),
            Expr::Sqrt(e) => write!(f, "sqrt({})", e),
            Expr::Add(l, r) => write!(f, "({} + {})", l, r),
            Expr::Sub(l, r) => write!(f, "({} - {})", l, r),
            Expr::Mul(l, r) => write!(f, "({} * {})", l, r),
            Expr::Div(l, r) => write!(f, "({} / {})", l, r),
            Expr::Eq(l, r) => write!(f, "({} == {})", l, r),
            Expr::Neq(l, r) => write!(f, "({} != {})", l, r),
            Expr::Lt(l, r) => write!(f, "({} < {})", l, r),
            Expr::Lte(l, r) => write!(f, "({} <= {})", l, r),
            Expr::And(l, r) => write!(f, "({} && {})", l, r),
            Expr::Or(l, r) => write!(f, "({} || {})", l, r),
            Expr::BitAnd(l, r) => write!(f, "({} & {})", l, r),
            Expr::Cast { expr, .. } => write!(f, "(int)({})", expr),
        }
    }
}

fn indent(f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    write!(f, "{:width$}", "", width = depth * 2)
}

fn fmt_stmt(stmt: &Stmt, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    match stmt {
        Stmt::Store {
            array,
            index,
            value,
        } => {
            indent(f, depth)?;
            writeln!(f, "{}[{}] = {};", array, index, value)
        }
        Stmt::VarAssign { var, value, decl } => {
            indent(f, depth)?;
            if *decl {
                writeln!(f, "let {} = {};", var, value)
            } else {
                writeln!(f, "{} = {};", var, value)
            }
        }
        Stmt::For {
            var,
            start,
            end,
            body,
            kind,
            ..
        } => {
            indent(f, depth)?;
            let sched = match kind {
                LoopKind::Serial => "",
                LoopKind::Static => " /* parallel static */",
                LoopKind::Dynamic => " /* parallel dynamic */",
            };
            writeln!(f, "for ({} in {}..{}){} {{", var, start, end, sched)?;
            fmt_stmt(body, f, depth + 1)?;
            indent(f, depth)?;
            writeln!(f, "}}")
        }
        Stmt::While { cond, body } => {
            indent(f, depth)?;
            writeln!(f, "while ({}) {{", cond)?;
            fmt_stmt(body, f, depth + 1)?;
            indent(f, depth)?;
            writeln!(f, "}}")
        }
        Stmt::IfThenElse {
            cond,
            then_body,
            else_body,
        } => {
            indent(f, depth)?;
            writeln!(f, "if ({}) {{", cond)?;
            fmt_stmt(then_body, f, depth + 1)?;
            indent(f, depth)?;
            match else_body {
                Some(else_body) => {
                    writeln!(f, "}} else {{")?;
                    fmt_stmt(else_body, f, depth + 1)?;
                    indent(f, depth)?;
                    writeln!(f, "}}")
                }
                None => writeln!(f, "}}"),
            }
        }
        Stmt::Case { clauses, .. } => {
            for (i, (guard, body)) in clauses.iter().enumerate() {
                indent(f, depth)?;
                if i == 0 {
                    writeln!(f, "if ({}) {{", guard)?;
                } else if guard.is_literal_true() && i == clauses.len() - 1 {
                    writeln!(f, "else {{")?;
                } else {
                    writeln!(f, "else if ({}) {{", guard)?;
                }
                fmt_stmt(body, f, depth + 1)?;
                indent(f, depth)?;
                writeln!(f, "}}")?;
            }
            Ok(())
        }
        Stmt::Switch { control, cases } => {
            indent(f, depth)?;
            writeln!(f, "switch ({}) {{", control)?;
            for (pattern, body) in cases {
                indent(f, depth + 1)?;
                writeln!(f, "case {}:", pattern)?;
                fmt_stmt(body, f, depth + 2)?;
            }
            indent(f, depth)?;
            writeln!(f, "}}")
        }
        Stmt::Block(stmts) => {
            for s in stmts {
                fmt_stmt(s, f, depth)?;
            }
            Ok(())
        }
        Stmt::Allocate {
            array,
            size,
            realloc,
        } => {
            indent(f, depth)?;
            if *realloc {
                writeln!(f, "{} = realloc({});", array, size)
            } else {
                writeln!(f, "{} = alloc({});", array, size)
            }
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_stmt(self, f, 0)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .results
            .iter()
            .chain(self.arguments.iter())
            .map(|p| p.to_string())
            .collect();
        writeln!(f, "fn {}({}) {{", self.name, params.join(", "))?;
        fmt_stmt(&self.body, f, 1)?;
        writeln!(f, "}}")
    }
}
