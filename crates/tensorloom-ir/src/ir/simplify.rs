//! Algebraic simplification of IR expressions.
//!
//! Used by the lowering engine to fold the index arithmetic it builds up
//! (`0 * n + i` becomes `i`); not a general optimizer.

use super::{Expr, Literal};

/// Bottom-up constant folding and identity elimination.
pub fn simplify(expr: &Expr) -> Expr {
    match expr {
        Expr::Var { .. } | Expr::Literal(_) | Expr::GetProperty { .. } => expr.clone(),
        Expr::Load { array, index } => Expr::load(simplify(array), simplify(index)),
        Expr::Neg(e) => match simplify(e) {
            Expr::Literal(Literal::Int(v)) => Expr::int(-v),
            Expr::Literal(Literal::Float(v)) => Expr::float(-v),
            e => Expr::neg(e),
        },
        Expr::Sqrt(e) => Expr::sqrt(simplify(e)),
        Expr::Add(l, r) => match (simplify(l), simplify(r)) {
            (Expr::Literal(Literal::Int(a)), Expr::Literal(Literal::Int(b))) => Expr::int(a + b),
            (Expr::Literal(Literal::Int(0)), e) | (e, Expr::Literal(Literal::Int(0))) => e,
            (l, r) => Expr::add(l, r),
        },
        Expr::Sub(l, r) => match (simplify(l), simplify(r)) {
            (Expr::Literal(Literal::Int(a)), Expr::Literal(Literal::Int(b))) => Expr::int(a - b),
            (e, Expr::Literal(Literal::Int(0))) => e,
            (l, r) => Expr::sub(l, r),
        },
        Expr::Mul(l, r) => match (simplify(l), simplify(r)) {
            (Expr::Literal(Literal::Int(a)), Expr::Literal(Literal::Int(b))) => Expr::int(a * b),
            (Expr::Literal(Literal::Int(0)), _) | (_, Expr::Literal(Literal::Int(0))) => {
                Expr::int(0)
            }
            (Expr::Literal(Literal::Int(1)), e) | (e, Expr::Literal(Literal::Int(1))) => e,
            (l, r) => Expr::mul(l, r),
        },
        Expr::Div(l, r) => match (simplify(l), simplify(r)) {
            (e, Expr::Literal(Literal::Int(1))) => e,
            (l, r) => Expr::div(l, r),
        },
        Expr::Eq(l, r) => Expr::eq(simplify(l), simplify(r)),
        Expr::Neq(l, r) => Expr::neq(simplify(l), simplify(r)),
        Expr::Lt(l, r) => Expr::lt(simplify(l), simplify(r)),
        Expr::Lte(l, r) => Expr::lte(simplify(l), simplify(r)),
        Expr::And(l, r) => match (simplify(l), simplify(r)) {
            (Expr::Literal(Literal::Bool(true)), e) | (e, Expr::Literal(Literal::Bool(true))) => e,
            (Expr::Literal(Literal::Bool(false)), _) | (_, Expr::Literal(Literal::Bool(false))) => {
                Expr::boolean(false)
            }
            (l, r) => Expr::and(l, r),
        },
        Expr::Or(l, r) => match (simplify(l), simplify(r)) {
            (Expr::Literal(Literal::Bool(false)), e)
            | (e, Expr::Literal(Literal::Bool(false))) => e,
            (Expr::Literal(Literal::Bool(true)), _) | (_, Expr::Literal(Literal::Bool(true))) => {
                Expr::boolean(true)
            }
            (l, r) => Expr::or(l, r),
        },
        Expr::BitAnd(l, r) => match (simplify(l), simplify(r)) {
            (Expr::Literal(Literal::Int(a)), Expr::Literal(Literal::Int(b))) => Expr::int(a & b),
            (l, r) => Expr::bit_and(l, r),
        },
        Expr::Cast { expr, ty } => Expr::cast(simplify(expr), *ty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Type;

    #[test]
    fn folds_locate_arithmetic() {
        // 0 * n + i  ->  i
        let n = Expr::var("n", Type::Int);
        let i = Expr::var("i", Type::Int);
        let located = Expr::add(Expr::mul(Expr::int(0), n), i.clone());
        assert_eq!(simplify(&located), i);
    }

    #[test]
    fn folds_literals() {
        let e = Expr::mul(Expr::int(2), Expr::add(Expr::int(1), Expr::int(3)));
        assert_eq!(simplify(&e), Expr::int(8));
    }

    #[test]
    fn true_conjunct_disappears() {
        let c = Expr::lt(Expr::var("a", Type::Int), Expr::var("b", Type::Int));
        let e = Expr::and(c.clone(), Expr::boolean(true));
        assert_eq!(simplify(&e), c);
    }
}
