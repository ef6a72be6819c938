//! Structural rewriting of index expressions.

use crate::expr::IndexExpr;

/// Replaces every occurrence of a substitution key with its value.
///
/// Matching is structural and outside-in: when a node equals a key, the
/// replacement is taken whole and its subtree is not searched further.
///
/// # Examples
///
/// ```
/// use tensorloom_ir::{replace, Format, IndexExpr, IndexVar, TensorVar};
///
/// let i = IndexVar::new("i");
/// let b = IndexExpr::access(TensorVar::new("b", Format::dense(1)), vec![i.clone()]);
/// let c = IndexExpr::access(TensorVar::new("c", Format::dense(1)), vec![i]);
/// let t = IndexExpr::access(TensorVar::scalar("t"), vec![]);
///
/// let sum = IndexExpr::add(b.clone(), c.clone());
/// let rewritten = replace(&sum, &[(b, t.clone())]);
/// assert_eq!(rewritten, IndexExpr::add(t, c));
/// ```
pub fn replace(expr: &IndexExpr, substitutions: &[(IndexExpr, IndexExpr)]) -> IndexExpr {
    if let Some((_, to)) = substitutions.iter().find(|(from, _)| from == expr) {
        return to.clone();
    }
    match expr {
        IndexExpr::Access(_) | IndexExpr::Literal(_) => expr.clone(),
        IndexExpr::Neg(e) => IndexExpr::neg(replace(e, substitutions)),
        IndexExpr::Sqrt(e) => IndexExpr::sqrt(replace(e, substitutions)),
        IndexExpr::Add(l, r) => {
            IndexExpr::add(replace(l, substitutions), replace(r, substitutions))
        }
        IndexExpr::Sub(l, r) => {
            IndexExpr::sub(replace(l, substitutions), replace(r, substitutions))
        }
        IndexExpr::Mul(l, r) => {
            IndexExpr::mul(replace(l, substitutions), replace(r, substitutions))
        }
        IndexExpr::Div(l, r) => {
            IndexExpr::div(replace(l, substitutions), replace(r, substitutions))
        }
    }
}
