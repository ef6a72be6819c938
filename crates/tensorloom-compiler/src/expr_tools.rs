//! Expression analyses used by the lowering engine: available
//! sub-expressions, child projections, and exhaustion pruning.

use std::collections::HashSet;

use tensorloom_ir::{Access, IndexExpr, IndexVar};

/// Whether every access of `expr` only uses variables in `bound`.
fn all_accesses_bound(expr: &IndexExpr, bound: &[IndexVar]) -> bool {
    expr.accesses()
        .iter()
        .all(|a| a.indices().iter().all(|v| bound.contains(v)))
}

/// Whether `expr` contains an access with at least one index variable.
fn has_indexed_access(expr: &IndexExpr) -> bool {
    expr.accesses().iter().any(|a| !a.indices().is_empty())
}

/// The maximal sub-expressions of `expr` whose accessed index variables are
/// all in `bound`.
///
/// Used to hoist work out of inner loops: a returned sub-expression can be
/// evaluated once the `bound` variables' loops have been entered and stored
/// in a scalar temporary. Sub-expressions without any indexed access
/// (literals, scalar temporaries) are not worth a temporary and are skipped.
pub fn available_expressions(expr: &IndexExpr, bound: &[IndexVar]) -> Vec<IndexExpr> {
    let mut out = Vec::new();
    collect_available(expr, bound, &mut out);
    out
}

fn collect_available(expr: &IndexExpr, bound: &[IndexVar], out: &mut Vec<IndexExpr>) {
    if all_accesses_bound(expr, bound) {
        if has_indexed_access(expr) && !out.contains(expr) {
            out.push(expr.clone());
        }
        return;
    }
    match expr {
        IndexExpr::Access(_) | IndexExpr::Literal(_) => {}
        IndexExpr::Neg(e) | IndexExpr::Sqrt(e) => collect_available(e, bound, out),
        IndexExpr::Add(l, r)
        | IndexExpr::Sub(l, r)
        | IndexExpr::Mul(l, r)
        | IndexExpr::Div(l, r) => {
            collect_available(l, bound, out);
            collect_available(r, bound, out);
        }
    }
}

/// Projects `expr` to the portion whose value depends on `vars`.
///
/// Terms of a sum and factors of a product that do not reach `vars` are
/// dropped; outer unary structure is dropped too. The caller reconstructs
/// the surrounding expression by substituting a temporary for the returned
/// sub-expression, so only the parts that must be *reduced under* the
/// `vars` loops are returned. `None` means nothing in `expr` depends on
/// `vars`.
pub fn sub_expr(expr: &IndexExpr, vars: &[IndexVar]) -> Option<IndexExpr> {
    match expr {
        IndexExpr::Access(a) => {
            if a.indices().iter().any(|v| vars.contains(v)) {
                Some(expr.clone())
            } else {
                None
            }
        }
        IndexExpr::Literal(_) => None,
        IndexExpr::Neg(e) | IndexExpr::Sqrt(e) => sub_expr(e, vars),
        IndexExpr::Add(l, r) => join(sub_expr(l, vars), sub_expr(r, vars), IndexExpr::add),
        IndexExpr::Sub(l, r) => join(sub_expr(l, vars), sub_expr(r, vars), IndexExpr::sub),
        IndexExpr::Mul(l, r) => join(sub_expr(l, vars), sub_expr(r, vars), IndexExpr::mul),
        IndexExpr::Div(l, r) => join(sub_expr(l, vars), sub_expr(r, vars), IndexExpr::div),
    }
}

fn join(
    left: Option<IndexExpr>,
    right: Option<IndexExpr>,
    make: fn(IndexExpr, IndexExpr) -> IndexExpr,
) -> Option<IndexExpr> {
    match (left, right) {
        (Some(l), Some(r)) => Some(make(l, r)),
        (Some(l), None) => Some(l),
        (None, Some(r)) => Some(r),
        (None, None) => None,
    }
}

/// Removes exhausted accesses from `expr`, treating them as zero.
///
/// Zero propagates algebraically: an exhausted term of a sum disappears, an
/// exhausted factor annihilates its product. `None` means the whole
/// expression is zero.
pub fn project_exhausted(expr: &IndexExpr, exhausted: &HashSet<Access>) -> Option<IndexExpr> {
    if exhausted.is_empty() {
        return Some(expr.clone());
    }
    match expr {
        IndexExpr::Access(a) => {
            if exhausted.contains(a) {
                None
            } else {
                Some(expr.clone())
            }
        }
        IndexExpr::Literal(_) => Some(expr.clone()),
        IndexExpr::Neg(e) => project_exhausted(e, exhausted).map(IndexExpr::neg),
        IndexExpr::Sqrt(e) => project_exhausted(e, exhausted).map(IndexExpr::sqrt),
        IndexExpr::Add(l, r) => {
            match (
                project_exhausted(l, exhausted),
                project_exhausted(r, exhausted),
            ) {
                (Some(l), Some(r)) => Some(IndexExpr::add(l, r)),
                (Some(l), None) => Some(l),
                (None, Some(r)) => Some(r),
                (None, None) => None,
            }
        }
        IndexExpr::Sub(l, r) => {
            match (
                project_exhausted(l, exhausted),
                project_exhausted(r, exhausted),
            ) {
                (Some(l), Some(r)) => Some(IndexExpr::sub(l, r)),
                (Some(l), None) => Some(l),
                (None, Some(r)) => Some(IndexExpr::neg(r)),
                (None, None) => None,
            }
        }
        IndexExpr::Mul(l, r) => match (
            project_exhausted(l, exhausted),
            project_exhausted(r, exhausted),
        ) {
            (Some(l), Some(r)) => Some(IndexExpr::mul(l, r)),
            _ => None,
        },
        IndexExpr::Div(l, r) => match (
            project_exhausted(l, exhausted),
            project_exhausted(r, exhausted),
        ) {
            (Some(l), Some(r)) => Some(IndexExpr::div(l, r)),
            _ => None,
        },
    }
}
