//! Small IR generators shared by the lowering engine.

use std::collections::HashSet;

use tensorloom_ir::ir::{conjunction, simplify, Expr, Stmt, TensorProperty, Type};
use tensorloom_ir::IndexExpr;

use crate::context::Ctx;
use crate::iterators::{IteratorId, Iterators};
use crate::tensor_path::PathStep;

/// Lowers an index expression whose iterators are all positioned to a
/// scalar IR expression: accesses load from their values arrays, scalar
/// temporaries become their variables.
pub(crate) fn lower_scalar_expr(expr: &IndexExpr, ctx: &Ctx) -> Expr {
    match expr {
        IndexExpr::Access(access) => {
            if let Some(var) = ctx.temporaries.get(access.tensor()) {
                return var.clone();
            }
            let tensor_var = ctx.tensor_vars[access.tensor()].clone();
            let vals = Expr::property(tensor_var, TensorProperty::Values);
            if access.tensor().is_scalar() {
                return Expr::load(vals, Expr::int(0));
            }
            let path = ctx
                .graph
                .path_of_access(access)
                .expect("operand accesses have paths");
            let level = ctx
                .graph
                .path(path)
                .last_level()
                .expect("non-scalar tensors have at least one level");
            let iterator = ctx.iterators.step(PathStep { path, level });
            Expr::load(vals, ctx.iterators[iterator].pos().clone())
        }
        IndexExpr::Literal(v) => Expr::float(*v),
        IndexExpr::Neg(e) => Expr::neg(lower_scalar_expr(e, ctx)),
        IndexExpr::Sqrt(e) => Expr::sqrt(lower_scalar_expr(e, ctx)),
        IndexExpr::Add(l, r) => {
            Expr::add(lower_scalar_expr(l, ctx), lower_scalar_expr(r, ctx))
        }
        IndexExpr::Sub(l, r) => {
            Expr::sub(lower_scalar_expr(l, ctx), lower_scalar_expr(r, ctx))
        }
        IndexExpr::Mul(l, r) => {
            Expr::mul(lower_scalar_expr(l, ctx), lower_scalar_expr(r, ctx))
        }
        IndexExpr::Div(l, r) => {
            Expr::div(lower_scalar_expr(l, ctx), lower_scalar_expr(r, ctx))
        }
    }
}

/// The merged coordinate: the minimum of the range iterators' dereferenced
/// coordinates. A single iterator needs no variable of its own.
pub(crate) fn min_coordinate(
    name: &str,
    range: &[IteratorId],
    ctx: &mut Ctx,
    stmts: &mut Vec<Stmt>,
) -> Expr {
    if range.len() == 1 {
        return ctx.iterators[range[0]].derived_var().clone();
    }
    let idx = Expr::var(ctx.names.fresh(name), Type::Int);
    stmts.push(Stmt::decl(
        idx.clone(),
        ctx.iterators[range[0]].derived_var().clone(),
    ));
    for &it in &range[1..] {
        let derived = ctx.iterators[it].derived_var().clone();
        stmts.push(Stmt::if_then(
            Expr::lt(derived.clone(), idx.clone()),
            Stmt::assign(idx.clone(), derived),
        ));
    }
    idx
}

/// The merged coordinate plus an indicator bitmask: bit `n` is set iff
/// range iterator `n` sits at the minimum.
pub(crate) fn min_with_indicator(
    name: &str,
    range: &[IteratorId],
    ctx: &mut Ctx,
    stmts: &mut Vec<Stmt>,
) -> (Expr, Expr) {
    let idx = min_coordinate(name, range, ctx, stmts);
    let ind = Expr::var(ctx.names.fresh(&format!("{}_ind", name)), Type::Int);
    let mut mask: Option<Expr> = None;
    for (n, &it) in range.iter().enumerate() {
        let at_min = Expr::cast(
            Expr::eq(ctx.iterators[it].derived_var().clone(), idx.clone()),
            Type::Int,
        );
        let term = simplify(&Expr::mul(at_min, Expr::int(1i64 << n)));
        mask = Some(match mask {
            None => term,
            Some(m) => Expr::add(m, term),
        });
    }
    stmts.push(Stmt::decl(ind.clone(), mask.expect("indicator needs iterators")));
    (idx, ind)
}

/// True iff no range iterator is exhausted. Full iterators cannot exhaust
/// early, so only the others are tested; when all are full the first one's
/// bounds stand in.
pub(crate) fn none_exhausted(range: &[IteratorId], iterators: &Iterators) -> Expr {
    let conds: Vec<Expr> = range
        .iter()
        .filter(|&&it| !iterators[it].is_full())
        .map(|&it| {
            Expr::lt(
                iterators[it].iterator_var().clone(),
                iterators[it].end_var().clone(),
            )
        })
        .collect();
    if conds.is_empty() {
        Expr::lt(
            iterators[range[0]].iterator_var().clone(),
            iterators[range[0]].end_var().clone(),
        )
    } else {
        conjunction(conds)
    }
}

/// True iff every listed iterator's coordinate equals `idx`.
pub(crate) fn all_equal_to(list: &[IteratorId], idx: &Expr, iterators: &Iterators) -> Expr {
    conjunction(
        list.iter()
            .map(|&it| Expr::eq(iterators[it].derived_var().clone(), idx.clone()))
            .collect(),
    )
}

/// True iff every guarded iterator in `list` dereferenced validly.
pub(crate) fn all_valid_derefs(
    list: &[IteratorId],
    guarded: &HashSet<IteratorId>,
    iterators: &Iterators,
) -> Expr {
    conjunction(
        list.iter()
            .filter(|it| guarded.contains(it))
            .map(|&it| iterators[it].valid_var().clone())
            .collect(),
    )
}

/// Drops iterators whose coordinate *is* `idx` (the minimum's source);
/// their equality guard would be trivially true.
pub(crate) fn remove_idx_matching(
    idx: &Expr,
    list: &[IteratorId],
    iterators: &Iterators,
) -> Vec<IteratorId> {
    list.iter()
        .copied()
        .filter(|&it| iterators[it].derived_var() != idx)
        .collect()
}

/// Bitmask over `range` positions marking membership in `selected`.
pub(crate) fn indicator_mask(range: &[IteratorId], selected: &[IteratorId]) -> i64 {
    let mut mask = 0i64;
    for (n, it) in range.iter().enumerate() {
        if selected.contains(it) {
            mask |= 1i64 << n;
        }
    }
    mask
}

/// `array[index] += value`.
pub(crate) fn compound_store(array: &Expr, index: &Expr, value: Expr) -> Stmt {
    Stmt::store(
        array.clone(),
        index.clone(),
        Expr::add(Expr::load(array.clone(), index.clone()), value),
    )
}

/// `var += value`.
pub(crate) fn compound_assign(var: &Expr, value: Expr) -> Stmt {
    Stmt::assign(var.clone(), Expr::add(var.clone(), value))
}
