//! The lowering engine: from an index statement to a loop-nest IR function.
//!
//! Lowering walks the iteration graph root to leaf. Each index variable
//! turns into a merge lattice over the operand iterators that range over
//! it; each lattice point becomes one loop whose body selects among the
//! point's sub-lattice cases, computes the residual expression, assembles
//! the result level, and recurses on the variable's children.

pub(crate) mod codegen;

use std::collections::{HashMap, HashSet};

use anyhow::{ensure, Result};
use tensorloom_ir::ir::{
    simplify, Expr, Function, LoopKind, Stmt, TensorProperty, Type,
};
use tensorloom_ir::{replace, Access, Assignment, IndexExpr, IndexVar, TensorVar};

use crate::context::{Ctx, NameGenerator, Property, Target};
use crate::expr_tools;
use crate::iteration_graph::IterationGraph;
use crate::iterators::IteratorId;
use crate::merge_lattice::{exhausted_accesses, MergeLattice};
use crate::tensor_path::{PathId, PathStep};

/// Where an index variable sits relative to the last free variable; decides
/// when temporaries are introduced and when the result is written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ComputeCase {
    /// Emit the last free variable: reduce the remaining variables into a
    /// temporary, then compute and store the expression.
    LastFree,
    /// Above the last free variable: hoist available sub-expressions into
    /// temporaries, then recurse.
    AboveLastFree,
    /// Below the last free variable: recurse on remaining reduction
    /// variables, then fold their temporaries into the running result.
    BelowLastFree,
}

fn compute_case(var: &IndexVar, graph: &IterationGraph) -> ComputeCase {
    if graph.is_last_free_variable(var) {
        ComputeCase::LastFree
    } else if graph.has_free_variable_descendant(var) {
        ComputeCase::AboveLastFree
    } else {
        ComputeCase::BelowLastFree
    }
}

/// A dense result segment must be zero-written when an insert level is
/// merged against a non-full input: gaps in the input would otherwise leave
/// stale values behind.
fn needs_zero_vars(ctx: &Ctx, vars: &[IndexVar]) -> bool {
    for var in vars {
        let Some(step) = ctx.graph.step_at(PathId::Result, var) else {
            continue;
        };
        if !ctx.iterators[ctx.iterators.step(step)].has_insert() {
            continue;
        }
        for (n, path) in ctx.graph.paths().iter().enumerate() {
            if let Some(level) = path.step_of(var) {
                let it = ctx.iterators.step(PathStep {
                    path: PathId::Operand(n),
                    level,
                });
                if !ctx.iterators[it].is_full() {
                    return true;
                }
            }
        }
    }
    false
}

fn needs_zero(ctx: &Ctx) -> bool {
    let vars = ctx.graph.result_path().vars();
    if let Some(last) = vars.last() {
        if ctx.graph.has_reduction_variable_ancestor(last) {
            return true;
        }
    }
    needs_zero_vars(ctx, vars)
}

/// Hoists the sub-expressions of `expr` that only use already-bound
/// variables into scalar temporaries, returning the rewritten expression.
fn emit_available_exprs(
    var: &IndexVar,
    expr: &IndexExpr,
    ctx: &mut Ctx,
    stmts: &mut Vec<Stmt>,
) -> IndexExpr {
    let bound = ctx.graph.ancestors(var);
    let available = expr_tools::available_expressions(expr, &bound);
    let mut substitutions = Vec::new();
    for avail in available {
        let name = ctx.names.fresh(&format!("t{}", var.name()));
        let temp = TensorVar::scalar(&name);
        let temp_var = Expr::var(name, Type::Float);
        ctx.temporaries.insert(temp.clone(), temp_var.clone());
        let value = codegen::lower_scalar_expr(&avail, ctx);
        stmts.push(Stmt::decl(temp_var, value));
        substitutions.push((avail, IndexExpr::access(temp, vec![])));
    }
    replace(expr, &substitutions)
}

/// Stores or accumulates the lowered expression into the target.
fn emit_compute_expr(
    target: &Target,
    var: &IndexVar,
    expr: &IndexExpr,
    ctx: &Ctx,
    stmts: &mut Vec<Stmt>,
    accumulate: bool,
) {
    let value = codegen::lower_scalar_expr(expr, ctx);
    let compound = ctx.graph.has_reduction_variable_ancestor(var) || accumulate;
    match &target.pos {
        Some(pos) => stmts.push(if compound {
            codegen::compound_store(&target.tensor, pos, value)
        } else {
            Stmt::store(target.tensor.clone(), pos.clone(), value)
        }),
        None => stmts.push(if compound {
            codegen::compound_assign(&target.tensor, value)
        } else {
            Stmt::assign(target.tensor.clone(), value)
        }),
    }
}

/// Scheduling for the loop driven by `iterator`: the outermost loop of a
/// pure compute over an insert-only result may go parallel; assembling or
/// reducing keeps everything serial.
fn parallelize(var: &IndexVar, iterator: IteratorId, ctx: &Ctx) -> LoopKind {
    if ctx.graph.ancestors(var).len() != 1
        || ctx.graph.is_reduction(var)
        || ctx.has(Property::Assemble)
    {
        return LoopKind::Serial;
    }
    let result_path_len = ctx.graph.result_path().len();
    for level in 0..result_path_len {
        let step = ctx.iterators.step(PathStep {
            path: PathId::Result,
            level,
        });
        if !ctx.iterators[step].has_insert() {
            return LoopKind::Serial;
        }
    }
    let Some(path) = ctx.iterators.path_of(iterator) else {
        return LoopKind::Serial;
    };
    let len = ctx.graph.path(path).len();
    if len <= 2 {
        return LoopKind::Static;
    }
    let inner_all_full = (1..len).all(|level| {
        ctx.iterators[ctx.iterators.step(PathStep { path, level })].is_full()
    });
    if inner_all_full {
        LoopKind::Static
    } else {
        LoopKind::Dynamic
    }
}

/// Folds guarded cases into a `Case` or `Switch` statement. A case whose
/// guard is statically true becomes the trailing else; two of those mean
/// the lattice was malformed.
fn create_case_stmt(
    cases: Vec<(Expr, Stmt)>,
    always_match: bool,
    switch_control: Option<Expr>,
) -> Result<Stmt> {
    if cases.len() == 1 && cases[0].0.is_literal_true() {
        let (_, body) = cases.into_iter().next().expect("one case");
        return Ok(body);
    }
    let mut if_cases = Vec::new();
    let mut else_case: Option<(Expr, Stmt)> = None;
    for case in cases {
        if case.0.is_literal_true() {
            ensure!(
                else_case.is_none(),
                "merge produced more than one statically-true case"
            );
            else_case = Some(case);
        } else {
            if_cases.push(case);
        }
    }
    if let Some(else_case) = else_case {
        if_cases.push(else_case);
        return Ok(Stmt::Case {
            clauses: if_cases,
            always_match: true,
        });
    }
    Ok(match switch_control {
        Some(control) => Stmt::Switch {
            control,
            cases: if_cases,
        },
        None => Stmt::Case {
            clauses: if_cases,
            always_match,
        },
    })
}

/// Lowers one index variable: builds its merge lattice, emits one loop per
/// lattice point, and recurses on the variable's children within each case.
fn lower_index_var(
    target: &Target,
    var: &IndexVar,
    expr: &IndexExpr,
    exhausted: &HashSet<Access>,
    ctx: &mut Ctx,
) -> Result<Vec<Stmt>> {
    let lattice = MergeLattice::make(expr, var, &ctx.graph, &ctx.iterators, exhausted);
    ensure!(
        !lattice.is_empty(),
        "no operand of the expression iterates {}",
        var.name()
    );
    let range_iterators = lattice.range_iterators().to_vec();

    let result_step = ctx.graph.step_at(PathId::Result, var);
    let result_iterator = result_step.map(|s| ctx.iterators.step(s));
    let result_path_len = ctx.graph.result_path().len();

    let accumulate = ctx.has(Property::Accumulate);
    let emit_compute = ctx.has(Property::Compute);
    let emit_assemble = ctx.has(Property::Assemble);

    // Co-iterating several operands, or deduplicating one with repeated
    // coordinates, needs cursor variables and a while loop.
    let emit_merge =
        range_iterators.len() > 1 || !ctx.iterators[range_iterators[0]].is_unique();

    let mut code: Vec<Stmt> = Vec::new();

    // Position prologue: segment bounds for every range iterator.
    let mut iter_begin = Expr::int(0);
    let mut iter_end = Expr::int(0);
    for &it in &range_iterators {
        let (prelude, begin, end) = if ctx.iterators[it].has_coord_pos_iter() {
            let parent_pos = ctx.iterators.parent_pos(it);
            ctx.iterators[it].pos_iter(&parent_pos)
        } else {
            ctx.iterators[it].coord_iter()
        };
        if let Some(prelude) = prelude {
            code.push(prelude);
        }
        if emit_merge {
            code.push(Stmt::decl(
                ctx.iterators[it].iterator_var().clone(),
                begin.clone(),
            ));
            code.push(Stmt::decl(ctx.iterators[it].end_var().clone(), end.clone()));
        }
        iter_begin = begin;
        iter_end = end;
    }

    // Result assembly prologue.
    if emit_assemble {
        if let (Some(res), Some(step)) = (result_iterator, result_step) {
            if ctx.iterators[res].has_append() && !ctx.iterators[res].is_branchless() {
                code.push(Stmt::decl(
                    ctx.iterators[res].begin_var().clone(),
                    ctx.iterators[res].pos().clone(),
                ));
            }

            let parent = ctx.iterators[res].parent.expect("levels have parents");
            if ctx.iterators[parent].has_append() || step.level == 0 {
                let parent_pos = ctx.iterators.parent_pos(res);
                let mut init_begin = parent_pos.clone();
                let mut init_end = simplify(&Expr::add(parent_pos, Expr::int(1)));

                // Multiply the range through every nested insert level.
                let mut level = step.level;
                let mut cursor = Some(res);
                while let Some(cur) = cursor {
                    if !ctx.iterators[cur].has_insert() {
                        break;
                    }
                    let size = ctx.iterators[cur].size();
                    init_begin = simplify(&Expr::mul(init_begin, size.clone()));
                    init_end = simplify(&Expr::mul(init_end, size));
                    if let Some(stmt) = ctx.iterators[cur].insert_init_coords(&init_begin, &init_end)
                    {
                        code.push(stmt);
                    }
                    cursor = if level + 1 == result_path_len {
                        None
                    } else {
                        level += 1;
                        Some(ctx.iterators.step(PathStep {
                            path: PathId::Result,
                            level,
                        }))
                    };
                }

                match cursor {
                    Some(append_level) => {
                        if let Some(stmt) =
                            ctx.iterators[append_level].append_init_edges(&init_begin, &init_end)
                        {
                            code.push(stmt);
                        }
                    }
                    None if emit_compute && step.level != 0 => {
                        // The values array tracks the positions the insert
                        // levels fan out to: grow it geometrically and
                        // zero-write the fresh segment where gaps could
                        // survive.
                        let capacity = ctx.values_capacity();
                        let new_capacity = Expr::mul(Expr::int(2), init_end.clone());
                        let grow = Stmt::block(vec![
                            Stmt::realloc(target.tensor.clone(), new_capacity.clone()),
                            Stmt::assign(capacity.clone(), new_capacity),
                        ]);
                        code.push(Stmt::if_then(
                            Expr::lte(capacity, init_end.clone()),
                            grow,
                        ));

                        let result_vars = ctx.graph.result_path().vars().to_vec();
                        let from = result_vars
                            .iter()
                            .position(|v| v == var)
                            .expect("free variables lie on the result path");
                        if needs_zero_vars(ctx, &result_vars[from..]) {
                            let base = format!("p{}", tensor_name(ctx, res));
                            let loop_var = Expr::var(ctx.names.fresh(&base), Type::Int);
                            code.push(Stmt::for_range(
                                loop_var.clone(),
                                init_begin.clone(),
                                init_end.clone(),
                                Stmt::store(target.tensor.clone(), loop_var, Expr::float(0.0)),
                            ));
                        }
                    }
                    None => {}
                }
            }
        }
    }

    // One loop per lattice point.
    let mut loops: Vec<Stmt> = Vec::new();
    for point in 0..lattice.len() {
        let lp_lattice = lattice.sub_lattice(point);
        let lp = &lattice.points()[point];
        let lp_range = lp.range_iterators().to_vec();
        let lp_locate = lp.locate_iterators();

        let mut loop_body: Vec<Stmt> = Vec::new();
        let mut guarded: HashSet<IteratorId> = HashSet::new();

        // Dereference the coordinate of every range iterator.
        for &it in &lp_range {
            let (prelude, deref, valid) = if ctx.iterators[it].has_coord_pos_iter() {
                let pos = ctx.iterators[it].pos().clone();
                ctx.iterators[it].pos_access(&pos)
            } else {
                let cursor = ctx.iterators[it].iterator_var().clone();
                ctx.iterators[it].coord_access(&cursor)
            };
            if let Some(prelude) = prelude {
                loop_body.push(prelude);
            }
            loop_body.push(Stmt::decl(
                ctx.iterators[it].derived_var().clone(),
                simplify(&deref),
            ));
            if !valid.is_literal_true() {
                loop_body.push(Stmt::decl(ctx.iterators[it].valid_var().clone(), valid));
                guarded.insert(it);
            }
        }

        let mut merge_code: Vec<Stmt> = Vec::new();

        // A perfect 2^k - 1 cover over enough iterators merges through a
        // switch on the minimum's indicator bitmask instead of an if-chain.
        let merge_with_switch = lp_range.len() > 2
            && lp_range.len() < 64
            && lp_lattice.len() == (1usize << lp_range.len()) - 1;

        let (idx, indicator) = if merge_with_switch {
            let (idx, ind) =
                codegen::min_with_indicator(var.name(), &lp_range, ctx, &mut merge_code);
            (idx, Some(ind))
        } else {
            (
                codegen::min_coordinate(var.name(), &lp_range, ctx, &mut merge_code),
                None,
            )
        };

        // Bind the merged coordinate to every iterator of the point.
        for &it in lp.iterators() {
            ctx.idx_vars.insert(it, idx.clone());
        }
        if let Some(res) = result_iterator {
            ctx.idx_vars.insert(res, idx.clone());
        }

        // Position the random-access iterators: the point's locate
        // iterators, coord-val range iterators (their position feeds child
        // levels and value loads), and an insert result level.
        let mut locate_list: Vec<IteratorId> = lp_locate.clone();
        for &it in &lp_range {
            if ctx.iterators[it].has_coord_val_iter() {
                locate_list.push(it);
            }
        }
        if let Some(res) = result_iterator {
            if ctx.iterators[res].has_insert() {
                locate_list.push(res);
            }
        }
        for &it in &locate_list {
            let parent_pos = ctx.iterators.parent_pos(it);
            let (prelude, pos, valid) = ctx.iterators[it].locate(&parent_pos, &idx);
            if let Some(prelude) = prelude {
                merge_code.push(prelude);
            }
            merge_code.push(Stmt::decl(ctx.iterators[it].pos().clone(), simplify(&pos)));
            if !valid.is_literal_true() && Some(it) != result_iterator {
                merge_code.push(Stmt::decl(ctx.iterators[it].valid_var().clone(), valid));
                guarded.insert(it);
            }
        }

        // Segment ends for deduplicating non-unique coord-pos iterators.
        for &it in &lp_range {
            if ctx.iterators[it].has_coord_pos_iter() && !ctx.iterators[it].is_unique() {
                merge_code.push(Stmt::decl(
                    ctx.iterators[it].segend_var().clone(),
                    Expr::add(ctx.iterators[it].pos().clone(), Expr::int(1)),
                ));
            }
        }

        // Growing the values array while appending at the innermost level.
        let maybe_resize = match result_iterator {
            Some(res)
                if emit_compute
                    && emit_assemble
                    && ctx.iterators[res].has_append()
                    && result_step.map(|s| s.level) == Some(result_path_len - 1) =>
            {
                let capacity = ctx.values_capacity();
                let new_end = Expr::add(ctx.iterators[res].pos().clone(), Expr::int(1));
                let new_capacity = Expr::mul(Expr::int(2), new_end.clone());
                let grow = Stmt::block(vec![
                    Stmt::realloc(target.tensor.clone(), new_capacity.clone()),
                    Stmt::assign(capacity.clone(), new_capacity),
                ]);
                Some(Stmt::if_then(Expr::lte(capacity, new_end), grow))
            }
            _ => None,
        };
        if let Some(resize) = &maybe_resize {
            if lp_lattice.len() > 1 {
                merge_code.push(resize.clone());
            }
        }

        // One case per point of the sub-lattice.
        let mut cases: Vec<(Expr, Stmt)> = Vec::new();
        for sub in 0..lp_lattice.len() {
            let lq = lp_lattice.points()[sub].clone();
            let lq_range = lq.range_iterators().to_vec();
            let lq_locate = lq.locate_iterators();
            let mut lq_expr = lq.expr().clone();

            let mut case_exhausted = exhausted.clone();
            case_exhausted.extend(exhausted_accesses(&lq, &lattice));

            let mut case_body: Vec<Stmt> = Vec::new();
            if let Some(resize) = &maybe_resize {
                if lp_lattice.len() == 1 {
                    case_body.push(resize.clone());
                }
            }

            let ivar_case = compute_case(var, &ctx.graph);

            if emit_compute && ivar_case == ComputeCase::AboveLastFree {
                lq_expr = emit_available_exprs(var, &lq_expr, ctx, &mut case_body);
            }

            // Recurse on the children; at and below the last free variable
            // each child's share of the expression reduces into a scalar
            // temporary first.
            let children: Vec<IndexVar> = ctx.graph.children(var).to_vec();
            let single_child = children.len() == 1;
            let mut child_vars: Vec<IndexExpr> = Vec::new();
            for child in &children {
                let mut child_expr = lq_expr.clone();
                let mut child_target = target.clone();
                if ivar_case != ComputeCase::AboveLastFree {
                    let descendants = ctx.graph.descendants(child);
                    match expr_tools::sub_expr(&lq_expr, &descendants) {
                        // Nothing on the next level for this case.
                        None => continue,
                        Some(sub_expr) => child_expr = sub_expr,
                    }
                    let name = ctx.names.fresh(&format!("t{}", child.name()));
                    let temp = TensorVar::scalar(&name);
                    let temp_var = Expr::var(name, Type::Float);
                    ctx.temporaries.insert(temp.clone(), temp_var.clone());
                    child_target = Target {
                        tensor: temp_var.clone(),
                        pos: None,
                    };
                    if emit_compute {
                        case_body.push(Stmt::decl(temp_var, Expr::float(0.0)));
                    }
                    let temp_access = IndexExpr::access(temp, vec![]);
                    lq_expr = replace(&lq_expr, &[(child_expr.clone(), temp_access.clone())]);
                    if !single_child {
                        child_vars.push(temp_access);
                    }
                }
                let child_code =
                    lower_index_var(&child_target, child, &child_expr, &case_exhausted, ctx)?;
                case_body.extend(child_code);
            }

            if emit_compute && ivar_case != ComputeCase::AboveLastFree {
                let compute_expr = if single_child {
                    lq_expr.clone()
                } else {
                    // Multiply the bound factors with the children's
                    // reductions.
                    let bound = ctx.graph.ancestors(var);
                    let mut factors = expr_tools::available_expressions(&lq_expr, &bound);
                    factors.extend(child_vars.iter().cloned());
                    ensure!(
                        !factors.is_empty(),
                        "nothing to compute at {}",
                        var.name()
                    );
                    let mut factors = factors.into_iter();
                    let first = factors.next().expect("checked non-empty");
                    factors.fold(first, IndexExpr::mul)
                };
                emit_compute_expr(target, var, &compute_expr, ctx, &mut case_body, accumulate);
            }

            // Result assembly: append the merged coordinate, bump the write
            // position, and collapse assembly through branchless ancestors.
            if let Some(res) = result_iterator {
                let next_result_iterator = if ivar_case == ComputeCase::LastFree {
                    None
                } else {
                    result_step.map(|s| {
                        ctx.iterators.step(PathStep {
                            path: PathId::Result,
                            level: s.level + 1,
                        })
                    })
                };
                let next_is_branchless =
                    next_result_iterator.is_some_and(|n| ctx.iterators[n].is_branchless());
                if !next_is_branchless {
                    let res_pos = ctx.iterators[res].pos().clone();
                    let mut assembly: Vec<Stmt> = Vec::new();

                    if emit_assemble {
                        let stmt = if ctx.iterators[res].has_append() {
                            ctx.iterators[res].append_coord(&res_pos, &idx)
                        } else {
                            ctx.iterators[res].insert_coord(&res_pos, &idx)
                        };
                        if let Some(stmt) = stmt {
                            assembly.push(stmt);
                        }
                    }

                    if ctx.iterators[res].has_append()
                        && (emit_assemble || ivar_case == ComputeCase::LastFree)
                    {
                        assembly.push(Stmt::assign(
                            res_pos.clone(),
                            Expr::add(res_pos.clone(), Expr::int(1)),
                        ));
                    }

                    let mut walk = res;
                    while ctx.iterators[walk].is_branchless() {
                        if emit_assemble && ctx.iterators[walk].has_append() {
                            let pos = ctx.iterators[walk].pos().clone();
                            let parent_pos = ctx.iterators.parent_pos(walk);
                            let begin = simplify(&Expr::sub(pos.clone(), Expr::int(1)));
                            if let Some(stmt) =
                                ctx.iterators[walk].append_edges(&parent_pos, &begin, &pos)
                            {
                                assembly.push(stmt);
                            }
                        }
                        walk = match ctx.iterators[walk].parent {
                            Some(parent) if !ctx.iterators[parent].is_root() => parent,
                            _ => break,
                        };
                        if emit_assemble && ctx.iterators[walk].has_append() {
                            let pos = ctx.iterators[walk].pos().clone();
                            let coord = ctx.idx_vars[&walk].clone();
                            if let Some(stmt) = ctx.iterators[walk].append_coord(&pos, &coord) {
                                assembly.push(stmt);
                            }
                        }
                        if ctx.iterators[walk].has_append() {
                            let pos = ctx.iterators[walk].pos().clone();
                            assembly.push(Stmt::assign(
                                pos.clone(),
                                Expr::add(pos.clone(), Expr::int(1)),
                            ));
                            let begin = simplify(&Expr::sub(pos.clone(), Expr::int(1)));
                            if let Some(stmt) =
                                ctx.iterators[walk].append_init_edges(&begin, &pos)
                            {
                                assembly.push(stmt);
                            }
                        }
                    }

                    if !assembly.is_empty() {
                        let mut block = Stmt::block(assembly);
                        if let Some(next) = next_result_iterator {
                            if ctx.iterators[next].has_append() {
                                // Only a child segment that actually grew
                                // gets an entry at this level.
                                block = Stmt::if_then(
                                    Expr::lt(
                                        ctx.iterators[next].begin_var().clone(),
                                        ctx.iterators[next].pos().clone(),
                                    ),
                                    block,
                                );
                            }
                        }
                        case_body.push(block);
                    }
                }
            }

            let case_iterators = codegen::remove_idx_matching(&idx, &lq_range, &ctx.iterators);
            let guard = match &indicator {
                Some(_) => Expr::int(codegen::indicator_mask(&lp_range, &case_iterators)),
                None => {
                    let all_equal = codegen::all_equal_to(&case_iterators, &idx, &ctx.iterators);
                    let all_valid =
                        codegen::all_valid_derefs(&lq_locate, &guarded, &ctx.iterators);
                    simplify(&Expr::and(all_equal, all_valid))
                }
            };
            cases.push((guard, Stmt::block(case_body)));
        }
        merge_code.push(create_case_stmt(
            cases,
            lp_lattice.is_full(&ctx.iterators),
            indicator.clone(),
        )?);

        // Advance the cursors that produced the minimum.
        if emit_merge {
            match &indicator {
                Some(ind) => {
                    for (n, &it) in lp_range.iter().enumerate() {
                        let cursor = ctx.iterators[it].iterator_var().clone();
                        let advanced = Expr::cast(
                            Expr::neq(
                                Expr::bit_and(ind.clone(), Expr::int(1i64 << n)),
                                Expr::int(0),
                            ),
                            Type::Int,
                        );
                        merge_code.push(Stmt::assign(
                            cursor.clone(),
                            Expr::add(cursor, advanced),
                        ));
                    }
                }
                None => {
                    for &it in &lp_range {
                        let cursor = ctx.iterators[it].iterator_var().clone();
                        let derived = ctx.iterators[it].derived_var().clone();
                        let advanced = if derived == idx || ctx.iterators[it].is_full() {
                            Expr::int(1)
                        } else {
                            Expr::cast(Expr::eq(derived, idx.clone()), Type::Int)
                        };
                        merge_code.push(Stmt::assign(
                            cursor.clone(),
                            Expr::add(cursor, advanced),
                        ));
                    }
                }
            }
        }

        loop_body.extend(merge_code);
        let body = Stmt::block(loop_body);
        let merge_loop = if emit_merge {
            Stmt::while_loop(codegen::none_exhausted(&lp_range, &ctx.iterators), body)
        } else {
            let it = lp_range[0];
            let kind = parallelize(var, it, ctx);
            Stmt::for_range_kind(
                ctx.iterators[it].iterator_var().clone(),
                iter_begin.clone(),
                iter_end.clone(),
                body,
                kind,
            )
        };
        loops.push(merge_loop);
    }
    code.extend(loops);

    // Record this level's segment of the result index.
    if emit_assemble {
        if let Some(res) = result_iterator {
            if ctx.iterators[res].has_append() && !ctx.iterators[res].is_branchless() {
                let parent_pos = ctx.iterators.parent_pos(res);
                if let Some(stmt) = ctx.iterators[res].append_edges(
                    &parent_pos,
                    ctx.iterators[res].begin_var(),
                    ctx.iterators[res].pos(),
                ) {
                    code.push(stmt);
                }
            }
        }
    }

    Ok(code)
}

fn tensor_name(ctx: &Ctx, iterator: IteratorId) -> String {
    ctx.iterators[iterator]
        .tensor()
        .var_name()
        .unwrap_or("t")
        .to_string()
}

/// Checks that an assignment is in the concrete form the engine lowers.
pub fn is_lowerable(assignment: &Assignment) -> Result<()> {
    assignment.lhs().validate()?;
    for kind in assignment.result().format().levels() {
        ensure!(kind.is_supported(), "unsupported level kind {:?}", kind);
    }
    let rhs_vars = assignment.rhs().index_vars();
    for access in assignment.rhs().accesses() {
        access.validate()?;
        for kind in access.tensor().format().levels() {
            ensure!(kind.is_supported(), "unsupported level kind {:?}", kind);
        }
    }
    for var in assignment.free_vars() {
        ensure!(
            rhs_vars.contains(var),
            "the statement is not in concrete form: {} does not appear on the right-hand side",
            var.name()
        );
    }
    Ok(())
}

/// Lowers an index statement to a single IR function
/// `fn <name>(results…, operands…)`.
///
/// `properties` selects assembly and/or compute; `alloc_size` seeds the
/// result's values capacity when no sparse level sizes it.
pub fn lower(
    assignment: &Assignment,
    name: &str,
    properties: &[Property],
    alloc_size: i64,
) -> Result<Function> {
    is_lowerable(assignment)?;

    let mut properties: HashSet<Property> = properties.iter().copied().collect();
    let emit_assemble = properties.contains(&Property::Assemble);
    let emit_compute = properties.contains(&Property::Compute);
    ensure!(
        emit_assemble || emit_compute,
        "lowering must assemble, compute, or both"
    );
    if assignment.is_accumulate() {
        properties.insert(Property::Accumulate);
    }

    let graph = IterationGraph::make(assignment)?;

    // Tensor parameters: the result first, then operands in order of
    // appearance.
    let mut names = NameGenerator::new();
    let mut tensor_vars: HashMap<TensorVar, Expr> = HashMap::new();
    let result_tensor = assignment.result().clone();
    let result_var = Expr::var(names.fresh(result_tensor.name()), Type::Int);
    tensor_vars.insert(result_tensor.clone(), result_var.clone());
    let results = vec![result_var.clone()];
    let mut arguments = Vec::new();
    for path in graph.paths() {
        let tensor = path.tensor().clone();
        if !tensor_vars.contains_key(&tensor) {
            let var = Expr::var(names.fresh(tensor.name()), Type::Int);
            arguments.push(var.clone());
            tensor_vars.insert(tensor, var);
        }
    }

    let mut ctx = Ctx::new(graph, properties, tensor_vars, alloc_size, names);

    let mut init: Vec<Stmt> = Vec::new();
    let mut body: Vec<Stmt> = Vec::new();
    let mut finalize: Vec<Stmt> = Vec::new();

    let roots = ctx.graph.roots().to_vec();
    let result_path_len = ctx.graph.result_path().len();

    if !roots.is_empty() {
        let result_iterator = if result_path_len > 0 {
            ctx.iterators.step(PathStep {
                path: PathId::Result,
                level: result_path_len - 1,
            })
        } else {
            // Scalar results reduce into position zero of their values.
            ctx.iterators.root(PathId::Result)
        };
        let target = Target {
            tensor: Expr::property(result_var.clone(), TensorProperty::Values),
            pos: Some(ctx.iterators[result_iterator].pos().clone()),
        };

        // Initialize the result levels and their write positions.
        let mut prev_size = Expr::int(1);
        for level in 0..result_path_len {
            let it = ctx.iterators.step(PathStep {
                path: PathId::Result,
                level,
            });
            let size = if ctx.iterators[it].has_append() {
                Expr::int(0)
            } else {
                simplify(&Expr::mul(prev_size.clone(), ctx.iterators[it].size()))
            };
            if emit_assemble {
                let stmt = if ctx.iterators[it].has_append() {
                    ctx.iterators[it].append_init_level(&prev_size, &size)
                } else {
                    ctx.iterators[it].insert_init_level(&prev_size, &size)
                };
                if let Some(stmt) = stmt {
                    init.push(stmt);
                }
            }
            if ctx.iterators[it].has_append()
                && (emit_assemble || level == result_path_len - 1)
            {
                body.push(Stmt::decl(ctx.iterators[it].pos().clone(), Expr::int(0)));
            }
            prev_size = size;
        }

        if emit_compute {
            let vals_size = Expr::property(result_var.clone(), TensorProperty::ValuesSize);
            let size = match prev_size.as_int_literal() {
                Some(0) => {
                    if emit_assemble {
                        Expr::int(alloc_size)
                    } else {
                        vals_size
                    }
                }
                _ => prev_size.clone(),
            };

            if emit_assemble {
                let capacity = Expr::var(
                    ctx.names.fresh(&format!("{}_vals_capacity", result_tensor.name())),
                    Type::Int,
                );
                ctx.vals_capacity = Some(capacity.clone());
                init.push(Stmt::decl(capacity, size.clone()));
                init.push(Stmt::alloc(target.tensor.clone(), size.clone()));
            }

            // Zero the result values when gaps or scattered compound
            // stores could otherwise observe stale data.
            if !ctx.has(Property::Accumulate) {
                if result_path_len == 0 {
                    body.push(Stmt::store(
                        target.tensor.clone(),
                        Expr::int(0),
                        Expr::float(0.0),
                    ));
                } else if ctx.iterators[result_iterator].has_insert()
                    && needs_zero(&ctx)
                    && size.as_int_literal() != Some(alloc_size)
                {
                    let loop_var = Expr::var(
                        ctx.names.fresh(&format!("p{}", result_tensor.name())),
                        Type::Int,
                    );
                    body.push(Stmt::for_range(
                        loop_var.clone(),
                        Expr::int(0),
                        size.clone(),
                        Stmt::store(target.tensor.clone(), loop_var, Expr::float(0.0)),
                    ));
                }
            }
        }

        for root in &roots {
            let loop_nest =
                lower_index_var(&target, root, assignment.rhs(), &HashSet::new(), &mut ctx)?;
            body.extend(loop_nest);
        }

        if emit_assemble {
            let mut prev_size = Expr::int(1);
            for level in 0..result_path_len {
                let it = ctx.iterators.step(PathStep {
                    path: PathId::Result,
                    level,
                });
                let size = if ctx.iterators[it].has_append() {
                    ctx.iterators[it].pos().clone()
                } else {
                    simplify(&Expr::mul(prev_size.clone(), ctx.iterators[it].size()))
                };
                let stmt = if ctx.iterators[it].has_append() {
                    ctx.iterators[it].append_finalize_level(&prev_size, &size)
                } else {
                    ctx.iterators[it].insert_finalize_level(&prev_size, &size)
                };
                if let Some(stmt) = stmt {
                    finalize.push(stmt);
                }
                prev_size = size;
            }

            // Deferred values allocation: with no compute the exact size is
            // only known after assembly.
            if !emit_compute {
                let vals_size =
                    Expr::property(result_var.clone(), TensorProperty::ValuesSize);
                finalize.push(Stmt::alloc(target.tensor.clone(), prev_size.clone()));
                finalize.push(Stmt::assign(vals_size, prev_size));
            }
        }
    } else {
        // Pure scalar statement, no index variables at all.
        let vals = Expr::property(result_var.clone(), TensorProperty::Values);
        if emit_assemble {
            init.push(Stmt::alloc(vals.clone(), Expr::int(1)));
        }
        if emit_compute {
            let value = codegen::lower_scalar_expr(assignment.rhs(), &ctx);
            body.push(Stmt::store(vals, Expr::int(0), value));
        }
    }

    let mut stmts = init;
    stmts.extend(body);
    stmts.extend(finalize);
    Ok(Function {
        name: name.to_string(),
        results,
        arguments,
        body: Stmt::block(stmts),
    })
}
