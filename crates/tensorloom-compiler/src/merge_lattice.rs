//! Merge lattices: the iteration cases that cover one index variable.
//!
//! A lattice point names the operand iterators that must be co-iterated
//! (its *range* iterators), the iterators reached by random access at the
//! merged coordinate (*locate* iterators), and the residual expression that
//! is live when exactly that operand subset is present. Points are ordered
//! widest first; the loop emitted for a point finishes the iteration space
//! its successors no longer cover.

use std::collections::{BTreeSet, HashSet};

use tensorloom_ir::{Access, IndexExpr, IndexVar};

use crate::iteration_graph::IterationGraph;
use crate::iterators::{IteratorId, Iterators};

/// One lattice point: an operand subset plus its residual expression.
#[derive(Clone, Debug, PartialEq)]
pub struct MergePoint {
    iterators: Vec<IteratorId>,
    range: Vec<IteratorId>,
    expr: IndexExpr,
}

impl MergePoint {
    fn singleton(iterator: IteratorId, expr: IndexExpr) -> Self {
        MergePoint {
            iterators: vec![iterator],
            range: vec![iterator],
            expr,
        }
    }

    /// Every iterator of the point, range and locate alike.
    pub fn iterators(&self) -> &[IteratorId] {
        &self.iterators
    }

    /// The iterators whose advancement drives the loop.
    pub fn range_iterators(&self) -> &[IteratorId] {
        &self.range
    }

    /// The iterators accessed by `locate` at the merged coordinate.
    pub fn locate_iterators(&self) -> Vec<IteratorId> {
        self.iterators
            .iter()
            .copied()
            .filter(|it| !self.range.contains(it))
            .collect()
    }

    /// The residual expression valid when this point is selected.
    pub fn expr(&self) -> &IndexExpr {
        &self.expr
    }

    fn range_set(&self) -> BTreeSet<IteratorId> {
        self.range.iter().copied().collect()
    }

    fn map_expr(mut self, f: impl FnOnce(IndexExpr) -> IndexExpr) -> Self {
        self.expr = f(self.expr);
        self
    }
}

/// The merge lattice of one `(index variable, expression)` pair.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergeLattice {
    points: Vec<MergePoint>,
}

impl MergeLattice {
    /// Builds the lattice for `var` over `expr`.
    ///
    /// Accesses in `exhausted` are known to produce no further nonzeros;
    /// they are projected out of the expression (as zeros) before the
    /// lattice is derived, so they contribute neither points nor residuals.
    pub fn make(
        expr: &IndexExpr,
        var: &IndexVar,
        graph: &IterationGraph,
        iterators: &Iterators,
        exhausted: &HashSet<Access>,
    ) -> Self {
        let expr = match crate::expr_tools::project_exhausted(expr, exhausted) {
            Some(expr) => expr,
            None => return MergeLattice::default(),
        };
        let lattice = build(&expr, var, graph, iterators);
        MergeLattice {
            points: dedup_by_range(lattice.points),
        }
    }

    pub fn points(&self) -> &[MergePoint] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// The widest point: every iterator of the lattice is present.
    pub fn top(&self) -> &MergePoint {
        &self.points[0]
    }

    /// The range iterators of the top point.
    pub fn range_iterators(&self) -> &[IteratorId] {
        self.top().range_iterators()
    }

    /// The downward closure of the point at `index`: every point whose
    /// range iterators are a subset of its range iterators.
    pub fn sub_lattice(&self, index: usize) -> MergeLattice {
        let range = self.points[index].range_set();
        MergeLattice {
            points: self
                .points
                .iter()
                .filter(|q| q.range_set().is_subset(&range))
                .cloned()
                .collect(),
        }
    }

    /// Whether some point iterates a whole dimension on its own.
    pub fn is_full(&self, iterators: &Iterators) -> bool {
        self.points
            .iter()
            .any(|p| p.range.iter().all(|&it| iterators[it].is_full()))
    }
}

fn build(
    expr: &IndexExpr,
    var: &IndexVar,
    graph: &IterationGraph,
    iterators: &Iterators,
) -> MergeLattice {
    match expr {
        IndexExpr::Access(access) => {
            if !access.has_index(var) {
                return MergeLattice::default();
            }
            let path = graph
                .path_of_access(access)
                .expect("every operand access has a path");
            let step = graph
                .step_at(path, var)
                .expect("the access binds this variable");
            MergeLattice {
                points: vec![MergePoint::singleton(
                    iterators.step(step),
                    expr.clone(),
                )],
            }
        }
        IndexExpr::Literal(_) => MergeLattice::default(),
        IndexExpr::Neg(e) => map_lattice(build(e, var, graph, iterators), |p| {
            p.map_expr(IndexExpr::neg)
        }),
        IndexExpr::Sqrt(e) => map_lattice(build(e, var, graph, iterators), |p| {
            p.map_expr(IndexExpr::sqrt)
        }),
        IndexExpr::Add(l, r) => combine(l, r, BinOp::Add, var, graph, iterators),
        IndexExpr::Sub(l, r) => combine(l, r, BinOp::Sub, var, graph, iterators),
        IndexExpr::Mul(l, r) => combine(l, r, BinOp::Mul, var, graph, iterators),
        IndexExpr::Div(l, r) => combine(l, r, BinOp::Div, var, graph, iterators),
    }
}

/// The binary operators a lattice is combined over. Addition and
/// subtraction merge by union, multiplication and division by
/// intersection.
#[derive(Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    fn is_union(self) -> bool {
        matches!(self, BinOp::Add | BinOp::Sub)
    }

    fn apply(self, left: IndexExpr, right: IndexExpr) -> IndexExpr {
        match self {
            BinOp::Add => IndexExpr::add(left, right),
            BinOp::Sub => IndexExpr::sub(left, right),
            BinOp::Mul => IndexExpr::mul(left, right),
            BinOp::Div => IndexExpr::div(left, right),
        }
    }

    /// The residual of a point where only the right operand survives:
    /// subtraction flips its sign.
    fn apply_right_alone(self, right: IndexExpr) -> IndexExpr {
        match self {
            BinOp::Sub => IndexExpr::neg(right),
            _ => right,
        }
    }
}

fn map_lattice(lattice: MergeLattice, f: impl Fn(MergePoint) -> MergePoint) -> MergeLattice {
    MergeLattice {
        points: lattice.points.into_iter().map(f).collect(),
    }
}

fn combine(
    left_expr: &IndexExpr,
    right_expr: &IndexExpr,
    op: BinOp,
    var: &IndexVar,
    graph: &IterationGraph,
    iterators: &Iterators,
) -> MergeLattice {
    let left = build(left_expr, var, graph, iterators);
    let right = build(right_expr, var, graph, iterators);

    // A side without points does not iterate this variable; its whole
    // expression rides along in the other side's residuals.
    match (left.is_empty(), right.is_empty()) {
        (true, true) => return MergeLattice::default(),
        (true, false) => {
            return map_lattice(right, |p| {
                p.map_expr(|e| op.apply(left_expr.clone(), e))
            });
        }
        (false, true) => {
            return map_lattice(left, |p| {
                p.map_expr(|e| op.apply(e, right_expr.clone()))
            });
        }
        (false, false) => {}
    }

    let mut points = Vec::new();
    for p in &left.points {
        for q in &right.points {
            points.push(merge_points(p, q, op, iterators));
        }
    }
    if op.is_union() {
        points.extend(left.points);
        points.extend(
            right
                .points
                .into_iter()
                .map(|p| p.map_expr(|e| op.apply_right_alone(e))),
        );
    }
    MergeLattice { points }
}

fn merge_points(p: &MergePoint, q: &MergePoint, op: BinOp, iterators: &Iterators) -> MergePoint {
    let mut all = p.iterators.clone();
    for it in &q.iterators {
        if !all.contains(it) {
            all.push(*it);
        }
    }
    let range = if op.is_union() {
        union_of(&p.range, &q.range)
    } else {
        intersect_range(&p.range, &q.range, iterators)
    };
    MergePoint {
        iterators: all,
        range,
        expr: op.apply(p.expr.clone(), q.expr.clone()),
    }
}

fn union_of(a: &[IteratorId], b: &[IteratorId]) -> Vec<IteratorId> {
    let mut out = a.to_vec();
    for it in b {
        if !out.contains(it) {
            out.push(*it);
        }
    }
    out
}

/// Range iterators of an intersection point.
///
/// An intersection's space is contained in either side's, so keeping one
/// side's range intact keeps the point coverable; full levels with locate on
/// the other side are then demoted to random access. The smaller of the two
/// choices wins.
fn intersect_range(p: &[IteratorId], q: &[IteratorId], iterators: &Iterators) -> Vec<IteratorId> {
    let demotable =
        |it: &IteratorId| iterators[*it].is_full() && iterators[*it].has_locate();
    let keep_p = union_of(
        p,
        &q.iter().copied().filter(|it| !demotable(it)).collect::<Vec<_>>(),
    );
    let keep_q = union_of(
        &p.iter().copied().filter(|it| !demotable(it)).collect::<Vec<_>>(),
        q,
    );
    if keep_q.len() < keep_p.len() {
        keep_q
    } else {
        keep_p
    }
}

/// Drops points whose range-iterator set repeats an earlier point's: their
/// guards are identical, so the earlier, wider case shadows them.
fn dedup_by_range(points: Vec<MergePoint>) -> Vec<MergePoint> {
    let mut seen: Vec<BTreeSet<IteratorId>> = Vec::new();
    let mut out = Vec::new();
    for point in points {
        let key = point.range_set();
        if !seen.contains(&key) {
            seen.push(key);
            out.push(point);
        }
    }
    out
}

/// The accesses that are exhausted when `point` is selected: present in the
/// lattice's widest residual but absent from the point's.
pub fn exhausted_accesses(point: &MergePoint, lattice: &MergeLattice) -> HashSet<Access> {
    let live: HashSet<Access> = point.expr().accesses().into_iter().cloned().collect();
    lattice
        .top()
        .expr()
        .accesses()
        .into_iter()
        .filter(|a| !live.contains(*a))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use tensorloom_ir::ir::{Expr, Type};
    use tensorloom_ir::{Access, Assignment, Format, LevelKind, TensorVar};

    use crate::context::NameGenerator;

    struct Setup {
        graph: IterationGraph,
        iterators: Iterators,
        rhs: IndexExpr,
    }

    fn setup(stmt: Assignment) -> Setup {
        let graph = IterationGraph::make(&stmt).unwrap();
        let mut tensor_vars: HashMap<TensorVar, Expr> = HashMap::new();
        for path in graph.paths().iter().chain([graph.result_path()]) {
            let t = path.tensor().clone();
            let var = Expr::var(t.name(), Type::Int);
            tensor_vars.entry(t).or_insert(var);
        }
        let mut names = NameGenerator::new();
        let iterators = Iterators::new(&graph, &tensor_vars, 32, &mut names);
        Setup {
            graph,
            iterators,
            rhs: stmt.rhs().clone(),
        }
    }

    fn var(name: &str) -> IndexVar {
        IndexVar::new(name)
    }

    fn sparse_vec(name: &str) -> TensorVar {
        TensorVar::new(name, Format::new(vec![LevelKind::Sparse]))
    }

    fn dense_vec(name: &str) -> TensorVar {
        TensorVar::new(name, Format::dense(1))
    }

    fn vec_assign(result: TensorVar, rhs: IndexExpr, i: &IndexVar) -> Assignment {
        Assignment::new(Access::new(result, vec![i.clone()]), rhs)
    }

    fn make_lattice(setup: &Setup, var: &IndexVar) -> MergeLattice {
        MergeLattice::make(
            &setup.rhs,
            var,
            &setup.graph,
            &setup.iterators,
            &HashSet::new(),
        )
    }

    #[test]
    fn union_of_two_sparse_vectors_has_three_points() {
        let i = var("i");
        let rhs = IndexExpr::add(
            IndexExpr::access(sparse_vec("b"), vec![i.clone()]),
            IndexExpr::access(sparse_vec("c"), vec![i.clone()]),
        );
        let s = setup(vec_assign(dense_vec("y"), rhs, &i));
        let lattice = make_lattice(&s, &i);

        assert_eq!(lattice.len(), 3);
        assert_eq!(lattice.top().range_iterators().len(), 2);
        assert_eq!(lattice.points()[1].range_iterators().len(), 1);
        assert_eq!(lattice.points()[2].range_iterators().len(), 1);
    }

    #[test]
    fn intersection_demotes_the_dense_operand() {
        // b(i) * c(i) with b sparse and c dense: iterate b, locate into c.
        let i = var("i");
        let rhs = IndexExpr::mul(
            IndexExpr::access(sparse_vec("b"), vec![i.clone()]),
            IndexExpr::access(dense_vec("c"), vec![i.clone()]),
        );
        let s = setup(vec_assign(dense_vec("y"), rhs, &i));
        let lattice = make_lattice(&s, &i);

        assert_eq!(lattice.len(), 1);
        assert_eq!(lattice.top().range_iterators().len(), 1);
        assert_eq!(lattice.top().locate_iterators().len(), 1);
        let range = lattice.top().range_iterators()[0];
        assert!(!s.iterators[range].is_full());
    }

    #[test]
    fn union_never_demotes() {
        // b(i) + c(i) with c dense: both still range, or gaps of b are lost.
        let i = var("i");
        let rhs = IndexExpr::add(
            IndexExpr::access(sparse_vec("b"), vec![i.clone()]),
            IndexExpr::access(dense_vec("c"), vec![i.clone()]),
        );
        let s = setup(vec_assign(dense_vec("y"), rhs, &i));
        let lattice = make_lattice(&s, &i);

        assert_eq!(lattice.top().range_iterators().len(), 2);
        assert!(lattice.top().locate_iterators().is_empty());
        assert!(lattice.is_full(&s.iterators));
    }

    #[test]
    fn four_way_union_is_a_perfect_cover() {
        let i = var("i");
        let mut rhs = IndexExpr::access(sparse_vec("a"), vec![i.clone()]);
        for name in ["b", "c", "d"] {
            rhs = IndexExpr::add(rhs, IndexExpr::access(sparse_vec(name), vec![i.clone()]));
        }
        let s = setup(vec_assign(dense_vec("y"), rhs, &i));
        let lattice = make_lattice(&s, &i);

        assert_eq!(lattice.len(), 15);
        assert_eq!(lattice.range_iterators().len(), 4);
    }

    #[test]
    fn sub_lattice_is_monotone() {
        let i = var("i");
        let mut rhs = IndexExpr::access(sparse_vec("a"), vec![i.clone()]);
        for name in ["b", "c"] {
            rhs = IndexExpr::add(rhs, IndexExpr::access(sparse_vec(name), vec![i.clone()]));
        }
        let s = setup(vec_assign(dense_vec("y"), rhs, &i));
        let lattice = make_lattice(&s, &i);

        for (n, point) in lattice.points().iter().enumerate() {
            let sub = lattice.sub_lattice(n);
            assert_eq!(sub.top().range_set(), point.range_set());
            for q in sub.points() {
                assert!(q.range_set().is_subset(&point.range_set()));
                // The residual is a projection: its accesses are a subset.
                let point_accesses: HashSet<&Access> =
                    point.expr().accesses().into_iter().collect();
                for access in q.expr().accesses() {
                    assert!(point_accesses.contains(access));
                }
            }
        }
    }

    #[test]
    fn scalar_operand_rides_along_in_residuals() {
        // y(i) = b(i) * c, c an order-0 tensor: the lattice iterates b only
        // and every residual keeps the scalar factor.
        let i = var("i");
        let rhs = IndexExpr::mul(
            IndexExpr::access(sparse_vec("b"), vec![i.clone()]),
            IndexExpr::access(TensorVar::scalar("c"), vec![]),
        );
        let s = setup(vec_assign(dense_vec("y"), rhs.clone(), &i));
        let lattice = make_lattice(&s, &i);

        assert_eq!(lattice.len(), 1);
        assert_eq!(lattice.top().expr(), &s.rhs);
    }

    #[test]
    fn exhausted_accesses_prune_points() {
        let i = var("i");
        let b = Access::new(sparse_vec("b"), vec![i.clone()]);
        let rhs = IndexExpr::add(
            IndexExpr::Access(b.clone()),
            IndexExpr::access(sparse_vec("c"), vec![i.clone()]),
        );
        let s = setup(vec_assign(dense_vec("y"), rhs, &i));

        let exhausted: HashSet<Access> = [b].into_iter().collect();
        let lattice =
            MergeLattice::make(&s.rhs, &i, &s.graph, &s.iterators, &exhausted);
        assert_eq!(lattice.len(), 1);
        assert_eq!(lattice.top().range_iterators().len(), 1);
    }

    #[test]
    fn exhausted_set_of_a_narrow_point() {
        let i = var("i");
        let b = Access::new(sparse_vec("b"), vec![i.clone()]);
        let c = Access::new(sparse_vec("c"), vec![i.clone()]);
        let rhs = IndexExpr::add(IndexExpr::Access(b.clone()), IndexExpr::Access(c.clone()));
        let s = setup(vec_assign(dense_vec("y"), rhs, &i));
        let lattice = make_lattice(&s, &i);

        assert!(exhausted_accesses(lattice.top(), &lattice).is_empty());
        let only_b = &lattice.points()[1];
        let exhausted = exhausted_accesses(only_b, &lattice);
        assert_eq!(exhausted, [c].into_iter().collect());
    }
}
