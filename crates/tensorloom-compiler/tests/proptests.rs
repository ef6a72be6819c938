//! Property-based end-to-end tests: for random vector expressions over
//! mixed formats, the lowered kernel computes exactly what a naive dense
//! evaluator computes.

mod common;

use std::collections::HashMap;

use common::{pack, run, to_dense};
use proptest::prelude::*;
use tensorloom_compiler::{lower, Property};
use tensorloom_ir::{Access, Assignment, Format, IndexExpr, IndexVar, LevelKind, TensorVar};

const DIM: i64 = 6;

fn operand(name: &str) -> TensorVar {
    // Fixed format assignment: b and d sparse, c and e dense.
    let kind = match name {
        "b" | "d" => LevelKind::Sparse,
        _ => LevelKind::Dense,
    };
    TensorVar::new(name, Format::new(vec![kind]))
}

#[derive(Clone, Debug)]
enum Op {
    Add,
    Sub,
    Mul,
}

#[derive(Clone, Debug)]
enum VecExpr {
    Leaf(&'static str),
    Node(Op, Box<VecExpr>, Box<VecExpr>),
}

fn arb_vec_expr() -> impl Strategy<Value = VecExpr> {
    let leaf = prop_oneof![Just("b"), Just("c"), Just("d"), Just("e")].prop_map(VecExpr::Leaf);
    leaf.prop_recursive(3, 16, 2, |inner| {
        (
            prop_oneof![Just(Op::Add), Just(Op::Sub), Just(Op::Mul)],
            inner.clone(),
            inner,
        )
            .prop_map(|(op, l, r)| VecExpr::Node(op, Box::new(l), Box::new(r)))
    })
}

fn arb_operand_values() -> impl Strategy<Value = Vec<(i64, f64)>> {
    prop::collection::vec((0..DIM, -3i64..=3), 0..5).prop_map(|entries| {
        // Deduplicate coordinates so packed and dense views agree exactly.
        let mut seen = HashMap::new();
        for (c, v) in entries {
            seen.insert(c, v as f64);
        }
        seen.into_iter().collect()
    })
}

fn to_index_expr(expr: &VecExpr, i: &IndexVar) -> IndexExpr {
    match expr {
        VecExpr::Leaf(name) => IndexExpr::access(operand(name), vec![i.clone()]),
        VecExpr::Node(op, l, r) => {
            let (l, r) = (to_index_expr(l, i), to_index_expr(r, i));
            match op {
                Op::Add => IndexExpr::add(l, r),
                Op::Sub => IndexExpr::sub(l, r),
                Op::Mul => IndexExpr::mul(l, r),
            }
        }
    }
}

fn naive(expr: &VecExpr, dense: &HashMap<&'static str, Vec<f64>>, at: usize) -> f64 {
    match expr {
        VecExpr::Leaf(name) => dense[name][at],
        VecExpr::Node(op, l, r) => {
            let (l, r) = (naive(l, dense, at), naive(r, dense, at));
            match op {
                Op::Add => l + r,
                Op::Sub => l - r,
                Op::Mul => l * r,
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Merge-semantics equivalence: the value written to `y[i]` equals the
    /// mathematical definition of the expression at `i`.
    #[test]
    fn lowered_kernel_matches_naive_evaluation(
        expr in arb_vec_expr(),
        b in arb_operand_values(),
        c in arb_operand_values(),
        d in arb_operand_values(),
        e in arb_operand_values(),
    ) {
        let i = IndexVar::new("i");
        let y = TensorVar::new("y", Format::dense(1));
        let stmt = Assignment::new(
            Access::new(y.clone(), vec![i.clone()]),
            to_index_expr(&expr, &i),
        );
        let func = lower(&stmt, "kernel", &[Property::Compute], 4).unwrap();

        let values: HashMap<&'static str, Vec<(i64, f64)>> =
            [("b", b), ("c", c), ("d", d), ("e", e)].into_iter().collect();

        // Bind operands in the order they appear as kernel arguments.
        let graph_order: Vec<&'static str> = {
            let mut order = Vec::new();
            fn leaves(expr: &VecExpr, out: &mut Vec<&'static str>) {
                match expr {
                    VecExpr::Leaf(name) => {
                        if !out.contains(name) {
                            out.push(name);
                        }
                    }
                    VecExpr::Node(_, l, r) => {
                        leaves(l, out);
                        leaves(r, out);
                    }
                }
            }
            leaves(&expr, &mut order);
            order
        };

        let mut tensors = vec![pack(&y, &[DIM], &[])];
        for name in &graph_order {
            let entries: Vec<(Vec<i64>, f64)> = values[name]
                .iter()
                .map(|&(coord, value)| (vec![coord], value))
                .collect();
            tensors.push(pack(&operand(name), &[DIM], &entries));
        }

        let out = run(&func, tensors);
        let result = to_dense(&out[0]);

        let dense: HashMap<&'static str, Vec<f64>> = values
            .iter()
            .map(|(name, entries)| {
                let mut v = vec![0.0; DIM as usize];
                for &(coord, value) in entries {
                    v[coord as usize] = value;
                }
                (*name, v)
            })
            .collect();
        for at in 0..DIM as usize {
            prop_assert_eq!(result[at], naive(&expr, &dense, at));
        }
    }
}
