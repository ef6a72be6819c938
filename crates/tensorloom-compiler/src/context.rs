//! The lowering context: options, iterators, and symbol tables threaded
//! through one lowering call tree.

use std::collections::{HashMap, HashSet};

use tensorloom_ir::ir::Expr;
use tensorloom_ir::TensorVar;

use crate::iteration_graph::IterationGraph;
use crate::iterators::{IteratorId, Iterators};

/// What kind of code to emit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Property {
    /// Emit code that assembles the result tensor's index structure.
    Assemble,
    /// Emit code that computes the result tensor's values.
    Compute,
    /// Add computed values into the result instead of overwriting
    /// (the `+=` form; implied by [`Assignment::accumulate`]).
    ///
    /// [`Assignment::accumulate`]: tensorloom_ir::Assignment::accumulate
    Accumulate,
    /// Reserved: ask the backend to print the generated kernel.
    Print,
}

/// Generates names that are unique and stable within one lowering.
#[derive(Debug, Default)]
pub struct NameGenerator {
    used: HashSet<String>,
    counts: HashMap<String, usize>,
}

impl NameGenerator {
    pub fn new() -> Self {
        NameGenerator::default()
    }

    /// Returns `base` the first time, then `base0`, `base1`, …
    pub fn fresh(&mut self, base: &str) -> String {
        if self.used.insert(base.to_string()) {
            return base.to_string();
        }
        loop {
            let count = self.counts.entry(base.to_string()).or_insert(0);
            let candidate = format!("{}{}", base, *count);
            *count += 1;
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

/// Where the current level writes: the result values array and, when the
/// result is a real tensor, the write position. A `None` position means the
/// target is a scalar temporary assigned directly.
#[derive(Clone, Debug)]
pub struct Target {
    pub tensor: Expr,
    pub pos: Option<Expr>,
}

/// Mutable state of one lowering invocation.
///
/// Owned by a single call tree; all mutation (temporaries, per-iterator
/// index variables, the values-capacity symbol) is local to it.
#[derive(Debug)]
pub struct Ctx {
    pub properties: HashSet<Property>,
    pub graph: IterationGraph,
    pub iterators: Iterators,
    /// IR variables for the tensor parameters of the generated function.
    pub tensor_vars: HashMap<TensorVar, Expr>,
    /// Scalar temporaries introduced during lowering.
    pub temporaries: HashMap<TensorVar, Expr>,
    /// The coordinate expression currently bound for each entered iterator.
    pub idx_vars: HashMap<IteratorId, Expr>,
    /// Capacity symbol for the growable result values array; present when
    /// assembling and computing together.
    pub vals_capacity: Option<Expr>,
    pub names: NameGenerator,
}

impl Ctx {
    pub fn new(
        graph: IterationGraph,
        properties: HashSet<Property>,
        tensor_vars: HashMap<TensorVar, Expr>,
        alloc_size: i64,
        mut names: NameGenerator,
    ) -> Self {
        let iterators = Iterators::new(&graph, &tensor_vars, alloc_size, &mut names);
        Ctx {
            properties,
            graph,
            iterators,
            tensor_vars,
            temporaries: HashMap::new(),
            idx_vars: HashMap::new(),
            vals_capacity: None,
            names,
        }
    }

    pub fn has(&self, property: Property) -> bool {
        self.properties.contains(&property)
    }

    /// The values-capacity symbol; only valid when assembling and computing.
    pub fn values_capacity(&self) -> Expr {
        self.vals_capacity
            .clone()
            .expect("values capacity is set when assembling and computing")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_names_are_unique() {
        let mut names = NameGenerator::new();
        assert_eq!(names.fresh("tj"), "tj");
        assert_eq!(names.fresh("tj"), "tj0");
        assert_eq!(names.fresh("tj"), "tj1");
        assert_eq!(names.fresh("tk"), "tk");
    }

    #[test]
    fn fresh_skips_taken_names() {
        let mut names = NameGenerator::new();
        assert_eq!(names.fresh("t0"), "t0");
        assert_eq!(names.fresh("t"), "t");
        // "t0" is taken by an explicit request; the counter skips it.
        assert_eq!(names.fresh("t"), "t1");
    }
}
