//! Iteration graphs: the forest of index variables that determines loop
//! nesting.
//!
//! Derived from the expression's operand accesses and the result tensor's
//! storage order. `parent(v) = u` means `v`'s loop nests inside `u`'s.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use tensorloom_ir::{Access, Assignment, IndexExpr, IndexVar};

use crate::tensor_path::{PathId, PathStep, TensorPath};

#[derive(Clone, Debug)]
pub struct IterationGraph {
    paths: Vec<TensorPath>,
    result_path: TensorPath,
    free: HashSet<IndexVar>,
    order: Vec<IndexVar>,
    parent: HashMap<IndexVar, IndexVar>,
    children: HashMap<IndexVar, Vec<IndexVar>>,
    roots: Vec<IndexVar>,
}

impl IterationGraph {
    /// Builds the iteration graph for an assignment.
    ///
    /// Every consecutive pair of variables in a tensor path (operands and
    /// result alike) is an ordering constraint; the variables are linearized
    /// against all constraints and shaped into a forest where each
    /// variable's parent is its innermost constrained predecessor.
    /// Conflicting constraints mean the expression needs a transposition,
    /// which is not supported.
    pub fn make(assignment: &Assignment) -> Result<Self> {
        let result_path = TensorPath::new(assignment.lhs().clone());

        // One path per distinct operand access, in order of appearance.
        let mut paths: Vec<TensorPath> = Vec::new();
        for access in assignment.rhs().accesses() {
            if !paths.iter().any(|p| p.access() == access) {
                paths.push(TensorPath::new(access.clone()));
            }
        }

        let mut vars: Vec<IndexVar> = Vec::new();
        let mut add_var = |var: &IndexVar, vars: &mut Vec<IndexVar>| {
            if !vars.contains(var) {
                vars.push(var.clone());
            }
        };
        for var in result_path.vars() {
            add_var(var, &mut vars);
        }
        for path in &paths {
            for var in path.vars() {
                add_var(var, &mut vars);
            }
        }

        // Direct predecessor sets from consecutive path steps.
        let mut preds: HashMap<IndexVar, Vec<IndexVar>> = HashMap::new();
        for var in &vars {
            preds.insert(var.clone(), Vec::new());
        }
        for path in paths.iter().chain(std::iter::once(&result_path)) {
            for pair in path.vars().windows(2) {
                let entry = preds.get_mut(&pair[1]).expect("variable registered");
                if !entry.contains(&pair[0]) {
                    entry.push(pair[0].clone());
                }
            }
        }

        // Kahn's algorithm, preferring the registration order above so the
        // result's storage order wins among unconstrained variables.
        let mut order: Vec<IndexVar> = Vec::new();
        let mut placed: HashSet<IndexVar> = HashSet::new();
        while order.len() < vars.len() {
            let next = vars.iter().find(|v| {
                !placed.contains(*v) && preds[*v].iter().all(|p| placed.contains(p))
            });
            match next {
                Some(v) => {
                    placed.insert(v.clone());
                    order.push(v.clone());
                }
                None => bail!(
                    "access order conflicts with storage order; transposition is not supported"
                ),
            }
        }

        // Forest: parent(v) is the innermost (latest in the linear order)
        // direct predecessor of v.
        let mut parent: HashMap<IndexVar, IndexVar> = HashMap::new();
        let mut children: HashMap<IndexVar, Vec<IndexVar>> = HashMap::new();
        let mut roots: Vec<IndexVar> = Vec::new();
        let position: HashMap<&IndexVar, usize> =
            order.iter().enumerate().map(|(n, v)| (v, n)).collect();
        for var in &order {
            match preds[var].iter().max_by_key(|p| position[*p]) {
                Some(p) => {
                    parent.insert(var.clone(), p.clone());
                    children.entry(p.clone()).or_default().push(var.clone());
                }
                None => roots.push(var.clone()),
            }
        }
        for list in children.values_mut() {
            list.sort_by_key(|v| position[v]);
        }

        let graph = IterationGraph {
            paths,
            result_path,
            free: assignment.free_vars().iter().cloned().collect(),
            order,
            parent,
            children,
            roots,
        };

        // Every predecessor of v must already be bound when v's loop is
        // entered, i.e. lie on v's root path.
        for var in &graph.order {
            let ancestors = graph.ancestors(var);
            for p in &graph.preds_of(var) {
                if !ancestors.contains(p) {
                    bail!(
                        "access order conflicts with storage order; transposition is not supported"
                    );
                }
            }
        }

        Ok(graph)
    }

    fn preds_of(&self, var: &IndexVar) -> Vec<IndexVar> {
        let mut preds = Vec::new();
        for path in self.paths.iter().chain(std::iter::once(&self.result_path)) {
            for pair in path.vars().windows(2) {
                if &pair[1] == var && !preds.contains(&pair[0]) {
                    preds.push(pair[0].clone());
                }
            }
        }
        preds
    }

    pub fn roots(&self) -> &[IndexVar] {
        &self.roots
    }

    pub fn children(&self, var: &IndexVar) -> &[IndexVar] {
        self.children.get(var).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parent(&self, var: &IndexVar) -> Option<&IndexVar> {
        self.parent.get(var)
    }

    /// The variables on the path from the root to `var`, inclusive.
    pub fn ancestors(&self, var: &IndexVar) -> Vec<IndexVar> {
        let mut chain = vec![var.clone()];
        let mut cur = var;
        while let Some(p) = self.parent.get(cur) {
            chain.push(p.clone());
            cur = p;
        }
        chain.reverse();
        chain
    }

    /// `var` and every variable below it, in depth-first order.
    pub fn descendants(&self, var: &IndexVar) -> Vec<IndexVar> {
        let mut out = vec![var.clone()];
        let mut i = 0;
        while i < out.len() {
            let next = out[i].clone();
            out.extend(self.children(&next).iter().cloned());
            i += 1;
        }
        out
    }

    pub fn is_free(&self, var: &IndexVar) -> bool {
        self.free.contains(var)
    }

    pub fn is_reduction(&self, var: &IndexVar) -> bool {
        !self.is_free(var)
    }

    /// Free variable with no free variable strictly below it.
    pub fn is_last_free_variable(&self, var: &IndexVar) -> bool {
        self.is_free(var)
            && !self
                .descendants(var)
                .iter()
                .skip(1)
                .any(|v| self.is_free(v))
    }

    pub fn has_free_variable_descendant(&self, var: &IndexVar) -> bool {
        self.descendants(var).iter().skip(1).any(|v| self.is_free(v))
    }

    /// Whether `var` or any of its ancestors is a reduction variable.
    pub fn has_reduction_variable_ancestor(&self, var: &IndexVar) -> bool {
        self.ancestors(var).iter().any(|v| self.is_reduction(v))
    }

    pub fn paths(&self) -> &[TensorPath] {
        &self.paths
    }

    pub fn result_path(&self) -> &TensorPath {
        &self.result_path
    }

    pub fn path(&self, id: PathId) -> &TensorPath {
        match id {
            PathId::Operand(n) => &self.paths[n],
            PathId::Result => &self.result_path,
        }
    }

    /// The path of the given access. Structurally equal accesses share one
    /// path.
    pub fn path_of_access(&self, access: &Access) -> Option<PathId> {
        self.paths
            .iter()
            .position(|p| p.access() == access)
            .map(PathId::Operand)
    }

    /// The step binding `var` on the given path, if the path ranges over it.
    pub fn step_at(&self, id: PathId, var: &IndexVar) -> Option<PathStep> {
        self.path(id)
            .step_of(var)
            .map(|level| PathStep { path: id, level })
    }
}
