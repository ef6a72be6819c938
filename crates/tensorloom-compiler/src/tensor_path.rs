//! Tensor paths: one operand access aligned to its storage format.

use tensorloom_ir::{Access, IndexVar, LevelKind, TensorVar};

/// Identifies a tensor path within an iteration graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathId {
    /// The n-th operand path, in order of first appearance in the
    /// expression.
    Operand(usize),
    /// The result tensor's path.
    Result,
}

/// One step of a tensor path: a storage level bound to an index variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PathStep {
    pub path: PathId,
    pub level: usize,
}

/// The ordered steps of one access: step `s` binds the access's
/// `order[s]`-th index variable to the `s`-th storage level of the tensor.
///
/// # Examples
///
/// ```
/// use tensorloom_compiler::TensorPath;
/// use tensorloom_ir::{Access, Format, IndexVar, TensorVar};
///
/// let (i, j) = (IndexVar::new("i"), IndexVar::new("j"));
/// let a = TensorVar::new("A", Format::csc());
/// let path = TensorPath::new(Access::new(a, vec![i.clone(), j.clone()]));
///
/// // CSC stores columns first.
/// assert_eq!(path.vars(), &[j, i]);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorPath {
    access: Access,
    vars: Vec<IndexVar>,
}

impl TensorPath {
    pub fn new(access: Access) -> Self {
        let vars = access
            .tensor()
            .format()
            .order()
            .iter()
            .map(|&d| access.indices()[d].clone())
            .collect();
        TensorPath { access, vars }
    }

    pub fn access(&self) -> &Access {
        &self.access
    }

    pub fn tensor(&self) -> &TensorVar {
        self.access.tensor()
    }

    /// Index variables in storage order.
    pub fn vars(&self) -> &[IndexVar] {
        &self.vars
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// The storage level bound to `var`, if any.
    pub fn step_of(&self, var: &IndexVar) -> Option<usize> {
        self.vars.iter().position(|v| v == var)
    }

    pub fn level_kind(&self, level: usize) -> LevelKind {
        self.tensor().format().level(level)
    }

    pub fn last_level(&self) -> Option<usize> {
        self.len().checked_sub(1)
    }
}
