//! Index notation: index variables, tensor variables, accesses and
//! expressions.

use serde::{Deserialize, Serialize};

use crate::format::Format;

/// A named symbolic loop variable.
///
/// Index variables are *free* when they appear on the left-hand side of an
/// assignment and *reduction* variables otherwise; the classification lives
/// on [`Assignment`], not here.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexVar {
    name: String,
}

impl IndexVar {
    pub fn new(name: impl Into<String>) -> Self {
        IndexVar { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A typed tensor variable: a name plus a storage format.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TensorVar {
    name: String,
    format: Format,
}

impl TensorVar {
    pub fn new(name: impl Into<String>, format: Format) -> Self {
        TensorVar {
            name: name.into(),
            format,
        }
    }

    /// An order-0 tensor holding a single value.
    pub fn scalar(name: impl Into<String>) -> Self {
        TensorVar::new(name, Format::new(vec![]))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> &Format {
        &self.format
    }

    pub fn order(&self) -> usize {
        self.format.num_levels()
    }

    pub fn is_scalar(&self) -> bool {
        self.order() == 0
    }
}

/// A use of a tensor in an expression: `T(i, j, k)`.
///
/// The index variables are in *logical* dimension order; the tensor's format
/// permutation decides the order they are iterated in.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Access {
    tensor: TensorVar,
    indices: Vec<IndexVar>,
}

impl Access {
    pub fn new(tensor: TensorVar, indices: Vec<IndexVar>) -> Self {
        Access { tensor, indices }
    }

    pub fn tensor(&self) -> &TensorVar {
        &self.tensor
    }

    pub fn indices(&self) -> &[IndexVar] {
        &self.indices
    }

    pub fn has_index(&self, var: &IndexVar) -> bool {
        self.indices.contains(var)
    }

    /// Checks that the access is well-formed against its tensor's format.
    pub fn validate(&self) -> Result<(), crate::error::IrError> {
        use crate::error::IrError;
        if self.indices.len() != self.tensor.order() {
            return Err(IrError::AccessArityMismatch {
                tensor: self.tensor.name().to_string(),
                expected: self.tensor.order(),
                actual: self.indices.len(),
            });
        }
        for (i, var) in self.indices.iter().enumerate() {
            if self.indices[..i].contains(var) {
                return Err(IrError::RepeatedIndexVariable {
                    tensor: self.tensor.name().to_string(),
                    var: var.name().to_string(),
                });
            }
        }
        Ok(())
    }
}

/// An index-notation expression over tensor accesses.
///
/// # Examples
///
/// ```
/// use tensorloom_ir::{Access, Format, IndexExpr, IndexVar, TensorVar};
///
/// let i = IndexVar::new("i");
/// let j = IndexVar::new("j");
/// let a = TensorVar::new("A", Format::csr());
/// let x = TensorVar::new("x", Format::dense(1));
///
/// // A(i,j) * x(j)
/// let expr = IndexExpr::mul(
///     IndexExpr::access(a, vec![i.clone(), j.clone()]),
///     IndexExpr::access(x, vec![j]),
/// );
/// assert_eq!(expr.index_vars().len(), 2);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum IndexExpr {
    Access(Access),
    Literal(f64),
    Neg(Box<IndexExpr>),
    Sqrt(Box<IndexExpr>),
    Add(Box<IndexExpr>, Box<IndexExpr>),
    Sub(Box<IndexExpr>, Box<IndexExpr>),
    Mul(Box<IndexExpr>, Box<IndexExpr>),
    Div(Box<IndexExpr>, Box<IndexExpr>),
}

impl IndexExpr {
    pub fn access(tensor: TensorVar, indices: Vec<IndexVar>) -> Self {
        IndexExpr::Access(Access::new(tensor, indices))
    }

    pub fn literal(value: f64) -> Self {
        IndexExpr::Literal(value)
    }

    pub fn neg(expr: IndexExpr) -> Self {
        IndexExpr::Neg(Box::new(expr))
    }

    pub fn sqrt(expr: IndexExpr) -> Self {
        IndexExpr::Sqrt(Box::new(expr))
    }

    pub fn add(left: IndexExpr, right: IndexExpr) -> Self {
        IndexExpr::Add(Box::new(left), Box::new(right))
    }

    pub fn sub(left: IndexExpr, right: IndexExpr) -> Self {
        IndexExpr::Sub(Box::new(left), Box::new(right))
    }

    pub fn mul(left: IndexExpr, right: IndexExpr) -> Self {
        IndexExpr::Mul(Box::new(left), Box::new(right))
    }

    pub fn div(left: IndexExpr, right: IndexExpr) -> Self {
        IndexExpr::Div(Box::new(left), Box::new(right))
    }

    /// All accesses in the expression, in pre-order.
    pub fn accesses(&self) -> Vec<&Access> {
        let mut out = Vec::new();
        self.collect_accesses(&mut out);
        out
    }

    fn collect_accesses<'a>(&'a self, out: &mut Vec<&'a Access>) {
        match self {
            IndexExpr::Access(a) => out.push(a),
            IndexExpr::Literal(_) => {}
            IndexExpr::Neg(e) | IndexExpr::Sqrt(e) => e.collect_accesses(out),
            IndexExpr::Add(l, r)
            | IndexExpr::Sub(l, r)
            | IndexExpr::Mul(l, r)
            | IndexExpr::Div(l, r) => {
                l.collect_accesses(out);
                r.collect_accesses(out);
            }
        }
    }

    /// The distinct index variables used by the expression, in order of
    /// first appearance.
    pub fn index_vars(&self) -> Vec<IndexVar> {
        let mut out: Vec<IndexVar> = Vec::new();
        for access in self.accesses() {
            for var in access.indices() {
                if !out.contains(var) {
                    out.push(var.clone());
                }
            }
        }
        out
    }

    pub fn contains_var(&self, var: &IndexVar) -> bool {
        self.accesses().iter().any(|a| a.has_index(var))
    }
}

/// An index statement `lhs = rhs` (or `lhs += rhs` when `accumulate`).
///
/// The variables of `lhs` are the statement's free variables; every other
/// variable in `rhs` is a reduction variable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    lhs: Access,
    rhs: IndexExpr,
    accumulate: bool,
}

impl Assignment {
    pub fn new(lhs: Access, rhs: IndexExpr) -> Self {
        Assignment {
            lhs,
            rhs,
            accumulate: false,
        }
    }

    /// The `+=` form: results are accumulated into existing values.
    pub fn accumulate(lhs: Access, rhs: IndexExpr) -> Self {
        Assignment {
            lhs,
            rhs,
            accumulate: true,
        }
    }

    pub fn lhs(&self) -> &Access {
        &self.lhs
    }

    pub fn rhs(&self) -> &IndexExpr {
        &self.rhs
    }

    pub fn is_accumulate(&self) -> bool {
        self.accumulate
    }

    pub fn result(&self) -> &TensorVar {
        self.lhs.tensor()
    }

    pub fn free_vars(&self) -> &[IndexVar] {
        self.lhs.indices()
    }

    pub fn reduction_vars(&self) -> Vec<IndexVar> {
        self.rhs
            .index_vars()
            .into_iter()
            .filter(|v| !self.lhs.indices().contains(v))
            .collect()
    }

    pub fn is_free(&self, var: &IndexVar) -> bool {
        self.lhs.indices().contains(var)
    }
}
