//! # Tensorloom
//!
//! Umbrella crate for the tensorloom sparse-tensor-algebra compiler.
//!
//! Tensorloom takes index-notation statements over tensors with per-
//! dimension storage formats — `A(i,j) = B(i,k) * C(k,j)` with `B` and `C`
//! compressed — and lowers them to an imperative loop-nest IR that
//! co-iterates the sparse operands, assembles the result's index
//! structure, and computes its values.
//!
//! - [`ir`]: index notation, storage formats, and the emitted IR.
//! - [`compiler`]: iteration graphs, merge lattices, and the lowering
//!   engine.
//!
//! ## Quick Start
//!
//! ```rust
//! use tensorloom::prelude::*;
//!
//! let (i, j) = (IndexVar::new("i"), IndexVar::new("j"));
//! let y = TensorVar::new("y", Format::dense(1));
//! let a = TensorVar::new("A", Format::csr());
//! let x = TensorVar::new("x", Format::dense(1));
//!
//! // y(i) = A(i,j) * x(j)
//! let spmv = Assignment::new(
//!     Access::new(y, vec![i.clone()]),
//!     IndexExpr::mul(
//!         IndexExpr::access(a, vec![i, j.clone()]),
//!         IndexExpr::access(x, vec![j]),
//!     ),
//! );
//! let kernel = lower(&spmv, "spmv", &[Property::Compute], 1 << 20).unwrap();
//! assert_eq!(kernel.arguments.len(), 2);
//! ```

pub use tensorloom_compiler as compiler;
pub use tensorloom_ir as ir;

pub mod prelude {
    pub use tensorloom_compiler::{is_lowerable, lower, Property};
    pub use tensorloom_ir::{
        Access, Assignment, Format, IndexExpr, IndexVar, LevelKind, TensorVar,
    };
}
